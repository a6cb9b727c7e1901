//! # Feed Smoke Test
//!
//! Fetches today's day-ahead prices from the live price API through
//! lib_common, picks the interval covering "now" through the `PriceCache`,
//! and prints today's daylight plan for the configured site.

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use lib_common::core::{DailyPlan, Location, PriceCache, PriceFeed, QuotaSettings, Region};
use lib_common::feeds::{spotprice, ElprisetClient};
use lib_common::SharedState;

#[derive(Parser, Debug)]
#[clap(about = "Live smoke test of the price feed and the daylight plan")]
struct Args {
    #[clap(long, env = "SPOT_PRICE_REGION", default_value = "SE4")]
    region: String,

    #[clap(long, env = "SPOT_PRICE_URL", default_value = spotprice::DEFAULT_BASE_URL)]
    url: String,

    #[clap(long, env = "SITE_LATITUDE")]
    latitude: Option<f64>,

    #[clap(long, env = "SITE_LONGITUDE")]
    longitude: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let region: Region = args.region.parse().map_err(anyhow::Error::msg)?;
    let tz = chrono_tz::Europe::Stockholm;
    let now = Utc::now();
    let today = now.with_timezone(&tz).date_naive();

    // // Statement: Raw day series straight from the feed
    let client = Arc::new(ElprisetClient::new(&args.url)?);
    println!("[*] Requesting {} prices for {} ...", region, today);

    match client.day_series(today, region).await {
        Ok(series) => {
            println!("\n[SUCCESS] {} intervals received", series.len());
            if let (Some(first), Some(last)) = (series.first(), series.last()) {
                println!("[INFO] Covering {} .. {}", first.start, last.end);
            }
        }
        Err(e) => {
            eprintln!("\n[ERROR] Price retrieval failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    // // Statement: The interval the dashboard would show right now
    let shared = SharedState::new();
    let cache = PriceCache::new(client, shared.clone(), tz);
    let price = cache.current_price(region, now).await?;
    println!("-----------------------------------------------");
    println!("{}", serde_json::to_string_pretty(price.as_ref())?);
    println!("-----------------------------------------------");

    let again = cache.current_price(region, now).await?;
    println!("[INFO] Second lookup served from cache: {}", Arc::ptr_eq(&price, &again));
    println!("[INFO] Shared state holds price: {}", shared.snapshot().price_for(region).is_some());

    // // Statement: Today's daylight window and solar poll cadence
    let mut location = Location::default();
    location.latitude = args.latitude.unwrap_or(location.latitude);
    location.longitude = args.longitude.unwrap_or(location.longitude);
    let quota = QuotaSettings::default();
    let plan = DailyPlan::compute(today, &location, &quota);

    println!("\n[INFO] Daylight {} .. {} ({:.0} min, fallback: {})", plan.sunrise, plan.sunset, plan.daylight_minutes(), plan.fallback);
    println!(
        "[INFO] {:.0} calls allowed, one every {:.1} min; daylight now: {}",
        plan.allowed_calls,
        plan.interval_minutes,
        plan.is_daylight(now)
    );

    Ok(())
}
