//! # InfluxDB Record Listing
//!
//! Checks InfluxDB health, reads back the newest `power_monitoring` records
//! through lib_common's `InfluxSink`, prints them as a table and closes with
//! min/avg/max per field.

use clap::Parser;
use lib_common::configs::InfluxSettings;
use lib_common::connections::{InfluxSink, StoredRecord};

#[derive(Parser, Debug)]
#[clap(about = "List the newest power_monitoring records stored in InfluxDB")]
struct Args {
    /// Number of records to show.
    #[clap(short, long, default_value_t = 50, value_parser = clap::value_parser!(u32).range(1..))]
    count: u32,

    #[clap(long, env = "INFLUXDB2_HOST", default_value = "localhost")]
    host: String,

    #[clap(long, env = "INFLUXDB2_PORT")]
    port: Option<u16>,

    #[clap(long, env = "INFLUXDB2_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[clap(long, env = "INFLUXDB2_USER")]
    user: Option<String>,

    #[clap(long, env = "INFLUXDB2_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[clap(long, env = "INFLUXDB2_ORG")]
    org: Option<String>,

    #[clap(long, env = "INFLUXDB2_BUCKET")]
    bucket: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let settings = InfluxSettings::resolve(
        Some(args.host),
        args.port,
        args.token,
        args.user,
        args.password,
        args.org,
        args.bucket,
    )?;
    println!("[*] Connecting to InfluxDB at {} ...", settings.url);
    println!("[INFO] Organization: {}", settings.org);
    println!("[INFO] Bucket: {}", settings.bucket);

    let sink = InfluxSink::new(&settings)?;

    // // Statement: Health check before querying
    let health = sink.health().await?;
    if health.status != "pass" {
        eprintln!("\n[ERROR] InfluxDB health check failed:");
        eprintln!(">>> {}", health.message.unwrap_or(health.status));
        std::process::exit(1);
    }
    println!("[SUCCESS] Connected, retrieving last {} records\n", args.count);

    // // Statement: Newest records, newest first
    let records = match sink.recent(args.count as usize).await {
        Ok(records) => records,
        Err(e) => {
            eprintln!("\n[ERROR] Query failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    };

    if records.is_empty() {
        println!("No records found. Check that the server is persisting samples.");
        return Ok(());
    }

    println!("{:<21} {:<7} {:>15} {:>22} {:>17}", "Timestamp", "Region", "Grid Power (W)", "Spot Price (SEK/kWh)", "Solar Power (W)");
    println!("{}", "=".repeat(86));
    for r in &records {
        println!(
            "{:<21} {:<7} {:>15} {:>22} {:>17}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.region.as_deref().unwrap_or("-"),
            cell(r.grid_power, 1),
            cell(r.spot_price, 4),
            cell(r.solar_power, 1),
        );
    }
    println!("{}", "=".repeat(86));
    println!("\n[INFO] Total records displayed: {}", records.len());

    // // Statement: Summary per field
    println!("\n--- Summary ---");
    summarize("Grid Power", "W", 1, &records, |r| r.grid_power);
    summarize("Spot Price", "SEK/kWh", 4, &records, |r| r.spot_price);
    summarize("Solar Power", "W", 1, &records, |r| r.solar_power);

    Ok(())
}

fn cell(value: Option<f64>, decimals: usize) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v:.decimals$}"))
}

fn summarize(label: &str, unit: &str, decimals: usize, records: &[StoredRecord], field: impl Fn(&StoredRecord) -> Option<f64>) {
    let values: Vec<f64> = records.iter().filter_map(field).collect();
    if values.is_empty() {
        return;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    println!(
        "{:<12} avg={:>10.decimals$} {unit}, min={:>10.decimals$} {unit}, max={:>10.decimals$} {unit}",
        format!("{label}:"),
        avg,
        min,
        max,
    );
}
