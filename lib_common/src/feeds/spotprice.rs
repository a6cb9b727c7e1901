//! Day-ahead spot prices from elprisetjustnu.se.
//!
//! `GET {base}/{YYYY}/{MM-DD}_{REGION}.json` returns the full series for one
//! Swedish calendar day, quarter-hourly since October 2025 and hourly before.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;

use crate::core::model::Region;
use crate::core::ports::{FetchError, PriceFeed, PriceInterval};
use crate::retrieve::ky_http::{ApiClient, HttpError, DEFAULT_TIMEOUT};

/// Public endpoint, no credentials required.
pub const DEFAULT_BASE_URL: &str = "https://www.elprisetjustnu.se/api/v1/prices/";

#[derive(Debug, Deserialize)]
struct RawInterval {
    #[serde(rename = "SEK_per_kWh")]
    sek_per_kwh: f64,
    #[serde(rename = "EUR_per_kWh")]
    eur_per_kwh: Option<f64>,
    time_start: DateTime<FixedOffset>,
    time_end: DateTime<FixedOffset>,
}

/// elprisetjustnu.se client.
pub struct ElprisetClient {
    api: ApiClient,
}

impl ElprisetClient {
    /// Client for `base_url` with 3 retries.
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        let base = if base_url.ends_with('/') { base_url.to_string() } else { format!("{base_url}/") };
        Ok(Self { api: ApiClient::with_options(&base, 3, DEFAULT_TIMEOUT)? })
    }

    /// Relative path of the day file.
    pub fn day_path(date: NaiveDate, region: Region) -> String {
        format!("{}_{}.json", date.format("%Y/%m-%d"), region)
    }
}

fn into_intervals(raw: Vec<RawInterval>) -> Result<Vec<PriceInterval>, FetchError> {
    let mut intervals = raw
        .into_iter()
        .map(|r| {
            let start = r.time_start.with_timezone(&Utc);
            let end = r.time_end.with_timezone(&Utc);
            if end <= start || !r.sek_per_kwh.is_finite() {
                return Err(FetchError::Parse(format!("bad interval starting {}", r.time_start)));
            }
            Ok(PriceInterval { sek_per_kwh: r.sek_per_kwh, eur_per_kwh: r.eur_per_kwh, start, end })
        })
        .collect::<Result<Vec<_>, _>>()?;
    intervals.sort_by_key(|i| i.start);
    Ok(intervals)
}

#[async_trait]
impl PriceFeed for ElprisetClient {
    async fn day_series(&self, date: NaiveDate, region: Region) -> Result<Vec<PriceInterval>, FetchError> {
        let path = Self::day_path(date, region);
        let resp = self.api.get_json::<Vec<RawInterval>>(&path, &[]).await?;

        match (resp.success, resp.status, resp.data) {
            (true, _, Some(raw)) => {
                let intervals = into_intervals(raw)?;
                tracing::debug!(%date, %region, count = intervals.len(), "Price series received");
                Ok(intervals)
            }
            (_, 401 | 403, _) => Err(FetchError::Auth(format!("HTTP {}", resp.status))),
            (_, status, _) => Err(FetchError::Transient(format!(
                "HTTP {} for {}: {}",
                status,
                path,
                resp.error_body.unwrap_or_default()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::test_server::serve_once;
    use chrono::TimeZone;

    const TWO_HOURS: &str = r#"[
        {"SEK_per_kWh":0.91,"EUR_per_kWh":0.0812,"EXR":11.2,"time_start":"2025-06-01T01:00:00+02:00","time_end":"2025-06-01T02:00:00+02:00"},
        {"SEK_per_kWh":0.85,"EUR_per_kWh":0.0759,"EXR":11.2,"time_start":"2025-06-01T00:00:00+02:00","time_end":"2025-06-01T01:00:00+02:00"}
    ]"#;

    #[test]
    fn test_day_path() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_eq!(ElprisetClient::day_path(date, Region::SE3), "2025/06-01_SE3.json");
    }

    #[tokio::test]
    async fn test_series_is_parsed_and_sorted() {
        let (base, server) = serve_once("200 OK", "application/json", TWO_HOURS);
        let client = ElprisetClient::new(base.trim_end_matches('/')).unwrap();

        let series = client.day_series(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), Region::SE3).await.unwrap();
        let request = server.join().unwrap();

        assert!(request.starts_with("GET /2025/06-01_SE3.json "));
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].sek_per_kwh, 0.85);
        assert_eq!(series[0].start, Utc.with_ymd_and_hms(2025, 5, 31, 22, 0, 0).unwrap());
        assert_eq!(series[0].end, series[1].start);
        assert_eq!(series[1].eur_per_kwh, Some(0.0812));
    }

    #[tokio::test]
    async fn test_unpublished_day_is_transient() {
        let (base, server) = serve_once("404 Not Found", "text/plain", "Not Found");
        let client = ElprisetClient::new(&base).unwrap();

        let err = client.day_series(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(), Region::SE4).await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let (base, server) = serve_once("200 OK", "application/json", r#"{"prices":[]}"#);
        let client = ElprisetClient::new(&base).unwrap();

        let err = client.day_series(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), Region::SE4).await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[test]
    fn test_inverted_interval_is_rejected() {
        let raw: Vec<RawInterval> = serde_json::from_str(
            r#"[{"SEK_per_kWh":1.0,"EUR_per_kWh":null,"EXR":null,"time_start":"2025-06-01T02:00:00+02:00","time_end":"2025-06-01T01:00:00+02:00"}]"#,
        )
        .unwrap();
        assert!(matches!(into_intervals(raw), Err(FetchError::Parse(_))));
    }
}
