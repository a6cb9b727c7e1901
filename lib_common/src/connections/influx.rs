//! # InfluxDB 2 Sink
//!
//! Writes `PowerRecord`s as line protocol:
//!
//! ```text
//! power_monitoring,region=SE3 grid_power=1580.5,spot_price=0.85,solar_power=2300 1748772000000000000
//! ```
//!
//! Absent values are omitted from the field set. One HTTP request per record,
//! no retries: the persister owns the failure policy.
//!
//! The same connection reads the newest records back with a Flux query, for
//! the `list_influx` tool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::configs::settings::{InfluxAuth, InfluxSettings};
use crate::core::persister::PowerRecord;
use crate::core::ports::{SinkError, TimeSeriesSink};
use crate::retrieve::ky_http::{ApiClient, Credentials, HttpError, DEFAULT_TIMEOUT};

/// Measurement name.
pub const MEASUREMENT: &str = "power_monitoring";

/// How far back `recent` looks.
const QUERY_RANGE: &str = "-30d";

/// One stored row, pivoted to one column per field.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub timestamp: DateTime<Utc>,
    pub region: Option<String>,
    pub grid_power: Option<f64>,
    pub spot_price: Option<f64>,
    pub solar_power: Option<f64>,
}

/// Body of `GET /health`.
#[derive(Debug, Deserialize)]
pub struct InfluxHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Line-protocol writer for one org/bucket.
pub struct InfluxSink {
    api: ApiClient,
    org: String,
    bucket: String,
}

impl InfluxSink {
    /// Sink for `settings`.
    pub fn new(settings: &InfluxSettings) -> Result<Self, HttpError> {
        let credentials = match &settings.auth {
            InfluxAuth::Token(token) => Credentials::Token(token.clone()),
            InfluxAuth::Basic { user, password } => Credentials::Basic { user: user.clone(), password: password.clone() },
        };
        let api = ApiClient::with_options(&settings.url, 0, DEFAULT_TIMEOUT)?.with_credentials(credentials);
        Ok(Self { api, org: settings.org.clone(), bucket: settings.bucket.clone() })
    }

    /// Server health as reported by InfluxDB.
    pub async fn health(&self) -> Result<InfluxHealth, SinkError> {
        let resp = self
            .api
            .get_json::<InfluxHealth>("health", &[])
            .await
            .map_err(|e| SinkError::Query(e.to_string()))?;
        // An unhealthy server answers 503 with the same body shape.
        match (resp.data, resp.error_body) {
            (Some(health), _) => Ok(health),
            (None, Some(body)) => serde_json::from_str(&body).map_err(|_| SinkError::Query(format!("HTTP {}: {}", resp.status, body))),
            (None, None) => Err(SinkError::Query(format!("HTTP {}", resp.status))),
        }
    }

    /// The newest `count` records across all regions, newest first.
    pub async fn recent(&self, count: usize) -> Result<Vec<StoredRecord>, SinkError> {
        let query = [("org", self.org.as_str())];
        let resp = self
            .api
            .post_body("api/v2/query", &query, "application/vnd.flux", recent_query(&self.bucket, count))
            .await
            .map_err(|e| SinkError::Query(e.to_string()))?;

        match resp.status {
            200..=299 => parse_query_csv(resp.data.as_deref().unwrap_or_default()),
            401 | 403 => Err(SinkError::Auth(resp.error_body.unwrap_or_default())),
            status => Err(SinkError::Query(format!("HTTP {}: {}", status, resp.error_body.unwrap_or_default()))),
        }
    }
}

/// Flux query for the newest `count` records in `bucket`.
pub fn recent_query(bucket: &str, count: usize) -> String {
    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: {QUERY_RANGE})
  |> filter(fn: (r) => r._measurement == "{MEASUREMENT}")
  |> pivot(rowKey: ["_time"], columnKey: ["_field"], valueColumn: "_value")
  |> group()
  |> sort(columns: ["_time"], desc: true)
  |> limit(n: {count})"#
    )
}

/// Parses the CSV body of `/api/v2/query`.
///
/// Each result table starts with its own header row and tables are separated
/// by blank lines. Annotation rows (`#...`) are skipped. Empty cells are
/// absent fields.
pub fn parse_query_csv(body: &str) -> Result<Vec<StoredRecord>, SinkError> {
    let mut records = Vec::new();
    let mut header: Option<Vec<&str>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cells: Vec<&str> = line.split(',').collect();
        let Some(columns) = &header else {
            header = Some(cells);
            continue;
        };

        let cell = |name: &str| {
            columns
                .iter()
                .position(|c| *c == name)
                .and_then(|i| cells.get(i))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let number = |name: &str| -> Result<Option<f64>, SinkError> {
            cell(name)
                .map(|v| v.parse::<f64>().map_err(|e| SinkError::Query(format!("{name}={v}: {e}"))))
                .transpose()
        };

        let time = cell("_time").ok_or_else(|| SinkError::Query("row without _time".into()))?;
        let timestamp = DateTime::parse_from_rfc3339(time)
            .map_err(|e| SinkError::Query(format!("_time={time}: {e}")))?
            .with_timezone(&Utc);

        records.push(StoredRecord {
            timestamp,
            region: cell("region").map(str::to_string),
            grid_power: number("grid_power")?,
            spot_price: number("spot_price")?,
            solar_power: number("solar_power")?,
        });
    }

    Ok(records)
}

/// Formats one record as a line-protocol line.
pub fn to_line(record: &PowerRecord) -> String {
    let mut fields = vec![format!("grid_power={}", record.grid_power)];
    if let Some(price) = record.spot_price {
        fields.push(format!("spot_price={price}"));
    }
    if let Some(solar) = record.solar_power {
        fields.push(format!("solar_power={solar}"));
    }

    let mut line = format!("{},region={} {}", MEASUREMENT, record.region, fields.join(","));
    if let Some(nanos) = record.timestamp.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&nanos.to_string());
    }
    line
}

#[async_trait]
impl TimeSeriesSink for InfluxSink {
    async fn write(&self, record: &PowerRecord) -> Result<(), SinkError> {
        let query = [("org", self.org.as_str()), ("bucket", self.bucket.as_str()), ("precision", "ns")];
        let resp = self
            .api
            .post_text("api/v2/write", &query, to_line(record))
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;

        match resp.status {
            200..=299 => Ok(()),
            401 | 403 => Err(SinkError::Auth(resp.error_body.unwrap_or_default())),
            status => Err(SinkError::Write(format!("HTTP {}: {}", status, resp.error_body.unwrap_or_default()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Region;
    use crate::retrieve::test_server::serve_once;
    use chrono::{TimeZone, Utc};

    fn record() -> PowerRecord {
        PowerRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
            region: Region::SE3,
            grid_power: 1580.5,
            spot_price: Some(0.85),
            solar_power: Some(2300.0),
        }
    }

    fn settings(url: String, auth: InfluxAuth) -> InfluxSettings {
        InfluxSettings { url, org: "sotehus".into(), bucket: "sotehus_bucket".into(), auth }
    }

    #[test]
    fn test_line_protocol_full_record() {
        assert_eq!(
            to_line(&record()),
            "power_monitoring,region=SE3 grid_power=1580.5,spot_price=0.85,solar_power=2300 1748772000000000000"
        );
    }

    #[test]
    fn test_line_protocol_omits_absent_fields() {
        let r = PowerRecord { spot_price: None, solar_power: None, ..record() };
        assert_eq!(to_line(&r), "power_monitoring,region=SE3 grid_power=1580.5 1748772000000000000");
    }

    #[tokio::test]
    async fn test_write_posts_line_with_token() {
        let (base, server) = serve_once("204 No Content", "text/plain", "");
        let sink = InfluxSink::new(&settings(base, InfluxAuth::Token("tok".into()))).unwrap();

        sink.write(&record()).await.unwrap();
        let request = server.join().unwrap();

        assert!(request.starts_with("POST /api/v2/write?org=sotehus&bucket=sotehus_bucket&precision=ns "));
        assert!(request.to_ascii_lowercase().contains("authorization: token tok"));
        assert!(request.ends_with("solar_power=2300 1748772000000000000"));
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let (base, server) = serve_once("401 Unauthorized", "application/json", r#"{"code":"unauthorized"}"#);
        let sink = InfluxSink::new(&settings(base, InfluxAuth::Basic { user: "u".into(), password: "p".into() })).unwrap();

        let err = sink.write(&record()).await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, SinkError::Auth(_)));
    }

    #[test]
    fn test_query_csv_across_tables() {
        let body = "\
,result,table,_start,_stop,_time,_measurement,region,grid_power,solar_power,spot_price\r
,_result,0,2025-05-02T00:00:00Z,2025-06-01T12:00:00Z,2025-06-01T10:00:05Z,power_monitoring,SE3,1580.5,2300,0.85\r
,_result,0,2025-05-02T00:00:00Z,2025-06-01T12:00:00Z,2025-06-01T10:00:00Z,power_monitoring,SE3,-200,,\r
\r
#datatype,string,long,dateTime:RFC3339,string,double\r
,result,table,_time,region,grid_power\r
,_result,1,2025-06-01T09:59:55Z,SE4,12\r
";
        let records = parse_query_csv(body).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp, Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 5).unwrap());
        assert_eq!(records[0].region.as_deref(), Some("SE3"));
        assert_eq!(records[0].grid_power, Some(1580.5));
        assert_eq!(records[0].spot_price, Some(0.85));
        assert_eq!(records[0].solar_power, Some(2300.0));
        assert_eq!(records[1].grid_power, Some(-200.0));
        assert_eq!(records[1].spot_price, None);
        assert_eq!(records[1].solar_power, None);
        assert_eq!(records[2].region.as_deref(), Some("SE4"));
        assert_eq!(records[2].spot_price, None);
    }

    #[test]
    fn test_query_csv_rejects_bad_number() {
        let body = ",result,table,_time,grid_power\n,_result,0,2025-06-01T10:00:00Z,lots\n";
        assert!(matches!(parse_query_csv(body), Err(SinkError::Query(_))));
        assert!(parse_query_csv("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_posts_flux_query() {
        let csv = ",result,table,_time,region,grid_power\r\n,_result,0,2025-06-01T10:00:00Z,SE3,1.5\r\n";
        let (base, server) = serve_once("200 OK", "text/csv", csv);
        let sink = InfluxSink::new(&settings(base, InfluxAuth::Token("tok".into()))).unwrap();

        let records = sink.recent(3).await.unwrap();
        let request = server.join().unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].grid_power, Some(1.5));
        assert!(request.starts_with("POST /api/v2/query?org=sotehus "));
        assert!(request.to_ascii_lowercase().contains("content-type: application/vnd.flux"));
        assert!(request.contains(r#"from(bucket: "sotehus_bucket")"#));
        assert!(request.ends_with("|> limit(n: 3)"));
    }

    #[tokio::test]
    async fn test_health_reports_failing_server() {
        let (base, server) = serve_once("503 Service Unavailable", "application/json", r#"{"status":"fail","message":"starting"}"#);
        let sink = InfluxSink::new(&settings(base, InfluxAuth::Token("tok".into()))).unwrap();

        let health = sink.health().await.unwrap();
        server.join().unwrap();
        assert_eq!(health.status, "fail");
        assert_eq!(health.message.as_deref(), Some("starting"));
    }
}
