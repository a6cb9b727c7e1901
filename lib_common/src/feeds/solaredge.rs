//! Current PV production from the SolarEdge monitoring API.
//!
//! Every call counts against the site's daily quota, so the client never
//! retries on its own; the scheduler decides when to try again.

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::model::SolarStatus;
use crate::core::ports::{FetchError, SolarFeed, SolarReading};
use crate::retrieve::ky_http::{ApiClient, HttpError, DEFAULT_TIMEOUT};

/// Public monitoring endpoint.
pub const DEFAULT_BASE_URL: &str = "https://monitoringapi.solaredge.com/";

#[derive(Debug, Deserialize)]
struct PowerFlowEnvelope {
    #[serde(rename = "siteCurrentPowerFlow")]
    flow: PowerFlow,
}

#[derive(Debug, Deserialize)]
struct PowerFlow {
    unit: Option<String>,
    #[serde(rename = "PV")]
    pv: Option<PvNode>,
}

#[derive(Debug, Deserialize)]
struct PvNode {
    status: Option<String>,
    #[serde(rename = "currentPower")]
    current_power: Option<f64>,
}

/// SolarEdge site client.
pub struct SolarEdgeClient {
    api: ApiClient,
    api_key: String,
    site_id: String,
}

impl SolarEdgeClient {
    /// Client for one site. No retries.
    pub fn new(base_url: &str, api_key: impl Into<String>, site_id: impl Into<String>) -> Result<Self, HttpError> {
        let base = if base_url.ends_with('/') { base_url.to_string() } else { format!("{base_url}/") };
        Ok(Self {
            api: ApiClient::with_options(&base, 0, DEFAULT_TIMEOUT)?,
            api_key: api_key.into(),
            site_id: site_id.into(),
        })
    }
}

fn unit_factor(unit: Option<&str>) -> Result<f64, FetchError> {
    match unit.map(str::trim) {
        None | Some("W") => Ok(1.0),
        Some("kW") => Ok(1_000.0),
        Some("MW") => Ok(1_000_000.0),
        Some(other) => Err(FetchError::Parse(format!("unknown power unit '{other}'"))),
    }
}

fn into_reading(envelope: PowerFlowEnvelope) -> Result<SolarReading, FetchError> {
    let factor = unit_factor(envelope.flow.unit.as_deref())?;
    let Some(pv) = envelope.flow.pv else {
        // The PV node is omitted while the inverter sleeps.
        return Ok(SolarReading { watts: 0.0, status: SolarStatus::Idle });
    };

    let watts = pv.current_power.unwrap_or(0.0) * factor;
    if !watts.is_finite() {
        return Err(FetchError::Parse("non-finite PV power".into()));
    }
    let active = pv.status.as_deref().map_or(true, |s| s.eq_ignore_ascii_case("active"));
    let status = if active && watts > 0.0 { SolarStatus::Producing } else { SolarStatus::Idle };
    Ok(SolarReading { watts, status })
}

#[async_trait]
impl SolarFeed for SolarEdgeClient {
    async fn current_production(&self) -> Result<SolarReading, FetchError> {
        let path = format!("site/{}/currentPowerFlow", self.site_id);
        let resp = self
            .api
            .get_json::<PowerFlowEnvelope>(&path, &[("api_key", self.api_key.as_str())])
            .await?;

        match (resp.success, resp.status, resp.data) {
            (true, _, Some(envelope)) => into_reading(envelope),
            (_, 401 | 403, _) => Err(FetchError::Auth(format!("HTTP {}", resp.status))),
            (_, status, _) => Err(FetchError::Transient(format!("HTTP {status}"))),
        }
    }
}
