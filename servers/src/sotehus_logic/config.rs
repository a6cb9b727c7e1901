use clap::Parser;
use lib_common::configs::{ConfigError, InfluxSettings, MqttSettings, SolarSettings};
use lib_common::core::Region;
use lib_common::feeds::{solaredge, spotprice};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Sotehus power monitor: live grid power, spot price and solar production", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SOTEHUS_PORT", help = "Port the dashboard listens on.")]
    pub port: Option<u16>,

    #[clap(long, env = "SOTEHUS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SOTEHUS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SOTEHUS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SPOT_PRICE_REGION", help = "Price region, SE1..SE4.")]
    pub spot_price_region: Option<String>,

    #[clap(long, env = "SPOT_PRICE_URL", help = "Base URL of the day-ahead price API.")]
    pub spot_price_url: Option<String>,

    #[clap(long, env = "PRICE_REFRESH_SECONDS", help = "Seconds between price refreshes.")]
    pub price_refresh_seconds: Option<u64>,

    #[clap(long, env = "MQTT_BROKER_HOST", help = "MQTT broker host. Unset disables the power feed.")]
    pub mqtt_broker_host: Option<String>,

    #[clap(long, env = "MQTT_BROKER_PORT", help = "MQTT broker port.")]
    pub mqtt_broker_port: Option<u16>,

    #[clap(long, env = "MQTT_USERNAME", help = "MQTT user name.")]
    pub mqtt_username: Option<String>,

    #[clap(long, env = "MQTT_PASSWORD", hide_env_values = true, help = "MQTT password.")]
    #[serde(skip_serializing)]
    pub mqtt_password: Option<String>,

    #[clap(long, env = "MQTT_TOPIC", help = "Topic carrying the grid power readings.")]
    pub mqtt_topic: Option<String>,

    #[clap(long, env = "MQTT_CLIENT_ID", help = "MQTT client id.")]
    pub mqtt_client_id: Option<String>,

    #[clap(long, env = "SOLAREDGE_API_KEY", hide_env_values = true, help = "SolarEdge API key. Unset disables solar.")]
    #[serde(skip_serializing)]
    pub solaredge_api_key: Option<String>,

    #[clap(long, env = "SOLAREDGE_SITE_ID", help = "SolarEdge site id.")]
    pub solaredge_site_id: Option<String>,

    #[clap(long, env = "SOLAREDGE_URL", help = "SolarEdge monitoring API base URL.")]
    pub solaredge_url: Option<String>,

    #[clap(long, env = "SOLAR_MAX_DAILY_CALLS", help = "SolarEdge daily call quota.")]
    pub solar_max_daily_calls: Option<u32>,

    #[clap(long, env = "SOLAR_USAGE_PERCENT", help = "Share of the daily quota to use, (0, 1].")]
    pub solar_usage_percent: Option<f64>,

    #[clap(long, env = "SITE_LATITUDE", help = "Site latitude for the daylight window.")]
    pub site_latitude: Option<f64>,

    #[clap(long, env = "SITE_LONGITUDE", help = "Site longitude for the daylight window.")]
    pub site_longitude: Option<f64>,

    #[clap(long, env = "INFLUXDB2_HOST", help = "InfluxDB 2 host. Unset disables persistence.")]
    pub influxdb2_host: Option<String>,

    #[clap(long, env = "INFLUXDB2_PORT", help = "InfluxDB 2 port.")]
    pub influxdb2_port: Option<u16>,

    #[clap(long, env = "INFLUXDB2_USER", help = "InfluxDB 2 user.")]
    pub influxdb2_user: Option<String>,

    #[clap(long, env = "INFLUXDB2_PASSWORD", hide_env_values = true, help = "InfluxDB 2 password.")]
    #[serde(skip_serializing)]
    pub influxdb2_password: Option<String>,

    #[clap(long, env = "INFLUXDB2_TOKEN", hide_env_values = true, help = "InfluxDB 2 API token.")]
    #[serde(skip_serializing)]
    pub influxdb2_token: Option<String>,

    #[clap(long, env = "INFLUXDB2_ORG", help = "InfluxDB 2 organization.")]
    pub influxdb2_org: Option<String>,

    #[clap(long, env = "INFLUXDB2_BUCKET", help = "InfluxDB 2 bucket.")]
    pub influxdb2_bucket: Option<String>,

    #[clap(long, env = "OBSERVER_TICK_SECONDS", help = "Seconds between dashboard frames.")]
    pub observer_tick_seconds: Option<u64>,
}

/// What happened to the config file. Reported once logging is up.
#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Loaded(PathBuf),
    NotFound(PathBuf),
    Invalid(PathBuf, String),
}

impl FileStatus {
    pub fn log(&self) {
        match self {
            FileStatus::Loaded(path) => tracing::info!("Loaded config file {}", path.display()),
            FileStatus::NotFound(path) => tracing::info!(
                "Config file not found at {}. Using defaults and environment/CLI variables.",
                path.display()
            ),
            FileStatus::Invalid(path, e) => {
                tracing::warn!("Failed to load config file {}: {}. Falling back to other sources.", path.display(), e)
            }
        }
    }
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            spot_price_region: other.spot_price_region.or(self.spot_price_region),
            spot_price_url: other.spot_price_url.or(self.spot_price_url),
            price_refresh_seconds: other.price_refresh_seconds.or(self.price_refresh_seconds),
            mqtt_broker_host: other.mqtt_broker_host.or(self.mqtt_broker_host),
            mqtt_broker_port: other.mqtt_broker_port.or(self.mqtt_broker_port),
            mqtt_username: other.mqtt_username.or(self.mqtt_username),
            mqtt_password: other.mqtt_password.or(self.mqtt_password),
            mqtt_topic: other.mqtt_topic.or(self.mqtt_topic),
            mqtt_client_id: other.mqtt_client_id.or(self.mqtt_client_id),
            solaredge_api_key: other.solaredge_api_key.or(self.solaredge_api_key),
            solaredge_site_id: other.solaredge_site_id.or(self.solaredge_site_id),
            solaredge_url: other.solaredge_url.or(self.solaredge_url),
            solar_max_daily_calls: other.solar_max_daily_calls.or(self.solar_max_daily_calls),
            solar_usage_percent: other.solar_usage_percent.or(self.solar_usage_percent),
            site_latitude: other.site_latitude.or(self.site_latitude),
            site_longitude: other.site_longitude.or(self.site_longitude),
            influxdb2_host: other.influxdb2_host.or(self.influxdb2_host),
            influxdb2_port: other.influxdb2_port.or(self.influxdb2_port),
            influxdb2_user: other.influxdb2_user.or(self.influxdb2_user),
            influxdb2_password: other.influxdb2_password.or(self.influxdb2_password),
            influxdb2_token: other.influxdb2_token.or(self.influxdb2_token),
            influxdb2_org: other.influxdb2_org.or(self.influxdb2_org),
            influxdb2_bucket: other.influxdb2_bucket.or(self.influxdb2_bucket),
            observer_tick_seconds: other.observer_tick_seconds.or(self.observer_tick_seconds),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            spot_price_region: Some("SE4".to_string()),
            spot_price_url: Some(spotprice::DEFAULT_BASE_URL.to_string()),
            price_refresh_seconds: Some(60),
            mqtt_broker_port: Some(1883),
            solaredge_url: Some(solaredge::DEFAULT_BASE_URL.to_string()),
            influxdb2_port: Some(8086),
            influxdb2_org: Some("sotehus".to_string()),
            influxdb2_bucket: Some("sotehus_bucket".to_string()),
            observer_tick_seconds: Some(3),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(Path::new("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn region(&self) -> anyhow::Result<Region> {
        self.spot_price_region
            .as_deref()
            .unwrap_or("SE4")
            .parse::<Region>()
            .map_err(anyhow::Error::msg)
    }

    pub fn spot_price_url(&self) -> &str {
        self.spot_price_url.as_deref().unwrap_or(spotprice::DEFAULT_BASE_URL)
    }

    pub fn price_refresh(&self) -> Duration {
        Duration::from_secs(self.price_refresh_seconds.unwrap_or(60).max(1))
    }

    pub fn observer_tick(&self) -> Duration {
        Duration::from_secs(self.observer_tick_seconds.unwrap_or(3).max(1))
    }

    pub fn mqtt_settings(&self) -> Result<MqttSettings, ConfigError> {
        MqttSettings::resolve(
            self.mqtt_broker_host.clone(),
            self.mqtt_broker_port,
            self.mqtt_username.clone(),
            self.mqtt_password.clone(),
            self.mqtt_topic.clone(),
            self.mqtt_client_id.clone(),
        )
    }

    pub fn solar_settings(&self) -> Result<SolarSettings, ConfigError> {
        SolarSettings::resolve(
            self.solaredge_api_key.clone(),
            self.solaredge_site_id.clone(),
            self.solaredge_url.clone(),
            self.solar_max_daily_calls,
            self.solar_usage_percent,
            self.site_latitude,
            self.site_longitude,
            solaredge::DEFAULT_BASE_URL,
        )
    }

    pub fn influx_settings(&self) -> Result<InfluxSettings, ConfigError> {
        InfluxSettings::resolve(
            self.influxdb2_host.clone(),
            self.influxdb2_port,
            self.influxdb2_token.clone(),
            self.influxdb2_user.clone(),
            self.influxdb2_password.clone(),
            self.influxdb2_org.clone(),
            self.influxdb2_bucket.clone(),
        )
    }
}

/// Defaults < config file < environment/CLI.
pub fn resolve(cli: Config) -> (Config, FileStatus) {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_sotehus.conf"));

    let mut current_config = Config::defaults();

    let status = if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => {
                    current_config = current_config.merge(file_config);
                    FileStatus::Loaded(config_file_path)
                }
                Err(e) => FileStatus::Invalid(config_file_path, e.to_string()),
            },
            Err(e) => FileStatus::Invalid(config_file_path, e.to_string()),
        }
    } else {
        FileStatus::NotFound(config_file_path)
    };

    (current_config.merge(cli), status)
}

pub fn load_config() -> (Config, FileStatus) {
    // clap::Parser handles both env vars and CLI args.
    resolve(Config::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let cli = Config { config_path: Some(PathBuf::from("/nonexistent/sotehus.conf")), ..Default::default() };
        let (config, status) = resolve(cli);

        assert!(matches!(status, FileStatus::NotFound(_)));
        assert_eq!(config.port(), 8080);
        assert_eq!(config.region().unwrap(), Region::SE4);
        assert_eq!(config.observer_tick(), Duration::from_secs(3));
        assert!(config.mqtt_settings().is_err());
        assert!(config.solar_settings().is_err());
        assert!(config.influx_settings().is_err());
    }

    #[test]
    fn test_file_is_overridden_by_cli() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 9000, "spotPriceRegion": "SE3", "mqttBrokerHost": "broker", "mqttTopic": "meter/power"}}"#)
            .unwrap();

        let cli = Config { config_path: Some(file.path().to_path_buf()), port: Some(9100), ..Default::default() };
        let (config, status) = resolve(cli);

        assert!(matches!(status, FileStatus::Loaded(_)));
        assert_eq!(config.port(), 9100);
        assert_eq!(config.region().unwrap(), Region::SE3);
        let mqtt = config.mqtt_settings().unwrap();
        assert_eq!(mqtt.host, "broker");
        assert_eq!(mqtt.port, 1883);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let cli = Config { config_path: Some(file.path().to_path_buf()), ..Default::default() };
        let (config, status) = resolve(cli);

        assert!(matches!(status, FileStatus::Invalid(_, _)));
        assert_eq!(config.port(), 8080);
    }

    #[test]
    fn test_bad_region_is_an_error() {
        let config = Config { spot_price_region: Some("NO1".into()), ..Default::default() };
        assert!(config.region().is_err());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let config = Config { influxdb2_token: Some("secret".into()), ..Default::default() };
        assert!(!serde_json::to_string(&config).unwrap().contains("secret"));
    }
}
