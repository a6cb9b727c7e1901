use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lib_common::configs::ConfigError;
use lib_common::connections::InfluxSink;
use lib_common::core::{
    Dispatcher, FeatureFlags, Persister, PersisterSettings, PriceCache, SolarScheduler, SystemClock,
};
use lib_common::feeds::{ElprisetClient, SolarEdgeClient};
use lib_common::ingestors::PowerSubscriber;
use lib_common::loggers::init_tracing;
use lib_common::{ObserverRegistry, SharedState};

mod sotehus_logic;
use sotehus_logic::{config, downstream, state};

const SAMPLE_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let (config, file_status) = config::load_config();
    let _log_guard = init_tracing(config.log_dir(), "server_sotehus", config.log_level())?;
    file_status.log();

    let region = config.region()?;
    let token = CancellationToken::new();
    let shared = SharedState::new();
    let registry = Arc::new(ObserverRegistry::new());
    let mut features = FeatureFlags::default();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    // Persistence
    let persister = match config.influx_settings() {
        Ok(settings) => {
            tracing::info!(url = %settings.url, bucket = %settings.bucket, "Persistence enabled");
            let sink = Arc::new(InfluxSink::new(&settings)?);
            features.persistence_enabled = true;
            Some(Arc::new(Persister::new(
                shared.clone(),
                sink,
                PersisterSettings { region, ..Default::default() },
            )))
        }
        Err(e) => {
            feature_off(&e);
            None
        }
    };

    // Power feed
    match config.mqtt_settings() {
        Ok(settings) => {
            let (tx, rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
            let dispatcher = Dispatcher::new(shared.clone(), persister);
            handles.push(tokio::spawn(dispatcher.run(rx, token.child_token())));
            let subscriber = PowerSubscriber::new(settings, shared.clone(), tx);
            handles.push(tokio::spawn(subscriber.run(token.child_token())));
            features.power_enabled = true;
        }
        Err(e) => feature_off(&e),
    }

    // Prices
    let price_feed = Arc::new(ElprisetClient::new(config.spot_price_url())?);
    let price_cache = Arc::new(PriceCache::new(price_feed, shared.clone(), chrono_tz::Europe::Stockholm));
    handles.push(tokio::spawn(price_cache.run(region, config.price_refresh(), token.child_token())));

    // Solar
    let mut scheduler_status = None;
    match config.solar_settings() {
        Ok(settings) => {
            let feed = Arc::new(SolarEdgeClient::new(&settings.base_url, settings.api_key, settings.site_id)?);
            let scheduler = SolarScheduler::new(
                feed,
                shared.clone(),
                registry.watch(),
                settings.location,
                settings.quota,
                Arc::new(SystemClock),
            );
            scheduler_status = Some(scheduler.subscribe_status());
            handles.push(tokio::spawn(scheduler.run(token.child_token())));
            features.solar_enabled = true;
        }
        Err(e) => feature_off(&e),
    }

    shared.set_features(features);
    tracing::info!(
        %region,
        power = features.power_enabled,
        solar = features.solar_enabled,
        persistence = features.persistence_enabled,
        "Sotehus started"
    );

    let mut app_state =
        state::AppState::new(shared.clone(), registry.clone(), region, config.observer_tick(), token.child_token());
    if let Some(status) = scheduler_status {
        app_state = app_state.with_scheduler_status(status);
    }
    let root = token.clone();
    let port = config.port();
    let downstream_handle = tokio::spawn(async move {
        if let Err(e) = downstream::run(port, app_state, root.child_token()).await {
            tracing::error!("Dashboard server failed: {}", e);
            root.cancel();
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            tracing::info!("SIGTERM received, initiating shutdown.");
        }
        _ = token.cancelled() => {
            tracing::warn!("Dashboard server stopped, initiating shutdown.");
        }
    }

    token.cancel();

    handles.push(downstream_handle);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Task ended abnormally: {}", e);
        }
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

fn feature_off(e: &ConfigError) {
    match e {
        ConfigError::Missing { .. } => tracing::info!("{}", e),
        ConfigError::Invalid { .. } => tracing::warn!("Optional feature disabled, {}", e),
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term_signal) => {
            term_signal.recv().await;
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    // On non-unix platforms, just wait forever.
    std::future::pending::<()>().await;
}
