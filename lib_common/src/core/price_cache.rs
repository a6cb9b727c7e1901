//! # Price Cache
//!
//! Serves the day-ahead price interval that contains a given instant.
//!
//! Two levels of memoization keep upstream traffic to one request per region
//! and day:
//! - the currently selected interval per region, returned as the same `Arc`
//!   while it still covers `now`;
//! - the full day series per `(region, local date)`, from which the next
//!   interval is selected when the current one expires.
//!
//! Fetches are serialized through an async mutex so concurrent callers never
//! hit the upstream twice for the same day. This lock is private to the cache
//! and is never the `SharedState` lock.
//!
//! Rejected credentials disable the cache: no further upstream calls are made
//! and the refresher stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::model::{PriceSnapshot, Region};
use crate::core::ports::{FetchError, PriceFeed, PriceInterval};
use crate::core::shared_state::SharedState;

struct DaySeries {
    intervals: Vec<PriceInterval>,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct CacheInner {
    current: HashMap<Region, Arc<PriceSnapshot>>,
    days: HashMap<(Region, NaiveDate), DaySeries>,
}

/// Per-region, per-day memoized price lookup.
pub struct PriceCache {
    feed: Arc<dyn PriceFeed>,
    shared: SharedState,
    timezone: Tz,
    inner: Mutex<CacheInner>,
    auth_rejected: AtomicBool,
}

impl PriceCache {
    /// Creates an empty cache. `timezone` decides which calendar day `now` belongs to.
    pub fn new(feed: Arc<dyn PriceFeed>, shared: SharedState, timezone: Tz) -> Self {
        Self {
            feed,
            shared,
            timezone,
            inner: Mutex::new(CacheInner::default()),
            auth_rejected: AtomicBool::new(false),
        }
    }

    /// `true` once the price feed has rejected the credentials.
    pub fn is_disabled(&self) -> bool {
        self.auth_rejected.load(Ordering::SeqCst)
    }

    /// Price interval for `region` containing `now`.
    ///
    /// On any failure the previously selected interval is returned when one
    /// exists; the error only surfaces when there is nothing to fall back to.
    pub async fn current_price(&self, region: Region, now: DateTime<Utc>) -> Result<Arc<PriceSnapshot>, FetchError> {
        let mut inner = self.inner.lock().await;

        if let Some(cached) = inner.current.get(&region) {
            if cached.covers(now) {
                return Ok(Arc::clone(cached));
            }
        }

        if self.is_disabled() {
            return match inner.current.get(&region) {
                Some(stale) => Ok(Arc::clone(stale)),
                None => Err(FetchError::Auth("price feed disabled".into())),
            };
        }

        match self.select(&mut inner, region, now).await {
            Ok(snapshot) => {
                inner.current.insert(region, Arc::clone(&snapshot));
                self.shared.set_price(snapshot.as_ref().clone());
                tracing::debug!(%region, price = snapshot.sek_per_kwh, start = %snapshot.interval_start, "Price interval selected");
                Ok(snapshot)
            }
            Err(FetchError::Auth(msg)) => {
                self.auth_rejected.store(true, Ordering::SeqCst);
                tracing::error!(%region, error = %msg, "Price feed credentials rejected, price refresh disabled");
                match inner.current.get(&region) {
                    Some(stale) => Ok(Arc::clone(stale)),
                    None => Err(FetchError::Auth(msg)),
                }
            }
            Err(e) => match inner.current.get(&region) {
                Some(stale) => {
                    tracing::warn!(%region, error = %e, "Price refresh failed, keeping previous interval");
                    Ok(Arc::clone(stale))
                }
                None => Err(e),
            },
        }
    }

    async fn select(&self, inner: &mut CacheInner, region: Region, now: DateTime<Utc>) -> Result<Arc<PriceSnapshot>, FetchError> {
        let date = now.with_timezone(&self.timezone).date_naive();
        let key = (region, date);

        if !inner.days.contains_key(&key) {
            tracing::info!(%region, %date, "Fetching day-ahead prices");
            let intervals = self.feed.day_series(date, region).await?;
            inner.days.retain(|(_, day), _| *day == date);
            inner.days.insert(key, DaySeries { intervals, fetched_at: now });
        }

        let found = inner.days.get(&key).and_then(|day| {
            day.intervals
                .iter()
                .find(|i| i.start <= now && now < i.end)
                .map(|i| PriceSnapshot {
                    region,
                    sek_per_kwh: i.sek_per_kwh,
                    eur_per_kwh: i.eur_per_kwh,
                    interval_start: i.start,
                    interval_end: i.end,
                    fetched_at: day.fetched_at,
                })
        });

        match found {
            Some(snapshot) => Ok(Arc::new(snapshot)),
            None => {
                // A series without `now` is incomplete; fetch it again next time.
                inner.days.remove(&key);
                Err(FetchError::NoMatchingInterval(now))
            }
        }
    }

    /// Refreshes `region` every `period` (first refresh immediately) until cancelled.
    pub async fn run(self: Arc<Self>, region: Region, period: Duration, token: CancellationToken) {
        tracing::info!(%region, period_secs = period.as_secs(), "Price refresher started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.current_price(region, Utc::now()).await {
                        Ok(_) => {}
                        Err(FetchError::Auth(_)) => {}
                        Err(e) => tracing::warn!(%region, error = %e, "No spot price available"),
                    }
                    if self.is_disabled() {
                        break;
                    }
                }
            }
        }
        tracing::info!(%region, "Price refresher stopped");
    }
}
