//! # Adaptive Solar Scheduler
//!
//! Decides when the quota-limited solar feed may be called.
//!
//! ## Modes:
//! - **Dark**: outside the daylight window. Nothing is polled.
//! - **Idle**: daylight, nobody watching. Nothing is polled; the next
//!   observer triggers a catch-up poll.
//! - **Active**: daylight and at least one observer. Polls every
//!   `current_interval_minutes`, starting with one immediate poll.
//! - **Disabled**: the provider rejected the credentials. Permanent.
//!
//! The loop wakes on the next poll, the next daylight boundary, any change of
//! the observer count, or shutdown. Every wait is capped so a wall-clock jump
//! is noticed within minutes. Fetches run in their own task: a slow provider
//! never blocks a mode change, and a tick that finds the previous fetch still
//! running is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::daylight::{next_local_midnight, DailyPlan, Location, QuotaSettings};
use crate::core::model::SolarSnapshot;
use crate::core::ports::{FetchError, SolarFeed};
use crate::core::registry::ObserverCount;
use crate::core::shared_state::SharedState;

/// Longest the loop sleeps without re-reading the clock.
const MAX_WAIT: Duration = Duration::from_secs(600);

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Scheduler operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationMode {
    /// Outside daylight.
    Dark,
    /// Daylight without observers.
    Idle,
    /// Daylight with observers; polling.
    Active,
    /// Credentials rejected.
    Disabled,
}

/// Published view of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerState {
    /// Current mode.
    pub mode: OperationMode,
    /// When the next regular poll fires, while Active.
    pub next_poll_at: Option<DateTime<Utc>>,
    /// Minutes between polls for today.
    pub current_interval_minutes: f64,
    /// Start of today's daylight window.
    pub sunrise: DateTime<Utc>,
    /// End of today's daylight window.
    pub sunset: DateTime<Utc>,
    /// Observers at the last decision.
    pub client_count: usize,
    /// Provider calls issued since local midnight.
    pub polls_today: u32,
    /// Last fetch error, cleared by the next success.
    pub last_error: Option<String>,
}

/// The solar polling loop. Build it, grab `subscribe_status()`, then `run()` it.
pub struct SolarScheduler {
    feed: Arc<dyn SolarFeed>,
    shared: SharedState,
    observers: watch::Receiver<ObserverCount>,
    location: Location,
    quota: QuotaSettings,
    clock: Arc<dyn Clock>,
    status: Arc<watch::Sender<SchedulerState>>,
    auth_failed: Arc<AtomicBool>,
    plan: DailyPlan,
    mode: OperationMode,
    seen_activations: u64,
    next_poll_at: Option<DateTime<Utc>>,
    polls_today: u32,
    in_flight: Option<JoinHandle<()>>,
}

impl SolarScheduler {
    /// Creates a scheduler. Today's plan is computed immediately.
    pub fn new(
        feed: Arc<dyn SolarFeed>,
        shared: SharedState,
        observers: watch::Receiver<ObserverCount>,
        location: Location,
        quota: QuotaSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let plan = DailyPlan::compute(now.with_timezone(&location.timezone).date_naive(), &location, &quota);
        let seen_activations = observers.borrow().activations;
        let (status, _) = watch::channel(SchedulerState {
            mode: OperationMode::Dark,
            next_poll_at: None,
            current_interval_minutes: plan.interval_minutes,
            sunrise: plan.sunrise,
            sunset: plan.sunset,
            client_count: 0,
            polls_today: 0,
            last_error: None,
        });

        Self {
            feed,
            shared,
            observers,
            location,
            quota,
            clock,
            status: Arc::new(status),
            auth_failed: Arc::new(AtomicBool::new(false)),
            plan,
            mode: OperationMode::Dark,
            seen_activations,
            next_poll_at: None,
            polls_today: 0,
            in_flight: None,
        }
    }

    /// Receiver for the published scheduler state.
    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerState> {
        self.status.subscribe()
    }

    /// Runs until `token` is cancelled or the observer registry goes away.
    pub async fn run(mut self, token: CancellationToken) {
        tracing::info!(
            sunrise = %self.plan.sunrise,
            sunset = %self.plan.sunset,
            interval_minutes = self.plan.interval_minutes,
            "Solar scheduler started"
        );

        loop {
            let now = self.clock.now();
            let wait = self.step(now);

            tokio::select! {
                _ = token.cancelled() => break,
                changed = self.observers.changed() => {
                    if changed.is_err() {
                        tracing::info!("Observer registry dropped, stopping solar scheduler");
                        break;
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        // A fetch in flight finishes on its own; its result is still applied.
        tracing::info!("Solar scheduler stopped");
    }

    /// One decision at `now`. Returns how long to sleep before the next one.
    fn step(&mut self, now: DateTime<Utc>) -> Duration {
        self.refresh_plan(now);

        let count = *self.observers.borrow_and_update();
        let epoch_moved = count.activations != self.seen_activations;
        self.seen_activations = count.activations;

        let mode = self.decide(now, count.clients);
        let previous = self.mode;
        if mode != previous {
            match mode {
                OperationMode::Disabled => {
                    tracing::error!("Solar feed credentials rejected, solar polling disabled");
                }
                _ => tracing::info!(from = ?previous, to = ?mode, clients = count.clients, "Solar scheduler mode change"),
            }
            self.mode = mode;
        }

        match mode {
            OperationMode::Active => match self.plan.interval() {
                Some(interval) => {
                    let entering = previous != OperationMode::Active || epoch_moved;
                    let due = self.next_poll_at.map_or(true, |at| at <= now);
                    if entering || due {
                        self.poll(now);
                        self.next_poll_at = Some(now + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::minutes(5)));
                    }
                }
                None => self.next_poll_at = None,
            },
            OperationMode::Dark | OperationMode::Idle | OperationMode::Disabled => {
                self.next_poll_at = None;
            }
        }

        self.publish(count.clients);
        self.wait_after(now)
    }

    fn decide(&self, now: DateTime<Utc>, clients: usize) -> OperationMode {
        if self.auth_failed.load(Ordering::SeqCst) {
            OperationMode::Disabled
        } else if !self.plan.is_daylight(now) {
            OperationMode::Dark
        } else if clients == 0 {
            OperationMode::Idle
        } else {
            OperationMode::Active
        }
    }

    fn refresh_plan(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&self.location.timezone).date_naive();
        if today == self.plan.date {
            return;
        }
        self.plan = DailyPlan::compute(today, &self.location, &self.quota);
        self.polls_today = 0;
        if self.plan.fallback {
            tracing::warn!(date = %today, "Sunrise equation has no solution, using fixed daylight window");
        }
        tracing::info!(
            date = %today,
            sunrise = %self.plan.sunrise,
            sunset = %self.plan.sunset,
            interval_minutes = self.plan.interval_minutes,
            "Daily solar plan recomputed"
        );
    }

    fn wait_after(&self, now: DateTime<Utc>) -> Duration {
        let target = match self.mode {
            OperationMode::Active => match self.next_poll_at {
                Some(at) => at.min(self.plan.sunset),
                None => self.plan.sunset,
            },
            OperationMode::Idle => self.plan.sunset,
            OperationMode::Dark if now < self.plan.sunrise => self.plan.sunrise,
            OperationMode::Dark => next_local_midnight(now, self.location.timezone),
            OperationMode::Disabled => return MAX_WAIT,
        };
        (target - now).to_std().unwrap_or(Duration::ZERO).min(MAX_WAIT)
    }

    fn poll(&mut self, now: DateTime<Utc>) {
        if self.in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            tracing::debug!("Previous solar fetch still running, tick skipped");
            return;
        }
        if self.polls_today >= self.plan.daily_call_cap() {
            tracing::warn!(polls_today = self.polls_today, "Daily solar quota spent, tick skipped");
            return;
        }
        self.polls_today += 1;
        tracing::debug!(at = %now, polls_today = self.polls_today, "Polling solar feed");

        let feed = Arc::clone(&self.feed);
        let shared = self.shared.clone();
        let status = Arc::clone(&self.status);
        let auth_failed = Arc::clone(&self.auth_failed);
        let clock = Arc::clone(&self.clock);

        self.in_flight = Some(tokio::spawn(async move {
            match feed.current_production().await {
                Ok(reading) => {
                    shared.set_solar(SolarSnapshot {
                        watts: reading.watts,
                        status: reading.status,
                        fetched_at: Some(clock.now()),
                    });
                    status.send_modify(|s| s.last_error = None);
                }
                Err(FetchError::Auth(msg)) => {
                    auth_failed.store(true, Ordering::SeqCst);
                    status.send_modify(|s| s.last_error = Some(format!("authentication rejected: {msg}")));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Solar fetch failed, keeping last reading");
                    status.send_modify(|s| s.last_error = Some(e.to_string()));
                }
            }
        }));
    }

    fn publish(&self, clients: usize) {
        self.status.send_modify(|s| {
            s.mode = self.mode;
            s.next_poll_at = self.next_poll_at;
            s.current_interval_minutes = self.plan.interval_minutes;
            s.sunrise = self.plan.sunrise;
            s.sunset = self.plan.sunset;
            s.client_count = clients;
            s.polls_today = self.polls_today;
        });
    }
}
