//! # Daylight Window & Daily Plan
//!
//! Computes today's sunrise/sunset for a reference location with the NOAA
//! sunrise equation (good to a couple of minutes at mid latitudes) and turns
//! it into a polling cadence that keeps the solar provider's daily quota safe.
//!
//! When the equation has no solution (polar day or night) or the coordinates
//! are out of range, the plan falls back to a fixed local window 06:00–20:00.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The cadence is never shorter than this, whatever the window and quota.
pub const MIN_INTERVAL_MINUTES: f64 = 5.0;

const FALLBACK_SUNRISE_HOUR: u32 = 6;
const FALLBACK_SUNSET_HOUR: u32 = 20;

/// Reference point the daylight window is computed for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Local time zone of the site.
    pub timezone: Tz,
}

impl Default for Location {
    fn default() -> Self {
        // Malmö
        Self {
            latitude: 55.605,
            longitude: 13.0038,
            timezone: chrono_tz::Europe::Stockholm,
        }
    }
}

/// Provider quota settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaSettings {
    /// Calls per day allowed by the provider.
    pub max_daily_calls: u32,
    /// Fraction of the quota this process may spend (0, 1].
    pub usage_percent: f64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self { max_daily_calls: 300, usage_percent: 0.90 }
    }
}

impl QuotaSettings {
    /// Calls this process allows itself per day.
    pub fn allowed_calls(&self) -> f64 {
        f64::from(self.max_daily_calls) * self.usage_percent.clamp(0.0, 1.0)
    }
}

/// `max(5, daylight_minutes / allowed_calls)`.
///
/// A non-positive quota yields an infinite interval: no regular polling.
pub fn cadence_minutes(daylight_minutes: f64, allowed_calls: f64) -> f64 {
    if allowed_calls <= 0.0 {
        return f64::INFINITY;
    }
    (daylight_minutes / allowed_calls).max(MIN_INTERVAL_MINUTES)
}

/// One day's daylight window and polling cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyPlan {
    /// Local calendar date the plan is for.
    pub date: NaiveDate,
    /// Start of the daylight window.
    pub sunrise: DateTime<Utc>,
    /// End of the daylight window.
    pub sunset: DateTime<Utc>,
    /// Calls budgeted for the day.
    pub allowed_calls: f64,
    /// Minutes between regular polls.
    pub interval_minutes: f64,
    /// `true` when the fixed 06:00–20:00 window was used.
    pub fallback: bool,
}

impl DailyPlan {
    /// Builds the plan for `date` at `location`.
    pub fn compute(date: NaiveDate, location: &Location, quota: &QuotaSettings) -> Self {
        let (sunrise, sunset, fallback) = match sun_times(date, location.latitude, location.longitude) {
            Some((rise, set)) => (rise, set, false),
            None => {
                let (rise, set) = fallback_window(date, location.timezone);
                (rise, set, true)
            }
        };
        let daylight_minutes = (sunset - sunrise).num_seconds() as f64 / 60.0;
        let allowed_calls = quota.allowed_calls();

        Self {
            date,
            sunrise,
            sunset,
            allowed_calls,
            interval_minutes: cadence_minutes(daylight_minutes, allowed_calls),
            fallback,
        }
    }

    /// `true` inside `[sunrise, sunset)`.
    pub fn is_daylight(&self, now: DateTime<Utc>) -> bool {
        self.sunrise <= now && now < self.sunset
    }

    /// Length of the daylight window.
    pub fn daylight_minutes(&self) -> f64 {
        (self.sunset - self.sunrise).num_seconds() as f64 / 60.0
    }

    /// Whole provider calls this process may spend today.
    pub fn daily_call_cap(&self) -> u32 {
        self.allowed_calls.floor() as u32
    }

    /// Poll cadence as a `Duration`, `None` when polling is budgeted out.
    pub fn interval(&self) -> Option<std::time::Duration> {
        if self.interval_minutes.is_finite() {
            Some(std::time::Duration::from_secs_f64(self.interval_minutes * 60.0))
        } else {
            None
        }
    }
}

/// Fixed local 06:00–20:00 window, converted to UTC.
fn fallback_window(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let at = |hour: u32| {
        let naive = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN));
        tz.from_local_datetime(&naive)
            .earliest()
            // A DST gap cannot swallow 06:00 or 20:00 in any real zone; fall back to UTC anyway.
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
    };
    (at(FALLBACK_SUNRISE_HOUR), at(FALLBACK_SUNSET_HOUR))
}

/// Sunrise and sunset in UTC, or `None` when the sun does not cross the horizon.
pub fn sun_times(date: NaiveDate, latitude: f64, longitude: f64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)?;
    let n = (date - epoch).num_days() as f64;

    // Mean solar noon
    let j_star = n - longitude / 360.0;
    // Solar mean anomaly
    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let m_rad = m.to_radians();
    // Equation of the center
    let c = 1.9148 * m_rad.sin() + 0.0200 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();
    // Ecliptic longitude
    let lambda = (m + c + 180.0 + 102.9372).rem_euclid(360.0);
    let lambda_rad = lambda.to_radians();
    // Solar transit (Julian date)
    let j_transit = 2_451_545.0 + j_star + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * lambda_rad).sin();
    // Declination
    let sin_delta = lambda_rad.sin() * 23.4397_f64.to_radians().sin();
    let cos_delta = sin_delta.asin().cos();
    // Hour angle, with refraction and solar disc correction
    let phi = latitude.to_radians();
    let cos_omega = ((-0.833_f64).to_radians().sin() - phi.sin() * sin_delta) / (phi.cos() * cos_delta);
    if !(-1.0..=1.0).contains(&cos_omega) || !cos_omega.is_finite() {
        return None;
    }
    let omega = cos_omega.acos().to_degrees();

    let j_rise = j_transit - omega / 360.0;
    let j_set = j_transit + omega / 360.0;
    Some((julian_to_utc(j_rise)?, julian_to_utc(j_set)?))
}

fn julian_to_utc(julian: f64) -> Option<DateTime<Utc>> {
    let unix_seconds = (julian - 2_440_587.5) * 86_400.0;
    let whole = unix_seconds.floor();
    let nanos = ((unix_seconds - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Start of the next local calendar day after `now`.
pub fn next_local_midnight(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let tomorrow = now.with_timezone(&tz).date_naive() + Duration::days(1);
    let naive = tomorrow.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| now + Duration::hours(24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_cadence_is_clamped_to_five_minutes() {
        assert_eq!(cadence_minutes(1080.0, 270.0), 5.0);
        assert_eq!(cadence_minutes(360.0, 270.0), 5.0);
        assert_eq!(cadence_minutes(2700.0, 270.0), 10.0);
        assert!(cadence_minutes(600.0, 0.0).is_infinite());
    }

    #[test]
    fn test_default_quota_allows_270_calls() {
        assert!((QuotaSettings::default().allowed_calls() - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_malmo_midsummer_and_midwinter() {
        let loc = Location::default();

        let summer = DailyPlan::compute(NaiveDate::from_ymd_opt(2025, 6, 21).unwrap(), &loc, &QuotaSettings::default());
        assert!(!summer.fallback);
        let rise = summer.sunrise.with_timezone(&loc.timezone);
        let set = summer.sunset.with_timezone(&loc.timezone);
        // Malmö: roughly 04:25 and 21:55 local time.
        assert_eq!(rise.hour(), 4);
        assert!(set.hour() == 21 || set.hour() == 22);
        assert!(summer.daylight_minutes() > 1000.0 && summer.daylight_minutes() < 1090.0);
        assert_eq!(summer.interval_minutes, 5.0);

        let winter = DailyPlan::compute(NaiveDate::from_ymd_opt(2025, 12, 21).unwrap(), &loc, &QuotaSettings::default());
        assert!(winter.daylight_minutes() > 380.0 && winter.daylight_minutes() < 450.0);
        assert_eq!(winter.interval_minutes, 5.0);
    }

    #[test]
    fn test_small_quota_stretches_cadence() {
        let loc = Location::default();
        let quota = QuotaSettings { max_daily_calls: 100, usage_percent: 0.5 };
        let plan = DailyPlan::compute(NaiveDate::from_ymd_opt(2025, 3, 20).unwrap(), &loc, &quota);
        // ~12 h of daylight over 50 calls.
        assert!(plan.interval_minutes > 13.0 && plan.interval_minutes < 16.0);
        assert!(plan.interval().is_some());
        assert_eq!(plan.daily_call_cap(), 50);
    }

    #[test]
    fn test_polar_night_uses_fallback_window() {
        let tromso = Location { latitude: 69.65, longitude: 18.96, timezone: chrono_tz::Europe::Oslo };
        let plan = DailyPlan::compute(NaiveDate::from_ymd_opt(2025, 12, 21).unwrap(), &tromso, &QuotaSettings::default());
        assert!(plan.fallback);
        assert_eq!(plan.sunrise.with_timezone(&tromso.timezone).hour(), 6);
        assert_eq!(plan.sunset.with_timezone(&tromso.timezone).hour(), 20);
        assert_eq!(plan.daylight_minutes(), 840.0);
    }

    #[test]
    fn test_invalid_coordinates_use_fallback_window() {
        let bogus = Location { latitude: 123.0, longitude: 0.0, timezone: chrono_tz::Europe::Stockholm };
        let plan = DailyPlan::compute(NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(), &bogus, &QuotaSettings::default());
        assert!(plan.fallback);
    }

    #[test]
    fn test_next_local_midnight() {
        let tz = chrono_tz::Europe::Stockholm;
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 21, 30, 0).unwrap(); // 23:30 local
        let midnight = next_local_midnight(now, tz);
        assert_eq!(midnight, Utc.with_ymd_and_hms(2025, 6, 1, 22, 0, 0).unwrap());
    }
}
