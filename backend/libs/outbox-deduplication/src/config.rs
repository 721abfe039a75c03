//! Retention settings for outbox deduplication data
//!
//! Both settings are optional. Missing values fall back to the defaults
//! below; values that are present but malformed are rejected so the cleaner
//! never starts with a policy nobody asked for.
//!
//! Durations use timespan notation: `[d.]hh:mm[:ss[.fffffff]]`, or a bare
//! integer meaning whole days.
//!
//! ```ignore
//! use outbox_deduplication::{CleanupSettings, RetentionPolicy};
//!
//! let settings = CleanupSettings::new(Some("2.00:00:00"), Some("00:00:30"));
//! let policy = RetentionPolicy::resolve(&settings)?;
//! assert_eq!(policy.time_to_keep_deduplication_data.as_secs(), 2 * 86400);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env::VarError;
use std::time::Duration;

use crate::error::{OutboxError, OutboxResult};

/// Env var holding the minimum age of a dispatched record before it may be deleted
pub const TIME_TO_KEEP_DEDUPLICATION_DATA_KEY: &str = "OUTBOX_TIME_TO_KEEP_DEDUPLICATION_DATA";

/// Env var holding the nominal (and maximum) interval between cleanups
pub const FREQUENCY_TO_RUN_CLEANUP_KEY: &str =
    "OUTBOX_FREQUENCY_TO_RUN_DEDUPLICATION_DATA_CLEANUP";

/// Default retention: 7 days
pub const DEFAULT_TIME_TO_KEEP_DEDUPLICATION_DATA: Duration = Duration::from_secs(7 * 86400);

/// Default cadence: 1 minute
pub const DEFAULT_FREQUENCY_TO_RUN_CLEANUP: Duration = Duration::from_secs(60);

const SECONDS_PER_DAY: u64 = 86400;
const MAX_FRACTION_DIGITS: usize = 7;

/// Raw, unvalidated cleanup settings as supplied by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupSettings {
    /// Minimum age before a record is eligible for deletion
    pub time_to_keep_deduplication_data: Option<String>,

    /// Nominal cleanup cadence, also the slowest the cleaner will poll
    pub frequency_to_run_cleanup: Option<String>,
}

impl CleanupSettings {
    pub fn new(retention: Option<&str>, frequency: Option<&str>) -> Self {
        Self {
            time_to_keep_deduplication_data: retention.map(str::to_string),
            frequency_to_run_cleanup: frequency.map(str::to_string),
        }
    }

    /// Read both settings from the process environment
    ///
    /// A variable that is set but not valid unicode is kept (lossily) so
    /// that resolving it fails on its key instead of falling back to the
    /// default.
    pub fn from_env() -> Self {
        Self {
            time_to_keep_deduplication_data: read_env(TIME_TO_KEEP_DEDUPLICATION_DATA_KEY),
            frequency_to_run_cleanup: read_env(FREQUENCY_TO_RUN_CLEANUP_KEY),
        }
    }
}

fn read_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(raw)) => Some(raw.to_string_lossy().into_owned()),
    }
}

/// Validated retention policy, immutable once resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Minimum age of a dispatched record before it may be deleted
    pub time_to_keep_deduplication_data: Duration,

    /// Nominal cleanup cadence and upper bound for the adaptive delay
    pub frequency_to_run_cleanup: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            time_to_keep_deduplication_data: DEFAULT_TIME_TO_KEEP_DEDUPLICATION_DATA,
            frequency_to_run_cleanup: DEFAULT_FREQUENCY_TO_RUN_CLEANUP,
        }
    }
}

impl RetentionPolicy {
    /// Validate raw settings, applying defaults for absent values
    ///
    /// # Errors
    ///
    /// Returns `OutboxError::InvalidSetting` naming the offending key when a
    /// value is present but not a valid duration, or when the cadence is zero.
    pub fn resolve(settings: &CleanupSettings) -> OutboxResult<Self> {
        let time_to_keep_deduplication_data = resolve_setting(
            TIME_TO_KEEP_DEDUPLICATION_DATA_KEY,
            settings.time_to_keep_deduplication_data.as_deref(),
            DEFAULT_TIME_TO_KEEP_DEDUPLICATION_DATA,
        )?;

        let frequency_to_run_cleanup = resolve_setting(
            FREQUENCY_TO_RUN_CLEANUP_KEY,
            settings.frequency_to_run_cleanup.as_deref(),
            DEFAULT_FREQUENCY_TO_RUN_CLEANUP,
        )?;

        if frequency_to_run_cleanup.is_zero() {
            return Err(OutboxError::InvalidSetting {
                key: FREQUENCY_TO_RUN_CLEANUP_KEY,
                value: settings.frequency_to_run_cleanup.clone().unwrap_or_default(),
                reason: "cleanup frequency must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            time_to_keep_deduplication_data,
            frequency_to_run_cleanup,
        })
    }

    /// Oldest `dispatched_at` that survives a cleanup run at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.time_to_keep_deduplication_data)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn resolve_setting(key: &'static str, raw: Option<&str>, default: Duration) -> OutboxResult<Duration> {
    match raw {
        None => Ok(default),
        Some(value) => parse_timespan(value).map_err(|reason| OutboxError::InvalidSetting {
            key,
            value: value.to_string(),
            reason,
        }),
    }
}

/// Parse `[d.]hh:mm[:ss[.fffffff]]` or a bare day count
pub fn parse_timespan(input: &str) -> Result<Duration, String> {
    let value = input.trim();
    if value.is_empty() {
        return Err("duration is empty".to_string());
    }
    if value.starts_with('-') {
        return Err("negative durations are not allowed".to_string());
    }

    let Some(colon) = value.find(':') else {
        let days = parse_component(value, "days")?;
        return days
            .checked_mul(SECONDS_PER_DAY)
            .map(Duration::from_secs)
            .ok_or_else(|| "duration is too large".to_string());
    };

    // A '.' before the first ':' separates days from hours
    let (days, clock) = match value[..colon].find('.') {
        Some(dot) => (parse_component(&value[..dot], "days")?, &value[dot + 1..]),
        None => (0, value),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err("expected [d.]hh:mm[:ss[.fffffff]]".to_string());
    }

    let hours = parse_bounded(parts[0], "hours", 24)?;
    let minutes = parse_bounded(parts[1], "minutes", 60)?;
    let (seconds, nanos) = match parts.get(2) {
        Some(seconds) => match seconds.split_once('.') {
            Some((whole, fraction)) => (
                parse_bounded(whole, "seconds", 60)?,
                parse_fraction(fraction)?,
            ),
            None => (parse_bounded(seconds, "seconds", 60)?, 0),
        },
        None => (0, 0),
    };

    let total_secs = days
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|secs| secs.checked_add(hours * 3600 + minutes * 60 + seconds))
        .ok_or_else(|| "duration is too large".to_string())?;

    Ok(Duration::new(total_secs, nanos))
}

fn parse_component(raw: &str, name: &str) -> Result<u64, String> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{} component {:?} is not a number", name, raw));
    }
    raw.parse()
        .map_err(|_| format!("{} component {:?} is out of range", name, raw))
}

fn parse_bounded(raw: &str, name: &str, limit: u64) -> Result<u64, String> {
    let value = parse_component(raw, name)?;
    if value >= limit {
        return Err(format!("{} must be less than {}, got {}", name, limit, value));
    }
    Ok(value)
}

fn parse_fraction(raw: &str) -> Result<u32, String> {
    if raw.is_empty() || raw.len() > MAX_FRACTION_DIGITS || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("fractional seconds {:?} must be 1 to 7 digits", raw));
    }
    // Right-pad to nanosecond precision: "5" -> 500_000_000
    let padded = format!("{:0<9}", raw);
    padded
        .parse()
        .map_err(|_| format!("fractional seconds {:?} are invalid", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn clear_env() {
        env::remove_var(TIME_TO_KEEP_DEDUPLICATION_DATA_KEY);
        env::remove_var(FREQUENCY_TO_RUN_CLEANUP_KEY);
    }

    // Single test so the shared process environment is not mutated concurrently
    #[test]
    fn test_from_env() {
        clear_env();

        // Absent: defaults apply
        let settings = CleanupSettings::from_env();
        assert_eq!(settings, CleanupSettings::default());
        assert_eq!(
            RetentionPolicy::resolve(&settings).unwrap(),
            RetentionPolicy::default()
        );

        // Valid values reach the resolver
        env::set_var(TIME_TO_KEEP_DEDUPLICATION_DATA_KEY, "2.00:00:00");
        env::set_var(FREQUENCY_TO_RUN_CLEANUP_KEY, "00:00:30");
        let policy = RetentionPolicy::resolve(&CleanupSettings::from_env()).unwrap();
        assert_eq!(
            policy.time_to_keep_deduplication_data,
            Duration::from_secs(2 * 86400)
        );
        assert_eq!(policy.frequency_to_run_cleanup, Duration::from_secs(30));

        // Malformed retention names its key
        env::set_var(TIME_TO_KEEP_DEDUPLICATION_DATA_KEY, "forever");
        match RetentionPolicy::resolve(&CleanupSettings::from_env()).unwrap_err() {
            OutboxError::InvalidSetting { key, value, .. } => {
                assert_eq!(key, TIME_TO_KEEP_DEDUPLICATION_DATA_KEY);
                assert_eq!(value, "forever");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        env::remove_var(TIME_TO_KEEP_DEDUPLICATION_DATA_KEY);

        // Malformed frequency names its key
        env::set_var(FREQUENCY_TO_RUN_CLEANUP_KEY, "hourly");
        assert!(matches!(
            RetentionPolicy::resolve(&CleanupSettings::from_env()).unwrap_err(),
            OutboxError::InvalidSetting { key: FREQUENCY_TO_RUN_CLEANUP_KEY, .. }
        ));

        // Set but not unicode is malformed, not absent
        #[cfg(unix)]
        {
            use std::ffi::OsStr;
            use std::os::unix::ffi::OsStrExt;

            env::set_var(
                FREQUENCY_TO_RUN_CLEANUP_KEY,
                OsStr::from_bytes(b"00:00:\xff5"),
            );
            let settings = CleanupSettings::from_env();
            assert!(settings.frequency_to_run_cleanup.is_some());
            assert!(matches!(
                RetentionPolicy::resolve(&settings).unwrap_err(),
                OutboxError::InvalidSetting { key: FREQUENCY_TO_RUN_CLEANUP_KEY, .. }
            ));
        }

        clear_env();
    }

    #[test]
    fn test_defaults_when_absent() {
        let policy = RetentionPolicy::resolve(&CleanupSettings::default()).unwrap();

        assert_eq!(policy, RetentionPolicy::default());
        assert_eq!(
            policy.time_to_keep_deduplication_data,
            Duration::from_secs(7 * 86400)
        );
        assert_eq!(policy.frequency_to_run_cleanup, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_timespan_forms() {
        assert_eq!(parse_timespan("7").unwrap(), Duration::from_secs(7 * 86400));
        assert_eq!(parse_timespan("00:01:00").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_timespan("01:30").unwrap(), Duration::from_secs(5400));
        assert_eq!(
            parse_timespan("2.03:04:05").unwrap(),
            Duration::from_secs(2 * 86400 + 3 * 3600 + 4 * 60 + 5)
        );
        assert_eq!(
            parse_timespan("00:00:00.5").unwrap(),
            Duration::from_millis(500)
        );
        assert_eq!(
            parse_timespan(" 1.00:00:00.250 ").unwrap(),
            Duration::from_millis(86_400_250)
        );
    }

    #[test]
    fn test_parse_timespan_rejects_garbage() {
        for bad in [
            "", "abc", "-1", "-00:01:00", "24:00:00", "00:60:00", "00:00:60", "1:2:3:4",
            "00:00:00.12345678", "+5", "1.2", "00:00:00.", "1..00:00:00",
        ] {
            assert!(parse_timespan(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_malformed_retention_names_key() {
        let settings = CleanupSettings::new(Some("a week"), None);
        let err = RetentionPolicy::resolve(&settings).unwrap_err();

        match err {
            OutboxError::InvalidSetting { key, value, .. } => {
                assert_eq!(key, TIME_TO_KEEP_DEDUPLICATION_DATA_KEY);
                assert_eq!(value, "a week");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frequency_names_key() {
        let settings = CleanupSettings::new(None, Some("soon"));
        let err = RetentionPolicy::resolve(&settings).unwrap_err();

        assert!(matches!(
            err,
            OutboxError::InvalidSetting { key: FREQUENCY_TO_RUN_CLEANUP_KEY, .. }
        ));
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let settings = CleanupSettings::new(None, Some("00:00:00"));
        assert!(RetentionPolicy::resolve(&settings).unwrap_err().is_config());
    }

    #[test]
    fn test_cutoff() {
        let policy = RetentionPolicy::resolve(&CleanupSettings::new(Some("1"), None)).unwrap();
        let now = Utc::now();

        assert_eq!(policy.cutoff(now), now - chrono::Duration::days(1));
    }

    #[test]
    fn test_cutoff_saturates_for_huge_retention() {
        let policy = RetentionPolicy {
            time_to_keep_deduplication_data: Duration::from_secs(u64::MAX),
            frequency_to_run_cleanup: DEFAULT_FREQUENCY_TO_RUN_CLEANUP,
        };

        assert_eq!(policy.cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
    }
}
