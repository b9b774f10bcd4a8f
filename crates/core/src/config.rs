use std::time::Duration;

use crate::error::CoreError;

/// Default hold and order lifetime: 15 minutes.
pub const DEFAULT_HOLD_TTL_SECS: i64 = 900;

/// Default cap on cumulative hold extension: 15 minutes.
pub const DEFAULT_MAX_HOLD_EXTENSION_SECS: i64 = 900;

/// Default Reclaimer tick.
pub const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 30;

/// Default number of holds expired per sweep batch.
pub const DEFAULT_RECLAIM_BATCH_SIZE: i64 = 500;

/// Upper bound for every configured duration: one year.
pub const MAX_DURATION_SECS: i64 = 31_536_000;

/// Upper bound for the sweep batch size.
pub const MAX_RECLAIM_BATCH_SIZE: i64 = 100_000;

/// Reservation and Reclaimer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConfig {
    /// How long a new hold (and its pending order) lives.
    pub hold_ttl: chrono::Duration,
    /// Total extension any single hold may accumulate.
    pub max_hold_extension: chrono::Duration,
    /// Delay between Reclaimer sweeps.
    pub reclaim_interval: Duration,
    /// Holds expired per batch within one sweep.
    pub reclaim_batch_size: i64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_ttl: chrono::Duration::seconds(DEFAULT_HOLD_TTL_SECS),
            max_hold_extension: chrono::Duration::seconds(DEFAULT_MAX_HOLD_EXTENSION_SECS),
            reclaim_interval: Duration::from_secs(DEFAULT_RECLAIM_INTERVAL_SECS),
            reclaim_batch_size: DEFAULT_RECLAIM_BATCH_SIZE,
        }
    }
}

impl ReservationConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default |
    /// |---------------------------|---------|
    /// | `HOLD_TTL_SECS`           | `900`   |
    /// | `MAX_HOLD_EXTENSION_SECS` | `900`   |
    /// | `RECLAIM_INTERVAL_SECS`   | `30`    |
    /// | `RECLAIM_BATCH_SIZE`      | `500`   |
    ///
    /// Durations are capped at [`MAX_DURATION_SECS`]; out-of-range values
    /// are a [`CoreError::Validation`].
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hold_ttl_secs = parse_bounded(
            &lookup,
            "HOLD_TTL_SECS",
            DEFAULT_HOLD_TTL_SECS,
            1,
            MAX_DURATION_SECS,
        )?;
        let max_extension_secs = parse_bounded(
            &lookup,
            "MAX_HOLD_EXTENSION_SECS",
            DEFAULT_MAX_HOLD_EXTENSION_SECS,
            0,
            MAX_DURATION_SECS,
        )?;
        let interval_secs = parse_bounded(
            &lookup,
            "RECLAIM_INTERVAL_SECS",
            DEFAULT_RECLAIM_INTERVAL_SECS as i64,
            1,
            MAX_DURATION_SECS,
        )?;
        let batch_size = parse_bounded(
            &lookup,
            "RECLAIM_BATCH_SIZE",
            DEFAULT_RECLAIM_BATCH_SIZE,
            1,
            MAX_RECLAIM_BATCH_SIZE,
        )?;

        Ok(Self {
            hold_ttl: seconds("HOLD_TTL_SECS", hold_ttl_secs)?,
            max_hold_extension: seconds("MAX_HOLD_EXTENSION_SECS", max_extension_secs)?,
            reclaim_interval: Duration::from_secs(interval_secs.unsigned_abs()),
            reclaim_batch_size: batch_size,
        })
    }
}

fn seconds(key: &str, secs: i64) -> Result<chrono::Duration, CoreError> {
    chrono::TimeDelta::try_seconds(secs)
        .ok_or_else(|| CoreError::Validation(format!("{key} is out of range, got {secs}")))
}

fn parse_or<F>(lookup: &F, key: &str, default: i64) -> Result<i64, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} must be an integer, got '{raw}'"))),
    }
}

fn parse_bounded<F>(
    lookup: &F,
    key: &str,
    default: i64,
    min: i64,
    max: i64,
) -> Result<i64, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if !(min..=max).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{key} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}
