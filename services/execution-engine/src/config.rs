//! Execution engine configuration

use common::constants::{MILLIS_PER_SEC, SECS_PER_HOUR};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fill pass interval (milliseconds)
    pub fill_interval_ms: u64,

    /// Status sweep interval (milliseconds)
    pub status_sweep_interval_ms: u64,

    /// Cleanup sweep interval (milliseconds)
    pub cleanup_interval_ms: u64,

    /// How long terminal orders are retained (seconds)
    pub terminal_retention_secs: u64,

    /// Hard timeout on every gateway call (milliseconds)
    pub gateway_timeout_ms: u64,

    /// Venue hop added on top of broker latency (milliseconds)
    pub venue_latency_overhead_ms: u64,

    /// Fill model settings
    pub fill_model: FillModelConfig,

    /// Probability a simulated broker accepts an amendment
    pub modify_success_rate: f64,

    /// Lifetime of IOC/FOK orders (milliseconds)
    pub ioc_window_ms: u64,

    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,

    /// Seed for the simulation RNGs; entropy when absent
    pub seed: Option<u64>,
}

/// Fill model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillModelConfig {
    /// Chance an active order receives a fill on a given pass
    pub fill_probability: f64,

    /// Smallest slice as a fraction of order quantity
    pub min_fill_fraction: f64,

    /// Largest slice as a fraction of order quantity
    pub max_fill_fraction: f64,

    /// Half-width of the price band for non-limit fills (bps)
    pub slippage_band_bps: f64,
}

impl Default for FillModelConfig {
    fn default() -> Self {
        Self {
            fill_probability: 0.3,
            min_fill_fraction: 0.1,
            max_fill_fraction: 0.5,
            slippage_band_bps: 10.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 5000;
        const DEFAULT_EVENT_CAPACITY: usize = 1024;

        Self {
            fill_interval_ms: MILLIS_PER_SEC,
            status_sweep_interval_ms: 5 * MILLIS_PER_SEC,
            cleanup_interval_ms: 60 * MILLIS_PER_SEC,
            terminal_retention_secs: 24 * SECS_PER_HOUR,
            gateway_timeout_ms: DEFAULT_GATEWAY_TIMEOUT_MS,
            venue_latency_overhead_ms: 2,
            fill_model: FillModelConfig::default(),
            modify_success_rate: 0.9,
            ioc_window_ms: 5 * MILLIS_PER_SEC,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            seed: None,
        }
    }
}

impl EngineConfig {
    /// Load from `EXEC_*` environment variables over the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup over the defaults
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        read_into(&lookup, "EXEC_FILL_INTERVAL_MS", &mut config.fill_interval_ms)?;
        read_into(
            &lookup,
            "EXEC_STATUS_SWEEP_INTERVAL_MS",
            &mut config.status_sweep_interval_ms,
        )?;
        read_into(&lookup, "EXEC_CLEANUP_INTERVAL_MS", &mut config.cleanup_interval_ms)?;
        read_into(
            &lookup,
            "EXEC_TERMINAL_RETENTION_SECS",
            &mut config.terminal_retention_secs,
        )?;
        read_into(&lookup, "EXEC_GATEWAY_TIMEOUT_MS", &mut config.gateway_timeout_ms)?;
        read_into(
            &lookup,
            "EXEC_VENUE_LATENCY_OVERHEAD_MS",
            &mut config.venue_latency_overhead_ms,
        )?;
        read_into(
            &lookup,
            "EXEC_FILL_PROBABILITY",
            &mut config.fill_model.fill_probability,
        )?;
        read_into(
            &lookup,
            "EXEC_MIN_FILL_FRACTION",
            &mut config.fill_model.min_fill_fraction,
        )?;
        read_into(
            &lookup,
            "EXEC_MAX_FILL_FRACTION",
            &mut config.fill_model.max_fill_fraction,
        )?;
        read_into(
            &lookup,
            "EXEC_SLIPPAGE_BAND_BPS",
            &mut config.fill_model.slippage_band_bps,
        )?;
        read_into(
            &lookup,
            "EXEC_MODIFY_SUCCESS_RATE",
            &mut config.modify_success_rate,
        )?;
        read_into(&lookup, "EXEC_IOC_WINDOW_MS", &mut config.ioc_window_ms)?;
        read_into(&lookup, "EXEC_EVENT_CAPACITY", &mut config.event_capacity)?;
        if let Some(raw) = lookup("EXEC_SEED") {
            config.seed = Some(parse_value("EXEC_SEED", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        let fm = &self.fill_model;
        if !(0.0..=1.0).contains(&fm.fill_probability) {
            anyhow::bail!("fill_probability must be within [0, 1]");
        }
        if !(fm.min_fill_fraction > 0.0
            && fm.min_fill_fraction <= fm.max_fill_fraction
            && fm.max_fill_fraction <= 1.0)
        {
            anyhow::bail!("fill fractions must satisfy 0 < min <= max <= 1");
        }
        if !(fm.slippage_band_bps.is_finite() && fm.slippage_band_bps >= 0.0) {
            anyhow::bail!("slippage_band_bps must be finite and non-negative");
        }
        if !(0.0..=1.0).contains(&self.modify_success_rate) {
            anyhow::bail!("modify_success_rate must be within [0, 1]");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be positive");
        }
        if self.fill_interval_ms == 0
            || self.status_sweep_interval_ms == 0
            || self.cleanup_interval_ms == 0
        {
            anyhow::bail!("sweep intervals must be positive");
        }
        Ok(())
    }

    /// Fill pass interval
    #[must_use]
    pub const fn fill_interval(&self) -> Duration {
        Duration::from_millis(self.fill_interval_ms)
    }

    /// Status sweep interval
    #[must_use]
    pub const fn status_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.status_sweep_interval_ms)
    }

    /// Cleanup sweep interval
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Gateway hard timeout
    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    /// Terminal order retention window
    #[must_use]
    pub fn terminal_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.terminal_retention_secs).unwrap_or(i64::MAX))
    }

    /// IOC/FOK lifetime
    #[must_use]
    pub fn ioc_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.ioc_window_ms).unwrap_or(i64::MAX))
    }
}

fn read_into<F, T>(lookup: &F, key: &str, slot: &mut T) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = parse_value(key, &raw)?;
    }
    Ok(())
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("invalid value for {key}: {raw:?} ({e})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.fill_interval(), Duration::from_secs(1));
        assert_eq!(config.status_sweep_interval(), Duration::from_secs(5));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
        assert_eq!(config.terminal_retention(), chrono::Duration::hours(24));
        assert_eq!(config.gateway_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides() -> anyhow::Result<()> {
        let vars: HashMap<&str, &str> = [
            ("EXEC_FILL_PROBABILITY", "0.75"),
            ("EXEC_GATEWAY_TIMEOUT_MS", " 250 "),
            ("EXEC_SEED", "7"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()))?;
        assert_eq!(config.fill_model.fill_probability, 0.75);
        assert_eq!(config.gateway_timeout_ms, 250);
        assert_eq!(config.seed, Some(7));
        Ok(())
    }

    #[test]
    fn test_lookup_rejects_garbage() {
        let result = EngineConfig::from_lookup(|k| {
            (k == "EXEC_FILL_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fractions() {
        let mut config = EngineConfig::default();
        config.fill_model.min_fill_fraction = 0.8;
        config.fill_model.max_fill_fraction = 0.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_slippage() {
        let mut config = EngineConfig::default();
        config.fill_model.slippage_band_bps = f64::INFINITY;
        assert!(config.validate().is_err());
        config.fill_model.slippage_band_bps = 0.0;
        assert!(config.validate().is_ok());
    }
}
