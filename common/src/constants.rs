//! Shared numeric constants
//!
//! Single source of truth for magic numbers used by the execution services.

/// Basis points per unit (1.0 = 10 000 bps)
pub const BASIS_POINTS: f64 = 10_000.0;

/// Percent scale for 0-100 scores
pub const PERCENT_SCALE: f64 = 100.0;

/// Milliseconds per second
pub const MILLIS_PER_SEC: u64 = 1000;

/// Seconds per minute
pub const SECS_PER_MINUTE: u64 = 60;

/// Seconds per hour
pub const SECS_PER_HOUR: u64 = 3600;

/// Length of a regular equity session, used to pro-rate daily volume
pub const SESSION_SECS: f64 = 6.5 * 3600.0;

/// Quantity threshold above which routes are considered large
pub const LARGE_ORDER_QTY: f64 = 10_000.0;

/// Quantity threshold above which routes are considered very large
pub const VERY_LARGE_ORDER_QTY: f64 = 100_000.0;

/// Tolerance used when comparing accumulated f64 quantities
pub const QTY_EPSILON: f64 = 1e-9;
