//! Execution algorithms (TWAP, VWAP, POV, Iceberg, etc.)
//!
//! Algorithms here only plan: they turn an order quantity into a schedule of
//! child slices that the route proposal exposes. Slice quantities always sum
//! to the parent quantity; the last slice absorbs rounding.

use common::constants::{SECS_PER_MINUTE, SESSION_SECS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::{AlgorithmParameters, Catalog};
use crate::error::{ExecutionError, ExecutionResult};
use crate::order::{OrderRequest, OrderType};

/// Default U-shaped intraday volume curve, one bucket per 13 minutes of a
/// regular session
const VOLUME_CURVE: [u32; 30] = [
    150, 120, 100, 80, 70, 60, 50, 45, 40, 35, // Morning
    30, 28, 25, 25, 25, 25, 25, 28, 30, 35, // Midday
    40, 45, 50, 60, 70, 80, 100, 120, 150, 200, // Afternoon
];

const DEFAULT_DURATION_MINUTES: u32 = 30;
const DEFAULT_PARTICIPATION: f64 = 0.1;
const DEFAULT_ICEBERG_DISPLAY: f64 = 0.1;
const MAX_SLICES: usize = 10_000;

/// Longest schedule horizon a request may ask for (one calendar day)
pub const MAX_DURATION_MINUTES: u32 = 1_440;

/// Algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Time-weighted average price
    Twap,
    /// Volume-weighted average price
    Vwap,
    /// Percentage of volume
    Pov,
    /// Implementation shortfall
    ImplementationShortfall,
    /// Arrival price
    ArrivalPrice,
    /// Iceberg (show only partial quantity)
    Iceberg,
    /// Single opportunistic take
    Sniper,
    /// Randomised multi-venue slicing
    Guerrilla,
}

impl AlgorithmKind {
    /// Catalog name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Twap => "twap",
            Self::Vwap => "vwap",
            Self::Pov => "pov",
            Self::ImplementationShortfall => "implementation_shortfall",
            Self::ArrivalPrice => "arrival_price",
            Self::Iceberg => "iceberg",
            Self::Sniper => "sniper",
            Self::Guerrilla => "guerrilla",
        }
    }

    /// Parse a catalog name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "twap" => Self::Twap,
            "vwap" => Self::Vwap,
            "pov" => Self::Pov,
            "implementation_shortfall" => Self::ImplementationShortfall,
            "arrival_price" => Self::ArrivalPrice,
            "iceberg" => Self::Iceberg,
            "sniper" => Self::Sniper,
            "guerrilla" => Self::Guerrilla,
            _ => return None,
        };
        Some(kind)
    }

    /// Algorithm implied by an algorithmic order type
    #[must_use]
    pub const fn for_order_type(order_type: OrderType) -> Option<Self> {
        match order_type {
            OrderType::Twap => Some(Self::Twap),
            OrderType::Vwap => Some(Self::Vwap),
            OrderType::Pov => Some(Self::Pov),
            OrderType::Iceberg => Some(Self::Iceberg),
            _ => None,
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the execution algorithm for a request.
///
/// An explicit hint must name a catalog algorithm; otherwise the order type
/// decides, and plain order types get none.
pub fn select_algorithm(
    request: &OrderRequest,
    catalog: &Catalog,
) -> ExecutionResult<Option<String>> {
    if let Some(hint) = &request.algorithm {
        if catalog.algorithm(hint).is_none() {
            return Err(ExecutionError::validation(format!(
                "unknown execution algorithm {hint}"
            )));
        }
        return Ok(Some(hint.clone()));
    }
    Ok(AlgorithmKind::for_order_type(request.order_type).map(|k| k.as_str().to_string()))
}

/// Range-check the algorithm parameters the schedules read
pub fn validate_params(params: &BTreeMap<String, f64>) -> ExecutionResult<()> {
    if let Some(&minutes) = params.get("duration_minutes") {
        if !(1.0..=f64::from(MAX_DURATION_MINUTES)).contains(&minutes) {
            return Err(ExecutionError::validation(format!(
                "duration_minutes must be between 1 and {MAX_DURATION_MINUTES}, got {minutes}"
            )));
        }
    }
    if let Some(&rate) = params.get("participation_rate") {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(ExecutionError::validation(format!(
                "participation_rate must be in (0, 1], got {rate}"
            )));
        }
    }
    if let Some(&display) = params.get("display_quantity") {
        if display <= 0.0 {
            return Err(ExecutionError::validation(format!(
                "display_quantity must be positive, got {display}"
            )));
        }
    }
    Ok(())
}

/// One planned child slice
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlice {
    /// Position in the schedule
    pub sequence: u32,
    /// Release time relative to the start (seconds)
    pub offset_secs: u64,
    /// Slice quantity
    pub quantity: f64,
}

/// Inputs a schedule is planned against
#[derive(Debug, Clone)]
pub struct ScheduleContext<'a> {
    /// Parent quantity
    pub quantity: f64,
    /// Per-order overrides
    pub params: &'a BTreeMap<String, f64>,
    /// Catalog defaults for the algorithm
    pub defaults: Option<&'a AlgorithmParameters>,
    /// Expected daily volume at the routed venue
    pub daily_volume: f64,
}

impl ScheduleContext<'_> {
    fn duration_minutes(&self) -> u32 {
        self.params
            .get("duration_minutes")
            .filter(|m| **m >= 1.0)
            .map(|m| m.min(f64::from(MAX_DURATION_MINUTES)).round() as u32)
            .or_else(|| self.defaults.and_then(|d| d.duration_minutes))
            .unwrap_or(DEFAULT_DURATION_MINUTES)
            .clamp(1, MAX_DURATION_MINUTES)
    }

    fn participation(&self) -> f64 {
        self.params
            .get("participation_rate")
            .copied()
            .or_else(|| self.defaults.and_then(|d| d.participation_max))
            .filter(|r| *r > 0.0 && *r <= 1.0)
            .unwrap_or(DEFAULT_PARTICIPATION)
    }
}

/// Plan the child slices of an algorithmic order
#[must_use]
pub fn build_schedule(kind: AlgorithmKind, ctx: &ScheduleContext<'_>) -> Vec<ScheduleSlice> {
    if !(ctx.quantity.is_finite() && ctx.quantity > 0.0) {
        return Vec::new();
    }
    let minute = SECS_PER_MINUTE;

    match kind {
        AlgorithmKind::Twap | AlgorithmKind::Guerrilla => {
            let slices = ctx.duration_minutes() as usize;
            let weights = vec![1.0; slices];
            allocate(ctx.quantity, &weights, minute)
        }
        AlgorithmKind::Vwap => {
            let slices = ctx.duration_minutes() as usize;
            let weights: Vec<f64> = (0..slices)
                .map(|i| f64::from(VOLUME_CURVE[i * VOLUME_CURVE.len() / slices]))
                .collect();
            allocate(ctx.quantity, &weights, minute)
        }
        AlgorithmKind::ImplementationShortfall | AlgorithmKind::ArrivalPrice => {
            // front-loaded, linearly decaying
            let slices = ctx.duration_minutes() as usize;
            #[allow(clippy::cast_precision_loss)]
            let weights: Vec<f64> = (0..slices).map(|i| (slices - i) as f64).collect();
            allocate(ctx.quantity, &weights, minute)
        }
        AlgorithmKind::Pov => {
            let per_minute_volume = ctx.daily_volume / (SESSION_SECS / 60.0);
            let per_slice = (ctx.participation() * per_minute_volume).floor().max(1.0);
            fixed_size(ctx.quantity, per_slice, minute)
        }
        AlgorithmKind::Iceberg => {
            let display = ctx
                .params
                .get("display_quantity")
                .copied()
                .filter(|d| *d > 0.0)
                .unwrap_or(ctx.quantity * DEFAULT_ICEBERG_DISPLAY);
            fixed_size(ctx.quantity, display.floor().max(1.0), 0)
        }
        AlgorithmKind::Sniper => vec![ScheduleSlice {
            sequence: 0,
            offset_secs: 0,
            quantity: ctx.quantity,
        }],
    }
}

/// Split by weights in whole units; the last slice takes the remainder
fn allocate(quantity: f64, weights: &[f64], interval_secs: u64) -> Vec<ScheduleSlice> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || total <= 0.0 {
        return Vec::new();
    }

    let mut slices = Vec::with_capacity(weights.len());
    let mut assigned = 0.0;
    for (i, weight) in weights.iter().enumerate() {
        let is_last = i + 1 == weights.len();
        let quantity_i = if is_last {
            quantity - assigned
        } else {
            (quantity * weight / total).floor()
        };
        if quantity_i <= 0.0 {
            continue;
        }
        assigned += quantity_i;
        slices.push(quantity_i);
    }
    number(slices, interval_secs)
}

/// Repeated slices of `size`; the last slice takes the remainder
fn fixed_size(quantity: f64, size: f64, interval_secs: u64) -> Vec<ScheduleSlice> {
    let mut slices = Vec::new();
    let mut left = quantity;
    while left > size && slices.len() + 1 < MAX_SLICES {
        slices.push(size);
        left -= size;
    }
    slices.push(left);
    number(slices, interval_secs)
}

fn number(quantities: Vec<f64>, interval_secs: u64) -> Vec<ScheduleSlice> {
    quantities
        .into_iter()
        .enumerate()
        .map(|(i, quantity)| {
            let sequence = u32::try_from(i).unwrap_or(u32::MAX);
            ScheduleSlice {
                sequence,
                offset_secs: interval_secs * u64::from(sequence),
                quantity,
            }
        })
        .collect()
}
