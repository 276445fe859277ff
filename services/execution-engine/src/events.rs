//! Order lifecycle events

use chrono::{DateTime, Utc};

use crate::order::{Order, OrderFill, OrderId, OrderModification, OrderStatus};

/// Order event for broadcasting
#[derive(Debug, Clone)]
pub enum OrderEvent {
    /// New order accepted into the registry
    Created(Order),
    /// Broker acknowledged the order
    Submitted {
        order_id: OrderId,
        broker_id: String,
        broker_order_id: String,
        timestamp: DateTime<Utc>,
    },
    /// Broker or gateway refused the order
    Rejected {
        order_id: OrderId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// Fill applied; `status` is partial or filled
    Filled {
        order_id: OrderId,
        fill: OrderFill,
        status: OrderStatus,
    },
    /// Amendment accepted
    Modified {
        order_id: OrderId,
        changes: OrderModification,
        timestamp: DateTime<Utc>,
    },
    /// Cancel confirmed
    Cancelled {
        order_id: OrderId,
        timestamp: DateTime<Utc>,
    },
    /// Time in force elapsed
    Expired {
        order_id: OrderId,
        timestamp: DateTime<Utc>,
    },
    /// Dropped from the registry after retention
    Evicted { order_id: OrderId },
}

impl OrderEvent {
    /// Order the event refers to
    #[must_use]
    pub fn order_id(&self) -> OrderId {
        match self {
            Self::Created(order) => order.id,
            Self::Submitted { order_id, .. }
            | Self::Rejected { order_id, .. }
            | Self::Filled { order_id, .. }
            | Self::Modified { order_id, .. }
            | Self::Cancelled { order_id, .. }
            | Self::Expired { order_id, .. }
            | Self::Evicted { order_id } => *order_id,
        }
    }
}
