//! Execution engine error types
//!
//! Every order-scoped failure carries the order id and, where relevant, the
//! status the order was in when the operation was refused.

use thiserror::Error;

use crate::order::{OrderId, OrderStatus};

/// Coarse classification of engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request failed validation before any state was touched
    Validation,
    /// No broker/venue pair can carry the order
    Routing,
    /// Broker refused or timed out on a submission or amendment
    Submission,
    /// Referenced entity does not exist
    NotFound,
    /// Operation not permitted from the order's current status
    InvalidTransition,
    /// Catalog or configuration problem
    Internal,
}

/// Execution engine errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Invalid order parameters
    #[error("Invalid order parameters: {reason}")]
    Validation { reason: String },

    /// No route for the symbol
    #[error("No route available for {symbol}: {reason}")]
    NoRouteAvailable { symbol: String, reason: String },

    /// Broker rejected the submission
    #[error("Order {order_id} rejected by {broker}: {reason}")]
    BrokerRejected {
        order_id: OrderId,
        broker: String,
        reason: String,
    },

    /// Order not found
    #[error("Order not found: {order_id}")]
    OrderNotFound { order_id: OrderId },

    /// Cancel refused for the order's status
    #[error("Order {order_id} cannot be cancelled in status {status}")]
    NotCancellable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Modify refused for the order's status
    #[error("Order {order_id} cannot be modified in status {status}")]
    NotModifiable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// Illegal state machine edge
    #[error("Order {order_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Fill could not be applied
    #[error("Fill rejected for order {order_id}: {reason}")]
    FillRejected { order_id: OrderId, reason: String },

    /// Broker declined an amendment
    #[error("Broker {broker} declined modification of order {order_id}")]
    BrokerModificationFailed { order_id: OrderId, broker: String },

    /// Venue not found
    #[error("Venue not found: {venue}")]
    VenueNotFound { venue: String },

    /// Broker not found
    #[error("Broker not found: {broker}")]
    BrokerNotFound { broker: String },

    /// Gateway call exceeded the hard timeout
    #[error("Order {order_id}: gateway call to {broker} timed out after {timeout_ms}ms")]
    GatewayTimeout {
        order_id: OrderId,
        broker: String,
        timeout_ms: u64,
    },

    /// Catalog could not be loaded
    #[error("Catalog error: {reason}")]
    Catalog { reason: String },

    /// Engine configuration rejected
    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl ExecutionError {
    /// Shorthand for a validation failure
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Taxonomy bucket for this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NoRouteAvailable { .. } => ErrorKind::Routing,
            Self::BrokerRejected { .. }
            | Self::BrokerModificationFailed { .. }
            | Self::GatewayTimeout { .. } => ErrorKind::Submission,
            Self::OrderNotFound { .. }
            | Self::VenueNotFound { .. }
            | Self::BrokerNotFound { .. } => ErrorKind::NotFound,
            Self::NotCancellable { .. }
            | Self::NotModifiable { .. }
            | Self::InvalidTransition { .. }
            | Self::FillRejected { .. } => ErrorKind::InvalidTransition,
            Self::Catalog { .. } | Self::InvalidConfig { .. } => ErrorKind::Internal,
        }
    }
}

/// Result type for execution operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Errors a broker gateway reports back to the engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Broker refused the order
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// Broker could not be reached
    #[error("unavailable: {reason}")]
    Unavailable { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ExecutionError::validation("qty").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ExecutionError::NotCancellable {
                order_id: OrderId(1),
                status: OrderStatus::Filled,
            }
            .kind(),
            ErrorKind::InvalidTransition
        );
        assert_eq!(
            ExecutionError::GatewayTimeout {
                order_id: OrderId(2),
                broker: "alpaca".into(),
                timeout_ms: 5000,
            }
            .kind(),
            ErrorKind::Submission
        );
    }

    #[test]
    fn test_error_messages_carry_context() {
        let err = ExecutionError::NotModifiable {
            order_id: OrderId(42),
            status: OrderStatus::Cancelled,
        };
        let text = err.to_string();
        assert!(text.contains("42"));
        assert!(text.contains("cancelled"));
    }
}
