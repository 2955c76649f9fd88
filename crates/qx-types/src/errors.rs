use thiserror::Error;

/// Errors constructing or routing an [`crate::event::Event`].
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("no subscribers registered for event kind {kind:?}")]
    NoSubscribers { kind: crate::event::EventKind },

    #[error("handler for {kind:?} panicked or returned an error: {message}")]
    HandlerFailed {
        kind: crate::event::EventKind,
        message: String,
    },
}

/// Errors building an [`crate::orders::Order`] from caller-supplied fields.
#[derive(Debug, Error)]
pub enum OrderBuildError {
    #[error("order quantity must be positive, got {quantity}")]
    NonPositiveQuantity { quantity: String },

    #[error("limit order requires a price")]
    MissingLimitPrice,

    #[error("stop order requires a stop price")]
    MissingStopPrice,

    #[error("fill quantity {fill_quantity} exceeds remaining order quantity {remaining}")]
    Overfill {
        fill_quantity: String,
        remaining: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_error_messages_are_descriptive() {
        let err = EventError::QueueFull { capacity: 10000 };
        assert!(err.to_string().contains("10000"));
    }

    #[test]
    fn order_build_error_messages_are_descriptive() {
        let err = OrderBuildError::Overfill {
            fill_quantity: "15".into(),
            remaining: "10".into(),
        };
        assert!(err.to_string().contains("15"));
        assert!(err.to_string().contains("10"));
    }
}
