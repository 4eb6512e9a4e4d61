//! Per-delivery state machine.

use serde::{Deserialize, Serialize};

/// The state of one delivery inside a consumer.
///
/// State transitions:
/// ```text
/// Received ──► Processing ──┬──► Acked
///                           ├──► Requeued
///                           └──► DeadLettered
/// ```
///
/// `Requeued` ends this delivery only. The message itself comes back as a
/// new delivery with a higher retry count, so every message eventually
/// reaches exactly one of `Acked` or `DeadLettered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeliveryState {
    #[default]
    Received,
    Processing,
    Acked,
    Requeued,
    DeadLettered,
}

impl DeliveryState {
    /// Returns true if a delivery in this state may move to `next`.
    pub fn can_transition_to(&self, next: DeliveryState) -> bool {
        matches!(
            (self, next),
            (DeliveryState::Received, DeliveryState::Processing)
                | (
                    DeliveryState::Processing,
                    DeliveryState::Acked | DeliveryState::Requeued | DeliveryState::DeadLettered
                )
        )
    }

    /// Returns true once the delivery has been settled with the broker.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DeliveryState::Acked | DeliveryState::Requeued | DeliveryState::DeadLettered
        )
    }

    /// Returns true if the message will never be delivered again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Acked | DeliveryState::DeadLettered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Received => "RECEIVED",
            DeliveryState::Processing => "PROCESSING",
            DeliveryState::Acked => "ACKED",
            DeliveryState::Requeued => "REQUEUED",
            DeliveryState::DeadLettered => "DEAD_LETTERED",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
