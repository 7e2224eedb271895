//! Notifier trait: delivers a reminder to a container.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::Strategy;

/// What a notifier reports after a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// How many recipients the reminder reached (1 for a broadcast post).
    pub delivered: usize,
}

/// Delivers reminders to a container. Implementations must tolerate being
/// called again after a partial delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name for logging.
    fn name(&self) -> &str;

    /// Send a reminder. `targets` is empty for [`Strategy::Broadcast`].
    async fn send(
        &self,
        container_id: &str,
        targets: &[String],
        strategy: Strategy,
    ) -> Result<DeliveryReceipt>;
}
