//! Membership and acknowledgement lookups.

use async_trait::async_trait;

use crate::error::Result;

/// Who can see a container.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn get_accessible_users(&self, container_id: &str) -> Result<Vec<String>>;
}

/// Who has acknowledged a watched item so far.
#[async_trait]
pub trait AcknowledgementSource: Send + Sync {
    async fn get_current_responders(&self, item_id: &str) -> Result<Vec<String>>;
}
