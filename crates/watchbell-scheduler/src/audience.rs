//! Audience resolution: decide who a reminder should reach.
//!
//! Nobody has acknowledged → broadcast. Some have → mention only the missing
//! members, truncated to the group's mention cap. Everyone has → no reminder.

use std::sync::Arc;

use serde::Serialize;
use watchbell_core::config::AudienceConfig;
use watchbell_core::error::Result;
use watchbell_core::traits::MembershipSource;
use watchbell_core::types::{Strategy, WatchedItem};

/// Who to notify for one reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudienceTargets {
    pub strategy: Strategy,
    /// Empty for broadcast: the strategy itself is the marker.
    pub targets: Vec<String>,
    /// Echoed back for statistics; does not affect resolution.
    pub total_accessible: usize,
}

/// Outcome of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Notify(AudienceTargets),
    /// Every accessible member has acknowledged.
    NotRequired { total_accessible: usize },
}

/// Pure resolution over already-fetched data.
///
/// `accessible` order is preserved in `targets` so truncation is stable.
pub fn resolve_targets(
    item: &WatchedItem,
    accessible: &[String],
    max_mentions: usize,
) -> Resolution {
    let total_accessible = accessible.len();
    if item.responded_user_ids.is_empty() {
        return Resolution::Notify(AudienceTargets {
            strategy: Strategy::Broadcast,
            targets: Vec::new(),
            total_accessible,
        });
    }

    let mut missing: Vec<String> = Vec::new();
    for user in accessible {
        if !item.responded_user_ids.contains(user) && !missing.contains(user) {
            missing.push(user.clone());
        }
    }
    if missing.is_empty() {
        return Resolution::NotRequired { total_accessible };
    }

    if missing.len() > max_mentions {
        tracing::debug!(
            "✂️ {}: {} missing responders truncated to {}",
            item.item_id,
            missing.len(),
            max_mentions
        );
        missing.truncate(max_mentions);
    }
    Resolution::Notify(AudienceTargets {
        strategy: Strategy::Targeted,
        targets: missing,
        total_accessible,
    })
}

/// Resolves audiences against a membership source and per-group caps.
pub struct AudienceResolver {
    membership: Arc<dyn MembershipSource>,
    config: AudienceConfig,
}

impl AudienceResolver {
    pub fn new(membership: Arc<dyn MembershipSource>, config: AudienceConfig) -> Self {
        Self { membership, config }
    }

    pub fn max_mentions_for(&self, group_id: &str) -> usize {
        self.config.max_mentions_for(group_id)
    }

    pub async fn resolve(&self, item: &WatchedItem) -> Result<Resolution> {
        let accessible = self.membership.get_accessible_users(&item.container_id).await?;
        Ok(resolve_targets(
            item,
            &accessible,
            self.max_mentions_for(&item.group_id),
        ))
    }
}
