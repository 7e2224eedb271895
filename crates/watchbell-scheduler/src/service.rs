//! Mutation surface for a running engine.
//!
//! Every change to a watched item made while the engine runs goes through
//! here, so the engine's single timer is recomputed right after the store
//! write instead of at its next wake.

use std::sync::Arc;

use watchbell_core::error::{Result, WatchbellError};
use watchbell_core::types::{ItemPatch, NewItem, WatchedItem};

use crate::engine::ReminderEngine;
use crate::lifecycle::ItemManager;

#[derive(Clone)]
pub struct WatchService {
    manager: Arc<ItemManager>,
    engine: ReminderEngine,
}

impl WatchService {
    pub fn new(manager: Arc<ItemManager>, engine: ReminderEngine) -> Self {
        Self { manager, engine }
    }

    pub fn manager(&self) -> &Arc<ItemManager> {
        &self.manager
    }

    pub fn engine(&self) -> &ReminderEngine {
        &self.engine
    }

    async fn require(&self, item_id: &str) -> Result<WatchedItem> {
        self.manager
            .get_item(item_id)
            .await?
            .ok_or_else(|| WatchbellError::NotFound(item_id.to_string()))
    }

    /// Start watching an item. Re-watching an existing id keeps its
    /// creation time, last reminder and acknowledgements.
    pub async fn watch(&self, params: NewItem) -> Result<WatchedItem> {
        let params = match self.manager.get_item(&params.item_id).await? {
            Some(existing) => params.preserving(&existing),
            None => params,
        };
        let item = self.manager.create_item(params).await?;
        self.engine.schedule_item(&item).await;
        Ok(item)
    }

    /// Stop watching an item. Returns whether anything was removed.
    pub async fn unwatch(&self, item_id: &str, expected_group_id: Option<&str>) -> Result<bool> {
        let removed = self.manager.remove_item(item_id, expected_group_id).await?;
        if removed {
            self.engine.unschedule_item(item_id).await;
        }
        Ok(removed)
    }

    pub async fn set_paused(&self, item_id: &str, paused: bool) -> Result<WatchedItem> {
        self.update(item_id, ItemPatch::paused(paused)).await
    }

    /// Merge `patch` into the stored item and reschedule.
    pub async fn update(&self, item_id: &str, patch: ItemPatch) -> Result<WatchedItem> {
        let item = self
            .manager
            .update_item(item_id, patch)
            .await?
            .ok_or_else(|| WatchbellError::NotFound(item_id.to_string()))?;
        self.engine.schedule_item(&item).await;
        Ok(item)
    }

    /// Send a reminder for an item now, regardless of due-ness.
    pub async fn remind(&self, item_id: &str) -> Result<usize> {
        let item = self.require(item_id).await?;
        self.engine.send_manual_reminder(&item).await
    }
}
