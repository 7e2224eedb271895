//! Item lifecycle manager: create/update/remove watched items and answer
//! due-ness questions over the store.
//!
//! Keeps a read-through cache keyed by `item_id`. The cache accelerates
//! single-item lookups only. Writes always load the current row from the
//! store, and bulk queries replace every cached entry in their scope, so an
//! item removed behind the manager's back disappears from the cache on the
//! next query that covers it.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use watchbell_core::error::{Result, WatchbellError};
use watchbell_core::traits::Clock;
use watchbell_core::types::{ItemPatch, NewItem, WatchedItem};

use crate::store::{ItemQuery, ItemStore, Pagination};

/// Owns item mutations. Every write goes through the store first and only
/// then updates the cache.
pub struct ItemManager {
    store: Arc<dyn ItemStore>,
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<String, WatchedItem>>,
}

impl ItemManager {
    pub fn new(store: Arc<dyn ItemStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, WatchedItem>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, item: &WatchedItem) {
        self.cache().insert(item.item_id.clone(), item.clone());
    }

    /// Create (or re-create) an item. Use [`NewItem::preserving`] for the
    /// update-watch flow so reminder history survives.
    pub async fn create_item(&self, params: NewItem) -> Result<WatchedItem> {
        let item = params.into_item(self.clock.now());
        self.store.save(&item).await?;
        self.remember(&item);
        tracing::info!(
            "📌 Watching '{}' ({}) every {} min in {}",
            item.title,
            item.item_id,
            item.interval_minutes,
            item.container_id
        );
        Ok(item)
    }

    /// Cache-first lookup, falling back to the store.
    pub async fn get_item(&self, item_id: &str) -> Result<Option<WatchedItem>> {
        if let Some(hit) = self.cache().get(item_id).cloned() {
            return Ok(Some(hit));
        }
        let loaded = self.store.get(item_id).await?;
        if let Some(item) = &loaded {
            self.remember(item);
        }
        Ok(loaded)
    }

    /// Store-side lookup that also resyncs the cache entry for `item_id`.
    async fn load(&self, item_id: &str) -> Result<Option<WatchedItem>> {
        let loaded = self.store.get(item_id).await?;
        match &loaded {
            Some(item) => self.remember(item),
            None => {
                self.cache().remove(item_id);
            }
        }
        Ok(loaded)
    }

    async fn refresh(&self, query: &ItemQuery) -> Result<Vec<WatchedItem>> {
        let items = self.store.query(query, Pagination::default()).await?;
        let mut cache = self.cache();
        cache.retain(|_, cached| !query.matches(cached));
        for item in &items {
            cache.insert(item.item_id.clone(), item.clone());
        }
        Ok(items)
    }

    pub async fn get_items_by_group(&self, group_id: &str) -> Result<Vec<WatchedItem>> {
        self.refresh(&ItemQuery::group(group_id)).await
    }

    /// All non-paused items, straight from the store.
    pub async fn get_active_items(&self) -> Result<Vec<WatchedItem>> {
        self.refresh(&ItemQuery::active()).await
    }

    /// Every item regardless of state.
    pub async fn list_items(
        &self,
        query: &ItemQuery,
        page: Pagination,
    ) -> Result<Vec<WatchedItem>> {
        self.store.query(query, page).await
    }

    /// Merge `patch`, re-validate, persist and bump `updated_at`.
    pub async fn update_item(
        &self,
        item_id: &str,
        patch: ItemPatch,
    ) -> Result<Option<WatchedItem>> {
        let Some(mut item) = self.load(item_id).await? else {
            return Ok(None);
        };
        patch.apply(&mut item);
        item.updated_at = self.clock.now();
        self.store.save(&item).await?;
        self.remember(&item);
        Ok(Some(item))
    }

    /// Remove an item. When `expected_group_id` is given it must match the
    /// stored group; cross-group removal is refused with `PermissionDenied`.
    pub async fn remove_item(
        &self,
        item_id: &str,
        expected_group_id: Option<&str>,
    ) -> Result<bool> {
        let Some(item) = self.load(item_id).await? else {
            return Ok(false);
        };
        if let Some(expected) = expected_group_id
            && expected != item.group_id
        {
            tracing::warn!(
                "🚫 Refused to remove {} from group {} (owned by {})",
                item_id,
                expected,
                item.group_id
            );
            return Err(WatchbellError::PermissionDenied(format!(
                "item {item_id} does not belong to group {expected}"
            )));
        }
        let removed = self.store.delete(item_id).await?;
        self.cache().remove(item_id);
        if removed {
            tracing::info!("🗑️ Stopped watching '{}' ({})", item.title, item_id);
        }
        Ok(removed)
    }

    /// Replace (not merge) the acknowledged set.
    pub async fn update_responded_users(
        &self,
        item_id: &str,
        user_ids: Vec<String>,
    ) -> Result<bool> {
        let responded: BTreeSet<String> = user_ids.into_iter().collect();
        let patch = ItemPatch {
            responded_user_ids: Some(responded),
            ..ItemPatch::default()
        };
        Ok(self.update_item(item_id, patch).await?.is_some())
    }

    /// Stamp `last_reminder_at = now`. Validation failures are returned, not
    /// swallowed.
    pub async fn mark_item_reminded(&self, item_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let patch = ItemPatch {
            last_reminder_at: Some(now),
            ..ItemPatch::default()
        };
        match self.update_item(item_id, patch).await {
            Ok(updated) => Ok(updated.is_some()),
            Err(e) => {
                tracing::error!("❌ Failed to mark {} as reminded: {}", item_id, e);
                Err(e)
            }
        }
    }

    /// Active items whose next reminder time has passed.
    pub async fn get_items_needing_reminders(&self) -> Result<Vec<WatchedItem>> {
        let now = self.clock.now();
        Ok(self
            .get_active_items()
            .await?
            .into_iter()
            .filter(|item| item.is_due(now))
            .collect())
    }

    /// Earliest next reminder time across active items.
    pub async fn get_next_reminder_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get_active_items()
            .await?
            .iter()
            .map(WatchedItem::next_reminder_time)
            .min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryItemStore;
    use chrono::{Duration, TimeZone};
    use watchbell_core::traits::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (ItemManager, Arc<MemoryItemStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryItemStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let manager = ItemManager::new(store.clone(), clock.clone());
        (manager, store, clock)
    }

    fn params(id: &str, group: &str, interval: f64) -> NewItem {
        NewItem::new(id, "chan-1", group, "Design review", interval)
    }

    #[tokio::test]
    async fn test_create_persists_and_caches() {
        let (manager, store, _) = setup();
        let item = manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        assert_eq!(item.created_at, t0());
        assert_eq!(item.updated_at, t0());
        assert!(store.get("m1").await.unwrap().is_some());
        assert_eq!(manager.get_item("m1").await.unwrap(), Some(item));
    }

    #[tokio::test]
    async fn test_bulk_query_evicts_items_deleted_elsewhere() {
        let (manager, store, _) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        manager.create_item(params("m2", "g2", 60.0)).await.unwrap();

        store.delete("m1").await.unwrap();
        assert!(manager.get_items_by_group("g1").await.unwrap().is_empty());
        assert!(manager.get_item("m1").await.unwrap().is_none());
        assert!(manager.get_item("m2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_writes_do_not_resurrect_items_removed_by_another_manager() {
        let store = Arc::new(MemoryItemStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let daemon = ItemManager::new(store.clone(), clock.clone());
        let cli = ItemManager::new(store.clone(), clock.clone());

        daemon.create_item(params("m1", "g1", 60.0)).await.unwrap();
        assert!(daemon.get_item("m1").await.unwrap().is_some());
        assert!(cli.remove_item("m1", Some("g1")).await.unwrap());

        assert!(!daemon.update_responded_users("m1", vec!["u1".into()]).await.unwrap());
        assert!(!daemon.mark_item_reminded("m1").await.unwrap());
        assert!(store.get("m1").await.unwrap().is_none());
        assert!(daemon.get_item("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_starts_from_stored_row() {
        let store = Arc::new(MemoryItemStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let daemon = ItemManager::new(store.clone(), clock.clone());
        let cli = ItemManager::new(store.clone(), clock.clone());

        daemon.create_item(params("m1", "g1", 60.0)).await.unwrap();
        cli.update_item("m1", ItemPatch::paused(true)).await.unwrap();
        daemon.update_responded_users("m1", vec!["u1".into()]).await.unwrap();

        let stored = store.get("m1").await.unwrap().unwrap();
        assert!(stored.is_paused);
        assert!(stored.responded_user_ids.contains("u1"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid() {
        let (manager, store, _) = setup();
        let err = manager.create_item(params("m1", "g1", 0.0)).await.unwrap_err();
        assert!(matches!(err, WatchbellError::InvalidState(_)));
        assert!(store.get("m1").await.unwrap().is_none());
        assert!(manager.get_item("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_item_falls_back_to_store() {
        let (manager, store, _) = setup();
        let item = params("m1", "g1", 30.0).into_item(t0());
        store.save(&item).await.unwrap();
        assert_eq!(manager.get_item("m1").await.unwrap(), Some(item));
        assert!(manager.get_item("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_merges_and_bumps_updated_at() {
        let (manager, _, clock) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        clock.advance(Duration::minutes(3));

        let updated = manager
            .update_item("m1", ItemPatch::paused(true))
            .await
            .unwrap()
            .unwrap();
        assert!(updated.is_paused);
        assert_eq!(updated.title, "Design review");
        assert_eq!(updated.updated_at, t0() + Duration::minutes(3));

        assert!(manager.update_item("ghost", ItemPatch::paused(true)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_patch() {
        let (manager, store, _) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        let patch = ItemPatch {
            interval_minutes: Some(-1.0),
            ..ItemPatch::default()
        };
        assert!(manager.update_item("m1", patch).await.is_err());
        assert_eq!(store.get("m1").await.unwrap().unwrap().interval_minutes, 60.0);
        assert_eq!(manager.get_item("m1").await.unwrap().unwrap().interval_minutes, 60.0);
    }

    #[tokio::test]
    async fn test_remove_checks_group() {
        let (manager, store, _) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();

        let err = manager.remove_item("m1", Some("g2")).await.unwrap_err();
        assert!(matches!(err, WatchbellError::PermissionDenied(_)));
        assert!(store.get("m1").await.unwrap().is_some());

        assert!(manager.remove_item("m1", Some("g1")).await.unwrap());
        assert!(store.get("m1").await.unwrap().is_none());
        assert!(manager.get_item("m1").await.unwrap().is_none());
        assert!(!manager.remove_item("m1", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_responded_users_replaced_not_merged() {
        let (manager, _, _) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        manager
            .update_responded_users("m1", vec!["a".into(), "b".into(), "a".into()])
            .await
            .unwrap();
        manager.update_responded_users("m1", vec!["c".into()]).await.unwrap();

        let item = manager.get_item("m1").await.unwrap().unwrap();
        assert_eq!(item.responded_user_ids, BTreeSet::from(["c".to_string()]));
        assert!(!manager.update_responded_users("ghost", vec![]).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_watch_preserves_history() {
        let (manager, _, clock) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        clock.advance(Duration::minutes(61));
        manager.mark_item_reminded("m1").await.unwrap();
        manager.update_responded_users("m1", vec!["u1".into()]).await.unwrap();

        clock.advance(Duration::minutes(10));
        let existing = manager.get_item("m1").await.unwrap().unwrap();
        let recreated = manager
            .create_item(params("m1", "g1", 15.0).preserving(&existing))
            .await
            .unwrap();
        assert_eq!(recreated.created_at, t0());
        assert_eq!(recreated.last_reminder_at, Some(t0() + Duration::minutes(61)));
        assert!(recreated.responded_user_ids.contains("u1"));
        assert_eq!(recreated.interval_minutes, 15.0);
    }

    #[tokio::test]
    async fn test_scenario_a_due_then_reminded() {
        let (manager, _, clock) = setup();
        manager.create_item(params("m1", "g1", 60.0)).await.unwrap();
        assert!(manager.get_items_needing_reminders().await.unwrap().is_empty());

        clock.advance(Duration::minutes(61));
        let due = manager.get_items_needing_reminders().await.unwrap();
        assert_eq!(due.len(), 1);

        assert!(manager.mark_item_reminded("m1").await.unwrap());
        let item = manager.get_item("m1").await.unwrap().unwrap();
        assert_eq!(item.last_reminder_at, Some(t0() + Duration::minutes(61)));
        assert!(manager.get_items_needing_reminders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_reminder_time_skips_paused() {
        let (manager, _, _) = setup();
        assert!(manager.get_next_reminder_time().await.unwrap().is_none());

        manager.create_item(params("slow", "g1", 120.0)).await.unwrap();
        manager.create_item(params("fast", "g1", 10.0)).await.unwrap();
        assert_eq!(
            manager.get_next_reminder_time().await.unwrap(),
            Some(t0() + Duration::minutes(10))
        );

        manager.update_item("fast", ItemPatch::paused(true)).await.unwrap();
        assert_eq!(
            manager.get_next_reminder_time().await.unwrap(),
            Some(t0() + Duration::minutes(120))
        );
        assert_eq!(manager.get_items_by_group("g1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_reminded_unknown_item() {
        let (manager, _, _) = setup();
        assert!(!manager.mark_item_reminded("ghost").await.unwrap());
    }
}
