//! Watched-item store contract plus lightweight backends.
//!
//! The store owns no scheduling logic: it validates, writes, reads and
//! filters. `MemoryItemStore` keeps everything in a map; `JsonFileStore`
//! persists the whole set as one human-readable JSON file and reads it back
//! on every call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use watchbell_core::error::{Result, WatchbellError};
use watchbell_core::types::WatchedItem;

/// Derived due-ness filter. Evaluated with [`WatchedItem::is_due`], the same
/// test the engine uses.
#[derive(Debug, Clone, Copy)]
pub struct DueFilter {
    pub due: bool,
    pub as_of: DateTime<Utc>,
}

/// Query filters. `None` means "don't filter on this field".
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub group_id: Option<String>,
    pub container_id: Option<String>,
    pub is_paused: Option<bool>,
    pub due: Option<DueFilter>,
}

impl ItemQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Self::default()
        }
    }

    pub fn active() -> Self {
        Self {
            is_paused: Some(false),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &WatchedItem) -> bool {
        if let Some(group) = &self.group_id
            && &item.group_id != group
        {
            return false;
        }
        if let Some(container) = &self.container_id
            && &item.container_id != container
        {
            return false;
        }
        if let Some(paused) = self.is_paused
            && item.is_paused != paused
        {
            return false;
        }
        if let Some(filter) = self.due
            && item.is_due(filter.as_of) != filter.due
        {
            return false;
        }
        true
    }
}

/// Offset/limit paging. `limit = None` returns everything after `offset`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pagination {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Pagination {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    fn apply(&self, items: Vec<WatchedItem>) -> Vec<WatchedItem> {
        let rest = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rest.take(limit).collect(),
            None => rest.collect(),
        }
    }
}

/// Durable CRUD for watched items.
///
/// `save` is an upsert keyed by `item_id` and must reject invalid items
/// before writing anything.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    async fn save(&self, item: &WatchedItem) -> Result<()>;

    async fn get(&self, item_id: &str) -> Result<Option<WatchedItem>>;

    /// Matching items ordered by `(created_at, item_id)`.
    async fn query(&self, query: &ItemQuery, page: Pagination) -> Result<Vec<WatchedItem>>;

    /// Returns whether anything was deleted.
    async fn delete(&self, item_id: &str) -> Result<bool>;
}

/// Filter, order and page a set of items the way every backend must.
pub(crate) fn select(
    items: impl IntoIterator<Item = WatchedItem>,
    query: &ItemQuery,
    page: Pagination,
) -> Vec<WatchedItem> {
    let mut matched: Vec<WatchedItem> = items.into_iter().filter(|i| query.matches(i)).collect();
    matched.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    page.apply(matched)
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<String, WatchedItem>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, WatchedItem>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, item: &WatchedItem) -> Result<()> {
        item.validate()?;
        self.lock().insert(item.item_id.clone(), item.clone());
        Ok(())
    }

    async fn get(&self, item_id: &str) -> Result<Option<WatchedItem>> {
        Ok(self.lock().get(item_id).cloned())
    }

    async fn query(&self, query: &ItemQuery, page: Pagination) -> Result<Vec<WatchedItem>> {
        let items: Vec<WatchedItem> = self.lock().values().cloned().collect();
        Ok(select(items, query, page))
    }

    async fn delete(&self, item_id: &str) -> Result<bool> {
        Ok(self.lock().remove(item_id).is_some())
    }
}

/// File-based store. All items live in one JSON file.
///
/// The file is the only copy: every operation re-reads it, so a one-shot CLI
/// edit made while a daemon holds the same store is seen on the daemon's
/// next access and not overwritten by its next flush.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or create) `items.json` inside `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("items.json");
        let items = Self::load(&path)?;
        tracing::debug!("📂 Found {} watched items in {}", items.len(), path.display());
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    fn load(path: &Path) -> Result<HashMap<String, WatchedItem>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let json = std::fs::read_to_string(path)?;
        let list: Vec<WatchedItem> = serde_json::from_str(&json).map_err(|e| {
            WatchbellError::persistence(format!("Failed to parse {}: {e}", path.display()))
        })?;
        Ok(list.into_iter().map(|i| (i.item_id.clone(), i)).collect())
    }

    /// Write the full set via a temp file and rename.
    fn flush(&self, items: &HashMap<String, WatchedItem>) -> Result<()> {
        let ordered = select(items.values().cloned(), &ItemQuery::all(), Pagination::default());
        let json = serde_json::to_string_pretty(&ordered)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| WatchbellError::persistence(format!("Write error: {e}")))?;
        tracing::debug!("💾 Saved {} watched items to {}", ordered.len(), self.path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ItemStore for JsonFileStore {
    fn name(&self) -> &str {
        "json"
    }

    async fn save(&self, item: &WatchedItem) -> Result<()> {
        item.validate()?;
        let _guard = self.lock();
        let mut items = Self::load(&self.path)?;
        items.insert(item.item_id.clone(), item.clone());
        self.flush(&items)
    }

    async fn get(&self, item_id: &str) -> Result<Option<WatchedItem>> {
        let _guard = self.lock();
        Ok(Self::load(&self.path)?.remove(item_id))
    }

    async fn query(&self, query: &ItemQuery, page: Pagination) -> Result<Vec<WatchedItem>> {
        let _guard = self.lock();
        let items = Self::load(&self.path)?;
        Ok(select(items.into_values(), query, page))
    }

    async fn delete(&self, item_id: &str) -> Result<bool> {
        let _guard = self.lock();
        let mut items = Self::load(&self.path)?;
        if items.remove(item_id).is_none() {
            return Ok(false);
        }
        self.flush(&items)?;
        Ok(true)
    }
}
