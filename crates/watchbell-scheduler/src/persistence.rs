//! SQLite-backed persistence for watched items: survives restarts.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use watchbell_core::error::{Result, WatchbellError};
use watchbell_core::types::WatchedItem;

use crate::store::{ItemQuery, ItemStore, Pagination, select};

const COLUMNS: &str = "item_id, container_id, group_id, title, interval_minutes, last_reminder_at, \
                       is_paused, responded_user_ids, created_at, updated_at";

/// SQLite-backed item store.
pub struct SqliteItemStore {
    conn: Mutex<Connection>,
}

impl SqliteItemStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("DB open", e))?;
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("DB open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS watched_items (
                item_id TEXT PRIMARY KEY,
                container_id TEXT NOT NULL,
                group_id TEXT NOT NULL,
                title TEXT NOT NULL,
                interval_minutes REAL NOT NULL,
                last_reminder_at TEXT,
                is_paused INTEGER NOT NULL DEFAULT 0,
                responded_user_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_watched_items_group ON watched_items(group_id);
            CREATE INDEX IF NOT EXISTS idx_watched_items_paused ON watched_items(is_paused);
         ",
            )
            .map_err(|e| db_err("Migration", e))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WatchedItem> {
        let responded_json: String = row.get(7)?;
        let last_reminder_str: Option<String> = row.get(5)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        let responded_user_ids: BTreeSet<String> =
            serde_json::from_str(&responded_json).map_err(|e| conversion_err(7, e))?;

        Ok(WatchedItem {
            item_id: row.get(0)?,
            container_id: row.get(1)?,
            group_id: row.get(2)?,
            title: row.get(3)?,
            interval_minutes: row.get(4)?,
            last_reminder_at: last_reminder_str
                .map(|s| parse_ts(&s).map_err(|e| conversion_err(5, e)))
                .transpose()?,
            is_paused: row.get::<_, i32>(6)? != 0,
            responded_user_ids,
            created_at: parse_ts(&created_at_str).map_err(|e| conversion_err(8, e))?,
            updated_at: parse_ts(&updated_at_str).map_err(|e| conversion_err(9, e))?,
        })
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn save(&self, item: &WatchedItem) -> Result<()> {
        item.validate()?;
        let responded = serde_json::to_string(&item.responded_user_ids)?;
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO watched_items
                 (item_id, container_id, group_id, title, interval_minutes, last_reminder_at,
                  is_paused, responded_user_ids, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    item.item_id,
                    item.container_id,
                    item.group_id,
                    item.title,
                    item.interval_minutes,
                    item.last_reminder_at.map(|t| t.to_rfc3339()),
                    item.is_paused as i32,
                    responded,
                    item.created_at.to_rfc3339(),
                    item.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| db_err("Save item", e))?;
        Ok(())
    }

    async fn get(&self, item_id: &str) -> Result<Option<WatchedItem>> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM watched_items WHERE item_id = ?1"),
            [item_id],
            Self::row_to_item,
        )
        .optional()
        .map_err(|e| db_err("Get item", e))
    }

    async fn query(&self, query: &ItemQuery, page: Pagination) -> Result<Vec<WatchedItem>> {
        // Column filters run in SQL; the derived due filter and paging run on
        // the narrowed set so they share the in-memory implementation.
        let mut sql = format!("SELECT {COLUMNS} FROM watched_items WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(group) = &query.group_id {
            args.push(Box::new(group.clone()));
            sql.push_str(&format!(" AND group_id = ?{}", args.len()));
        }
        if let Some(container) = &query.container_id {
            args.push(Box::new(container.clone()));
            sql.push_str(&format!(" AND container_id = ?{}", args.len()));
        }
        if let Some(paused) = query.is_paused {
            args.push(Box::new(paused as i32));
            sql.push_str(&format!(" AND is_paused = ?{}", args.len()));
        }

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("Query items", e))?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                Self::row_to_item,
            )
            .map_err(|e| db_err("Query items", e))?;
        let items = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("Read item row", e))?;
        Ok(select(items, query, page))
    }

    async fn delete(&self, item_id: &str) -> Result<bool> {
        let changed = self
            .lock()
            .execute("DELETE FROM watched_items WHERE item_id = ?1", [item_id])
            .map_err(|e| db_err("Delete item", e))?;
        Ok(changed > 0)
    }
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

fn conversion_err(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn db_err(context: &str, e: rusqlite::Error) -> WatchbellError {
    WatchbellError::Persistence(format!("{context}: {e}"))
}
