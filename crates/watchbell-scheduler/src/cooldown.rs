//! Failure cooldown: per-item circuit breaker.
//!
//! After `max_attempts` consecutive failures an item is suppressed until the
//! cooldown window since its last failure has passed. Once the window lapses
//! the record is dropped and the item gets a fresh budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use watchbell_core::config::CooldownConfig;
use watchbell_core::traits::Clock;

/// Consecutive failures for one item. In-memory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
}

pub struct FailureTracker {
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    window: Duration,
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl FailureTracker {
    pub fn new(clock: Arc<dyn Clock>, config: &CooldownConfig) -> Self {
        Self {
            clock,
            max_attempts: config.max_attempts,
            window: Duration::from_std(config.window()).unwrap_or(Duration::MAX),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, FailureRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// True while the item is over the threshold and inside the window.
    /// An expired record is removed as a side effect.
    pub fn is_in_cooldown(&self, item_id: &str) -> bool {
        let now = self.clock.now();
        let mut records = self.records();
        let Some(record) = records.get(item_id).copied() else {
            return false;
        };
        if record.count < self.max_attempts {
            return false;
        }
        if now - record.last_attempt < self.window {
            return true;
        }
        records.remove(item_id);
        tracing::info!("🔓 Cooldown lifted for {}", item_id);
        false
    }

    /// When an item in cooldown becomes eligible again.
    pub fn cooldown_until(&self, item_id: &str) -> Option<DateTime<Utc>> {
        let records = self.records();
        let record = records.get(item_id)?;
        (record.count >= self.max_attempts).then(|| {
            record
                .last_attempt
                .checked_add_signed(self.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }

    pub fn record_failure(&self, item_id: &str) {
        let now = self.clock.now();
        let mut records = self.records();
        let record = records.entry(item_id.to_string()).or_insert(FailureRecord {
            count: 0,
            last_attempt: now,
        });
        record.count += 1;
        record.last_attempt = now;
        if record.count == self.max_attempts {
            tracing::warn!(
                "🧊 {} failed {} times in a row, cooling down for {}s",
                item_id,
                record.count,
                self.window.num_seconds()
            );
        }
    }

    pub fn record_success(&self, item_id: &str) {
        self.records().remove(item_id);
    }

    pub fn failure_count(&self, item_id: &str) -> u32 {
        self.records().get(item_id).map_or(0, |r| r.count)
    }

    pub fn get(&self, item_id: &str) -> Option<FailureRecord> {
        self.records().get(item_id).copied()
    }

    /// Forget an item entirely (it was unwatched).
    pub fn forget(&self, item_id: &str) {
        self.records().remove(item_id);
    }
}
