//! Watched item data model: the unit of scheduling.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchbellError};

/// A user-created reminder tied to an external message or thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedItem {
    /// Stable identifier of the watched message/thread.
    pub item_id: String,
    /// Where reminders are posted (channel equivalent).
    pub container_id: String,
    /// Owning group (guild equivalent).
    pub group_id: String,
    pub title: String,
    /// Cadence between reminders. Fractional minutes are allowed.
    pub interval_minutes: f64,
    /// `None` means never reminded; the baseline is `created_at`.
    pub last_reminder_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub responded_user_ids: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WatchedItem {
    /// Reminder cadence as a chrono duration (millisecond resolution).
    pub fn interval(&self) -> Duration {
        minutes_to_duration(self.interval_minutes)
    }

    /// `(last_reminder_at ?? created_at) + interval`.
    /// Saturates at the latest representable instant instead of overflowing.
    pub fn next_reminder_time(&self) -> DateTime<Utc> {
        self.checked_next_reminder_time()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn checked_next_reminder_time(&self) -> Option<DateTime<Utc>> {
        self.last_reminder_at
            .unwrap_or(self.created_at)
            .checked_add_signed(self.interval())
    }

    /// Due-ness test shared by the store filter, the lifecycle manager and the engine.
    /// Paused items are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_paused && now >= self.next_reminder_time()
    }

    /// Check the item invariants. Stores call this before every write.
    pub fn validate(&self) -> Result<()> {
        if self.item_id.trim().is_empty() {
            return Err(WatchbellError::invalid("item_id must not be empty"));
        }
        if self.container_id.trim().is_empty() {
            return Err(WatchbellError::invalid(format!(
                "item {}: container_id must not be empty",
                self.item_id
            )));
        }
        if self.group_id.trim().is_empty() {
            return Err(WatchbellError::invalid(format!(
                "item {}: group_id must not be empty",
                self.item_id
            )));
        }
        if self.title.trim().is_empty() {
            return Err(WatchbellError::invalid(format!(
                "item {}: title must not be empty",
                self.item_id
            )));
        }
        if !self.interval_minutes.is_finite() || self.interval_minutes <= 0.0 {
            return Err(WatchbellError::invalid(format!(
                "item {}: interval_minutes must be positive, got {}",
                self.item_id, self.interval_minutes
            )));
        }
        if self.checked_next_reminder_time().is_none() {
            return Err(WatchbellError::invalid(format!(
                "item {}: interval_minutes {} puts the next reminder out of range",
                self.item_id, self.interval_minutes
            )));
        }
        if let Some(last) = self.last_reminder_at
            && last < self.created_at
        {
            return Err(WatchbellError::invalid(format!(
                "item {}: last_reminder_at {} precedes created_at {}",
                self.item_id, last, self.created_at
            )));
        }
        Ok(())
    }
}

/// Parameters for `create_item`.
///
/// The optional history fields carry state across an "update watch" flow so
/// that audience history survives an interval change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItem {
    pub item_id: String,
    pub container_id: String,
    pub group_id: String,
    pub title: String,
    pub interval_minutes: f64,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub last_reminder_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub responded_user_ids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewItem {
    pub fn new(
        item_id: impl Into<String>,
        container_id: impl Into<String>,
        group_id: impl Into<String>,
        title: impl Into<String>,
        interval_minutes: f64,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            container_id: container_id.into(),
            group_id: group_id.into(),
            title: title.into(),
            interval_minutes,
            ..Self::default()
        }
    }

    /// Carry history over from an existing item (update-watch flow).
    pub fn preserving(mut self, existing: &WatchedItem) -> Self {
        self.last_reminder_at = existing.last_reminder_at;
        self.responded_user_ids = Some(existing.responded_user_ids.clone());
        self.created_at = Some(existing.created_at);
        self
    }

    /// Build the item as of `now`.
    pub fn into_item(self, now: DateTime<Utc>) -> WatchedItem {
        WatchedItem {
            item_id: self.item_id,
            container_id: self.container_id,
            group_id: self.group_id,
            title: self.title,
            interval_minutes: self.interval_minutes,
            last_reminder_at: self.last_reminder_at,
            is_paused: self.is_paused,
            responded_user_ids: self.responded_user_ids.unwrap_or_default(),
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
        }
    }
}

/// Partial update for `update_item`. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    pub container_id: Option<String>,
    pub title: Option<String>,
    pub interval_minutes: Option<f64>,
    pub is_paused: Option<bool>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub responded_user_ids: Option<BTreeSet<String>>,
}

impl ItemPatch {
    pub fn paused(is_paused: bool) -> Self {
        Self {
            is_paused: Some(is_paused),
            ..Self::default()
        }
    }

    /// Merge into `item`. Does not touch `updated_at` or validate.
    pub fn apply(self, item: &mut WatchedItem) {
        if let Some(container_id) = self.container_id {
            item.container_id = container_id;
        }
        if let Some(title) = self.title {
            item.title = title;
        }
        if let Some(interval) = self.interval_minutes {
            item.interval_minutes = interval;
        }
        if let Some(paused) = self.is_paused {
            item.is_paused = paused;
        }
        if let Some(last) = self.last_reminder_at {
            item.last_reminder_at = Some(last);
        }
        if let Some(responded) = self.responded_user_ids {
            item.responded_user_ids = responded;
        }
    }
}

/// How a reminder reaches its audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Notify everyone with access; nobody has acknowledged yet.
    Broadcast,
    /// Notify only members who have not acknowledged, capped.
    Targeted,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Broadcast => write!(f, "broadcast"),
            Strategy::Targeted => write!(f, "targeted"),
        }
    }
}

/// Convert fractional minutes into a chrono duration, saturating at
/// `Duration::MAX`.
pub fn minutes_to_duration(minutes: f64) -> Duration {
    // `as` saturates for out-of-range floats.
    Duration::try_milliseconds((minutes * 60_000.0).round() as i64).unwrap_or(Duration::MAX)
}
