//! Reminder engine: sleeps until the next reminder is due instead of ticking.
//!
//! One pass (`schedule_next_check`) fetches the active items, drains anything
//! overdue, then arms exactly one timer for the earliest remaining item. With
//! nothing to watch the engine sleeps with no timer at all and only wakes when
//! `schedule_item` / `unschedule_item` is called. Every wake, successful or
//! not, ends in another pass, so transient errors heal on their own.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinHandle;
use watchbell_core::config::SchedulerConfig;
use watchbell_core::error::{Result, WatchbellError};
use watchbell_core::traits::{AcknowledgementSource, Clock, Notifier};
use watchbell_core::types::WatchedItem;

use crate::audience::{AudienceResolver, Resolution};
use crate::cooldown::FailureTracker;
use crate::lifecycle::ItemManager;

/// Engine lifecycle. `Active` and `Sleeping` both mean "running".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Stopped,
    /// A wake timer is armed.
    Active,
    /// Running with nothing to watch; no timer armed.
    Sleeping,
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub next_wake_time: Option<DateTime<Utc>>,
    pub active_item_count: usize,
    pub last_reminder_sent_at: Option<DateTime<Utc>>,
}

/// Counts from one due-reminder batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub sent: usize,
    pub delivered: usize,
    pub not_required: usize,
    pub cooling_down: usize,
    pub failed: usize,
    pub gone: usize,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.sent + self.not_required + self.cooling_down + self.failed + self.gone
    }

    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Sent { delivered } => {
                self.sent += 1;
                self.delivered += delivered;
            }
            ItemOutcome::NotRequired => self.not_required += 1,
            ItemOutcome::CoolingDown => self.cooling_down += 1,
            ItemOutcome::Failed(_) => self.failed += 1,
            ItemOutcome::Gone => self.gone += 1,
        }
    }
}

/// Result of the per-item unit of work.
#[derive(Debug)]
enum ItemOutcome {
    Sent { delivered: usize },
    /// Everyone with access has acknowledged.
    NotRequired,
    CoolingDown,
    Failed(WatchbellError),
    /// Removed while being processed.
    Gone,
}

/// Collaborators the engine drives. Built once by the composition root.
pub struct EngineParts {
    pub manager: Arc<ItemManager>,
    pub resolver: Arc<AudienceResolver>,
    pub failures: Arc<FailureTracker>,
    pub notifier: Arc<dyn Notifier>,
    pub acknowledgements: Arc<dyn AcknowledgementSource>,
    pub clock: Arc<dyn Clock>,
}

struct TimerSlot {
    state: EngineState,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every cancel/arm so a superseded wake does nothing.
    generation: u64,
    next_wake: Option<DateTime<Utc>>,
    active_item_count: usize,
    last_reminder_sent_at: Option<DateTime<Utc>>,
}

struct EngineInner {
    config: SchedulerConfig,
    parts: EngineParts,
    slot: Mutex<TimerSlot>,
    /// Engine-side "look again no earlier than" per item. Never persisted and
    /// never changes `last_reminder_at`.
    deferrals: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Serializes passes, timer wakes and manual sends.
    pass_lock: tokio::sync::Mutex<()>,
}

/// The scheduling coordinator. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct ReminderEngine {
    inner: Arc<EngineInner>,
}

/// How long to sleep before looking at an item due at `target`.
///
/// `max(min_wait, (target - now) - margin)`, capped at `max_wait`.
pub fn compute_wait(
    now: DateTime<Utc>,
    target: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Duration {
    let until = (target - now).to_std().unwrap_or(Duration::ZERO);
    until
        .saturating_sub(config.safety_margin())
        .max(config.min_wait())
        .min(config.max_wait())
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// `at + by`, saturating at the latest representable instant.
fn after(at: DateTime<Utc>, by: chrono::Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl ReminderEngine {
    pub fn new(parts: EngineParts, config: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                parts,
                slot: Mutex::new(TimerSlot {
                    state: EngineState::Stopped,
                    timer: None,
                    generation: 0,
                    next_wake: None,
                    active_item_count: 0,
                    last_reminder_sent_at: None,
                }),
                deferrals: Mutex::new(HashMap::new()),
                pass_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, TimerSlot> {
        self.inner.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deferrals(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.inner.deferrals.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.parts.clock.now()
    }

    pub fn is_running(&self) -> bool {
        self.slot().state != EngineState::Stopped
    }

    /// Whether a wake timer is currently pending. Never more than one.
    pub fn has_pending_timer(&self) -> bool {
        self.slot()
            .timer
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the engine and run the first pass.
    pub async fn initialize(&self) {
        {
            let mut slot = self.slot();
            if slot.state == EngineState::Stopped {
                slot.state = EngineState::Sleeping;
                tracing::info!(
                    "⏰ Reminder engine started (max wait {}s)",
                    self.inner.config.max_wait().as_secs()
                );
            }
        }
        self.schedule_next_check().await;
    }

    /// Cancel the pending wake. A batch already in progress runs to completion.
    pub fn stop(&self) {
        let mut slot = self.slot();
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.state = EngineState::Stopped;
        slot.next_wake = None;
        tracing::info!("🛑 Reminder engine stopped");
    }

    /// Recompute the wake time after an item was created or changed.
    /// Never mutates the item.
    pub async fn schedule_item(&self, item: &WatchedItem) {
        self.deferrals().remove(&item.item_id);
        tracing::debug!("📅 Rescheduling for {}", item.item_id);
        self.restart_or_reschedule().await;
    }

    /// Recompute the wake time after an item was removed.
    pub async fn unschedule_item(&self, item_id: &str) {
        self.deferrals().remove(item_id);
        self.inner.parts.failures.forget(item_id);
        tracing::debug!("📅 Unscheduled {}", item_id);
        self.restart_or_reschedule().await;
    }

    async fn restart_or_reschedule(&self) {
        if self.is_running() {
            self.schedule_next_check().await;
        } else {
            self.initialize().await;
        }
    }

    pub fn status(&self) -> EngineStatus {
        let slot = self.slot();
        EngineStatus {
            state: slot.state,
            next_wake_time: slot.next_wake,
            active_item_count: slot.active_item_count,
            last_reminder_sent_at: slot.last_reminder_sent_at,
        }
    }

    /// Run the reminder pipeline for one item right now, ignoring due-ness.
    ///
    /// Returns how many recipients were reached; `0` when the item is cooling
    /// down or everyone has already acknowledged.
    pub async fn send_manual_reminder(&self, item: &WatchedItem) -> Result<usize> {
        let outcome = {
            let _pass = self.inner.pass_lock.lock().await;
            let outcome = self.process_item(item).await;
            self.apply_outcome(item, &outcome);
            outcome
        };
        if self.is_running() {
            self.schedule_next_check().await;
        }
        match outcome {
            ItemOutcome::Sent { delivered } => Ok(delivered),
            ItemOutcome::NotRequired | ItemOutcome::CoolingDown => Ok(0),
            ItemOutcome::Gone => Err(WatchbellError::NotFound(item.item_id.clone())),
            ItemOutcome::Failed(e) => Err(e),
        }
    }

    /// Process every item due within the safety margin (the timer path).
    pub async fn process_due_reminders(&self) -> Result<BatchReport> {
        let _pass = self.inner.pass_lock.lock().await;
        self.due_pass(&mut HashSet::new()).await
    }

    /// Recompute the next wake from current item state. Cancels any pending
    /// timer first; arms at most one.
    pub async fn schedule_next_check(&self) {
        let _pass = self.inner.pass_lock.lock().await;
        self.reschedule(HashSet::new()).await;
    }

    async fn reschedule(&self, handled: HashSet<String>) {
        if !self.is_running() {
            return;
        }
        self.cancel_timer();
        if let Err(e) = self.run_pass(handled).await {
            let retry = self.inner.config.retry_delay();
            tracing::error!(
                "❌ Scheduling pass failed: {e}, retrying in {}s",
                retry.as_secs()
            );
            self.arm_timer(retry, self.now());
        }
    }

    /// The scheduling loop body. Overdue items are drained synchronously and
    /// the loop goes round again; it only ends by sleeping or arming a timer.
    async fn run_pass(&self, mut handled: HashSet<String>) -> Result<()> {
        loop {
            if !self.is_running() {
                return Ok(());
            }
            let items = self.inner.parts.manager.get_active_items().await?;
            let now = self.now();
            self.prune_deferrals(&items);
            self.slot().active_item_count = items.len();

            if items.is_empty() {
                self.enter_sleeping("no active items");
                return Ok(());
            }

            let horizon = after(now, to_chrono(self.inner.config.safety_margin()));
            let (overdue, future): (Vec<WatchedItem>, Vec<WatchedItem>) =
                items.into_iter().partition(|item| {
                    !handled.contains(&item.item_id) && self.effective_due(item) <= horizon
                });

            if !overdue.is_empty() {
                tracing::debug!("⚡ {} overdue item(s), processing now", overdue.len());
                handled.extend(overdue.iter().map(|i| i.item_id.clone()));
                let report = self.process_batch(&overdue).await;
                tracing::debug!("⚡ Immediate batch done: {:?}", report);
                continue;
            }

            let Some(target) = future.iter().map(|i| self.effective_due(i)).min() else {
                self.enter_sleeping("all items paused");
                return Ok(());
            };

            let wait = compute_wait(now, target, &self.inner.config);
            self.arm_timer(wait, now);
            tracing::info!(
                "⏰ Next reminder check in {}s ({} active, earliest due {})",
                wait.as_secs(),
                future.len(),
                target.format("%Y-%m-%d %H:%M:%S UTC")
            );
            return Ok(());
        }
    }

    /// Due-reminder pass used on timer wakes.
    async fn due_pass(&self, handled: &mut HashSet<String>) -> Result<BatchReport> {
        let items = self.inner.parts.manager.get_active_items().await?;
        let horizon = after(self.now(), to_chrono(self.inner.config.safety_margin()));
        let due: Vec<WatchedItem> = items
            .into_iter()
            .filter(|item| !handled.contains(&item.item_id) && self.effective_due(item) <= horizon)
            .collect();
        handled.extend(due.iter().map(|i| i.item_id.clone()));
        Ok(self.process_batch(&due).await)
    }

    async fn process_batch(&self, items: &[WatchedItem]) -> BatchReport {
        let mut report = BatchReport::default();
        let delay = self.inner.config.inter_item_delay();
        for (idx, item) in items.iter().enumerate() {
            let outcome = self.process_item(item).await;
            self.apply_outcome(item, &outcome);
            report.record(&outcome);

            let attempted = matches!(outcome, ItemOutcome::Sent { .. } | ItemOutcome::Failed(_));
            if attempted && idx + 1 < items.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        if report.processed() > 0 {
            tracing::info!(
                "📣 Reminder batch: {} sent, {} failed, {} skipped",
                report.sent,
                report.failed,
                report.not_required + report.cooling_down + report.gone
            );
        }
        report
    }

    /// Per-item unit of work: cooldown check, responder refresh, audience
    /// resolution, delivery, then the reminded stamp.
    async fn process_item(&self, item: &WatchedItem) -> ItemOutcome {
        let parts = &self.inner.parts;
        let id = item.item_id.as_str();

        if parts.failures.is_in_cooldown(id) {
            tracing::debug!("🧊 {} is cooling down, skipped", id);
            return ItemOutcome::CoolingDown;
        }

        // Audience data is always refreshed before deciding to send.
        let responders = match parts.acknowledgements.get_current_responders(id).await {
            Ok(responders) => responders,
            Err(e) => return self.fail(id, e),
        };
        match parts.manager.update_responded_users(id, responders).await {
            Ok(true) => {}
            Ok(false) => return ItemOutcome::Gone,
            Err(e) => return self.fail(id, e),
        }
        let fresh = match parts.manager.get_item(id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => return ItemOutcome::Gone,
            Err(e) => return self.fail(id, e),
        };

        let audience = match parts.resolver.resolve(&fresh).await {
            Ok(Resolution::Notify(audience)) => audience,
            Ok(Resolution::NotRequired { total_accessible }) => {
                tracing::debug!(
                    "✅ {}: all {} members acknowledged, no reminder",
                    id,
                    total_accessible
                );
                return ItemOutcome::NotRequired;
            }
            Err(e) => return self.fail(id, e),
        };

        let receipt = match parts
            .notifier
            .send(&fresh.container_id, &audience.targets, audience.strategy)
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => return self.fail(id, e),
        };

        match parts.manager.mark_item_reminded(id).await {
            Ok(true) => {
                parts.failures.record_success(id);
                self.slot().last_reminder_sent_at = Some(self.now());
                tracing::info!(
                    "🔔 Reminded '{}' ({}) via {}: {} ({} of {} members)",
                    fresh.title,
                    id,
                    parts.notifier.name(),
                    audience.strategy,
                    receipt.delivered,
                    audience.total_accessible
                );
                ItemOutcome::Sent {
                    delivered: receipt.delivered,
                }
            }
            Ok(false) => ItemOutcome::Gone,
            Err(e) => {
                // A send without the stamp would resend on the next wake.
                parts.failures.record_failure(id);
                tracing::error!("❌ {} was sent but not recorded: {}", id, e);
                ItemOutcome::Failed(WatchbellError::persistence(format!(
                    "reminder for {id} sent but not recorded: {e}"
                )))
            }
        }
    }

    fn fail(&self, item_id: &str, e: WatchbellError) -> ItemOutcome {
        if e.counts_as_failure() {
            self.inner.parts.failures.record_failure(item_id);
        }
        tracing::warn!(
            "⚠️ Reminder for {} failed (attempt {}): {}",
            item_id,
            self.inner.parts.failures.failure_count(item_id),
            e
        );
        ItemOutcome::Failed(e)
    }

    /// Push the engine's next look at an item that is still due after being
    /// handled, so the pass doesn't spin on it.
    fn apply_outcome(&self, item: &WatchedItem, outcome: &ItemOutcome) {
        let now = self.now();
        let backoff = after(now, to_chrono(self.inner.config.failure_backoff()));
        let cooldown = self.inner.parts.failures.cooldown_until(&item.item_id);
        let until = match outcome {
            ItemOutcome::Sent { .. } | ItemOutcome::Gone => None,
            ItemOutcome::NotRequired => Some(after(now, item.interval())),
            ItemOutcome::CoolingDown => Some(cooldown.unwrap_or(backoff)),
            ItemOutcome::Failed(_) => Some(cooldown.map_or(backoff, |c| c.max(backoff))),
        };
        let mut deferrals = self.deferrals();
        match until {
            Some(until) => {
                deferrals.insert(item.item_id.clone(), until);
            }
            None => {
                deferrals.remove(&item.item_id);
            }
        }
    }

    fn effective_due(&self, item: &WatchedItem) -> DateTime<Utc> {
        let next = item.next_reminder_time();
        match self.deferrals().get(&item.item_id) {
            Some(deferred) => next.max(*deferred),
            None => next,
        }
    }

    fn prune_deferrals(&self, active: &[WatchedItem]) {
        let ids: HashSet<&str> = active.iter().map(|i| i.item_id.as_str()).collect();
        self.deferrals().retain(|id, _| ids.contains(id.as_str()));
    }

    fn enter_sleeping(&self, reason: &str) {
        let mut slot = self.slot();
        if slot.state == EngineState::Stopped {
            return;
        }
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.next_wake = None;
        if slot.state != EngineState::Sleeping {
            tracing::info!("💤 Reminder engine sleeping ({reason})");
        }
        slot.state = EngineState::Sleeping;
    }

    fn cancel_timer(&self) {
        let mut slot = self.slot();
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        slot.next_wake = None;
    }

    /// Replace the pending timer with one firing after `wait`.
    fn arm_timer(&self, wait: Duration, now: DateTime<Utc>) {
        let mut slot = self.slot();
        if slot.state == EngineState::Stopped {
            return;
        }
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;
        let started = tokio::time::Instant::now();
        let deadline = started
            .checked_add(wait)
            .unwrap_or_else(|| started + self.inner.config.max_wait());
        slot.timer = Some(tokio::spawn(self.clone().wake_at(deadline, generation)));
        slot.state = EngineState::Active;
        slot.next_wake = Some(after(now, to_chrono(wait)));
    }

    fn wake_at(self, deadline: tokio::time::Instant, generation: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            tokio::time::sleep_until(deadline).await;
            self.on_wake(generation).await;
        })
    }

    async fn on_wake(self, generation: u64) {
        {
            let mut slot = self.slot();
            if slot.generation != generation || slot.state == EngineState::Stopped {
                return;
            }
            // Detach so stop() can no longer abort the batch we are about to run.
            slot.timer = None;
            slot.next_wake = None;
        }
        let _pass = self.inner.pass_lock.lock().await;
        let mut handled = HashSet::new();
        match self.due_pass(&mut handled).await {
            Ok(report) => tracing::debug!("⏰ Wake processed {} item(s)", report.processed()),
            Err(e) => tracing::error!("❌ Due-reminder pass failed: {e}"),
        }
        self.reschedule(handled).await;
    }
}
