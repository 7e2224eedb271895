//! # Watchbell Scheduler
//!
//! Event-driven reminder engine for watched items: messages, threads or
//! polls that should get periodic nudges until everyone with access has
//! acknowledged them.
//!
//! ## Design Principles
//! - One timer at most. Sleep until the earliest due item, never poll
//! - Zero timers when nothing is watched
//! - Persistence via SQLite or a JSON file, in-memory for tests
//! - Per-item failure cooldown so one broken chat can't starve the rest
//!
//! ## Architecture
//! ```text
//! ReminderEngine (single tokio timer)
//!   ├── ItemManager ── read-through cache ── ItemStore
//!   │                                          ├── SqliteItemStore
//!   │                                          ├── JsonFileStore
//!   │                                          └── MemoryItemStore
//!   ├── FailureTracker: 5 failures → 5 min cooldown
//!   └── on wake → refresh responders → AudienceResolver → Notifier
//!                                        ├── broadcast (nobody acked)
//!                                        ├── targeted (missing, capped)
//!                                        └── not required (all acked)
//! ```

pub mod audience;
pub mod cooldown;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod lifecycle;
pub mod persistence;
pub mod service;
pub mod store;

pub use audience::{AudienceResolver, AudienceTargets, Resolution};
pub use cooldown::{FailureRecord, FailureTracker};
pub use directory::StaticDirectory;
pub use dispatch::{LogNotifier, WebhookNotifier};
pub use engine::{BatchReport, EngineParts, EngineState, EngineStatus, ReminderEngine};
pub use lifecycle::ItemManager;
pub use persistence::SqliteItemStore;
pub use service::WatchService;
pub use store::{ItemQuery, ItemStore, JsonFileStore, MemoryItemStore, Pagination};
