//! # Watchbell Core
//!
//! Shared data model, error taxonomy, configuration, and the collaborator
//! traits (`Notifier`, `MembershipSource`, `AcknowledgementSource`, `Clock`)
//! used by the scheduling engine.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::WatchbellConfig;
pub use error::{Result, WatchbellError};
pub use traits::{
    AcknowledgementSource, Clock, DeliveryReceipt, ManualClock, MembershipSource, Notifier,
    SystemClock,
};
pub use types::{ItemPatch, NewItem, Strategy, WatchedItem};
