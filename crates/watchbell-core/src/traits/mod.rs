//! Collaborator traits the scheduling core calls out to.

pub mod clock;
pub mod directory;
pub mod notifier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{AcknowledgementSource, MembershipSource};
pub use notifier::{DeliveryReceipt, Notifier};
