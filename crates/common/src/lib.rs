//! Shared building blocks used by every crate in the workspace.

pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use types::AggregateId;
