//! # PollClaw Core
//!
//! Shared plumbing for the PollClaw workspace: the poll data model, the
//! error taxonomy, process configuration, and the async traits that seam
//! the engine off from its collaborators (storage, message gateway,
//! notification dispatcher).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::PollClawConfig;
pub use error::{PollClawError, Result};
pub use traits::{MessageGateway, Notifier, PollStore};
pub use types::{
    BatchOutcome, ClosureDue, Member, MessagePayload, Poll, PollStatus, ReminderDue,
    ResponseSummary, SlotTally, DEFAULT_MENTION, DEFAULT_TIMINGS,
};
