//! Poll data model and the ephemeral values passed between engine stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reminder lead times applied when a poll has none configured.
pub const DEFAULT_TIMINGS: [&str; 3] = ["3d", "1d", "8h"];

/// Mention token applied when a poll has none configured.
pub const DEFAULT_MENTION: &str = "@everyone";

/// Poll status. The engine only ever moves Open → Closed; reopening is an
/// administrative action outside this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Open,
    Closed,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Open => "open",
            PollStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "closed" => PollStatus::Closed,
            _ => PollStatus::Open,
        }
    }
}

/// A group scheduling poll — the subset of fields the reminder engine
/// reads. The engine writes back exactly two of them through the store:
/// `reminders_sent` (append-only) and `status` (Open → Closed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    /// Community (guild) the poll belongs to.
    pub guild_id: String,
    /// Channel where the poll message lives and reminders are posted.
    pub channel_id: String,
    /// Message id of the original poll post, if it was ever sent.
    pub message_id: Option<String>,
    pub title: String,
    /// Candidate slot labels, in display order.
    pub slots: Vec<String>,
    /// Response deadline. `None` disables reminders and auto-closure.
    pub deadline: Option<DateTime<Utc>>,
    /// Reminder lead-time tokens ("3d", "8h", "30m"), in dispatch order.
    /// Empty means the default set applies.
    pub reminder_timings: Vec<String>,
    /// Mention tokens prepended to reminder messages.
    pub reminder_mentions: Vec<String>,
    /// Tokens already dispatched. Invariant: subset of the effective
    /// timing set; append-only.
    pub reminders_sent: Vec<String>,
    pub status: PollStatus,
    pub total_responses: u32,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    /// Create an open poll with a deadline and default reminder settings.
    pub fn new(id: &str, guild_id: &str, channel_id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            message_id: None,
            title: title.to_string(),
            slots: Vec::new(),
            deadline: None,
            reminder_timings: Vec::new(),
            reminder_mentions: Vec::new(),
            reminders_sent: Vec::new(),
            status: PollStatus::Open,
            total_responses: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PollStatus::Open
    }
}

/// A reminder the evaluator decided is due right now. Ephemeral: created
/// and consumed within one orchestration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderDue {
    pub poll_id: String,
    pub guild_id: String,
    /// The timing token that triggered ("3d", "8h", ...).
    pub token: String,
    /// Templated body for the reminder message.
    pub message: String,
}

/// A poll the evaluator decided should auto-close now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureDue {
    pub poll_id: String,
    pub guild_id: String,
}

/// Aggregate result of one batch-processor run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Items that completed successfully (possibly after retries).
    pub processed: usize,
    /// Total retry attempts performed.
    pub retried: usize,
    /// Items never started because the pass ran out of time budget.
    pub skipped: usize,
    /// Permanently failed items: (item label, final error message).
    pub errors: Vec<(String, String)>,
}

/// Per-slot response tally for the closure summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTally {
    pub label: String,
    pub yes: u32,
    pub maybe: u32,
    pub no: u32,
}

/// Overall tally for a poll, as produced by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub total_responses: u32,
    pub slots: Vec<SlotTally>,
    /// Index into `slots` of the best slot (most yes votes, earliest slot
    /// wins ties), if anyone responded at all.
    pub best_slot: Option<usize>,
}

/// A community member as returned by the message gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub display_name: String,
}

/// An outbound chat message: plain content, optional embed payload,
/// optional reference to an earlier message in the same channel.
#[derive(Debug, Clone, Default)]
pub struct MessagePayload {
    pub content: String,
    pub embed: Option<serde_json::Value>,
    pub reply_to: Option<String>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            embed: None,
            reply_to: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_poll_is_open_with_empty_reminder_state() {
        let poll = Poll::new("p1", "g1", "c1", "offsite");
        assert!(poll.is_open());
        assert!(poll.deadline.is_none());
        assert!(poll.reminder_timings.is_empty());
        assert!(poll.reminders_sent.is_empty());
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(PollStatus::from_str("closed"), PollStatus::Closed);
        assert_eq!(PollStatus::from_str("open"), PollStatus::Open);
        assert_eq!(PollStatus::from_str(PollStatus::Closed.as_str()), PollStatus::Closed);
    }
}
