//! Collaborator seams.
//!
//! The engine talks to the outside world through three object-safe async
//! traits: the poll store (persistence), the message gateway (the chat
//! platform's REST API), and the notifier (message composition + send).
//! Everything is plain constructor injection behind `Arc<dyn ...>` — six
//! fixed collaborators need no registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Member, MessagePayload, Poll, PollStatus, ResponseSummary};

/// Persistent poll storage, as consumed by the reminder engine.
///
/// The engine only reads snapshots and writes back two narrow fields:
/// the sent-reminder set (append) and the status (Open → Closed).
#[async_trait]
pub trait PollStore: Send + Sync {
    /// Polls whose deadline falls inside `[start, end]`, optionally
    /// restricted to one guild.
    async fn find_by_deadline_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        guild_id: Option<&str>,
    ) -> Result<Vec<Poll>>;

    /// Fetch a single poll snapshot.
    async fn get_poll(&self, poll_id: &str, guild_id: &str) -> Result<Option<Poll>>;

    /// Conditionally append `token` to the poll's sent set.
    ///
    /// Returns `true` iff the token was newly inserted. This is the sole
    /// idempotency guard: callers must skip dispatch when it returns
    /// `false`, so two overlapping passes can never send the same
    /// reminder twice.
    async fn mark_reminder_sent(&self, poll_id: &str, guild_id: &str, token: &str)
        -> Result<bool>;

    /// Update the poll status.
    async fn set_status(&self, poll_id: &str, guild_id: &str, status: PollStatus) -> Result<()>;

    /// Current response tally for the closure summary.
    async fn response_summary(&self, poll_id: &str, guild_id: &str) -> Result<ResponseSummary>;
}

/// The outbound chat platform API.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Send a message to a channel; returns the new message id.
    async fn send_channel_message(&self, channel_id: &str, payload: &MessagePayload)
        -> Result<String>;

    /// Full member list for a guild. Pagination is handled inside the
    /// gateway; callers always see the complete list.
    async fn list_guild_members(&self, guild_id: &str) -> Result<Vec<Member>>;
}

/// Message composition and delivery for the orchestrator's workers.
///
/// Each method performs exactly one outbound call and propagates failure
/// to the caller — retry policy lives in the batch processor, not here.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a deadline reminder for `token` to the poll's channel.
    async fn send_reminder(&self, poll: &Poll, token: &str, message: &str) -> Result<()>;

    /// Post the per-slot result breakdown after a poll closed.
    async fn send_closure_summary(&self, poll: &Poll) -> Result<()>;

    /// Post a short closure notice. `delayed` switches the wording when
    /// the closure happened well after the deadline.
    async fn send_followup(&self, poll: &Poll, delayed: bool) -> Result<()>;
}
