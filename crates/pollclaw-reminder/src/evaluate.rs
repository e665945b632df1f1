//! The reminder/closure evaluator — the pure heart of the engine.
//!
//! `evaluate(poll, now)` decides, from a poll snapshot alone, which
//! reminders are due at this instant and whether the poll should
//! auto-close. No I/O, no clock reads: `now` is injected so passes are
//! reproducible and testable.

use chrono::{DateTime, Duration, Utc};

use pollclaw_core::types::{Poll, ReminderDue};

use crate::timing::{Timing, DEFAULT_TIMINGS};

/// Auto-closure grace: a deadline missed by more than this is left for an
/// administrative sweep instead of being closed long after the fact.
pub const CLOSE_GRACE: Duration = Duration::hours(8);

/// What one evaluation pass decided for one poll.
#[derive(Debug, Default, PartialEq)]
pub struct Evaluation {
    /// Due reminders in the poll's configured timing order.
    pub due: Vec<ReminderDue>,
    pub should_close: bool,
}

/// Evaluate one poll snapshot at instant `now`.
pub fn evaluate(poll: &Poll, now: DateTime<Utc>) -> Evaluation {
    let Some(deadline) = poll.deadline else {
        return Evaluation::default();
    };
    if !poll.is_open() {
        return Evaluation::default();
    }

    if now >= deadline {
        // Past-deadline branch: no reminders, maybe a closure.
        let should_close = now - deadline <= CLOSE_GRACE;
        if !should_close {
            tracing::debug!(
                poll_id = %poll.id,
                missed_by_hours = (now - deadline).num_hours(),
                "deadline missed beyond the closure grace, leaving open"
            );
        }
        return Evaluation { due: Vec::new(), should_close };
    }

    let configured: Vec<&str> = if poll.reminder_timings.is_empty() {
        DEFAULT_TIMINGS.to_vec()
    } else {
        poll.reminder_timings.iter().map(String::as_str).collect()
    };

    let mut due = Vec::new();
    for token in configured {
        let Some(timing) = Timing::parse(token) else {
            tracing::debug!(poll_id = %poll.id, token, "skipping malformed timing token");
            continue;
        };
        if poll.reminders_sent.iter().any(|s| s == token) {
            continue;
        }

        let trigger = deadline - timing.offset();
        if now < trigger {
            tracing::debug!(poll_id = %poll.id, token, "reminder not yet due");
            continue;
        }
        if now - trigger > timing.skip_window() {
            tracing::debug!(
                poll_id = %poll.id,
                token,
                late_minutes = (now - trigger).num_minutes(),
                "reminder past its staleness window, dropping"
            );
            continue;
        }

        due.push(ReminderDue {
            poll_id: poll.id.clone(),
            guild_id: poll.guild_id.clone(),
            token: token.to_string(),
            message: format!("⏰ {} — {}", poll.title, timing.label()),
        });
    }

    Evaluation { due, should_close: false }
}
