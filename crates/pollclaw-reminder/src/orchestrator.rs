//! The periodic entry point: one pass over everything with a deadline in
//! the query window, reminder and closure dispatch fanned out through the
//! batch processor.
//!
//! A pass never raises to its trigger — every failure is either isolated
//! per item by the batch processor or logged and swallowed here. The only
//! total skip is missing credentials.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use pollclaw_core::config::PollClawConfig;
use pollclaw_core::error::PollClawError;
use pollclaw_core::traits::{Notifier, PollStore};
use pollclaw_core::types::{ClosureDue, PollStatus, ReminderDue};

use crate::batch::{run_batched, BatchOptions};
use crate::evaluate::evaluate;

/// A closure counts as delayed when it happens this long after the
/// deadline; the followup wording changes accordingly.
const DELAYED_CLOSE_AFTER: chrono::Duration = chrono::Duration::hours(1);

/// Aggregate counters from one pass. Side effects and logs are the real
/// output; this exists so callers and tests can assert on them.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Whole pass skipped (missing credentials).
    pub pass_skipped: bool,
    pub polls_scanned: usize,
    pub reminders_due: usize,
    /// Reminders actually dispatched.
    pub reminders_sent: usize,
    /// Reminders another pass had already marked sent.
    pub already_sent: usize,
    pub reminder_errors: usize,
    pub closures_due: usize,
    pub polls_closed: usize,
    pub closure_errors: usize,
    /// Items never started because the pass ran out of budget.
    pub budget_skipped: usize,
}

/// Drives evaluate → dispatch → persist for every poll in the window.
pub struct Orchestrator {
    store: Arc<dyn PollStore>,
    notifier: Arc<dyn Notifier>,
    config: PollClawConfig,
}

impl Orchestrator {
    pub fn new(
        config: PollClawConfig,
        store: Arc<dyn PollStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { store, notifier, config }
    }

    /// Run one pass at instant `now` (injected for testability).
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();

        if self.config.discord.bot_token.is_empty() {
            tracing::error!("no bot token configured, skipping reminder pass");
            report.pass_skipped = true;
            return report;
        }

        let rc = &self.config.reminder;
        let start = now - chrono::Duration::days(rc.lookbehind_days);
        let end = now + chrono::Duration::days(rc.lookahead_days);
        let polls = match self.store.find_by_deadline_range(start, end, None).await {
            Ok(polls) => polls,
            Err(e) => {
                // Query failure aborts the pass; acting on a partial poll
                // set could mis-skip reminders.
                tracing::error!(error = %e, "deadline range query failed, skipping pass");
                return report;
            }
        };
        report.polls_scanned = polls.len();

        let mut reminders: Vec<ReminderDue> = Vec::new();
        let mut closures: Vec<ClosureDue> = Vec::new();
        for poll in &polls {
            let eval = evaluate(poll, now);
            reminders.extend(eval.due);
            if eval.should_close {
                closures.push(ClosureDue {
                    poll_id: poll.id.clone(),
                    guild_id: poll.guild_id.clone(),
                });
            }
        }
        report.reminders_due = reminders.len();
        report.closures_due = closures.len();

        if reminders.is_empty() && closures.is_empty() {
            tracing::debug!(polls = report.polls_scanned, "nothing due this pass");
            return report;
        }

        let budget_deadline = (rc.pass_budget_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(rc.pass_budget_secs));
        let delay = Duration::from_millis(rc.batch_delay_ms);

        // Reminders first: they are time-sensitive, closures can wait a tick.
        let already_sent = Arc::new(AtomicUsize::new(0));
        // Marks this pass won. A retry after a failed send must not
        // mistake its own earlier mark for another pass's and skip.
        let owned_marks: Arc<std::sync::Mutex<std::collections::HashSet<(String, String)>>> =
            Arc::default();
        let mut opts = BatchOptions::new(rc.reminder_batch_size, rc.max_retries)
            .with_delay(delay)
            .with_retry_if(Arc::new(|_: &ReminderDue, err: &PollClawError, _| {
                err.is_retryable()
            }));
        if let Some(deadline) = budget_deadline {
            opts = opts.with_deadline(deadline);
        }
        let skips = already_sent.clone();
        let owned = owned_marks.clone();
        let outcome = run_batched(
            reminders,
            opts,
            |due| format!("{}:{}", due.poll_id, due.token),
            |due| {
                let skips = skips.clone();
                let owned = owned.clone();
                async move { self.send_one_reminder(due, skips, owned).await }
            },
        )
        .await;
        report.already_sent = already_sent.load(Ordering::SeqCst);
        report.reminders_sent = outcome.processed - report.already_sent;
        report.reminder_errors = outcome.errors.len();
        report.budget_skipped += outcome.skipped;

        let mut opts = BatchOptions::new(rc.close_batch_size, rc.max_retries)
            .with_delay(delay)
            .with_retry_if(Arc::new(|_: &ClosureDue, err: &PollClawError, _| {
                err.is_retryable()
            }));
        if let Some(deadline) = budget_deadline {
            opts = opts.with_deadline(deadline);
        }
        let outcome = run_batched(
            closures,
            opts,
            |due| due.poll_id.clone(),
            |due| async move { self.close_one_poll(due, now).await },
        )
        .await;
        report.polls_closed = outcome.processed;
        report.closure_errors = outcome.errors.len();
        report.budget_skipped += outcome.skipped;

        tracing::info!(
            polls = report.polls_scanned,
            reminders_sent = report.reminders_sent,
            already_sent = report.already_sent,
            reminder_errors = report.reminder_errors,
            closed = report.polls_closed,
            closure_errors = report.closure_errors,
            budget_skipped = report.budget_skipped,
            "reminder pass complete"
        );
        report
    }

    /// Reminder worker: conditional mark first, then dispatch. The store
    /// is the idempotency source of truth — when the token was already
    /// present another pass owns this reminder and we skip silently.
    async fn send_one_reminder(
        &self,
        due: ReminderDue,
        already_sent: Arc<AtomicUsize>,
        owned_marks: Arc<std::sync::Mutex<std::collections::HashSet<(String, String)>>>,
    ) -> Result<(), PollClawError> {
        let key = (due.poll_id.clone(), due.token.clone());
        let owns = owned_marks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key);
        if !owns {
            let newly = self
                .store
                .mark_reminder_sent(&due.poll_id, &due.guild_id, &due.token)
                .await?;
            if !newly {
                tracing::debug!(
                    poll_id = %due.poll_id,
                    token = %due.token,
                    "reminder already marked sent, skipping dispatch"
                );
                already_sent.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            owned_marks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key);
        }

        // Fresh snapshot so the message shows the current response count.
        let poll = self
            .store
            .get_poll(&due.poll_id, &due.guild_id)
            .await?
            .ok_or_else(|| {
                PollClawError::Storage(format!("poll {} vanished mid-pass", due.poll_id))
            })?;
        self.notifier.send_reminder(&poll, &due.token, &due.message).await?;
        tracing::info!(poll_id = %due.poll_id, token = %due.token, "reminder sent");
        Ok(())
    }

    /// Closure worker: transition first so a summary failure can never
    /// leave a closed-looking poll open; re-running after a partial
    /// failure is harmless because the transition is idempotent.
    async fn close_one_poll(
        &self,
        due: ClosureDue,
        now: DateTime<Utc>,
    ) -> Result<(), PollClawError> {
        let poll = self
            .store
            .get_poll(&due.poll_id, &due.guild_id)
            .await?
            .ok_or_else(|| {
                PollClawError::Storage(format!("poll {} vanished mid-pass", due.poll_id))
            })?;

        self.store
            .set_status(&due.poll_id, &due.guild_id, PollStatus::Closed)
            .await?;
        let mut closed = poll;
        closed.status = PollStatus::Closed;

        self.notifier.send_closure_summary(&closed).await?;
        let delayed = closed
            .deadline
            .map(|d| now - d > DELAYED_CLOSE_AFTER)
            .unwrap_or(false);
        self.notifier.send_followup(&closed, delayed).await?;
        tracing::info!(poll_id = %due.poll_id, delayed, "poll closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pollclaw_core::types::{Poll, ResponseSummary};
    use std::sync::Mutex;

    use crate::persistence::SqlitePollDb;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Reminder { poll_id: String, token: String },
        Summary { poll_id: String },
        Followup { poll_id: String, delayed: bool },
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Sent>>,
        fail_reminders: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_reminder(&self, poll: &Poll, token: &str, _message: &str) -> pollclaw_core::Result<()> {
            if self.fail_reminders {
                return Err(PollClawError::Channel("gateway down".into()));
            }
            self.sent.lock().unwrap().push(Sent::Reminder {
                poll_id: poll.id.clone(),
                token: token.to_string(),
            });
            Ok(())
        }

        async fn send_closure_summary(&self, poll: &Poll) -> pollclaw_core::Result<()> {
            self.sent.lock().unwrap().push(Sent::Summary { poll_id: poll.id.clone() });
            Ok(())
        }

        async fn send_followup(&self, poll: &Poll, delayed: bool) -> pollclaw_core::Result<()> {
            self.sent.lock().unwrap().push(Sent::Followup {
                poll_id: poll.id.clone(),
                delayed,
            });
            Ok(())
        }
    }

    /// Store whose snapshots are always stale: reads never show the token
    /// as sent, but the conditional mark reports another pass already
    /// inserted it.
    struct RacedStore {
        poll: Poll,
    }

    #[async_trait]
    impl PollStore for RacedStore {
        async fn find_by_deadline_range(
            &self,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
            _: Option<&str>,
        ) -> pollclaw_core::Result<Vec<Poll>> {
            Ok(vec![self.poll.clone()])
        }

        async fn get_poll(&self, _: &str, _: &str) -> pollclaw_core::Result<Option<Poll>> {
            Ok(Some(self.poll.clone()))
        }

        async fn mark_reminder_sent(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> pollclaw_core::Result<bool> {
            Ok(false)
        }

        async fn set_status(
            &self,
            _: &str,
            _: &str,
            _: PollStatus,
        ) -> pollclaw_core::Result<()> {
            Ok(())
        }

        async fn response_summary(
            &self,
            _: &str,
            _: &str,
        ) -> pollclaw_core::Result<ResponseSummary> {
            Ok(ResponseSummary::default())
        }
    }

    fn test_config() -> PollClawConfig {
        let mut config = PollClawConfig::default();
        config.discord.bot_token = "test-token".into();
        config.reminder.batch_delay_ms = 0;
        config
    }

    fn store_with(polls: &[Poll]) -> Arc<SqlitePollDb> {
        let db = SqlitePollDb::open_in_memory().unwrap();
        for poll in polls {
            db.save_poll(poll).unwrap();
        }
        Arc::new(db)
    }

    fn poll_due_3d() -> Poll {
        let mut poll = Poll::new("p1", "g1", "c1", "offsite");
        poll.deadline = Some("2024-12-31T23:59:59Z".parse().unwrap());
        poll.reminder_timings = vec!["3d".into(), "1d".into(), "8h".into()];
        poll
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn sends_due_reminder_and_marks_it() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store.clone(), notifier.clone());

        let report = orch.run_once(at("2024-12-29T00:00:00Z")).await;
        assert_eq!(report.reminders_due, 1);
        assert_eq!(report.reminders_sent, 1);
        assert_eq!(report.reminder_errors, 0);

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![Sent::Reminder { poll_id: "p1".into(), token: "3d".into() }]
        );
        let poll = store.get_poll("p1", "g1").await.unwrap().unwrap();
        assert_eq!(poll.reminders_sent, vec!["3d".to_string()]);
    }

    #[tokio::test]
    async fn second_pass_is_idempotent() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store, notifier.clone());

        let now = at("2024-12-29T00:00:00Z");
        orch.run_once(now).await;
        let report = orch.run_once(now).await;
        // Evaluation already sees the token in reminders_sent.
        assert_eq!(report.reminders_due, 0);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_decision_marked_elsewhere_is_skipped() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store.clone(), notifier.clone());

        // Another pass marks the token between our evaluate and dispatch.
        store.mark_reminder_sent("p1", "g1", "3d").await.unwrap();
        let report = orch.run_once(at("2024-12-29T00:00:00Z")).await;
        // Evaluation ran on a pre-mark snapshot only if it raced; here the
        // store already shows the mark, so nothing is due at all.
        assert_eq!(report.reminders_sent, 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_lost_mid_pass_skips_dispatch() {
        // Evaluation ran on a snapshot taken before another pass marked
        // the token: the reminder is due, the mark comes back "already
        // present", and dispatch is skipped silently.
        let store = Arc::new(RacedStore { poll: poll_due_3d() });
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store, notifier.clone());

        let report = orch.run_once(at("2024-12-29T00:00:00Z")).await;
        assert_eq!(report.reminders_due, 1);
        assert_eq!(report.already_sent, 1);
        assert_eq!(report.reminders_sent, 0);
        assert_eq!(report.reminder_errors, 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closes_poll_inside_grace_window() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store.clone(), notifier.clone());

        let report = orch.run_once(at("2025-01-01T02:00:00Z")).await;
        assert_eq!(report.closures_due, 1);
        assert_eq!(report.polls_closed, 1);

        let poll = store.get_poll("p1", "g1").await.unwrap().unwrap();
        assert_eq!(poll.status, PollStatus::Closed);
        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent[0], Sent::Summary { poll_id: "p1".into() });
        // 2h past the deadline is beyond the 1h delayed threshold.
        assert_eq!(sent[1], Sent::Followup { poll_id: "p1".into(), delayed: true });
    }

    #[tokio::test]
    async fn prompt_closure_is_not_delayed() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store, notifier.clone());

        orch.run_once(at("2025-01-01T00:30:00Z")).await;
        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent[1], Sent::Followup { poll_id: "p1".into(), delayed: false });
    }

    #[tokio::test]
    async fn stale_poll_stays_open() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let orch = Orchestrator::new(test_config(), store.clone(), notifier);

        let report = orch.run_once(at("2025-01-01T12:00:00Z")).await;
        assert_eq!(report.closures_due, 0);
        let poll = store.get_poll("p1", "g1").await.unwrap().unwrap();
        assert_eq!(poll.status, PollStatus::Open);
    }

    #[tokio::test]
    async fn missing_token_skips_whole_pass() {
        let store = store_with(&[poll_due_3d()]);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = test_config();
        config.discord.bot_token = String::new();
        let orch = Orchestrator::new(config, store.clone(), notifier.clone());

        let report = orch.run_once(at("2024-12-29T00:00:00Z")).await;
        assert!(report.pass_skipped);
        assert!(notifier.sent.lock().unwrap().is_empty());
        let poll = store.get_poll("p1", "g1").await.unwrap().unwrap();
        assert!(poll.reminders_sent.is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_is_isolated_and_reported() {
        let mut other = poll_due_3d();
        other.id = "p2".into();
        let store = store_with(&[poll_due_3d(), other]);
        let notifier = Arc::new(RecordingNotifier {
            fail_reminders: true,
            ..Default::default()
        });
        let orch = Orchestrator::new(test_config(), store.clone(), notifier);

        let report = orch.run_once(at("2024-12-29T00:00:00Z")).await;
        assert_eq!(report.reminders_due, 2);
        assert_eq!(report.reminders_sent, 0);
        assert_eq!(report.reminder_errors, 2);
    }
}
