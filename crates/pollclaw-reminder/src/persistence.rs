//! SQLite-backed poll store.
//!
//! The engine treats storage as an external collaborator behind the
//! `PollStore` trait; this is the bundled implementation. List-valued
//! fields are JSON text columns and timestamps are rfc3339 text, so the
//! schema stays portable and greppable.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use pollclaw_core::error::{PollClawError, Result};
use pollclaw_core::traits::PollStore;
use pollclaw_core::types::{Poll, PollStatus, ResponseSummary, SlotTally};

/// SQLite persistence for polls and responses.
///
/// All statements are short; a plain mutex over the connection keeps the
/// trait object `Sync` without a pool.
pub struct SqlitePollDb {
    conn: Mutex<Connection>,
}

impl SqlitePollDb {
    /// Open or create the poll database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| PollClawError::Storage(format!("DB open: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PollClawError::Storage(format!("DB open: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                message_id TEXT,
                title TEXT NOT NULL,
                slots TEXT NOT NULL DEFAULT '[]',             -- JSON array of labels
                deadline TEXT,                                -- rfc3339, NULL = no deadline
                reminder_timings TEXT NOT NULL DEFAULT '[]',  -- JSON array of tokens
                reminder_mentions TEXT NOT NULL DEFAULT '[]', -- JSON array of tokens
                reminders_sent TEXT NOT NULL DEFAULT '[]',    -- JSON array of tokens
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                PRIMARY KEY (id, guild_id)
            );

            CREATE INDEX IF NOT EXISTS idx_polls_deadline ON polls(deadline);

            CREATE TABLE IF NOT EXISTS responses (
                poll_id TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                slot_index INTEGER NOT NULL,
                answer TEXT NOT NULL,                         -- 'yes' | 'maybe' | 'no'
                responded_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, guild_id, user_id, slot_index)
            );
         ",
            )
            .map_err(|e| PollClawError::Storage(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PollClawError::Storage("connection mutex poisoned".into()))
    }

    /// Insert or replace a poll. The CRUD layer owns creation; the helper
    /// also applies the default reminder settings so older rows never
    /// carry an empty mention list.
    pub fn save_poll(&self, poll: &Poll) -> Result<()> {
        let mut poll = poll.clone();
        if poll.reminder_mentions.is_empty() {
            poll.reminder_mentions = vec![crate::timing::DEFAULT_MENTION.to_string()];
        }
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO polls
                 (id, guild_id, channel_id, message_id, title, slots, deadline,
                  reminder_timings, reminder_mentions, reminders_sent, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    poll.id,
                    poll.guild_id,
                    poll.channel_id,
                    poll.message_id,
                    poll.title,
                    serde_json::to_string(&poll.slots)?,
                    poll.deadline.map(|d| d.to_rfc3339()),
                    serde_json::to_string(&poll.reminder_timings)?,
                    serde_json::to_string(&poll.reminder_mentions)?,
                    serde_json::to_string(&poll.reminders_sent)?,
                    poll.status.as_str(),
                    poll.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| PollClawError::Storage(format!("Save poll: {e}")))?;
        Ok(())
    }

    /// Record one user's answer for one slot.
    pub fn record_response(
        &self,
        poll_id: &str,
        guild_id: &str,
        user_id: &str,
        slot_index: usize,
        answer: &str,
    ) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO responses
                 (poll_id, guild_id, user_id, slot_index, answer, responded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    poll_id,
                    guild_id,
                    user_id,
                    slot_index as i64,
                    answer,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| PollClawError::Storage(format!("Record response: {e}")))?;
        Ok(())
    }
}

fn row_to_poll(row: &rusqlite::Row<'_>) -> rusqlite::Result<Poll> {
    let slots: String = row.get("slots")?;
    let timings: String = row.get("reminder_timings")?;
    let mentions: String = row.get("reminder_mentions")?;
    let sent: String = row.get("reminders_sent")?;
    let deadline: Option<String> = row.get("deadline")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;

    Ok(Poll {
        id: row.get("id")?,
        guild_id: row.get("guild_id")?,
        channel_id: row.get("channel_id")?,
        message_id: row.get("message_id")?,
        title: row.get("title")?,
        slots: serde_json::from_str(&slots).unwrap_or_default(),
        deadline: deadline.and_then(|d| parse_rfc3339(&d)),
        reminder_timings: serde_json::from_str(&timings).unwrap_or_default(),
        reminder_mentions: serde_json::from_str(&mentions).unwrap_or_default(),
        reminders_sent: serde_json::from_str(&sent).unwrap_or_default(),
        status: PollStatus::from_str(&status),
        total_responses: 0,
        created_at: parse_rfc3339(&created_at).unwrap_or_else(Utc::now),
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[async_trait]
impl PollStore for SqlitePollDb {
    async fn find_by_deadline_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        guild_id: Option<&str>,
    ) -> Result<Vec<Poll>> {
        let mut polls = {
            let conn = self.lock()?;
            // rfc3339 in UTC sorts lexicographically, so TEXT comparison works.
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM polls
                     WHERE deadline IS NOT NULL AND deadline >= ?1 AND deadline <= ?2
                       AND (?3 IS NULL OR guild_id = ?3)
                     ORDER BY deadline",
                )
                .map_err(|e| PollClawError::Storage(format!("Range query: {e}")))?;
            let rows = stmt
                .query_map(
                    params![start.to_rfc3339(), end.to_rfc3339(), guild_id],
                    row_to_poll,
                )
                .map_err(|e| PollClawError::Storage(format!("Range query: {e}")))?;
            rows.collect::<rusqlite::Result<Vec<Poll>>>()
                .map_err(|e| PollClawError::Storage(format!("Range query: {e}")))?
        };

        // Attach live response counts so reminder messages show them.
        for poll in &mut polls {
            poll.total_responses = self.count_responders(&poll.id, &poll.guild_id)?;
        }
        Ok(polls)
    }

    async fn get_poll(&self, poll_id: &str, guild_id: &str) -> Result<Option<Poll>> {
        let poll = self
            .lock()?
            .query_row(
                "SELECT * FROM polls WHERE id = ?1 AND guild_id = ?2",
                params![poll_id, guild_id],
                row_to_poll,
            )
            .optional()
            .map_err(|e| PollClawError::Storage(format!("Get poll: {e}")))?;
        match poll {
            Some(mut poll) => {
                poll.total_responses = self.count_responders(poll_id, guild_id)?;
                Ok(Some(poll))
            }
            None => Ok(None),
        }
    }

    async fn mark_reminder_sent(
        &self,
        poll_id: &str,
        guild_id: &str,
        token: &str,
    ) -> Result<bool> {
        // Conditional append under the connection lock: the read and the
        // write are one critical section, so overlapping passes serialize
        // here and exactly one of them sees "newly inserted".
        let conn = self.lock()?;
        let sent_json: Option<String> = conn
            .query_row(
                "SELECT reminders_sent FROM polls WHERE id = ?1 AND guild_id = ?2",
                params![poll_id, guild_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| PollClawError::Storage(format!("Mark reminder: {e}")))?;
        let Some(sent_json) = sent_json else {
            return Err(PollClawError::Storage(format!(
                "Mark reminder: poll {poll_id} not found"
            )));
        };

        let mut sent: Vec<String> = serde_json::from_str(&sent_json).unwrap_or_default();
        if sent.iter().any(|t| t == token) {
            return Ok(false);
        }
        sent.push(token.to_string());
        conn.execute(
            "UPDATE polls SET reminders_sent = ?1 WHERE id = ?2 AND guild_id = ?3",
            params![serde_json::to_string(&sent)?, poll_id, guild_id],
        )
        .map_err(|e| PollClawError::Storage(format!("Mark reminder: {e}")))?;
        Ok(true)
    }

    async fn set_status(&self, poll_id: &str, guild_id: &str, status: PollStatus) -> Result<()> {
        let changed = self
            .lock()?
            .execute(
                "UPDATE polls SET status = ?1 WHERE id = ?2 AND guild_id = ?3",
                params![status.as_str(), poll_id, guild_id],
            )
            .map_err(|e| PollClawError::Storage(format!("Set status: {e}")))?;
        if changed == 0 {
            return Err(PollClawError::Storage(format!(
                "Set status: poll {poll_id} not found"
            )));
        }
        Ok(())
    }

    async fn response_summary(&self, poll_id: &str, guild_id: &str) -> Result<ResponseSummary> {
        let slots: Vec<String> = {
            let slots_json: String = self
                .lock()?
                .query_row(
                    "SELECT slots FROM polls WHERE id = ?1 AND guild_id = ?2",
                    params![poll_id, guild_id],
                    |row| row.get(0),
                )
                .map_err(|e| PollClawError::Storage(format!("Summary: {e}")))?;
            serde_json::from_str(&slots_json).unwrap_or_default()
        };

        let mut tallies: Vec<SlotTally> = slots
            .iter()
            .map(|label| SlotTally { label: label.clone(), yes: 0, maybe: 0, no: 0 })
            .collect();

        {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT slot_index, answer, COUNT(*) FROM responses
                     WHERE poll_id = ?1 AND guild_id = ?2
                     GROUP BY slot_index, answer",
                )
                .map_err(|e| PollClawError::Storage(format!("Summary: {e}")))?;
            let rows = stmt
                .query_map(params![poll_id, guild_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)? as usize,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as u32,
                    ))
                })
                .map_err(|e| PollClawError::Storage(format!("Summary: {e}")))?;
            for row in rows {
                let (idx, answer, count) =
                    row.map_err(|e| PollClawError::Storage(format!("Summary: {e}")))?;
                if let Some(tally) = tallies.get_mut(idx) {
                    match answer.as_str() {
                        "yes" => tally.yes += count,
                        "maybe" => tally.maybe += count,
                        _ => tally.no += count,
                    }
                }
            }
        }

        let total_responses = self.count_responders(poll_id, guild_id)?;
        let best_slot = tallies
            .iter()
            .enumerate()
            .filter(|(_, t)| t.yes > 0)
            .max_by(|(ia, a), (ib, b)| a.yes.cmp(&b.yes).then(ib.cmp(ia)))
            .map(|(i, _)| i);

        Ok(ResponseSummary { total_responses, slots: tallies, best_slot })
    }
}

impl SqlitePollDb {
    fn count_responders(&self, poll_id: &str, guild_id: &str) -> Result<u32> {
        let count: i64 = self
            .lock()?
            .query_row(
                "SELECT COUNT(DISTINCT user_id) FROM responses
                 WHERE poll_id = ?1 AND guild_id = ?2",
                params![poll_id, guild_id],
                |row| row.get(0),
            )
            .map_err(|e| PollClawError::Storage(format!("Count responses: {e}")))?;
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_poll(id: &str, deadline: &str) -> Poll {
        let mut poll = Poll::new(id, "g1", "c1", "offsite");
        poll.slots = vec!["Sat 19:00".into(), "Sun 14:00".into()];
        poll.deadline = Some(deadline.parse().unwrap());
        poll.reminder_timings = vec!["3d".into(), "1d".into()];
        poll
    }

    #[tokio::test]
    async fn range_query_respects_bounds() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("inside", "2024-12-31T12:00:00Z")).unwrap();
        db.save_poll(&sample_poll("before", "2024-12-01T12:00:00Z")).unwrap();
        db.save_poll(&sample_poll("after", "2025-02-01T12:00:00Z")).unwrap();
        let mut no_deadline = Poll::new("none", "g1", "c1", "undated");
        no_deadline.deadline = None;
        db.save_poll(&no_deadline).unwrap();

        let polls = db
            .find_by_deadline_range(
                "2024-12-24T00:00:00Z".parse().unwrap(),
                "2025-01-03T00:00:00Z".parse().unwrap(),
                None,
            )
            .await
            .unwrap();
        let ids: Vec<&str> = polls.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["inside"]);
    }

    #[tokio::test]
    async fn range_query_can_filter_by_guild() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        let mut other = sample_poll("other", "2024-12-31T12:00:00Z");
        other.guild_id = "g2".into();
        db.save_poll(&sample_poll("mine", "2024-12-31T12:00:00Z")).unwrap();
        db.save_poll(&other).unwrap();

        let polls = db
            .find_by_deadline_range(
                "2024-12-24T00:00:00Z".parse().unwrap(),
                "2025-01-03T00:00:00Z".parse().unwrap(),
                Some("g2"),
            )
            .await
            .unwrap();
        assert_eq!(polls.len(), 1);
        assert_eq!(polls[0].id, "other");
    }

    #[tokio::test]
    async fn mark_reminder_sent_is_conditional() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("p1", "2024-12-31T12:00:00Z")).unwrap();

        assert!(db.mark_reminder_sent("p1", "g1", "3d").await.unwrap());
        // Second mark for the same token is a no-op.
        assert!(!db.mark_reminder_sent("p1", "g1", "3d").await.unwrap());
        assert!(db.mark_reminder_sent("p1", "g1", "1d").await.unwrap());

        let poll = db.get_poll("p1", "g1").await.unwrap().unwrap();
        assert_eq!(poll.reminders_sent, vec!["3d".to_string(), "1d".to_string()]);
    }

    #[tokio::test]
    async fn mark_reminder_sent_unknown_poll_errors() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        assert!(db.mark_reminder_sent("ghost", "g1", "3d").await.is_err());
    }

    #[tokio::test]
    async fn status_transition_persists() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("p1", "2024-12-31T12:00:00Z")).unwrap();
        db.set_status("p1", "g1", PollStatus::Closed).await.unwrap();
        let poll = db.get_poll("p1", "g1").await.unwrap().unwrap();
        assert_eq!(poll.status, PollStatus::Closed);
    }

    #[tokio::test]
    async fn summary_tallies_and_picks_best_slot() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("p1", "2024-12-31T12:00:00Z")).unwrap();
        // Slot 1 wins on yes votes.
        db.record_response("p1", "g1", "alice", 0, "yes").unwrap();
        db.record_response("p1", "g1", "alice", 1, "yes").unwrap();
        db.record_response("p1", "g1", "bob", 0, "no").unwrap();
        db.record_response("p1", "g1", "bob", 1, "yes").unwrap();
        db.record_response("p1", "g1", "carol", 1, "maybe").unwrap();

        let summary = db.response_summary("p1", "g1").await.unwrap();
        assert_eq!(summary.total_responses, 3);
        assert_eq!(summary.best_slot, Some(1));
        assert_eq!(summary.slots[0].yes, 1);
        assert_eq!(summary.slots[0].no, 1);
        assert_eq!(summary.slots[1].yes, 2);
        assert_eq!(summary.slots[1].maybe, 1);
    }

    #[tokio::test]
    async fn summary_tie_break_prefers_earliest_slot() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("p1", "2024-12-31T12:00:00Z")).unwrap();
        db.record_response("p1", "g1", "alice", 0, "yes").unwrap();
        db.record_response("p1", "g1", "alice", 1, "yes").unwrap();
        let summary = db.response_summary("p1", "g1").await.unwrap();
        assert_eq!(summary.best_slot, Some(0));
    }

    #[tokio::test]
    async fn summary_with_no_responses_has_no_best_slot() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("p1", "2024-12-31T12:00:00Z")).unwrap();
        let summary = db.response_summary("p1", "g1").await.unwrap();
        assert_eq!(summary.total_responses, 0);
        assert_eq!(summary.best_slot, None);
    }

    #[tokio::test]
    async fn save_poll_applies_default_mentions() {
        let db = SqlitePollDb::open_in_memory().unwrap();
        db.save_poll(&sample_poll("p1", "2024-12-31T12:00:00Z")).unwrap();
        let poll = db.get_poll("p1", "g1").await.unwrap().unwrap();
        assert_eq!(poll.reminder_mentions, vec!["@everyone".to_string()]);
    }
}
