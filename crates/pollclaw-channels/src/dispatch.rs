//! Notification composition and delivery.
//!
//! Each method performs one outbound call; failures propagate so the
//! batch processor upstream can decide about retries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pollclaw_core::error::Result;
use pollclaw_core::traits::{MessageGateway, Notifier, PollStore};
use pollclaw_core::types::{MessagePayload, Poll, ResponseSummary, DEFAULT_MENTION};

use crate::mentions::MentionResolver;

const EMBED_COLOR_REMINDER: u32 = 0x00AAFF;
const EMBED_COLOR_SUMMARY: u32 = 0x55CC77;

/// Composes reminder, summary, and followup messages and sends them
/// through the gateway.
pub struct NotificationDispatcher {
    gateway: Arc<dyn MessageGateway>,
    store: Arc<dyn PollStore>,
    resolver: MentionResolver,
}

impl NotificationDispatcher {
    pub fn new(
        gateway: Arc<dyn MessageGateway>,
        store: Arc<dyn PollStore>,
        resolver: MentionResolver,
    ) -> Self {
        Self { gateway, store, resolver }
    }

    async fn mention_line(&self, poll: &Poll) -> String {
        let tokens = if poll.reminder_mentions.is_empty() {
            vec![DEFAULT_MENTION.to_string()]
        } else {
            poll.reminder_mentions.clone()
        };
        self.resolver.resolve(&tokens, &poll.guild_id).await.join(" ")
    }

    fn format_deadline(deadline: Option<DateTime<Utc>>) -> String {
        match deadline {
            Some(d) => d.format("%Y-%m-%d %H:%M UTC").to_string(),
            None => "—".to_string(),
        }
    }

    fn summary_description(summary: &ResponseSummary) -> String {
        let mut lines = Vec::with_capacity(summary.slots.len() + 1);
        for (i, slot) in summary.slots.iter().enumerate() {
            let marker = if summary.best_slot == Some(i) { "⭐ " } else { "" };
            lines.push(format!(
                "{}{} — ✅ {} / 🤔 {} / ❌ {}",
                marker, slot.label, slot.yes, slot.maybe, slot.no
            ));
        }
        if summary.slots.is_empty() || summary.best_slot.is_none() {
            lines.push("No slot has a clear winner yet.".to_string());
        }
        lines.join("\n")
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    async fn send_reminder(&self, poll: &Poll, token: &str, message: &str) -> Result<()> {
        let mentions = self.mention_line(poll).await;
        let payload = MessagePayload {
            content: format!("{mentions}\n{message}"),
            embed: Some(serde_json::json!({
                "title": poll.title,
                "color": EMBED_COLOR_REMINDER,
                "fields": [
                    {
                        "name": "Deadline",
                        "value": Self::format_deadline(poll.deadline),
                        "inline": true,
                    },
                    {
                        "name": "Responses so far",
                        "value": poll.total_responses.to_string(),
                        "inline": true,
                    },
                ],
            })),
            reply_to: poll.message_id.clone(),
        };
        let message_id = self
            .gateway
            .send_channel_message(&poll.channel_id, &payload)
            .await?;
        tracing::debug!(poll_id = %poll.id, token, message_id, "reminder dispatched");
        Ok(())
    }

    async fn send_closure_summary(&self, poll: &Poll) -> Result<()> {
        let summary = self.store.response_summary(&poll.id, &poll.guild_id).await?;
        let mentions = self.mention_line(poll).await;
        let best = summary
            .best_slot
            .and_then(|i| summary.slots.get(i))
            .map(|slot| format!("Best slot: **{}**", slot.label));

        let mut content = format!("{mentions}\n📊 **{}** has closed.", poll.title);
        if let Some(best) = best {
            content.push('\n');
            content.push_str(&best);
        }

        let payload = MessagePayload {
            content,
            embed: Some(serde_json::json!({
                "title": format!("{} — results", poll.title),
                "description": Self::summary_description(&summary),
                "color": EMBED_COLOR_SUMMARY,
                "footer": { "text": format!("{} responses", summary.total_responses) },
            })),
            reply_to: poll.message_id.clone(),
        };
        self.gateway
            .send_channel_message(&poll.channel_id, &payload)
            .await?;
        tracing::debug!(poll_id = %poll.id, "closure summary dispatched");
        Ok(())
    }

    async fn send_followup(&self, poll: &Poll, delayed: bool) -> Result<()> {
        let text = if delayed {
            format!(
                "🗳 **{}** was closed automatically (its deadline had already passed).",
                poll.title
            )
        } else {
            format!("🗳 **{}** is now closed. Thanks for responding!", poll.title)
        };
        self.gateway
            .send_channel_message(&poll.channel_id, &MessagePayload::text(text))
            .await?;
        Ok(())
    }
}
