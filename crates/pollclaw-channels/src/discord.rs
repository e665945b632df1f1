//! Discord REST gateway — message sending + member listing via the bot API.

use async_trait::async_trait;
use serde::Deserialize;

use pollclaw_core::config::DiscordConfig;
use pollclaw_core::error::{PollClawError, Result};
use pollclaw_core::traits::MessageGateway;
use pollclaw_core::types::{Member, MessagePayload};

/// Largest page the member listing endpoint allows.
const MEMBER_PAGE_LIMIT: usize = 1000;

/// Discord bot REST client.
pub struct DiscordApi {
    config: DiscordConfig,
    client: reqwest::Client,
}

impl DiscordApi {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.config.bot_token)
    }

    fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.request_timeout_secs)
    }

    /// One page of the member listing, keyed after `after` (exclusive).
    async fn member_page(&self, guild_id: &str, after: &str) -> Result<Vec<DiscordMember>> {
        let response = self
            .client
            .get(self.api_url(&format!("/guilds/{guild_id}/members")))
            .header("Authorization", self.auth_header())
            .query(&[("limit", MEMBER_PAGE_LIMIT.to_string()), ("after", after.to_string())])
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| PollClawError::Channel(format!("list members failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PollClawError::Channel(format!(
                "list members error {status}: {body}"
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PollClawError::Channel(format!("invalid members response: {e}")))
    }
}

#[async_trait]
impl MessageGateway for DiscordApi {
    async fn send_channel_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<String> {
        let mut body = serde_json::json!({ "content": payload.content });
        if let Some(embed) = &payload.embed {
            body["embeds"] = serde_json::json!([embed]);
        }
        if let Some(reply_to) = &payload.reply_to {
            body["message_reference"] = serde_json::json!({ "message_id": reply_to });
        }

        let response = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/messages")))
            .header("Authorization", self.auth_header())
            .json(&body)
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| PollClawError::Channel(format!("send message failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PollClawError::Channel(format!(
                "send message error {status}: {body}"
            )));
        }

        let sent: SentMessage = response
            .json()
            .await
            .map_err(|e| PollClawError::Channel(format!("invalid send response: {e}")))?;
        tracing::debug!(channel_id, message_id = %sent.id, "channel message sent");
        Ok(sent.id)
    }

    /// Walks the paginated listing until a short page; callers always get
    /// the complete member list.
    async fn list_guild_members(&self, guild_id: &str) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        let mut after = String::from("0");
        loop {
            let page = self.member_page(guild_id, &after).await?;
            let page_len = page.len();
            for m in page {
                after = m.user.id.clone();
                members.push(Member {
                    id: m.user.id,
                    // Server nickname wins over the account username, same
                    // precedence the client UI shows.
                    display_name: m.nick.unwrap_or(m.user.username),
                });
            }
            if page_len < MEMBER_PAGE_LIMIT {
                break;
            }
        }
        tracing::debug!(guild_id, count = members.len(), "guild members fetched");
        Ok(members)
    }
}

// --- Discord API types ---

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordMember {
    user: DiscordUser,
    #[serde(default)]
    nick: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
}
