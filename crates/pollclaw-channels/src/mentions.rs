//! Mention token resolution.
//!
//! Reminder configurations may name people by display name ("tanaka")
//! rather than by addressable mention syntax. The resolver rewrites those
//! to `<@id>` using a per-guild member map fetched through the gateway and
//! cached with a bounded lifetime; everything it cannot resolve passes
//! through unchanged so a typo stays visible in the sent message instead
//! of disappearing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use pollclaw_core::traits::MessageGateway;

/// Broadcast tokens the chat platform understands natively.
const BROADCAST_TOKENS: [&str; 2] = ["@everyone", "@here"];

struct CachedMembers {
    /// Lowercased display name → member id.
    by_name: HashMap<String, String>,
    fetched_at: DateTime<Utc>,
}

/// Display-name → mention rewriter with a TTL'd per-guild member cache.
pub struct MentionResolver {
    gateway: Arc<dyn MessageGateway>,
    cache: Mutex<HashMap<String, CachedMembers>>,
    ttl: Duration,
}

impl MentionResolver {
    pub fn new(gateway: Arc<dyn MessageGateway>, ttl_secs: u64) -> Self {
        Self {
            gateway,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Resolve a list of mention tokens for one guild. Already-addressable
    /// and broadcast tokens pass through; display names are rewritten when
    /// the member map knows them and passed through otherwise.
    pub async fn resolve(&self, tokens: &[String], guild_id: &str) -> Vec<String> {
        if tokens.iter().all(|t| Self::passthrough(t)) {
            // Nothing needs the member map; skip the fetch entirely.
            return tokens.to_vec();
        }

        let members = self.members_for(guild_id).await;
        tokens
            .iter()
            .map(|token| {
                if Self::passthrough(token) {
                    return token.clone();
                }
                let name = token.trim_start_matches('@').to_lowercase();
                match members.get(&name) {
                    Some(id) => format!("<@{id}>"),
                    None => {
                        tracing::debug!(token, guild_id, "mention token unresolved, passing through");
                        token.clone()
                    }
                }
            })
            .collect()
    }

    fn passthrough(token: &str) -> bool {
        BROADCAST_TOKENS.contains(&token)
            || (token.starts_with("<@") && token.ends_with('>'))
    }

    /// Member map for a guild — cached until `fetched_at + ttl`. Entries
    /// are idempotent for the same guild, so a concurrent duplicate fetch
    /// is wasted work but never corruption (last writer wins).
    async fn members_for(&self, guild_id: &str) -> HashMap<String, String> {
        let now = Utc::now();
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(guild_id) {
                if now - entry.fetched_at < self.ttl {
                    return entry.by_name.clone();
                }
            }
        }

        let by_name: HashMap<String, String> = match self.gateway.list_guild_members(guild_id).await
        {
            Ok(members) => members
                .into_iter()
                .map(|m| (m.display_name.to_lowercase(), m.id))
                .collect(),
            Err(e) => {
                // A failed fetch degrades to passthrough for this call; the
                // next call will try again.
                tracing::warn!(guild_id, error = %e, "member list fetch failed");
                return HashMap::new();
            }
        };

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            guild_id.to_string(),
            CachedMembers { by_name: by_name.clone(), fetched_at: now },
        );
        by_name
    }
}
