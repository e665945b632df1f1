//! # PollClaw Channels
//!
//! The outbound side of the engine: the Discord REST gateway client,
//! display-name → mention resolution with a TTL member cache, and the
//! notification dispatcher that composes reminder/closure messages.

pub mod discord;
pub mod dispatch;
pub mod mentions;

pub use discord::DiscordApi;
pub use dispatch::NotificationDispatcher;
pub use mentions::MentionResolver;
