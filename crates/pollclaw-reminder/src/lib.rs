//! # PollClaw Reminder Engine
//!
//! Deadline reminder and auto-closure engine for group scheduling polls.
//! Stateless between passes and fast on a cold start: every invocation
//! queries the store, decides what is due right now, and fans the sends
//! out under bounded concurrency.
//!
//! ## Architecture
//! ```text
//! Orchestrator::run_once (external periodic trigger)
//!   ├── PollStore: deadline ∈ [now − 7d, now + 3d]
//!   ├── evaluate(poll, now) per poll (pure)
//!   │     ├── timing: "3d"/"8h"/"30m" → hour offsets + staleness windows
//!   │     ├── due reminders (not sent, inside skip window)
//!   │     └── should_close (0 < now − deadline ≤ 8h)
//!   ├── reminder batch → mark_reminder_sent (conditional) → Notifier
//!   └── closure batch  → set_status(Closed) → summary + followup
//! ```
//!
//! Idempotency lives in the store: `mark_reminder_sent` is a conditional
//! insert and dispatch is skipped when the token was already present, so
//! overlapping passes never double-send.

pub mod batch;
pub mod evaluate;
pub mod orchestrator;
pub mod persistence;
pub mod timing;

pub use batch::{run_batched, BatchOptions};
pub use evaluate::{evaluate, Evaluation};
pub use orchestrator::{Orchestrator, RunReport};
pub use persistence::SqlitePollDb;
pub use timing::{Timing, TimingUnit, DEFAULT_MENTION, DEFAULT_TIMINGS};
