//! Timing token parsing and the staleness policy.
//!
//! A timing token is `<integer><unit>` with unit `d`, `h`, or `m`, read as
//! "this many (days|hours|minutes) before the deadline". Malformed tokens
//! never error — the evaluator skips them and carries on with the rest of
//! the poll's configuration.

use chrono::Duration;

pub use pollclaw_core::types::{DEFAULT_MENTION, DEFAULT_TIMINGS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingUnit {
    Days,
    Hours,
    Minutes,
}

/// A parsed timing token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    pub amount: u32,
    pub unit: TimingUnit,
}

impl Timing {
    /// Parse `<integer><d|h|m>`. Returns `None` for anything else.
    pub fn parse(token: &str) -> Option<Timing> {
        let token = token.trim();
        if token.len() < 2 {
            return None;
        }
        // Split on the last char, not a byte index, so a stray multibyte
        // character in a config value cannot panic the parser.
        let unit = match token.chars().last()? {
            'd' => TimingUnit::Days,
            'h' => TimingUnit::Hours,
            'm' => TimingUnit::Minutes,
            _ => return None,
        };
        let amount: u32 = token[..token.len() - 1].parse().ok()?;
        if amount == 0 {
            return None;
        }
        Some(Timing { amount, unit })
    }

    /// Lead time before the deadline expressed in hours.
    pub fn offset_hours(&self) -> f64 {
        match self.unit {
            TimingUnit::Days => self.amount as f64 * 24.0,
            TimingUnit::Hours => self.amount as f64,
            TimingUnit::Minutes => self.amount as f64 / 60.0,
        }
    }

    /// Lead time before the deadline as a `Duration` (minute precision).
    pub fn offset(&self) -> Duration {
        match self.unit {
            TimingUnit::Days => Duration::days(self.amount as i64),
            TimingUnit::Hours => Duration::hours(self.amount as i64),
            TimingUnit::Minutes => Duration::minutes(self.amount as i64),
        }
    }

    /// Human-readable remaining-time label for the reminder body.
    pub fn label(&self) -> String {
        let (singular, plural) = match self.unit {
            TimingUnit::Days => ("day", "days"),
            TimingUnit::Hours => ("hour", "hours"),
            TimingUnit::Minutes => ("minute", "minutes"),
        };
        let word = if self.amount == 1 { singular } else { plural };
        format!("{} {} remaining", self.amount, word)
    }

    /// How long after the trigger instant this reminder is still worth
    /// sending. Long-lead reminders tolerate more evaluator downtime;
    /// a "1 hour left" notice sent 6 hours late is actively misleading,
    /// so short leads get a tight window.
    pub fn skip_window(&self) -> Duration {
        match self.unit {
            TimingUnit::Days => Duration::hours(8),
            TimingUnit::Hours => {
                let quarter = Duration::minutes((self.amount as i64 * 60) / 4);
                std::cmp::max(Duration::hours(2), quarter)
            }
            TimingUnit::Minutes => {
                let half = Duration::minutes(self.amount as i64 / 2);
                std::cmp::max(Duration::minutes(30), half)
            }
        }
    }
}

/// Staleness window for a raw token; malformed tokens get the day-token
/// fallback so recovery passes still treat them conservatively.
pub fn skip_window(token: &str) -> Duration {
    match Timing::parse(token) {
        Some(t) => t.skip_window(),
        None => Duration::hours(8),
    }
}
