//! Relative interval value object
//!
//! An interval is a non-zero minute count with an optional unit suffix:
//! `m` minutes (default), `h` hours, `d` days, `w` weeks, `M` months, where a
//! month is fixed at 4 weeks.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;
const MINUTES_PER_WEEK: u64 = 7 * MINUTES_PER_DAY;
const MINUTES_PER_MONTH: u64 = 4 * MINUTES_PER_WEEK;

/// A relative schedule: fire every so many minutes.
///
/// Keeps the source text for catalog rendering; equality compares the
/// resolved minute count.
#[derive(Debug, Clone)]
pub struct Interval {
    minutes: u64,
    source: String,
}

impl Interval {
    /// The interval length in minutes.
    pub fn minutes(&self) -> u64 {
        self.minutes
    }

    /// The interval as a chrono duration.
    pub fn as_duration(&self) -> Duration {
        Duration::minutes(self.minutes as i64)
    }

    /// The original value text.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err("empty interval".to_string());
        }

        let (digits, multiplier) = match text.char_indices().last() {
            Some((idx, c)) if c.is_ascii_alphabetic() => {
                let multiplier = match c {
                    'm' => 1,
                    'h' => MINUTES_PER_HOUR,
                    'd' => MINUTES_PER_DAY,
                    'w' => MINUTES_PER_WEEK,
                    'M' => MINUTES_PER_MONTH,
                    _ => return Err(format!("unknown interval unit '{}'", c)),
                };
                (&text[..idx], multiplier)
            }
            _ => (text, 1),
        };

        let count: u64 = digits
            .trim()
            .parse()
            .map_err(|_| format!("invalid interval '{}'", text))?;
        if count == 0 {
            return Err("interval must be non-zero".to_string());
        }

        Ok(Interval {
            minutes: count * multiplier,
            source: text.to_string(),
        })
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Interval {
    fn eq(&self, other: &Self) -> bool {
        self.minutes == other.minutes
    }
}

impl Eq for Interval {}
