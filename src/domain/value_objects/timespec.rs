//! Calendar expression value object
//!
//! A calendar expression restricts firing instants with five fields
//! (minute, hour, day-of-month, month, day-of-week), each describing a set
//! over its domain. The grammar supports literals, inclusive ranges `a-b`,
//! steps `a-b/s` and `*/s`, comma unions, and `~` set-difference which
//! removes members from a term's base set.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDateTime, Timelike};

/// The five calendar field positions and their domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Minute of the hour, 0-59
    Minute,
    /// Hour of the day, 0-23
    Hour,
    /// Day of the month, 1-31
    MonthDay,
    /// Month of the year, 1-12, three-letter names accepted
    Month,
    /// Day of the week, 0-7 where 0 and 7 both mean Sunday; names accepted
    WeekDay,
}

impl FieldKind {
    fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Minute => (0, 59),
            FieldKind::Hour => (0, 23),
            FieldKind::MonthDay => (1, 31),
            FieldKind::Month => (1, 12),
            FieldKind::WeekDay => (0, 6),
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::Minute => "minute",
            FieldKind::Hour => "hour",
            FieldKind::MonthDay => "day-of-month",
            FieldKind::Month => "month",
            FieldKind::WeekDay => "day-of-week",
        }
    }
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// One parsed calendar field: a set of admissible values over the field's
/// domain, plus whether the field was written as a bare `*`.
///
/// The restriction flag feeds the traditional cron day-combining rule: when
/// both day fields are restricted, a day matches if either condition holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    mask: u64,
    restricted: bool,
}

impl FieldSet {
    /// Builds the unrestricted set (a bare `*`) for a field.
    pub fn full(kind: FieldKind) -> Self {
        let (lo, hi) = kind.bounds();
        let mut mask = 0u64;
        for v in lo..=hi {
            mask |= 1 << v;
        }
        Self {
            mask,
            restricted: false,
        }
    }

    /// Tests membership of a value in the set.
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.mask & (1 << value) != 0
    }

    /// Whether the field was written as anything other than a bare `*`.
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Parses one field of a calendar expression.
    ///
    /// # Arguments
    ///
    /// * `kind` - Which of the five fields is being parsed
    /// * `text` - The field text, e.g. `*/15` or `mon-fri~wed`
    ///
    /// # Returns
    ///
    /// The parsed set, or a human-readable reason on failure.
    pub fn parse(kind: FieldKind, text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(format!("empty {} field", kind.label()));
        }
        if text == "*" {
            return Ok(Self::full(kind));
        }

        let mut mask = 0u64;
        for term in text.split(',') {
            mask |= parse_term(kind, term)?;
        }
        if mask == 0 {
            return Err(format!("{} field '{}' admits no values", kind.label(), text));
        }
        Ok(Self {
            mask,
            restricted: true,
        })
    }
}

/// Parses a single comma term: a base atom with optional `~` exclusions.
fn parse_term(kind: FieldKind, term: &str) -> Result<u64, String> {
    let term = term.trim();
    let mut parts = term.split('~');
    let base = parts
        .next()
        .ok_or_else(|| format!("empty term in {} field", kind.label()))?;
    let mut mask = parse_base(kind, base.trim())?;
    for excluded in parts {
        mask &= !parse_range_atom(kind, excluded.trim())?;
    }
    Ok(mask)
}

/// Parses a base atom: `*`, `*/s`, `a`, `a-b`, or `a-b/s`.
fn parse_base(kind: FieldKind, base: &str) -> Result<u64, String> {
    let (range, step) = match base.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step
                .trim()
                .parse()
                .map_err(|_| format!("invalid step '{}' in {} field", step, kind.label()))?;
            if step == 0 {
                return Err(format!("zero step in {} field", kind.label()));
            }
            (range.trim(), step)
        }
        None => (base, 1),
    };

    let (lo, hi) = if range == "*" {
        kind.bounds()
    } else {
        range_bounds(kind, range)?
    };

    let mut mask = 0u64;
    let mut v = lo;
    while v <= hi {
        mask |= 1 << v;
        v += step;
    }
    Ok(mask)
}

/// Parses a literal or `a-b` range (no step), used for bases and exclusions.
fn parse_range_atom(kind: FieldKind, atom: &str) -> Result<u64, String> {
    let (lo, hi) = range_bounds(kind, atom)?;
    let mut mask = 0u64;
    for v in lo..=hi {
        mask |= 1 << v;
    }
    Ok(mask)
}

fn range_bounds(kind: FieldKind, atom: &str) -> Result<(u32, u32), String> {
    match atom.split_once('-') {
        Some((a, b)) => {
            let lo = parse_value(kind, a.trim())?;
            let hi = parse_value(kind, b.trim())?;
            if lo > hi {
                return Err(format!(
                    "inverted range '{}' in {} field",
                    atom,
                    kind.label()
                ));
            }
            Ok((lo, hi))
        }
        None => {
            let v = parse_value(kind, atom)?;
            Ok((v, v))
        }
    }
}

/// Parses one value: a number within the field's domain, or a three-letter
/// month/weekday name. Weekday 7 folds to Sunday.
fn parse_value(kind: FieldKind, text: &str) -> Result<u32, String> {
    if text.is_empty() {
        return Err(format!("empty value in {} field", kind.label()));
    }

    let names: Option<&[&str]> = match kind {
        FieldKind::Month => Some(&MONTH_NAMES),
        FieldKind::WeekDay => Some(&WEEKDAY_NAMES),
        _ => None,
    };
    if let Some(names) = names {
        let lower = text.to_ascii_lowercase();
        if let Some(pos) = names.iter().position(|n| *n == lower) {
            return Ok(match kind {
                FieldKind::Month => pos as u32 + 1,
                _ => pos as u32,
            });
        }
    }

    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid value '{}' in {} field", text, kind.label()))?;
    let value = if kind == FieldKind::WeekDay && value == 7 {
        0
    } else {
        value
    };
    let (lo, hi) = kind.bounds();
    if value < lo || value > hi {
        return Err(format!(
            "value {} out of range {}-{} in {} field",
            value,
            lo,
            hi,
            kind.label()
        ));
    }
    Ok(value)
}

/// A five-field calendar expression.
///
/// Keeps the source text it was parsed from so catalogs can be rendered back
/// verbatim; equality compares the parsed sets, not the text.
#[derive(Debug, Clone)]
pub struct TimeSpec {
    pub minute: FieldSet,
    pub hour: FieldSet,
    pub mday: FieldSet,
    pub month: FieldSet,
    pub wday: FieldSet,
    source: String,
}

impl TimeSpec {
    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Tests whether an instant satisfies the expression.
    ///
    /// Minute, hour and month must always match. The day fields follow
    /// traditional cron: when both are restricted, a day matches if either
    /// condition holds; otherwise both must hold.
    pub fn matches(&self, t: NaiveDateTime) -> bool {
        self.minute.contains(t.minute())
            && self.hour.contains(t.hour())
            && self.month.contains(t.month())
            && self.day_matches(t)
    }

    /// Applies the day-of-month / day-of-week combining rule.
    pub fn day_matches(&self, t: NaiveDateTime) -> bool {
        let dom = self.mday.contains(t.day());
        let dow = self.wday.contains(t.weekday().num_days_from_sunday());
        if self.mday.is_restricted() && self.wday.is_restricted() {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for TimeSpec {
    type Err = String;

    /// Parses the five whitespace-separated fields:
    /// minute, hour, day-of-month, month, day-of-week.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour day-of-month month day-of-week), found {}",
                fields.len()
            ));
        }
        Ok(TimeSpec {
            minute: FieldSet::parse(FieldKind::Minute, fields[0])?,
            hour: FieldSet::parse(FieldKind::Hour, fields[1])?,
            mday: FieldSet::parse(FieldKind::MonthDay, fields[2])?,
            month: FieldSet::parse(FieldKind::Month, fields[3])?,
            wday: FieldSet::parse(FieldKind::WeekDay, fields[4])?,
            source: s.trim().to_string(),
        })
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for TimeSpec {
    fn eq(&self, other: &Self) -> bool {
        self.minute == other.minute
            && self.hour == other.hour
            && self.mday == other.mday
            && self.month == other.month
            && self.wday == other.wday
    }
}

impl Eq for TimeSpec {}
