//! Schedule evaluators
//!
//! Three pure evaluators — calendar, interval, follow-up chain — each mapping
//! a job plus its persistent record to the earliest instant the job should
//! fire. The effective next fire is the minimum over the configured sources;
//! the engine treats a job as due when that minimum is not after the current
//! minute.
//!
//! All scheduling works in naive local wall-clock time truncated to minutes.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::domain::entities::{Job, JobRecord};
use crate::domain::value_objects::{Interval, TimeSpec};

/// The calendar search gives up after this horizon; an expression that
/// matches no day within it has no future fire (there is no year field, so
/// four years covers every leap-day combination).
const CALENDAR_HORIZON_DAYS: i64 = 4 * 366;

/// Drops seconds and sub-seconds; the scheduler has no sub-minute resolution.
pub fn truncate_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Finds the earliest instant strictly after `after` matching the
/// expression, or `None` if nothing matches within the horizon.
///
/// The search walks minute by minute but jumps whole units whenever a field
/// does not match: to the next month, the next day, or the next hour, with
/// the lower fields reset — so sparse expressions stay cheap.
pub fn next_calendar_match(spec: &TimeSpec, after: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut t = truncate_minute(after) + Duration::minutes(1);
    let limit = after + Duration::days(CALENDAR_HORIZON_DAYS);

    while t <= limit {
        if !spec.month.contains(t.month()) {
            t = first_minute_of_next_month(t.date());
            continue;
        }
        if !spec.day_matches(t) {
            let next_day = t.date().succ_opt()?;
            t = next_day.and_hms_opt(0, 0, 0)?;
            continue;
        }
        if !spec.hour.contains(t.hour()) {
            t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
            continue;
        }
        if !spec.minute.contains(t.minute()) {
            t += Duration::minutes(1);
            continue;
        }
        return Some(t);
    }
    None
}

fn first_minute_of_next_month(date: NaiveDate) -> NaiveDateTime {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    // Both the month number and day 1 are always valid.
    NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// The calendar source: due at `now` when the expression matches `now` and
/// the job was not already considered this minute. Minutes missed during
/// downtime are not backfilled.
fn calendar_next(spec: &TimeSpec, record: &JobRecord, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let floor = now - Duration::minutes(1);
    let after = match record.last_considered {
        Some(considered) if considered > floor => considered,
        _ => floor,
    };
    next_calendar_match(spec, after)
}

/// The interval source: `last_scheduled + interval`, never backfilling — a
/// tick missed during downtime fires once, now. A job never scheduled before
/// fires immediately; post-bearing jobs never reach that case because their
/// base is seeded when they are first seen, making the interval a fallback.
fn interval_next(
    interval: &Interval,
    record: &JobRecord,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    match record.last_scheduled {
        Some(last) => {
            let due = last + interval.as_duration();
            Some(if due < now { now } else { due })
        }
        None => Some(now),
    }
}

/// The follow-up source: ready as soon as every post target has ended at
/// least once since the job's own last fire. The pending-set bookkeeping is
/// event-driven; the evaluator only reads the result.
///
/// When the job also carries an interval, the interval rate-limits the
/// chain: once the job has fired, readiness cannot fire it again until a
/// full interval has passed. Without that, a follow-up of a faster job
/// would fire on every one of its completions.
fn post_next(job: &Job, record: &JobRecord, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !record.post_ready {
        return None;
    }
    if let (Some(interval), Some(considered)) = (&job.interval, record.last_considered) {
        let allowed = considered + interval.as_duration();
        if allowed > now {
            return Some(allowed);
        }
    }
    Some(now)
}

/// The effective next fire: the minimum over whichever sources the job
/// configures, or `None` when no source can produce a future fire.
pub fn next_fire(job: &Job, record: &JobRecord, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let mut next: Option<NaiveDateTime> = None;
    let mut merge = |candidate: Option<NaiveDateTime>| {
        if let Some(t) = candidate {
            next = Some(match next {
                Some(best) if best <= t => best,
                _ => t,
            });
        }
    };

    if let Some(spec) = &job.time {
        merge(calendar_next(spec, record, now));
    }
    if let Some(interval) = &job.interval {
        merge(interval_next(interval, record, now));
    }
    if !job.post.is_empty() {
        merge(post_next(job, record, now));
    }
    next
}

/// Whether the job should fire at the current minute. Several sources due
/// at the same instant still produce a single firing.
pub fn is_due(job: &Job, record: &JobRecord, now: NaiveDateTime) -> bool {
    match next_fire(job, record, now) {
        Some(t) => t <= now,
        None => false,
    }
}
