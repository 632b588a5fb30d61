//! End-to-end scheduling scenarios under virtual time.
//!
//! Each test wires a real engine to the fake launcher and walks the clock
//! minute by minute. Expected fire traces are exact: job evaluation order
//! within a tick is lexicographic on job id, and ticks are delivered before
//! child ends due in the same minute.

use chrono::Duration;

use crate::domain::entities::{Catalog, ConflictPolicy, ExitDisposition, Job, MailPolicy};

use super::testing::{catalog_of, epoch, Harness};

fn job(id: &str) -> Job {
    let mut job = Job::new(id);
    job.command = "true".to_string();
    job
}

fn interval_job(id: &str, interval: &str) -> Job {
    let mut j = job(id);
    j.interval = Some(interval.parse().unwrap());
    j
}

fn with_durations(harness: &Harness, durations: &[(&str, i64)]) {
    let mut world = harness.world.lock().unwrap();
    for (id, minutes) in durations {
        world.durations.insert(id.to_string(), *minutes);
    }
}

/// Two 20-minute jobs sharing a queue, each sleeping 15 minutes, with the
/// `skip` policy: they alternate on a strict 15-minute cadence and each runs
/// four times over two hours.
#[test]
fn test_queue_contention_with_skip() {
    let mut foo = interval_job("foo", "20m");
    foo.queue = "blk1".to_string();
    foo.conflict = ConflictPolicy::Skip;
    let mut bar = interval_job("bar", "20m");
    bar.queue = "blk1".to_string();
    bar.conflict = ConflictPolicy::Skip;

    let mut harness = Harness::new(catalog_of(vec![foo, bar]));
    with_durations(&harness, &[("foo", 15), ("bar", 15)]);
    harness.start();
    harness.run_minutes(0, 119);

    // "bar" sorts before "foo", so it is considered and started first.
    assert_eq!(harness.starts_of("bar"), vec![0, 30, 60, 90]);
    assert_eq!(harness.starts_of("foo"), vec![15, 45, 75, 105]);
}

/// A 15-minute job whose command runs 20 minutes, with `kill`: every firing
/// terminates its predecessor, and no instance ever completes naturally.
#[test]
fn test_self_preemption_with_kill() {
    let mut baz = interval_job("baz", "15m");
    baz.conflict = ConflictPolicy::Kill;

    let mut harness = Harness::new(catalog_of(vec![baz]));
    with_durations(&harness, &[("baz", 20)]);
    harness.start();
    harness.run_minutes(0, 119);

    assert_eq!(
        harness.starts_of("baz"),
        vec![0, 15, 30, 45, 60, 75, 90, 105]
    );
    {
        let world = harness.world.lock().unwrap();
        // Seven predecessors ended, all killed; the eighth is still running.
        assert_eq!(world.ended.len(), 7);
        assert!(world.ended.iter().all(|(_, _, killed)| *killed));
        assert_eq!(world.running_count(), 1);
    }
    assert_eq!(
        harness.engine.record("baz").unwrap().last_exit,
        Some(ExitDisposition::Killed)
    );
}

/// A follow-up chained on an 8-hour job, with a 1-day interval fallback and
/// a shared queue: the follow-up fires exactly once, right after the first
/// upstream completion, and later completions do not re-fire it.
#[test]
fn test_post_chain_fires_once_per_interval() {
    let mut grault = interval_job("grault", "8h");
    grault.queue = "blk3".to_string();
    grault.conflict = ConflictPolicy::Skip;
    let mut garply = interval_job("garply", "1d");
    garply.post = vec!["grault".to_string()];
    garply.queue = "blk3".to_string();
    garply.conflict = ConflictPolicy::Skip;

    let mut harness = Harness::new(catalog_of(vec![grault, garply]));
    with_durations(&harness, &[("grault", 5)]);
    harness.start();
    harness.run_minutes(0, 1439);

    assert_eq!(harness.starts_of("grault"), vec![0, 480, 960]);
    assert_eq!(harness.starts_of("garply"), vec![5]);
}

/// An unreachable calendar target never fires; its follow-up falls back to
/// its own interval, firing once when the seeded interval expires.
#[test]
fn test_unreachable_time_with_post_fallback() {
    // Harness epoch is the 2nd of the month; day 6 is past the window.
    let mut fred = job("fred");
    fred.time = Some("0 0 6 * *".parse().unwrap());
    let mut waldo = interval_job("waldo", "1d");
    waldo.post = vec!["fred".to_string()];

    let mut harness = Harness::new(catalog_of(vec![fred, waldo]));
    harness.start();
    harness.run_minutes(0, 1440);

    assert_eq!(harness.starts_of("fred"), Vec::<i64>::new());
    assert_eq!(harness.starts_of("waldo"), vec![1440]);
}

/// A job chained on two upstreams of different periods fires exactly once
/// per hour, immediately after whichever upstream completes last.
#[test]
fn test_multi_post_waits_for_all_targets() {
    let plugh = interval_job("plugh", "20m");
    let xyzzy = interval_job("xyzzy", "1h");
    let mut thud = job("thud");
    thud.post = vec!["plugh".to_string(), "xyzzy".to_string()];

    let mut harness = Harness::new(catalog_of(vec![plugh, xyzzy, thud]));
    with_durations(&harness, &[("plugh", 1), ("xyzzy", 2)]);
    harness.start();
    harness.run_minutes(0, 239);

    // xyzzy is always the last of the pair to finish, two minutes past the
    // hour.
    assert_eq!(harness.starts_of("thud"), vec![2, 62, 122, 182]);
}

/// A reload that drops a mid-run job: the running instance completes under
/// its old definition, no new instance starts, and jobs new to the catalog
/// are scheduled from the reload instant.
#[test]
fn test_reload_preserves_running_instances() {
    let alpha = interval_job("alpha", "1h");
    let beta = interval_job("beta", "20m");

    let mut harness = Harness::new(catalog_of(vec![alpha]));
    with_durations(&harness, &[("alpha", 30)]);
    harness.start();
    harness.run_minutes(0, 9);
    harness.swap(catalog_of(vec![beta]));
    harness.run_minutes(10, 60);

    assert_eq!(harness.starts_of("alpha"), vec![0]);
    assert_eq!(harness.starts_of("beta"), vec![10, 30, 50]);
    {
        let world = harness.world.lock().unwrap();
        assert!(world
            .ended
            .iter()
            .any(|(id, seq, killed)| id == "alpha" && *seq == 0 && !killed));
    }
    // The departed job's history is retained, never replayed.
    assert_eq!(
        harness.engine.record("alpha").unwrap().last_exit,
        Some(ExitDisposition::Exited(0))
    );
}

/// Restarting between minute boundaries neither double-fires a minute nor
/// skips one.
#[test]
fn test_restart_is_idempotent_for_calendar_jobs() {
    let mut every5 = job("every5");
    every5.time = Some("*/5 * * * *".parse().unwrap());

    let mut harness = Harness::new(catalog_of(vec![every5]));
    harness.start();
    harness.run_minutes(0, 5);

    // Restart within the same minute: the fired minute must not repeat.
    harness.restart();
    harness.run_minute(5);
    harness.run_minutes(6, 10);

    assert_eq!(harness.starts_of("every5"), vec![0, 5, 10]);
}

/// Downtime longer than several interval periods produces a single catch-up
/// firing, then the cadence resumes from the recovery instant.
#[test]
fn test_interval_recovery_never_backfills() {
    let tidy = interval_job("tidy", "15m");

    let mut harness = Harness::new(catalog_of(vec![tidy]));
    harness.start();
    harness.run_minute(0);
    // Lights out until minute 50.
    harness.run_minute(50);
    harness.run_minutes(51, 65);

    assert_eq!(harness.starts_of("tidy"), vec![0, 50, 65]);
}

/// A failing condition suppresses the run as a skip: the command never
/// starts, but the schedule still advances.
#[test]
fn test_condition_suppresses_run() {
    let mut guarded = interval_job("guarded", "5m");
    guarded.condition = Some("false".to_string());

    let mut harness = Harness::new(catalog_of(vec![guarded]));
    harness
        .world
        .lock()
        .unwrap()
        .conditions
        .insert("guarded".to_string(), false);
    harness.start();
    harness.run_minutes(0, 10);

    assert_eq!(harness.starts_of("guarded"), Vec::<i64>::new());
    let record = harness.engine.record("guarded").unwrap();
    assert_eq!(record.last_considered, Some(epoch() + Duration::minutes(10)));
    // A skipped condition is not a failure: no mail.
    assert!(harness.mails.lock().unwrap().is_empty());
}

/// A spawn failure is an error outcome: recorded, mailed, and the engine
/// keeps running.
#[test]
fn test_spawn_failure_is_error_outcome() {
    let broken = interval_job("broken", "5m");

    let mut harness = Harness::new(catalog_of(vec![broken]));
    harness
        .world
        .lock()
        .unwrap()
        .fail_spawn
        .insert("broken".to_string());
    harness.start();
    harness.run_minute(0);

    assert!(matches!(
        harness.engine.record("broken").unwrap().last_exit,
        Some(ExitDisposition::Error(_))
    ));
    let mails = harness.mails.lock().unwrap();
    assert_eq!(mails.len(), 1);
    assert!(mails[0].subject.contains("broken"));
    assert!(mails[0].subject.contains("error"));
}

/// Mail policy routing: `output` mails successful runs only when they
/// produced output; `never` stays silent even on failure.
#[test]
fn test_mail_policies() {
    let mut chatty = interval_job("chatty", "1h");
    chatty.mail = MailPolicy::Output;
    let mut quiet = interval_job("quiet", "1h");
    quiet.mail = MailPolicy::Never;

    let mut harness = Harness::new(catalog_of(vec![chatty, quiet]));
    harness
        .world
        .lock()
        .unwrap()
        .outputs
        .insert("chatty".to_string(), "3 files rotated\n".to_string());
    harness
        .world
        .lock()
        .unwrap()
        .fail_spawn
        .insert("quiet".to_string());
    harness.start();
    harness.run_minute(0);

    let mails = harness.mails.lock().unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].subject, "tester@localhost: chatty ok");
    assert!(mails[0].body.contains("3 files rotated"));
}

/// The warn flag mails conflict summaries in addition to logging them.
#[test]
fn test_conflict_warn_mail() {
    let mut clashy = interval_job("clashy", "5m");
    clashy.conflict = ConflictPolicy::Skip;
    clashy.warn = true;

    let mut harness = Harness::new(catalog_of(vec![clashy]));
    with_durations(&harness, &[("clashy", 60)]);
    harness.start();
    // Fires at 0 and runs long; the firing at 5 queues one waiter
    // (conflict), the firing at 10 is skipped (conflict).
    harness.run_minutes(0, 10);

    let mails = harness.mails.lock().unwrap();
    let conflicts: Vec<_> = mails
        .iter()
        .filter(|m| m.subject.ends_with("clashy conflict"))
        .collect();
    assert_eq!(conflicts.len(), 2);
}

/// At most one instance per queue runs at any instant, across jobs.
#[test]
fn test_single_running_instance_per_queue() {
    let mut a = interval_job("a", "5m");
    a.queue = "shared".to_string();
    let mut b = interval_job("b", "5m");
    b.queue = "shared".to_string();

    let mut harness = Harness::new(catalog_of(vec![a, b]));
    with_durations(&harness, &[("a", 3), ("b", 3)]);
    harness.start();
    for minute in 0..=30 {
        harness.run_minute(minute);
        assert!(harness.world.lock().unwrap().running_count() <= 1);
    }
}

/// An unclean shutdown leaves a running marker; the next startup closes it
/// as an unknown outcome.
#[test]
fn test_lost_instance_reported_unknown_after_restart() {
    let hog = interval_job("hog", "1h");

    let mut harness = Harness::new(catalog_of(vec![hog]));
    with_durations(&harness, &[("hog", 30)]);
    harness.start();
    harness.run_minute(0);
    assert!(harness.engine.record("hog").unwrap().running.is_some());

    // The engine dies; its child is lost with it.
    harness.restart();
    let record = harness.engine.record("hog").unwrap();
    assert!(record.running.is_none());
    assert_eq!(record.last_exit, Some(ExitDisposition::Unknown));
}

/// Post satisfaction counts killed completions too.
#[test]
fn test_killed_target_satisfies_post() {
    let mut loopy = interval_job("loopy", "10m");
    loopy.conflict = ConflictPolicy::Kill;
    let mut after = job("after");
    after.post = vec!["loopy".to_string()];

    let mut harness = Harness::new(catalog_of(vec![loopy, after]));
    with_durations(&harness, &[("loopy", 30)]);
    harness.start();
    // loopy starts at 0 and is killed by its successor at 10; the kill is a
    // completion, so the follow-up fires at 10.
    harness.run_minutes(0, 10);

    assert_eq!(harness.starts_of("after"), vec![10]);
}

/// An empty catalog swap keeps the engine alive with nothing scheduled.
#[test]
fn test_swap_to_empty_catalog() {
    let solo = interval_job("solo", "5m");

    let mut harness = Harness::new(catalog_of(vec![solo]));
    harness.start();
    harness.run_minutes(0, 4);
    harness.swap(Catalog::empty());
    harness.run_minutes(5, 20);

    assert_eq!(harness.starts_of("solo"), vec![0]);
}
