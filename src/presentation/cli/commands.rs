//! CLI Commands module
//!
//! Wires the engine to its production collaborators and drives it: the
//! `run` command owns the select loop over the minute tick and the event
//! queue, `check` validates a catalog offline, and `run-job` is the
//! run-one-job-now entry point that startup jobs rely on.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use nix::unistd::Pid;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::application::engine::events::{ControlEvent, EngineEvent};
use crate::application::engine::ports::{MailIdentity, MailMessage, TimeSource};
use crate::application::engine::{Engine, DEFAULT_SENDMAIL};
use crate::domain::entities::{Catalog, EngineState};
use crate::domain::repositories::StateRepository;
use crate::infrastructure::mail::sendmail::{deliver_blocking, SendmailTransport};
use crate::infrastructure::parsers::{CatalogError, CatalogParser};
use crate::infrastructure::process::supervisor::{
    run_condition_blocking, run_job_blocking, KILL_GRACE,
};
use crate::infrastructure::process::{Identity, ProcessSupervisor};
use crate::infrastructure::repositories::FileStateRepository;
use crate::infrastructure::signals::spawn_signal_forwarders;
use crate::infrastructure::time::SystemTimeSource;

pub const CATALOG_FILE: &str = "crontab.ini";
pub const PID_FILE: &str = "pcron.pid";
pub const STATE_FILE: &str = "state.json";

/// The engine daemon.
pub struct RunCommand;

impl RunCommand {
    pub async fn execute(directory: &Path) -> Result<()> {
        fs::create_dir_all(directory)
            .with_context(|| format!("failed to create {}", directory.display()))?;

        let pid_path = directory.join(PID_FILE);
        refuse_if_running(&pid_path)?;
        // An unwritable pid file is one of the few fatal conditions.
        fs::write(&pid_path, format!("{}\n", std::process::id()))
            .with_context(|| format!("cannot write {}", pid_path.display()))?;

        let result = Self::run(directory).await;
        let _ = fs::remove_file(&pid_path);
        result
    }

    async fn run(directory: &Path) -> Result<()> {
        let parser = CatalogParser::new();
        let catalog_path = directory.join(CATALOG_FILE);
        // Fatal only here, at first start: once running, a bad catalog
        // never replaces a good one.
        let catalog = match parser.parse_file(&catalog_path) {
            Ok(catalog) => catalog,
            Err(CatalogError::Empty) => {
                warn!("catalog defines no jobs; nothing scheduled until a reload");
                Catalog::empty()
            }
            Err(error) => {
                return Err(error).context("no valid catalog at startup");
            }
        };

        let identity = Identity::current()?;
        let store = FileStateRepository::new(directory.join(STATE_FILE));
        let state = match store.load() {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "state unreadable; starting with empty state");
                EngineState::default()
            }
        };

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        spawn_signal_forwarders(events_tx.clone())?;
        let supervisor =
            ProcessSupervisor::new(events_tx, identity.clone(), directory.to_path_buf());
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);

        let mut engine = Engine::new(
            catalog,
            state,
            Box::new(store),
            Box::new(supervisor),
            Box::new(SendmailTransport),
            time.clone(),
            MailIdentity {
                username: identity.username.clone(),
                hostname: identity.hostname.clone(),
            },
        );
        engine.startup();
        info!(directory = %directory.display(), "engine started");

        // Consider the minute we started in; a restart within a minute is
        // idempotent thanks to the persistent records.
        engine.tick();

        loop {
            let deadline = engine.next_minute();
            tokio::select! {
                // Biased so a tick coinciding with a child exit is
                // evaluated first.
                biased;
                _ = time.sleep_until(deadline) => engine.tick(),
                event = events_rx.recv() => match event {
                    Some(EngineEvent::JobEnded(ended)) => engine.handle_job_ended(ended),
                    Some(EngineEvent::Control(ControlEvent::Reload)) => {
                        match parser.parse_file(&catalog_path) {
                            Ok(catalog) => engine.swap_catalog(catalog),
                            Err(CatalogError::Empty) => {
                                warn!("reloaded catalog defines no jobs");
                                engine.swap_catalog(Catalog::empty());
                            }
                            Err(error) => {
                                error!(%error, "reload failed; keeping the previous catalog");
                            }
                        }
                    }
                    Some(EngineEvent::Control(ControlEvent::DumpState)) => engine.dump_state(),
                    Some(EngineEvent::Control(ControlEvent::Shutdown)) | None => break,
                },
            }
        }

        let remaining = engine.begin_shutdown();
        if remaining > 0 {
            info!(remaining, "waiting for running instances to end");
            let deadline = tokio::time::Instant::now() + KILL_GRACE + StdDuration::from_secs(2);
            while engine.running_count() > 0 {
                match tokio::time::timeout_at(deadline, events_rx.recv()).await {
                    Ok(Some(EngineEvent::JobEnded(ended))) => engine.handle_job_ended(ended),
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => break,
                }
            }
        }
        engine.finalize_shutdown();
        info!("engine stopped");
        Ok(())
    }
}

/// Refuses to start when the pid file names a live process.
fn refuse_if_running(pid_path: &Path) -> Result<()> {
    let text = match fs::read_to_string(pid_path) {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => {
            return Err(error).with_context(|| format!("cannot read {}", pid_path.display()));
        }
    };
    if let Ok(pid) = text.trim().parse::<i32>() {
        if nix::sys::signal::kill(Pid::from_raw(pid), None).is_ok() {
            bail!("an engine is already running (pid {})", pid);
        }
        warn!(pid, "removing stale pid file");
    }
    Ok(())
}

/// Offline catalog validation.
pub struct CheckCommand;

impl CheckCommand {
    pub fn execute(directory: &Path, dump: bool) -> Result<()> {
        let parser = CatalogParser::new();
        let path = directory.join(CATALOG_FILE);
        let catalog = match parser.parse_file(&path) {
            Ok(catalog) => catalog,
            Err(CatalogError::Empty) => {
                println!("{}: catalog defines no jobs", path.display());
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        if dump {
            print!("{}", parser.render(&catalog));
            return Ok(());
        }

        let scheduled = catalog.scheduled().count();
        let inactive = catalog.jobs().filter(|j| !j.active).count();
        let startup = catalog
            .jobs()
            .filter(|j| j.active && j.is_startup())
            .count();
        println!(
            "{}: {} job(s) ({} scheduled, {} startup, {} inactive)",
            path.display(),
            catalog.len(),
            scheduled,
            startup,
            inactive
        );
        for job in catalog.jobs() {
            let mut sources = Vec::new();
            if let Some(time) = &job.time {
                sources.push(format!("time {}", time.source()));
            }
            if let Some(interval) = &job.interval {
                sources.push(format!("every {}", interval.source()));
            }
            if !job.post.is_empty() {
                sources.push(format!("after {}", job.post.join(" ")));
            }
            let schedule = if sources.is_empty() {
                "startup only".to_string()
            } else {
                sources.join(", ")
            };
            let state = if job.active { "" } else { " [inactive]" };
            println!(
                "  {:<24} {} (queue {}, conflict {}){}",
                job.id,
                schedule,
                job.queue,
                job.conflict.as_str(),
                state
            );
        }
        Ok(())
    }
}

/// The run-one-job-now entry point.
pub struct RunJobCommand;

impl RunJobCommand {
    pub fn execute(directory: &Path, job_id: &str) -> Result<()> {
        let parser = CatalogParser::new();
        let catalog = parser
            .parse_file(directory.join(CATALOG_FILE))
            .context("cannot load catalog")?;
        let job = catalog
            .get(job_id)
            .with_context(|| format!("no job '{}' in the catalog", job_id))?
            .as_ref();
        let identity = Identity::current()?;

        if !run_condition_blocking(&identity, directory, job)? {
            println!("{}: condition not met, not run", job_id);
            return Ok(());
        }

        let (disposition, output) = run_job_blocking(&identity, directory, job)?;
        if !output.is_empty() {
            print!("{}", output);
        }
        println!("{}: {}", job_id, disposition);

        if job
            .mail
            .wants_mail(disposition.is_success(), !output.is_empty())
        {
            let username = job.username.as_deref().unwrap_or(&identity.username);
            let hostname = job.hostname.as_deref().unwrap_or(&identity.hostname);
            let mut body = format!(
                "job: {}\nqueue: {}\nstatus: {}\n",
                job.id, job.queue, disposition
            );
            if !output.is_empty() {
                body.push('\n');
                body.push_str(&output);
            }
            let message = MailMessage {
                to: job
                    .mailto
                    .clone()
                    .unwrap_or_else(|| identity.username.clone()),
                subject: format!("{}@{}: {} {}", username, hostname, job.id, disposition),
                body,
                sendmail: job
                    .sendmail
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SENDMAIL.to_string()),
            };
            if let Err(error) = deliver_blocking(&message) {
                warn!(%error, "mail delivery failed");
            }
        }

        if !disposition.is_success() {
            bail!("job '{}' did not succeed: {}", job_id, disposition);
        }
        Ok(())
    }
}
