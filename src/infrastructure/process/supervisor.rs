//! Process supervisor
//!
//! Starts job instances under the account's login shell, captures their
//! output into bounded buffers, and reports ends back to the engine as
//! events. A started instance's script is a temporary file holding the
//! user's `environment.sh` followed by the job command; the child runs in
//! its own process group so a kill reaches the whole job.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::application::engine::events::{EngineEvent, JobEnded};
use crate::application::engine::ports::{LaunchHandle, LaunchRequest, Launcher};
use crate::domain::entities::{ExitDisposition, Job};

use super::identity::Identity;

/// Grace between the polite and the final signal, for kills and shutdown.
pub const KILL_GRACE: StdDuration = StdDuration::from_secs(10);
/// Conditions run synchronously and suspend the engine; bound them well
/// under the minute tick.
const CONDITION_TIMEOUT: StdDuration = StdDuration::from_secs(55);
const OUTPUT_LIMIT: usize = 128 * 1024;
const ENVIRONMENT_FILE: &str = "environment.sh";

/// The production `Launcher`: real children, watched by detached waiter
/// tasks that post `JobEnded` events.
pub struct ProcessSupervisor {
    events: UnboundedSender<EngineEvent>,
    identity: Identity,
    config_dir: PathBuf,
}

impl ProcessSupervisor {
    pub fn new(
        events: UnboundedSender<EngineEvent>,
        identity: Identity,
        config_dir: PathBuf,
    ) -> Self {
        Self {
            events,
            identity,
            config_dir,
        }
    }
}

impl Launcher for ProcessSupervisor {
    fn spawn(&mut self, request: &LaunchRequest) -> Result<LaunchHandle> {
        let script = write_job_script(&request.job, &self.config_dir)?;
        let mut command = tokio::process::Command::new(&self.identity.shell);
        command
            .arg(script.path())
            .env_clear()
            .envs(job_environment(
                &self.identity,
                &self.config_dir,
                &request.job.id,
                &request.queue,
            ))
            .current_dir(&self.identity.home)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.identity.shell.display()))?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let events = self.events.clone();
        let job_id = request.job.id.clone();
        let seq = request.seq;
        let queue = request.queue.clone();
        tokio::spawn(async move {
            // The script file must outlive the child.
            let _script = script;
            let (mut output, errors) = tokio::join!(
                read_capped(stdout, OUTPUT_LIMIT),
                read_capped(stderr, OUTPUT_LIMIT)
            );
            output.push_str(&errors);
            let disposition = match child.wait().await {
                Ok(status) => disposition_from_status(status),
                Err(error) => ExitDisposition::Error(format!("wait failed: {}", error)),
            };
            let _ = events.send(EngineEvent::JobEnded(JobEnded {
                job_id,
                seq,
                queue,
                disposition,
                output,
            }));
        });

        Ok(LaunchHandle { pid })
    }

    fn kill(&mut self, job_id: &str, seq: u64, pid: Option<u32>) -> Result<()> {
        let Some(pid) = pid else {
            bail!("instance has no pid");
        };
        let group = Pid::from_raw(pid as i32);
        match killpg(group, Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(error) => {
                // Delivery failures are logged, never fatal.
                warn!(job = %job_id, seq, %error, "failed to deliver SIGTERM");
            }
        }
        tokio::spawn(async move {
            tokio::time::sleep(KILL_GRACE).await;
            let _ = killpg(group, Signal::SIGKILL);
        });
        Ok(())
    }

    fn run_condition(&mut self, job: &Job) -> Result<bool> {
        run_condition_blocking(&self.identity, &self.config_dir, job)
    }
}

/// Synchronous condition evaluation. Suspending the engine here is a
/// deliberate design constraint; the timeout keeps the suspension bounded.
pub fn run_condition_blocking(
    identity: &Identity,
    config_dir: &Path,
    job: &Job,
) -> Result<bool> {
    let Some(condition) = &job.condition else {
        return Ok(true);
    };
    let mut child = std::process::Command::new(&identity.shell)
        .arg("-c")
        .arg(condition)
        .env_clear()
        .envs(job_environment(identity, config_dir, &job.id, &job.queue))
        .current_dir(&identity.home)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn condition shell")?;

    let deadline = std::time::Instant::now() + CONDITION_TIMEOUT;
    loop {
        match child.try_wait().context("failed to poll condition")? {
            Some(status) => return Ok(status.success()),
            None if std::time::Instant::now() >= deadline => {
                warn!(job = %job.id, "condition ran past its time bound; killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(false);
            }
            None => std::thread::sleep(StdDuration::from_millis(50)),
        }
    }
}

/// One-shot synchronous execution for the run-one-job-now entry point.
pub fn run_job_blocking(
    identity: &Identity,
    config_dir: &Path,
    job: &Job,
) -> Result<(ExitDisposition, String)> {
    let script = write_job_script(job, config_dir)?;
    let output = std::process::Command::new(&identity.shell)
        .arg(script.path())
        .env_clear()
        .envs(job_environment(identity, config_dir, &job.id, &job.queue))
        .current_dir(&identity.home)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("failed to spawn {}", identity.shell.display()))?;

    let disposition = disposition_from_status(output.status);
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if text.len() > OUTPUT_LIMIT {
        text.truncate(OUTPUT_LIMIT);
        text.push_str("\n[output truncated]\n");
    }
    Ok((disposition, text))
}

/// The synthesized child environment.
fn job_environment(
    identity: &Identity,
    config_dir: &Path,
    job_id: &str,
    queue: &str,
) -> Vec<(String, String)> {
    vec![
        ("USER".to_string(), identity.username.clone()),
        ("LOGNAME".to_string(), identity.username.clone()),
        ("UID".to_string(), identity.uid.to_string()),
        ("GID".to_string(), identity.gid.to_string()),
        ("HOME".to_string(), identity.home.display().to_string()),
        ("SHELL".to_string(), identity.shell.display().to_string()),
        ("PATH".to_string(), identity.path_env().to_string()),
        ("PCRONDIR".to_string(), config_dir.display().to_string()),
        ("JOB_ID".to_string(), job_id.to_string()),
        ("JOB_QUEUE".to_string(), queue.to_string()),
    ]
}

/// Writes the environment file (if any) and the job command into one
/// temporary script. An unreadable environment file fails the instance
/// before the command runs.
fn write_job_script(job: &Job, config_dir: &Path) -> Result<tempfile::NamedTempFile> {
    let mut source = String::new();
    let environment_path = config_dir.join(ENVIRONMENT_FILE);
    match fs::read_to_string(&environment_path) {
        Ok(environment) => {
            source.push_str(&environment);
            if !source.ends_with('\n') {
                source.push('\n');
            }
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(error).with_context(|| {
                format!("failed to read {}", environment_path.display())
            });
        }
    }
    source.push_str(&job.command);
    source.push('\n');

    let mut script = tempfile::Builder::new()
        .prefix(".pcron-job-")
        .suffix(".sh")
        .tempfile_in(config_dir)
        .context("failed to create job script")?;
    script
        .write_all(source.as_bytes())
        .context("failed to write job script")?;
    script.flush().context("failed to flush job script")?;
    Ok(script)
}

fn disposition_from_status(status: std::process::ExitStatus) -> ExitDisposition {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ExitDisposition::Exited(code),
        None => ExitDisposition::Signaled(status.signal().unwrap_or(0)),
    }
}

/// Reads a stream to EOF, keeping at most `limit` bytes. The stream is
/// always drained so a chatty child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if buffer.len() < limit {
                    let take = n.min(limit - buffer.len());
                    buffer.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }
    let mut output = String::from_utf8_lossy(&buffer).into_owned();
    if truncated {
        output.push_str("\n[output truncated]\n");
    }
    output
}
