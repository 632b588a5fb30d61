//! Sendmail transport
//!
//! Posts messages to a sendmail-compatible binary over its standard input.
//! Delivery runs on a detached thread so a slow MTA cannot stall the
//! scheduler; the one-shot CLI path uses the blocking variant directly.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::application::engine::ports::{MailMessage, MailTransport};

pub struct SendmailTransport;

impl MailTransport for SendmailTransport {
    fn deliver(&self, message: &MailMessage) -> Result<()> {
        let message = message.clone();
        std::thread::spawn(move || {
            if let Err(error) = deliver_blocking(&message) {
                warn!(to = %message.to, %error, "mail delivery failed");
            }
        });
        Ok(())
    }
}

/// Runs the sendmail binary and feeds it the composed message.
pub fn deliver_blocking(message: &MailMessage) -> Result<()> {
    let mut child = Command::new(&message.sendmail)
        .arg("-oi")
        .arg("-t")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn {}", message.sendmail))?;

    {
        let stdin = child.stdin.as_mut().context("sendmail stdin unavailable")?;
        write!(
            stdin,
            "To: {}\nSubject: {}\n\n{}",
            message.to, message.subject, message.body
        )
        .context("failed to write mail")?;
    }

    let status = child.wait().context("failed to wait for sendmail")?;
    if !status.success() {
        bail!("{} exited with {}", message.sendmail, status);
    }
    Ok(())
}
