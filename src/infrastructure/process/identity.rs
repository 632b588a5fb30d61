//! Account identity
//!
//! Everything the supervisor derives from the account database: who we are,
//! where home is, which login shell runs the jobs, and the hostname used in
//! mail subjects.

use std::path::PathBuf;

use anyhow::{Context, Result};
use nix::unistd::{gethostname, getuid, User};

#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
    pub hostname: String,
}

impl Identity {
    /// Looks up the current account.
    pub fn current() -> Result<Self> {
        let uid = getuid();
        let user = User::from_uid(uid)
            .context("account database lookup failed")?
            .with_context(|| format!("no account entry for uid {}", uid))?;
        let hostname = gethostname()
            .context("failed to read hostname")?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            username: user.name,
            uid: uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
            shell: user.shell,
            hostname,
        })
    }

    /// The fixed search path handed to every job; root also gets the sbin
    /// directories.
    pub fn path_env(&self) -> &'static str {
        if self.uid == 0 {
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
        } else {
            "/usr/local/bin:/usr/bin:/bin"
        }
    }
}
