//! File-backed state repository
//!
//! One JSON document holding every job record, replaced atomically on each
//! write: serialize to a temporary sibling, flush it to disk, then rename
//! over the live file. A crash mid-write leaves the previous version
//! intact.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::domain::entities::EngineState;
use crate::domain::repositories::StateRepository;

pub struct FileStateRepository {
    path: PathBuf,
}

impl FileStateRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl StateRepository for FileStateRepository {
    /// Loads the stored state; a missing file is an empty state, not an
    /// error.
    fn load(&self) -> Result<EngineState> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(EngineState::default());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        serde_json::from_str(&text)
            .with_context(|| format!("state file {} is corrupt", self.path.display()))
    }

    fn save(&self, state: &EngineState) -> Result<()> {
        let directory = self
            .path
            .parent()
            .context("state file has no parent directory")?;
        let mut scratch = tempfile::NamedTempFile::new_in(directory)
            .context("failed to create state scratch file")?;
        serde_json::to_writer_pretty(&mut scratch, state).context("failed to encode state")?;
        scratch.flush().context("failed to flush state")?;
        scratch
            .as_file()
            .sync_all()
            .context("failed to sync state")?;
        scratch
            .persist(&self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
