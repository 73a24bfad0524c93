use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::Session;
use crate::store::write_json_atomic;

/// Archive of ended sessions, one JSON file per session.
pub struct SessionArchive {
    dir: PathBuf,
}

impl SessionArchive {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `session` as `<created_at>_<id8>.json`. Saving the same session
    /// again overwrites its file.
    pub fn save(&self, session: &Session) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).context("Failed to create session archive directory")?;
        let filename = format!(
            "{}_{}.json",
            session.created_at.format("%Y-%m-%dT%H-%M-%S"),
            session.short_id()
        );
        let path = self.dir.join(filename);
        write_json_atomic(&path, session).context("Failed to write session archive file")?;
        debug!(session = %session.short_id(), path = %path.display(), "session archived");
        Ok(path)
    }

    /// Archived session files, most recent first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut sessions: Vec<PathBuf> = fs::read_dir(&self.dir)
            .context("Failed to read session archive directory")?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        sessions.sort();
        sessions.reverse();
        Ok(sessions)
    }

    pub fn load(&self, path: &Path) -> Result<Session> {
        let content = fs::read_to_string(path).context("Failed to read session archive file")?;
        let session: Session =
            serde_json::from_str(&content).context("Failed to parse session archive file")?;
        Ok(session)
    }
}
