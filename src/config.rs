use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::guard_config::GuardToml;

/// Name of the per-project directory holding config and state.
pub const GUARD_DIR_NAME: &str = ".guardrail";

/// Runtime configuration for guardrail.
///
/// Bridges the file-level `GuardToml` with the resolved paths every component
/// needs. State is namespaced per repository so several repositories can share
/// one state root (`GUARDRAIL_STATE_DIR`).
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_root: PathBuf,
    pub guard_dir: PathBuf,
    pub state_dir: PathBuf,
    pub overlay_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub settings: GuardToml,
}

impl Config {
    pub fn new(repo_root: PathBuf, verbose: bool) -> Result<Self> {
        let repo_root = repo_root
            .canonicalize()
            .context("Failed to resolve repository directory")?;
        let guard_dir = repo_root.join(GUARD_DIR_NAME);
        let settings = GuardToml::load_or_default(&guard_dir)?;
        Ok(Self::with_settings(repo_root, verbose, settings))
    }

    /// Build from already-loaded settings. `repo_root` must be canonical.
    pub fn with_settings(repo_root: PathBuf, verbose: bool, settings: GuardToml) -> Self {
        let guard_dir = repo_root.join(GUARD_DIR_NAME);
        let state_root = std::env::var("GUARDRAIL_STATE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| guard_dir.join("state"));
        let state_dir = state_root.join(repo_namespace(&repo_root));
        let overlay_dir = repo_root.join(&settings.isolation.worktree_dir);
        let log_dir = guard_dir.join("logs");

        Self {
            repo_root,
            guard_dir,
            state_dir,
            overlay_dir,
            log_dir,
            verbose,
            settings,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.guard_dir.join("guardrail.toml")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.overlay_dir)
            .context("Failed to create overlay directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;

        // Keep overlays and state out of the repository's own status.
        let ignore = self.guard_dir.join(".gitignore");
        if !ignore.exists() {
            std::fs::write(&ignore, "*\n!.gitignore\n!guardrail.toml\n")
                .context("Failed to write .guardrail/.gitignore")?;
        }
        Ok(())
    }
}

/// Stable directory name for a repository: `<dir-name>-<hash12>`.
pub fn repo_namespace(repo_root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_root.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let name = repo_root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}-{}", name, &digest[..12])
}
