//! Detection and removal of isolation artifacts left by crashed sessions.

use git2::Repository;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::git;
use super::lock::Lease;
use crate::errors::IsolationError;

/// Prefix of worktree registrations created for task overlays.
pub const WORKTREE_PREFIX: &str = "task-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Worktree,
    Overlay,
    Branch,
    Lease,
    Lock,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worktree => "worktree",
            Self::Overlay => "overlay",
            Self::Branch => "branch",
            Self::Lease => "lease",
            Self::Lock => "lock",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.name)
    }
}

/// Where isolation artifacts live for one repository.
pub struct Layout<'a> {
    pub repo: &'a Repository,
    pub branch_prefix: &'a str,
    pub overlay_root: &'a Path,
    pub live_dir: &'a Path,
}

fn overlay_dirs(root: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            Some((name, e.path()))
        })
        .collect();
    dirs.sort();
    dirs
}

fn head_branch(repo: &Repository) -> Option<String> {
    let head = repo.head().ok()?;
    if !head.is_branch() {
        return None;
    }
    head.shorthand().map(str::to_string)
}

/// Worktrees, overlay directories and task branches that no live lease owns.
pub fn find_orphans(
    layout: &Layout<'_>,
    live: &BTreeSet<String>,
) -> Result<Vec<Artifact>, IsolationError> {
    let mut orphans = Vec::new();

    for name in git::worktree_names(layout.repo)? {
        if let Some(id) = name.strip_prefix(WORKTREE_PREFIX)
            && !live.contains(id)
        {
            orphans.push(Artifact::new(ArtifactKind::Worktree, name));
        }
    }

    for (name, _) in overlay_dirs(layout.overlay_root) {
        if !live.contains(&name) {
            orphans.push(Artifact::new(ArtifactKind::Overlay, name));
        }
    }

    let head = head_branch(layout.repo);
    for branch in git::branches_with_prefix(layout.repo, layout.branch_prefix)? {
        if head.as_deref() == Some(branch.as_str()) {
            continue;
        }
        let id = &branch[layout.branch_prefix.len()..];
        if !live.contains(id) {
            orphans.push(Artifact::new(ArtifactKind::Branch, branch));
        }
    }

    Ok(orphans)
}

/// Remove every artifact owned by a dead session: orphaned worktrees and
/// overlays, their branches and unheld lease files. Artifacts of live
/// sessions are never touched. Callers hold the isolation lock.
pub fn cleanup_stale(layout: &Layout<'_>) -> Result<Vec<Artifact>, IsolationError> {
    let (live, stale_leases) = super::lock::scan_leases(layout.live_dir);
    let orphans = find_orphans(layout, &live)?;
    let mut removed = Vec::new();

    // Worktrees go first so their branches are no longer checked out.
    for artifact in orphans.iter().filter(|a| a.kind == ArtifactKind::Worktree) {
        let path = layout
            .repo
            .find_worktree(&artifact.name)
            .map(|wt| wt.path().to_path_buf())
            .unwrap_or_else(|_| {
                layout
                    .overlay_root
                    .join(artifact.name.trim_start_matches(WORKTREE_PREFIX))
            });
        git::remove_worktree(layout.repo, &artifact.name, &path)?;
        removed.push(artifact.clone());
    }

    for artifact in orphans.iter().filter(|a| a.kind == ArtifactKind::Overlay) {
        let path = layout.overlay_root.join(&artifact.name);
        if path.exists() {
            fs::remove_dir_all(&path).map_err(IsolationError::io(&path))?;
        }
        removed.push(artifact.clone());
    }

    for artifact in orphans.iter().filter(|a| a.kind == ArtifactKind::Branch) {
        if git::delete_branch(layout.repo, &artifact.name)? {
            removed.push(artifact.clone());
        }
    }

    for session in stale_leases {
        let path = Lease::path_for(layout.live_dir, &session);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(Artifact::new(ArtifactKind::Lease, session)),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale lease"),
        }
    }

    for artifact in &removed {
        info!(kind = artifact.kind.as_str(), name = %artifact.name, "removed stale artifact");
    }
    Ok(removed)
}
