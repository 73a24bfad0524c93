//! Workspace isolation.
//!
//! A session that reaches READY writes into an overlay: a git worktree of a
//! task branch forked from the base branch, mounted under the overlay
//! directory. Nothing touches the main checkout until the reviewed changes
//! are committed on the task branch and merged back.
//!
//! Checkout, branch creation and mounting run under a repository-wide file
//! lock. Every running session also holds a lease in the store's `live/`
//! directory; artifacts without a held lease belong to crashed sessions and
//! block new overlays until `guardrail cleanup` removes them.

pub mod cleanup;
pub mod git;
pub mod lock;

pub use cleanup::{Artifact, ArtifactKind};
pub use git::{ChangeKind, ChangedPath, MergeOutcome};
pub use lock::{IsolationLock, Lease, LockHolder};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{GuardError, GuardResult, IsolationError, ValidationError};
use crate::guard_config::IsolationSection;
use crate::session::OverlayInfo;
use crate::store::RepoStore;
use crate::util::short_id;
use cleanup::{Layout, WORKTREE_PREFIX};

/// Per-path verdict given during review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Keep,
    Discard,
}

pub struct IsolationManager {
    repo_root: PathBuf,
    overlay_root: PathBuf,
    live_dir: PathBuf,
    lock: IsolationLock,
    settings: IsolationSection,
}

impl IsolationManager {
    pub fn new(config: &Config, store: &RepoStore) -> Self {
        Self {
            repo_root: config.repo_root.clone(),
            overlay_root: config.overlay_dir.clone(),
            live_dir: store.live_dir(),
            lock: IsolationLock::new(store.isolation_lock_path()),
            settings: config.settings.isolation.clone(),
        }
    }

    /// Take the liveness lease for a session.
    pub fn lease(&self, session_id: &Uuid) -> GuardResult<Lease> {
        Ok(Lease::acquire(&self.live_dir, &short_id(session_id))?)
    }

    fn layout<'a>(&'a self, repo: &'a git2::Repository) -> Layout<'a> {
        Layout {
            repo,
            branch_prefix: &self.settings.branch_prefix,
            overlay_root: &self.overlay_root,
            live_dir: &self.live_dir,
        }
    }

    /// Fork a task branch from the base branch and mount it as the session's
    /// overlay. Fails with a resource conflict while artifacts of crashed
    /// sessions are present.
    pub fn begin(&self, session_id: &Uuid) -> GuardResult<OverlayInfo> {
        let id = short_id(session_id);
        let _guard = self.lock.acquire(&id)?;
        let repo = git::open(&self.repo_root)?;
        let base = git::resolve_base_branch(&repo, self.settings.effective_base_branch())?;

        let (live, _) = lock::scan_leases(&self.live_dir);
        let orphans = cleanup::find_orphans(&self.layout(&repo), &live)?;
        if !orphans.is_empty() {
            let listed: Vec<String> = orphans.iter().map(|a| a.to_string()).collect();
            return Err(GuardError::ResourceConflict {
                detail: format!(
                    "leftovers from crashed sessions: {}",
                    listed.join(", ")
                ),
                recovery: "run `guardrail cleanup` to remove them, or merge the listed branches manually"
                    .to_string(),
            });
        }

        let branch = format!("{}{}", self.settings.branch_prefix, id);
        let worktree = format!("{}{}", WORKTREE_PREFIX, id);
        let mount = self.overlay_root.join(&id);
        git::create_branch(&repo, &branch, &base)?;
        if let Err(e) = git::add_worktree(&repo, &worktree, &mount, &branch) {
            if let Err(rollback) = git::delete_branch(&repo, &branch) {
                warn!(branch = %branch, error = %rollback, "failed to roll back task branch");
            }
            return Err(e.into());
        }

        info!(session = %id, branch = %branch, base = %base, "overlay mounted");
        Ok(OverlayInfo {
            branch,
            mount_path: mount.to_string_lossy().to_string(),
            base_branch: base,
            commit: None,
        })
    }

    /// Changed paths in the overlay relative to its branch head.
    pub fn review(&self, overlay: &OverlayInfo) -> GuardResult<Vec<ChangedPath>> {
        Ok(git::changed_paths(Path::new(&overlay.mount_path))?)
    }

    /// Commit kept paths on the task branch and restore discarded ones.
    /// Every changed path needs a decision and at least one must be kept.
    pub fn finalize(
        &self,
        overlay: &OverlayInfo,
        decisions: &BTreeMap<String, ReviewDecision>,
        message: &str,
    ) -> GuardResult<String> {
        let mount = Path::new(&overlay.mount_path);
        let changes = git::changed_paths(mount)?;
        if changes.is_empty() {
            return Err(ValidationError::Invalid("the overlay has no changes to commit".into()).into());
        }

        let unknown: Vec<&str> = decisions
            .keys()
            .filter(|p| !changes.iter().any(|c| &c.path == *p))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(ValidationError::Invalid(format!(
                "decisions name paths that did not change: {}",
                unknown.join(", ")
            ))
            .into());
        }
        let undecided: Vec<&str> = changes
            .iter()
            .filter(|c| !decisions.contains_key(&c.path))
            .map(|c| c.path.as_str())
            .collect();
        if !undecided.is_empty() {
            return Err(ValidationError::Invalid(format!(
                "every changed path needs keep or discard; missing: {}",
                undecided.join(", ")
            ))
            .into());
        }

        let (kept, discarded): (Vec<&ChangedPath>, Vec<&ChangedPath>) = changes
            .iter()
            .partition(|c| decisions.get(&c.path) == Some(&ReviewDecision::Keep));
        if kept.is_empty() {
            return Err(ValidationError::Invalid(
                "nothing to commit: every change was discarded".into(),
            )
            .into());
        }

        let commit = git::commit_reviewed(mount, &kept, &discarded, message)?;
        info!(
            branch = %overlay.branch,
            commit = %commit,
            kept = kept.len(),
            discarded = discarded.len(),
            "reviewed changes committed"
        );
        Ok(commit)
    }

    /// Merge the task branch into its base, then unmount the overlay and
    /// delete the branch. On conflict everything is left in place.
    pub fn merge(&self, overlay: &OverlayInfo) -> GuardResult<MergeOutcome> {
        let id = self.overlay_id(overlay);
        let _guard = self.lock.acquire(&id)?;
        let repo = git::open(&self.repo_root)?;
        let outcome = git::merge_into_base(&repo, &overlay.base_branch, &overlay.branch)?;
        self.unmount(&repo, overlay, &id)?;
        info!(
            branch = %overlay.branch,
            base = %overlay.base_branch,
            commit = %outcome.commit,
            fast_forward = outcome.fast_forward,
            "task branch merged"
        );
        Ok(outcome)
    }

    fn overlay_id(&self, overlay: &OverlayInfo) -> String {
        overlay
            .branch
            .strip_prefix(&self.settings.branch_prefix)
            .unwrap_or(&overlay.branch)
            .to_string()
    }

    fn unmount(&self, repo: &git2::Repository, overlay: &OverlayInfo, id: &str) -> GuardResult<()> {
        let worktree = format!("{}{}", WORKTREE_PREFIX, id);
        git::remove_worktree(repo, &worktree, Path::new(&overlay.mount_path))?;
        git::delete_branch(repo, &overlay.branch)?;
        Ok(())
    }

    /// Remove artifacts of crashed sessions. Failures are reported as
    /// conflicts; they never touch a running session's overlay.
    pub fn cleanup_stale(&self) -> GuardResult<Vec<Artifact>> {
        self.sweep().map_err(maintenance_failure("cleanup"))
    }

    fn sweep(&self) -> Result<Vec<Artifact>, IsolationError> {
        let crashed_holder = self.lock.clear_stale()?;
        let _guard = self.lock.acquire("cleanup")?;
        let repo = git::open(&self.repo_root)?;
        let mut removed = cleanup::cleanup_stale(&self.layout(&repo))?;
        if let Some(holder) = crashed_holder {
            info!(session = %holder.session, pid = holder.pid, "cleared crashed isolation lock holder");
            removed.push(Artifact::new(ArtifactKind::Lock, holder.session));
        }
        Ok(removed)
    }

    /// Artifacts of crashed sessions, without removing anything.
    pub fn orphans(&self) -> GuardResult<Vec<Artifact>> {
        self.scan().map_err(maintenance_failure("orphan scan"))
    }

    fn scan(&self) -> Result<Vec<Artifact>, IsolationError> {
        let repo = git::open(&self.repo_root)?;
        let (live, stale) = lock::scan_leases(&self.live_dir);
        let mut found = cleanup::find_orphans(&self.layout(&repo), &live)?;
        found.extend(stale.into_iter().map(|s| Artifact::new(ArtifactKind::Lease, s)));
        if let Some(holder) = self.lock.stale_holder()? {
            found.push(Artifact::new(ArtifactKind::Lock, holder.session));
        }
        Ok(found)
    }
}

fn maintenance_failure(action: &'static str) -> impl FnOnce(IsolationError) -> GuardError {
    move |e| GuardError::ResourceConflict {
        detail: format!("{} failed: {}", action, e),
        recovery: "check that the repository is intact, then run `guardrail cleanup` again"
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard_config::GuardToml;
    use std::fs;
    use std::sync::Arc;
    use std::thread;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        _state: TempDir,
        root: PathBuf,
        store: RepoStore,
        manager: IsolationManager,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let state = tempdir().unwrap();
        git::tests::init_repo(dir.path());
        let root = dir.path().canonicalize().unwrap();
        let mut config = Config::with_settings(root.clone(), false, GuardToml::default());
        config.state_dir = state.path().to_path_buf();
        config.ensure_directories().unwrap();
        let store = RepoStore::open(&config.state_dir).unwrap();
        let manager = IsolationManager::new(&config, &store);
        Fixture {
            _dir: dir,
            _state: state,
            root,
            store,
            manager,
        }
    }

    #[test]
    fn test_full_lifecycle_merges_kept_changes() {
        let fx = fixture();
        let id = Uuid::new_v4();
        let lease = fx.manager.lease(&id).unwrap();
        let overlay = fx.manager.begin(&id).unwrap();
        assert_eq!(overlay.base_branch, "main");
        assert_eq!(overlay.branch, format!("guardrail/task-{}", short_id(&id)));

        let mount = PathBuf::from(&overlay.mount_path);
        fs::write(mount.join("src/lib.rs"), "pub fn login() { check() }\n").unwrap();
        fs::write(mount.join("debug.log"), "noise\n").unwrap();
        let changes = fx.manager.review(&overlay).unwrap();
        assert_eq!(changes.len(), 2);

        let mut decisions = BTreeMap::new();
        decisions.insert("src/lib.rs".to_string(), ReviewDecision::Keep);
        let err = fx.manager.finalize(&overlay, &decisions, "fix login").unwrap_err();
        assert!(err.to_string().contains("debug.log"));

        decisions.insert("debug.log".to_string(), ReviewDecision::Discard);
        fx.manager.finalize(&overlay, &decisions, "fix login").unwrap();

        let outcome = fx.manager.merge(&overlay).unwrap();
        assert!(outcome.fast_forward);
        assert_eq!(
            fs::read_to_string(fx.root.join("src/lib.rs")).unwrap(),
            "pub fn login() { check() }\n"
        );
        assert!(!fx.root.join("debug.log").exists());
        assert!(!mount.exists());
        lease.release();
        assert!(fx.manager.orphans().unwrap().is_empty());
    }

    #[test]
    fn test_all_discarded_is_rejected() {
        let fx = fixture();
        let id = Uuid::new_v4();
        let _lease = fx.manager.lease(&id).unwrap();
        let overlay = fx.manager.begin(&id).unwrap();
        fs::write(Path::new(&overlay.mount_path).join("tmp.txt"), "x").unwrap();

        let mut decisions = BTreeMap::new();
        decisions.insert("tmp.txt".to_string(), ReviewDecision::Discard);
        let err = fx.manager.finalize(&overlay, &decisions, "m").unwrap_err();
        assert!(err.to_string().contains("nothing to commit"));

        decisions.insert("ghost.rs".to_string(), ReviewDecision::Keep);
        let err = fx.manager.finalize(&overlay, &decisions, "m").unwrap_err();
        assert!(err.to_string().contains("ghost.rs"));
    }

    #[test]
    fn test_concurrent_sessions_get_separate_overlays() {
        let fx = fixture();
        let manager = Arc::new(fx.manager);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let leases: Vec<Lease> = ids.iter().map(|id| manager.lease(id).unwrap()).collect();

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let manager = Arc::clone(&manager);
                let id = *id;
                thread::spawn(move || manager.begin(&id).unwrap())
            })
            .collect();
        let overlays: Vec<OverlayInfo> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mounts: std::collections::BTreeSet<&str> =
            overlays.iter().map(|o| o.mount_path.as_str()).collect();
        assert_eq!(mounts.len(), 3);
        let repo = git::open(&fx.root).unwrap();
        assert_eq!(git::worktree_names(&repo).unwrap().len(), 3);
        assert!(manager.orphans().unwrap().is_empty());
        drop(leases);
    }

    #[test]
    fn test_orphaned_branch_blocks_begin_until_cleanup() {
        let fx = fixture();
        {
            let repo = git::open(&fx.root).unwrap();
            git::create_branch(&repo, "guardrail/task-deadbeef", "main").unwrap();
        }
        let id = Uuid::new_v4();
        let _lease = fx.manager.lease(&id).unwrap();
        match fx.manager.begin(&id).unwrap_err() {
            GuardError::ResourceConflict { detail, recovery } => {
                assert!(detail.contains("guardrail/task-deadbeef"));
                assert!(recovery.contains("guardrail cleanup"));
            }
            other => panic!("expected ResourceConflict, got {:?}", other),
        }

        let removed = fx.manager.cleanup_stale().unwrap();
        assert_eq!(
            removed,
            vec![Artifact::new(ArtifactKind::Branch, "guardrail/task-deadbeef")]
        );
        assert!(fx.manager.begin(&id).is_ok());
    }

    #[test]
    fn test_cleanup_removes_crashed_session_but_not_live_one() {
        let fx = fixture();
        let crashed = Uuid::new_v4();
        let crashed_lease = fx.manager.lease(&crashed).unwrap();
        let crashed_overlay = fx.manager.begin(&crashed).unwrap();
        // Dropping without release leaves the lease file unheld.
        drop(crashed_lease);

        let alive = Uuid::new_v4();
        let _alive_lease = fx.manager.lease(&alive).unwrap();

        let removed = fx.manager.cleanup_stale().unwrap();
        let kinds: Vec<ArtifactKind> = removed.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&ArtifactKind::Worktree));
        assert!(kinds.contains(&ArtifactKind::Branch));
        assert!(kinds.contains(&ArtifactKind::Lease));
        assert!(!Path::new(&crashed_overlay.mount_path).exists());
        assert!(lock::is_live(&fx.store.live_dir(), &short_id(&alive)));

        let overlay = fx.manager.begin(&alive).unwrap();
        assert!(Path::new(&overlay.mount_path).exists());
    }
}
