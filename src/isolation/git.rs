//! git2 plumbing for task branches, overlay worktrees, review, commit and merge.

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, MergeOptions, Oid, Repository, Signature, Status, StatusOptions,
    WorktreeAddOptions, WorktreePruneOptions,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::errors::{GuardError, GuardResult, IsolationError};

const SIGNATURE_NAME: &str = "guardrail";
const SIGNATURE_EMAIL: &str = "guardrail@localhost";

type GitResult<T> = Result<T, IsolationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPath {
    pub path: String,
    pub change: ChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub commit: String,
    pub fast_forward: bool,
}

pub fn open(path: &Path) -> GitResult<Repository> {
    Repository::open(path).map_err(IsolationError::git("open repository"))
}

fn signature() -> GitResult<Signature<'static>> {
    Signature::now(SIGNATURE_NAME, SIGNATURE_EMAIL).map_err(IsolationError::git("signature"))
}

/// The configured base branch, or the branch checked out in the main working
/// tree.
pub fn resolve_base_branch(repo: &Repository, configured: Option<String>) -> GitResult<String> {
    if let Some(base) = configured {
        repo.find_branch(&base, BranchType::Local)
            .map_err(IsolationError::git("find base branch"))?;
        return Ok(base);
    }
    let head = repo.head().map_err(IsolationError::git("read HEAD"))?;
    if !head.is_branch() {
        return Err(IsolationError::Git {
            step: "read HEAD",
            source: git2::Error::from_str(
                "HEAD is detached; set isolation.base_branch or GUARDRAIL_BASE_BRANCH",
            ),
        });
    }
    head.shorthand()
        .map(str::to_string)
        .ok_or_else(|| IsolationError::Git {
            step: "read HEAD",
            source: git2::Error::from_str("HEAD branch name is not UTF-8"),
        })
}

/// Local branches whose name starts with `prefix`.
pub fn branches_with_prefix(repo: &Repository, prefix: &str) -> GitResult<Vec<String>> {
    let mut names = Vec::new();
    for item in repo
        .branches(Some(BranchType::Local))
        .map_err(IsolationError::git("list branches"))?
    {
        let (branch, _) = item.map_err(IsolationError::git("list branches"))?;
        if let Ok(Some(name)) = branch.name()
            && name.starts_with(prefix)
        {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn create_branch(repo: &Repository, name: &str, base: &str) -> GitResult<Oid> {
    let base_commit = repo
        .find_branch(base, BranchType::Local)
        .and_then(|b| b.get().peel_to_commit())
        .map_err(IsolationError::git("resolve base commit"))?;
    repo.branch(name, &base_commit, false)
        .map_err(IsolationError::git("create task branch"))?;
    Ok(base_commit.id())
}

/// Check out `branch` into a new worktree at `path`.
pub fn add_worktree(repo: &Repository, name: &str, path: &Path, branch: &str) -> GitResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(IsolationError::io(parent))?;
    }
    let reference = repo
        .find_branch(branch, BranchType::Local)
        .map_err(IsolationError::git("find task branch"))?
        .into_reference();
    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(&reference));
    repo.worktree(name, path, Some(&opts))
        .map_err(IsolationError::git("add worktree"))?;
    debug!(name, path = %path.display(), branch, "worktree mounted");
    Ok(())
}

/// Registered worktree names.
pub fn worktree_names(repo: &Repository) -> GitResult<Vec<String>> {
    let names = repo
        .worktrees()
        .map_err(IsolationError::git("list worktrees"))?;
    Ok(names.iter().flatten().map(str::to_string).collect())
}

/// Remove a worktree's directory and its registration.
pub fn remove_worktree(repo: &Repository, name: &str, path: &Path) -> GitResult<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(IsolationError::io(path))?;
    }
    if let Ok(worktree) = repo.find_worktree(name) {
        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).locked(true).working_tree(true);
        worktree
            .prune(Some(&mut opts))
            .map_err(IsolationError::git("prune worktree"))?;
    }
    Ok(())
}

pub fn delete_branch(repo: &Repository, name: &str) -> GitResult<bool> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(mut branch) => {
            branch
                .delete()
                .map_err(IsolationError::git("delete task branch"))?;
            Ok(true)
        }
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
        Err(e) => Err(IsolationError::git("find task branch")(e)),
    }
}

fn change_kind(status: Status) -> Option<ChangeKind> {
    if status.intersects(Status::WT_NEW | Status::INDEX_NEW) {
        Some(ChangeKind::Added)
    } else if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
        Some(ChangeKind::Deleted)
    } else if status.intersects(
        Status::WT_MODIFIED
            | Status::INDEX_MODIFIED
            | Status::WT_RENAMED
            | Status::INDEX_RENAMED
            | Status::WT_TYPECHANGE
            | Status::INDEX_TYPECHANGE,
    ) {
        Some(ChangeKind::Modified)
    } else {
        None
    }
}

/// Every changed path in the worktree at `path`, untracked files included.
pub fn changed_paths(path: &Path) -> GitResult<Vec<ChangedPath>> {
    let repo = open(path)?;
    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(false);
    let statuses = repo
        .statuses(Some(&mut opts))
        .map_err(IsolationError::git("read status"))?;

    let mut changes: Vec<ChangedPath> = statuses
        .iter()
        .filter_map(|entry| {
            let change = change_kind(entry.status())?;
            let path = entry.path()?.to_string();
            Some(ChangedPath { path, change })
        })
        .collect();
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(changes)
}

/// Stage `kept`, restore `discarded`, and commit once on the worktree's
/// branch. Returns the new commit id.
pub fn commit_reviewed(
    path: &Path,
    kept: &[&ChangedPath],
    discarded: &[&ChangedPath],
    message: &str,
) -> GitResult<String> {
    let repo = open(path)?;

    for change in discarded {
        match change.change {
            ChangeKind::Added => {
                let file = path.join(&change.path);
                if file.exists() {
                    fs::remove_file(&file).map_err(IsolationError::io(&file))?;
                }
            }
            ChangeKind::Modified | ChangeKind::Deleted => {
                let mut checkout = CheckoutBuilder::new();
                checkout.force().path(&change.path);
                repo.checkout_head(Some(&mut checkout))
                    .map_err(IsolationError::git("restore discarded path"))?;
            }
        }
    }

    let mut index = repo.index().map_err(IsolationError::git("open index"))?;
    for change in discarded {
        if change.change == ChangeKind::Added {
            let _ = index.remove_path(Path::new(&change.path));
        }
    }
    for change in kept {
        let rel = Path::new(&change.path);
        let result = if path.join(rel).exists() {
            index.add_path(rel)
        } else {
            index.remove_path(rel)
        };
        result.map_err(IsolationError::git("stage kept path"))?;
    }
    index.write().map_err(IsolationError::git("write index"))?;
    let tree_id = index
        .write_tree()
        .map_err(IsolationError::git("write tree"))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(IsolationError::git("find tree"))?;

    let parent = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(IsolationError::git("read task branch head"))?;
    let sig = signature()?;
    let oid = repo
        .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
        .map_err(IsolationError::git("commit"))?;
    Ok(oid.to_string())
}

fn head_is_branch(repo: &Repository, branch: &str) -> bool {
    repo.head()
        .ok()
        .filter(|h| h.is_branch())
        .and_then(|h| h.shorthand().map(|s| s == branch))
        .unwrap_or(false)
}

/// Merge `task` into `base`: fast-forward when possible, otherwise a merge
/// commit. Conflicts are reported, never resolved.
pub fn merge_into_base(repo: &Repository, base: &str, task: &str) -> GuardResult<MergeOutcome> {
    let mut base_ref = repo
        .find_branch(base, BranchType::Local)
        .map_err(IsolationError::git("find base branch"))?
        .into_reference();
    let task_commit = repo
        .find_branch(task, BranchType::Local)
        .and_then(|b| b.get().peel_to_commit())
        .map_err(IsolationError::git("resolve task commit"))?;
    let annotated = repo
        .find_annotated_commit(task_commit.id())
        .map_err(IsolationError::git("annotate task commit"))?;
    let (analysis, _) = repo
        .merge_analysis_for_ref(&base_ref, &[&annotated])
        .map_err(IsolationError::git("merge analysis"))?;

    let base_commit = base_ref
        .peel_to_commit()
        .map_err(IsolationError::git("resolve base commit"))?;

    if analysis.is_up_to_date() {
        return Ok(MergeOutcome {
            commit: base_commit.id().to_string(),
            fast_forward: true,
        });
    }

    let (target, fast_forward) = if analysis.is_fast_forward() {
        (task_commit.id(), true)
    } else {
        let mut index = repo
            .merge_commits(&base_commit, &task_commit, Some(&MergeOptions::new()))
            .map_err(IsolationError::git("merge commits"))?;
        if index.has_conflicts() {
            let conflicted: Vec<String> = index
                .conflicts()
                .map(|it| {
                    it.flatten()
                        .filter_map(|c| c.our.or(c.their).or(c.ancestor))
                        .map(|e| String::from_utf8_lossy(&e.path).to_string())
                        .collect()
                })
                .unwrap_or_default();
            return Err(GuardError::ResourceConflict {
                detail: format!(
                    "merging {} into {} conflicts in {}",
                    task,
                    base,
                    conflicted.join(", ")
                ),
                recovery: format!(
                    "resolve the conflict by merging {} into {} manually, then run `guardrail cleanup`",
                    task, base
                ),
            });
        }
        let tree_id = index
            .write_tree_to(repo)
            .map_err(IsolationError::git("write merge tree"))?;
        let tree = repo
            .find_tree(tree_id)
            .map_err(IsolationError::git("find merge tree"))?;
        let sig = signature()?;
        let oid = repo
            .commit(
                None,
                &sig,
                &sig,
                &format!("guardrail: merge {} into {}", task, base),
                &tree,
                &[&base_commit, &task_commit],
            )
            .map_err(IsolationError::git("merge commit"))?;
        (oid, false)
    };

    // Update the main checkout while HEAD still names the old base commit,
    // so unrelated local edits are preserved.
    if head_is_branch(repo, base) {
        let object = repo
            .find_object(target, None)
            .map_err(IsolationError::git("find merge result"))?;
        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        repo.checkout_tree(&object, Some(&mut checkout))
            .map_err(IsolationError::git("update base checkout"))?;
    }
    base_ref
        .set_target(target, &format!("guardrail: merge {}", task))
        .map_err(IsolationError::git("advance base branch"))?;
    debug!(base, task, commit = %target, fast_forward, "task branch merged");

    Ok(MergeOutcome {
        commit: target.to_string(),
        fast_forward,
    })
}
