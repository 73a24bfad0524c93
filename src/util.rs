//! Shared utility functions for the guardrail crate.

use anyhow::{Result, anyhow};
use std::path::{Component, Path};
use std::time::Duration;

/// Run blocking work on the blocking pool, bounded by `timeout`.
///
/// Long-running calls (corpus sync, embedding, doc scans) stay synchronous in
/// the core; only the caller boundary is async.
pub async fn run_bounded<T, F>(timeout: Duration, label: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, handle).await {
        Ok(joined) => joined.map_err(|e| anyhow!("{} task failed to join: {}", label, e))?,
        Err(_) => Err(anyhow!(
            "{} timed out after {}s",
            label,
            timeout.as_secs_f64()
        )),
    }
}

/// Normalize a user-supplied path to a repository-relative, `/`-separated
/// form. Returns `None` for paths escaping the root.
pub fn normalize_rel_path(root: &Path, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = Path::new(trimmed);
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).ok()?
    } else {
        candidate
    };

    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Parent directory of a normalized relative path ("" for top-level files).
pub fn parent_dir(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// First eight characters of an id, used for branch and directory names.
pub fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relative_paths() {
        let root = Path::new("/repo");
        assert_eq!(
            normalize_rel_path(root, "./src/lib.rs").as_deref(),
            Some("src/lib.rs")
        );
        assert_eq!(
            normalize_rel_path(root, "src/../src/a.rs").as_deref(),
            Some("src/a.rs")
        );
        assert_eq!(
            normalize_rel_path(root, "/repo/styles/header.css").as_deref(),
            Some("styles/header.css")
        );
    }

    #[test]
    fn test_normalize_rejects_escapes() {
        let root = Path::new("/repo");
        assert_eq!(normalize_rel_path(root, "../etc/passwd"), None);
        assert_eq!(normalize_rel_path(root, "/etc/passwd"), None);
        assert_eq!(normalize_rel_path(root, "   "), None);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("src/auth/login.rs"), "src/auth");
        assert_eq!(parent_dir("README.md"), "");
    }

    #[test]
    fn test_short_id_length() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(short_id(&id).len(), 8);
    }

    #[tokio::test]
    async fn test_run_bounded_returns_value() {
        let value = run_bounded(Duration::from_secs(5), "add", || Ok(2 + 2))
            .await
            .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn test_run_bounded_times_out() {
        let result = run_bounded(Duration::from_millis(20), "sleep", || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }
}
