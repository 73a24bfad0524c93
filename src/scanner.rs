//! Repository file walker shared by exploration tools, corpus sync and the
//! documentation scan.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::guard_config::SearchSection;

/// Walks a repository and yields `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    extensions: Vec<String>,
    ignored_dirs: Vec<String>,
    max_file_bytes: u64,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, settings: &SearchSection) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: settings.source_extensions.clone(),
            ignored_dirs: settings.ignored_dirs.clone(),
            max_file_bytes: settings.max_file_bytes,
        }
    }

    /// Same walk, restricted to another extension set.
    pub fn with_extensions(&self, extensions: &[String]) -> Self {
        Self {
            extensions: extensions.to_vec(),
            ..self.clone()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted relative paths of every matching file.
    pub fn scan(&self) -> Vec<String> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !self.is_ignored_dir(entry));

        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to read directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.has_wanted_extension(entry.path()) {
                continue;
            }
            if let Ok(meta) = entry.metadata()
                && meta.len() > self.max_file_bytes
            {
                debug!(path = %entry.path().display(), bytes = meta.len(), "skipping large file");
                continue;
            }
            if let Some(rel) = self.relative(entry.path()) {
                files.push(rel);
            }
        }

        files.sort();
        files
    }

    /// Read a file as UTF-8. Binary or unreadable files yield `None`.
    pub fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(rel)).ok()
    }

    fn is_ignored_dir(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.ignored_dirs.iter().any(|d| d == name.as_ref())
    }

    fn has_wanted_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|w| w.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}
