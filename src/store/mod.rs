//! Per-repository persistent state.
//!
//! `RepoStore` owns every on-disk artifact guardrail keeps between sessions:
//! the fingerprint manifest, the Forest index, the Map agreement log, the
//! persistent symbol cache and the session archive. It is created once and
//! passed to the components that need it.
//!
//! Layout under the namespaced state directory:
//!
//! ```text
//! <state>/
//!   manifest.json        fingerprints of the last corpus sync
//!   forest.json          Forest chunks and vectors
//!   agreements.jsonl     append-only Map agreements
//!   cache/symbols/       one JSON file per cached path
//!   sessions/            archived sessions
//!   live/                liveness leases of running sessions
//!   isolation.lock       checkout/branch/mount lock
//! ```

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Fingerprints of every source file seen by the last corpus sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub synced_at: DateTime<Utc>,
    /// Relative path → SHA-256 hex of the file content.
    pub files: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(files: BTreeMap<String, String>) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            synced_at: Utc::now(),
            files,
        }
    }

    pub fn fingerprint(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}

/// A confirmed phrase → symbol mapping produced by a successful session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: Uuid,
    pub phrase: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub evidence: String,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Agreement {
    pub fn new(
        phrase: impl Into<String>,
        symbol: impl Into<String>,
        file: Option<String>,
        evidence: impl Into<String>,
        session_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phrase: phrase.into(),
            symbol: symbol.into(),
            file,
            evidence: evidence.into(),
            session_id,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoStore {
    root: PathBuf,
}

impl RepoStore {
    /// Open the store, creating the directory layout and an empty agreement
    /// log on first use. The manifest stays absent until the first sync.
    pub fn open(state_dir: &Path) -> StoreResult<Self> {
        let store = Self {
            root: state_dir.to_path_buf(),
        };
        for dir in [
            store.root.clone(),
            store.symbol_cache_dir(),
            store.sessions_dir(),
            store.live_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(StoreError::io(&dir))?;
        }
        let agreements = store.agreements_path();
        if !agreements.exists() {
            fs::write(&agreements, b"").map_err(StoreError::io(&agreements))?;
            debug!(path = %agreements.display(), "bootstrapped agreement log");
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn forest_path(&self) -> PathBuf {
        self.root.join("forest.json")
    }

    pub fn agreements_path(&self) -> PathBuf {
        self.root.join("agreements.jsonl")
    }

    pub fn symbol_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("symbols")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn live_dir(&self) -> PathBuf {
        self.root.join("live")
    }

    pub fn isolation_lock_path(&self) -> PathBuf {
        self.root.join("isolation.lock")
    }

    /// The manifest of the last sync, or `None` if no sync has completed.
    pub fn load_manifest(&self) -> StoreResult<Option<Manifest>> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(None);
        }
        let manifest: Manifest = read_json(&path)?;
        if manifest.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(StoreError::Schema {
                path,
                found: manifest.schema_version,
                expected: MANIFEST_SCHEMA_VERSION,
            });
        }
        Ok(Some(manifest))
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> StoreResult<()> {
        write_json_atomic(&self.manifest_path(), manifest)
    }

    /// Append one agreement under an exclusive advisory lock so concurrent
    /// sessions never interleave partial lines.
    pub fn append_agreement(&self, agreement: &Agreement) -> StoreResult<()> {
        let path = self.agreements_path();
        let mut line =
            serde_json::to_string(agreement).map_err(StoreError::serde(&path))?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(StoreError::io(&path))?;
        file.lock_exclusive().map_err(StoreError::io(&path))?;
        let written = file
            .write_all(line.as_bytes())
            .and_then(|_| file.sync_data());
        let unlocked = FileExt::unlock(&file);
        written.map_err(StoreError::io(&path))?;
        unlocked.map_err(StoreError::io(&path))?;

        debug!(phrase = %agreement.phrase, symbol = %agreement.symbol, "agreement recorded");
        Ok(())
    }

    /// Every agreement in append order. Malformed lines are skipped.
    pub fn load_agreements(&self) -> StoreResult<Vec<Agreement>> {
        let path = self.agreements_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(StoreError::io(&path))?;
        let mut agreements = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Agreement>(line) {
                Ok(agreement) => agreements.push(agreement),
                Err(e) => warn!(line = idx + 1, error = %e, "skipping malformed agreement"),
            }
        }
        Ok(agreements)
    }
}

/// Serialize `value` to a uniquely named temporary file next to `path`, then
/// rename it into place. Readers see either the old or the new content.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(StoreError::serde(path))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        &Uuid::new_v4().simple().to_string()[..8]
    ));
    let written = fs::File::create(&tmp).and_then(|mut file| {
        file.write_all(&bytes)?;
        file.sync_all()
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(&tmp)(e));
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::io(path)(e));
    }
    sync_parent_dir(path);
    Ok(())
}

/// Flush the directory entry of a freshly renamed file. Platforms that cannot
/// open a directory for syncing skip this.
fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent() else {
        return;
    };
    match fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        Ok(()) => {}
        Err(e) => debug!(dir = %parent.display(), error = %e, "directory sync skipped"),
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let bytes = fs::read(path).map_err(StoreError::io(path))?;
    serde_json::from_slice(&bytes).map_err(StoreError::serde(path))
}
