//! Unified configuration for guardrail.
//!
//! Reads `.guardrail/guardrail.toml`. Every field has a default, so a missing
//! file or a partial file is always valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [exploration.high]
//! min_symbols = 3
//! min_entry_points = 1
//! min_files = 2
//! min_patterns = 1
//! require_definition_lookup = true
//! require_reference_lookup = true
//!
//! [impact]
//! enabled = true
//! max_keywords = 10
//!
//! [search]
//! short_circuit_threshold = 0.7
//! stale_after_secs = 3600
//!
//! [isolation]
//! branch_prefix = "guardrail/task-"
//! base_branch = "main"
//!
//! [timeouts]
//! sync_secs = 600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::phase::{Intent, RiskLevel};

/// Minimum evidence an exploration submission must carry for "high"
/// confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationThresholds {
    #[serde(default)]
    pub min_symbols: usize,
    #[serde(default)]
    pub min_entry_points: usize,
    #[serde(default)]
    pub min_files: usize,
    #[serde(default)]
    pub min_patterns: usize,
    #[serde(default)]
    pub require_definition_lookup: bool,
    #[serde(default)]
    pub require_reference_lookup: bool,
}

impl ExplorationThresholds {
    pub const fn new(
        min_symbols: usize,
        min_entry_points: usize,
        min_files: usize,
        min_patterns: usize,
        require_definition_lookup: bool,
        require_reference_lookup: bool,
    ) -> Self {
        Self {
            min_symbols,
            min_entry_points,
            min_files,
            min_patterns,
            require_definition_lookup,
            require_reference_lookup,
        }
    }

    /// True when every requirement of `self` is at least as strict as `other`.
    pub fn at_least_as_strict_as(&self, other: &Self) -> bool {
        self.min_symbols >= other.min_symbols
            && self.min_entry_points >= other.min_entry_points
            && self.min_files >= other.min_files
            && self.min_patterns >= other.min_patterns
            && (self.require_definition_lookup || !other.require_definition_lookup)
            && (self.require_reference_lookup || !other.require_reference_lookup)
    }
}

fn default_high_thresholds() -> ExplorationThresholds {
    ExplorationThresholds::new(3, 1, 2, 1, true, true)
}

fn default_medium_thresholds() -> ExplorationThresholds {
    ExplorationThresholds::new(3, 1, 2, 1, true, true)
}

fn default_low_thresholds() -> ExplorationThresholds {
    ExplorationThresholds::new(2, 1, 1, 0, true, false)
}

fn default_investigate_thresholds() -> ExplorationThresholds {
    ExplorationThresholds::new(1, 0, 1, 0, false, false)
}

/// Exploration sufficiency policy, keyed by risk level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationSection {
    #[serde(default = "default_high_thresholds")]
    pub high: ExplorationThresholds,
    #[serde(default = "default_medium_thresholds")]
    pub medium: ExplorationThresholds,
    #[serde(default = "default_low_thresholds")]
    pub low: ExplorationThresholds,
    /// Investigations never write, so they get a reduced set.
    #[serde(default = "default_investigate_thresholds")]
    pub investigate: ExplorationThresholds,
}

impl Default for ExplorationSection {
    fn default() -> Self {
        Self {
            high: default_high_thresholds(),
            medium: default_medium_thresholds(),
            low: default_low_thresholds(),
            investigate: default_investigate_thresholds(),
        }
    }
}

impl ExplorationSection {
    pub fn thresholds_for(&self, intent: Intent, risk: RiskLevel) -> &ExplorationThresholds {
        if matches!(intent, Intent::Investigate | Intent::Question) {
            return &self.investigate;
        }
        match risk {
            RiskLevel::High => &self.high,
            RiskLevel::Medium => &self.medium,
            RiskLevel::Low => &self.low,
        }
    }
}

/// Impact analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactSection {
    /// When disabled, sessions skip IMPACT_ANALYSIS and go straight to READY.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "default_max_doc_files")]
    pub max_doc_files: usize,
    #[serde(default = "default_max_sample_lines")]
    pub max_sample_lines: usize,
    #[serde(default = "default_doc_extensions")]
    pub doc_extensions: Vec<String>,
    /// Purely presentational extensions. Template languages with embedded
    /// logic (vue, jsx, erb, php) must not be listed here.
    #[serde(default = "default_markup_extensions")]
    pub markup_extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_keywords() -> usize {
    10
}

fn default_max_doc_files() -> usize {
    20
}

fn default_max_sample_lines() -> usize {
    3
}

fn default_doc_extensions() -> Vec<String> {
    ["md", "rst", "txt", "adoc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_markup_extensions() -> Vec<String> {
    ["css", "scss", "sass", "less", "styl", "html", "htm", "svg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ImpactSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_keywords: default_max_keywords(),
            max_doc_files: default_max_doc_files(),
            max_sample_lines: default_max_sample_lines(),
            doc_extensions: default_doc_extensions(),
            markup_extensions: default_markup_extensions(),
        }
    }
}

impl ImpactSection {
    pub fn is_markup(&self, path: &str) -> bool {
        extension_in(path, &self.markup_extensions)
    }

    pub fn is_doc(&self, path: &str) -> bool {
        extension_in(path, &self.doc_extensions)
    }
}

fn extension_in(path: &str, extensions: &[String]) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|m| m.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Forest/Map search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSection {
    /// A Map hit at or above this score skips the Forest entirely.
    #[serde(default = "default_short_circuit_threshold")]
    pub short_circuit_threshold: f32,
    #[serde(default = "default_forest_limit")]
    pub forest_limit: usize,
    #[serde(default = "default_map_limit")]
    pub map_limit: usize,
    /// Relevance above this is auto-approved as FACT.
    #[serde(default = "default_relevance_fact_threshold")]
    pub relevance_fact_threshold: f32,
    /// Relevance below this is rejected.
    #[serde(default = "default_relevance_reject_threshold")]
    pub relevance_reject_threshold: f32,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    /// Manifest older than this is considered stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Extensions indexed into the Forest.
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    /// Directory names never walked.
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
    /// Files above this size are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_short_circuit_threshold() -> f32 {
    0.7
}

fn default_forest_limit() -> usize {
    10
}

fn default_map_limit() -> usize {
    5
}

fn default_relevance_fact_threshold() -> f32 {
    0.6
}

fn default_relevance_reject_threshold() -> f32 {
    0.3
}

fn default_embedding_dimension() -> usize {
    256
}

fn default_stale_after_secs() -> u64 {
    3600
}

fn default_source_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "rb", "php", "c", "h", "cc",
        "cpp", "hpp", "cs", "swift", "scala", "vue", "css", "scss", "html", "md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignored_dirs() -> Vec<String> {
    [".git", ".guardrail", "target", "node_modules", "dist", "build", "vendor"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            short_circuit_threshold: default_short_circuit_threshold(),
            forest_limit: default_forest_limit(),
            map_limit: default_map_limit(),
            relevance_fact_threshold: default_relevance_fact_threshold(),
            relevance_reject_threshold: default_relevance_reject_threshold(),
            embedding_dimension: default_embedding_dimension(),
            stale_after_secs: default_stale_after_secs(),
            source_extensions: default_source_extensions(),
            ignored_dirs: default_ignored_dirs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

/// Workspace isolation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationSection {
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Base branch to fork task branches from. Defaults to the branch checked
    /// out in the main working tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_branch: Option<String>,
    /// Overlay directory, relative to the repository root.
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,
    /// Whether READY sessions may create files that do not exist yet.
    #[serde(default = "default_true")]
    pub allow_new_files: bool,
}

fn default_branch_prefix() -> String {
    "guardrail/task-".to_string()
}

fn default_worktree_dir() -> String {
    ".guardrail/overlays".to_string()
}

impl Default for IsolationSection {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            base_branch: None,
            worktree_dir: default_worktree_dir(),
            allow_new_files: true,
        }
    }
}

impl IsolationSection {
    /// Base branch with the `GUARDRAIL_BASE_BRANCH` environment override.
    pub fn effective_base_branch(&self) -> Option<String> {
        std::env::var("GUARDRAIL_BASE_BRANCH")
            .ok()
            .filter(|b| !b.trim().is_empty())
            .or_else(|| self.base_branch.clone())
    }
}

/// Timeouts applied at the caller boundary for long-running work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default = "default_sync_secs")]
    pub sync_secs: u64,
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_doc_scan_secs")]
    pub doc_scan_secs: u64,
}

fn default_sync_secs() -> u64 {
    600
}

fn default_search_secs() -> u64 {
    30
}

fn default_doc_scan_secs() -> u64 {
    60
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            sync_secs: default_sync_secs(),
            search_secs: default_search_secs(),
            doc_scan_secs: default_doc_scan_secs(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Also write a daily rolling log file under `.guardrail/logs`.
    #[serde(default)]
    pub file: bool,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

/// The complete guardrail.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GuardToml {
    #[serde(default)]
    pub exploration: ExplorationSection,
    #[serde(default)]
    pub impact: ImpactSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub isolation: IsolationSection,
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl GuardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse guardrail.toml")
    }

    /// Load `guardrail.toml` from the given directory, or defaults when absent.
    pub fn load_or_default(guard_dir: &Path) -> Result<Self> {
        let config_path = guard_dir.join("guardrail.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize guardrail.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let ex = &self.exploration;

        if !ex.high.at_least_as_strict_as(&ex.medium) {
            warnings.push("exploration.high is less strict than exploration.medium".to_string());
        }
        if !ex.medium.at_least_as_strict_as(&ex.low) {
            warnings.push("exploration.medium is less strict than exploration.low".to_string());
        }

        let s = &self.search;
        for (name, value) in [
            ("short_circuit_threshold", s.short_circuit_threshold),
            ("relevance_fact_threshold", s.relevance_fact_threshold),
            ("relevance_reject_threshold", s.relevance_reject_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                warnings.push(format!("search.{} = {} is outside 0.0..=1.0", name, value));
            }
        }
        if s.relevance_reject_threshold > s.relevance_fact_threshold {
            warnings.push(
                "search.relevance_reject_threshold is above relevance_fact_threshold".to_string(),
            );
        }
        if s.embedding_dimension == 0 {
            warnings.push("search.embedding_dimension must be positive".to_string());
        }

        if self.isolation.branch_prefix.trim().is_empty() {
            warnings.push("isolation.branch_prefix must not be empty".to_string());
        }

        for ext in &self.impact.markup_extensions {
            if matches!(
                ext.to_lowercase().as_str(),
                "vue" | "jsx" | "tsx" | "erb" | "php" | "svelte" | "hbs"
            ) {
                warnings.push(format!(
                    "impact.markup_extensions lists '{}', which embeds logic",
                    ext
                ));
            }
        }

        warnings
    }
}
