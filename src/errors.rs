//! Typed error hierarchy for guardrail.
//!
//! Four enums cover the subsystems:
//! - `GuardError`: every failure a tool call can report back to the agent
//! - `ValidationError`: malformed or inconsistent submissions
//! - `IsolationError`: git / filesystem failures while mounting or committing
//! - `StoreError`: persistent per-repository state failures

use std::path::PathBuf;
use thiserror::Error;

use crate::phase::{Operation, Phase};

/// Rejected submissions. Always recoverable: the session phase is unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Entry point '{entry_point}' is not linked to any submitted symbol")]
    UnlinkedEntryPoint { entry_point: String },

    #[error("Duplicate entries in {list}: {entries:?}")]
    DuplicateEntries { list: String, entries: Vec<String> },

    #[error("Pattern '{pattern}' has no backing file in the submission")]
    PatternWithoutFile { pattern: String },

    #[error("Quote for slot {slot} not found in request: \"{quote}\"")]
    QuoteNotFound { slot: String, quote: String },

    #[error("Slot {slot} is missing its source quotation")]
    EmptyQuote { slot: String },

    #[error("Reason '{reason}' is not allowed for unmet requirements; expected one of {allowed:?}")]
    InvalidReason { reason: String, allowed: Vec<String> },

    #[error("Evidence references unknown hypothesis #{index}")]
    UnknownHypothesis { index: usize },

    #[error("Hypothesis #{index} has no evidence")]
    MissingEvidence { index: usize },

    #[error("Unknown classification '{value}' for {path}")]
    UnknownClassification { path: String, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Errors returned by session operations and tool calls.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Operation {operation} is not allowed in phase {phase}")]
    PhaseNotAllowed { operation: Operation, phase: Phase },

    #[error("Write to {path} is not authorized: {reason}")]
    UnauthorizedWrite { path: String, reason: String },

    #[error(
        "Impact analysis unresolved: {} unclassified, {} missing reasons",
        unclassified.len(),
        missing_reasons.len()
    )]
    ImpactUnresolved {
        unclassified: Vec<String>,
        missing_reasons: Vec<String>,
    },

    #[error("Resource conflict: {detail}")]
    ResourceConflict { detail: String, recovery: String },

    #[error("Cache entry for {path} is corrupt: {detail}")]
    CacheCorruption { path: String, detail: String },

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GuardError {
    /// Isolation failures can end a session. The dispatcher only escalates
    /// them for the mount, commit and merge steps; elsewhere they are
    /// reported back like any other rejection.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Isolation(e) if !matches!(e, IsolationError::NotMounted))
    }

    pub fn is_recoverable(&self) -> bool {
        !self.is_session_fatal() && !matches!(self, Self::ResourceConflict { .. } | Self::Store(_))
    }

    /// Short instruction telling the caller how to get unstuck.
    pub fn recovery_hint(&self) -> Option<String> {
        match self {
            Self::Validation(_) => Some("Fix the submission and resubmit".to_string()),
            Self::PhaseNotAllowed { phase, .. } => Some(format!(
                "Use an operation declared for phase {}",
                phase
            )),
            Self::UnauthorizedWrite { .. } => Some(
                "Call add_explored_files for the target or revert_to_exploration".to_string(),
            ),
            Self::ImpactUnresolved { .. } => Some(
                "Classify every must-verify file; non will_modify entries need a reason"
                    .to_string(),
            ),
            Self::ResourceConflict { recovery, .. } => Some(recovery.clone()),
            Self::Isolation(IsolationError::NotMounted) => {
                Some("Call begin_isolated_session first".to_string())
            }
            Self::Isolation(_) => {
                Some("Inspect the repository, run `guardrail cleanup`, then retry".to_string())
            }
            Self::CacheCorruption { .. } | Self::Store(_) => None,
        }
    }
}

/// Session-fatal failures in the workspace isolation layer.
#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("Git operation failed during {step}: {source}")]
    Git {
        step: &'static str,
        #[source]
        source: git2::Error,
    },

    #[error("Filesystem operation failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No overlay is mounted for this session")]
    NotMounted,
}

impl IsolationError {
    pub fn git(step: &'static str) -> impl FnOnce(git2::Error) -> Self {
        move |source| Self::Git { step, source }
    }

    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Failures reading or writing the per-repository store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store serialization error at {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported schema version {found} in {path} (expected {expected})")]
    Schema {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub fn serde(path: impl Into<PathBuf>) -> impl FnOnce(serde_json::Error) -> Self {
        let path = path.into();
        move |source| Self::Serde { path, source }
    }
}

pub type GuardResult<T> = std::result::Result<T, GuardError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;
