//! Session state and the phase-gated orchestrator.
//!
//! A `Session` is plain serializable data. Only the `Orchestrator` mutates it,
//! and only through phase operations; at the end it is written to the archive.

pub mod archive;
pub mod exploration;
pub mod orchestrator;
pub mod semantic;

pub use archive::SessionArchive;
pub use exploration::{Confidence, ExplorationResult, ExplorationSubmission, Requirement};
pub use orchestrator::{AgreementInput, Orchestrator, WriteDecision};
pub use semantic::{Evidence, Hypothesis, HypothesisInput, VerificationStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::frame::QueryFrame;
use crate::guard_config::GuardToml;
use crate::impact::{Classification, ImpactReport};
use crate::phase::{Intent, Operation, Phase, RiskLevel, ToolCategory};
use crate::search::RelevanceVerdict;

/// Per-session switches, defaulted from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub impact_analysis: bool,
    pub allow_new_files: bool,
}

impl SessionOptions {
    pub fn from_settings(settings: &GuardToml) -> Self {
        Self {
            impact_analysis: settings.impact.enabled,
            allow_new_files: settings.isolation.allow_new_files,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&GuardToml::default())
    }
}

/// One entry of the tool-call history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ToolCategory>,
    pub phase: Phase,
    pub accepted: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceRecord {
    pub symbol: String,
    pub score: f32,
    pub verdict: RelevanceVerdict,
}

/// Isolated workspace attached to the session in READY.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayInfo {
    pub branch: String,
    pub mount_path: String,
    pub base_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub intent: Intent,
    pub request: String,
    pub frame: QueryFrame,
    pub phase: Phase,
    pub risk: RiskLevel,
    pub options: SessionOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exploration: Option<ExplorationResult>,
    /// Requirements left unmet by the last exploration submission.
    #[serde(default)]
    pub unmet: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_reason: Option<String>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub relevance: Vec<RelevanceRecord>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<ImpactReport>,
    #[serde(default)]
    pub classifications: BTreeMap<String, Classification>,
    /// Files added to the write surface outside exploration.
    #[serde(default)]
    pub explored_files: BTreeSet<String>,
    #[serde(default)]
    pub history: Vec<ToolRecord>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayInfo>,
    #[serde(default)]
    pub agreements_recorded: usize,
    #[serde(default)]
    pub marked_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(intent: Intent, frame: QueryFrame, risk: RiskLevel, options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            intent,
            request: frame.request.clone(),
            frame,
            phase: intent.initial_phase(),
            risk,
            options,
            exploration: None,
            unmet: Vec::new(),
            semantic_reason: None,
            hypotheses: Vec::new(),
            relevance: Vec::new(),
            evidence: Vec::new(),
            impact: None,
            classifications: BTreeMap::new(),
            explored_files: BTreeSet::new(),
            history: Vec::new(),
            transitions: Vec::new(),
            overlay: None,
            agreements_recorded: 0,
            marked_successful: false,
            abort_reason: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Tool categories the session has actually exercised.
    pub fn exercised_categories(&self) -> BTreeSet<ToolCategory> {
        self.history
            .iter()
            .filter(|r| r.accepted)
            .filter_map(|r| r.category)
            .collect()
    }

    /// Every file the session may write to.
    pub fn write_surface(&self) -> BTreeSet<String> {
        let mut files = self.explored_files.clone();
        if let Some(exploration) = &self.exploration {
            files.extend(exploration.files.iter().cloned());
        }
        files
    }

    pub fn short_id(&self) -> String {
        crate::util::short_id(&self.id)
    }
}
