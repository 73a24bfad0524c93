//! Session phases, operations and the per-phase allow-list.
//!
//! This module provides:
//! - `Phase`: the session lifecycle states
//! - `Operation`: every tool call a session can issue
//! - `allowed_operations`: the central table checked before any operation runs
//! - `Intent` and `RiskLevel`: the inputs that tune phase strictness

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named stage of a session's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Exploration,
    Semantic,
    Verification,
    ImpactAnalysis,
    Ready,
    PreCommit,
    Completed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Exploration => "EXPLORATION",
            Phase::Semantic => "SEMANTIC",
            Phase::Verification => "VERIFICATION",
            Phase::ImpactAnalysis => "IMPACT_ANALYSIS",
            Phase::Ready => "READY",
            Phase::PreCommit => "PRE_COMMIT",
            Phase::Completed => "COMPLETED",
            Phase::Aborted => "ABORTED",
        }
    }

    /// Operations this phase declares.
    pub fn allows(&self, op: Operation) -> bool {
        allowed_operations(*self).contains(&op)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of exploration tooling, used for sufficiency scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    DefinitionLookup,
    ReferenceLookup,
    TextSearch,
    StructureAnalysis,
    SemanticSearch,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::DefinitionLookup => "definition_lookup",
            ToolCategory::ReferenceLookup => "reference_lookup",
            ToolCategory::TextSearch => "text_search",
            ToolCategory::StructureAnalysis => "structure_analysis",
            ToolCategory::SemanticSearch => "semantic_search",
        }
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every operation on the tool-call surface that is gated by phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    FindDefinitions,
    FindReferences,
    SearchText,
    AnalyzeStructure,
    SubmitExploration,
    SemanticSearch,
    ConfirmSymbolRelevance,
    SubmitSemantic,
    SubmitVerification,
    AnalyzeImpact,
    SubmitImpactAnalysis,
    CheckWriteTarget,
    AddExploredFiles,
    BeginIsolatedSession,
    SubmitForReview,
    ReviewChanges,
    FinalizeChanges,
    MergeToBase,
    MarkSuccessful,
    RevertToExploration,
    Abort,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::FindDefinitions => "find_definitions",
            Operation::FindReferences => "find_references",
            Operation::SearchText => "search_text",
            Operation::AnalyzeStructure => "analyze_structure",
            Operation::SubmitExploration => "submit_exploration",
            Operation::SemanticSearch => "semantic_search",
            Operation::ConfirmSymbolRelevance => "confirm_symbol_relevance",
            Operation::SubmitSemantic => "submit_semantic",
            Operation::SubmitVerification => "submit_verification",
            Operation::AnalyzeImpact => "analyze_impact",
            Operation::SubmitImpactAnalysis => "submit_impact_analysis",
            Operation::CheckWriteTarget => "check_write_target",
            Operation::AddExploredFiles => "add_explored_files",
            Operation::BeginIsolatedSession => "begin_isolated_session",
            Operation::SubmitForReview => "submit_for_review",
            Operation::ReviewChanges => "review_changes",
            Operation::FinalizeChanges => "finalize_changes",
            Operation::MergeToBase => "merge_to_base",
            Operation::MarkSuccessful => "mark_successful",
            Operation::RevertToExploration => "revert_to_exploration",
            Operation::Abort => "abort",
        }
    }

    /// Tool category exercised by this operation, if it is a lookup tool.
    pub fn category(&self) -> Option<ToolCategory> {
        match self {
            Operation::FindDefinitions => Some(ToolCategory::DefinitionLookup),
            Operation::FindReferences => Some(ToolCategory::ReferenceLookup),
            Operation::SearchText => Some(ToolCategory::TextSearch),
            Operation::AnalyzeStructure => Some(ToolCategory::StructureAnalysis),
            Operation::SemanticSearch => Some(ToolCategory::SemanticSearch),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const EXPLORATION_OPS: &[Operation] = &[
    Operation::FindDefinitions,
    Operation::FindReferences,
    Operation::SearchText,
    Operation::AnalyzeStructure,
    Operation::SubmitExploration,
    Operation::Abort,
];

const SEMANTIC_OPS: &[Operation] = &[
    Operation::FindDefinitions,
    Operation::FindReferences,
    Operation::SearchText,
    Operation::AnalyzeStructure,
    Operation::SemanticSearch,
    Operation::ConfirmSymbolRelevance,
    Operation::SubmitSemantic,
    Operation::RevertToExploration,
    Operation::Abort,
];

const VERIFICATION_OPS: &[Operation] = &[
    Operation::FindDefinitions,
    Operation::FindReferences,
    Operation::SearchText,
    Operation::AnalyzeStructure,
    Operation::SemanticSearch,
    Operation::ConfirmSymbolRelevance,
    Operation::SubmitVerification,
    Operation::RevertToExploration,
    Operation::Abort,
];

const IMPACT_OPS: &[Operation] = &[
    Operation::FindDefinitions,
    Operation::FindReferences,
    Operation::SearchText,
    Operation::AnalyzeStructure,
    Operation::AnalyzeImpact,
    Operation::SubmitImpactAnalysis,
    Operation::RevertToExploration,
    Operation::Abort,
];

const READY_OPS: &[Operation] = &[
    Operation::FindDefinitions,
    Operation::FindReferences,
    Operation::SearchText,
    Operation::AnalyzeStructure,
    Operation::CheckWriteTarget,
    Operation::AddExploredFiles,
    Operation::BeginIsolatedSession,
    Operation::SubmitForReview,
    Operation::RevertToExploration,
    Operation::Abort,
];

const PRE_COMMIT_OPS: &[Operation] = &[
    Operation::ReviewChanges,
    Operation::FinalizeChanges,
    Operation::MergeToBase,
    Operation::Abort,
];

const COMPLETED_OPS: &[Operation] = &[Operation::MarkSuccessful];

/// The allow-list for a phase. Checked centrally before every operation.
pub fn allowed_operations(phase: Phase) -> &'static [Operation] {
    match phase {
        Phase::Exploration => EXPLORATION_OPS,
        Phase::Semantic => SEMANTIC_OPS,
        Phase::Verification => VERIFICATION_OPS,
        Phase::ImpactAnalysis => IMPACT_OPS,
        Phase::Ready => READY_OPS,
        Phase::PreCommit => PRE_COMMIT_OPS,
        Phase::Completed => COMPLETED_OPS,
        Phase::Aborted => &[],
    }
}

/// Forward edges of the phase graph. The two recovery edges
/// (revert to EXPLORATION, append explored files in READY) are handled by
/// their own operations and are not listed here.
pub fn is_forward_transition(from: Phase, to: Phase) -> bool {
    if to == Phase::Aborted {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Phase::Exploration, Phase::Semantic)
            | (Phase::Exploration, Phase::ImpactAnalysis)
            | (Phase::Exploration, Phase::Ready)
            | (Phase::Semantic, Phase::Verification)
            | (Phase::Verification, Phase::ImpactAnalysis)
            | (Phase::Verification, Phase::Ready)
            | (Phase::ImpactAnalysis, Phase::Ready)
            | (Phase::Ready, Phase::PreCommit)
            | (Phase::PreCommit, Phase::Completed)
    )
}

/// Closed set of request intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Implement,
    Modify,
    Investigate,
    Question,
}

impl Intent {
    /// Intents that never write start directly in READY.
    pub fn requires_writes(&self) -> bool {
        !matches!(self, Intent::Question)
    }

    pub fn initial_phase(&self) -> Phase {
        if self.requires_writes() {
            Phase::Exploration
        } else {
            Phase::Ready
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Implement => "implement",
            Intent::Modify => "modify",
            Intent::Investigate => "investigate",
            Intent::Question => "question",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "implement" => Ok(Intent::Implement),
            "modify" => Ok(Intent::Modify),
            "investigate" => Ok(Intent::Investigate),
            "question" => Ok(Intent::Question),
            _ => anyhow::bail!(
                "Invalid intent '{}'. Valid values: implement, modify, investigate, question",
                s
            ),
        }
    }
}

/// Session risk. Ordered so that `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}
