//! The tool-call surface: one JSON call in, one structured response out.
//!
//! `ToolDispatcher` owns one session and the services it runs against. Every
//! call is checked against the phase allow-list, recorded in the session
//! history and answered with a `ToolResponse`. Recoverable failures come back
//! as `accepted: false` with diagnostics; isolation failures during mount or
//! commit abort the session and are returned as errors.

pub mod services;

pub use services::Services;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::errors::{GuardError, GuardResult, IsolationError, ValidationError};
use crate::guard_config::TimeoutsSection;
use crate::impact::{ImpactAnalyzer, ImpactClassification};
use crate::isolation::{Lease, ReviewDecision};
use crate::phase::{Operation, Phase};
use crate::session::{
    AgreementInput, Evidence, ExplorationSubmission, HypothesisInput, Orchestrator, OverlayInfo,
    Session,
};
use crate::session::exploration::pattern_file;
use crate::util::normalize_rel_path;

/// A single call on the tool surface, e.g.
/// `{"tool": "find_definitions", "args": {"symbol": "LoginForm"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolCall {
    FindDefinitions {
        symbol: String,
    },
    FindReferences {
        symbol: String,
    },
    SearchText {
        pattern: String,
    },
    AnalyzeStructure {
        path: String,
    },
    SubmitExploration(ExplorationSubmission),
    SemanticSearch {
        query: String,
    },
    ConfirmSymbolRelevance {
        symbol: String,
        #[serde(default)]
        context: Option<String>,
    },
    SubmitSemantic {
        reason: String,
        #[serde(default)]
        hypotheses: Vec<HypothesisInput>,
    },
    SubmitVerification {
        evidence: Vec<Evidence>,
    },
    AnalyzeImpact,
    SubmitImpactAnalysis {
        classifications: Vec<ImpactClassification>,
    },
    CheckWriteTarget {
        path: String,
    },
    AddExploredFiles {
        paths: Vec<String>,
    },
    RevertToExploration {
        #[serde(default)]
        keep_results: bool,
    },
    BeginIsolatedSession,
    SubmitForReview,
    ReviewChanges,
    FinalizeChanges {
        classifications: BTreeMap<String, ReviewDecision>,
        #[serde(default)]
        message: Option<String>,
    },
    MergeToBase,
    MarkSuccessful {
        #[serde(default)]
        agreements: Vec<AgreementInput>,
    },
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Repository maintenance; not gated by the session phase.
    CleanupStale,
    /// Snapshot of the session; not gated and not recorded.
    Status,
}

impl ToolCall {
    /// The gated operation this call performs.
    pub fn operation(&self) -> Option<Operation> {
        let op = match self {
            Self::FindDefinitions { .. } => Operation::FindDefinitions,
            Self::FindReferences { .. } => Operation::FindReferences,
            Self::SearchText { .. } => Operation::SearchText,
            Self::AnalyzeStructure { .. } => Operation::AnalyzeStructure,
            Self::SubmitExploration(_) => Operation::SubmitExploration,
            Self::SemanticSearch { .. } => Operation::SemanticSearch,
            Self::ConfirmSymbolRelevance { .. } => Operation::ConfirmSymbolRelevance,
            Self::SubmitSemantic { .. } => Operation::SubmitSemantic,
            Self::SubmitVerification { .. } => Operation::SubmitVerification,
            Self::AnalyzeImpact => Operation::AnalyzeImpact,
            Self::SubmitImpactAnalysis { .. } => Operation::SubmitImpactAnalysis,
            Self::CheckWriteTarget { .. } => Operation::CheckWriteTarget,
            Self::AddExploredFiles { .. } => Operation::AddExploredFiles,
            Self::RevertToExploration { .. } => Operation::RevertToExploration,
            Self::BeginIsolatedSession => Operation::BeginIsolatedSession,
            Self::SubmitForReview => Operation::SubmitForReview,
            Self::ReviewChanges => Operation::ReviewChanges,
            Self::FinalizeChanges { .. } => Operation::FinalizeChanges,
            Self::MergeToBase => Operation::MergeToBase,
            Self::MarkSuccessful { .. } => Operation::MarkSuccessful,
            Self::Abort { .. } => Operation::Abort,
            Self::CleanupStale | Self::Status => return None,
        };
        Some(op)
    }

    /// Calls whose isolation failures leave the overlay in an unknown
    /// state: mounting, committing and merging.
    pub fn ends_session_on_failure(&self) -> bool {
        matches!(
            self,
            Self::BeginIsolatedSession | Self::FinalizeChanges { .. } | Self::MergeToBase
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CleanupStale => "cleanup_stale",
            Self::Status => "status",
            other => other.operation().map(|op| op.as_str()).unwrap_or("unknown"),
        }
    }

    /// Caller-side time bound for this call. The document scan gets its own
    /// budget; everything else is bounded like a search.
    pub fn timeout(&self, timeouts: &TimeoutsSection) -> Duration {
        match self {
            Self::AnalyzeImpact => Duration::from_secs(timeouts.doc_scan_secs),
            _ => Duration::from_secs(timeouts.search_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub tool: String,
    pub accepted: bool,
    /// Phase the call was issued in.
    pub phase: Phase,
    /// Phase after the call.
    pub next_phase: Phase,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
}

/// Successful routing: the payload plus any non-blocking warnings.
struct Routed {
    result: Value,
    diagnostics: Vec<String>,
}

impl Routed {
    fn new(result: Value) -> Self {
        Self {
            result,
            diagnostics: Vec::new(),
        }
    }
}

/// Rewrite the file part of a `path::description` pattern the same way
/// submitted files are normalized.
fn normalize_pattern(root: &Path, pattern: &str) -> String {
    let Some(file) = pattern_file(pattern) else {
        return pattern.to_string();
    };
    let Some((_, description)) = pattern.split_once("::") else {
        return pattern.to_string();
    };
    match normalize_rel_path(root, file) {
        Some(normalized) => format!("{}::{}", normalized, description),
        None => pattern.to_string(),
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub struct ToolDispatcher {
    services: Services,
    orchestrator: Orchestrator,
    lease: Option<Lease>,
}

impl ToolDispatcher {
    /// Take the session's liveness lease and start dispatching.
    pub fn new(services: Services, orchestrator: Orchestrator) -> GuardResult<Self> {
        let lease = services.isolation.lease(&orchestrator.session().id)?;
        Ok(Self {
            services,
            orchestrator,
            lease: Some(lease),
        })
    }

    pub fn session(&self) -> &Session {
        self.orchestrator.session()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn timeouts(&self) -> &TimeoutsSection {
        &self.services.config.settings.timeouts
    }

    /// Route one call. `Err` means the session was aborted by an isolation
    /// failure while mounting, committing or merging.
    pub fn dispatch(&mut self, call: ToolCall) -> GuardResult<ToolResponse> {
        let phase = self.orchestrator.phase();
        let op = call.operation();
        let tool = call.name().to_string();
        let may_end_session = call.ends_session_on_failure();
        debug!(session = %self.session().short_id(), tool = %tool, %phase, "tool call");

        let outcome = match op {
            Some(op) => self
                .orchestrator
                .ensure_allowed(op)
                .and_then(|_| self.route(call)),
            None => self.route(call),
        };

        match outcome {
            Ok(routed) => {
                if let Some(op) = op {
                    self.orchestrator.record(op, phase, true);
                }
                self.settle();
                Ok(ToolResponse {
                    tool,
                    accepted: true,
                    phase,
                    next_phase: self.orchestrator.phase(),
                    result: routed.result,
                    diagnostics: routed.diagnostics,
                    recovery_hint: None,
                })
            }
            Err(e) if may_end_session && e.is_session_fatal() => {
                if let Some(op) = op {
                    self.orchestrator.record(op, phase, false);
                }
                error!(session = %self.session().short_id(), tool = %tool, error = %e, "isolation failure, aborting session");
                self.orchestrator.force_abort(&e.to_string());
                self.settle();
                Err(e)
            }
            Err(e) => {
                if let Some(op) = op {
                    self.orchestrator.record(op, phase, false);
                }
                debug!(tool = %tool, error = %e, "tool call rejected");
                let result = match &e {
                    GuardError::UnauthorizedWrite { path, reason } => {
                        json!({ "allowed": false, "path": path, "reason": reason })
                    }
                    GuardError::ImpactUnresolved {
                        unclassified,
                        missing_reasons,
                    } => json!({ "unclassified": unclassified, "missing_reasons": missing_reasons }),
                    _ => Value::Null,
                };
                Ok(ToolResponse {
                    tool,
                    accepted: false,
                    phase,
                    next_phase: self.orchestrator.phase(),
                    result,
                    diagnostics: vec![e.to_string()],
                    recovery_hint: e.recovery_hint(),
                })
            }
        }
    }

    /// Archive the session and release its lease. Called at the end of the
    /// call stream whatever the phase.
    pub fn close(&mut self) -> Session {
        self.archive();
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
        self.services.explorer.cache_mut().end_session();
        self.orchestrator.session().clone()
    }

    /// Terminal sessions are archived and give up their lease, which turns
    /// any remaining overlay into a stale artifact for cleanup.
    fn settle(&mut self) {
        if !self.orchestrator.phase().is_terminal() {
            return;
        }
        self.archive();
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    fn archive(&self) {
        if let Err(e) = self.services.archive.save(self.orchestrator.session()) {
            warn!(error = %e, "failed to archive session");
        }
    }

    fn normalize(&self, raw: &str) -> GuardResult<String> {
        normalize_rel_path(&self.services.config.repo_root, raw).ok_or_else(|| {
            ValidationError::Invalid(format!("path '{}' is outside the repository", raw)).into()
        })
    }

    fn mounted_overlay(&self) -> GuardResult<OverlayInfo> {
        self.orchestrator
            .overlay()
            .cloned()
            .ok_or_else(|| IsolationError::NotMounted.into())
    }

    fn commit_message(&self) -> String {
        let request = self.orchestrator.session().request.trim();
        let first = request.lines().next().unwrap_or_default();
        let summary: String = first.chars().take(72).collect();
        format!("guardrail: {}", summary)
    }

    fn route(&mut self, call: ToolCall) -> GuardResult<Routed> {
        match call {
            ToolCall::FindDefinitions { symbol } => Ok(Routed::new(to_value(
                &self.services.explorer.find_definitions(&symbol),
            ))),
            ToolCall::FindReferences { symbol } => Ok(Routed::new(to_value(
                &self.services.explorer.find_references(&symbol),
            ))),
            ToolCall::SearchText { pattern } => Ok(Routed::new(to_value(
                &self.services.explorer.search_text(&pattern)?,
            ))),
            ToolCall::AnalyzeStructure { path } => {
                let path = self.normalize(&path)?;
                Ok(Routed::new(to_value(
                    &self.services.explorer.analyze_structure(&path)?,
                )))
            }
            ToolCall::SubmitExploration(mut submission) => {
                let root = &self.services.config.repo_root;
                submission.files = submission
                    .files
                    .iter()
                    .map(|f| normalize_rel_path(root, f).unwrap_or_else(|| f.clone()))
                    .collect();
                submission.patterns = submission
                    .patterns
                    .iter()
                    .map(|p| normalize_pattern(root, p))
                    .collect();
                let next = self.orchestrator.submit_exploration(&submission)?;
                let session = self.orchestrator.session();
                let exploration = session.exploration.as_ref();
                Ok(Routed::new(json!({
                    "next_phase": next,
                    "confidence": exploration.map(|e| e.confidence),
                    "unmet": session.unmet,
                    "markup_relaxed": exploration.map(|e| e.markup_relaxed).unwrap_or(false),
                })))
            }
            ToolCall::SemanticSearch { query } => {
                Ok(Routed::new(to_value(&self.services.engine.search(&query))))
            }
            ToolCall::ConfirmSymbolRelevance { symbol, context } => {
                let mut text = symbol.clone();
                if let Some(context) = context.as_deref().filter(|c| !c.trim().is_empty()) {
                    text.push(' ');
                    text.push_str(context);
                }
                for def in self.services.explorer.find_definitions(&symbol).iter().take(3) {
                    text.push(' ');
                    text.push_str(&def.signature);
                }
                let phrase = self.orchestrator.session().frame.focus_phrase().to_string();
                let relevance = self.services.engine.confirm_relevance(&phrase, &text);
                let verdict = self.orchestrator.record_relevance(&symbol, relevance)?;
                let mut routed = Routed::new(json!({
                    "symbol": symbol,
                    "score": relevance.score,
                    "verdict": verdict,
                    "risk": self.orchestrator.session().risk,
                }));
                if verdict == crate::search::RelevanceVerdict::Rejected {
                    routed.diagnostics.push(format!(
                        "'{}' looks unrelated to '{}'; explore further before relying on it",
                        symbol, phrase
                    ));
                }
                Ok(routed)
            }
            ToolCall::SubmitSemantic { reason, hypotheses } => {
                let next = self.orchestrator.submit_semantic(&reason, hypotheses)?;
                Ok(Routed::new(json!({ "next_phase": next })))
            }
            ToolCall::SubmitVerification { evidence } => {
                let next = self.orchestrator.submit_verification(evidence)?;
                Ok(Routed::new(json!({
                    "next_phase": next,
                    "hypotheses": self.orchestrator.session().hypotheses,
                })))
            }
            ToolCall::AnalyzeImpact => {
                let targets = self.orchestrator.impact_targets();
                let request = self.orchestrator.session().request.clone();
                let report = ImpactAnalyzer::new(&self.services.config.settings).analyze(
                    &mut self.services.explorer,
                    &targets,
                    &request,
                );
                let result = to_value(&report);
                let next = self.orchestrator.begin_impact(report)?;
                Ok(Routed::new(json!({ "report": result, "next_phase": next })))
            }
            ToolCall::SubmitImpactAnalysis { classifications } => {
                let classifications: Vec<ImpactClassification> = classifications
                    .into_iter()
                    .map(|mut c| {
                        if let Some(path) = normalize_rel_path(&self.services.config.repo_root, &c.path) {
                            c.path = path;
                        }
                        c
                    })
                    .collect();
                let outcome = self.orchestrator.submit_impact_analysis(&classifications)?;
                Ok(Routed {
                    result: json!({
                        "next_phase": self.orchestrator.phase(),
                        "classifications": outcome.classifications,
                    }),
                    diagnostics: outcome.warnings,
                })
            }
            ToolCall::CheckWriteTarget { path } => {
                let rel = self.normalize(&path)?;
                let root = match self.orchestrator.overlay() {
                    Some(overlay) => Path::new(&overlay.mount_path).to_path_buf(),
                    None => self.services.config.repo_root.clone(),
                };
                let exists = root.join(&rel).exists();
                let decision = self.orchestrator.check_write_target(&rel, exists)?;
                Ok(Routed::new(json!({
                    "path": rel,
                    "allowed": decision.allowed,
                    "reason": decision.reason,
                })))
            }
            ToolCall::AddExploredFiles { paths } => {
                let paths = paths
                    .iter()
                    .map(|p| self.normalize(p))
                    .collect::<GuardResult<Vec<String>>>()?;
                let added = self.orchestrator.add_explored_files(&paths)?;
                Ok(Routed::new(json!({ "added": added })))
            }
            ToolCall::RevertToExploration { keep_results } => {
                let next = self.orchestrator.revert_to_exploration(keep_results)?;
                Ok(Routed::new(json!({ "next_phase": next })))
            }
            ToolCall::BeginIsolatedSession => {
                self.orchestrator.prepare_isolation()?;
                let overlay = self.services.isolation.begin(&self.session().id)?;
                self.orchestrator.attach_overlay(overlay.clone())?;
                Ok(Routed::new(json!({
                    "branch_name": overlay.branch,
                    "mount_path": overlay.mount_path,
                    "base_branch": overlay.base_branch,
                })))
            }
            ToolCall::SubmitForReview => {
                let next = self.orchestrator.submit_for_review()?;
                Ok(Routed::new(json!({ "next_phase": next })))
            }
            ToolCall::ReviewChanges => {
                let overlay = self.mounted_overlay()?;
                let changes = self.services.isolation.review(&overlay)?;
                Ok(Routed::new(json!({ "changes": changes })))
            }
            ToolCall::FinalizeChanges {
                classifications,
                message,
            } => {
                let overlay = self.mounted_overlay()?;
                let message = message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| self.commit_message());
                let commit = self
                    .services
                    .isolation
                    .finalize(&overlay, &classifications, &message)?;
                self.orchestrator.record_commit(&commit)?;
                Ok(Routed::new(json!({ "commit": commit })))
            }
            ToolCall::MergeToBase => {
                self.orchestrator.ensure_mergeable()?;
                let overlay = self.mounted_overlay()?;
                let outcome = self.services.isolation.merge(&overlay)?;
                let next = self.orchestrator.complete()?;
                Ok(Routed::new(json!({
                    "commit": outcome.commit,
                    "fast_forward": outcome.fast_forward,
                    "next_phase": next,
                })))
            }
            ToolCall::MarkSuccessful { agreements } => {
                let agreements = self.orchestrator.mark_successful(agreements)?;
                let recorded = self
                    .services
                    .engine
                    .record_agreements(&self.services.store, agreements)?;
                Ok(Routed::new(json!({ "recorded": recorded })))
            }
            ToolCall::Abort { reason } => {
                let reason = reason.unwrap_or_else(|| "aborted by caller".to_string());
                self.orchestrator.abort(&reason)?;
                Ok(Routed::new(json!({ "reason": reason })))
            }
            ToolCall::CleanupStale => {
                let removed = self.services.isolation.cleanup_stale()?;
                Ok(Routed::new(json!({ "removed": removed })))
            }
            ToolCall::Status => {
                let s = self.orchestrator.session();
                Ok(Routed::new(json!({
                    "session": s.id,
                    "intent": s.intent,
                    "phase": s.phase,
                    "risk": s.risk,
                    "explored_files": s.explored_files,
                    "overlay": s.overlay,
                    "unmet": s.unmet,
                    "cache": self.services.explorer.cache().stats(),
                })))
            }
        }
    }
}
