//! The phase-gated session state machine.
//!
//! Every public operation checks the current phase's allow-list first. A
//! rejected operation leaves the session exactly as it was.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::exploration::{self, Confidence, ExplorationSubmission};
use super::semantic::{self, Evidence, HypothesisInput};
use super::{OverlayInfo, RelevanceRecord, Session, SessionOptions, ToolRecord, Transition};
use crate::errors::{GuardError, GuardResult, ValidationError};
use crate::frame::{ProposedSlot, QueryFrame};
use crate::guard_config::GuardToml;
use crate::impact::{self, GateOutcome, ImpactClassification, ImpactReport};
use crate::phase::{Intent, Operation, Phase, RiskLevel, is_forward_transition};
use crate::search::{Relevance, RelevanceVerdict};
use crate::store::Agreement;
use crate::util::parent_dir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteDecision {
    pub allowed: bool,
    pub reason: String,
}

/// A phrase → symbol agreement proposed by the caller at success time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementInput {
    pub phrase: String,
    pub symbol: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub evidence: String,
}

pub struct Orchestrator {
    session: Session,
    settings: GuardToml,
}

impl Orchestrator {
    /// Validate the query frame and open a session in the intent's initial
    /// phase.
    pub fn start(
        request: &str,
        intent: Intent,
        proposed: &[ProposedSlot],
        settings: GuardToml,
    ) -> GuardResult<Self> {
        let options = SessionOptions::from_settings(&settings);
        Self::start_with_options(request, intent, proposed, options, settings)
    }

    pub fn start_with_options(
        request: &str,
        intent: Intent,
        proposed: &[ProposedSlot],
        options: SessionOptions,
        settings: GuardToml,
    ) -> GuardResult<Self> {
        if request.trim().is_empty() {
            return Err(ValidationError::Invalid("request is empty".to_string()).into());
        }
        let frame = QueryFrame::validate(request, proposed)?;
        let risk = frame.assess_risk(intent);
        let session = Session::new(intent, frame, risk, options);
        info!(
            session = %session.short_id(),
            intent = %intent,
            risk = %risk,
            phase = %session.phase,
            "session started"
        );
        Ok(Self { session, settings })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn ensure_allowed(&self, op: Operation) -> GuardResult<()> {
        if self.session.phase.allows(op) {
            Ok(())
        } else {
            Err(GuardError::PhaseNotAllowed {
                operation: op,
                phase: self.session.phase,
            })
        }
    }

    /// Append a tool call to the history. `phase` is the phase the call was
    /// issued in.
    pub fn record(&mut self, op: Operation, phase: Phase, accepted: bool) {
        self.session.history.push(ToolRecord {
            operation: op,
            category: op.category(),
            phase,
            accepted,
            at: Utc::now(),
        });
    }

    fn set_phase(&mut self, to: Phase) {
        let from = self.session.phase;
        if from == to {
            return;
        }
        self.session.transitions.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        self.session.phase = to;
        if to.is_terminal() {
            self.session.ended_at = Some(Utc::now());
        }
        info!(session = %self.session.short_id(), %from, %to, "phase transition");
    }

    fn advance(&mut self, to: Phase) {
        debug_assert!(
            is_forward_transition(self.session.phase, to),
            "illegal transition {} -> {}",
            self.session.phase,
            to
        );
        self.set_phase(to);
    }

    /// Where a session goes once it understands the code well enough.
    fn after_understanding(&self) -> Phase {
        if self.session.options.impact_analysis && self.session.intent.requires_writes() {
            Phase::ImpactAnalysis
        } else {
            Phase::Ready
        }
    }

    pub fn submit_exploration(&mut self, submission: &ExplorationSubmission) -> GuardResult<Phase> {
        self.ensure_allowed(Operation::SubmitExploration)?;
        let result = exploration::evaluate(
            submission,
            &self.session.exercised_categories(),
            self.session.intent,
            self.session.risk,
            &self.settings,
        )?;

        let next = if result.confidence == Confidence::High {
            self.after_understanding()
        } else {
            Phase::Semantic
        };
        debug!(
            session = %self.session.short_id(),
            confidence = ?result.confidence,
            unmet = ?result.unmet,
            markup = result.markup_relaxed,
            "exploration scored"
        );
        self.session.unmet = result.unmet.clone();
        self.session.exploration = Some(result);
        self.advance(next);
        Ok(next)
    }

    pub fn submit_semantic(
        &mut self,
        reason: &str,
        hypotheses: Vec<HypothesisInput>,
    ) -> GuardResult<Phase> {
        self.ensure_allowed(Operation::SubmitSemantic)?;
        let reason = semantic::validate_reason(reason, &self.session.unmet)?;
        let hypotheses = semantic::build_hypotheses(hypotheses)?;
        self.session.semantic_reason = Some(reason);
        self.session.hypotheses = hypotheses;
        self.advance(Phase::Verification);
        Ok(Phase::Verification)
    }

    /// Record a relevance verdict for `symbol`. A middling score forces the
    /// session risk to HIGH.
    pub fn record_relevance(
        &mut self,
        symbol: &str,
        relevance: Relevance,
    ) -> GuardResult<RelevanceVerdict> {
        self.ensure_allowed(Operation::ConfirmSymbolRelevance)?;
        if relevance.verdict == RelevanceVerdict::ApprovedHighRisk
            && self.session.risk != RiskLevel::High
        {
            warn!(
                session = %self.session.short_id(),
                symbol,
                score = relevance.score,
                "weak symbol relevance, raising risk to HIGH"
            );
            self.session.risk = RiskLevel::High;
        }
        self.session.relevance.push(RelevanceRecord {
            symbol: symbol.to_string(),
            score: relevance.score,
            verdict: relevance.verdict,
        });
        Ok(relevance.verdict)
    }

    pub fn submit_verification(&mut self, evidence: Vec<Evidence>) -> GuardResult<Phase> {
        self.ensure_allowed(Operation::SubmitVerification)?;
        semantic::apply_evidence(&mut self.session.hypotheses, &evidence)?;
        self.session.evidence = evidence;
        let next = self.after_understanding();
        self.advance(next);
        Ok(next)
    }

    /// Files the impact analyzer should treat as change targets.
    pub fn impact_targets(&self) -> Vec<String> {
        self.session.write_surface().into_iter().collect()
    }

    /// Store a freshly computed impact report. An auto-satisfied report
    /// releases the session to READY immediately.
    pub fn begin_impact(&mut self, report: ImpactReport) -> GuardResult<Phase> {
        self.ensure_allowed(Operation::AnalyzeImpact)?;
        let auto = report.auto_satisfied;
        self.session.impact = Some(report);
        self.session.classifications.clear();
        if auto {
            self.advance(Phase::Ready);
            return Ok(Phase::Ready);
        }
        Ok(self.session.phase)
    }

    pub fn submit_impact_analysis(
        &mut self,
        classifications: &[ImpactClassification],
    ) -> GuardResult<GateOutcome> {
        self.ensure_allowed(Operation::SubmitImpactAnalysis)?;
        let report = self.session.impact.as_ref().ok_or_else(|| {
            ValidationError::Invalid(
                "analyze_impact must run before submit_impact_analysis".to_string(),
            )
        })?;
        let outcome = impact::check_gate(report, classifications)?;
        for warning in &outcome.warnings {
            debug!(session = %self.session.short_id(), warning = %warning, "impact gate warning");
        }

        let will_modify: Vec<String> = outcome.will_modify().map(String::from).collect();
        self.session.explored_files.extend(will_modify);
        self.session.classifications = outcome.classifications.clone();
        self.advance(Phase::Ready);
        Ok(outcome)
    }

    /// Decide whether `path` may be written. `exists` says whether the file is
    /// already present in the working tree.
    pub fn check_write_target(&self, path: &str, exists: bool) -> GuardResult<WriteDecision> {
        self.ensure_allowed(Operation::CheckWriteTarget)?;
        let surface = self.session.write_surface();
        if surface.contains(path) {
            return Ok(WriteDecision {
                allowed: true,
                reason: "file was explored".to_string(),
            });
        }
        if !exists {
            let dir = parent_dir(path);
            let dir_explored = surface.iter().any(|f| parent_dir(f) == dir);
            if dir_explored && self.session.options.allow_new_files {
                return Ok(WriteDecision {
                    allowed: true,
                    reason: format!("new file in explored directory '{}'", dir),
                });
            }
            if dir_explored {
                return Err(GuardError::UnauthorizedWrite {
                    path: path.to_string(),
                    reason: "new file creation is disabled for this session".to_string(),
                });
            }
        }
        Err(GuardError::UnauthorizedWrite {
            path: path.to_string(),
            reason: "file is outside the explored surface".to_string(),
        })
    }

    /// Recovery edge: widen the write surface while staying in READY.
    pub fn add_explored_files(&mut self, paths: &[String]) -> GuardResult<usize> {
        self.ensure_allowed(Operation::AddExploredFiles)?;
        let clean: BTreeSet<String> = paths
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        if clean.is_empty() {
            return Err(ValidationError::Invalid("no paths given".to_string()).into());
        }
        let before = self.session.explored_files.len();
        self.session.explored_files.extend(clean);
        Ok(self.session.explored_files.len() - before)
    }

    /// Recovery edge back to EXPLORATION. Without `keep_results` every result
    /// gathered since exploration is dropped.
    pub fn revert_to_exploration(&mut self, keep_results: bool) -> GuardResult<Phase> {
        self.ensure_allowed(Operation::RevertToExploration)?;
        if !keep_results {
            let s = &mut self.session;
            s.exploration = None;
            s.unmet.clear();
            s.semantic_reason = None;
            s.hypotheses.clear();
            s.relevance.clear();
            s.evidence.clear();
            s.impact = None;
            s.classifications.clear();
            s.explored_files.clear();
        }
        self.set_phase(Phase::Exploration);
        Ok(Phase::Exploration)
    }

    /// Check that an overlay may be mounted now.
    pub fn prepare_isolation(&self) -> GuardResult<()> {
        self.ensure_allowed(Operation::BeginIsolatedSession)?;
        if let Some(overlay) = &self.session.overlay {
            return Err(ValidationError::Invalid(format!(
                "an isolated workspace is already mounted at {}",
                overlay.mount_path
            ))
            .into());
        }
        Ok(())
    }

    pub fn attach_overlay(&mut self, overlay: OverlayInfo) -> GuardResult<()> {
        self.prepare_isolation()?;
        self.session.overlay = Some(overlay);
        Ok(())
    }

    pub fn submit_for_review(&mut self) -> GuardResult<Phase> {
        self.ensure_allowed(Operation::SubmitForReview)?;
        if self.session.overlay.is_none() {
            return Err(ValidationError::Invalid(
                "begin_isolated_session must run before submit_for_review".to_string(),
            )
            .into());
        }
        self.advance(Phase::PreCommit);
        Ok(Phase::PreCommit)
    }

    pub fn overlay(&self) -> Option<&OverlayInfo> {
        self.session.overlay.as_ref()
    }

    pub fn record_commit(&mut self, commit: &str) -> GuardResult<()> {
        self.ensure_allowed(Operation::FinalizeChanges)?;
        let overlay = self
            .session
            .overlay
            .as_mut()
            .ok_or(crate::errors::IsolationError::NotMounted)?;
        overlay.commit = Some(commit.to_string());
        Ok(())
    }

    /// Check that the task branch holds a reviewed commit.
    pub fn ensure_mergeable(&self) -> GuardResult<()> {
        self.ensure_allowed(Operation::MergeToBase)?;
        match &self.session.overlay {
            Some(overlay) if overlay.commit.is_some() => Ok(()),
            Some(_) => Err(ValidationError::Invalid(
                "finalize_changes must commit before merge_to_base".to_string(),
            )
            .into()),
            None => Err(crate::errors::IsolationError::NotMounted.into()),
        }
    }

    pub fn complete(&mut self) -> GuardResult<Phase> {
        self.ensure_mergeable()?;
        self.advance(Phase::Completed);
        Ok(Phase::Completed)
    }

    /// Turn the session's confirmed findings into Map agreements. Without
    /// explicit input, every symbol whose relevance was recorded as fact is
    /// paired with the request's focus phrase.
    pub fn mark_successful(&mut self, inputs: Vec<AgreementInput>) -> GuardResult<Vec<Agreement>> {
        self.ensure_allowed(Operation::MarkSuccessful)?;
        if self.session.marked_successful {
            return Err(
                ValidationError::Invalid("session was already marked successful".to_string())
                    .into(),
            );
        }

        let inputs = if inputs.is_empty() {
            self.default_agreements()
        } else {
            inputs
        };
        if let Some(bad) = inputs
            .iter()
            .find(|a| a.phrase.trim().is_empty() || a.symbol.trim().is_empty())
        {
            return Err(ValidationError::Invalid(format!(
                "agreement needs both a phrase and a symbol (got '{}' -> '{}')",
                bad.phrase, bad.symbol
            ))
            .into());
        }

        let agreements: Vec<Agreement> = inputs
            .into_iter()
            .map(|a| {
                Agreement::new(
                    a.phrase.trim(),
                    a.symbol.trim(),
                    a.file,
                    a.evidence,
                    self.session.id,
                )
            })
            .collect();
        self.session.marked_successful = true;
        self.session.agreements_recorded = agreements.len();
        info!(
            session = %self.session.short_id(),
            agreements = agreements.len(),
            "session marked successful"
        );
        Ok(agreements)
    }

    fn default_agreements(&self) -> Vec<AgreementInput> {
        let phrase = self.session.frame.focus_phrase().to_string();
        let mut seen = BTreeSet::new();
        self.session
            .relevance
            .iter()
            .filter(|r| r.verdict == RelevanceVerdict::Fact)
            .filter(|r| seen.insert(r.symbol.clone()))
            .map(|r| AgreementInput {
                phrase: phrase.clone(),
                symbol: r.symbol.clone(),
                file: None,
                evidence: format!("relevance {:.2}", r.score),
            })
            .collect()
    }

    pub fn abort(&mut self, reason: &str) -> GuardResult<()> {
        self.ensure_allowed(Operation::Abort)?;
        self.force_abort(reason);
        Ok(())
    }

    /// Abort regardless of the allow-list. Used when the isolation layer
    /// fails and the session cannot continue.
    pub fn force_abort(&mut self, reason: &str) {
        if self.session.phase.is_terminal() {
            return;
        }
        warn!(session = %self.session.short_id(), reason, "session aborted");
        self.session.abort_reason = Some(reason.to_string());
        self.set_phase(Phase::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::SlotName;
    use crate::impact::{ImpactMode, MustVerify};
    use crate::phase::ToolCategory;
    use crate::session::{Requirement, VerificationStatus};

    const LOGIN: &str = "the login button shows no error when password is empty";

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn login_session() -> Orchestrator {
        Orchestrator::start(
            LOGIN,
            Intent::Modify,
            &[
                ProposedSlot::new(SlotName::TargetFeature, "login button"),
                ProposedSlot::new(SlotName::ObservedIssue, "shows no error"),
            ],
            GuardToml::default(),
        )
        .unwrap()
    }

    fn full_exploration() -> ExplorationSubmission {
        ExplorationSubmission {
            symbols: strings(&["LoginButton", "validate_password", "show_error"]),
            entry_points: strings(&["LoginButton::on_click"]),
            files: strings(&["src/ui/login.rs", "src/ui/errors.rs"]),
            patterns: strings(&["src/ui/errors.rs::errors shown via show_error"]),
            tools_used: vec![ToolCategory::DefinitionLookup, ToolCategory::ReferenceLookup],
        }
    }

    fn report(auto: bool) -> ImpactReport {
        ImpactReport {
            targets: strings(&["src/ui/login.rs"]),
            mode: ImpactMode::Full,
            must_verify: if auto {
                vec![]
            } else {
                vec![MustVerify {
                    file: "src/api/session.rs".to_string(),
                    symbols: strings(&["validate_password"]),
                }]
            },
            should_verify: vec![],
            keywords: vec![],
            auto_satisfied: auto,
            hint: String::new(),
        }
    }

    fn ready_session() -> Orchestrator {
        let mut orch = login_session();
        orch.submit_exploration(&full_exploration()).unwrap();
        orch.begin_impact(report(true)).unwrap();
        assert_eq!(orch.phase(), Phase::Ready);
        orch
    }

    #[test]
    fn test_login_request_is_high_risk_and_needs_thresholds() {
        let mut orch = login_session();
        assert_eq!(orch.session().risk, RiskLevel::High);
        assert_eq!(orch.phase(), Phase::Exploration);

        let thin = ExplorationSubmission {
            symbols: strings(&["LoginButton"]),
            files: strings(&["src/ui/login.rs"]),
            ..Default::default()
        };
        assert_eq!(orch.submit_exploration(&thin).unwrap(), Phase::Semantic);
        assert!(orch.session().unmet.contains(&Requirement::Symbols));
        assert!(orch.ensure_allowed(Operation::AnalyzeImpact).is_err());

        let mut orch = login_session();
        assert_eq!(
            orch.submit_exploration(&full_exploration()).unwrap(),
            Phase::ImpactAnalysis
        );
    }

    #[test]
    fn test_rejected_submission_leaves_phase_unchanged() {
        let mut orch = login_session();
        let mut bad = full_exploration();
        bad.entry_points = strings(&["main"]);
        let err = orch.submit_exploration(&bad).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(orch.phase(), Phase::Exploration);
        assert!(orch.session().exploration.is_none());
        assert!(orch.session().transitions.is_empty());
    }

    #[test]
    fn test_operations_outside_phase_are_rejected() {
        let mut orch = login_session();
        let err = orch.check_write_target("src/ui/login.rs", true).unwrap_err();
        assert!(matches!(
            err,
            GuardError::PhaseNotAllowed {
                operation: Operation::CheckWriteTarget,
                phase: Phase::Exploration
            }
        ));
        assert!(orch.submit_semantic("scope_unclear", vec![]).is_err());
        assert!(orch.revert_to_exploration(true).is_err());
        assert_eq!(orch.phase(), Phase::Exploration);
    }

    #[test]
    fn test_semantic_then_verification_path() {
        let mut orch = login_session();
        let thin = ExplorationSubmission {
            symbols: strings(&["LoginButton"]),
            files: strings(&["src/ui/login.rs"]),
            ..Default::default()
        };
        orch.submit_exploration(&thin).unwrap();

        let hypotheses = vec![HypothesisInput {
            statement: "empty passwords skip validation".to_string(),
            symbol: Some("validate_password".to_string()),
            file: None,
        }];
        assert!(matches!(
            orch.submit_semantic("no_similar_pattern", hypotheses.clone()),
            Err(GuardError::Validation(ValidationError::InvalidReason { .. }))
        ));
        assert_eq!(
            orch.submit_semantic("no_definition_found", hypotheses).unwrap(),
            Phase::Verification
        );

        let next = orch
            .submit_verification(vec![Evidence {
                hypothesis: 0,
                status: VerificationStatus::Confirmed,
                detail: "returns early".to_string(),
                file: Some("src/ui/login.rs".to_string()),
                line: Some(12),
            }])
            .unwrap();
        assert_eq!(next, Phase::ImpactAnalysis);
        let h = &orch.session().hypotheses[0];
        assert!(h.verified);
        assert_eq!(h.provenance, crate::frame::Provenance::Hypothesis);
    }

    #[test]
    fn test_weak_relevance_raises_risk() {
        let mut orch = Orchestrator::start(
            "add a logout link to the header",
            Intent::Implement,
            &[],
            GuardToml::default(),
        )
        .unwrap();
        assert_eq!(orch.session().risk, RiskLevel::Medium);
        orch.submit_exploration(&ExplorationSubmission::default())
            .unwrap();
        assert_eq!(orch.phase(), Phase::Semantic);
        let verdict = orch
            .record_relevance(
                "HeaderNav",
                Relevance {
                    score: 0.45,
                    verdict: RelevanceVerdict::ApprovedHighRisk,
                },
            )
            .unwrap();
        assert_eq!(verdict, RelevanceVerdict::ApprovedHighRisk);
        assert_eq!(orch.session().risk, RiskLevel::High);
    }

    #[test]
    fn test_impact_gate_blocks_until_classified() {
        let mut orch = login_session();
        orch.submit_exploration(&full_exploration()).unwrap();
        assert!(orch.submit_impact_analysis(&[]).is_err());

        assert_eq!(orch.begin_impact(report(false)).unwrap(), Phase::ImpactAnalysis);
        let err = orch.submit_impact_analysis(&[]).unwrap_err();
        assert!(matches!(err, GuardError::ImpactUnresolved { .. }));
        assert_eq!(orch.phase(), Phase::ImpactAnalysis);

        orch.submit_impact_analysis(&[ImpactClassification {
            path: "src/api/session.rs".to_string(),
            classification: "will_modify".to_string(),
            reason: String::new(),
        }])
        .unwrap();
        assert_eq!(orch.phase(), Phase::Ready);
        assert!(
            orch.check_write_target("src/api/session.rs", true)
                .unwrap()
                .allowed
        );
    }

    #[test]
    fn test_write_gating() {
        let mut orch = ready_session();
        assert!(orch.check_write_target("src/ui/login.rs", true).unwrap().allowed);
        assert!(orch.check_write_target("src/ui/new_banner.rs", false).unwrap().allowed);
        assert!(matches!(
            orch.check_write_target("src/db/schema.rs", true),
            Err(GuardError::UnauthorizedWrite { .. })
        ));
        assert!(orch.check_write_target("src/db/new.rs", false).is_err());

        assert_eq!(orch.add_explored_files(&strings(&["src/db/schema.rs"])).unwrap(), 1);
        assert!(orch.check_write_target("src/db/schema.rs", true).unwrap().allowed);
        assert_eq!(orch.phase(), Phase::Ready);
    }

    #[test]
    fn test_new_files_can_be_disabled() {
        let options = SessionOptions {
            impact_analysis: false,
            allow_new_files: false,
        };
        let mut orch = Orchestrator::start_with_options(
            LOGIN,
            Intent::Modify,
            &[],
            options,
            GuardToml::default(),
        )
        .unwrap();
        assert_eq!(orch.submit_exploration(&full_exploration()).unwrap(), Phase::Ready);
        let err = orch.check_write_target("src/ui/new.rs", false).unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn test_revert_optionally_keeps_results() {
        let mut orch = ready_session();
        orch.revert_to_exploration(true).unwrap();
        assert_eq!(orch.phase(), Phase::Exploration);
        assert!(orch.session().exploration.is_some());

        let mut orch = ready_session();
        orch.add_explored_files(&strings(&["README.md"])).unwrap();
        orch.revert_to_exploration(false).unwrap();
        assert!(orch.session().exploration.is_none());
        assert!(orch.session().impact.is_none());
        assert!(orch.session().write_surface().is_empty());
    }

    #[test]
    fn test_question_starts_ready_with_empty_surface() {
        let orch = Orchestrator::start(
            "where is the password validated?",
            Intent::Question,
            &[],
            GuardToml::default(),
        )
        .unwrap();
        assert_eq!(orch.phase(), Phase::Ready);
        assert!(orch.check_write_target("src/lib.rs", true).is_err());
    }

    #[test]
    fn test_isolation_lifecycle_and_success() {
        let mut orch = ready_session();
        assert!(orch.submit_for_review().is_err());
        orch.attach_overlay(OverlayInfo {
            branch: "guardrail/task-1".to_string(),
            mount_path: "/tmp/overlay".to_string(),
            base_branch: "main".to_string(),
            commit: None,
        })
        .unwrap();
        assert!(orch.prepare_isolation().is_err());
        assert_eq!(orch.submit_for_review().unwrap(), Phase::PreCommit);
        assert!(orch.complete().is_err());
        orch.record_commit("abc123").unwrap();
        assert_eq!(orch.complete().unwrap(), Phase::Completed);
        assert!(orch.session().ended_at.is_some());
        assert!(orch.abort("too late").is_err());

        let agreements = orch
            .mark_successful(vec![AgreementInput {
                phrase: "login button".to_string(),
                symbol: "LoginButton".to_string(),
                file: Some("src/ui/login.rs".to_string()),
                evidence: "on_click handler".to_string(),
            }])
            .unwrap();
        assert_eq!(agreements.len(), 1);
        assert_eq!(agreements[0].session_id, orch.session().id);
        assert!(orch.mark_successful(vec![]).is_err());
    }

    #[test]
    fn test_abort_from_any_live_phase() {
        let mut orch = login_session();
        orch.abort("user cancelled").unwrap();
        assert_eq!(orch.phase(), Phase::Aborted);
        assert_eq!(orch.session().abort_reason.as_deref(), Some("user cancelled"));
        assert!(orch.abort("again").is_err());
        assert!(orch.submit_exploration(&full_exploration()).is_err());
    }
}
