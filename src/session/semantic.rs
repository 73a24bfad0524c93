//! Semantic-phase reasons, hypotheses and verification evidence.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::exploration::Requirement;
use crate::errors::ValidationError;
use crate::frame::Provenance;

/// Every reason any requirement accepts.
pub const KNOWN_REASONS: &[&str] = &[
    "no_definition_found",
    "architecture_unknown",
    "entry_point_unknown",
    "scope_unclear",
    "no_similar_pattern",
    "tool_unavailable",
    "no_reference_found",
];

/// Fixed cause-set for one unmet requirement.
pub fn allowed_reasons(requirement: Requirement) -> &'static [&'static str] {
    match requirement {
        Requirement::Symbols => &["no_definition_found", "architecture_unknown"],
        Requirement::EntryPoints => &["entry_point_unknown", "architecture_unknown"],
        Requirement::Files => &["scope_unclear", "architecture_unknown"],
        Requirement::Patterns => &["no_similar_pattern", "architecture_unknown"],
        Requirement::DefinitionLookup => &["no_definition_found", "tool_unavailable"],
        Requirement::ReferenceLookup => &["no_reference_found", "tool_unavailable"],
        Requirement::TextSearch => &["tool_unavailable", "architecture_unknown"],
    }
}

/// Accept `reason` when it belongs to the cause-set of any unmet requirement.
/// With nothing unmet, any known reason is accepted.
pub fn validate_reason(reason: &str, unmet: &[Requirement]) -> Result<String, ValidationError> {
    let reason = reason.trim().to_lowercase();
    let allowed: BTreeSet<&str> = if unmet.is_empty() {
        KNOWN_REASONS.iter().copied().collect()
    } else {
        unmet
            .iter()
            .flat_map(|r| allowed_reasons(*r).iter().copied())
            .collect()
    };
    if allowed.contains(reason.as_str()) {
        Ok(reason)
    } else {
        Err(ValidationError::InvalidReason {
            reason,
            allowed: allowed.into_iter().map(String::from).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypothesisInput {
    pub statement: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Confirmed,
    Rejected,
    Inconclusive,
}

/// An inference made during SEMANTIC. Stays `Provenance::Hypothesis` even
/// after verification confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub provenance: Provenance,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VerificationStatus>,
}

impl Hypothesis {
    fn from_input(input: HypothesisInput) -> Self {
        Self {
            statement: input.statement.trim().to_string(),
            symbol: input.symbol,
            file: input.file,
            provenance: Provenance::Hypothesis,
            verified: false,
            status: None,
        }
    }
}

/// Build hypotheses from caller input. At least one non-empty statement is
/// required.
pub fn build_hypotheses(inputs: Vec<HypothesisInput>) -> Result<Vec<Hypothesis>, ValidationError> {
    if inputs.is_empty() {
        return Err(ValidationError::Invalid(
            "submit_semantic needs at least one hypothesis".to_string(),
        ));
    }
    if let Some(idx) = inputs.iter().position(|h| h.statement.trim().is_empty()) {
        return Err(ValidationError::Invalid(format!(
            "hypothesis #{} has an empty statement",
            idx
        )));
    }
    Ok(inputs.into_iter().map(Hypothesis::from_input).collect())
}

/// One piece of evidence for hypothesis `hypothesis` (by index).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub hypothesis: usize,
    pub status: VerificationStatus,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

/// Combine the statuses recorded for one hypothesis.
fn aggregate(statuses: &[VerificationStatus]) -> VerificationStatus {
    let confirmed = statuses.contains(&VerificationStatus::Confirmed);
    let rejected = statuses.contains(&VerificationStatus::Rejected);
    match (confirmed, rejected) {
        (true, false) => VerificationStatus::Confirmed,
        (false, true) => VerificationStatus::Rejected,
        _ => VerificationStatus::Inconclusive,
    }
}

/// Check `evidence` against `hypotheses` and apply the per-hypothesis
/// verdicts. Nothing is modified when validation fails.
pub fn apply_evidence(
    hypotheses: &mut [Hypothesis],
    evidence: &[Evidence],
) -> Result<(), ValidationError> {
    if let Some(bad) = evidence.iter().find(|e| e.hypothesis >= hypotheses.len()) {
        return Err(ValidationError::UnknownHypothesis {
            index: bad.hypothesis,
        });
    }
    let mut per_hypothesis: Vec<Vec<VerificationStatus>> = vec![Vec::new(); hypotheses.len()];
    for e in evidence {
        per_hypothesis[e.hypothesis].push(e.status);
    }
    if let Some(index) = per_hypothesis.iter().position(Vec::is_empty) {
        return Err(ValidationError::MissingEvidence { index });
    }

    for (hypothesis, statuses) in hypotheses.iter_mut().zip(per_hypothesis) {
        let status = aggregate(&statuses);
        hypothesis.status = Some(status);
        hypothesis.verified = status == VerificationStatus::Confirmed;
    }
    Ok(())
}
