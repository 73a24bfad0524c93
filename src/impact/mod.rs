//! Impact analysis for the files a session is about to change.
//!
//! The report splits affected files into:
//! - must-verify: files that directly reference a symbol defined in a target
//! - should-verify: naming-convention companions and documentation mentions
//!
//! `check_gate` enforces explicit classification of every must-verify file
//! before the session may leave IMPACT_ANALYSIS.

pub mod companions;
pub mod docs;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

use crate::errors::{GuardError, GuardResult, ValidationError};
use crate::explore::Explorer;
use crate::guard_config::GuardToml;
use crate::symbols::SymbolKind;

/// Symbol names shorter than this are not traced for references.
const MIN_TRACE_NAME_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactMode {
    Full,
    MarkupRelaxed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MustVerify {
    pub file: String,
    /// Target symbols this file references.
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShouldVerifyReason {
    Naming,
    DocMention,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShouldVerify {
    pub file: String,
    pub reason: ShouldVerifyReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub targets: Vec<String>,
    pub mode: ImpactMode,
    pub must_verify: Vec<MustVerify>,
    pub should_verify: Vec<ShouldVerify>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Nothing to classify; the gate passes without a submission.
    pub auto_satisfied: bool,
    pub hint: String,
}

impl ImpactReport {
    pub fn must_verify_files(&self) -> BTreeSet<&str> {
        self.must_verify.iter().map(|m| m.file.as_str()).collect()
    }

    pub fn should_verify_files(&self) -> BTreeSet<&str> {
        self.should_verify.iter().map(|s| s.file.as_str()).collect()
    }
}

/// Per-file verdict submitted by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    WillModify,
    NoChangeNeeded,
    NotAffected,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::WillModify => "will_modify",
            Classification::NoChangeNeeded => "no_change_needed",
            Classification::NotAffected => "not_affected",
        }
    }

    pub fn parse(path: &str, value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "will_modify" => Ok(Classification::WillModify),
            "no_change_needed" => Ok(Classification::NoChangeNeeded),
            "not_affected" => Ok(Classification::NotAffected),
            _ => Err(ValidationError::UnknownClassification {
                path: path.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw classification as it arrives on the tool surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactClassification {
    pub path: String,
    pub classification: String,
    #[serde(default)]
    pub reason: String,
}

/// Accepted gate submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateOutcome {
    pub classifications: BTreeMap<String, Classification>,
    pub warnings: Vec<String>,
}

impl GateOutcome {
    pub fn will_modify(&self) -> impl Iterator<Item = &str> {
        self.classifications
            .iter()
            .filter(|(_, c)| **c == Classification::WillModify)
            .map(|(path, _)| path.as_str())
    }
}

pub struct ImpactAnalyzer<'a> {
    settings: &'a GuardToml,
}

impl<'a> ImpactAnalyzer<'a> {
    pub fn new(settings: &'a GuardToml) -> Self {
        Self { settings }
    }

    /// Build the report for `targets`. Markup-only targets short-cut to an
    /// empty, auto-satisfied report.
    pub fn analyze(&self, explorer: &mut Explorer, targets: &[String], request: &str) -> ImpactReport {
        let impact = &self.settings.impact;
        let targets: Vec<String> = {
            let unique: BTreeSet<String> = targets.iter().cloned().collect();
            unique.into_iter().collect()
        };

        if !targets.is_empty() && targets.iter().all(|t| impact.is_markup(t)) {
            info!(targets = targets.len(), "markup-only targets, impact auto-satisfied");
            return ImpactReport {
                targets,
                mode: ImpactMode::MarkupRelaxed,
                must_verify: Vec::new(),
                should_verify: Vec::new(),
                keywords: Vec::new(),
                auto_satisfied: true,
                hint: "Markup-only change: no references to verify".to_string(),
            };
        }

        let target_set: BTreeSet<String> = targets.iter().cloned().collect();

        let mut names = BTreeSet::new();
        for target in targets.iter().filter(|t| !impact.is_markup(t)) {
            for sym in explorer.definitions_in(target) {
                if sym.kind != SymbolKind::Selector && sym.name.chars().count() >= MIN_TRACE_NAME_LEN {
                    names.insert(sym.name);
                }
            }
        }
        let must_verify: Vec<MustVerify> = explorer
            .files_referencing(&names, &target_set)
            .into_iter()
            .filter(|(file, _)| !impact.is_doc(file))
            .map(|(file, symbols)| MustVerify {
                file,
                symbols: symbols.into_iter().collect(),
            })
            .collect();

        let mut exclude = target_set.clone();
        exclude.extend(must_verify.iter().map(|m| m.file.clone()));

        let corpus = explorer.scanner().scan();
        let mut should_verify: Vec<ShouldVerify> =
            companions::find_companions(&targets, &corpus, &exclude)
                .into_iter()
                .map(|file| ShouldVerify {
                    file,
                    reason: ShouldVerifyReason::Naming,
                    samples: Vec::new(),
                })
                .collect();
        exclude.extend(should_verify.iter().map(|s| s.file.clone()));

        let keywords = docs::extract_keywords(request, &targets, impact.max_keywords);
        for mention in docs::scan_docs(explorer.scanner(), &keywords, &exclude, impact) {
            should_verify.push(ShouldVerify {
                file: mention.file,
                reason: ShouldVerifyReason::DocMention,
                samples: mention.samples,
            });
        }

        debug!(
            symbols = names.len(),
            must_verify = must_verify.len(),
            should_verify = should_verify.len(),
            "impact analysis complete"
        );

        let auto_satisfied = must_verify.is_empty() && should_verify.is_empty();
        let hint = if auto_satisfied {
            "No referencing files found; nothing to classify".to_string()
        } else {
            format!(
                "{} must-verify file(s) reference symbols defined in the targets and need a classification \
                 (will_modify, no_change_needed, not_affected; a reason is required unless will_modify). \
                 {} should-verify file(s) match naming conventions or mention request keywords.",
                must_verify.len(),
                should_verify.len()
            )
        };

        ImpactReport {
            targets,
            mode: ImpactMode::Full,
            must_verify,
            should_verify,
            keywords,
            auto_satisfied,
            hint,
        }
    }
}

/// Validate classifications against the report.
///
/// Rejects when a must-verify file is unclassified or a non-`will_modify`
/// must-verify entry has no reason. Should-verify omissions only warn.
pub fn check_gate(
    report: &ImpactReport,
    inputs: &[ImpactClassification],
) -> GuardResult<GateOutcome> {
    let must = report.must_verify_files();
    let should = report.should_verify_files();

    let mut outcome = GateOutcome::default();
    let mut missing_reasons = Vec::new();
    for input in inputs {
        let path = input.path.trim().to_string();
        let class = Classification::parse(&path, &input.classification)?;
        let has_reason = !input.reason.trim().is_empty();
        if class != Classification::WillModify && !has_reason {
            if must.contains(path.as_str()) {
                missing_reasons.push(path.clone());
            } else {
                outcome
                    .warnings
                    .push(format!("{} classified {} without a reason", path, class));
            }
        }
        if !must.contains(path.as_str()) && !should.contains(path.as_str()) {
            outcome
                .warnings
                .push(format!("{} is not part of the impact report", path));
        }
        outcome.classifications.insert(path, class);
    }

    let unclassified: Vec<String> = must
        .iter()
        .filter(|f| !outcome.classifications.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    if !unclassified.is_empty() || !missing_reasons.is_empty() {
        return Err(GuardError::ImpactUnresolved {
            unclassified,
            missing_reasons,
        });
    }

    for file in should {
        if !outcome.classifications.contains_key(file) {
            outcome
                .warnings
                .push(format!("should-verify file {} was not classified", file));
        }
    }
    Ok(outcome)
}
