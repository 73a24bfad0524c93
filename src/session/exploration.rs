//! Exploration sufficiency and consistency scoring.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::errors::ValidationError;
use crate::guard_config::{ExplorationThresholds, GuardToml};
use crate::phase::{Intent, RiskLevel, ToolCategory};

/// What the caller claims to have found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationSubmission {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default, alias = "entryPoints")]
    pub entry_points: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default, alias = "toolsUsed")]
    pub tools_used: Vec<ToolCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// A single sufficiency requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Symbols,
    EntryPoints,
    Files,
    Patterns,
    DefinitionLookup,
    ReferenceLookup,
    TextSearch,
}

impl Requirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Requirement::Symbols => "symbols",
            Requirement::EntryPoints => "entry_points",
            Requirement::Files => "files",
            Requirement::Patterns => "patterns",
            Requirement::DefinitionLookup => "definition_lookup",
            Requirement::ReferenceLookup => "reference_lookup",
            Requirement::TextSearch => "text_search",
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored exploration, stored on the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorationResult {
    pub symbols: Vec<String>,
    pub entry_points: Vec<String>,
    pub files: Vec<String>,
    pub patterns: Vec<String>,
    pub tools_exercised: BTreeSet<ToolCategory>,
    pub confidence: Confidence,
    pub unmet: Vec<Requirement>,
    pub markup_relaxed: bool,
}

fn trimmed(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn duplicates(list: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dups = BTreeSet::new();
    for item in list {
        if !seen.insert(item.as_str()) {
            dups.insert(item.clone());
        }
    }
    dups.into_iter().collect()
}

/// Reject internally inconsistent submissions.
pub fn check_consistency(sub: &ExplorationSubmission) -> Result<(), ValidationError> {
    let symbols = trimmed(&sub.symbols);
    let entry_points = trimmed(&sub.entry_points);
    let files = trimmed(&sub.files);
    let patterns = trimmed(&sub.patterns);

    for (name, list) in [
        ("symbols", &symbols),
        ("entry_points", &entry_points),
        ("files", &files),
        ("patterns", &patterns),
    ] {
        let dups = duplicates(list);
        if !dups.is_empty() {
            return Err(ValidationError::DuplicateEntries {
                list: name.to_string(),
                entries: dups,
            });
        }
    }

    let lowered: Vec<String> = symbols.iter().map(|s| s.to_lowercase()).collect();
    for ep in &entry_points {
        let ep_lower = ep.to_lowercase();
        let linked = lowered
            .iter()
            .any(|s| ep_lower.contains(s.as_str()) || s.contains(ep_lower.as_str()));
        if !linked {
            return Err(ValidationError::UnlinkedEntryPoint {
                entry_point: ep.clone(),
            });
        }
    }

    for pattern in &patterns {
        let backed = match pattern_file(pattern) {
            Some(file) => files.iter().any(|f| f == file),
            None => !files.is_empty(),
        };
        if !backed {
            return Err(ValidationError::PatternWithoutFile {
                pattern: pattern.clone(),
            });
        }
    }
    Ok(())
}

/// The file named by a `path::description` pattern, if it has that form.
pub fn pattern_file(pattern: &str) -> Option<&str> {
    let (head, _) = pattern.split_once("::")?;
    let head = head.trim();
    (head.contains('/') || head.contains('.')).then_some(head)
}

/// Score a consistent submission against the thresholds for this session.
///
/// `history` holds the categories the session has already exercised; they are
/// unioned with the categories the caller declares.
pub fn evaluate(
    sub: &ExplorationSubmission,
    history: &BTreeSet<ToolCategory>,
    intent: Intent,
    risk: RiskLevel,
    settings: &GuardToml,
) -> Result<ExplorationResult, ValidationError> {
    check_consistency(sub)?;

    let symbols = trimmed(&sub.symbols);
    let entry_points = trimmed(&sub.entry_points);
    let files = trimmed(&sub.files);
    let patterns = trimmed(&sub.patterns);
    let mut tools: BTreeSet<ToolCategory> = sub.tools_used.iter().copied().collect();
    tools.extend(history.iter().copied());

    let markup_relaxed = !files.is_empty() && files.iter().all(|f| settings.impact.is_markup(f));
    let unmet = if markup_relaxed {
        if tools.contains(&ToolCategory::TextSearch) {
            Vec::new()
        } else {
            vec![Requirement::TextSearch]
        }
    } else {
        let thresholds = settings.exploration.thresholds_for(intent, risk);
        unmet_requirements(thresholds, &symbols, &entry_points, &files, &patterns, &tools)
    };

    Ok(ExplorationResult {
        symbols,
        entry_points,
        files,
        patterns,
        tools_exercised: tools,
        confidence: if unmet.is_empty() {
            Confidence::High
        } else {
            Confidence::Low
        },
        unmet,
        markup_relaxed,
    })
}

fn unmet_requirements(
    t: &ExplorationThresholds,
    symbols: &[String],
    entry_points: &[String],
    files: &[String],
    patterns: &[String],
    tools: &BTreeSet<ToolCategory>,
) -> Vec<Requirement> {
    let mut unmet = Vec::new();
    if symbols.len() < t.min_symbols {
        unmet.push(Requirement::Symbols);
    }
    if entry_points.len() < t.min_entry_points {
        unmet.push(Requirement::EntryPoints);
    }
    if files.len() < t.min_files {
        unmet.push(Requirement::Files);
    }
    if patterns.len() < t.min_patterns {
        unmet.push(Requirement::Patterns);
    }
    if t.require_definition_lookup && !tools.contains(&ToolCategory::DefinitionLookup) {
        unmet.push(Requirement::DefinitionLookup);
    }
    if t.require_reference_lookup && !tools.contains(&ToolCategory::ReferenceLookup) {
        unmet.push(Requirement::ReferenceLookup);
    }
    unmet
}
