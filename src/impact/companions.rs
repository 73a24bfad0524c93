//! Naming-convention companions: tests, factories and seeds that sit next to
//! a target by name rather than by reference.

use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

/// Glob templates; `{stem}` is replaced by the escaped target stem.
const TEMPLATES: &[&str] = &[
    "**/{stem}_test.*",
    "**/test_{stem}.*",
    "**/{stem}.test.*",
    "**/{stem}.spec.*",
    "**/{stem}_spec.*",
    "**/{stem}_factory.*",
    "**/{stem}Factory.*",
    "**/{stem}_seed*.*",
    "**/{stem}Seeder.*",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// File stem without any extension (`login.test.ts` → `login`).
pub fn stem(path: &str) -> Option<&str> {
    let name = Path::new(path).file_name()?.to_str()?;
    let stem = name.split('.').next().unwrap_or(name);
    (!stem.is_empty()).then_some(stem)
}

pub fn patterns_for(target: &str) -> Vec<Pattern> {
    let Some(stem) = stem(target) else {
        return Vec::new();
    };
    let escaped = Pattern::escape(stem);
    TEMPLATES
        .iter()
        .filter_map(|template| {
            let raw = template.replace("{stem}", &escaped);
            match Pattern::new(&raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "skipping invalid companion pattern");
                    None
                }
            }
        })
        .collect()
}

/// Files from `corpus` matching any companion pattern of any target, minus
/// `exclude`.
pub fn find_companions(
    targets: &[String],
    corpus: &[String],
    exclude: &BTreeSet<String>,
) -> BTreeSet<String> {
    let patterns: Vec<Pattern> = targets.iter().flat_map(|t| patterns_for(t)).collect();
    corpus
        .iter()
        .filter(|file| !exclude.contains(*file))
        .filter(|file| {
            patterns
                .iter()
                .any(|p| p.matches_with(file, MATCH_OPTIONS))
        })
        .cloned()
        .collect()
}
