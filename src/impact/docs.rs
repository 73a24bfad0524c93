//! Keyword-matched documentation scan.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use super::companions::stem;
use crate::guard_config::ImpactSection;
use crate::scanner::FileScanner;

static QUOTED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]{2,})"|'([^']{2,})'|`([^`]{2,})`"#).unwrap());

static CAMEL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z][a-z0-9]+(?:[A-Z][a-z0-9]*)+\b").unwrap());

static SNAKE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z][A-Za-z0-9]*(?:_[A-Za-z0-9]+)+\b").unwrap());

/// Identifiers and file stems shorter than this are too noisy to scan for.
const MIN_KEYWORD_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeywordKind {
    Quoted,
    Identifier,
    FileName,
}

/// Keywords ranked quoted phrase > identifier > file name, deduplicated
/// case-insensitively and capped at `max`.
pub fn extract_keywords(request: &str, targets: &[String], max: usize) -> Vec<String> {
    let mut ranked: Vec<(KeywordKind, String)> = Vec::new();

    for caps in QUOTED_REGEX.captures_iter(request) {
        if let Some(m) = caps.iter().skip(1).flatten().next() {
            ranked.push((KeywordKind::Quoted, m.as_str().trim().to_string()));
        }
    }
    for m in CAMEL_REGEX
        .find_iter(request)
        .chain(SNAKE_REGEX.find_iter(request))
    {
        ranked.push((KeywordKind::Identifier, m.as_str().to_string()));
    }
    for target in targets {
        if let Some(stem) = stem(target) {
            ranked.push((KeywordKind::FileName, stem.to_string()));
        }
    }

    // Stable sort keeps first-seen order within a kind.
    ranked.sort_by_key(|(kind, _)| *kind);

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .map(|(_, keyword)| keyword)
        .filter(|k| k.chars().count() >= MIN_KEYWORD_LEN)
        .filter(|k| seen.insert(k.to_lowercase()))
        .take(max)
        .collect()
}

/// A documentation file mentioning at least one keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocMention {
    pub file: String,
    pub keywords: Vec<String>,
    pub samples: Vec<String>,
}

/// Scan documentation files for `keywords`, case-insensitively. Files and
/// sample lines per file are capped by `settings`.
pub fn scan_docs(
    scanner: &FileScanner,
    keywords: &[String],
    exclude: &BTreeSet<String>,
    settings: &ImpactSection,
) -> Vec<DocMention> {
    if keywords.is_empty() {
        return Vec::new();
    }
    let lowered: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let docs = scanner.with_extensions(&settings.doc_extensions);

    let mut mentions = Vec::new();
    for file in docs.scan() {
        if mentions.len() >= settings.max_doc_files {
            break;
        }
        if exclude.contains(&file) {
            continue;
        }
        let Some(content) = docs.read(&file) else {
            continue;
        };
        let mut matched = BTreeSet::new();
        let mut samples = Vec::new();
        for line in content.lines() {
            let lower = line.to_lowercase();
            let hits: Vec<usize> = (0..lowered.len())
                .filter(|i| lower.contains(lowered[*i].as_str()))
                .collect();
            if hits.is_empty() {
                continue;
            }
            matched.extend(hits);
            if samples.len() < settings.max_sample_lines {
                samples.push(line.trim().to_string());
            }
        }
        if !matched.is_empty() {
            mentions.push(DocMention {
                file,
                keywords: matched.into_iter().map(|i| keywords[i].clone()).collect(),
                samples,
            });
        }
    }
    mentions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard_config::SearchSection;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_keyword_priority_and_dedup() {
        let request = "rename `sessionToken` in LoginForm and fix password_reset for \"remember me\"";
        let targets = vec!["src/auth/login_form.rs".to_string()];
        let keywords = extract_keywords(request, &targets, 10);
        assert_eq!(
            keywords,
            vec![
                "sessionToken",
                "remember me",
                "LoginForm",
                "password_reset",
                "login_form",
            ]
        );
    }

    #[test]
    fn test_keywords_are_capped_and_short_ones_dropped() {
        let targets = vec!["ab.rs".to_string(), "router.rs".to_string()];
        let keywords = extract_keywords("plain words only", &targets, 10);
        assert_eq!(keywords, vec!["router"]);

        let many = "alpha_one beta_two gamma_three delta_four";
        assert_eq!(extract_keywords(many, &[], 2).len(), 2);
    }

    #[test]
    fn test_scan_docs_caps_samples() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(
            dir.path().join("docs/auth.md"),
            "# Auth\nThe LoginForm validates.\nLoginForm errors.\nMore loginform.\nLoginForm again.\n",
        )
        .unwrap();
        fs::write(dir.path().join("docs/other.md"), "nothing here\n").unwrap();
        fs::write(dir.path().join("src.rs"), "LoginForm").unwrap();

        let scanner = FileScanner::new(dir.path(), &SearchSection::default());
        let settings = ImpactSection::default();
        let mentions = scan_docs(
            &scanner,
            &["LoginForm".to_string()],
            &BTreeSet::new(),
            &settings,
        );
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].file, "docs/auth.md");
        assert_eq!(mentions[0].samples.len(), settings.max_sample_lines);
        assert_eq!(mentions[0].keywords, vec!["LoginForm"]);
    }
}
