//! Exploration tools: definition lookup, reference lookup, text search and
//! structure analysis over the repository, backed by the symbol cache.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::cache::SymbolCache;
use crate::errors::{GuardResult, ValidationError};
use crate::scanner::FileScanner;
use crate::symbols::{StructureNode, Symbol, SymbolKind, build_structure};

/// Upper bound on rows returned by any single lookup.
pub const MAX_RESULTS: usize = 200;
const CONTEXT_LINES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub file: String,
    pub line: usize,
    pub kind: SymbolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub file: String,
    pub line: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    pub file: String,
    pub line: usize,
    pub content: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

pub struct Explorer {
    scanner: FileScanner,
    cache: SymbolCache,
}

impl Explorer {
    pub fn new(scanner: FileScanner, cache: SymbolCache) -> Self {
        Self { scanner, cache }
    }

    pub fn scanner(&self) -> &FileScanner {
        &self.scanner
    }

    pub fn cache(&self) -> &SymbolCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SymbolCache {
        &mut self.cache
    }

    /// Symbols defined in one file, via the cache. Missing files yield nothing.
    pub fn definitions_in(&mut self, path: &str) -> Vec<Symbol> {
        match self.scanner.read(path) {
            Some(content) => self.cache.symbols(path, &content),
            None => Vec::new(),
        }
    }

    /// Definitions named `symbol`. `Scope::name` and `Scope.name` restrict the
    /// match to definitions inside that scope.
    pub fn find_definitions(&mut self, symbol: &str) -> Vec<Definition> {
        let (scope, name) = split_qualified(symbol.trim());
        if name.is_empty() {
            return Vec::new();
        }

        let mut found = Vec::new();
        for file in self.scanner.scan() {
            for sym in self.definitions_in(&file) {
                if sym.name != name {
                    continue;
                }
                if let Some(scope) = scope
                    && sym.scope.as_deref() != Some(scope)
                {
                    continue;
                }
                found.push(Definition {
                    name: sym.name,
                    file: file.clone(),
                    line: sym.line,
                    kind: sym.kind,
                    scope: sym.scope,
                    signature: sym.signature,
                });
                if found.len() >= MAX_RESULTS {
                    return found;
                }
            }
        }
        found
    }

    /// Whole-word occurrences of `symbol`, excluding its definition lines.
    pub fn find_references(&mut self, symbol: &str) -> Vec<Reference> {
        let (_, name) = split_qualified(symbol.trim());
        if name.is_empty() {
            return Vec::new();
        }
        let name = name.to_string();
        let definition_sites: HashSet<(String, usize)> = self
            .find_definitions(&name)
            .into_iter()
            .map(|d| (d.file, d.line))
            .collect();

        let mut found = Vec::new();
        for file in self.scanner.scan() {
            let Some(content) = self.scanner.read(&file) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if !contains_word(line, &name)
                    || definition_sites.contains(&(file.clone(), idx + 1))
                {
                    continue;
                }
                found.push(Reference {
                    file: file.clone(),
                    line: idx + 1,
                    content: line.trim().to_string(),
                });
                if found.len() >= MAX_RESULTS {
                    return found;
                }
            }
        }
        found
    }

    /// Case-insensitive regex search. A pattern that is not a valid regex is
    /// searched literally.
    pub fn search_text(&self, pattern: &str) -> GuardResult<Vec<TextMatch>> {
        if pattern.trim().is_empty() {
            return Err(ValidationError::Invalid("search pattern is empty".to_string()).into());
        }
        let regex = compile_search(pattern)?;

        let mut found = Vec::new();
        for file in self.scanner.scan() {
            let Some(content) = self.scanner.read(&file) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for (idx, line) in lines.iter().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                let start = idx.saturating_sub(CONTEXT_LINES);
                let end = (idx + 1 + CONTEXT_LINES).min(lines.len());
                found.push(TextMatch {
                    file: file.clone(),
                    line: idx + 1,
                    content: line.to_string(),
                    before: lines[start..idx].iter().map(|l| l.to_string()).collect(),
                    after: lines[idx + 1..end].iter().map(|l| l.to_string()).collect(),
                });
                if found.len() >= MAX_RESULTS {
                    return Ok(found);
                }
            }
        }
        Ok(found)
    }

    pub fn analyze_structure(&mut self, path: &str) -> GuardResult<Vec<StructureNode>> {
        let Some(content) = self.scanner.read(path) else {
            return Err(ValidationError::Invalid(format!("cannot read file '{}'", path)).into());
        };
        let symbols = self.cache.symbols(path, &content);
        Ok(build_structure(&symbols))
    }

    /// Files outside `exclude` that mention any of `names` as a whole word,
    /// with the names each one mentions.
    pub fn files_referencing(
        &self,
        names: &BTreeSet<String>,
        exclude: &BTreeSet<String>,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut hits: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        if names.is_empty() {
            return hits;
        }
        for file in self.scanner.scan() {
            if exclude.contains(&file) {
                continue;
            }
            let Some(content) = self.scanner.read(&file) else {
                continue;
            };
            for name in names {
                if content.lines().any(|line| contains_word(line, name)) {
                    hits.entry(file.clone()).or_default().insert(name.clone());
                }
            }
        }
        hits
    }
}

fn split_qualified(symbol: &str) -> (Option<&str>, &str) {
    if let Some((scope, name)) = symbol.rsplit_once("::") {
        return (Some(scope.rsplit("::").next().unwrap_or(scope)), name);
    }
    if let Some((scope, name)) = symbol.rsplit_once('.')
        && !scope.is_empty()
    {
        return (Some(scope), name);
    }
    (None, symbol)
}

fn compile_search(pattern: &str) -> GuardResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        })
        .map_err(|e| ValidationError::Invalid(format!("unusable search pattern: {}", e)).into())
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether `word` occurs in `line` with no identifier characters on either side.
pub fn contains_word(line: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let mut offset = 0;
    while let Some(pos) = line[offset..].find(word) {
        let start = offset + pos;
        let end = start + word.len();
        let before_ok = line[..start].chars().next_back().is_none_or(|c| !is_ident_char(c));
        let after_ok = line[end..].chars().next().is_none_or(|c| !is_ident_char(c));
        if before_ok && after_ok {
            return true;
        }
        offset = start + word.chars().next().map(char::len_utf8).unwrap_or(1);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PersistentCache;
    use crate::guard_config::SearchSection;
    use crate::symbols::RegexSymbolExtractor;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn setup() -> (Explorer, TempDir, TempDir) {
        let repo = tempdir().unwrap();
        let state = tempdir().unwrap();
        write(
            repo.path(),
            "src/auth/login.rs",
            "pub struct LoginForm {\n    password: String,\n}\n\nimpl LoginForm {\n    pub fn validate(&self) -> bool {\n        !self.password.is_empty()\n    }\n}\n",
        );
        write(
            repo.path(),
            "src/ui/button.rs",
            "use crate::auth::login::LoginForm;\n\npub fn render_button(form: &LoginForm) {\n    if !form.validate() {\n        show_error();\n    }\n}\n\nfn show_error() {}\n",
        );
        write(repo.path(), "README.md", "Login docs\n");
        let cache = SymbolCache::new(
            Arc::new(RegexSymbolExtractor::new()),
            PersistentCache::new(state.path()),
        );
        let scanner = FileScanner::new(repo.path(), &SearchSection::default());
        (Explorer::new(scanner, cache), repo, state)
    }

    #[test]
    fn test_find_definitions() {
        let (mut explorer, _repo, _state) = setup();
        let defs = explorer.find_definitions("validate");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].file, "src/auth/login.rs");
        assert_eq!(defs[0].line, 6);
        assert_eq!(defs[0].kind, SymbolKind::Method);
        assert_eq!(defs[0].scope.as_deref(), Some("LoginForm"));

        assert_eq!(explorer.find_definitions("LoginForm::validate").len(), 1);
        assert!(explorer.find_definitions("Other::validate").is_empty());
        assert!(explorer.find_definitions("missing").is_empty());
    }

    #[test]
    fn test_find_references_excludes_definitions() {
        let (mut explorer, _repo, _state) = setup();
        let refs = explorer.find_references("show_error");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].file, "src/ui/button.rs");
        assert_eq!(refs[0].line, 5);
        assert_eq!(refs[0].content, "show_error();");
    }

    #[test]
    fn test_search_text_with_context_and_literal_fallback() {
        let (explorer, _repo, _state) = setup();
        let matches = explorer.search_text("password").unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line, 2);
        assert_eq!(matches[0].before.len(), 1);
        assert_eq!(matches[0].after.len(), 2);

        let literal = explorer.search_text("is_empty()").unwrap();
        assert_eq!(literal.len(), 1);
        let broken = explorer.search_text("validate(").unwrap();
        assert_eq!(broken.len(), 2);
        assert!(explorer.search_text("  ").is_err());
    }

    #[test]
    fn test_analyze_structure_nests_methods() {
        let (mut explorer, _repo, _state) = setup();
        let tree = explorer.analyze_structure("src/auth/login.rs").unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[1].kind, SymbolKind::Impl);
        assert_eq!(tree[1].children[0].name, "validate");
        assert!(explorer.analyze_structure("missing.rs").is_err());
    }

    #[test]
    fn test_files_referencing() {
        let (mut explorer, _repo, _state) = setup();
        let names: BTreeSet<String> = ["LoginForm".to_string(), "validate".to_string()].into();
        let exclude: BTreeSet<String> = ["src/auth/login.rs".to_string()].into();
        let hits = explorer.files_referencing(&names, &exclude);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["src/ui/button.rs"].len(), 2);
    }

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("call login()", "login"));
        assert!(!contains_word("call loginForm()", "login"));
        assert!(!contains_word("relogin", "login"));
        assert!(contains_word("relogin; login", "login"));
        assert!(contains_word(".header { }", ".header"));
    }

    #[test]
    fn test_lookups_go_through_cache() {
        let (mut explorer, _repo, _state) = setup();
        explorer.find_definitions("validate");
        explorer.find_definitions("validate");
        let stats = explorer.cache().stats();
        assert_eq!(stats.scanned, 3);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.hits, 3);
    }
}
