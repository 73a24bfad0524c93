//! Line-oriented definition extractor.
//!
//! Each supported language family has a small table of anchored regexes, one
//! per definition kind. Scope is tracked by indentation: a definition belongs
//! to the nearest preceding container with a smaller indent.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{Symbol, SymbolExtractor, SymbolKind};

struct Rule {
    regex: Regex,
    kind: SymbolKind,
}

struct Language {
    extensions: &'static [&'static str],
    comment_prefixes: &'static [&'static str],
    rules: Vec<Rule>,
}

fn rule(pattern: &str, kind: SymbolKind) -> Rule {
    Rule {
        regex: Regex::new(pattern).unwrap(),
        kind,
    }
}

static LANGUAGES: LazyLock<Vec<Language>> = LazyLock::new(|| {
    use SymbolKind::*;
    vec![
        Language {
            extensions: &["rs"],
            comment_prefixes: &["//", "/*", "*"],
            rules: vec![
                rule(
                    r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"#,
                    Function,
                ),
                rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(?P<name>[A-Za-z_]\w*)", Struct),
                rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(?P<name>[A-Za-z_]\w*)", Enum),
                rule(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?trait\s+(?P<name>[A-Za-z_]\w*)",
                    Trait,
                ),
                rule(
                    r"^\s*(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:[\w:<>, ]+\s+for\s+)?(?P<name>[A-Za-z_]\w*)",
                    Impl,
                ),
                rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>[A-Za-z_]\w*)\s*\{", Module),
                rule(
                    r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const|static)\s+(?:mut\s+)?(?P<name>[A-Z_][A-Z0-9_]*)\s*:",
                    Constant,
                ),
                rule(r"^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(?P<name>[A-Za-z_]\w*)", TypeAlias),
            ],
        },
        Language {
            extensions: &["py"],
            comment_prefixes: &["#"],
            rules: vec![
                rule(r"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)", Function),
                rule(r"^\s*class\s+(?P<name>[A-Za-z_]\w*)", Class),
                rule(r"^(?P<name>[A-Z][A-Z0-9_]+)\s*=", Constant),
            ],
        },
        Language {
            extensions: &["js", "jsx", "ts", "tsx", "mjs", "cjs", "vue", "svelte"],
            comment_prefixes: &["//", "/*", "*"],
            rules: vec![
                rule(
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)",
                    Function,
                ),
                rule(
                    r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)",
                    Class,
                ),
                rule(
                    r"^\s*(?:export\s+)?interface\s+(?P<name>[A-Za-z_$][\w$]*)",
                    Interface,
                ),
                rule(r"^\s*(?:export\s+)?(?:const\s+)?enum\s+(?P<name>[A-Za-z_$][\w$]*)", Enum),
                rule(
                    r"^\s*(?:export\s+)?type\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*=",
                    TypeAlias,
                ),
                rule(
                    r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>",
                    Function,
                ),
                rule(
                    r"^\s+(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*(?P<name>[A-Za-z_$][\w$]*)\s*\([^)]*\)\s*(?::[^{]+)?\{\s*$",
                    Method,
                ),
            ],
        },
        Language {
            extensions: &["go"],
            comment_prefixes: &["//", "/*", "*"],
            rules: vec![
                rule(r"^func\s+\([^)]*\)\s*(?P<name>[A-Za-z_]\w*)", Method),
                rule(r"^func\s+(?P<name>[A-Za-z_]\w*)", Function),
                rule(r"^type\s+(?P<name>[A-Za-z_]\w*)\s+struct\b", Struct),
                rule(r"^type\s+(?P<name>[A-Za-z_]\w*)\s+interface\b", Interface),
                rule(r"^type\s+(?P<name>[A-Za-z_]\w*)\s+", TypeAlias),
            ],
        },
        Language {
            extensions: &["java", "kt", "kts", "cs", "scala", "swift"],
            comment_prefixes: &["//", "/*", "*"],
            rules: vec![
                rule(
                    r"^\s*(?:(?:public|private|protected|internal|abstract|final|static|sealed|data|open|partial)\s+)*(?:class|object|struct|record)\s+(?P<name>[A-Za-z_]\w*)",
                    Class,
                ),
                rule(
                    r"^\s*(?:(?:public|private|protected|internal|sealed)\s+)*(?:interface|protocol|trait)\s+(?P<name>[A-Za-z_]\w*)",
                    Interface,
                ),
                rule(
                    r"^\s*(?:(?:public|private|protected|internal)\s+)*enum\s+(?:class\s+)?(?P<name>[A-Za-z_]\w*)",
                    Enum,
                ),
                rule(
                    r"^\s*(?:(?:public|private|protected|internal|open|override|static|suspend|inline)\s+)*(?:fun|func|def)\s+(?P<name>[A-Za-z_]\w*)",
                    Function,
                ),
                rule(
                    r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|override|async|virtual|synchronized)\s+)+[\w<>\[\],.? ]+\s+(?P<name>[A-Za-z_]\w*)\s*\(",
                    Method,
                ),
            ],
        },
        Language {
            extensions: &["c", "h", "cc", "cpp", "cxx", "hpp", "hh"],
            comment_prefixes: &["//", "/*", "*", "#"],
            rules: vec![
                rule(
                    r"^\s*(?:struct|class|union)\s+(?P<name>[A-Za-z_]\w*)\s*(?:[:{]|$)",
                    Struct,
                ),
                rule(r"^\s*enum\s+(?:class\s+)?(?P<name>[A-Za-z_]\w*)", Enum),
                rule(r"^\s*namespace\s+(?P<name>[A-Za-z_]\w*)", Module),
                rule(
                    r"^(?:[A-Za-z_][\w:<>*&]*\s+)+[*&]*(?P<name>[A-Za-z_][\w:]*)\s*\([^;]*$",
                    Function,
                ),
            ],
        },
        Language {
            extensions: &["rb"],
            comment_prefixes: &["#"],
            rules: vec![
                rule(r"^\s*def\s+(?:self\.)?(?P<name>[A-Za-z_]\w*[?!]?)", Function),
                rule(r"^\s*class\s+(?P<name>[A-Z]\w*)", Class),
                rule(r"^\s*module\s+(?P<name>[A-Z]\w*)", Module),
            ],
        },
        Language {
            extensions: &["php"],
            comment_prefixes: &["//", "/*", "*", "#"],
            rules: vec![
                rule(
                    r"^\s*(?:(?:public|private|protected|static|abstract|final)\s+)*function\s+(?P<name>[A-Za-z_]\w*)",
                    Function,
                ),
                rule(
                    r"^\s*(?:(?:abstract|final)\s+)?class\s+(?P<name>[A-Za-z_]\w*)",
                    Class,
                ),
                rule(r"^\s*interface\s+(?P<name>[A-Za-z_]\w*)", Interface),
                rule(r"^\s*trait\s+(?P<name>[A-Za-z_]\w*)", Trait),
            ],
        },
        Language {
            extensions: &["css", "scss", "sass", "less", "styl"],
            comment_prefixes: &["/*", "*", "//"],
            rules: vec![
                rule(r"^\s*@mixin\s+(?P<name>[A-Za-z_-][\w-]*)", Function),
                rule(r"^\s*(?P<name>[.#][A-Za-z_-][\w-]*)[^{;]*\{", Selector),
            ],
        },
    ]
});

/// Names the method rule must never report.
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "else", "new", "typeof",
    "sizeof", "do", "try", "with",
];

const MAX_SIGNATURE_CHARS: usize = 200;

fn language_for(path: &str) -> Option<&'static Language> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|lang| lang.extensions.contains(&ext.as_str()))
}

#[derive(Debug, Clone, Default)]
pub struct RegexSymbolExtractor;

impl RegexSymbolExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Whether a language table exists for this path.
    pub fn supports(path: &str) -> bool {
        language_for(path).is_some()
    }
}

impl SymbolExtractor for RegexSymbolExtractor {
    fn id(&self) -> &str {
        "regex-v1"
    }

    fn extract(&self, path: &str, content: &str) -> Vec<Symbol> {
        let Some(language) = language_for(path) else {
            return Vec::new();
        };

        let mut symbols = Vec::new();
        // (indent, name) of open containers.
        let mut containers: Vec<(usize, String)> = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.is_empty()
                || language
                    .comment_prefixes
                    .iter()
                    .any(|prefix| trimmed.starts_with(prefix))
            {
                continue;
            }

            let Some((name, kind)) = match_line(language, line) else {
                continue;
            };
            let indent = line.len() - trimmed.len();
            while containers.last().is_some_and(|(open, _)| *open >= indent) {
                containers.pop();
            }
            let scope = containers.last().map(|(_, name)| name.clone());
            let kind = if kind == SymbolKind::Function && scope.is_some() {
                SymbolKind::Method
            } else {
                kind
            };

            if kind.is_container() {
                containers.push((indent, name.clone()));
            }
            symbols.push(Symbol {
                name,
                kind,
                line: idx + 1,
                indent,
                scope,
                signature: signature_of(trimmed),
            });
        }
        symbols
    }
}

fn match_line(language: &Language, line: &str) -> Option<(String, SymbolKind)> {
    for rule in &language.rules {
        let Some(caps) = rule.regex.captures(line) else {
            continue;
        };
        let Some(name) = caps.name("name") else {
            continue;
        };
        let name = name.as_str();
        if rule.kind == SymbolKind::Method && CONTROL_KEYWORDS.contains(&name) {
            continue;
        }
        return Some((name.to_string(), rule.kind));
    }
    None
}

fn signature_of(trimmed: &str) -> String {
    let sig = trimmed.trim_end().trim_end_matches('{').trim_end();
    if sig.chars().count() > MAX_SIGNATURE_CHARS {
        sig.chars().take(MAX_SIGNATURE_CHARS).collect()
    } else {
        sig.to_string()
    }
}
