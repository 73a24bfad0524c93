//! Symbol extraction seam.
//!
//! Extraction is an external collaborator: anything that turns file content
//! into a list of definitions can sit behind `SymbolExtractor`. The crate ships
//! a line-oriented `RegexSymbolExtractor` that covers common languages well
//! enough to drive the cache, the Forest chunker and impact analysis.

pub mod regex_extractor;

pub use regex_extractor::RegexSymbolExtractor;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Struct,
    Class,
    Enum,
    Trait,
    Interface,
    Impl,
    Module,
    Constant,
    TypeAlias,
    Selector,
}

impl SymbolKind {
    /// Kinds that can enclose other definitions.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            SymbolKind::Struct
                | SymbolKind::Class
                | SymbolKind::Enum
                | SymbolKind::Trait
                | SymbolKind::Interface
                | SymbolKind::Impl
                | SymbolKind::Module
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Struct => "struct",
            SymbolKind::Class => "class",
            SymbolKind::Enum => "enum",
            SymbolKind::Trait => "trait",
            SymbolKind::Interface => "interface",
            SymbolKind::Impl => "impl",
            SymbolKind::Module => "module",
            SymbolKind::Constant => "constant",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Selector => "selector",
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One definition found in a file. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
    /// Indentation column of the definition, used to nest structure trees.
    #[serde(default)]
    pub indent: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub signature: String,
}

/// Turns file content into symbol definitions.
pub trait SymbolExtractor: Send + Sync {
    /// Identifier recorded in cache entries so a different extractor never
    /// reuses another one's output.
    fn id(&self) -> &str;

    fn extract(&self, path: &str, content: &str) -> Vec<Symbol>;
}

/// Node of the nested structure tree returned by `analyze_structure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureNode {
    pub name: String,
    pub kind: SymbolKind,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StructureNode>,
}

struct Open {
    indent: usize,
    node: StructureNode,
}

/// Nest a flat, line-ordered symbol list by indentation. Only container kinds
/// adopt children.
pub fn build_structure(symbols: &[Symbol]) -> Vec<StructureNode> {
    fn close(stack: &mut Vec<Open>, roots: &mut Vec<StructureNode>, node: StructureNode) {
        match stack.last_mut() {
            Some(parent) => parent.node.children.push(node),
            None => roots.push(node),
        }
    }

    let mut roots = Vec::new();
    let mut stack: Vec<Open> = Vec::new();
    for symbol in symbols {
        while let Some(top) = stack.last() {
            if top.indent < symbol.indent && top.node.kind.is_container() {
                break;
            }
            let Some(done) = stack.pop() else { break };
            close(&mut stack, &mut roots, done.node);
        }
        stack.push(Open {
            indent: symbol.indent,
            node: StructureNode {
                name: symbol.name.clone(),
                kind: symbol.kind,
                line: symbol.line,
                children: Vec::new(),
            },
        });
    }
    while let Some(done) = stack.pop() {
        close(&mut stack, &mut roots, done.node);
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, kind: SymbolKind, line: usize, indent: usize) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind,
            line,
            indent,
            scope: None,
            signature: String::new(),
        }
    }

    #[test]
    fn test_build_structure_nests_by_indent() {
        let symbols = vec![
            sym("LoginForm", SymbolKind::Class, 1, 0),
            sym("render", SymbolKind::Method, 2, 4),
            sym("validate", SymbolKind::Method, 5, 4),
            sym("helper", SymbolKind::Function, 10, 0),
        ];
        let tree = build_structure(&symbols);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "LoginForm");
        assert_eq!(tree[0].children.len(), 2);
        assert_eq!(tree[0].children[1].name, "validate");
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn test_functions_do_not_adopt_children() {
        let symbols = vec![
            sym("outer", SymbolKind::Function, 1, 0),
            sym("inner", SymbolKind::Function, 2, 4),
        ];
        let tree = build_structure(&symbols);
        assert_eq!(tree.len(), 2);
    }
}
