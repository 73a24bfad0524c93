//! Guardrail middleware for coding agents.
//!
//! A session moves through phases (exploration, semantic, verification,
//! impact analysis, ready, pre-commit) and every tool call is checked against
//! the current phase. Writes only happen in an isolated git worktree and land
//! on the base branch after an explicit review and merge.

pub mod cache;
pub mod config;
pub mod errors;
pub mod explore;
pub mod frame;
pub mod guard_config;
pub mod impact;
pub mod isolation;
pub mod phase;
pub mod scanner;
pub mod search;
pub mod session;
pub mod store;
pub mod symbols;
pub mod tools;
pub mod util;
