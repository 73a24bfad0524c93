//! Integration tests for guardrail
//!
//! The CLI is exercised through `assert_cmd`; full sessions are driven through
//! the library's `ToolDispatcher` against throwaway git repositories.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use git2::{Repository, Signature};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const LOGIN_RS: &str = "pub struct LoginForm {\n    pub password: String,\n}\n\nimpl LoginForm {\n    pub fn validate(&self) -> bool {\n        !self.password.is_empty()\n    }\n}\n";
const APP_RS: &str = "use crate::auth::login::LoginForm;\n\npub fn render(form: &LoginForm) -> bool {\n    form.validate()\n}\n";
const README: &str = "# demo\n\nThe login button submits the form.\n";

fn guardrail() -> Command {
    cargo_bin_cmd!("guardrail")
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A committed repository on `main` holding a small login feature.
fn create_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/auth/login.rs", LOGIN_RS);
    write(dir.path(), "src/app.rs", APP_RS);
    write(dir.path(), "README.md", README);

    let repo = Repository::init(dir.path()).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
    }
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("test", "test@test.com").unwrap();
    let oid = repo
        .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
    let commit = repo.find_commit(oid).unwrap();
    repo.branch("main", &commit, true).unwrap();
    repo.set_head("refs/heads/main").unwrap();
    dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_guardrail_help() {
        guardrail()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("session"));
    }

    #[test]
    fn test_guardrail_version() {
        guardrail().arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_intent_is_rejected() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["session", "--intent", "refactor", "--request", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid intent"));
    }
}

// =============================================================================
// Config Command Tests
// =============================================================================

mod config_command {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using default configuration"))
            .stdout(predicate::str::contains("branch_prefix"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created guardrail.toml"));
        assert!(dir.path().join(".guardrail/guardrail.toml").exists());
        assert!(dir.path().join(".guardrail/.gitignore").exists());

        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));

        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_repo();
        write(
            dir.path(),
            ".guardrail/guardrail.toml",
            "[exploration.low]\nmin_symbols = 10\n",
        );
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"));
    }

    #[test]
    fn test_malformed_config_fails() {
        let dir = create_repo();
        write(dir.path(), ".guardrail/guardrail.toml", "[search\n");
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .failure();
    }
}

// =============================================================================
// Index Command Tests
// =============================================================================

mod index_commands {
    use super::*;

    #[test]
    fn test_sync_then_search() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("sync")
            .assert()
            .success()
            .stdout(predicate::str::contains("Synced:"))
            .stdout(predicate::str::contains("3 added"));

        let output = guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["search", "LoginForm validate password", "--json"])
            .output()
            .unwrap();
        assert!(output.status.success());
        let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(outcome["short_circuited"], false);
        let hits = outcome["hits"].as_array().unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0]["source"], "forest");
    }

    #[test]
    fn test_search_warns_when_never_synced() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["search", "login"])
            .assert()
            .success()
            .stderr(predicate::str::contains("never been synced"))
            .stdout(predicate::str::contains("No matches"));
    }

    #[test]
    fn test_status_reports_index_and_isolation() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Index:      not synced"))
            .stdout(predicate::str::contains("Isolation:  clean"));

        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("sync")
            .assert()
            .success();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Index:      3 files"));
    }
}

// =============================================================================
// Cleanup Command Tests
// =============================================================================

mod cleanup_command {
    use super::*;

    #[test]
    fn test_cleanup_on_clean_repo() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("cleanup")
            .assert()
            .success()
            .stdout(predicate::str::contains("No stale artifacts found"));
    }

    #[test]
    fn test_cleanup_removes_orphaned_task_branch() {
        let dir = create_repo();
        {
            let repo = Repository::open(dir.path()).unwrap();
            let head = repo.head().unwrap().peel_to_commit().unwrap();
            repo.branch("guardrail/task-deadbeef", &head, false).unwrap();
        }

        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["cleanup", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Would remove 1 stale artifact(s)"))
            .stdout(predicate::str::contains("guardrail/task-deadbeef"));

        let repo = Repository::open(dir.path()).unwrap();
        assert!(
            repo.find_branch("guardrail/task-deadbeef", git2::BranchType::Local)
                .is_ok()
        );

        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("cleanup")
            .assert()
            .success()
            .stdout(predicate::str::contains("Removed 1 stale artifact(s)"));
        assert!(
            repo.find_branch("guardrail/task-deadbeef", git2::BranchType::Local)
                .is_err()
        );
    }
}

// =============================================================================
// Session Command Tests
// =============================================================================

mod session_command {
    use super::*;

    fn session_lines(dir: &TempDir, args: &[&str], stdin: &str) -> Vec<serde_json::Value> {
        let output = guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("session")
            .args(args)
            .write_stdin(stdin)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8(output.stdout)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_question_session_over_stdin() {
        let dir = create_repo();
        let lines = session_lines(
            &dir,
            &[
                "--intent",
                "question",
                "--request",
                "how does the login form validate passwords",
                "--no-sync",
            ],
            "{\"tool\": \"status\"}\nnot json\n{\"tool\": \"find_definitions\", \"args\": {\"symbol\": \"LoginForm\"}}\n{\"tool\": \"check_write_target\", \"args\": {\"path\": \"src/app.rs\"}}\n",
        );

        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0]["phase"], "READY");
        assert_eq!(lines[0]["intent"], "question");
        assert_eq!(lines[1]["tool"], "status");
        assert!(lines[2]["error"].as_str().unwrap().contains("invalid tool call"));
        assert_eq!(lines[3]["accepted"], true);
        assert_eq!(lines[3]["result"][0]["file"], "src/auth/login.rs");
        assert_eq!(lines[4]["accepted"], false);
        assert_eq!(lines[4]["result"]["allowed"], false);
    }

    #[test]
    fn test_session_syncs_stale_index_and_archives() {
        let dir = create_repo();
        let lines = session_lines(
            &dir,
            &[
                "--intent",
                "modify",
                "--request",
                "the login button shows no error when password is empty",
                "--slot",
                "target_feature=login button",
            ],
            "{\"tool\": \"abort\", \"args\": {\"reason\": \"changed my mind\"}}\n",
        );
        assert_eq!(lines[0]["phase"], "EXPLORATION");
        assert_eq!(lines[0]["risk"], "MEDIUM");
        assert_eq!(lines[1]["next_phase"], "ABORTED");

        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Index:      3 files"))
            .stdout(predicate::str::contains("Sessions:   1 archived"));
    }

    #[test]
    fn test_slot_quote_must_appear_in_request() {
        let dir = create_repo();
        guardrail()
            .arg("--project-dir")
            .arg(dir.path())
            .args([
                "session",
                "--intent",
                "modify",
                "--request",
                "fix the login button",
                "--slot",
                "target_feature=signup page",
                "--no-sync",
            ])
            .write_stdin("")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to start session"));
    }
}

// =============================================================================
// Library Session Tests
// =============================================================================

mod library_sessions {
    use super::*;
    use guardrail::config::Config;
    use guardrail::frame::{ProposedSlot, SlotName};
    use guardrail::guard_config::GuardToml;
    use guardrail::phase::{Intent, Phase};
    use guardrail::search::HitSource;
    use guardrail::session::Orchestrator;
    use guardrail::tools::{Services, ToolCall, ToolDispatcher, ToolResponse};

    const REQUEST: &str = "the login button shows no error when password is empty";

    fn services(dir: &TempDir) -> Services {
        let root = dir.path().canonicalize().unwrap();
        let config = Config::with_settings(root, false, GuardToml::default());
        let mut services = Services::open(config).unwrap();
        services.sync().unwrap();
        services
    }

    fn start(services: Services, intent: Intent) -> ToolDispatcher {
        let orchestrator = Orchestrator::start(
            REQUEST,
            intent,
            &[ProposedSlot::new(SlotName::TargetFeature, "login button")],
            services.config.settings.clone(),
        )
        .unwrap();
        ToolDispatcher::new(services, orchestrator).unwrap()
    }

    fn send(dispatcher: &mut ToolDispatcher, json: &str) -> ToolResponse {
        let call: ToolCall = serde_json::from_str(json).unwrap();
        dispatcher.dispatch(call).unwrap()
    }

    #[test]
    fn test_modify_session_end_to_end() {
        let dir = create_repo();
        let mut d = start(services(&dir), Intent::Modify);
        assert_eq!(d.session().phase, Phase::Exploration);

        let defs = send(&mut d, r#"{"tool": "find_definitions", "args": {"symbol": "LoginForm"}}"#);
        assert!(defs.accepted);

        // Thin exploration lands in SEMANTIC with the gaps listed.
        let explored = send(
            &mut d,
            r#"{"tool": "submit_exploration", "args": {"symbols": ["LoginForm"], "entryPoints": ["LoginForm"], "files": ["src/auth/login.rs"]}}"#,
        );
        assert!(explored.accepted);
        assert_eq!(explored.next_phase, Phase::Semantic);
        let unmet = explored.result["unmet"].as_array().unwrap();
        assert!(unmet.contains(&serde_json::json!("files")));
        assert!(!unmet.contains(&serde_json::json!("definition_lookup")));

        let wrong_reason = send(
            &mut d,
            r#"{"tool": "submit_semantic", "args": {"reason": "no_similar_pattern_anywhere", "hypotheses": [{"statement": "x"}]}}"#,
        );
        assert!(!wrong_reason.accepted);
        assert_eq!(wrong_reason.next_phase, Phase::Semantic);

        let search = send(&mut d, r#"{"tool": "semantic_search", "args": {"query": "login form password"}}"#);
        assert!(search.accepted);
        assert_eq!(search.result["forest_queried"], true);

        let relevance = send(
            &mut d,
            r#"{"tool": "confirm_symbol_relevance", "args": {"symbol": "LoginForm", "context": "login button"}}"#,
        );
        assert!(relevance.accepted);
        assert_eq!(d.session().relevance.len(), 1);

        let semantic = send(
            &mut d,
            r#"{"tool": "submit_semantic", "args": {"reason": "scope_unclear", "hypotheses": [{"statement": "LoginForm::validate never reports the empty password", "symbol": "LoginForm", "file": "src/auth/login.rs"}]}}"#,
        );
        assert_eq!(semantic.next_phase, Phase::Verification);

        let verified = send(
            &mut d,
            r#"{"tool": "submit_verification", "args": {"evidence": [{"hypothesis": 0, "status": "confirmed", "detail": "validate only returns a bool", "file": "src/auth/login.rs", "line": 6}]}}"#,
        );
        assert_eq!(verified.next_phase, Phase::ImpactAnalysis);
        assert_eq!(verified.result["hypotheses"][0]["verified"], true);
        assert_eq!(verified.result["hypotheses"][0]["provenance"], "HYPOTHESIS");

        // src/app.rs uses LoginForm, so it must be classified.
        let impact = send(&mut d, r#"{"tool": "analyze_impact"}"#);
        assert!(impact.accepted);
        assert_eq!(impact.next_phase, Phase::ImpactAnalysis);
        assert_eq!(impact.result["report"]["must_verify"][0]["file"], "src/app.rs");

        let unresolved = send(
            &mut d,
            r#"{"tool": "submit_impact_analysis", "args": {"classifications": []}}"#,
        );
        assert!(!unresolved.accepted);
        assert_eq!(unresolved.result["unclassified"][0], "src/app.rs");

        let gated = send(
            &mut d,
            r#"{"tool": "submit_impact_analysis", "args": {"classifications": [{"path": "src/app.rs", "classification": "no_change_needed", "reason": "only calls validate"}]}}"#,
        );
        assert!(gated.accepted);
        assert_eq!(gated.next_phase, Phase::Ready);

        let denied = send(&mut d, r#"{"tool": "check_write_target", "args": {"path": "src/app.rs"}}"#);
        assert!(!denied.accepted);
        assert_eq!(denied.result["allowed"], false);
        let allowed = send(
            &mut d,
            r#"{"tool": "check_write_target", "args": {"path": "src/auth/login.rs"}}"#,
        );
        assert_eq!(allowed.result["allowed"], true);

        let begun = send(&mut d, r#"{"tool": "begin_isolated_session"}"#);
        assert!(begun.accepted, "{:?}", begun.diagnostics);
        let mount = begun.result["mount_path"].as_str().unwrap().to_string();
        let branch = begun.result["branch_name"].as_str().unwrap().to_string();
        assert!(branch.starts_with("guardrail/task-"));
        assert_eq!(begun.result["base_branch"], "main");

        let fixed = LOGIN_RS.replace(
            "!self.password.is_empty()",
            "!self.password.trim().is_empty()",
        );
        fs::write(Path::new(&mount).join("src/auth/login.rs"), &fixed).unwrap();
        // Base checkout is untouched until the merge.
        assert_eq!(
            fs::read_to_string(dir.path().join("src/auth/login.rs")).unwrap(),
            LOGIN_RS
        );

        let review = send(&mut d, r#"{"tool": "submit_for_review"}"#);
        assert_eq!(review.next_phase, Phase::PreCommit);
        let changes = send(&mut d, r#"{"tool": "review_changes"}"#);
        assert_eq!(changes.result["changes"][0]["path"], "src/auth/login.rs");

        let early_merge = send(&mut d, r#"{"tool": "merge_to_base"}"#);
        assert!(!early_merge.accepted);

        let finalized = send(
            &mut d,
            r#"{"tool": "finalize_changes", "args": {"classifications": {"src/auth/login.rs": "keep"}}}"#,
        );
        assert!(finalized.accepted, "{:?}", finalized.diagnostics);

        let merged = send(&mut d, r#"{"tool": "merge_to_base"}"#);
        assert!(merged.accepted, "{:?}", merged.diagnostics);
        assert_eq!(merged.next_phase, Phase::Completed);
        assert_eq!(merged.result["fast_forward"], true);
        assert_eq!(
            fs::read_to_string(dir.path().join("src/auth/login.rs")).unwrap(),
            fixed
        );
        assert!(!Path::new(&mount).exists());

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert!(head.summary().unwrap().starts_with("guardrail: the login button"));

        let success = send(
            &mut d,
            r#"{"tool": "mark_successful", "args": {"agreements": [{"phrase": "login button", "symbol": "LoginForm", "file": "src/auth/login.rs", "evidence": "fixed validate"}]}}"#,
        );
        assert!(success.accepted);
        assert_eq!(success.result["recorded"], 1);
        let again = send(&mut d, r#"{"tool": "mark_successful"}"#);
        assert!(!again.accepted);

        // The next search for the same phrase is answered from the Map.
        let outcome = d.services().engine.search("login button");
        assert!(outcome.short_circuited);
        assert!(!outcome.forest_queried);
        assert_eq!(outcome.hits[0].source, HitSource::Map);
        assert_eq!(outcome.hits[0].symbol.as_deref(), Some("LoginForm"));

        let session = d.close();
        assert_eq!(session.phase, Phase::Completed);
        assert!(session.marked_successful);
        assert_eq!(d.services().archive.list().unwrap().len(), 1);
    }

    #[test]
    fn test_discarded_review_leaves_base_untouched() {
        let dir = create_repo();
        let mut d = start(services(&dir), Intent::Modify);

        send(&mut d, r#"{"tool": "find_definitions", "args": {"symbol": "LoginForm"}}"#);
        send(&mut d, r#"{"tool": "find_references", "args": {"symbol": "LoginForm"}}"#);
        let explored = send(
            &mut d,
            r#"{"tool": "submit_exploration", "args": {"symbols": ["LoginForm", "validate", "render"], "entryPoints": ["LoginForm"], "files": ["src/auth/login.rs", "src/app.rs"], "patterns": ["src/app.rs::render delegates to LoginForm::validate"]}}"#,
        );
        assert_eq!(explored.result["confidence"], "high");
        assert_eq!(explored.next_phase, Phase::ImpactAnalysis);

        let impact = send(&mut d, r#"{"tool": "analyze_impact"}"#);
        assert!(impact.accepted);
        if impact.next_phase == Phase::ImpactAnalysis {
            let gated = send(
                &mut d,
                r#"{"tool": "submit_impact_analysis", "args": {"classifications": [{"path": "README.md", "classification": "not_affected", "reason": "prose only"}]}}"#,
            );
            assert_eq!(gated.next_phase, Phase::Ready);
        }

        let begun = send(&mut d, r#"{"tool": "begin_isolated_session"}"#);
        let mount = begun.result["mount_path"].as_str().unwrap().to_string();
        fs::write(Path::new(&mount).join("src/app.rs"), "// scratch\n").unwrap();
        send(&mut d, r#"{"tool": "submit_for_review"}"#);

        let rejected = send(
            &mut d,
            r#"{"tool": "finalize_changes", "args": {"classifications": {"src/app.rs": "discard"}}}"#,
        );
        assert!(!rejected.accepted);
        assert!(rejected.diagnostics[0].contains("nothing to commit"));

        let aborted = send(&mut d, r#"{"tool": "abort", "args": {"reason": "not worth it"}}"#);
        assert_eq!(aborted.next_phase, Phase::Aborted);
        assert_eq!(fs::read_to_string(dir.path().join("src/app.rs")).unwrap(), APP_RS);

        // The aborted session's overlay is now stale and cleanup reclaims it.
        let orphans = d.services().isolation.orphans().unwrap();
        assert!(!orphans.is_empty());
        let removed = d.services().isolation.cleanup_stale().unwrap();
        assert!(removed.iter().any(|a| a.name.starts_with("guardrail/task-")));
        assert!(!Path::new(&mount).exists());
    }

    #[test]
    fn test_revert_keeps_surface_and_returns_to_exploration() {
        let dir = create_repo();
        let mut d = start(services(&dir), Intent::Modify);
        send(
            &mut d,
            r#"{"tool": "submit_exploration", "args": {"symbols": ["LoginForm"], "files": ["src/auth/login.rs"]}}"#,
        );
        assert_eq!(d.session().phase, Phase::Semantic);

        let reverted = send(
            &mut d,
            r#"{"tool": "revert_to_exploration", "args": {"keep_results": true}}"#,
        );
        assert_eq!(reverted.next_phase, Phase::Exploration);
        assert!(d.session().write_surface().contains("src/auth/login.rs"));

        let transitions: Vec<(Phase, Phase)> = d
            .session()
            .transitions
            .iter()
            .map(|t| (t.from, t.to))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (Phase::Exploration, Phase::Semantic),
                (Phase::Semantic, Phase::Exploration)
            ]
        );
    }
}
