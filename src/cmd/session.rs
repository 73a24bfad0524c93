//! `guardrail session`: drives one session over JSON lines.
//!
//! Each stdin line is a tool call (`{"tool": "...", "args": {...}}`); each
//! stdout line is the response. The first line written is a header with the
//! session id, starting phase and risk.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use guardrail::config::Config;
use guardrail::frame::{ProposedSlot, SlotName};
use guardrail::session::{Orchestrator, SessionOptions};
use guardrail::tools::{Services, ToolCall, ToolDispatcher};
use guardrail::util::run_bounded;

use crate::SessionArgs;

fn parse_slot(raw: &str) -> Result<ProposedSlot> {
    let (name, quote) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid slot '{}': expected NAME=QUOTE", raw))?;
    let slot: SlotName = name.parse()?;
    Ok(ProposedSlot::new(slot, quote.trim()))
}

fn emit(value: &Value) {
    println!("{}", value);
}

pub async fn cmd_session(config: Config, args: SessionArgs) -> Result<()> {
    let sync_timeout = Duration::from_secs(config.settings.timeouts.sync_secs);
    let mut services = Services::open(config)?;

    if !args.no_sync {
        if let Some(reason) = services.staleness()? {
            info!(?reason, "index is stale, syncing before session start");
            services = run_bounded(sync_timeout, "corpus sync", move || {
                services.sync()?;
                Ok(services)
            })
            .await?;
        }
    }

    let proposed = args
        .slots
        .iter()
        .map(|raw| parse_slot(raw))
        .collect::<Result<Vec<_>>>()?;

    let settings = services.config.settings.clone();
    let mut options = SessionOptions::from_settings(&settings);
    if args.no_impact {
        options.impact_analysis = false;
    }
    if args.no_new_files {
        options.allow_new_files = false;
    }

    let orchestrator =
        Orchestrator::start_with_options(&args.request, args.intent, &proposed, options, settings)
            .context("Failed to start session")?;
    let dispatcher = ToolDispatcher::new(services, orchestrator)?;
    let timeouts = dispatcher.timeouts().clone();
    {
        let session = dispatcher.session();
        emit(&json!({
            "session": session.id,
            "intent": session.intent,
            "phase": session.phase,
            "risk": session.risk,
            "frame": session.frame,
        }));
    }
    let dispatcher = Arc::new(Mutex::new(dispatcher));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let call: ToolCall = match serde_json::from_str(line) {
            Ok(call) => call,
            Err(e) => {
                emit(&json!({ "error": format!("invalid tool call: {}", e) }));
                continue;
            }
        };

        let tool = call.name();
        let timeout = call.timeout(&timeouts);
        let shared = Arc::clone(&dispatcher);
        let outcome = run_bounded(timeout, tool, move || {
            let mut guard = shared
                .lock()
                .map_err(|_| anyhow!("session state is poisoned"))?;
            Ok(guard.dispatch(call))
        })
        .await;

        match outcome {
            Ok(Ok(response)) => emit(&serde_json::to_value(&response)?),
            Ok(Err(e)) => {
                emit(&json!({
                    "tool": tool,
                    "fatal": true,
                    "error": e.to_string(),
                    "recovery_hint": e.recovery_hint(),
                }));
                break;
            }
            Err(e) => {
                warn!(tool, error = %e, "tool call did not complete");
                emit(&json!({ "tool": tool, "error": e.to_string() }));
            }
        }
    }

    let session = tokio::task::spawn_blocking(move || {
        dispatcher
            .lock()
            .map(|mut guard| guard.close())
            .map_err(|_| anyhow!("session state is poisoned"))
    })
    .await
    .context("Failed to close session")??;

    info!(
        session = %session.short_id(),
        phase = %session.phase,
        "session closed"
    );
    Ok(())
}
