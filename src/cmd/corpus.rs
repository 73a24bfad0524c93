//! Index maintenance and inspection: `guardrail sync`, `search`, `status`.

use anyhow::{Context, Result};
use std::time::Duration;

use guardrail::config::Config;
use guardrail::search::{HitSource, StaleReason};
use guardrail::tools::Services;
use guardrail::util::run_bounded;

pub async fn cmd_sync(config: Config) -> Result<()> {
    let timeout = Duration::from_secs(config.settings.timeouts.sync_secs);
    let mut services = Services::open(config)?;
    let report = run_bounded(timeout, "corpus sync", move || services.sync()).await?;

    println!(
        "{} {} added, {} modified, {} deleted, {} unchanged",
        console::style("Synced:").green().bold(),
        report.added.len(),
        report.modified.len(),
        report.deleted.len(),
        report.unchanged
    );
    println!(
        "  {} chunks indexed, {} cache entries invalidated ({} ms)",
        report.chunks, report.invalidated, report.duration_ms
    );
    Ok(())
}

pub async fn cmd_search(config: Config, query: &str, json: bool) -> Result<()> {
    let timeout = Duration::from_secs(config.settings.timeouts.search_secs);
    let services = Services::open(config)?;
    if let Some(reason) = services.staleness()? {
        eprintln!(
            "{} {}",
            console::style("warning:").yellow(),
            describe_staleness(&reason)
        );
    }
    let query_owned = query.to_string();
    let outcome =
        run_bounded(timeout, "search", move || Ok(services.engine.search(&query_owned))).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to render search outcome")?
        );
        return Ok(());
    }

    if outcome.hits.is_empty() {
        println!("No matches for '{}'.", query);
        return Ok(());
    }
    if outcome.short_circuited {
        println!("{}", console::style("Answered from the Map").dim());
    }
    for hit in &outcome.hits {
        let source = match hit.source {
            HitSource::Map => console::style("map").cyan(),
            HitSource::Forest => console::style("forest").blue(),
        };
        let location = match (&hit.file, hit.line) {
            (Some(file), Some(line)) => format!("{}:{}", file, line),
            (Some(file), None) => file.clone(),
            _ => "-".to_string(),
        };
        println!(
            "{:.3}  {:<6}  {:<40} {}",
            hit.score,
            source,
            location,
            hit.symbol.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn describe_staleness(reason: &StaleReason) -> String {
    match reason {
        StaleReason::ManifestMissing => "index has never been synced; run `guardrail sync`".into(),
        StaleReason::Elapsed { age_secs } => format!(
            "index was last synced {}s ago; run `guardrail sync`",
            age_secs
        ),
    }
}

pub fn cmd_status(config: Config) -> Result<()> {
    let services = Services::open(config)?;
    let manifest = services.store.load_manifest().context("Failed to read manifest")?;

    println!();
    println!("{}", console::style("Guardrail Status").bold().cyan());
    println!("================");
    println!();
    println!("Repository: {}", services.config.repo_root.display());
    println!("State:      {}", services.store.root().display());
    println!();

    match &manifest {
        Some(m) => println!(
            "Index:      {} files, {} chunks, synced {}",
            m.files.len(),
            services.engine.forest().chunk_count(),
            m.synced_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("Index:      not synced"),
    }
    if let Some(reason) = services.staleness()? {
        println!("            {}", console::style(describe_staleness(&reason)).yellow());
    }
    println!("Map:        {} agreements", services.engine.map().len());
    println!(
        "Cache:      {} persistent symbol entries",
        services.explorer.cache().persistent().len()
    );
    println!("Sessions:   {} archived", services.archive.list()?.len());

    let orphans = services.isolation.orphans()?;
    if orphans.is_empty() {
        println!("Isolation:  clean");
    } else {
        println!(
            "Isolation:  {} stale artifact(s); run `guardrail cleanup`",
            console::style(orphans.len()).red()
        );
        for artifact in &orphans {
            println!("              {}", artifact);
        }
    }
    println!();
    Ok(())
}
