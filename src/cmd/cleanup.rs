//! Stale isolation artifact sweep: `guardrail cleanup`.

use anyhow::Result;

use guardrail::config::Config;
use guardrail::tools::Services;

pub fn cmd_cleanup(config: Config, dry_run: bool) -> Result<()> {
    let services = Services::open(config)?;

    let artifacts = if dry_run {
        services.isolation.orphans()?
    } else {
        services.isolation.cleanup_stale()?
    };

    if artifacts.is_empty() {
        println!("No stale artifacts found.");
        return Ok(());
    }

    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!("{} {} stale artifact(s):", verb, artifacts.len());
    for artifact in &artifacts {
        println!(
            "  {:<9} {}",
            console::style(artifact.kind.as_str()).yellow(),
            artifact.name
        );
    }
    Ok(())
}
