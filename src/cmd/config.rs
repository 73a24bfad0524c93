//! Configuration view and validation commands: `guardrail config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;
use guardrail::config::Config;
use guardrail::guard_config::GuardToml;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", console::style("Guardrail Configuration").bold().cyan());
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No guardrail.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!("State directory: {}", config.state_dir.display());
            println!("Overlay directory: {}", config.overlay_dir.display());
            if let Some(base) = config.settings.isolation.effective_base_branch() {
                println!("Base branch: {}", base);
            }
            println!();
            let rendered = toml::to_string_pretty(&config.settings)
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No guardrail.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = GuardToml::load(&config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("{}", console::style("Configuration is valid.").green());
            } else {
                println!("{}", console::style("Configuration warnings:").yellow());
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("guardrail.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            config.ensure_directories()?;
            GuardToml::default().save(&config_path)?;

            println!("Created guardrail.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [exploration.*] sufficiency thresholds per risk level");
            println!("  - [impact] document scan limits and markup extensions");
            println!("  - [search] thresholds, limits and indexed extensions");
            println!("  - [isolation] branch prefix, base branch, overlay directory");
            println!();
        }
    }

    Ok(())
}
