use std::process::ExitCode;

use anyhow::{Context, Result};

use fitbridge_core::config::FitbridgeConfig;
use fitbridge_core::ledger::DeliveryLedger;

pub fn run_ledger(config: &FitbridgeConfig, json: bool) -> Result<ExitCode> {
    let path = &config.ledger.path;
    if !path.exists() {
        if json {
            println!("[]");
        } else {
            println!("No activities delivered yet.");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let ledger = DeliveryLedger::open(path)
        .with_context(|| format!("failed to open ledger {}", path.display()))?;
    let entries = ledger.entries().context("failed to read ledger")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(ExitCode::SUCCESS);
    }

    if entries.is_empty() {
        println!("No activities delivered yet.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("{:<25}  Activity", "Delivered");
    for entry in &entries {
        println!(
            "{:<25}  {}",
            entry.delivered_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.activity_id
        );
    }
    Ok(ExitCode::SUCCESS)
}
