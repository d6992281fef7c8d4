use std::process::ExitCode;

use anyhow::{Context, Result};

use fitbridge_core::config::FitbridgeConfig;
use fitbridge_core::destination::HttpDestination;
use fitbridge_core::pipeline::{Pipeline, SyncOutcome, SyncReport};

use crate::prompt::CliPrompt;

pub fn run_sync(
    config: &FitbridgeConfig,
    username: Option<String>,
    password: Option<String>,
    json: bool,
) -> Result<ExitCode> {
    config.require_destination()?;
    let destination =
        HttpDestination::new(&config.destination).context("failed to set up destination")?;

    let report = Pipeline::new(config, &destination, CliPrompt::new(username, password))
        .run()
        .context("sync failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &SyncReport) {
    let outcome = match report.outcome {
        SyncOutcome::Delivered => "delivered",
        SyncOutcome::AlreadyDelivered => "already delivered, nothing sent",
        SyncOutcome::DuplicateAtDestination => "destination already had it",
    };

    println!("Sync Summary");
    println!("============");
    println!("Run ID:       {}", report.run_id);
    println!("Activity:     {}", report.activity_id);
    println!("Source:       {}", report.source.display());
    println!("Backup:       {}", report.backup.display());
    println!(
        "Corrected:    {} samples, {} summaries, {} dropped",
        report.stats.samples, report.stats.summaries, report.stats.dropped
    );
    println!("Outcome:      {outcome}");
}
