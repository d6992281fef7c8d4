use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use fitbridge_core::config::FitbridgeConfig;
use fitbridge_core::pipeline::transform_file;

pub fn run_transform(
    config: &FitbridgeConfig,
    input: &Path,
    output_dir: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let dir = output_dir.unwrap_or(&config.backup.dir);
    let report = transform_file(input, dir)
        .with_context(|| format!("failed to transform {}", input.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Activity:     {}", report.activity_id);
        println!("Written:      {}", report.backup.display());
        println!(
            "Corrected:    {} samples, {} temperature fields removed, {} averages filled",
            report.stats.samples, report.stats.temperature_stripped, report.stats.averages_filled
        );
    }
    Ok(ExitCode::SUCCESS)
}
