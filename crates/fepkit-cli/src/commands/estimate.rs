use crate::cli::EstimateArgs;
use crate::config::PartialRunConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use fepkit::engine::progress::ProgressReporter;
use fepkit::workflows::free_energy::SimulationResult;
use fepkit::workflows::relative::estimate_relative_free_energy;
use itertools::{Itertools, izip};
use serde::Serialize;
use std::path::Path;
use tracing::info;

const SUMMARY_FILE: &str = "summary.toml";

#[derive(Serialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct PairSummary {
    from: f64,
    to: f64,
    dg: f64,
    err: f64,
    overlap: f64,
}

/// Written next to the figures; energies in kJ/mol.
#[derive(Serialize, Debug)]
#[serde(rename_all = "kebab-case")]
struct RunSummary {
    prefix: String,
    total_dg: f64,
    total_err: f64,
    lambdas: Vec<f64>,
    components: Vec<String>,
    pairs: Vec<PairSummary>,
}

impl RunSummary {
    fn new(prefix: String, result: &SimulationResult) -> Self {
        let lambdas = result.lambdas();
        let pairs = izip!(
            lambdas.iter().tuple_windows(),
            &result.all_dgs,
            &result.all_errs,
            &result.overlaps_by_lambda
        )
        .map(|((&from, &to), &dg, &err, &overlap)| PairSummary {
            from,
            to,
            dg,
            err,
            overlap,
        })
        .collect();
        Self {
            prefix,
            total_dg: result.total_dg(),
            total_err: result.total_err(),
            lambdas,
            components: result.component_names.clone(),
            pairs,
        }
    }
}

pub fn run(args: EstimateArgs) -> Result<()> {
    let partial_config = PartialRunConfig::from_file(&args.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let run_config = partial_config.merge_with_cli(&args)?;
    let prefix = format!("{}_{}", run_config.system.name, run_config.relative.prefix);

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!("Starting free-energy estimate '{}'...", prefix);
    info!("Invoking the relative free-energy workflow...");
    let result = estimate_relative_free_energy(&run_config.system, &run_config.relative, &reporter)?;

    std::fs::create_dir_all(&args.output_dir)?;
    for (stem, svg) in result.figures.named() {
        let path = args.output_dir.join(format!("{stem}.svg"));
        std::fs::write(&path, svg)?;
        info!("Wrote figure {:?}", path);
    }

    let summary = RunSummary::new(prefix, &result);
    write_summary(&args.output_dir.join(SUMMARY_FILE), &summary)?;
    print_summary(&summary);
    Ok(())
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let content = toml::to_string_pretty(summary)
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to serialize summary: {}", e)))?;
    std::fs::write(path, content)?;
    info!("Wrote summary to {:?}", path);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{:>8} {:>8} {:>12} {:>10} {:>8}", "from", "to", "dG (kJ/mol)", "err", "overlap");
    for pair in &summary.pairs {
        println!(
            "{:>8.3} {:>8.3} {:>12.3} {:>10.3} {:>8.3}",
            pair.from, pair.to, pair.dg, pair.err, pair.overlap
        );
    }
    println!(
        "\n✓ {}: dG = {:.3} +- {:.3} kJ/mol over {} windows",
        summary.prefix,
        summary.total_dg,
        summary.total_err,
        summary.lambdas.len()
    );
}
