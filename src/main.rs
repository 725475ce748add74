mod cli;
mod ui;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use reality_pipeline::config::{JobDefinition, PipelineConfig};
use reality_pipeline::pipeline::Pipeline;
use reality_pipeline::reality::RealityClient;
use reality_pipeline::references::ReferenceTable;
use reality_pipeline::state_machine::RunStatus;
use ui::ProgressDisplay;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "reality_pipeline=debug"
    } else {
        "reality_pipeline=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let bars = MultiProgress::new();

    match cli.command {
        Command::Refs => list_references(&config.references_file),
        Command::Run { file } => {
            let definition = JobDefinition::load(&file)?;
            let pipeline = connect(&config, &bars)?;
            let mut display = ProgressDisplay::start(&bars, &definition.job_name);

            match pipeline.run(&definition, &mut display).await {
                Ok(record) => {
                    display.finish(record.status);
                    ui::print_record(&record);
                    Ok(())
                }
                Err(err) => {
                    display.fail(&err);
                    Err(err.into())
                }
            }
        }
        Command::Upload { file } => {
            let definition = JobDefinition::load(&file)?;
            let pipeline = connect(&config, &bars)?;
            let records = pipeline.upload_inputs(&definition.inputs).await?;
            for record in records {
                let how = if record.reused { "reused" } else { "uploaded" };
                println!("{},{} ({how})", record.local_path, record.cloud_id);
            }
            Ok(())
        }
        Command::Track { job_id } => {
            let pipeline = connect(&config, &bars)?;
            let mut display = ProgressDisplay::start(&bars, &job_id);
            match pipeline.track_job(&job_id, &mut display).await {
                Ok(outcome) => {
                    display.note(&format!(
                        "{}% ({})",
                        outcome.progress().percent,
                        outcome.progress().step
                    ));
                    display.finish(if outcome.is_cancelled() {
                        RunStatus::Cancelled
                    } else {
                        RunStatus::Completed
                    });
                    Ok(())
                }
                Err(err) => {
                    display.fail(&err);
                    Err(err.into())
                }
            }
        }
        Command::Download { job_id, output_dir } => {
            let pipeline = connect(&config, &bars)?;
            let results = pipeline.download_outputs(&job_id, &output_dir).await?;
            ui::print_outputs(&results);
            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                anyhow::bail!("{failed} of {} outputs failed to download", results.len());
            }
            Ok(())
        }
    }
}

fn connect(config: &PipelineConfig, bars: &MultiProgress) -> Result<Pipeline<RealityClient>> {
    config.validate()?;
    let client = RealityClient::with_timeout(
        config.access_token.clone(),
        config.service_url.clone(),
        config.request_timeout(),
    )
    .context("Failed to build HTTP client")?
    .with_concurrency(config.upload_concurrency)
    .with_progress(ui::transfer_hook(bars));
    Ok(Pipeline::new(client, config))
}

fn list_references(path: &Path) -> Result<()> {
    let table = ReferenceTable::load_or_default(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if table.is_empty() {
        println!("No references in {}", path.display());
        return Ok(());
    }
    for (local_path, cloud_id) in table.iter() {
        println!("{local_path},{cloud_id}");
    }
    Ok(())
}
