use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::report::RunReport;
use providers::ProviderKind;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tagger_core::config::{self, AppConfig};
use tagger_core::export::{self, OutputFormat};
use tagger_core::pipeline::{self, RunOptions};
use tagger_core::resolver::{self, ImageFilter};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Tag {
            dir,
            format,
            output,
            providers,
            timeout,
            batch_delay_ms,
            report,
        } => {
            if let Some(ms) = batch_delay_ms {
                cfg.run.batch_delay_ms = ms;
            }
            let format = match format {
                Some(f) => f.parse()?,
                None => cfg.output.format,
            };
            let only = providers
                .iter()
                .map(|p| p.parse::<ProviderKind>())
                .collect::<Result<Vec<_>, _>>()?;
            run_tag(
                cfg,
                &dir,
                format,
                output.as_deref(),
                only,
                timeout.map(Duration::from_secs),
                report.as_deref(),
            )
            .await
        }
        Commands::List { dir, json } => run_list(&cfg, &dir, json),
        Commands::Providers { json } => run_providers(&cfg, json),
    }
}

#[derive(Parser)]
#[command(name = "image-tagger")]
#[command(about = "Tag a folder of images with several cloud tagging services", long_about = None)]
struct Cli {
    /// Path to config file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tag every image in a folder and print the combined table
    Tag {
        /// Folder holding the images (not searched recursively)
        dir: PathBuf,
        /// Output format (defaults to output.format from config)
        #[arg(long, value_parser = ["json", "csv"], ignore_case = true)]
        format: Option<String>,
        /// Write the table to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only run these providers (comma-separated)
        #[arg(long = "provider", value_delimiter = ',')]
        providers: Vec<String>,
        /// Stop sending batches after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Pause between batches sent to the same provider
        #[arg(long)]
        batch_delay_ms: Option<u64>,
        /// Also write a JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print the images a run would send
    List {
        dir: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which providers have usable credentials
    Providers {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run_tag(
    cfg: AppConfig,
    dir: &Path,
    format: OutputFormat,
    output: Option<&Path>,
    only: Vec<ProviderKind>,
    timeout: Option<Duration>,
    report_path: Option<&Path>,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing with the results collected so far");
            on_interrupt.cancel();
        }
    });

    let opts = RunOptions {
        only,
        timeout,
        cancel,
    };
    let outcome = pipeline::run(&cfg, dir, opts)
        .await
        .with_context(|| format!("tagging {}", dir.display()))?;

    match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("create output file {}", path.display()))?;
            export::write_table(&outcome.table, format, BufWriter::new(file))?;
        }
        None => {
            let stdout = io::stdout();
            export::write_table(&outcome.table, format, stdout.lock())?;
        }
    }

    let report = RunReport::from(&outcome);
    for line in report.summary_lines() {
        eprintln!("{line}");
    }
    if let Some(path) = report_path {
        let file = File::create(path)
            .with_context(|| format!("create report file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &report)?;
        writer
            .flush()
            .with_context(|| format!("write report file {}", path.display()))?;
    }

    if report.association_failures > 0 {
        eprintln!(
            "{} batch(es) returned results that could not be matched to their images; those tags were discarded",
            report.association_failures
        );
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_list(cfg: &AppConfig, dir: &Path, json: bool) -> Result<ExitCode> {
    let filter = ImageFilter::from_config(&cfg.images)?;
    let images = resolver::resolve(dir, &filter)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&images.ids())?);
    } else {
        let mut out = io::stdout().lock();
        for id in images.ids() {
            writeln!(out, "{id}")?;
        }
        writeln!(out, "{} image(s)", images.len())?;
    }
    Ok(ExitCode::SUCCESS)
}

fn run_providers(cfg: &AppConfig, json: bool) -> Result<ExitCode> {
    let registry = pipeline::build_registry(cfg);
    let rows: Vec<serde_json::Value> = ProviderKind::ALL
        .iter()
        .map(|kind| {
            let active = registry.get(*kind).ok();
            serde_json::json!({
                "provider": kind,
                "active": active.is_some(),
                "max_batch_size": active.and_then(|p| p.max_batch_size()),
                "batch_delay_ms": cfg.batch_delay(*kind).as_millis() as u64,
            })
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            let ceiling = row["max_batch_size"]
                .as_u64()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string());
            println!(
                "{:<20} {:<9} batch={:<10} delay={}ms",
                row["provider"].as_str().unwrap_or_default(),
                if row["active"].as_bool() == Some(true) { "active" } else { "inactive" },
                ceiling,
                row["batch_delay_ms"]
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn format_choices_are_checked_by_the_parser() {
        let cli = Cli::try_parse_from(["image-tagger", "tag", "photos", "--format", "CSV"]).unwrap();
        let Commands::Tag { format, .. } = cli.command else {
            panic!("expected tag command");
        };
        assert_eq!(format.unwrap().parse::<OutputFormat>().unwrap(), OutputFormat::Csv);

        let err = Cli::try_parse_from(["image-tagger", "tag", "photos", "--format", "xml"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn provider_list_splits_on_commas() {
        let cli = Cli::try_parse_from([
            "image-tagger",
            "tag",
            "photos",
            "--provider",
            "imagga,google-vision",
        ])
        .unwrap();
        let Commands::Tag { providers, .. } = cli.command else {
            panic!("expected tag command");
        };
        assert_eq!(providers, vec!["imagga", "google-vision"]);
    }
}
