#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runs the service area enrichment stage over a stream of events.
//!
//! Reads newline-delimited JSON events from a file or stdin, enriches
//! each with its drive-time service area, and writes the enriched events
//! to stdout in the same format. Events the stage drops are logged and
//! omitted from the output.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::future;
use futures::stream::{self, StreamExt as _};
use service_area::registry::{InMemorySchemaRegistry, SchemaRegistry, StaticConnections};
use service_area::transport::HttpTransport;
use service_area::{ServiceAreaCalculator, ServiceAreaConfig, StageConfig};
use service_area_models::Schema;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader};

mod events;

/// Enrich point events with drive-time service areas.
#[derive(Parser)]
#[command(name = "service_area_cli")]
#[command(about = "Enrich point events with drive-time service areas")]
struct Cli {
    /// Path to the stage TOML file.
    #[arg(long)]
    config: PathBuf,

    /// Newline-delimited JSON input. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Maximum number of solver requests in flight.
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
}

/// Totals reported when the run finishes.
#[derive(Debug, Default)]
struct RunSummary {
    read: usize,
    emitted: usize,
    dropped: usize,
    rejected: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = ServiceAreaConfig::load(&cli.config)?;
    let stage = StageConfig::try_from(&config.stage)?;

    let registry = Arc::new(InMemorySchemaRegistry::new());
    for definition in config.schemas {
        let schema = Schema::new(definition.name, definition.fields);
        log::info!("Registered input schema '{}'", schema.name());
        registry.add_schema(schema, false)?;
    }

    let calculator = ServiceAreaCalculator::new(
        stage,
        Arc::clone(&registry) as Arc<dyn SchemaRegistry>,
        Arc::new(StaticConnections::from(config.connections)),
        Arc::new(HttpTransport::new()),
    );
    let stage = calculator.config();
    log::info!(
        "Stage {} ready (concurrency={}): '{}' -> '{}' in {} schema{}",
        calculator.id(),
        cli.concurrency,
        stage.input_field,
        stage.output_field(),
        if stage.mutates_events() { "the input" } else { "a new" },
        stage
            .output_schema_name()
            .map(|name| format!(" named '{name}'"))
            .unwrap_or_default()
    );

    let mut stdout = tokio::io::stdout();
    let summary = match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            let reader = BufReader::new(file);
            run(&calculator, &registry, reader, cli.concurrency, &mut stdout).await?
        }
        None => {
            let reader = BufReader::new(tokio::io::stdin());
            run(&calculator, &registry, reader, cli.concurrency, &mut stdout).await?
        }
    };

    calculator.shutdown();

    log::info!(
        "Read {} events: {} emitted, {} dropped, {} rejected",
        summary.read,
        summary.emitted,
        summary.dropped,
        summary.rejected
    );

    Ok(())
}

/// Decodes, enriches, and writes every line of `reader` to `writer` as
/// lines arrive. Up to `concurrency` events are in flight at once.
async fn run(
    calculator: &ServiceAreaCalculator,
    registry: &InMemorySchemaRegistry,
    reader: impl AsyncBufRead + Unpin,
    concurrency: usize,
    writer: &mut (impl AsyncWrite + Unpin),
) -> std::io::Result<RunSummary> {
    let mut read = 0usize;
    let mut rejected = 0usize;
    let mut read_error = None;
    let mut line_number = 0usize;

    let lines = stream::unfold(Some(reader.lines()), |state| async move {
        let mut lines = state?;
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(line), Some(lines))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    });

    let results = lines
        .filter_map(|line| {
            let event = match line {
                Ok(line) => {
                    line_number += 1;
                    if line.trim().is_empty() {
                        None
                    } else {
                        read += 1;
                        events::decode(&line, registry)
                            .inspect_err(|e| {
                                log::warn!("Skipping line {line_number}: {e}");
                                rejected += 1;
                            })
                            .ok()
                    }
                }
                Err(e) => {
                    read_error = Some(e);
                    None
                }
            };
            future::ready(event)
        })
        .map(|event| calculator.process(event))
        .buffer_unordered(concurrency.max(1));
    let mut results = Box::pin(results);

    let mut emitted = 0usize;
    let mut dropped = 0usize;

    while let Some(result) = results.next().await {
        match result {
            Some(event) => {
                let mut line = events::encode(&event).to_string();
                line.push('\n');
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await?;
                emitted += 1;
            }
            None => dropped += 1,
        }
    }
    drop(results);

    if let Some(e) = read_error {
        return Err(e);
    }

    Ok(RunSummary {
        read,
        emitted,
        dropped,
        rejected,
    })
}
