//! Driftwood CLI: reads JSON records from stdin, one per line, and runs
//! them through the adaptive ingestion pipeline.

use clap::Parser;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use driftwood::{Config, Pipeline};

/// Driftwood - adaptive dual-backend ingestion pipeline
#[derive(Parser, Debug)]
#[command(name = "driftwood")]
#[command(about = "Ingests JSON records from stdin and routes fields across SQL and document backends")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: String,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();

    info!("Loading config from {}", args.config);
    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let pipeline = match Pipeline::connect(config).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to start pipeline: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted = 0u64;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; draining buffer");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let raw = match serde_json::from_str::<serde_json::Value>(&line) {
                            Ok(raw) => raw,
                            Err(e) => {
                                warn!(error = %e, "Skipping unparseable input line");
                                rejected += 1;
                                continue;
                            }
                        };
                        match pipeline.ingest(raw).await {
                            Ok(()) => accepted += 1,
                            Err(e) => {
                                warn!(error = %e, "Record rejected");
                                rejected += 1;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        }
    }

    let status = pipeline.status().await;
    match pipeline.close().await {
        Ok(()) => {
            info!(
                accepted,
                rejected,
                total = status.total_records_processed + status.buffer_size as u64,
                sql_fields = status.backend_distribution.sql + status.backend_distribution.both,
                doc_fields = status.backend_distribution.doc + status.backend_distribution.both,
                "Ingestion finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Pipeline shutdown failed: {e}");
            ExitCode::FAILURE
        }
    }
}
