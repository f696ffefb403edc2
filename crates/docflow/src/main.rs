//! Docflow document pipeline
//!
//! Usage:
//!     docflow run scans/*.png
//!     docflow --config docflow.toml --config site.toml check
//!     docflow queues

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use docflow::{AppConfig, QueueRow};
use docflow_logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "docflow", version, about = "Document pipeline: OCR, classification, feedback and retraining")]
struct Cli {
    /// Configuration file; repeat to layer several (later files win)
    #[arg(short, long = "config", global = true, env = "DOCFLOW_CONFIG", value_delimiter = ',')]
    config: Vec<PathBuf>,

    /// Broker URL, overriding the config file (memory://, amqp://...)
    #[arg(long, global = true, env = "DOCFLOW_BROKER_URL")]
    broker_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to stderr only
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start every stage, submit FILES for OCR and run until Ctrl-C
    Run {
        /// Documents to submit
        files: Vec<PathBuf>,

        /// Queue for the OCR result instead of the prediction stage
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Validate the manager graph and print the construction order
    Check,

    /// Print the queue topology
    Queues,

    /// Print one configuration value by dotted key
    Get {
        /// e.g. pipeline.confidence_threshold
        key: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new("docflow");
    log_config.verbose = cli.verbose;
    log_config.file_logging = !cli.no_log_file && matches!(cli.command, Commands::Run { .. });
    if let Err(err) = init_logging(log_config) {
        eprintln!("Warning: logging setup failed: {:#}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config)?.with_broker_url(cli.broker_url);

    match cli.command {
        Commands::Run { files, reply_to } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(run(config, files, reply_to))
        }
        Commands::Check => {
            let order = docflow::check(&config)?;
            println!("Manager graph OK ({} managers)", order.len());
            for (i, name) in order.iter().enumerate() {
                println!("{:>3}. {}", i + 1, name);
            }
            Ok(())
        }
        Commands::Queues => {
            print_topology(&docflow::topology());
            Ok(())
        }
        Commands::Get { key } => match config.get(&key) {
            Some(value) => {
                println!("{}", value);
                Ok(())
            }
            None => anyhow::bail!("'{}' is not set in {:?}", key, config.sources),
        },
    }
}

async fn run(config: AppConfig, files: Vec<PathBuf>, reply_to: Option<String>) -> Result<()> {
    info!(
        broker = %config.broker.url,
        threshold = config.pipeline.confidence_threshold,
        "Starting docflow"
    );
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C, stopping");
        }
    };
    let summary = docflow::run(&config, &files, reply_to.as_deref(), stop).await?;
    info!(
        submitted = summary.submitted.len(),
        published = summary.metrics.published,
        acked = summary.metrics.acked,
        requeued = summary.metrics.requeued,
        dead_lettered = summary.metrics.dead_lettered,
        handler_timeouts = summary.metrics.handler_timeouts,
        "Docflow stopped"
    );
    Ok(())
}

fn print_topology(rows: &[QueueRow]) {
    println!("{:<22} {:<14} KINDS", "QUEUE", "CONSUMER");
    for row in rows {
        let consumer = row.consumer.map(|s| s.as_str()).unwrap_or("-");
        let kinds = row
            .kinds
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{:<22} {:<14} {}", row.queue, consumer, kinds);
    }
}
