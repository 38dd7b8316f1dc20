//! gmail-dl - export a Gmail mailbox to JSON Lines and summarize it

use clap::{Parser, Subcommand};
use gmail_dl::config::Config;
use gmail_dl::error::{Error, Result, ToExitCode};
use gmail_dl::{FileTokenProvider, GmailClient, Retriever, analysis, cancel_on_signal};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// gmail-dl - export a Gmail mailbox to JSON Lines
#[derive(Parser, Debug)]
#[command(name = "gmail-dl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gmail-dl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download every message into the output log
    Download,

    /// Summarize an existing output log
    Analyze {
        /// Log to read (defaults to the configured output log)
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error [{}]: {}", e.error_code(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Download => download(&config).await,
        Commands::Analyze { input } => {
            let log = input.unwrap_or_else(|| config.output_path());
            let mut stdout = std::io::stdout();
            let reports = analysis::analyze(&config.analysis, &log, &mut stdout)?;
            for report in reports {
                println!(
                    "Wrote {}, {}, {}",
                    report.all_values.display(),
                    report.by_count.display(),
                    report.by_size.display()
                );
            }
            Ok(())
        }
    }
}

async fn download(config: &Config) -> Result<()> {
    let http_client = reqwest::Client::builder()
        .timeout(config.api.request_timeout)
        .user_agent(concat!("gmail-dl/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

    let tokens = FileTokenProvider::load(&config.auth, http_client.clone()).await?;
    let api = GmailClient::with_http_client(&config.api, Arc::new(tokens), http_client)?;

    let retriever = Retriever::new(Arc::new(api), config);
    let watcher = tokio::spawn(cancel_on_signal(retriever.cancellation_token()));

    let result = retriever.run().await;
    watcher.abort();

    let summary = result?;
    tracing::info!(
        output = %summary.output_path.display(),
        records = summary.records,
        failures = summary.failures,
        "download finished"
    );
    Ok(())
}
