use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use image_anchor::anchor::TransactionId;
use image_anchor::app::Services;
use image_anchor::config::Config;
use image_anchor::crypto::{digest, Fingerprint};
use image_anchor::error::{AnchorError, Result};
use image_anchor::pipeline::{AnchorOutcome, AnchorRequest, DEFAULT_FILE_NAME};
use image_anchor::server::{self, AppState};
use image_anchor::storage::ContentId;

#[derive(Parser)]
#[command(name = "image-anchor")]
#[command(about = "Anchor image fingerprints in content-addressed storage and on a public ledger")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "image-anchor.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve,
    /// Anchor a local image file
    Anchor {
        file: String,
    },
    /// Check whether an image was anchored
    Verify {
        /// Hex fingerprint to look up
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        fingerprint: Option<String>,
        /// Fingerprint this file instead
        #[arg(long)]
        file: Option<String>,
    },
    /// Index a transaction whose ledger outcome was left ambiguous
    Reconcile {
        #[arg(long)]
        fingerprint: String,
        #[arg(long)]
        content_id: String,
        #[arg(long)]
        tx: String,
    },
    /// Print the fingerprint of a file
    Digest {
        file: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_anchor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Digest { file } = &cli.command {
        let data = tokio::fs::read(file).await?;
        println!("{}  {}", digest(&data), file);
        return Ok(());
    }

    let cfg = Config::from_file(&cli.config)?;
    let services = Services::from_config(&cfg).await?;

    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting image-anchor server with config: {}", cli.config);
            let max_upload_bytes = cfg.server.max_upload_bytes;
            server::serve(AppState { services }, &cfg.server.bind_addr, max_upload_bytes).await
        }
        Commands::Anchor { file } => {
            let data = tokio::fs::read(&file).await?;
            let name = std::path::Path::new(&file)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_FILE_NAME)
                .to_string();
            let outcome = services
                .coordinator
                .anchor(AnchorRequest::new(data, name))
                .await?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Verify { fingerprint, file } => {
            let verification = match (fingerprint, file) {
                (_, Some(file)) => {
                    let data = tokio::fs::read(&file).await?;
                    services.verifier.verify_bytes(&data).await?
                }
                (Some(fp), None) => services.verifier.verify(&fp).await?,
                (None, None) => {
                    return Err(AnchorError::Validation(
                        "a fingerprint or --file is required".into(),
                    ))
                }
            };
            match verification.record {
                Some(record) => {
                    println!("matched: true");
                    println!("content_id: {}", record.content_id);
                    println!("transaction_id: {}", record.transaction_id);
                    println!("submitted_at: {}", record.submitted_at.to_rfc3339());
                }
                None => println!("matched: false"),
            }
            Ok(())
        }
        Commands::Reconcile {
            fingerprint,
            content_id,
            tx,
        } => {
            let fingerprint = Fingerprint::from_hex(&fingerprint)?;
            let outcome = services
                .coordinator
                .reconcile(fingerprint, ContentId::new(content_id), TransactionId::new(tx))
                .await?;
            print_outcome(&outcome);
            Ok(())
        }
        Commands::Digest { .. } => Ok(()),
    }
}

fn print_outcome(outcome: &AnchorOutcome) {
    let r = &outcome.record;
    println!("fingerprint: {}", r.fingerprint);
    println!("content_id: {}", r.content_id);
    println!("transaction_id: {}", r.transaction_id);
    println!("submitter: {}", r.submitter);
    println!("submitted_at: {}", r.submitted_at.to_rfc3339());
    println!("already_anchored: {}", outcome.already_anchored);
}
