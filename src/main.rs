use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sharenote::assets::FsAssetSource;
use sharenote::config::PublishConfig;
use sharenote::document::DocumentSnapshot;
use sharenote::error::{PublishError, Result};
use sharenote::index::PublishIndex;
use sharenote::pipeline::{open_note, PublishOptions, Publisher};
use sharenote::queue::{Progress, ProgressSink};
use sharenote::storage::http::HttpRemoteStore;

#[derive(Parser)]
#[command(name = "sharenote")]
#[command(about = "Publish notes as shareable, optionally encrypted web pages")]
#[command(version)]
struct Cli {
    /// Settings file (JSON). Defaults to SHARENOTE_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a rendered document snapshot
    Publish {
        /// Serialized document snapshot (JSON)
        snapshot: PathBuf,
        /// Publish index file
        #[arg(long, default_value = "sharenote-index.json")]
        index: PathBuf,
        /// Local directory that relative asset paths resolve against
        #[arg(long, default_value = ".")]
        vault: PathBuf,
        /// Publish without encryption
        #[arg(long)]
        plaintext: bool,
        /// Upload the stylesheet even if the server already has one
        #[arg(long)]
        force_css: bool,
        /// Upload images as-is instead of recompressing large ones
        #[arg(long)]
        no_compress: bool,
    },
    /// Delete a published document
    Unpublish {
        /// Document path as recorded in the index
        path: String,
        #[arg(long, default_value = "sharenote-index.json")]
        index: PathBuf,
    },
    /// Decrypt a note body with its link key
    Decrypt {
        /// File holding the encrypted template content (JSON)
        envelope: PathBuf,
        /// Decryption key from the share link fragment
        key: String,
    },
}

struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, progress: Progress) {
        match progress {
            Progress::Stage(stage) => info!("{stage}"),
            Progress::CheckingFiles { queued } => info!(queued, "Checking files"),
            Progress::Uploading { done, total } => info!(done, total, "Uploading"),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PublishConfig> {
    match path {
        Some(path) => PublishConfig::from_json_file(path),
        None => PublishConfig::from_env(),
    }
}

fn publisher(config: PublishConfig, vault: &Path) -> Result<Publisher> {
    let store = HttpRemoteStore::new(&config)?;
    Publisher::new(config, Arc::new(store), Arc::new(FsAssetSource::new(vault)))
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish {
            snapshot,
            index,
            vault,
            plaintext,
            force_css,
            no_compress,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if no_compress {
                config.compress_images = false;
            }
            let raw = tokio::fs::read(&snapshot).await?;
            let snapshot: DocumentSnapshot = serde_json::from_slice(&raw)?;
            let mut published = PublishIndex::load(&index).await?;

            let options = PublishOptions {
                encrypt: !plaintext,
                force_css,
            };
            let outcome = publisher(config, &vault)?
                .publish(snapshot, &mut published, options, &LogProgress)
                .await?;
            published.save(&index).await?;
            println!("{}", outcome.share_link());
        }
        Commands::Unpublish { path, index } => {
            let config = load_config(cli.config.as_deref())?;
            let mut published = PublishIndex::load(&index).await?;
            let link = publisher(config, Path::new("."))?
                .unpublish(&path, &mut published)
                .await?;
            published.save(&index).await?;
            println!("Deleted {}", link.url);
        }
        Commands::Decrypt { envelope, key } => {
            let content = tokio::fs::read_to_string(&envelope).await?;
            let note = open_note(content.trim(), &key)?;
            println!("{}", note.content);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("{}", e.user_message());
        let code = match e {
            PublishError::Config(_) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
