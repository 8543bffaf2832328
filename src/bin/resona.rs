//! Command-line front end: ingest tracks into a SQLite corpus and identify
//! samples against it. Exits 0 on match, 1 on no-match, 2 on error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use resona::{FingerprintConfig, RecognitionEngine, SqliteModelStore, TrackMetadata};

#[derive(Parser)]
#[command(name = "resona", version, about = "Audio fingerprinting and recognition")]
struct Cli {
    /// SQLite corpus file.
    #[arg(long, default_value = "resona.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fingerprint a WAV file and add it to the corpus.
    Ingest {
        audio: PathBuf,
        /// Track metadata as a JSON file; synthesized from the file name
        /// when omitted.
        #[arg(long)]
        meta: Option<PathBuf>,
    },
    /// Identify a sample against the corpus.
    Query {
        audio: PathBuf,
        /// Seconds of audio to process.
        #[arg(long)]
        seconds: Option<f64>,
        /// Seconds to skip before processing.
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Print the full ranked result as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config = FingerprintConfig::default();
    let store = SqliteModelStore::open(&cli.db, config.schema_id())
        .await
        .with_context(|| format!("opening corpus {}", cli.db.display()))?;
    let engine = RecognitionEngine::new(store, config)?;

    match cli.command {
        Command::Ingest { audio, meta } => {
            let metadata = match meta {
                Some(path) => read_metadata(&path)?,
                None => synthesized_metadata(&audio),
            };
            let report = engine
                .ingest_file(audio.display().to_string(), metadata)
                .await?;
            println!(
                "ingested track {} with {} fingerprints",
                report.track.0, report.fingerprints
            );
            Ok(true)
        }
        Command::Query {
            audio,
            seconds,
            start,
            json,
        } => {
            let result = engine
                .query_file(audio.display().to_string(), start, seconds)
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if let Some(best) = result.best_match() {
                println!(
                    "match: {} - {} (score {:.1}, {} fingerprints)",
                    best.metadata.artist,
                    best.metadata.title,
                    best.score,
                    best.matched_fingerprints
                );
            } else {
                println!("no match");
            }
            Ok(result.is_successful())
        }
    }
}

fn read_metadata(path: &Path) -> Result<TrackMetadata> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading metadata {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing metadata {}", path.display()))
}

fn synthesized_metadata(audio: &Path) -> TrackMetadata {
    let title = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unknown".into());
    TrackMetadata {
        id: uuid::Uuid::new_v4().to_string(),
        artist: "unknown".into(),
        title,
        album: None,
        release_year: None,
        length_seconds: 0.0,
    }
}
