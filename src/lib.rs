//! Resona Audio Engine - wavelet fingerprinting for music recognition
//!
//! This crate turns arbitrary audio into compact, noise-robust binary
//! fingerprints and identifies which previously ingested track a sample
//! came from. The pipeline resamples to a canonical rate, frames and
//! windows the signal, collapses spectra onto a logarithmic band grid,
//! stacks reduced frames into images, applies a 2-D Haar decomposition,
//! keeps the strongest wavelet signs, and indexes the resulting bit vector
//! under `L` min-hash keys for sub-linear lookup. Matching is tolerant to
//! compression, equalization, additive noise, and modest time offsets.
//!
//! # Usage
//!
//! ```no_run
//! use resona::{FingerprintConfig, InMemoryModelStore, RecognitionEngine, TrackMetadata};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FingerprintConfig::default();
//!     let store = InMemoryModelStore::new(config.schema_id());
//!     let engine = RecognitionEngine::new(store, config)?;
//!
//!     let metadata = TrackMetadata {
//!         id: "USRC17607839".into(),
//!         artist: "Example Artist".into(),
//!         title: "Example Title".into(),
//!         album: None,
//!         release_year: None,
//!         length_seconds: 30.0,
//!     };
//!     engine.ingest_file("track.wav", metadata).await?;
//!
//!     let result = engine.query_file("sample.wav", 0.0, Some(10.0)).await?;
//!     if let Some(best) = result.best_match() {
//!         println!("{} - {}", best.metadata.artist, best.metadata.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod bands;
pub mod command;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod image;
pub mod minhash;
pub mod query;
pub mod spectral;
pub mod store;
pub mod stride;
pub mod wavelet;

pub use command::{CancellationToken, Fingerprinter, FingerprinterBuilder};
pub use config::{FingerprintConfig, QueryConfig, SchemaId};
pub use error::EngineError;
pub use fingerprint::Fingerprint;
pub use query::{MatchSegment, QueryResult, TrackMatch};
pub use store::{
    InMemoryModelStore, ModelStore, SqliteModelStore, SubFingerprintEntry, SubFpRef,
    TrackMetadata, TrackRef,
};
pub use stride::Stride;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

/// Outcome of one ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub track: TrackRef,
    /// Sub-fingerprints persisted. Zero when the audio is shorter than one
    /// fingerprint image; that is not an error.
    pub fingerprints: usize,
}

/// Ingest and recognition facade over a model store.
///
/// The engine holds the fingerprint configuration and verifies at
/// construction that the store was built under the same schema; mixing
/// schemas is fatal before any audio is touched.
pub struct RecognitionEngine<S: ModelStore> {
    store: S,
    config: FingerprintConfig,
    query_config: QueryConfig,
}

impl<S: ModelStore> RecognitionEngine<S> {
    pub fn new(store: S, config: FingerprintConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let runtime = config.schema_id();
        if store.schema() != &runtime {
            return Err(EngineError::SchemaMismatch {
                stored: store.schema().to_string(),
                runtime: runtime.to_string(),
            });
        }
        Ok(Self {
            store,
            config,
            query_config: QueryConfig::default(),
        })
    }

    /// Replace the default query parameters.
    pub fn with_query_config(mut self, query_config: QueryConfig) -> Result<Self, EngineError> {
        query_config.validate()?;
        self.query_config = query_config;
        Ok(self)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Ingest a WAV file.
    pub async fn ingest_file(
        &self,
        path: impl Into<String>,
        metadata: TrackMetadata,
    ) -> Result<IngestReport, EngineError> {
        let command = Fingerprinter::builder()
            .from_file(path)
            .config(self.config.clone())
            .build()?;
        self.ingest(command, metadata).await
    }

    /// Ingest an in-memory mono buffer.
    pub async fn ingest_samples(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
        metadata: TrackMetadata,
    ) -> Result<IngestReport, EngineError> {
        let command = Fingerprinter::builder()
            .from_samples(samples, sample_rate)
            .config(self.config.clone())
            .build()?;
        self.ingest(command, metadata).await
    }

    /// Ingest a prebuilt command, giving the caller control over time
    /// bounds and cancellation.
    ///
    /// The full fingerprint set is computed before anything is written, so
    /// a cancelled or failed command leaves no partial state behind.
    pub async fn ingest(
        &self,
        command: Fingerprinter,
        metadata: TrackMetadata,
    ) -> Result<IngestReport, EngineError> {
        self.check_command(&command)?;
        let started = Instant::now();

        let fingerprints = command.execute()?;
        let entries: Vec<SubFingerprintEntry> = fingerprints
            .into_iter()
            .map(|fp| SubFingerprintEntry {
                start_offset_seconds: fp.start_offset_seconds,
                bits: fp.bits,
                hash_keys: fp.hash_keys,
            })
            .collect();

        let track = self.store.insert_track(metadata).await?;
        self.store.insert_subfingerprints(track, &entries).await?;

        info!(
            track = track.0,
            fingerprints = entries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "track ingested"
        );
        Ok(IngestReport {
            track,
            fingerprints: entries.len(),
        })
    }

    /// Query with a window of a WAV file.
    pub async fn query_file(
        &self,
        path: impl Into<String>,
        start_seconds: f64,
        seconds_to_process: Option<f64>,
    ) -> Result<QueryResult, EngineError> {
        let mut builder = Fingerprinter::builder()
            .from_file(path)
            .config(self.config.clone())
            .stride(self.query_config.stride.clone())
            .start_at(start_seconds);
        if let Some(seconds) = seconds_to_process {
            builder = builder.take_seconds(seconds);
        }
        self.query(builder.build()?).await
    }

    /// Query with an in-memory mono buffer.
    pub async fn query_samples(
        &self,
        samples: Vec<f32>,
        sample_rate: u32,
    ) -> Result<QueryResult, EngineError> {
        let command = Fingerprinter::builder()
            .from_samples(samples, sample_rate)
            .config(self.config.clone())
            .stride(self.query_config.stride.clone())
            .build()?;
        self.query(command).await
    }

    /// Resolve a prebuilt query command against the store.
    pub async fn query(&self, command: Fingerprinter) -> Result<QueryResult, EngineError> {
        self.check_command(&command)?;
        let started = Instant::now();

        let fingerprints = command.execute()?;
        let result = query::resolve(&self.store, &fingerprints, &self.query_config).await?;

        info!(
            query_fingerprints = fingerprints.len(),
            candidates = result.matches.len(),
            successful = result.is_successful(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query resolved"
        );
        Ok(result)
    }

    /// Commands must share the engine's structural parameters, otherwise
    /// their fingerprints would silently belong to a different schema.
    fn check_command(&self, command: &Fingerprinter) -> Result<(), EngineError> {
        if command.config().schema_id() != self.config.schema_id() {
            return Err(EngineError::InvalidConfig(
                "command configuration disagrees with the engine schema".into(),
            ));
        }
        Ok(())
    }
}
