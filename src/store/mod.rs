//! Model store contract
//!
//! The narrow persistence interface the engine consumes. Any backend
//! satisfying it is valid; the crate ships an in-memory store and a SQLite
//! store. The engine assumes only that inserts are durable before the next
//! read, and that sub-fingerprint inserts are idempotent per
//! `(track, start_offset)` so callers can retry a failed batch.

mod memory;
mod sqlite;

pub use memory::InMemoryModelStore;
pub use sqlite::SqliteModelStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SchemaId;
use crate::error::EngineError;

/// Store-assigned reference to a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackRef(pub i64);

/// Store-assigned reference to a sub-fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubFpRef(pub i64);

/// Descriptive track metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// ISRC when known, otherwise a synthetic identifier.
    pub id: String,
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub length_seconds: f64,
}

/// One sub-fingerprint to persist: offset, encoded bits, and the derived
/// hash-table keys (one per table).
#[derive(Debug, Clone, PartialEq)]
pub struct SubFingerprintEntry {
    pub start_offset_seconds: f64,
    pub bits: Vec<u8>,
    pub hash_keys: Vec<u32>,
}

/// A stored sub-fingerprint resolved from its reference.
#[derive(Debug, Clone, PartialEq)]
pub struct SubFingerprintRecord {
    pub track: TrackRef,
    pub start_offset_seconds: f64,
    pub bits: Vec<u8>,
}

/// Persistence contract for tracks, sub-fingerprints, and hash tables.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Schema the corpus was built with. Engines refuse stores whose schema
    /// disagrees with their runtime configuration.
    fn schema(&self) -> &SchemaId;

    /// Insert a track and return its reference. Tracks are inserted before
    /// their sub-fingerprints.
    async fn insert_track(&self, metadata: TrackMetadata) -> Result<TrackRef, EngineError>;

    /// Insert a batch of sub-fingerprints for a track, filing each into
    /// every hash table. Idempotent per `(track, start_offset)`.
    async fn insert_subfingerprints(
        &self,
        track: TrackRef,
        entries: &[SubFingerprintEntry],
    ) -> Result<(), EngineError>;

    /// References filed under `key` in hash table `table`.
    async fn read_subfingerprints_by_hash(
        &self,
        table: usize,
        key: u32,
    ) -> Result<Vec<SubFpRef>, EngineError>;

    /// Resolve a reference to its full record.
    async fn read_subfingerprint(
        &self,
        subfp: SubFpRef,
    ) -> Result<SubFingerprintRecord, EngineError>;

    /// Encoded bits of one sub-fingerprint.
    async fn read_fingerprint_bits(&self, subfp: SubFpRef) -> Result<Vec<u8>, EngineError>;

    async fn read_track(&self, track: TrackRef) -> Result<TrackMetadata, EngineError>;

    /// Delete a track; its sub-fingerprints and hash entries cascade.
    async fn delete_track(&self, track: TrackRef) -> Result<(), EngineError>;

    async fn track_count(&self) -> Result<usize, EngineError>;

    async fn subfingerprint_count(&self) -> Result<usize, EngineError>;
}
