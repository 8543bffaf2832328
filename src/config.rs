//! Configuration for fingerprint generation and query resolution

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::stride::Stride;

/// Parameters of the fingerprint generation pipeline.
///
/// The structural subset of these parameters forms the [`SchemaId`]; two
/// corpora built with different schema ids cannot be mixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Canonical mono sample rate every source is resampled to.
    pub sample_rate: u32,
    /// Samples per FFT frame.
    pub frame_size: usize,
    /// Samples between consecutive frame starts.
    pub overlap: usize,
    /// Reduced frames stacked into one fingerprint image.
    pub rows: usize,
    /// Logarithmic frequency bands per reduced frame.
    pub cols: usize,
    /// Haar coefficients retained per image.
    pub top_wavelets: usize,
    /// LSH hash-table count (`L`).
    pub hash_tables: usize,
    /// Min-hash values packed into one table key (`K`, one byte each).
    pub keys_per_table: usize,
    /// Lower edge of the retained frequency range, Hz.
    pub min_frequency: f32,
    /// Upper edge of the retained frequency range, Hz.
    pub max_frequency: f32,
    /// Seed of the version-stamped permutation table.
    pub permutation_seed: u64,
    /// Placement of successive fingerprint windows at ingest.
    pub stride: Stride,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            sample_rate: 5512,
            frame_size: 2048,
            overlap: 64,
            rows: 128,
            cols: 32,
            top_wavelets: 200,
            hash_tables: 25,
            keys_per_table: 4,
            min_frequency: 318.0,
            max_frequency: 2000.0,
            permutation_seed: 42,
            stride: Stride::Fixed { samples: 512 },
        }
    }
}

impl FingerprintConfig {
    /// Length of the encoded fingerprint in bits (two bits per image cell).
    pub fn fingerprint_bits(&self) -> usize {
        2 * self.rows * self.cols
    }

    /// Length of the encoded fingerprint in bytes.
    pub fn fingerprint_bytes(&self) -> usize {
        self.fingerprint_bits() / 8
    }

    /// Samples covered by one fingerprint image.
    pub fn samples_per_image(&self) -> usize {
        (self.rows - 1) * self.overlap + self.frame_size
    }

    /// Validate the configuration. Invalid combinations are rejected when a
    /// command is built, before any audio is touched.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.frame_size < 2 || !self.frame_size.is_power_of_two() {
            return Err(EngineError::InvalidConfig(format!(
                "frame_size must be a power of two >= 2, got {}",
                self.frame_size
            )));
        }
        if self.overlap == 0 || self.overlap > self.frame_size {
            return Err(EngineError::InvalidConfig(format!(
                "overlap must be in [1, frame_size], got {}",
                self.overlap
            )));
        }
        if !self.rows.is_power_of_two() || !self.cols.is_power_of_two() {
            return Err(EngineError::InvalidConfig(format!(
                "image shape must be a power of two per side for the Haar transform, got {}x{}",
                self.rows, self.cols
            )));
        }
        if self.top_wavelets == 0 || self.top_wavelets > self.rows * self.cols {
            return Err(EngineError::InvalidConfig(format!(
                "top_wavelets must be in [1, rows*cols={}], got {}",
                self.rows * self.cols,
                self.top_wavelets
            )));
        }
        if self.hash_tables == 0 {
            return Err(EngineError::InvalidConfig("hash_tables must be positive".into()));
        }
        if self.keys_per_table == 0 || self.keys_per_table > 4 {
            return Err(EngineError::InvalidConfig(format!(
                "keys_per_table must be in [1, 4] to pack into a 32-bit key, got {}",
                self.keys_per_table
            )));
        }
        // Tables must not oversubscribe the variance of the bit image.
        if self.hash_tables * self.keys_per_table * 8 > self.fingerprint_bits() {
            return Err(EngineError::InvalidConfig(format!(
                "hash_tables * keys_per_table oversubscribes the {}-bit fingerprint",
                self.fingerprint_bits()
            )));
        }
        if self.min_frequency <= 0.0 || self.min_frequency >= self.max_frequency {
            return Err(EngineError::InvalidConfig(format!(
                "frequency band [{}, {}] is empty",
                self.min_frequency, self.max_frequency
            )));
        }
        if self.max_frequency > self.sample_rate as f32 / 2.0 {
            return Err(EngineError::InvalidConfig(format!(
                "max_frequency {} exceeds the Nyquist limit of {} Hz",
                self.max_frequency,
                self.sample_rate / 2
            )));
        }
        self.stride.validate()
    }

    /// Schema identifier of a corpus produced with this configuration.
    pub fn schema_id(&self) -> SchemaId {
        SchemaId {
            rows: self.rows,
            cols: self.cols,
            bits: self.fingerprint_bits(),
            hash_tables: self.hash_tables,
            keys_per_table: self.keys_per_table,
            permutation_seed: self.permutation_seed,
            top_wavelets: self.top_wavelets,
        }
    }
}

/// Parameters of query resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Minimum hash-table hits for a candidate to reach verification.
    pub min_hits_per_fingerprint: usize,
    /// Minimum Hamming similarity for a verified hit.
    pub min_similarity: f32,
    /// Minimum distinct matched query fingerprints for a track to be
    /// reported.
    pub threshold_votes: usize,
    /// Placement of query fingerprint windows.
    pub stride: Stride,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_hits_per_fingerprint: 5,
            min_similarity: 0.5,
            threshold_votes: 5,
            stride: Stride::Incremental,
        }
    }
}

impl QueryConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(EngineError::InvalidConfig(format!(
                "min_similarity must be in [0, 1], got {}",
                self.min_similarity
            )));
        }
        if self.min_hits_per_fingerprint == 0 || self.threshold_votes == 0 {
            return Err(EngineError::InvalidConfig(
                "min_hits_per_fingerprint and threshold_votes must be positive".into(),
            ));
        }
        self.stride.validate()
    }
}

/// Structural parameters that determine index compatibility.
///
/// Stores persist the rendered form and refuse to open corpora whose id
/// disagrees with the runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaId {
    pub rows: usize,
    pub cols: usize,
    pub bits: usize,
    pub hash_tables: usize,
    pub keys_per_table: usize,
    pub permutation_seed: u64,
    pub top_wavelets: usize,
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resona/v1:{}x{}:n{}:L{}:K{}:seed{}:t{}",
            self.rows,
            self.cols,
            self.bits,
            self.hash_tables,
            self.keys_per_table,
            self.permutation_seed,
            self.top_wavelets
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FingerprintConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fingerprint_bits(), 8192);
        assert_eq!(config.fingerprint_bytes(), 1024);
        assert_eq!(config.samples_per_image(), 127 * 64 + 2048);
    }

    #[test]
    fn test_rejects_oversized_top_wavelets() {
        let config = FingerprintConfig {
            top_wavelets: 128 * 32 + 1,
            ..FingerprintConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unpackable_keys() {
        let config = FingerprintConfig {
            keys_per_table: 5,
            ..FingerprintConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_band_above_nyquist() {
        let config = FingerprintConfig {
            max_frequency: 3000.0,
            ..FingerprintConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_schema_id_round_trips_structural_parameters() {
        let config = FingerprintConfig::default();
        let id = config.schema_id();
        assert_eq!(id.to_string(), "resona/v1:128x32:n8192:L25:K4:seed42:t200");
        assert_eq!(id, FingerprintConfig::default().schema_id());

        let other = FingerprintConfig {
            permutation_seed: 43,
            ..FingerprintConfig::default()
        };
        assert_ne!(id, other.schema_id());
    }
}
