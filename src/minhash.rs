//! Min-hash / LSH encoding of fingerprint bit vectors
//!
//! `hash_tables * keys_per_table` fixed permutations of the bit positions
//! are drawn once from a seeded generator. The permutations are part of the
//! persisted schema: changing the seed (or any structural parameter)
//! invalidates every corpus built with it.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, OnceLock};

use crate::config::FingerprintConfig;
use crate::fingerprint::get_bit;

/// Min-hash values clamp to one byte at packing; pigeon-hole collisions are
/// acceptable because verification recomputes exact Hamming similarity.
const CLAMP: u32 = 255;

/// Process-wide cache for the default-schema table, which every command
/// with default parameters shares.
static DEFAULT_TABLE: OnceLock<Arc<PermutationTable>> = OnceLock::new();

/// Immutable table of bit-position permutations, grouped into
/// `hash_tables` blocks of `keys_per_table`.
pub struct PermutationTable {
    hash_tables: usize,
    keys_per_table: usize,
    permutations: Vec<Vec<u32>>,
}

impl PermutationTable {
    /// Generate the table for a configuration. Deterministic in
    /// `(permutation_seed, hash_tables, keys_per_table, fingerprint_bits)`.
    pub fn new(config: &FingerprintConfig) -> Self {
        let n_bits = config.fingerprint_bits() as u32;
        let mut rng = ChaCha8Rng::seed_from_u64(config.permutation_seed);

        let count = config.hash_tables * config.keys_per_table;
        let mut permutations = Vec::with_capacity(count);
        for _ in 0..count {
            let mut perm: Vec<u32> = (0..n_bits).collect();
            perm.shuffle(&mut rng);
            permutations.push(perm);
        }

        Self {
            hash_tables: config.hash_tables,
            keys_per_table: config.keys_per_table,
            permutations,
        }
    }

    /// Shared table for the given configuration. The default schema is
    /// generated once per process; other schemas get a fresh table.
    pub fn shared(config: &FingerprintConfig) -> Arc<Self> {
        let default = FingerprintConfig::default();
        if config.permutation_seed == default.permutation_seed
            && config.hash_tables == default.hash_tables
            && config.keys_per_table == default.keys_per_table
            && config.fingerprint_bits() == default.fingerprint_bits()
        {
            DEFAULT_TABLE
                .get_or_init(|| Arc::new(Self::new(&default)))
                .clone()
        } else {
            Arc::new(Self::new(config))
        }
    }

    pub fn hash_tables(&self) -> usize {
        self.hash_tables
    }

    /// One 32-bit key per table: the block's `keys_per_table` min-hash
    /// values, clamped to a byte each, concatenated little-endian.
    pub fn hash_keys(&self, bits: &[u8]) -> Vec<u32> {
        (0..self.hash_tables)
            .map(|table| {
                let block = &self.permutations
                    [table * self.keys_per_table..(table + 1) * self.keys_per_table];
                let mut key = 0u32;
                for (slot, perm) in block.iter().enumerate() {
                    key |= min_hash(perm, bits) << (8 * slot);
                }
                key
            })
            .collect()
    }
}

/// Smallest `i` with bit `perm[i]` set, clamped to [`CLAMP`].
///
/// The unclamped sentinel for an all-zero vector is the vector length; it
/// clamps to the same byte as any position past 255, so the scan can stop
/// early.
fn min_hash(perm: &[u32], bits: &[u8]) -> u32 {
    for (i, &position) in perm.iter().enumerate().take(CLAMP as usize) {
        if get_bit(bits, position as usize) {
            return i as u32;
        }
    }
    CLAMP
}
