//! Query resolution: candidate gathering, verification, and ranking

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::error::EngineError;
use crate::fingerprint::{hamming_similarity, Fingerprint};
use crate::store::{ModelStore, SubFingerprintRecord, SubFpRef, TrackMetadata, TrackRef};

/// One verified hit localizing a query fingerprint within a stored track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSegment {
    pub query_offset_seconds: f64,
    pub track_offset_seconds: f64,
    pub similarity: f32,
}

/// Aggregated evidence for one candidate track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMatch {
    pub track: TrackRef,
    pub metadata: TrackMetadata,
    /// Sum of Hamming similarities over every verified hit.
    pub score: f64,
    /// Distinct query fingerprints with at least one verified hit.
    pub matched_fingerprints: usize,
    pub segments: Vec<MatchSegment>,
}

/// Ranked outcome of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Tracks passing the vote threshold, best first.
    pub matches: Vec<TrackMatch>,
    /// Query fingerprints examined.
    pub query_fingerprints: usize,
}

impl QueryResult {
    pub fn best_match(&self) -> Option<&TrackMatch> {
        self.matches.first()
    }

    pub fn is_successful(&self) -> bool {
        !self.matches.is_empty()
    }
}

struct TrackTally {
    score: f64,
    matched: Vec<bool>,
    segments: Vec<MatchSegment>,
}

/// Resolve a query's fingerprints against the store.
///
/// For every query fingerprint, each hash table is probed with its key; a
/// candidate reaching `min_hits_per_fingerprint` tables is verified by
/// exact Hamming similarity against its stored bits. Verified hits are
/// aggregated per track, tracks below `threshold_votes` distinct matched
/// fingerprints are dropped, and the rest are ranked by score, then matched
/// fingerprints, then track reference.
pub async fn resolve<S: ModelStore + ?Sized>(
    store: &S,
    fingerprints: &[Fingerprint],
    config: &QueryConfig,
) -> Result<QueryResult, EngineError> {
    config.validate()?;

    let mut tallies: HashMap<TrackRef, TrackTally> = HashMap::new();
    // Incremental query strides revisit the same candidates; resolve each
    // reference against the store once.
    let mut records: HashMap<SubFpRef, SubFingerprintRecord> = HashMap::new();

    for (index, query) in fingerprints.iter().enumerate() {
        let mut table_hits: HashMap<SubFpRef, usize> = HashMap::new();
        for (table, &key) in query.hash_keys.iter().enumerate() {
            for subfp in store.read_subfingerprints_by_hash(table, key).await? {
                *table_hits.entry(subfp).or_insert(0) += 1;
            }
        }

        for (subfp, hits) in table_hits {
            if hits < config.min_hits_per_fingerprint {
                continue;
            }
            if !records.contains_key(&subfp) {
                let fetched = store.read_subfingerprint(subfp).await?;
                records.insert(subfp, fetched);
            }
            let record = &records[&subfp];

            let similarity = hamming_similarity(&query.bits, &record.bits);
            if similarity < config.min_similarity {
                continue;
            }

            let tally = tallies.entry(record.track).or_insert_with(|| TrackTally {
                score: 0.0,
                matched: vec![false; fingerprints.len()],
                segments: Vec::new(),
            });
            tally.score += similarity as f64;
            tally.matched[index] = true;
            tally.segments.push(MatchSegment {
                query_offset_seconds: query.start_offset_seconds,
                track_offset_seconds: record.start_offset_seconds,
                similarity,
            });
        }
    }

    let mut matches = Vec::new();
    for (track, tally) in tallies {
        let matched_fingerprints = tally.matched.iter().filter(|&&m| m).count();
        if matched_fingerprints < config.threshold_votes {
            continue;
        }
        let metadata = store.read_track(track).await?;
        matches.push(TrackMatch {
            track,
            metadata,
            score: tally.score,
            matched_fingerprints,
            segments: tally.segments,
        });
    }

    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.matched_fingerprints.cmp(&a.matched_fingerprints))
            .then(a.track.cmp(&b.track))
    });

    Ok(QueryResult {
        matches,
        query_fingerprints: fingerprints.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintConfig;
    use crate::store::{InMemoryModelStore, SubFingerprintEntry};

    fn metadata(id: &str) -> TrackMetadata {
        TrackMetadata {
            id: id.into(),
            artist: "Artist".into(),
            title: id.into(),
            album: None,
            release_year: None,
            length_seconds: 10.0,
        }
    }

    fn bits_with(first_byte: u8) -> Vec<u8> {
        let mut bits = vec![0u8; 1024];
        bits[0] = first_byte;
        bits
    }

    fn query_config(votes: usize) -> QueryConfig {
        QueryConfig {
            threshold_votes: votes,
            ..QueryConfig::default()
        }
    }

    async fn seeded_store() -> (InMemoryModelStore, TrackRef) {
        let store = InMemoryModelStore::new(FingerprintConfig::default().schema_id());
        let track = store.insert_track(metadata("track-a")).await.unwrap();
        store
            .insert_subfingerprints(
                track,
                &[SubFingerprintEntry {
                    start_offset_seconds: 2.0,
                    bits: bits_with(0x0F),
                    hash_keys: vec![77; 25],
                }],
            )
            .await
            .unwrap();
        (store, track)
    }

    fn matching_query(offset: f64) -> Fingerprint {
        Fingerprint {
            bits: bits_with(0x0F),
            hash_keys: vec![77; 25],
            start_offset_seconds: offset,
        }
    }

    #[tokio::test]
    async fn test_empty_query_is_unsuccessful() {
        let (store, _) = seeded_store().await;
        let result = resolve(&store, &[], &QueryConfig::default()).await.unwrap();
        assert!(!result.is_successful());
        assert!(result.best_match().is_none());
    }

    #[tokio::test]
    async fn test_no_table_hits_is_unsuccessful() {
        let (store, _) = seeded_store().await;
        let queries: Vec<Fingerprint> = (0..8)
            .map(|i| Fingerprint {
                bits: bits_with(0xF0),
                hash_keys: vec![12345; 25],
                start_offset_seconds: i as f64,
            })
            .collect();
        let result = resolve(&store, &queries, &QueryConfig::default())
            .await
            .unwrap();
        assert!(!result.is_successful());
    }

    #[tokio::test]
    async fn test_votes_below_threshold_drop_the_track() {
        let (store, _) = seeded_store().await;
        // Four matching query fingerprints, threshold of five.
        let queries: Vec<Fingerprint> = (0..4).map(|i| matching_query(i as f64)).collect();
        let result = resolve(&store, &queries, &query_config(5)).await.unwrap();
        assert!(!result.is_successful());

        let queries: Vec<Fingerprint> = (0..5).map(|i| matching_query(i as f64)).collect();
        let result = resolve(&store, &queries, &query_config(5)).await.unwrap();
        assert!(result.is_successful());
    }

    #[tokio::test]
    async fn test_verified_match_reports_segments_and_score() {
        let (store, track) = seeded_store().await;
        let queries: Vec<Fingerprint> = (0..6).map(|i| matching_query(i as f64 * 0.1)).collect();
        let result = resolve(&store, &queries, &query_config(5)).await.unwrap();

        let best = result.best_match().unwrap();
        assert_eq!(best.track, track);
        assert_eq!(best.matched_fingerprints, 6);
        // Identical bits give similarity 1.0 per hit.
        assert!((best.score - 6.0).abs() < 1e-6);
        assert_eq!(best.segments.len(), 6);
        assert!(best
            .segments
            .iter()
            .all(|s| s.track_offset_seconds == 2.0 && s.similarity == 1.0));
    }

    #[tokio::test]
    async fn test_partial_table_hits_are_filtered() {
        let (store, _) = seeded_store().await;
        // Only four of 25 keys collide, below min_hits_per_fingerprint.
        let mut keys = vec![99999u32; 25];
        for k in keys.iter_mut().take(4) {
            *k = 77;
        }
        let queries: Vec<Fingerprint> = (0..6)
            .map(|i| Fingerprint {
                bits: bits_with(0x0F),
                hash_keys: keys.clone(),
                start_offset_seconds: i as f64,
            })
            .collect();
        let result = resolve(&store, &queries, &query_config(5)).await.unwrap();
        assert!(!result.is_successful());
    }

    #[tokio::test]
    async fn test_dissimilar_bits_fail_verification() {
        let (store, _) = seeded_store().await;
        // Keys collide in every table but the stored bits disagree almost
        // everywhere, far below min_similarity.
        let queries: Vec<Fingerprint> = (0..6)
            .map(|i| Fingerprint {
                bits: vec![0xFF; 1024],
                hash_keys: vec![77; 25],
                start_offset_seconds: i as f64,
            })
            .collect();
        let config = QueryConfig {
            min_similarity: 0.9,
            ..query_config(5)
        };
        let result = resolve(&store, &queries, &config).await.unwrap();
        assert!(!result.is_successful());
    }

    #[tokio::test]
    async fn test_ranking_prefers_higher_score_then_track_ref() {
        let store = InMemoryModelStore::new(FingerprintConfig::default().schema_id());
        let track_a = store.insert_track(metadata("a")).await.unwrap();
        let track_b = store.insert_track(metadata("b")).await.unwrap();

        // Track A owns two sub-fingerprints under the shared key, track B
        // one; every verified hit scores 1.0.
        store
            .insert_subfingerprints(
                track_a,
                &[
                    SubFingerprintEntry {
                        start_offset_seconds: 0.0,
                        bits: bits_with(0x0F),
                        hash_keys: vec![77; 25],
                    },
                    SubFingerprintEntry {
                        start_offset_seconds: 1.0,
                        bits: bits_with(0x0F),
                        hash_keys: vec![77; 25],
                    },
                ],
            )
            .await
            .unwrap();
        store
            .insert_subfingerprints(
                track_b,
                &[SubFingerprintEntry {
                    start_offset_seconds: 0.0,
                    bits: bits_with(0x0F),
                    hash_keys: vec![77; 25],
                }],
            )
            .await
            .unwrap();

        let queries: Vec<Fingerprint> = (0..5).map(|i| matching_query(i as f64)).collect();
        let result = resolve(&store, &queries, &query_config(5)).await.unwrap();

        assert_eq!(result.matches.len(), 2);
        assert_eq!(result.matches[0].track, track_a);
        assert_eq!(result.matches[1].track, track_b);
        assert!(result.matches[0].score > result.matches[1].score);
    }
}
