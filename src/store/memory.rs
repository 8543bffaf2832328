//! In-memory model store for tests and embedded use

use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{
    ModelStore, SubFingerprintEntry, SubFingerprintRecord, SubFpRef, TrackMetadata, TrackRef,
};
use crate::config::SchemaId;
use crate::error::EngineError;
use async_trait::async_trait;

struct StoredSub {
    record: SubFingerprintRecord,
    hash_keys: Vec<u32>,
}

#[derive(Default)]
struct Inner {
    tracks: HashMap<TrackRef, TrackMetadata>,
    subs: HashMap<SubFpRef, StoredSub>,
    tables: Vec<HashMap<u32, Vec<SubFpRef>>>,
    // (track, offset bits) -> ref, backing idempotent batch retries.
    by_offset: HashMap<(TrackRef, u64), SubFpRef>,
    next_track: i64,
    next_sub: i64,
}

/// Hash-map backed store. All state lives behind one async lock; the
/// hash tables are plain `key -> refs` maps, one per LSH table.
pub struct InMemoryModelStore {
    schema: SchemaId,
    inner: RwLock<Inner>,
}

impl InMemoryModelStore {
    pub fn new(schema: SchemaId) -> Self {
        let tables = (0..schema.hash_tables).map(|_| HashMap::new()).collect();
        Self {
            schema,
            inner: RwLock::new(Inner {
                tables,
                ..Inner::default()
            }),
        }
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    fn schema(&self) -> &SchemaId {
        &self.schema
    }

    async fn insert_track(&self, metadata: TrackMetadata) -> Result<TrackRef, EngineError> {
        let mut inner = self.inner.write().await;
        inner.next_track += 1;
        let track = TrackRef(inner.next_track);
        inner.tracks.insert(track, metadata);
        Ok(track)
    }

    async fn insert_subfingerprints(
        &self,
        track: TrackRef,
        entries: &[SubFingerprintEntry],
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if !inner.tracks.contains_key(&track) {
            return Err(EngineError::Store(format!("unknown track {:?}", track)));
        }
        for entry in entries {
            if entry.hash_keys.len() != self.schema.hash_tables {
                return Err(EngineError::Store(format!(
                    "expected {} hash keys, got {}",
                    self.schema.hash_tables,
                    entry.hash_keys.len()
                )));
            }
            let offset_key = (track, entry.start_offset_seconds.to_bits());
            if inner.by_offset.contains_key(&offset_key) {
                continue;
            }

            inner.next_sub += 1;
            let subfp = SubFpRef(inner.next_sub);
            inner.by_offset.insert(offset_key, subfp);
            for (table, &key) in entry.hash_keys.iter().enumerate() {
                inner.tables[table].entry(key).or_default().push(subfp);
            }
            inner.subs.insert(
                subfp,
                StoredSub {
                    record: SubFingerprintRecord {
                        track,
                        start_offset_seconds: entry.start_offset_seconds,
                        bits: entry.bits.clone(),
                    },
                    hash_keys: entry.hash_keys.clone(),
                },
            );
        }
        Ok(())
    }

    async fn read_subfingerprints_by_hash(
        &self,
        table: usize,
        key: u32,
    ) -> Result<Vec<SubFpRef>, EngineError> {
        let inner = self.inner.read().await;
        let table = inner
            .tables
            .get(table)
            .ok_or_else(|| EngineError::Store(format!("no hash table {}", table)))?;
        Ok(table.get(&key).cloned().unwrap_or_default())
    }

    async fn read_subfingerprint(
        &self,
        subfp: SubFpRef,
    ) -> Result<SubFingerprintRecord, EngineError> {
        let inner = self.inner.read().await;
        inner
            .subs
            .get(&subfp)
            .map(|s| s.record.clone())
            .ok_or_else(|| EngineError::Store(format!("unknown sub-fingerprint {:?}", subfp)))
    }

    async fn read_fingerprint_bits(&self, subfp: SubFpRef) -> Result<Vec<u8>, EngineError> {
        Ok(self.read_subfingerprint(subfp).await?.bits)
    }

    async fn read_track(&self, track: TrackRef) -> Result<TrackMetadata, EngineError> {
        let inner = self.inner.read().await;
        inner
            .tracks
            .get(&track)
            .cloned()
            .ok_or_else(|| EngineError::Store(format!("unknown track {:?}", track)))
    }

    async fn delete_track(&self, track: TrackRef) -> Result<(), EngineError> {
        let mut inner = self.inner.write().await;
        if inner.tracks.remove(&track).is_none() {
            return Err(EngineError::Store(format!("unknown track {:?}", track)));
        }

        let doomed: Vec<SubFpRef> = inner
            .subs
            .iter()
            .filter(|(_, s)| s.record.track == track)
            .map(|(&r, _)| r)
            .collect();
        for subfp in doomed {
            let stored = inner.subs.remove(&subfp).expect("listed above");
            for (table, key) in stored.hash_keys.iter().enumerate() {
                if let Some(refs) = inner.tables[table].get_mut(key) {
                    refs.retain(|&r| r != subfp);
                }
            }
            inner
                .by_offset
                .remove(&(track, stored.record.start_offset_seconds.to_bits()));
        }
        Ok(())
    }

    async fn track_count(&self) -> Result<usize, EngineError> {
        Ok(self.inner.read().await.tracks.len())
    }

    async fn subfingerprint_count(&self) -> Result<usize, EngineError> {
        Ok(self.inner.read().await.subs.len())
    }
}
