//! SQLite-backed model store

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

use super::{
    ModelStore, SubFingerprintEntry, SubFingerprintRecord, SubFpRef, TrackMetadata, TrackRef,
};
use crate::config::SchemaId;
use crate::error::EngineError;
use async_trait::async_trait;

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS engine_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tracks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        external_id TEXT NOT NULL,
        artist TEXT NOT NULL,
        title TEXT NOT NULL,
        album TEXT,
        release_year INTEGER,
        length_seconds REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS subfingerprints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        track_id INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
        start_offset REAL NOT NULL,
        bits BLOB NOT NULL,
        UNIQUE (track_id, start_offset)
    )",
    "CREATE TABLE IF NOT EXISTS hash_entries (
        table_index INTEGER NOT NULL,
        hash_key INTEGER NOT NULL,
        subfingerprint_id INTEGER NOT NULL REFERENCES subfingerprints(id) ON DELETE CASCADE,
        PRIMARY KEY (table_index, hash_key, subfingerprint_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_hash_entries_lookup
        ON hash_entries (table_index, hash_key)",
];

/// Durable store over a single SQLite file. The schema id is persisted in
/// `engine_meta`; opening a corpus written under a different schema fails
/// before any data is touched.
pub struct SqliteModelStore {
    pool: SqlitePool,
    schema: SchemaId,
}

impl SqliteModelStore {
    pub async fn open(path: impl AsRef<Path>, schema: SchemaId) -> Result<Self, EngineError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        for statement in DDL {
            sqlx::query(statement).execute(&pool).await?;
        }

        let runtime = schema.to_string();
        let stored: Option<String> =
            sqlx::query("SELECT value FROM engine_meta WHERE key = 'schema_id'")
                .fetch_optional(&pool)
                .await?
                .map(|row| row.get("value"));
        match stored {
            Some(stored) if stored != runtime => {
                return Err(EngineError::SchemaMismatch { stored, runtime });
            }
            Some(_) => {}
            None => {
                sqlx::query("INSERT INTO engine_meta (key, value) VALUES ('schema_id', ?)")
                    .bind(&runtime)
                    .execute(&pool)
                    .await?;
            }
        }

        Ok(Self { pool, schema })
    }
}

#[async_trait]
impl ModelStore for SqliteModelStore {
    fn schema(&self) -> &SchemaId {
        &self.schema
    }

    async fn insert_track(&self, metadata: TrackMetadata) -> Result<TrackRef, EngineError> {
        let result = sqlx::query(
            "INSERT INTO tracks (external_id, artist, title, album, release_year, length_seconds)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&metadata.id)
        .bind(&metadata.artist)
        .bind(&metadata.title)
        .bind(&metadata.album)
        .bind(metadata.release_year)
        .bind(metadata.length_seconds)
        .execute(&self.pool)
        .await?;
        Ok(TrackRef(result.last_insert_rowid()))
    }

    async fn insert_subfingerprints(
        &self,
        track: TrackRef,
        entries: &[SubFingerprintEntry],
    ) -> Result<(), EngineError> {
        if entries
            .iter()
            .any(|e| e.hash_keys.len() != self.schema.hash_tables)
        {
            return Err(EngineError::Store(format!(
                "every entry must carry {} hash keys",
                self.schema.hash_tables
            )));
        }

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO subfingerprints (track_id, start_offset, bits)
                 VALUES (?, ?, ?)",
            )
            .bind(track.0)
            .bind(entry.start_offset_seconds)
            .bind(&entry.bits)
            .execute(&mut *tx)
            .await?;

            // Retried batches leave the original row in place.
            if inserted.rows_affected() == 0 {
                continue;
            }
            let subfp = inserted.last_insert_rowid();

            for (table, &key) in entry.hash_keys.iter().enumerate() {
                sqlx::query(
                    "INSERT OR IGNORE INTO hash_entries (table_index, hash_key, subfingerprint_id)
                     VALUES (?, ?, ?)",
                )
                .bind(table as i64)
                .bind(key as i64)
                .bind(subfp)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn read_subfingerprints_by_hash(
        &self,
        table: usize,
        key: u32,
    ) -> Result<Vec<SubFpRef>, EngineError> {
        let rows = sqlx::query(
            "SELECT subfingerprint_id FROM hash_entries
             WHERE table_index = ? AND hash_key = ?
             ORDER BY subfingerprint_id",
        )
        .bind(table as i64)
        .bind(key as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| SubFpRef(row.get("subfingerprint_id")))
            .collect())
    }

    async fn read_subfingerprint(
        &self,
        subfp: SubFpRef,
    ) -> Result<SubFingerprintRecord, EngineError> {
        let row = sqlx::query(
            "SELECT track_id, start_offset, bits FROM subfingerprints WHERE id = ?",
        )
        .bind(subfp.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::Store(format!("unknown sub-fingerprint {:?}", subfp)))?;
        Ok(SubFingerprintRecord {
            track: TrackRef(row.get("track_id")),
            start_offset_seconds: row.get("start_offset"),
            bits: row.get("bits"),
        })
    }

    async fn read_fingerprint_bits(&self, subfp: SubFpRef) -> Result<Vec<u8>, EngineError> {
        Ok(self.read_subfingerprint(subfp).await?.bits)
    }

    async fn read_track(&self, track: TrackRef) -> Result<TrackMetadata, EngineError> {
        let row = sqlx::query(
            "SELECT external_id, artist, title, album, release_year, length_seconds
             FROM tracks WHERE id = ?",
        )
        .bind(track.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::Store(format!("unknown track {:?}", track)))?;
        Ok(TrackMetadata {
            id: row.get("external_id"),
            artist: row.get("artist"),
            title: row.get("title"),
            album: row.get("album"),
            release_year: row.get("release_year"),
            length_seconds: row.get("length_seconds"),
        })
    }

    async fn delete_track(&self, track: TrackRef) -> Result<(), EngineError> {
        let result = sqlx::query("DELETE FROM tracks WHERE id = ?")
            .bind(track.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::Store(format!("unknown track {:?}", track)));
        }
        Ok(())
    }

    async fn track_count(&self) -> Result<usize, EngineError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    async fn subfingerprint_count(&self) -> Result<usize, EngineError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM subfingerprints")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintConfig;

    fn metadata() -> TrackMetadata {
        TrackMetadata {
            id: "GBUM71029604".into(),
            artist: "Artist".into(),
            title: "Title".into(),
            album: Some("Album".into()),
            release_year: Some(2010),
            length_seconds: 212.0,
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        let schema = FingerprintConfig::default().schema_id();

        let store = SqliteModelStore::open(&path, schema.clone()).await.unwrap();
        let track = store.insert_track(metadata()).await.unwrap();
        let entry = SubFingerprintEntry {
            start_offset_seconds: 1.5,
            bits: vec![0x5A; 1024],
            hash_keys: (0..25).collect(),
        };
        store
            .insert_subfingerprints(track, &[entry.clone()])
            .await
            .unwrap();
        drop(store);

        let store = SqliteModelStore::open(&path, schema).await.unwrap();
        assert_eq!(store.track_count().await.unwrap(), 1);
        assert_eq!(store.read_track(track).await.unwrap(), metadata());

        let hits = store.read_subfingerprints_by_hash(3, 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        let record = store.read_subfingerprint(hits[0]).await.unwrap();
        assert_eq!(record.track, track);
        assert_eq!(record.start_offset_seconds, 1.5);
        assert_eq!(record.bits, vec![0x5A; 1024]);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_fatal_at_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");

        let schema = FingerprintConfig::default().schema_id();
        SqliteModelStore::open(&path, schema).await.unwrap();

        let reseeded = FingerprintConfig {
            permutation_seed: 7,
            ..FingerprintConfig::default()
        }
        .schema_id();
        let result = SqliteModelStore::open(&path, reseeded).await;
        assert!(matches!(result, Err(EngineError::SchemaMismatch { .. })));
    }

    #[tokio::test]
    async fn test_retried_batch_inserts_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        let store = SqliteModelStore::open(&path, FingerprintConfig::default().schema_id())
            .await
            .unwrap();

        let track = store.insert_track(metadata()).await.unwrap();
        let entries = vec![SubFingerprintEntry {
            start_offset_seconds: 0.0,
            bits: vec![1; 1024],
            hash_keys: vec![9; 25],
        }];
        store.insert_subfingerprints(track, &entries).await.unwrap();
        store.insert_subfingerprints(track, &entries).await.unwrap();

        assert_eq!(store.subfingerprint_count().await.unwrap(), 1);
        assert_eq!(
            store.read_subfingerprints_by_hash(0, 9).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_delete_cascades_to_hash_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.db");
        let store = SqliteModelStore::open(&path, FingerprintConfig::default().schema_id())
            .await
            .unwrap();

        let track = store.insert_track(metadata()).await.unwrap();
        store
            .insert_subfingerprints(
                track,
                &[SubFingerprintEntry {
                    start_offset_seconds: 0.0,
                    bits: vec![1; 1024],
                    hash_keys: vec![4; 25],
                }],
            )
            .await
            .unwrap();

        store.delete_track(track).await.unwrap();
        assert_eq!(store.track_count().await.unwrap(), 0);
        assert_eq!(store.subfingerprint_count().await.unwrap(), 0);
        assert!(store
            .read_subfingerprints_by_hash(0, 4)
            .await
            .unwrap()
            .is_empty());
    }
}
