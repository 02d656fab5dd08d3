//!
//! src/persistent.rs
//!
//! Defines module for persisting search records to memory.
//! The store owns every TrackRecord; records are replaced whole,
//! never patched field by field, so readers see either the old set
//! or the new one. Also keeps the downloads ledger used to spot
//! tracks that were already fetched under another name.
//!

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use tracing::warn;

use crate::errors::ScoutError;
use crate::types::{Isrc, TrackRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_records: i64,
    pub with_results: i64,
    pub reviewed: i64,
    pub total_files: i64
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub total_downloads: i64,
    pub with_isrc: i64,
    pub without_isrc: i64
}

/// One manual download, recorded so future searches can flag
/// cross-language/cross-edition duplicates of the same recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub isrc: Option<Isrc>,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub peer: Option<String>,
    pub filename: Option<String>,
    pub size: Option<i64>,
    pub bitrate: Option<i64>,
    pub external_id: Option<String>,
    pub downloaded_at: i64
}

pub struct Persistent {
    pool: Pool<Sqlite>
}

impl Persistent {

    async fn ensure_schema(pool: &Pool<Sqlite>) -> Result<(), ScoutError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS records (
              key           TEXT PRIMARY KEY,
              artist        TEXT NOT NULL,
              title         TEXT,
              reviewed      INTEGER NOT NULL DEFAULT 0,
              result_count  INTEGER NOT NULL DEFAULT 0,
              searched_at   INTEGER NOT NULL,
              session_id    TEXT NOT NULL,
              record        TEXT NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS downloads (
              id            INTEGER PRIMARY KEY AUTOINCREMENT,
              isrc          TEXT,
              artist        TEXT NOT NULL,
              title         TEXT NOT NULL,
              album         TEXT,
              peer          TEXT,
              filename      TEXT,
              size          INTEGER,
              bitrate       INTEGER,
              external_id   TEXT,
              downloaded_at INTEGER NOT NULL
            );
            "
        ).execute(pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_session ON records(session_id);"
        ).execute(pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_downloads_isrc ON downloads(isrc);"
        ).execute(pool).await?;

        Ok(())
    }

    pub async fn init(database_url: &str) -> Result<Self, ScoutError> {
        let is_memory = database_url == "sqlite::memory:";

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);

        // WAL is file-only; don't set it for in-memory
        if !is_memory {
            opts = opts.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                       .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        }

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(if is_memory {1} else {8})
            .connect_with(opts)
            .await?;

        Self::ensure_schema(&pool).await?;

        Ok(Self { pool })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Replaces the whole record for its identity key in one statement;
    /// concurrent readers see the old row or the new one, never a mix.
    pub async fn replace_record(&self, record: &TrackRecord) -> Result<(), ScoutError> {
        let key = record.identity.queue_key();
        let payload = serde_json::to_string(record)?;
        sqlx::query(
            r"
            INSERT INTO records (
                key, artist, title, reviewed, result_count,
                searched_at, session_id, record
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(key) DO UPDATE SET
                artist       = excluded.artist,
                title        = excluded.title,
                reviewed     = excluded.reviewed,
                result_count = excluded.result_count,
                searched_at  = excluded.searched_at,
                session_id   = excluded.session_id,
                record       = excluded.record;
            "
        )
        .bind(&key)
        .bind(&record.identity.artist)
        .bind(record.identity.title.as_ref())
        .bind(i64::from(record.reviewed))
        .bind(record.results.len() as i64)
        .bind(record.searched_at)
        .bind(&record.session_id)
        .bind(&payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_record(&self, key: &str) -> Result<Option<TrackRecord>, ScoutError> {
        let row = sqlx::query("SELECT record FROM records WHERE key = ?1;")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let record: TrackRecord =
                    serde_json::from_str(&row.get::<String, _>("record"))?;
                Ok(Some(record))
            }
            None => Ok(None)
        }
    }

    pub async fn contains(&self, key: &str) -> Result<bool, ScoutError> {
        let row = sqlx::query("SELECT 1 FROM records WHERE key = ?1 LIMIT 1;")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn all_records(&self) -> Result<Vec<TrackRecord>, ScoutError> {
        let rows = sqlx::query("SELECT key, record FROM records;")
            .fetch_all(&self.pool)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<TrackRecord>(&row.get::<String, _>("record")) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(key = %row.get::<String, _>("key"), error = %e,
                        "store.record.corrupt");
                }
            }
        }
        Ok(records)
    }

    pub async fn mark_reviewed(&self, key: &str) -> Result<bool, ScoutError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT record FROM records WHERE key = ?1;")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let mut record: TrackRecord =
            serde_json::from_str(&row.get::<String, _>("record"))?;
        record.reviewed = true;

        sqlx::query("UPDATE records SET reviewed = 1, record = ?1 WHERE key = ?2;")
            .bind(serde_json::to_string(&record)?)
            .bind(key)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn delete_record(&self, key: &str) -> Result<bool, ScoutError> {
        let deleted = sqlx::query("DELETE FROM records WHERE key = ?1;")
            .bind(key)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn stats(&self) -> Result<StoreStats, ScoutError> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*)                          AS total,
                   COALESCE(SUM(result_count > 0), 0) AS with_results,
                   COALESCE(SUM(reviewed), 0)         AS reviewed,
                   COALESCE(SUM(result_count), 0)     AS files
              FROM records;
            "
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total_records: row.get("total"),
            with_results: row.get("with_results"),
            reviewed: row.get("reviewed"),
            total_files: row.get("files")
        })
    }

    pub async fn record_download(&self, download: &DownloadRecord) -> Result<(), ScoutError> {
        sqlx::query(
            r"
            INSERT INTO downloads (
                isrc, artist, title, album, peer, filename,
                size, bitrate, external_id, downloaded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);
            "
        )
        .bind(download.isrc.as_ref().map(Isrc::canonical))
        .bind(&download.artist)
        .bind(&download.title)
        .bind(download.album.as_ref())
        .bind(download.peer.as_ref())
        .bind(download.filename.as_ref())
        .bind(download.size)
        .bind(download.bitrate)
        .bind(download.external_id.as_ref())
        .bind(if download.downloaded_at != 0 { download.downloaded_at } else { Self::now() })
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_download(&self, isrc: &Isrc) ->
        Result<Option<DownloadRecord>, ScoutError> {
        let row = sqlx::query(
            r"
            SELECT isrc, artist, title, album, peer, filename,
                   size, bitrate, external_id, downloaded_at
              FROM downloads WHERE isrc = ?1 LIMIT 1;
            "
        )
        .bind(isrc.canonical())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DownloadRecord {
            isrc: r.try_get::<String, _>("isrc").ok().map(Isrc),
            artist: r.get("artist"),
            title: r.get("title"),
            album: r.try_get("album").ok(),
            peer: r.try_get("peer").ok(),
            filename: r.try_get("filename").ok(),
            size: r.try_get("size").ok(),
            bitrate: r.try_get("bitrate").ok(),
            external_id: r.try_get("external_id").ok(),
            downloaded_at: r.get("downloaded_at")
        }))
    }

    pub async fn is_downloaded(&self, isrc: &Isrc) -> Result<bool, ScoutError> {
        Ok(self.find_download(isrc).await?.is_some())
    }

    pub async fn download_stats(&self) -> Result<DownloadStats, ScoutError> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*)                              AS total,
                   COALESCE(SUM(isrc IS NOT NULL), 0)    AS with_isrc
              FROM downloads;
            "
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let with_isrc: i64 = row.get("with_isrc");
        Ok(DownloadStats {
            total_downloads: total,
            with_isrc,
            without_isrc: total - with_isrc
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateFile, ScoredResult, TrackIdentity, TrackRecord};

    fn result(peer: &str, filename: &str, score: f64) -> ScoredResult {
        ScoredResult {
            file: CandidateFile {
                peer: peer.to_string(),
                filename: filename.to_string(),
                size: 30_000_000,
                bitrate: 0,
                extension: "flac".to_string(),
                queue_depth: 0,
                has_free_slot: true,
                speed_bytes: 2_500_000,
                locked: false
            },
            score,
            instant: true
        }
    }

    fn record(session: &str, results: Vec<ScoredResult>) -> TrackRecord {
        TrackRecord::new(
            TrackIdentity::new("Ado", Some("Usseewa")),
            None,
            results,
            5,
            session
        )
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_record() -> Result<(), ScoutError> {
        let store = Persistent::init("sqlite::memory:").await?;
        let key = TrackIdentity::new("Ado", Some("Usseewa")).queue_key();

        let first = record("session-a", vec![
            result("peer-a", "a.flac", 225.0),
            result("peer-b", "b.flac", 180.0)
        ]);
        store.replace_record(&first).await?;

        let second = record("session-b", vec![result("peer-c", "c.flac", 210.0)]);
        store.replace_record(&second).await?;

        let read_back = store.get_record(&key).await?.expect("record should exist");
        assert_eq!(read_back.session_id, "session-b");
        assert_eq!(read_back.results.len(), 1);
        assert_eq!(read_back.results[0].file.peer, "peer-c");
        Ok(())
    }

    #[tokio::test]
    async fn contains_and_delete() -> Result<(), ScoutError> {
        let store = Persistent::init("sqlite::memory:").await?;
        let key = TrackIdentity::new("Ado", Some("Usseewa")).queue_key();

        assert!(!store.contains(&key).await?);
        store.replace_record(&record("s", vec![])).await?;
        assert!(store.contains(&key).await?);

        assert!(store.delete_record(&key).await?);
        assert!(!store.contains(&key).await?);
        assert!(!store.delete_record(&key).await?);
        Ok(())
    }

    #[tokio::test]
    async fn mark_reviewed_updates_row_and_payload() -> Result<(), ScoutError> {
        let store = Persistent::init("sqlite::memory:").await?;
        let key = TrackIdentity::new("Ado", Some("Usseewa")).queue_key();
        store.replace_record(&record("s", vec![result("p", "f.flac", 225.0)])).await?;

        assert!(store.mark_reviewed(&key).await?);
        assert!(store.get_record(&key).await?.unwrap().reviewed);
        assert_eq!(store.stats().await?.reviewed, 1);

        assert!(!store.mark_reviewed("missing-key").await?);
        Ok(())
    }

    #[tokio::test]
    async fn stats_count_records_and_files() -> Result<(), ScoutError> {
        let store = Persistent::init("sqlite::memory:").await?;
        store.replace_record(&record("s", vec![
            result("peer-a", "a.flac", 225.0),
            result("peer-b", "b.flac", 180.0)
        ])).await?;

        let empty = TrackRecord::new(
            TrackIdentity::new("Chon", Some("Story")), None, vec![], 5, "s"
        );
        store.replace_record(&empty).await?;

        let stats = store.stats().await?;
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.with_results, 1);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.reviewed, 0);
        Ok(())
    }

    #[tokio::test]
    async fn downloads_ledger_round_trip() -> Result<(), ScoutError> {
        let store = Persistent::init("sqlite::memory:").await?;
        let isrc = Isrc("jpu902002524".to_string());

        assert!(!store.is_downloaded(&isrc).await?);

        store.record_download(&DownloadRecord {
            isrc: Some(isrc.clone()),
            artist: "Ado".to_string(),
            title: "Usseewa".to_string(),
            album: None,
            peer: Some("peer-a".to_string()),
            filename: Some("a.flac".to_string()),
            size: Some(38_000_000),
            bitrate: Some(0),
            external_id: None,
            downloaded_at: 0
        }).await?;

        // lookup is case-insensitive through the canonical form
        assert!(store.is_downloaded(&Isrc("JPU902002524".to_string())).await?);
        let found = store.find_download(&isrc).await?.unwrap();
        assert_eq!(found.artist, "Ado");
        assert!(found.downloaded_at > 0);

        store.record_download(&DownloadRecord {
            isrc: None,
            artist: "Chon".to_string(),
            title: "Story".to_string(),
            album: None,
            peer: None,
            filename: None,
            size: None,
            bitrate: None,
            external_id: None,
            downloaded_at: 0
        }).await?;

        let stats = store.download_stats().await?;
        assert_eq!(stats.total_downloads, 2);
        assert_eq!(stats.with_isrc, 1);
        assert_eq!(stats.without_isrc, 1);
        Ok(())
    }

    #[tokio::test]
    async fn file_backed_store_persists_across_reopen() -> Result<(), ScoutError> {
        let dir = tempfile::tempdir()?;
        let db_url = format!("sqlite:{}/scout.db", dir.path().display());
        let key = TrackIdentity::new("Ado", Some("Usseewa")).queue_key();

        {
            let store = Persistent::init(&db_url).await?;
            store.replace_record(&record("s", vec![result("p", "f.flac", 225.0)])).await?;
        }

        let reopened = Persistent::init(&db_url).await?;
        assert!(reopened.contains(&key).await?);
        Ok(())
    }
}
