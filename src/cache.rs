use std::io::{Read, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::models::{ChunkStatus, GuideChannelRecord};

/// Retrieve a chunk if it exists and is fresh. Missing and stale rows both
/// come back as `None`; stale rows stay in place and are overwritten by the
/// next successful fetch. Storage faults degrade to a miss.
pub async fn get_chunk(pool: &SqlitePool, start_time: i64, ttl: Duration) -> Option<Vec<GuideChannelRecord>> {
    match read_chunk(pool, start_time, ttl).await {
        Ok(payload) => payload,
        Err(source) => {
            warn!(error = %CacheError::Read { start: start_time, source }, "degrading to cache miss");
            None
        }
    }
}

async fn read_chunk(pool: &SqlitePool, start_time: i64, ttl: Duration) -> Result<Option<Vec<GuideChannelRecord>>> {
    let row: Option<(Vec<u8>, i64)> = sqlx::query_as("SELECT data, fetched_at FROM epg_chunks WHERE start_time = ?")
        .bind(start_time)
        .fetch_optional(pool)
        .await
        .context("querying chunk")?;

    let Some((blob, fetched_at)) = row else {
        debug!(start = start_time, "cache miss");
        return Ok(None);
    };

    let age = Utc::now().timestamp() - fetched_at;
    if age >= ttl.as_secs() as i64 {
        debug!(start = start_time, age_secs = age, "cache stale");
        return Ok(None);
    }

    let payload = decompress(&blob).context("decompressing chunk")?;
    let records: Vec<GuideChannelRecord> = serde_json::from_slice(&payload).context("deserializing chunk")?;

    debug!(start = start_time, age_secs = age, channels = records.len(), "cache hit");
    Ok(Some(records))
}

/// Upsert a chunk (last write wins). The store is best-effort: faults are
/// logged and swallowed so a broken cache never aborts the broader fetch.
pub async fn save_chunk(pool: &SqlitePool, start_time: i64, end_time: i64, records: &[GuideChannelRecord]) {
    if let Err(source) = write_chunk(pool, start_time, end_time, records).await {
        warn!(error = %CacheError::Write { start: start_time, source }, "dropping chunk write");
    }
}

async fn write_chunk(pool: &SqlitePool, start_time: i64, end_time: i64, records: &[GuideChannelRecord]) -> Result<()> {
    let json = serde_json::to_vec(records).context("serializing chunk")?;
    let compressed = compress(&json).context("compressing chunk")?;
    let fetched_at = Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO epg_chunks (start_time, end_time, data, fetched_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(start_time) DO UPDATE SET
           end_time = excluded.end_time, data = excluded.data, fetched_at = excluded.fetched_at",
    )
    .bind(start_time)
    .bind(end_time)
    .bind(&compressed)
    .bind(fetched_at)
    .execute(pool)
    .await
    .context("upserting chunk")?;

    debug!(start = start_time, end = end_time, bytes = compressed.len(), "cached chunk");
    Ok(())
}

/// Delete all cached chunks and reclaim storage space. Unlike reads and
/// writes, a failed clear is surfaced to the caller.
pub async fn clear(pool: &SqlitePool) -> Result<(), CacheError> {
    let result: Result<()> = async {
        sqlx::query("DELETE FROM epg_chunks")
            .execute(pool)
            .await
            .context("deleting chunks")?;
        // VACUUM cannot run inside a transaction; sqlx issues it standalone.
        sqlx::query("VACUUM").execute(pool).await.context("vacuuming")?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!("cache cleared");
            Ok(())
        }
        Err(source) => Err(CacheError::Clear { source }),
    }
}

/// Status of all cached chunks, ascending by window start.
pub async fn status(pool: &SqlitePool) -> Result<Vec<ChunkStatus>> {
    let chunks = sqlx::query_as::<_, ChunkStatus>(
        "SELECT start_time, end_time, length(data) AS size_bytes, fetched_at
         FROM epg_chunks ORDER BY start_time ASC",
    )
    .fetch_all(pool)
    .await
    .context("querying cache status")?;
    Ok(chunks)
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GuideProgrammeRecord;

    async fn test_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::create_pool(&dir.path().join("test_cache.db")).await.unwrap();
        (pool, dir)
    }

    fn sample_records() -> Vec<GuideChannelRecord> {
        vec![GuideChannelRecord {
            guide_number: "5.1".to_string(),
            image_url: Some("http://img/ch.png".to_string()),
            guide: vec![GuideProgrammeRecord {
                title: "News".to_string(),
                start_time: 1_700_000_000,
                end_time: 1_700_003_600,
                episode_title: None,
                synopsis: Some("Evening news".to_string()),
                categories: vec!["News".to_string()],
                image_url: None,
                episode_number: None,
                original_airdate: None,
                first: None,
            }],
        }]
    }

    #[tokio::test]
    async fn round_trip() {
        let (pool, _dir) = test_pool().await;
        let records = sample_records();

        save_chunk(&pool, 1000, 8200, &records).await;
        let cached = get_chunk(&pool, 1000, Duration::from_secs(u64::MAX / 2)).await.unwrap();

        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].guide_number, "5.1");
        assert_eq!(cached[0].guide.len(), 1);
        assert_eq!(cached[0].guide[0].title, "News");
        assert_eq!(cached[0].guide[0].start_time, 1_700_000_000);
    }

    #[tokio::test]
    async fn miss_on_absent_key() {
        let (pool, _dir) = test_pool().await;
        assert!(get_chunk(&pool, 9999, Duration::from_secs(3600)).await.is_none());
    }

    #[tokio::test]
    async fn stale_chunk_is_ignored_but_kept() {
        let (pool, _dir) = test_pool().await;
        save_chunk(&pool, 5000, 6000, &sample_records()).await;

        // Backdate fetched_at two hours
        let past = Utc::now().timestamp() - 7200;
        sqlx::query("UPDATE epg_chunks SET fetched_at = ? WHERE start_time = ?")
            .bind(past)
            .bind(5000i64)
            .execute(&pool)
            .await
            .unwrap();

        assert!(get_chunk(&pool, 5000, Duration::from_secs(3600)).await.is_none());

        // The stale row still physically exists
        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM epg_chunks WHERE start_time = 5000")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn overwrite_wins() {
        let (pool, _dir) = test_pool().await;
        save_chunk(&pool, 1000, 2000, &sample_records()).await;

        let mut updated = sample_records();
        updated[0].guide[0].title = "Late News".to_string();
        save_chunk(&pool, 1000, 2000, &updated).await;

        let cached = get_chunk(&pool, 1000, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(cached[0].guide[0].title, "Late News");

        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM epg_chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn broken_store_never_raises() {
        let (pool, _dir) = test_pool().await;
        pool.close().await;

        // get degrades to miss, save is a no-op — neither panics or errors out
        assert!(get_chunk(&pool, 1, Duration::from_secs(3600)).await.is_none());
        save_chunk(&pool, 1, 2, &sample_records()).await;
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (pool, _dir) = test_pool().await;
        save_chunk(&pool, 1, 2, &sample_records()).await;
        save_chunk(&pool, 3, 4, &sample_records()).await;

        clear(&pool).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT count(*) FROM epg_chunks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn clear_failure_is_surfaced() {
        let (pool, _dir) = test_pool().await;
        pool.close().await;
        assert!(clear(&pool).await.is_err());
    }

    #[tokio::test]
    async fn status_is_ordered_by_start() {
        let (pool, _dir) = test_pool().await;
        save_chunk(&pool, 300, 400, &sample_records()).await;
        save_chunk(&pool, 100, 200, &sample_records()).await;
        save_chunk(&pool, 200, 300, &sample_records()).await;

        let chunks = status(&pool).await.unwrap();
        let starts: Vec<i64> = chunks.iter().map(|c| c.start_time).collect();
        assert_eq!(starts, vec![100, 200, 300]);
        assert!(chunks.iter().all(|c| c.size_bytes > 0));
    }
}
