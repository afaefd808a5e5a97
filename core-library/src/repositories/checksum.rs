//! Checksum history repository
//!
//! Two tables back the verification trail: `checksum_history` gets one row
//! per verification, and `most_recent_checksum` holds the latest state of
//! each bitstream so dispatch queries stay cheap.

use crate::error::{LibraryError, Result};
use crate::models::{
    from_millis, to_millis, BitstreamId, ChecksumHistoryEntry, ChecksumResultCode, MostRecentChecksum,
};
use crate::repositories::bitstream::parse_bitstream_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// Checksum history repository interface
#[async_trait]
pub trait ChecksumHistoryRepository: Send + Sync {
    /// Create most-recent rows for bitstreams that have none and flag deleted
    /// bitstreams as no longer to be processed.
    ///
    /// New rows carry the Unix epoch as their last check time so they are
    /// dispatched before anything already checked.
    ///
    /// # Returns
    /// Number of rows inserted or flagged
    async fn register_missing_bitstreams(&self) -> Result<u64>;

    async fn find_most_recent(&self, bitstream_id: &BitstreamId) -> Result<Option<MostRecentChecksum>>;

    /// The bitstream checked longest ago among those still to be processed.
    ///
    /// # Arguments
    /// * `started_before` - Only consider bitstreams last checked before this instant
    /// * `excluded` - Result codes whose bitstreams are skipped
    async fn find_oldest_eligible(
        &self,
        started_before: Option<DateTime<Utc>>,
        excluded: &[ChecksumResultCode],
    ) -> Result<Option<BitstreamId>>;

    /// Append a history entry and replace the bitstream's most-recent row,
    /// atomically.
    async fn record(&self, entry: &ChecksumHistoryEntry, most_recent: &MostRecentChecksum) -> Result<i64>;

    /// History of one bitstream, oldest first
    async fn history_for(&self, bitstream_id: &BitstreamId) -> Result<Vec<ChecksumHistoryEntry>>;

    /// Most-recent rows whose result is one of `codes`
    async fn find_by_result_codes(&self, codes: &[ChecksumResultCode]) -> Result<Vec<MostRecentChecksum>>;

    /// History entries that finished within `[from, to)`
    async fn find_history_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ChecksumHistoryEntry>>;

    /// Delete history entries with `code` that finished before `older_than`
    async fn prune(&self, code: ChecksumResultCode, older_than: DateTime<Utc>) -> Result<u64>;

    /// Delete history entries with any code not in `codes` that finished
    /// before `older_than`
    async fn prune_excluding(&self, codes: &[ChecksumResultCode], older_than: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// Row mapping
// =============================================================================

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    bitstream_id: String,
    process_start: i64,
    process_end: i64,
    expected_checksum: Option<String>,
    calculated_checksum: Option<String>,
    result: String,
}

impl TryFrom<HistoryRow> for ChecksumHistoryEntry {
    type Error = LibraryError;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(ChecksumHistoryEntry {
            id: Some(row.id),
            bitstream_id: parse_bitstream_id(&row.bitstream_id)?,
            expected_checksum: row.expected_checksum,
            calculated_checksum: row.calculated_checksum,
            result: ChecksumResultCode::from_str(&row.result)?,
            process_start: from_millis(row.process_start),
            process_end: from_millis(row.process_end),
        })
    }
}

#[derive(sqlx::FromRow)]
struct MostRecentRow {
    bitstream_id: String,
    to_be_processed: bool,
    expected_checksum: Option<String>,
    current_checksum: Option<String>,
    checksum_algorithm: Option<String>,
    last_process_start: i64,
    last_process_end: i64,
    matched_prev_checksum: bool,
    result: Option<String>,
}

impl TryFrom<MostRecentRow> for MostRecentChecksum {
    type Error = LibraryError;

    fn try_from(row: MostRecentRow) -> Result<Self> {
        Ok(MostRecentChecksum {
            bitstream_id: parse_bitstream_id(&row.bitstream_id)?,
            to_be_processed: row.to_be_processed,
            expected_checksum: row.expected_checksum,
            current_checksum: row.current_checksum,
            checksum_algorithm: row.checksum_algorithm,
            last_process_start: from_millis(row.last_process_start),
            last_process_end: from_millis(row.last_process_end),
            matched_prev_checksum: row.matched_prev_checksum,
            result: row.result.as_deref().map(ChecksumResultCode::from_str).transpose()?,
        })
    }
}

const HISTORY_COLUMNS: &str =
    "id, bitstream_id, process_start, process_end, expected_checksum, calculated_checksum, result";

const MOST_RECENT_COLUMNS: &str = "bitstream_id, to_be_processed, expected_checksum, current_checksum, \
     checksum_algorithm, last_process_start, last_process_end, matched_prev_checksum, result";

fn push_codes(builder: &mut QueryBuilder<'_, Sqlite>, codes: &[ChecksumResultCode]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for code in codes {
        separated.push_bind(code.as_str());
    }
    separated.push_unseparated(")");
}

// =============================================================================
// SQLite implementation
// =============================================================================

/// SQLite implementation of ChecksumHistoryRepository
pub struct SqliteChecksumHistoryRepository {
    pool: SqlitePool,
}

impl SqliteChecksumHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChecksumHistoryRepository for SqliteChecksumHistoryRepository {
    #[instrument(skip(self))]
    async fn register_missing_bitstreams(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO most_recent_checksum (
                bitstream_id, to_be_processed, expected_checksum, current_checksum,
                checksum_algorithm, last_process_start, last_process_end,
                matched_prev_checksum, result
            )
            SELECT b.id, NOT b.deleted, b.checksum, b.checksum, b.checksum_algorithm,
                   0, 0, 1, ?
            FROM bitstreams b
            WHERE NOT EXISTS (
                SELECT 1 FROM most_recent_checksum m WHERE m.bitstream_id = b.id
            )
            "#,
        )
        .bind(ChecksumResultCode::BitstreamNotProcessed.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let flagged = sqlx::query(
            r#"
            UPDATE most_recent_checksum
            SET to_be_processed = 0, result = ?
            WHERE to_be_processed = 1
              AND bitstream_id IN (SELECT id FROM bitstreams WHERE deleted = 1)
            "#,
        )
        .bind(ChecksumResultCode::BitstreamMarkedDeleted.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if inserted + flagged > 0 {
            info!(inserted, flagged, "Registered bitstreams for checking");
        }
        Ok(inserted + flagged)
    }

    async fn find_most_recent(&self, bitstream_id: &BitstreamId) -> Result<Option<MostRecentChecksum>> {
        let sql = format!(
            "SELECT {} FROM most_recent_checksum WHERE bitstream_id = ?",
            MOST_RECENT_COLUMNS
        );
        let row: Option<MostRecentRow> = sqlx::query_as(&sql)
            .bind(bitstream_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(MostRecentChecksum::try_from).transpose()
    }

    async fn find_oldest_eligible(
        &self,
        started_before: Option<DateTime<Utc>>,
        excluded: &[ChecksumResultCode],
    ) -> Result<Option<BitstreamId>> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT bitstream_id FROM most_recent_checksum WHERE to_be_processed = 1");

        if let Some(before) = started_before {
            builder.push(" AND last_process_start < ");
            builder.push_bind(to_millis(before));
        }
        if !excluded.is_empty() {
            builder.push(" AND (result IS NULL OR result NOT IN ");
            push_codes(&mut builder, excluded);
            builder.push(")");
        }
        builder.push(" ORDER BY last_process_start ASC, bitstream_id ASC LIMIT 1");

        let row: Option<(String,)> = builder.build_query_as().fetch_optional(&self.pool).await?;
        row.map(|(id,)| parse_bitstream_id(&id)).transpose()
    }

    #[instrument(skip(self, entry, most_recent), fields(bitstream_id = %entry.bitstream_id, result = %entry.result))]
    async fn record(&self, entry: &ChecksumHistoryEntry, most_recent: &MostRecentChecksum) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO checksum_history (
                bitstream_id, process_start, process_end,
                expected_checksum, calculated_checksum, result
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.bitstream_id.to_string())
        .bind(to_millis(entry.process_start))
        .bind(to_millis(entry.process_end))
        .bind(&entry.expected_checksum)
        .bind(&entry.calculated_checksum)
        .bind(entry.result.as_str())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO most_recent_checksum (
                bitstream_id, to_be_processed, expected_checksum, current_checksum,
                checksum_algorithm, last_process_start, last_process_end,
                matched_prev_checksum, result
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bitstream_id) DO UPDATE SET
                to_be_processed = excluded.to_be_processed,
                expected_checksum = excluded.expected_checksum,
                current_checksum = excluded.current_checksum,
                checksum_algorithm = excluded.checksum_algorithm,
                last_process_start = excluded.last_process_start,
                last_process_end = excluded.last_process_end,
                matched_prev_checksum = excluded.matched_prev_checksum,
                result = excluded.result
            "#,
        )
        .bind(most_recent.bitstream_id.to_string())
        .bind(most_recent.to_be_processed)
        .bind(&most_recent.expected_checksum)
        .bind(&most_recent.current_checksum)
        .bind(&most_recent.checksum_algorithm)
        .bind(to_millis(most_recent.last_process_start))
        .bind(to_millis(most_recent.last_process_end))
        .bind(most_recent.matched_prev_checksum)
        .bind(most_recent.result.map(|code| code.as_str()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(history_id = id, "Recorded checksum result");
        Ok(id)
    }

    async fn history_for(&self, bitstream_id: &BitstreamId) -> Result<Vec<ChecksumHistoryEntry>> {
        let sql = format!(
            "SELECT {} FROM checksum_history WHERE bitstream_id = ? ORDER BY process_start, id",
            HISTORY_COLUMNS
        );
        let rows: Vec<HistoryRow> = sqlx::query_as(&sql)
            .bind(bitstream_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ChecksumHistoryEntry::try_from).collect()
    }

    async fn find_by_result_codes(&self, codes: &[ChecksumResultCode]) -> Result<Vec<MostRecentChecksum>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM most_recent_checksum WHERE result IN ",
            MOST_RECENT_COLUMNS
        ));
        push_codes(&mut builder, codes);
        builder.push(" ORDER BY last_process_end, bitstream_id");

        let rows: Vec<MostRecentRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(MostRecentChecksum::try_from).collect()
    }

    async fn find_history_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ChecksumHistoryEntry>> {
        let sql = format!(
            "SELECT {} FROM checksum_history WHERE process_end >= ? AND process_end < ? ORDER BY process_end, id",
            HISTORY_COLUMNS
        );
        let rows: Vec<HistoryRow> = sqlx::query_as(&sql)
            .bind(to_millis(from))
            .bind(to_millis(to))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ChecksumHistoryEntry::try_from).collect()
    }

    async fn prune(&self, code: ChecksumResultCode, older_than: DateTime<Utc>) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM checksum_history WHERE result = ? AND process_end < ?")
            .bind(code.as_str())
            .bind(to_millis(older_than))
            .execute(&self.pool)
            .await?
            .rows_affected();

        debug!(code = %code, deleted, "Pruned checksum history");
        Ok(deleted)
    }

    async fn prune_excluding(&self, codes: &[ChecksumResultCode], older_than: DateTime<Utc>) -> Result<u64> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("DELETE FROM checksum_history WHERE process_end < ");
        builder.push_bind(to_millis(older_than));
        if !codes.is_empty() {
            builder.push(" AND result NOT IN ");
            push_codes(&mut builder, codes);
        }

        let deleted = builder.build().execute(&self.pool).await?.rows_affected();
        debug!(deleted, "Pruned checksum history for remaining result codes");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::Bitstream;
    use crate::repositories::{BitstreamRepository, SqliteBitstreamRepository};
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn result_for(
        bitstream: &Bitstream,
        result: ChecksumResultCode,
        start: DateTime<Utc>,
    ) -> (ChecksumHistoryEntry, MostRecentChecksum) {
        let end = start + Duration::seconds(1);
        let entry = ChecksumHistoryEntry {
            id: None,
            bitstream_id: bitstream.id,
            expected_checksum: bitstream.checksum.clone(),
            calculated_checksum: bitstream.checksum.clone(),
            result,
            process_start: start,
            process_end: end,
        };
        let most_recent = MostRecentChecksum {
            bitstream_id: bitstream.id,
            to_be_processed: true,
            expected_checksum: bitstream.checksum.clone(),
            current_checksum: bitstream.checksum.clone(),
            checksum_algorithm: bitstream.checksum_algorithm.clone(),
            last_process_start: start,
            last_process_end: end,
            matched_prev_checksum: result.is_match(),
            result: Some(result),
        };
        (entry, most_recent)
    }

    async fn setup(count: usize) -> (SqliteChecksumHistoryRepository, Vec<Bitstream>) {
        let pool = create_test_pool().await.unwrap();
        let bitstreams = SqliteBitstreamRepository::new(pool.clone());
        let mut created = Vec::new();
        for n in 0..count {
            let bitstream = Bitstream::new(format!("internal{:04}", n))
                .with_checksum("MD5", format!("{:032x}", n));
            bitstreams.insert(&bitstream).await.unwrap();
            created.push(bitstream);
        }
        (SqliteChecksumHistoryRepository::new(pool), created)
    }

    #[tokio::test]
    async fn test_register_missing_bitstreams() {
        let (repo, created) = setup(2).await;

        assert_eq!(repo.register_missing_bitstreams().await.unwrap(), 2);
        assert_eq!(repo.register_missing_bitstreams().await.unwrap(), 0);

        let row = repo.find_most_recent(&created[0].id).await.unwrap().unwrap();
        assert!(row.to_be_processed);
        assert_eq!(row.last_process_start, at(0));
        assert_eq!(row.result, Some(ChecksumResultCode::BitstreamNotProcessed));
        assert_eq!(row.expected_checksum, created[0].checksum);
    }

    #[tokio::test]
    async fn test_register_flags_deleted_bitstreams() {
        let pool = create_test_pool().await.unwrap();
        let bitstreams = SqliteBitstreamRepository::new(pool.clone());
        let repo = SqliteChecksumHistoryRepository::new(pool);

        let live = Bitstream::new("live0001");
        bitstreams.insert(&live).await.unwrap();
        repo.register_missing_bitstreams().await.unwrap();

        bitstreams.mark_deleted(&live.id).await.unwrap();
        assert_eq!(repo.register_missing_bitstreams().await.unwrap(), 1);

        let row = repo.find_most_recent(&live.id).await.unwrap().unwrap();
        assert!(!row.to_be_processed);
        assert_eq!(row.result, Some(ChecksumResultCode::BitstreamMarkedDeleted));
        assert_eq!(repo.find_oldest_eligible(None, &[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oldest_eligible_ordering_and_exclusion() {
        let (repo, created) = setup(3).await;
        repo.register_missing_bitstreams().await.unwrap();

        let (entry, recent) = result_for(&created[0], ChecksumResultCode::ChecksumMatch, at(2_000));
        repo.record(&entry, &recent).await.unwrap();
        let (entry, recent) = result_for(&created[1], ChecksumResultCode::BitstreamNotFound, at(1_000));
        repo.record(&entry, &recent).await.unwrap();
        let (entry, recent) = result_for(&created[2], ChecksumResultCode::ChecksumMatch, at(3_000));
        repo.record(&entry, &recent).await.unwrap();

        assert_eq!(repo.find_oldest_eligible(None, &[]).await.unwrap(), Some(created[1].id));
        assert_eq!(
            repo.find_oldest_eligible(None, &[ChecksumResultCode::BitstreamNotFound])
                .await
                .unwrap(),
            Some(created[0].id)
        );
        assert_eq!(
            repo.find_oldest_eligible(Some(at(1_500)), &[ChecksumResultCode::BitstreamNotFound])
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_record_appends_history_and_replaces_most_recent() {
        let (repo, created) = setup(1).await;
        let bitstream = &created[0];

        let (entry, recent) = result_for(bitstream, ChecksumResultCode::ChecksumMatch, at(100));
        repo.record(&entry, &recent).await.unwrap();
        let (entry, recent) = result_for(bitstream, ChecksumResultCode::ChecksumNoMatch, at(200));
        repo.record(&entry, &recent).await.unwrap();

        let history = repo.history_for(&bitstream.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result, ChecksumResultCode::ChecksumMatch);
        assert_eq!(history[1].result, ChecksumResultCode::ChecksumNoMatch);

        let latest = repo.find_most_recent(&bitstream.id).await.unwrap().unwrap();
        assert_eq!(latest.result, Some(ChecksumResultCode::ChecksumNoMatch));
        assert_eq!(latest.last_process_start, at(200));

        let mismatched = repo
            .find_by_result_codes(&[ChecksumResultCode::ChecksumNoMatch])
            .await
            .unwrap();
        assert_eq!(mismatched.len(), 1);

        let window = repo.find_history_between(at(150), at(300)).await.unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].result, ChecksumResultCode::ChecksumNoMatch);
    }

    #[tokio::test]
    async fn test_prune_by_code_and_remaining() {
        let (repo, created) = setup(1).await;
        let bitstream = &created[0];

        for (code, start) in [
            (ChecksumResultCode::ChecksumMatch, 100),
            (ChecksumResultCode::ChecksumMatch, 10_000),
            (ChecksumResultCode::ChecksumNoMatch, 100),
            (ChecksumResultCode::BitstreamNotFound, 100),
        ] {
            let (entry, recent) = result_for(bitstream, code, at(start));
            repo.record(&entry, &recent).await.unwrap();
        }

        assert_eq!(repo.prune(ChecksumResultCode::ChecksumMatch, at(5_000)).await.unwrap(), 1);
        assert_eq!(
            repo.prune_excluding(&[ChecksumResultCode::ChecksumMatch, ChecksumResultCode::ChecksumNoMatch], at(5_000))
                .await
                .unwrap(),
            1
        );

        let remaining: Vec<_> = repo
            .history_for(&bitstream.id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.result)
            .collect();
        assert_eq!(
            remaining,
            vec![ChecksumResultCode::ChecksumNoMatch, ChecksumResultCode::ChecksumMatch]
        );
    }
}
