//! # Checksum Checker
//!
//! Verifies a single bitstream and records the outcome.
//!
//! ## Verification
//!
//! 1. Look up the bitstream; an unknown id is reported without writing history.
//! 2. Deleted bitstreams are recorded as `BITSTREAM_MARKED_DELETED` and
//!    flagged so they are never dispatched again.
//! 3. The algorithm must be one of `MD5`, `SHA-256` or `SHA-512`.
//! 4. Content is read from the bitstream store and its checksum recomputed.
//! 5. The result is compared with the expected checksum: the one recorded at
//!    ingest, or the one registered for the bitstream when ingest left none.
//!    A calculated value never becomes the expected one, so a corrupted
//!    bitstream keeps failing on every run.
//! 6. A history entry is appended and the most-recent row replaced in one
//!    transaction.

use crate::digest::{checksums_equal, ChecksumAlgorithm};
use crate::error::{ChecksumError, Result};
use bridge_traits::error::BridgeError;
use bridge_traits::storage::BitstreamStore;
use bridge_traits::time::Clock;
use core_library::models::{
    Bitstream, BitstreamId, ChecksumHistoryEntry, ChecksumResultCode, MostRecentChecksum,
};
use core_library::repositories::{BitstreamRepository, ChecksumHistoryRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Three-way outcome of a verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Match,
    Mismatch,
    /// The bitstream could not be verified.
    Error(ChecksumResultCode),
}

impl Verdict {
    fn from_code(code: ChecksumResultCode) -> Self {
        match code {
            ChecksumResultCode::ChecksumMatch => Verdict::Match,
            ChecksumResultCode::ChecksumNoMatch => Verdict::Mismatch,
            other => Verdict::Error(other),
        }
    }
}

/// Everything known about one verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub bitstream_id: BitstreamId,
    pub verdict: Verdict,
    pub result: ChecksumResultCode,
    pub algorithm: Option<String>,
    pub expected_checksum: Option<String>,
    pub calculated_checksum: Option<String>,
    /// History row id; `None` when nothing was recorded.
    pub history_id: Option<i64>,
}

pub struct ChecksumChecker {
    bitstreams: Arc<dyn BitstreamRepository>,
    history: Arc<dyn ChecksumHistoryRepository>,
    store: Arc<dyn BitstreamStore>,
    clock: Arc<dyn Clock>,
}

impl ChecksumChecker {
    pub fn new(
        bitstreams: Arc<dyn BitstreamRepository>,
        history: Arc<dyn ChecksumHistoryRepository>,
        store: Arc<dyn BitstreamStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bitstreams,
            history,
            store,
            clock,
        }
    }

    /// Verify `bitstream_id` and record the result.
    ///
    /// # Errors
    ///
    /// Database failures, and store failures other than missing content.
    #[instrument(skip(self), fields(bitstream_id = %bitstream_id))]
    pub async fn check(&self, bitstream_id: &BitstreamId) -> Result<CheckResult> {
        let process_start = self.clock.now();

        let Some(bitstream) = self.bitstreams.find_by_id(bitstream_id).await? else {
            warn!("Bitstream info not found");
            return Ok(CheckResult {
                bitstream_id: *bitstream_id,
                verdict: Verdict::Error(ChecksumResultCode::BitstreamInfoNotFound),
                result: ChecksumResultCode::BitstreamInfoNotFound,
                algorithm: None,
                expected_checksum: None,
                calculated_checksum: None,
                history_id: None,
            });
        };

        let previous = self.history.find_most_recent(bitstream_id).await?;
        let expected = bitstream
            .checksum
            .clone()
            .or_else(|| previous.as_ref().and_then(|p| p.expected_checksum.clone()));

        let (result, calculated) = self.verify(&bitstream, expected.as_deref()).await?;
        debug!(result = %result, "Verified bitstream");

        let process_end = self.clock.now();
        let entry = ChecksumHistoryEntry {
            id: None,
            bitstream_id: bitstream.id,
            expected_checksum: expected.clone(),
            calculated_checksum: calculated.clone(),
            result,
            process_start,
            process_end,
        };
        let matched_prev = match (&calculated, previous.as_ref().and_then(|p| p.current_checksum.as_deref())) {
            (Some(calculated), Some(previous)) => checksums_equal(calculated, previous),
            _ => false,
        };
        let most_recent = MostRecentChecksum {
            bitstream_id: bitstream.id,
            to_be_processed: result != ChecksumResultCode::BitstreamMarkedDeleted,
            expected_checksum: expected.clone(),
            current_checksum: calculated.clone().or_else(|| expected.clone()),
            checksum_algorithm: bitstream.checksum_algorithm.clone(),
            last_process_start: process_start,
            last_process_end: process_end,
            matched_prev_checksum: matched_prev,
            result: Some(result),
        };
        let history_id = self.history.record(&entry, &most_recent).await?;

        Ok(CheckResult {
            bitstream_id: bitstream.id,
            verdict: Verdict::from_code(result),
            result,
            algorithm: bitstream.checksum_algorithm,
            expected_checksum: expected,
            calculated_checksum: calculated,
            history_id: Some(history_id),
        })
    }

    async fn verify(
        &self,
        bitstream: &Bitstream,
        expected: Option<&str>,
    ) -> Result<(ChecksumResultCode, Option<String>)> {
        if bitstream.deleted {
            return Ok((ChecksumResultCode::BitstreamMarkedDeleted, None));
        }

        let algorithm = match bitstream
            .checksum_algorithm
            .as_deref()
            .map(str::parse::<ChecksumAlgorithm>)
        {
            Some(Ok(algorithm)) => algorithm,
            Some(Err(_)) | None => return Ok((ChecksumResultCode::ChecksumAlgorithmInvalid, None)),
        };

        let content = match self.store.retrieve(&bitstream.internal_id).await {
            Ok(content) => content,
            Err(BridgeError::NotFound(_)) => return Ok((ChecksumResultCode::BitstreamNotFound, None)),
            Err(e) => {
                return Err(ChecksumError::Content {
                    bitstream_id: bitstream.id.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let calculated = algorithm.digest_hex(&content);
        let result = match expected {
            None => ChecksumResultCode::ChecksumPrevNotFound,
            Some(expected) if checksums_equal(expected, &calculated) => ChecksumResultCode::ChecksumMatch,
            Some(_) => ChecksumResultCode::ChecksumNoMatch,
        };
        Ok((result, Some(calculated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::time::ManualClock;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use core_library::db::create_test_pool;
    use core_library::repositories::{SqliteBitstreamRepository, SqliteChecksumHistoryRepository};
    use mockall::mock;

    mock! {
        pub Store {}

        #[async_trait]
        impl BitstreamStore for Store {
            async fn retrieve(&self, internal_id: &str) -> bridge_traits::error::Result<Bytes>;
            async fn exists(&self, internal_id: &str) -> bridge_traits::error::Result<bool>;
        }
    }

    const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";

    struct Fixture {
        bitstreams: Arc<SqliteBitstreamRepository>,
        history: Arc<SqliteChecksumHistoryRepository>,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        Fixture {
            bitstreams: Arc::new(SqliteBitstreamRepository::new(pool.clone())),
            history: Arc::new(SqliteChecksumHistoryRepository::new(pool)),
        }
    }

    fn checker(f: &Fixture, store: MockStore) -> ChecksumChecker {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        ChecksumChecker::new(f.bitstreams.clone(), f.history.clone(), Arc::new(store), Arc::new(clock))
    }

    fn serving(content: &'static [u8]) -> MockStore {
        let mut store = MockStore::new();
        store
            .expect_retrieve()
            .returning(move |_| Ok(Bytes::from_static(content)));
        store
    }

    #[tokio::test]
    async fn test_match_and_mismatch() {
        let f = fixture().await;
        let good = Bitstream::new("good").with_checksum("MD5", ABC_MD5.to_uppercase());
        let bad = Bitstream::new("bad").with_checksum("MD5", "ffff");
        f.bitstreams.insert(&good).await.unwrap();
        f.bitstreams.insert(&bad).await.unwrap();

        let checker = checker(&f, serving(b"abc"));
        let ok = checker.check(&good.id).await.unwrap();
        assert_eq!(ok.verdict, Verdict::Match);
        assert_eq!(ok.calculated_checksum.as_deref(), Some(ABC_MD5));

        let mismatch = checker.check(&bad.id).await.unwrap();
        assert_eq!(mismatch.verdict, Verdict::Mismatch);
        assert_eq!(mismatch.result, ChecksumResultCode::ChecksumNoMatch);

        let history = f.history.history_for(&bad.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].expected_checksum.as_deref(), Some("ffff"));
        let recent = f.history.find_most_recent(&bad.id).await.unwrap().unwrap();
        assert_eq!(recent.result, Some(ChecksumResultCode::ChecksumNoMatch));
        assert!(recent.to_be_processed);
    }

    #[tokio::test]
    async fn test_corruption_is_reported_on_every_check() {
        let f = fixture().await;
        let bitstream = Bitstream::new("rotting").with_checksum("MD5", ABC_MD5);
        f.bitstreams.insert(&bitstream).await.unwrap();

        let first = checker(&f, serving(b"abc")).check(&bitstream.id).await.unwrap();
        assert_eq!(first.verdict, Verdict::Match);

        for _ in 0..2 {
            let corrupted = checker(&f, serving(b"corrupted")).check(&bitstream.id).await.unwrap();
            assert_eq!(corrupted.verdict, Verdict::Mismatch);
            assert_eq!(corrupted.expected_checksum.as_deref(), Some(ABC_MD5));
        }

        let recent = f.history.find_most_recent(&bitstream.id).await.unwrap().unwrap();
        assert_eq!(recent.result, Some(ChecksumResultCode::ChecksumNoMatch));
        assert_eq!(recent.expected_checksum.as_deref(), Some(ABC_MD5));
        // Same corrupted content twice in a row.
        assert!(recent.matched_prev_checksum);

        let restored = checker(&f, serving(b"abc")).check(&bitstream.id).await.unwrap();
        assert_eq!(restored.verdict, Verdict::Match);
    }

    #[tokio::test]
    async fn test_error_verdicts() {
        let f = fixture().await;
        let deleted = Bitstream::new("gone").with_checksum("MD5", ABC_MD5).mark_deleted();
        let crc = Bitstream::new("crc").with_checksum("CRC32", "abcd");
        let missing = Bitstream::new("missing").with_checksum("SHA-256", "abcd");
        let mut unknown_prev = Bitstream::new("noprev");
        unknown_prev.checksum_algorithm = Some("MD5".to_string());
        for b in [&deleted, &crc, &missing, &unknown_prev] {
            f.bitstreams.insert(b).await.unwrap();
        }

        let mut store = MockStore::new();
        store
            .expect_retrieve()
            .withf(|id| id == "missing")
            .returning(|id| Err(BridgeError::NotFound(id.to_string())));
        store
            .expect_retrieve()
            .withf(|id| id == "noprev")
            .returning(|_| Ok(Bytes::from_static(b"abc")));
        let checker = checker(&f, store);

        let result = checker.check(&deleted.id).await.unwrap();
        assert_eq!(result.verdict, Verdict::Error(ChecksumResultCode::BitstreamMarkedDeleted));
        let recent = f.history.find_most_recent(&deleted.id).await.unwrap().unwrap();
        assert!(!recent.to_be_processed);

        let result = checker.check(&crc.id).await.unwrap();
        assert_eq!(result.verdict, Verdict::Error(ChecksumResultCode::ChecksumAlgorithmInvalid));

        let result = checker.check(&missing.id).await.unwrap();
        assert_eq!(result.verdict, Verdict::Error(ChecksumResultCode::BitstreamNotFound));

        let result = checker.check(&unknown_prev.id).await.unwrap();
        assert_eq!(result.verdict, Verdict::Error(ChecksumResultCode::ChecksumPrevNotFound));
        assert_eq!(result.calculated_checksum.as_deref(), Some(ABC_MD5));

        let result = checker.check(&BitstreamId::new()).await.unwrap();
        assert_eq!(result.verdict, Verdict::Error(ChecksumResultCode::BitstreamInfoNotFound));
        assert_eq!(result.history_id, None);
    }

    #[tokio::test]
    async fn test_store_failure_is_an_error() {
        let f = fixture().await;
        let bitstream = Bitstream::new("flaky").with_checksum("MD5", ABC_MD5);
        f.bitstreams.insert(&bitstream).await.unwrap();

        let mut store = MockStore::new();
        store
            .expect_retrieve()
            .returning(|_| Err(BridgeError::OperationFailed("disk offline".to_string())));

        let result = checker(&f, store).check(&bitstream.id).await;
        assert!(matches!(result, Err(ChecksumError::Content { .. })));
        assert!(f.history.history_for(&bitstream.id).await.unwrap().is_empty());
    }
}
