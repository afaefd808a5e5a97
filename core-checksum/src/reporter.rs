//! Result reporting for checksum runs.

use crate::checker::{CheckResult, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Totals of a checksum run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub checked: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub errors: u64,
    /// Count per result code name
    pub by_result: BTreeMap<String, u64>,
}

impl RunSummary {
    pub fn record(&mut self, result: &CheckResult) {
        self.checked += 1;
        match result.verdict {
            Verdict::Match => self.matched += 1,
            Verdict::Mismatch => self.mismatched += 1,
            Verdict::Error(_) => self.errors += 1,
        }
        *self.by_result.entry(result.result.as_str().to_string()).or_insert(0) += 1;
    }

    pub fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.errors == 0
    }
}

/// Receives every verification of a run, then the run's totals.
pub trait ResultsReporter: Send + Sync {
    fn report(&self, result: &CheckResult);

    fn summary(&self, summary: &RunSummary);
}

/// Reports through `tracing`.
///
/// Matches are only logged in verbose mode; anything else is always logged.
#[derive(Debug, Clone, Default)]
pub struct LogReporter {
    verbose: bool,
}

impl LogReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn is_reported(&self, result: &CheckResult) -> bool {
        self.verbose || result.verdict != Verdict::Match
    }
}

impl ResultsReporter for LogReporter {
    fn report(&self, result: &CheckResult) {
        if !self.is_reported(result) {
            return;
        }
        let expected = result.expected_checksum.as_deref().unwrap_or("-");
        let calculated = result.calculated_checksum.as_deref().unwrap_or("-");
        match result.verdict {
            Verdict::Match => info!(
                bitstream_id = %result.bitstream_id,
                result = %result.result,
                algorithm = result.algorithm.as_deref().unwrap_or("-"),
                checksum = calculated,
                "Checksum verified"
            ),
            _ => warn!(
                bitstream_id = %result.bitstream_id,
                result = %result.result,
                algorithm = result.algorithm.as_deref().unwrap_or("-"),
                expected,
                calculated,
                "{}",
                result.result.description()
            ),
        }
    }

    fn summary(&self, summary: &RunSummary) {
        info!(
            checked = summary.checked,
            matched = summary.matched,
            mismatched = summary.mismatched,
            errors = summary.errors,
            "Checksum run summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::models::{BitstreamId, ChecksumResultCode};

    fn result(code: ChecksumResultCode, verdict: Verdict) -> CheckResult {
        CheckResult {
            bitstream_id: BitstreamId::new(),
            verdict,
            result: code,
            algorithm: Some("MD5".to_string()),
            expected_checksum: None,
            calculated_checksum: None,
            history_id: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(&result(ChecksumResultCode::ChecksumMatch, Verdict::Match));
        summary.record(&result(ChecksumResultCode::ChecksumMatch, Verdict::Match));
        summary.record(&result(ChecksumResultCode::ChecksumNoMatch, Verdict::Mismatch));
        summary.record(&result(
            ChecksumResultCode::BitstreamNotFound,
            Verdict::Error(ChecksumResultCode::BitstreamNotFound),
        ));

        assert_eq!(summary.checked, 4);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.mismatched, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.by_result.get("CHECKSUM_MATCH"), Some(&2));
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_quiet_reporter_only_reports_problems() {
        let matched = result(ChecksumResultCode::ChecksumMatch, Verdict::Match);
        let mismatched = result(ChecksumResultCode::ChecksumNoMatch, Verdict::Mismatch);

        let quiet = LogReporter::new(false);
        assert!(!quiet.is_reported(&matched));
        assert!(quiet.is_reported(&mismatched));

        let verbose = LogReporter::new(true);
        assert!(verbose.is_reported(&matched));
    }
}
