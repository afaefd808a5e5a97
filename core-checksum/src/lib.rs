//! # Checksum Verification
//!
//! Periodic fixity checking of stored bitstreams.
//!
//! ## Components
//!
//! - **Dispatchers** (`dispatcher`): Choose which bitstream to verify next
//! - **Checker** (`checker`): Recompute a checksum, compare and record it
//! - **Reporter** (`reporter`): Per-result logging and run summaries
//! - **Pruner** (`pruner`): History retention per result code
//! - **Run** (`job`): Ties the above together for one invocation

pub mod checker;
pub mod digest;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod pruner;
pub mod reporter;

pub use checker::{CheckResult, ChecksumChecker, Verdict};
pub use digest::ChecksumAlgorithm;
pub use dispatcher::{
    parse_result_codes, BitstreamDispatcher, DispatchSources, DispatchStrategy, LimitedCountDispatcher,
    LimitedDurationDispatcher, ListDispatcher, LoopingDispatcher, SinglePassDispatcher,
};
pub use error::{ChecksumError, Result};
pub use job::{ChecksumJob, ChecksumReport};
pub use pruner::HistoryPruner;
pub use reporter::{LogReporter, ResultsReporter, RunSummary};
