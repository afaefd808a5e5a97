use anyhow::Result;
use clap::Args;
use core_checksum::DispatchStrategy;
use core_library::models::BitstreamId;
use core_runtime::config::parse_duration;
use core_service::{ChecksumRequest, CoreService};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Args)]
#[command(
    about = "Verify bitstream checksums",
    long_about = "Recomputes bitstream checksums from the assetstore and compares them
with the checksums recorded at ingest, keeping every result in the history.

Without a selection option every bitstream is checked once, least recently
checked first. --count and --duration bound a run, --bitstreams and
--handle check an explicit set, and --loop keeps cycling until interrupted.
Bitstreams whose last result is terminal (deleted, missing content) are
skipped by the cycling modes.

Mismatches and per-bitstream errors are recorded and reported; they do not
change the exit status, which is non-zero only when the run cannot start.",
    help_template = crate::clap_help!(
        examples: "  # Check every bitstream once\n  \
                   curation checksum\n\n  \
                   # Check the 1000 least recently checked\n  \
                   curation checksum --count 1000\n\n  \
                   # Check for two hours, pruning old history first\n  \
                   curation checksum --duration 2h --prune\n\n  \
                   # Check one collection, reporting matches too\n  \
                   curation checksum --handle 123456789/42 --verbose"
    )
)]
pub struct ChecksumCommand {
    /// Check this many bitstreams
    #[arg(short = 'c', long, group = "selection")]
    pub count: Option<u64>,

    /// Check for this long (e.g. 90m, 2h, 1d)
    #[arg(short = 'd', long, group = "selection", value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Comma-separated bitstream ids
    #[arg(short = 'b', long, group = "selection", value_delimiter = ',')]
    pub bitstreams: Option<Vec<String>>,

    /// Community, collection or item handle
    #[arg(short = 'a', long, group = "selection")]
    pub handle: Option<String>,

    /// Keep checking until interrupted
    #[arg(short = 'l', long = "loop", group = "selection")]
    pub looping: bool,

    /// Prune expired history before checking
    #[arg(short = 'p', long)]
    pub prune: bool,

    /// Report matches as well as problems
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn parse_duration_arg(input: &str) -> std::result::Result<Duration, String> {
    parse_duration(input).map_err(|e| e.to_string())
}

impl ChecksumCommand {
    fn strategy(&self) -> Result<DispatchStrategy> {
        Ok(if let Some(count) = self.count {
            DispatchStrategy::ByCount(count)
        } else if let Some(duration) = self.duration {
            DispatchStrategy::ByDuration(duration)
        } else if let Some(ids) = &self.bitstreams {
            let ids = ids
                .iter()
                .map(|id| BitstreamId::from_string(id.trim()).map_err(|_| anyhow::anyhow!("Invalid bitstream id: {}", id)))
                .collect::<Result<Vec<_>>>()?;
            DispatchStrategy::ByIds(ids)
        } else if let Some(handle) = &self.handle {
            DispatchStrategy::ByHandle(handle.clone())
        } else if self.looping {
            DispatchStrategy::Looping
        } else {
            DispatchStrategy::SinglePass
        })
    }
}

pub async fn run(cmd: ChecksumCommand, service: &CoreService) -> Result<()> {
    let request = ChecksumRequest {
        strategy: cmd.strategy()?,
        prune: cmd.prune,
        verbose: cmd.verbose,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing the current bitstream");
            interrupt.cancel();
        }
    });

    let report = service.check_checksums(&request, cancel).await?;
    let summary = &report.summary;
    println!(
        "{}: {} checked, {} matched, {} mismatched, {} errors",
        report.strategy, summary.checked, summary.matched, summary.mismatched, summary.errors
    );
    for (result, count) in &summary.by_result {
        println!("  {:<28} {}", result, count);
    }
    if let Some(pruned) = report.pruned {
        println!("Pruned {} history entries", pruned);
    }

    if !summary.is_clean() {
        warn!(
            mismatched = summary.mismatched,
            errors = summary.errors,
            "Checksum run found problems"
        );
    }
    Ok(())
}
