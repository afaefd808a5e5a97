use anyhow::{bail, Result};
use clap::Args;
use core_service::{parse_date_bound, parse_date_upper_bound, CoreService, EnhanceRequest};

#[derive(Args)]
#[command(
    about = "Enhance item metadata in bulk",
    long_about = "Runs every registered enhancer over the selected items and writes the
resulting metadata changes, one committed page at a time.

Items are selected from the search index: archived, non-withdrawn items,
optionally narrowed to a community or collection, an entity type, a query
and a last-modified date range. Selection happens once, up front, so
items modified by the run itself are not picked up again.

Use --dry-run to see what would change without writing anything.

Per-item failures are reported and do not change the exit status. The
command exits non-zero when the run cannot start (bad arguments, unknown
scope, unreachable index) or aborts and rolls back its open page.",
    help_template = crate::clap_help!(
        examples: "  # Enhance everything\n  \
                   curation enhance\n\n  \
                   # One collection, publications only\n  \
                   curation enhance --collection 123456789/42 --entity-type Publication\n\n  \
                   # Preview changes to items modified this year\n  \
                   curation enhance --date-from 2024-01-01 --dry-run\n\n  \
                   # Commit every 500 items\n  \
                   curation enhance --limit 500"
    )
)]
pub struct EnhanceCommand {
    /// Community or collection to process, by handle or id
    #[arg(short = 'c', long)]
    pub collection: Option<String>,

    /// Only items of this entity type
    #[arg(short = 'e', long)]
    pub entity_type: Option<String>,

    /// Search query narrowing the selection
    #[arg(short = 'q', long)]
    pub query: Option<String>,

    /// Only items modified at or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub date_from: Option<String>,

    /// Only items modified at or before this date; a plain day includes the
    /// whole day (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub date_to: Option<String>,

    /// Maximum number of items to process
    #[arg(short = 'm', long)]
    pub max: Option<usize>,

    /// Items per committed page (0 = a single page)
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,

    /// Report changes without writing them
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Re-derive values even when they look current
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

impl EnhanceCommand {
    fn request(&self) -> Result<EnhanceRequest> {
        Ok(EnhanceRequest {
            scope: self.collection.clone(),
            entity_type: self.entity_type.clone(),
            query: self.query.clone(),
            date_from: self.date_from.as_deref().map(parse_date_bound).transpose()?,
            date_to: self.date_to.as_deref().map(parse_date_upper_bound).transpose()?,
            max_results: self.max,
            page_size: self.limit,
            dry_run: self.dry_run,
            force: self.force,
        })
    }
}

pub async fn run(cmd: EnhanceCommand, service: &CoreService) -> Result<()> {
    let report = service.enhance(&cmd.request()?).await?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        for failure in &report.failures {
            eprintln!("  {} {:?}: {}", failure.item_id, failure.kind, failure.message);
        }
    }

    if report.is_aborted() {
        bail!(
            "Enhancement aborted after {} pages: {}",
            report.pages,
            report.abort_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}
