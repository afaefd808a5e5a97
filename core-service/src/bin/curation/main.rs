use anyhow::{Context, Result};
use bridge_traits::LogLevel;
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use core_runtime::config::CoreConfig;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_service::CoreService;
use std::path::PathBuf;

mod cmd_checksum;
mod cmd_enhance;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Clap help template with an examples section.
#[macro_export]
macro_rules! clap_help {
    (examples: $examples:literal) => {
        concat!(
            "{about-with-newline}\n",
            "{usage-heading} {usage}\n\n",
            "{all-args}\n\n",
            "Examples:\n",
            $examples
        )
    };
}

#[derive(Parser)]
#[command(bin_name = "curation")]
#[command(version = VERSION)]
#[command(about = "Repository curation: metadata enhancement and checksum verification")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Repository database
    #[arg(long = "database", global = true, env = "CURATION_DATABASE", default_value = "curation.db", value_hint = ValueHint::FilePath)]
    database: PathBuf,

    /// Assetstore holding bitstream content
    #[arg(long = "assetstore", global = true, env = "CURATION_ASSETSTORE", default_value = "assetstore", value_hint = ValueHint::DirPath)]
    assetstore: PathBuf,

    /// Minimum log level
    #[arg(long, global = true, value_enum, default_value_t = Level::Info)]
    log_level: Level,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Trace => LogLevel::Trace,
            Level::Debug => LogLevel::Debug,
            Level::Info => LogLevel::Info,
            Level::Warn => LogLevel::Warn,
            Level::Error => LogLevel::Error,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Enhance(cmd_enhance::EnhanceCommand),
    Checksum(cmd_checksum::ChecksumCommand),
}

impl Cli {
    fn config(&self) -> Result<CoreConfig> {
        let logging = LoggingConfig::default()
            .with_level(self.log_level.into())
            .with_format(self.log_format);
        Ok(CoreConfig::builder()
            .database_path(&self.database)
            .assetstore_dir(&self.assetstore)
            .logging(logging)
            .build()?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;
    init_logging(config.logging.clone())?;

    let service = CoreService::bootstrap(config)
        .await
        .with_context(|| format!("Failed to open repository database {}", cli.database.display()))?;

    match cli.command {
        Commands::Enhance(cmd) => cmd_enhance::run(cmd, &service).await?,
        Commands::Checksum(cmd) => cmd_checksum::run(cmd, &service).await?,
    }

    Ok(())
}
