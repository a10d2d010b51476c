use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use keel_deploy::{PROJECT_FILENAME, TagFilter};
use tracing::level_filters::LevelFilter;

/// How run reports are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Table,
}

#[derive(Parser)]
#[command(name = "keel")]
#[command(
    author,
    version,
    about = "Declarative, idempotent smart-contract deployments"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "KEEL_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration file (or to the directory holding it).
    #[arg(short, long, global = true, alias = "conf", env = "KEEL_CONFIG", default_value = PROJECT_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a default project configuration file.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },
    /// Run the deployment scripts against a network.
    Deploy(DeployArgs),
    /// List the scripts in execution order.
    Scripts(ScriptsArgs),
    /// Print the deployed components.
    Registry(NetworkFilter),
    /// Print the execution log.
    History(NetworkFilter),
    /// Generate shell completions.
    Completions {
        /// The shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
pub struct DeployArgs {
    /// The network to deploy to, as named in the configuration file.
    #[arg(short, long, env = "KEEL_NETWORK")]
    pub network: String,

    /// Only run scripts carrying at least one of these tags.
    ///
    /// If not provided, every script runs.
    #[arg(short, long, value_delimiter = ',', env = "KEEL_TAGS")]
    pub tags: Vec<String>,

    /// Redeploy all components.
    /// If not provided, components already in the registry are reused.
    #[arg(long, env = "KEEL_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,

    /// Skip checking the endpoint's chain ID against the configured one.
    #[arg(long, env = "KEEL_SKIP_CHAIN_ID_CHECK")]
    pub skip_chain_id_check: bool,

    /// Output format of the run report.
    #[arg(long, env = "KEEL_FORMAT", default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl DeployArgs {
    pub fn tag_filter(&self) -> TagFilter {
        tag_filter(&self.tags)
    }
}

#[derive(Debug, Clone, Args)]
pub struct ScriptsArgs {
    /// Show whether each script would run or be skipped on this network.
    #[arg(short, long, env = "KEEL_NETWORK")]
    pub network: Option<String>,

    /// Mark which scripts these tags select.
    #[arg(short, long, value_delimiter = ',', env = "KEEL_TAGS")]
    pub tags: Vec<String>,
}

impl ScriptsArgs {
    pub fn tag_filter(&self) -> TagFilter {
        tag_filter(&self.tags)
    }
}

#[derive(Debug, Clone, Args)]
pub struct NetworkFilter {
    /// Only show records of this network.
    #[arg(short, long, env = "KEEL_NETWORK")]
    pub network: Option<String>,
}

fn tag_filter(tags: &[String]) -> TagFilter {
    if tags.is_empty() {
        TagFilter::All
    } else {
        TagFilter::any(tags.iter().map(|t| t.trim()))
    }
}
