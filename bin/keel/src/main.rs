//! keel runs declarative deployment scripts against EVM networks, idempotently.

mod cli;
mod config;

use std::{path::Path, process::ExitCode};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tokio::sync::watch;

use cli::{Cli, Command, DeployArgs, NetworkFilter, OutputFormat, ScriptsArgs};
use keel_deploy::{
    ArtifactStore, EXECUTION_LOG_FILENAME, ExecutionLog, NetworkContext, Orchestrator, Registry,
    RpcExecutor, load_scripts, report,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let Cli {
        verbosity,
        config,
        command,
    } = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt().with_max_level(verbosity).init();

    match command {
        Command::Init { force } => {
            let file = config::init(&config, force)?;
            println!("Wrote {}", file.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Deploy(args) => deploy(&config, args).await,
        Command::Scripts(args) => scripts(&config, args).map(|_| ExitCode::SUCCESS),
        Command::Registry(filter) => registry(&config, filter).map(|_| ExitCode::SUCCESS),
        Command::History(filter) => history(&config, filter).map(|_| ExitCode::SUCCESS),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "keel", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn deploy(config_path: &Path, args: DeployArgs) -> Result<ExitCode> {
    let config = config::load(config_path)?;
    let network = NetworkContext::resolve(&args.network, &config.networks)?;
    let scripts = load_scripts(&config.scripts_dir)?;

    let executor = RpcExecutor::new(
        network.endpoint.clone(),
        ArtifactStore::new(&config.artifacts_dir),
        config.executor_config(),
    )?;

    if let Some(expected) = network.chain_id.filter(|_| !args.skip_chain_id_check) {
        let actual = executor
            .chain_id()
            .await
            .context(format!("Failed to query chain ID of {}", network.endpoint))?;
        if actual != expected {
            anyhow::bail!(
                "Network `{}` expects chain ID {expected} but {} reports {actual}",
                network.name,
                network.endpoint
            );
        }
    }

    let registry = Registry::open(&config.deployments_dir)?;
    let log = ExecutionLog::open(&config.deployments_dir.join(EXECUTION_LOG_FILENAME))?;

    tracing::info!(
        network = %network.name,
        endpoint = %network.endpoint,
        live = network.live,
        deployments = %config.deployments_dir.display(),
        registered = registry.entries(Some(network.name.as_str())).count(),
        "Loaded deployment state"
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, halting after the current step...");
            let _ = cancel_tx.send(true);
        }
    });

    let mut orchestrator = Orchestrator::new(registry, log, executor)
        .redeploy(args.redeploy)
        .with_cancellation(cancel_rx);
    let report = orchestrator.run(&scripts, &args.tag_filter(), &network).await;

    match args.format {
        OutputFormat::Text => println!("{report}"),
        OutputFormat::Table => println!("{}", report::run_table(&report)),
    }

    if let Some(failure) = report.failure() {
        tracing::error!(
            script = %failure.at.script,
            step = failure.at.step_index,
            target = %failure.target,
            error = %failure.error,
            "Deployment failed"
        );
    }

    if !report.log_errors.is_empty() {
        tracing::warn!(
            failed_writes = report.log_errors.len(),
            log = %config.deployments_dir.join(EXECUTION_LOG_FILENAME).display(),
            "Execution log is incomplete"
        );
    }

    Ok(ExitCode::from(report.exit_code()))
}

fn scripts(config_path: &Path, args: ScriptsArgs) -> Result<()> {
    let config = config::load(config_path)?;
    let scripts = load_scripts(&config.scripts_dir)?;
    let network = args
        .network
        .as_deref()
        .map(|name| NetworkContext::resolve(name, &config.networks))
        .transpose()?;

    println!(
        "{}",
        report::scripts_table(&scripts, &args.tag_filter(), network.as_ref())
    );
    Ok(())
}

fn registry(config_path: &Path, filter: NetworkFilter) -> Result<()> {
    let config = config::load(config_path)?;
    let registry = Registry::read_only(&config.deployments_dir)?;

    println!(
        "{}",
        report::registry_table(registry.entries(filter.network.as_deref()))
    );
    Ok(())
}

fn history(config_path: &Path, filter: NetworkFilter) -> Result<()> {
    let config = config::load(config_path)?;
    let entries =
        ExecutionLog::read_history(&config.deployments_dir.join(EXECUTION_LOG_FILENAME))?;

    let entries = entries
        .iter()
        .filter(|entry| filter.network.as_ref().is_none_or(|n| *n == entry.network));
    println!("{}", report::history_table(entries));
    Ok(())
}
