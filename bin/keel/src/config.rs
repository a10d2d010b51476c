//! Project configuration loading.
//!
//! The TOML file is merged with `KEEL_`-prefixed environment variables, using `__` to
//! reach nested keys. Secrets such as mnemonics are expected to come from the
//! environment: `KEEL_NETWORKS__MATIC__MNEMONIC="..."`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use keel_deploy::{PROJECT_FILENAME, ProjectConfig};

/// Environment keys that belong to the CLI rather than the project file.
const CLI_ENV_KEYS: &[&str] = &[
    "verbosity",
    "config",
    "network",
    "tags",
    "redeploy",
    "skip_chain_id_check",
    "format",
];

pub fn load(path: &Path) -> Result<ProjectConfig> {
    let file = ProjectConfig::file_path(path);

    let mut figment = Figment::from(Serialized::defaults(ProjectConfig::default()));
    if file.exists() {
        figment = figment.merge(Toml::file(&file));
    } else {
        tracing::warn!(path = %file.display(), "Configuration file not found, using defaults");
    }

    let config: ProjectConfig = figment
        .merge(Env::prefixed("KEEL_").split("__").ignore(CLI_ENV_KEYS))
        .extract()
        .context(format!("Failed to load configuration from {}", file.display()))?;

    let root = file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    tracing::debug!(
        path = %file.display(),
        networks = config.networks.len(),
        "Configuration loaded"
    );

    Ok(config.relative_to(root))
}

/// Write a default configuration to `path`, refusing to clobber an existing one.
pub fn init(path: &Path, force: bool) -> Result<PathBuf> {
    let file = ProjectConfig::file_path(path);
    if file.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite it",
            file.display()
        );
    }
    ProjectConfig::default().save_to_file(&file)?;
    Ok(file)
}
