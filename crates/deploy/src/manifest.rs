//! Project configuration and declarative script manifests.
//!
//! A project is a `Keel.toml` file plus a directory of script manifests:
//!
//! ```toml
//! # deploy/000_deploy_main.toml
//! tags = ["matic", "main"]
//! from = "creator"
//!
//! [skip]
//! unless_network = ["matic"]
//!
//! [[step]]
//! deploy = "PoolUSDC"
//! contract = "Pool"
//!
//! [[step]]
//! execute = "Treasury"
//! method = "addPool"
//! args = [{ ref = "PoolUSDC" }]
//! ```

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    Networks,
    executor::RpcExecutorConfig,
    rpc,
    script::{Script, SkipRules},
    step::{ConfigureStep, DEFAULT_SIGNER_ROLE, DeployStep, Idempotence, Step},
    value::Value,
};

/// The default name of the project configuration file.
pub const PROJECT_FILENAME: &str = "Keel.toml";

/// Extension of script manifest files.
pub const SCRIPT_EXTENSION: &str = "toml";

/// Project-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Directory holding script manifests.
    pub scripts_dir: PathBuf,
    /// Directory holding the registry, execution log and lock file.
    pub deployments_dir: PathBuf,
    /// Directory holding compiled contract artifacts.
    pub artifacts_dir: PathBuf,
    /// Maximum time to wait for a transaction to be mined, in seconds.
    pub confirmation_timeout_secs: u64,
    /// Delay between two receipt polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Timeout of a single JSON-RPC request, in seconds.
    pub request_timeout_secs: u64,
    /// Explicit gas limit for every transaction; estimated by the node when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    pub networks: Networks,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("deploy"),
            deployments_dir: PathBuf::from("deployments"),
            artifacts_dir: PathBuf::from("artifacts"),
            confirmation_timeout_secs: 120,
            poll_interval_ms: 2_000,
            request_timeout_secs: rpc::DEFAULT_TIMEOUT.as_secs(),
            gas_limit: None,
            networks: Networks::default(),
        }
    }
}

impl ProjectConfig {
    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize project config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// The configuration file designated by `path`: the file itself, or `Keel.toml`
    /// inside a directory.
    pub fn file_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(PROJECT_FILENAME)
        } else {
            path.to_path_buf()
        }
    }

    /// Anchor relative directories at `root` (usually the config file's directory).
    pub fn relative_to(mut self, root: &Path) -> Self {
        for dir in [
            &mut self.scripts_dir,
            &mut self.deployments_dir,
            &mut self.artifacts_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        self
    }

    pub fn executor_config(&self) -> RpcExecutorConfig {
        RpcExecutorConfig {
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            gas_limit: self.gas_limit,
        }
    }
}

/// On-disk form of a [`Script`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptManifest {
    #[serde(default)]
    pub tags: Vec<String>,
    /// Default signing role of every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "SkipRules::is_empty")]
    pub skip: SkipRules,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepManifest>,
}

/// On-disk form of a [`Step`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepManifest {
    Deploy(DeployManifest),
    Execute(ExecuteManifest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployManifest {
    /// Registry name of the component.
    pub deploy: String,
    /// Binary to deploy, when different from the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteManifest {
    /// Registry name of the target component.
    pub execute: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Whether the call succeeds at most once; inferred from the method name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_shot: Option<bool>,
}

impl ScriptManifest {
    /// Build the runtime [`Script`] named `name`.
    pub fn into_script(self, name: impl Into<String>) -> Script {
        let default_from = self
            .from
            .unwrap_or_else(|| DEFAULT_SIGNER_ROLE.to_string());

        let mut script = Script::new(name).tags(self.tags);
        if !self.skip.is_empty() {
            script = script.skip_predicate(self.skip.into_predicate());
        }

        for step in self.steps {
            let step: Step = match step {
                StepManifest::Deploy(deploy) => {
                    let mut step = DeployStep::new(deploy.deploy)
                        .args(deploy.args)
                        .from(deploy.from.unwrap_or_else(|| default_from.clone()))
                        .replace(deploy.replace);
                    if let Some(contract) = deploy.contract {
                        step = step.contract(contract);
                    }
                    step.into()
                }
                StepManifest::Execute(execute) => {
                    let mut step = ConfigureStep::new(execute.execute, execute.method)
                        .args(execute.args)
                        .from(execute.from.unwrap_or_else(|| default_from.clone()));
                    if let Some(one_shot) = execute.one_shot {
                        step = step.idempotence(if one_shot {
                            Idempotence::OneShot
                        } else {
                            Idempotence::Repeatable
                        });
                    }
                    step.into()
                }
            };
            script = script.step(step);
        }

        script
    }
}

/// Parse one manifest.
pub fn parse_script(name: &str, content: &str) -> Result<Script> {
    let manifest: ScriptManifest =
        toml::from_str(content).context(format!("Failed to parse script `{name}`"))?;
    Ok(manifest.into_script(name))
}

/// Load every manifest under `dir`, ordered by relative path.
///
/// The script name is the relative path without extension, with `/` separators
/// (`others/000_treasury_fund_fix`).
pub fn load_scripts(dir: &Path) -> Result<Vec<Script>> {
    if !dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Scripts directory not found: {}",
            dir.display()
        ));
    }

    let mut files = Vec::new();
    collect_manifests(dir, &mut files)?;

    let mut named = files
        .into_iter()
        .map(|path| {
            let relative = path.strip_prefix(dir).unwrap_or(&path).with_extension("");
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            (name, path)
        })
        .collect::<Vec<_>>();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    let mut scripts = Vec::with_capacity(named.len());
    for (name, path) in named {
        let content = std::fs::read_to_string(&path)
            .context(format!("Failed to read script from {}", path.display()))?;
        let script = parse_script(&name, &content)?;
        tracing::debug!(script = %name, steps = script.steps.len(), "Script loaded");
        scripts.push(script);
    }

    tracing::info!(dir = %dir.display(), count = scripts.len(), "Scripts loaded");
    Ok(scripts)
}

fn collect_manifests(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .context(format!("Failed to read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_manifests(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == SCRIPT_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}
