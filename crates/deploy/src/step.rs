//! Declarative units of work: deploy a component, or apply a configuration call.

use std::fmt;

use alloy_core::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::{
    ExecutionLog, NetworkContext, Registry,
    error::{Error, Result},
    executor::{CallExecutor, DeploymentExecutor, abi},
    journal::LogAction,
    registry::{ComponentMetadata, PutOutcome},
    value::{Value, args_hash, resolve_all},
};

/// Role used to sign a step when none is given.
pub const DEFAULT_SIGNER_ROLE: &str = "deployer";

/// Ensure a component is deployed under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployStep {
    /// Registry name of the component.
    pub name: String,
    /// Binary backing the component. Defaults to `name`.
    pub contract_kind: String,
    pub args: Vec<Value>,
    /// Signing role.
    pub from: String,
    /// Deploy even if a registry entry exists, superseding it.
    pub replace: bool,
}

impl DeployStep {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            contract_kind: name.clone(),
            name,
            args: Vec::new(),
            from: DEFAULT_SIGNER_ROLE.to_string(),
            replace: false,
        }
    }

    /// Use a different binary than the component name.
    pub fn contract(mut self, contract_kind: impl Into<String>) -> Self {
        self.contract_kind = contract_kind.into();
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn from(mut self, role: impl Into<String>) -> Self {
        self.from = role.into();
        self
    }

    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Run the step.
    ///
    /// 1. Resolve references in the constructor arguments.
    /// 2. Reuse a registry entry with matching metadata; refuse a mismatching one.
    /// 3. Otherwise deploy and record the new identity.
    pub async fn execute<E: DeploymentExecutor>(&self, ctx: &mut StepContext<'_, E>) -> Result<StepAction> {
        let network = &ctx.network.name;
        let resolved = resolve_all(&self.args, ctx.registry, ctx.network)?;
        let metadata = ComponentMetadata {
            contract_kind: self.contract_kind.clone(),
            constructor_args_hash: args_hash(&resolved),
        };
        let force = self.replace || ctx.redeploy;

        if let Some(entry) = ctx.registry.entry(network, &self.name) {
            if !force {
                if let Some(reason) = entry.mismatch(&metadata) {
                    return Err(Error::Conflict {
                        network: network.clone(),
                        name: self.name.clone(),
                        reason,
                    });
                }

                let identity = entry.identity;
                tracing::info!(
                    name = %self.name,
                    contract = %self.contract_kind,
                    %identity,
                    "Reusing deployed component"
                );
                ctx.log.append(network, &self.name, LogAction::Reused { identity })?;
                return Ok(StepAction::Reused { identity });
            }
        }

        let signer = ctx.network.named_account(&self.from)?;

        tracing::info!(
            name = %self.name,
            contract = %self.contract_kind,
            %signer,
            args = resolved.len(),
            "Deploying component..."
        );

        let identity = ctx
            .executor
            .deploy(&self.contract_kind, &resolved, signer)
            .await
            .map_err(|source| Error::DeploymentFailed {
                name: self.name.clone(),
                contract_kind: self.contract_kind.clone(),
                source,
            })?;

        let outcome = ctx
            .registry
            .put(network, &self.name, identity, metadata, force, ctx.log)?;

        Ok(match outcome {
            PutOutcome::Replaced { previous } => StepAction::Replaced { previous, identity },
            PutOutcome::Inserted | PutOutcome::Unchanged => StepAction::Deployed { identity },
        })
    }
}

/// Whether a configuration call may safely be applied more than once.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Idempotence {
    /// Succeeds at most once per component instance (`initialize`-style).
    OneShot,
    /// Safe to repeat (setters).
    Repeatable,
}

impl Idempotence {
    /// Methods named `initialize...` are one-shot, everything else is repeatable.
    pub fn infer(method: &str) -> Self {
        if abi::method_name(method).starts_with("initialize") {
            Idempotence::OneShot
        } else {
            Idempotence::Repeatable
        }
    }
}

/// Apply a method call to an already deployed component.
///
/// Calls are never deduplicated locally: the orchestrator cannot know whether a call
/// already executed without invoking it, so a second run of a one-shot call surfaces
/// the target's `AlreadyInitialized` failure and halts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureStep {
    /// Registry name of the component the call is applied to.
    pub target: String,
    /// Method name, or full signature `name(type,...)`.
    pub method: String,
    pub args: Vec<Value>,
    pub from: String,
    pub idempotence: Idempotence,
}

impl ConfigureStep {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        let method = method.into();
        Self {
            target: target.into(),
            idempotence: Idempotence::infer(&method),
            method,
            args: Vec::new(),
            from: DEFAULT_SIGNER_ROLE.to_string(),
        }
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn from(mut self, role: impl Into<String>) -> Self {
        self.from = role.into();
        self
    }

    pub fn idempotence(mut self, idempotence: Idempotence) -> Self {
        self.idempotence = idempotence;
        self
    }

    /// Run the step.
    pub async fn execute<E: CallExecutor>(&self, ctx: &mut StepContext<'_, E>) -> Result<StepAction> {
        let network = &ctx.network.name;
        let target = ctx.registry.require(network, &self.target)?;
        let resolved = resolve_all(&self.args, ctx.registry, ctx.network)?;
        let signer = ctx.network.named_account(&self.from)?;

        tracing::info!(
            target = %self.target,
            method = %self.method,
            idempotence = %self.idempotence,
            %signer,
            "Executing configuration call..."
        );

        let tx_hash = ctx
            .executor
            .call(target, &self.method, &resolved, signer)
            .await
            .map_err(|source| Error::CallFailed {
                target: self.target.clone(),
                method: self.method.clone(),
                source,
            })?;

        ctx.log.append(
            network,
            &self.target,
            LogAction::Called {
                method: self.method.clone(),
                target,
                tx_hash,
            },
        )?;

        Ok(StepAction::Called { target, tx_hash })
    }
}

/// A single step of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Deploy(DeployStep),
    Configure(ConfigureStep),
}

impl From<DeployStep> for Step {
    fn from(step: DeployStep) -> Self {
        Step::Deploy(step)
    }
}

impl From<ConfigureStep> for Step {
    fn from(step: ConfigureStep) -> Self {
        Step::Configure(step)
    }
}

impl Step {
    /// Name of the component this step acts on.
    pub fn target(&self) -> &str {
        match self {
            Step::Deploy(step) => &step.name,
            Step::Configure(step) => &step.target,
        }
    }

    /// Component names this step reads from the registry, in order.
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        match self {
            Step::Deploy(step) => step.args.iter().for_each(|arg| arg.references(&mut refs)),
            Step::Configure(step) => {
                refs.push(step.target.as_str());
                step.args.iter().for_each(|arg| arg.references(&mut refs));
            }
        }
        refs
    }

    pub async fn execute<E>(&self, ctx: &mut StepContext<'_, E>) -> Result<StepAction>
    where
        E: DeploymentExecutor + CallExecutor,
    {
        match self {
            Step::Deploy(step) => step.execute(ctx).await,
            Step::Configure(step) => step.execute(ctx).await,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Deploy(step) if step.name == step.contract_kind => {
                write!(f, "deploy {}", step.name)
            }
            Step::Deploy(step) => write!(f, "deploy {} ({})", step.name, step.contract_kind),
            Step::Configure(step) => write!(f, "execute {}.{}", step.target, step.method),
        }
    }
}

/// Everything a step needs while it runs.
pub struct StepContext<'a, E> {
    pub network: &'a NetworkContext,
    pub registry: &'a mut Registry,
    pub log: &'a mut ExecutionLog,
    pub executor: &'a E,
    /// Force every deploy step to replace its registry entry.
    pub redeploy: bool,
}

/// What a successful step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Deployed { identity: Address },
    Replaced { previous: Address, identity: Address },
    Reused { identity: Address },
    Called { target: Address, tx_hash: TxHash },
}

impl StepAction {
    /// Whether the step caused an external side effect.
    pub fn is_side_effect(&self) -> bool {
        !matches!(self, StepAction::Reused { .. })
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Deployed { identity } => write!(f, "deployed at {identity}"),
            StepAction::Replaced { previous, identity } => {
                write!(f, "replaced {previous} with {identity}")
            }
            StepAction::Reused { identity } => write!(f, "reused {identity}"),
            StepAction::Called { tx_hash, .. } => write!(f, "called (tx {tx_hash})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotence_inference() {
        assert_eq!(Idempotence::infer("initialize"), Idempotence::OneShot);
        assert_eq!(
            Idempotence::infer("initialize(address,uint256)"),
            Idempotence::OneShot
        );
        assert_eq!(Idempotence::infer("setOracleDollar"), Idempotence::Repeatable);
        assert_eq!(Idempotence::infer("addPool"), Idempotence::Repeatable);
    }

    #[test]
    fn test_step_references() {
        let deploy: Step = DeployStep::new("DollarOracle")
            .args(vec![
                Value::reference("Dollar"),
                Value::reference("PairOracle_DOLLAR_USDC"),
                Value::uint(12),
            ])
            .into();
        assert_eq!(deploy.references(), vec!["Dollar", "PairOracle_DOLLAR_USDC"]);

        let configure: Step = ConfigureStep::new("Treasury", "addPool")
            .args(vec![Value::reference("PoolUSDC")])
            .into();
        assert_eq!(configure.references(), vec!["Treasury", "PoolUSDC"]);
    }

    #[test]
    fn test_step_display() {
        let step: Step = DeployStep::new("PoolUSDC").contract("Pool").into();
        assert_eq!(step.to_string(), "deploy PoolUSDC (Pool)");

        let step: Step = ConfigureStep::new("Treasury", "addPool").into();
        assert_eq!(step.to_string(), "execute Treasury.addPool");
    }
}
