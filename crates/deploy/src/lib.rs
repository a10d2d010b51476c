//! keel-deploy - Declarative, idempotent deployment orchestration.
//!
//! Scripts group ordered steps that either deploy a named component or apply a
//! configuration call to one. The [`Orchestrator`] runs them against a single
//! network, recording every deployed identity in the [`Registry`] so a second run
//! reuses what already exists instead of deploying it again.

mod error;
pub use error::{Error, ExecutionFailure, Result};

mod value;
pub use value::{Value, args_hash, resolve_all};

mod network;
pub use network::{AccountSpec, NetworkConfig, NetworkContext, Networks};

mod journal;
pub use journal::{EXECUTION_LOG_FILENAME, ExecutionLog, LogAction, LogEntry};

mod registry;
pub use registry::{
    ComponentMetadata, LOCK_FILENAME, PutOutcome, REGISTRY_FILENAME, Registry, RegistryEntry,
};

mod step;
pub use step::{
    ConfigureStep, DEFAULT_SIGNER_ROLE, DeployStep, Idempotence, Step, StepAction, StepContext,
};

mod script;
pub use script::{Script, SkipPredicate, SkipRules, TagFilter};

mod orchestrator;
pub use orchestrator::{
    Orchestrator, RunFailure, RunOutcome, RunReport, ScriptReport, ScriptState, StepRef,
    StepReport,
};

pub mod report;

mod manifest;
pub use manifest::{
    DeployManifest, ExecuteManifest, PROJECT_FILENAME, ProjectConfig, ScriptManifest,
    StepManifest, load_scripts, parse_script,
};

pub mod executor;
pub use executor::{
    ArtifactStore, CallExecutor, DeploymentExecutor, RpcExecutor, RpcExecutorConfig,
};

pub mod rpc;
