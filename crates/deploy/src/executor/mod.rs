//! Boundary with the network: deploying binaries and invoking methods.
//!
//! The orchestration core only needs the two traits below. [`RpcExecutor`] is the
//! JSON-RPC implementation shipped with keel; tests plug in recording mocks.

use std::future::Future;

use alloy_core::primitives::{Address, TxHash};

use crate::{error::ExecutionFailure, value::Value};

pub mod abi;
mod artifacts;
mod rpc;

pub use artifacts::ArtifactStore;
pub use rpc::{RpcExecutor, RpcExecutorConfig};

/// Deploys a component binary.
///
/// From the orchestrator's point of view this is one synchronous operation: the
/// implementation waits for the deployment to be durably accepted (and owns any retry
/// or polling policy) before returning the new identity.
pub trait DeploymentExecutor: Send + Sync {
    fn deploy(
        &self,
        contract_kind: &str,
        args: &[Value],
        signer: Address,
    ) -> impl Future<Output = Result<Address, ExecutionFailure>> + Send;
}

/// Invokes a method on a deployed component.
///
/// Implementations must report a tripped one-shot guard as
/// [`ExecutionFailure::AlreadyInitialized`].
pub trait CallExecutor: Send + Sync {
    fn call(
        &self,
        target: Address,
        method: &str,
        args: &[Value],
        signer: Address,
    ) -> impl Future<Output = Result<TxHash, ExecutionFailure>> + Send;
}
