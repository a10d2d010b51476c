//! JSON-RPC executor.
//!
//! Transactions are submitted with `eth_sendTransaction` from the signer address, so
//! the endpoint must manage that account (a local dev node, or a signing proxy in
//! front of a live network). Confirmation is awaited by polling
//! `eth_getTransactionReceipt` with a constant back-off. A transaction mined with a
//! failed status is replayed with `eth_call` so its revert reason can be classified.

use std::time::Duration;

use alloy_core::{
    primitives::{Address, TxHash},
    sol_types::decode_revert_reason,
};
use backon::{ConstantBuilder, Retryable};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{CallExecutor, DeploymentExecutor, abi, artifacts::ArtifactStore};
use crate::{
    error::ExecutionFailure,
    rpc::{self, RpcError},
    value::Value,
};

/// Tuning knobs of the [`RpcExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcExecutorConfig {
    /// Maximum time to wait for a transaction receipt.
    pub confirmation_timeout: Duration,
    /// Delay between two receipt polls.
    pub poll_interval: Duration,
    /// Timeout of a single HTTP request.
    pub request_timeout: Duration,
    /// Explicit gas limit; the node estimates it when absent.
    pub gas_limit: Option<u64>,
}

impl Default for RpcExecutorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            request_timeout: rpc::DEFAULT_TIMEOUT,
            gas_limit: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    status: Option<String>,
    contract_address: Option<Address>,
    block_number: Option<String>,
}

impl Receipt {
    fn succeeded(&self) -> bool {
        // Pre-Byzantium receipts carry no status.
        self.status.as_deref().is_none_or(|s| rpc::parse_quantity(s) == Some(1))
    }
}

/// Why a receipt poll did not produce a receipt.
enum Poll {
    Pending,
    Rpc(RpcError),
}

/// Executes deployments and calls against a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcExecutor {
    client: reqwest::Client,
    endpoint: Url,
    artifacts: ArtifactStore,
    config: RpcExecutorConfig,
}

impl RpcExecutor {
    pub fn new(
        endpoint: Url,
        artifacts: ArtifactStore,
        config: RpcExecutorConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client(config.request_timeout)?,
            endpoint,
            artifacts,
            config,
        })
    }

    /// Chain ID reported by the endpoint.
    pub async fn chain_id(&self) -> Result<u64, ExecutionFailure> {
        let result: String =
            rpc::json_rpc_call(&self.client, self.endpoint.as_str(), "eth_chainId", vec![])
                .await
                .map_err(classify)?;
        rpc::parse_quantity(&result)
            .ok_or_else(|| ExecutionFailure::Transport(format!("invalid chain id `{result}`")))
    }

    fn transaction(&self, from: Address, to: Option<Address>, data: &[u8]) -> serde_json::Value {
        let mut tx = json!({
            "from": from,
            "data": format!("0x{}", hex::encode(data)),
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(gas) = self.config.gas_limit {
            tx["gas"] = json!(format!("0x{gas:x}"));
        }
        tx
    }

    /// Submit `tx`, wait for its receipt and make sure it succeeded.
    async fn submit(&self, tx: serde_json::Value) -> Result<(TxHash, Receipt), ExecutionFailure> {
        let hash: TxHash = rpc::json_rpc_call(
            &self.client,
            self.endpoint.as_str(),
            "eth_sendTransaction",
            vec![tx.clone()],
        )
        .await
        .map_err(classify)?;
        let (from, to) = (&tx["from"], &tx["to"]);
        tracing::debug!(tx_hash = %hash, %from, %to, "Transaction submitted");

        let receipt = self.wait_for_receipt(hash).await?;
        if !receipt.succeeded() {
            return Err(self.replay_failure(hash, tx, &receipt).await);
        }
        Ok((hash, receipt))
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<Receipt, ExecutionFailure> {
        let poll_interval = self.config.poll_interval.max(Duration::from_millis(1));
        let attempts = (self.config.confirmation_timeout.as_millis() / poll_interval.as_millis())
            .max(1) as usize;

        let fetch = || async move {
            let receipt: Option<Receipt> = rpc::json_rpc_call(
                &self.client,
                self.endpoint.as_str(),
                "eth_getTransactionReceipt",
                vec![json!(hash)],
            )
            .await
            .map_err(Poll::Rpc)?;
            receipt.ok_or(Poll::Pending)
        };

        fetch
            .retry(
                ConstantBuilder::default()
                    .with_delay(poll_interval)
                    .with_max_times(attempts),
            )
            .when(should_poll_again)
            .notify(|_, delay| {
                tracing::trace!(tx_hash = %hash, ?delay, "Receipt not available yet, retrying...");
            })
            .await
            .map_err(|e| match e {
                Poll::Pending => ExecutionFailure::TimedOut(self.config.confirmation_timeout),
                Poll::Rpc(err) => classify(err),
            })
    }

    /// Replay a mined but failed transaction with `eth_call` to recover its revert reason.
    async fn replay_failure(
        &self,
        hash: TxHash,
        tx: serde_json::Value,
        receipt: &Receipt,
    ) -> ExecutionFailure {
        let block = receipt
            .block_number
            .as_deref()
            .map_or_else(|| json!("latest"), |block| json!(block));

        let replay: Result<serde_json::Value, RpcError> =
            rpc::json_rpc_call(&self.client, self.endpoint.as_str(), "eth_call", vec![tx, block])
                .await;

        match replay {
            Err(err @ RpcError::Response { .. }) => classify(err),
            Err(err) => {
                tracing::debug!(tx_hash = %hash, error = %err, "Could not replay failed transaction");
                ExecutionFailure::Reverted(format!("transaction {hash} reverted"))
            }
            Ok(_) => ExecutionFailure::Reverted(format!("transaction {hash} reverted")),
        }
    }
}

impl DeploymentExecutor for RpcExecutor {
    async fn deploy(
        &self,
        contract_kind: &str,
        args: &[Value],
        signer: Address,
    ) -> Result<Address, ExecutionFailure> {
        let mut data = self.artifacts.bytecode(contract_kind)?.to_vec();
        data.extend(abi::encode_args(args)?);

        let (hash, receipt) = self.submit(self.transaction(signer, None, &data)).await?;

        receipt.contract_address.ok_or_else(|| {
            ExecutionFailure::Reverted(format!("receipt of {hash} has no contract address"))
        })
    }
}

impl CallExecutor for RpcExecutor {
    async fn call(
        &self,
        target: Address,
        method: &str,
        args: &[Value],
        signer: Address,
    ) -> Result<TxHash, ExecutionFailure> {
        let data = abi::encode_call(method, args)?;

        let (hash, _) = self.submit(self.transaction(signer, Some(target), &data)).await?;
        Ok(hash)
    }
}

/// Pending receipts and transport hiccups are retried; node errors are final.
fn should_poll_again(poll: &Poll) -> bool {
    matches!(poll, Poll::Pending | Poll::Rpc(RpcError::Transport { .. }))
}

/// Human-readable reason of ABI-encoded revert data (`Error(string)`, `Panic(uint256)`).
fn revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data.strip_prefix("0x")?).ok()?;
    decode_revert_reason(&bytes)
}

/// Map an RPC failure onto the executor failure taxonomy.
fn classify(err: RpcError) -> ExecutionFailure {
    if let RpcError::Response { message, data, .. } = &err {
        let message = match data {
            Some(data) => match revert_reason(data) {
                Some(reason) => format!("{message}: {reason}"),
                None => format!("{message} {data}"),
            },
            None => message.clone(),
        };
        if message.to_lowercase().contains("already initialized") {
            return ExecutionFailure::AlreadyInitialized(message);
        }
        return ExecutionFailure::Reverted(message);
    }
    ExecutionFailure::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Instant,
    };

    use alloy_core::{dyn_abi::DynSolValue, primitives::address};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    const SIGNER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");
    const TARGET: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
    const TX_HASH: &str = "0x00000000000000000000000000000000000000000000000000000000000000aa";

    enum Reply {
        Result(serde_json::Value),
        Error(serde_json::Value),
        Garbage,
    }

    async fn read_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let len = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body = end + 4;
            if buf.len() >= body + len {
                return Some(buf[body..body + len].to_vec());
            }
        }
    }

    /// Answer every JSON-RPC request on a local port with `handler(method)`.
    async fn serve<F>(handler: F) -> Url
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let Some(body) = read_request(&mut stream).await else {
                        return;
                    };
                    let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
                    let method = request["method"].as_str().unwrap_or_default();
                    let payload = match (*handler)(method) {
                        Reply::Result(result) => {
                            json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string()
                        }
                        Reply::Error(error) => {
                            json!({ "jsonrpc": "2.0", "id": 1, "error": error }).to_string()
                        }
                        Reply::Garbage => "<html>bad gateway</html>".to_string(),
                    };
                    let head = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        payload.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(payload.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        url
    }

    fn executor(url: Url, artifacts: &Path) -> RpcExecutor {
        RpcExecutor::new(
            url,
            ArtifactStore::new(artifacts),
            RpcExecutorConfig {
                confirmation_timeout: Duration::from_millis(300),
                poll_interval: Duration::from_millis(20),
                request_timeout: Duration::from_secs(2),
                gas_limit: Some(500_000),
            },
        )
        .unwrap()
    }

    fn revert_data(reason: &str) -> String {
        let encoded =
            DynSolValue::Tuple(vec![DynSolValue::String(reason.to_string())]).abi_encode_params();
        format!("0x08c379a0{}", hex::encode(encoded))
    }

    fn response(message: &str, data: Option<&str>) -> RpcError {
        RpcError::Response {
            method: "eth_sendTransaction".to_string(),
            code: 3,
            message: message.to_string(),
            data: data.map(str::to_string),
        }
    }

    #[test]
    fn test_classify_already_initialized() {
        let failure = classify(response(
            "execution reverted: Initializable: contract is already initialized",
            None,
        ));
        assert!(matches!(failure, ExecutionFailure::AlreadyInitialized(_)));

        let failure = classify(response("execution reverted", Some("Already Initialized")));
        assert!(matches!(failure, ExecutionFailure::AlreadyInitialized(_)));

        let data = revert_data("Initializable: contract is already initialized");
        let failure = classify(response("execution reverted", Some(&data)));
        assert!(matches!(
            failure,
            ExecutionFailure::AlreadyInitialized(message)
                if message == "execution reverted: Initializable: contract is already initialized"
        ));
    }

    #[test]
    fn test_classify_revert_and_transport() {
        let failure = classify(response("execution reverted: Ownable: caller is not the owner", None));
        assert!(matches!(failure, ExecutionFailure::Reverted(_)));

        let failure = classify(RpcError::Transport {
            method: "eth_sendTransaction".to_string(),
            reason: "connection refused".to_string(),
        });
        assert!(matches!(failure, ExecutionFailure::Transport(_)));
    }

    #[test]
    fn test_receipt_status() {
        let ok: Receipt = serde_json::from_value(json!({
            "status": "0x1",
            "contractAddress": "0x5FbDB2315678afecb367f032d93F642f64180aa3"
        }))
        .unwrap();
        assert!(ok.succeeded());
        assert!(ok.contract_address.is_some());

        let failed: Receipt =
            serde_json::from_value(json!({ "status": "0x0", "contractAddress": null })).unwrap();
        assert!(!failed.succeeded());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_failure() {
        let executor = RpcExecutor::new(
            Url::parse("http://127.0.0.1:9").unwrap(),
            ArtifactStore::new("artifacts"),
            RpcExecutorConfig {
                request_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )
        .unwrap();

        let err = executor.chain_id().await.unwrap_err();
        assert!(matches!(err, ExecutionFailure::Transport(_)));
    }

    #[test]
    fn test_poll_retries_pending_and_transport_only() {
        assert!(should_poll_again(&Poll::Pending));
        assert!(should_poll_again(&Poll::Rpc(RpcError::Transport {
            method: "eth_getTransactionReceipt".to_string(),
            reason: "connection reset".to_string(),
        })));
        assert!(!should_poll_again(&Poll::Rpc(RpcError::Decode {
            method: "eth_getTransactionReceipt".to_string(),
            reason: "invalid type".to_string(),
        })));
        assert!(!should_poll_again(&Poll::Rpc(response("unknown transaction", None))));
    }

    #[tokio::test]
    async fn test_call_times_out_when_receipt_never_arrives() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let url = serve(move |method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            _ => {
                counter.fetch_add(1, Ordering::SeqCst);
                Reply::Result(serde_json::Value::Null)
            }
        })
        .await;

        let started = Instant::now();
        let err = executor(url, Path::new("artifacts"))
            .call(TARGET, "setRouter", &[Value::Address(TARGET)], SIGNER)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionFailure::TimedOut(t) if t == Duration::from_millis(300)));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(polls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_receipt_poll_survives_transport_errors() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let url = serve(move |method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            _ => match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Reply::Garbage,
                1 => Reply::Result(serde_json::Value::Null),
                _ => Reply::Result(json!({ "status": "0x1", "blockNumber": "0x2" })),
            },
        })
        .await;

        let hash = executor(url, Path::new("artifacts"))
            .call(TARGET, "setRouter", &[Value::Address(TARGET)], SIGNER)
            .await
            .unwrap();

        assert_eq!(hash, TX_HASH.parse::<TxHash>().unwrap());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_receipt_node_error_is_not_retried() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let url = serve(move |method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            _ => {
                counter.fetch_add(1, Ordering::SeqCst);
                Reply::Error(json!({ "code": -32000, "message": "unknown transaction" }))
            }
        })
        .await;

        let err = executor(url, Path::new("artifacts"))
            .call(TARGET, "setRouter", &[Value::Address(TARGET)], SIGNER)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionFailure::Reverted(_)));
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mined_revert_is_replayed_for_its_reason() {
        let data = revert_data("Initializable: contract is already initialized");
        let url = serve(move |method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            "eth_getTransactionReceipt" => {
                Reply::Result(json!({ "status": "0x0", "blockNumber": "0x10", "contractAddress": null }))
            }
            "eth_call" => Reply::Error(json!({ "code": 3, "message": "execution reverted", "data": data })),
            other => panic!("unexpected method {other}"),
        })
        .await;

        let err = executor(url, Path::new("artifacts"))
            .call(TARGET, "initialize", &[Value::Address(SIGNER)], SIGNER)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionFailure::AlreadyInitialized(_)), "{err}");
    }

    #[tokio::test]
    async fn test_mined_revert_without_reason() {
        let url = serve(|method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            "eth_getTransactionReceipt" => Reply::Result(json!({ "status": "0x0", "blockNumber": "0x10" })),
            _ => Reply::Result(json!("0x")),
        })
        .await;

        let err = executor(url, Path::new("artifacts"))
            .call(TARGET, "setRouter", &[Value::Address(TARGET)], SIGNER)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionFailure::Reverted(message) if message.contains("reverted")));
    }

    #[tokio::test]
    async fn test_deploy_reads_contract_address() {
        let dir = tempdir::TempDir::new("keel-test").unwrap();
        std::fs::write(dir.path().join("Vault.json"), r#"{ "bytecode": "0x6080" }"#).unwrap();

        let url = serve(|method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            _ => Reply::Result(json!({ "status": "0x1", "contractAddress": TARGET })),
        })
        .await;
        let deployed = executor(url, dir.path()).deploy("Vault", &[], SIGNER).await.unwrap();
        assert_eq!(deployed, TARGET);

        let url = serve(|method| match method {
            "eth_sendTransaction" => Reply::Result(json!(TX_HASH)),
            _ => Reply::Result(json!({ "status": "0x1", "contractAddress": null })),
        })
        .await;
        let err = executor(url, dir.path()).deploy("Vault", &[], SIGNER).await.unwrap_err();
        assert!(
            matches!(err, ExecutionFailure::Reverted(message) if message.contains("no contract address"))
        );
    }
}
