//! Network context: which network is active, who signs, and where to send requests.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use alloy_signer_local::{MnemonicBuilder, coins_bip39::English};
use derive_more::{Deref, DerefMut, From};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// How a named role maps to a signing identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountSpec {
    /// Index into the accounts derived from the network mnemonic.
    Index(u32),
    /// A literal address.
    Address(Address),
}

/// Configuration of a single target network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint.
    pub endpoint: Url,
    /// Whether this is a live network (as opposed to a local dev node).
    #[serde(default)]
    pub live: bool,
    /// Expected chain ID, if pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// BIP-39 phrase used to derive index-based named accounts.
    ///
    /// Usually supplied through the environment rather than the config file.
    #[serde(default, skip_serializing)]
    pub mnemonic: Option<String>,
    /// Role name to account mapping.
    #[serde(default)]
    pub named_accounts: BTreeMap<String, AccountSpec>,
}

/// All configured networks, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref, DerefMut, From)]
#[serde(transparent)]
pub struct Networks(BTreeMap<String, NetworkConfig>);

/// The resolved view of the active network.
///
/// Built once per run and passed by reference to every skip predicate and step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkContext {
    pub name: String,
    pub endpoint: Url,
    pub live: bool,
    pub chain_id: Option<u64>,
    named_accounts: BTreeMap<String, Address>,
}

impl NetworkContext {
    /// Create a context with no named accounts.
    pub fn new(name: impl Into<String>, endpoint: Url) -> Self {
        Self {
            name: name.into(),
            endpoint,
            live: false,
            chain_id: None,
            named_accounts: BTreeMap::new(),
        }
    }

    /// Mark the network as live.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Bind a role to an address.
    pub fn with_account(mut self, role: impl Into<String>, address: Address) -> Self {
        self.named_accounts.insert(role.into(), address);
        self
    }

    /// Resolve the requested network from the configured set.
    ///
    /// Every named account is resolved eagerly so that a bad mnemonic or index is
    /// reported before any step runs.
    pub fn resolve(requested: &str, networks: &Networks) -> Result<Self> {
        let config = networks
            .get(requested)
            .ok_or_else(|| Error::UnknownNetwork(requested.to_string()))?;

        let mut named_accounts = BTreeMap::new();
        for (role, spec) in &config.named_accounts {
            let address = match spec {
                AccountSpec::Address(address) => *address,
                AccountSpec::Index(index) => {
                    derive_account(requested, role, config.mnemonic.as_deref(), *index)?
                }
            };
            named_accounts.insert(role.clone(), address);
        }

        tracing::debug!(
            network = requested,
            endpoint = %config.endpoint,
            roles = ?named_accounts.keys().collect::<Vec<_>>(),
            "Resolved network context"
        );

        Ok(Self {
            name: requested.to_string(),
            endpoint: config.endpoint.clone(),
            live: config.live,
            chain_id: config.chain_id,
            named_accounts,
        })
    }

    /// The signing identity bound to `role` on this network.
    pub fn named_account(&self, role: &str) -> Result<Address> {
        self.named_accounts
            .get(role)
            .copied()
            .ok_or_else(|| Error::UnknownRole {
                network: self.name.clone(),
                role: role.to_string(),
            })
    }
}

/// Derive the address at `m/44'/60'/0'/0/{index}` from a mnemonic.
fn derive_account(network: &str, role: &str, mnemonic: Option<&str>, index: u32) -> Result<Address> {
    let invalid = |reason: String| Error::InvalidAccount {
        network: network.to_string(),
        role: role.to_string(),
        reason,
    };

    let phrase = mnemonic.ok_or_else(|| invalid("no mnemonic configured".to_string()))?;

    let signer = MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .index(index)
        .map_err(|e| invalid(e.to_string()))?
        .build()
        .map_err(|e| invalid(e.to_string()))?;

    Ok(Address::from(signer.address().into_array()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn networks() -> Networks {
        let mut networks = Networks::default();
        networks.insert(
            "localhost".to_string(),
            NetworkConfig {
                endpoint: Url::parse("http://localhost:8545").unwrap(),
                live: false,
                chain_id: Some(31337),
                mnemonic: Some(TEST_MNEMONIC.to_string()),
                named_accounts: BTreeMap::from([
                    ("deployer".to_string(), AccountSpec::Index(0)),
                    ("creator".to_string(), AccountSpec::Index(1)),
                    (
                        "treasury".to_string(),
                        AccountSpec::Address(address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174")),
                    ),
                ]),
            },
        );
        networks
    }

    #[test]
    fn test_resolve_derives_named_accounts() {
        let ctx = NetworkContext::resolve("localhost", &networks()).unwrap();

        assert_eq!(ctx.name, "localhost");
        assert_eq!(ctx.chain_id, Some(31337));
        assert_eq!(
            ctx.named_account("deployer").unwrap(),
            address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")
        );
        assert_eq!(
            ctx.named_account("creator").unwrap(),
            address!("70997970C51812dc3A010C7d01b50e0d17dc79C8")
        );
        assert_eq!(
            ctx.named_account("treasury").unwrap(),
            address!("2791Bca1f2de4661ED88A30C99A7a9449Aa84174")
        );
    }

    #[test]
    fn test_resolve_unknown_network() {
        let err = NetworkContext::resolve("matic", &networks()).unwrap_err();
        assert!(matches!(err, Error::UnknownNetwork(ref name) if name == "matic"));
    }

    #[test]
    fn test_unknown_role() {
        let ctx = NetworkContext::resolve("localhost", &networks()).unwrap();
        let err = ctx.named_account("governor").unwrap_err();
        assert!(matches!(err, Error::UnknownRole { ref role, .. } if role == "governor"));
    }

    #[test]
    fn test_index_without_mnemonic_is_rejected() {
        let mut networks = networks();
        networks.get_mut("localhost").unwrap().mnemonic = None;

        let err = NetworkContext::resolve("localhost", &networks).unwrap_err();
        assert!(matches!(err, Error::InvalidAccount { .. }));
    }

    #[test]
    fn test_parse_network_config_toml() {
        let networks: Networks = toml::from_str(
            r#"
            [matic]
            endpoint = "https://rpc-mainnet.maticvigil.com"
            live = true

            [matic.named_accounts]
            creator = 1
            multisig = "0x4a812C5EE699A40530eB49727E1818D43964324e"
            "#,
        )
        .unwrap();

        let matic = networks.get("matic").unwrap();
        assert!(matic.live);
        assert_eq!(matic.named_accounts["creator"], AccountSpec::Index(1));
        assert_eq!(
            matic.named_accounts["multisig"],
            AccountSpec::Address(address!("4a812C5EE699A40530eB49727E1818D43964324e"))
        );
    }
}
