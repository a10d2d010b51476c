//! Typed argument values passed to constructors and configuration calls.

use alloy_core::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{NetworkContext, Registry, error::Result};

/// A single constructor or call argument.
///
/// `Ref` and `Account` are placeholders that only become concrete addresses once
/// resolved against the [`Registry`] and the active [`NetworkContext`].
///
/// In manifests every value is a one-key inline table:
///
/// ```toml
/// args = [{ ref = "Treasury" }, { account = "creator" }, { uint = 43200 }, { string = "IRON" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Address(Address),
    Uint(#[serde(with = "u256_repr")] U256),
    Bool(bool),
    String(String),
    Bytes(Bytes),
    Array(Vec<Value>),
    /// The deployed identity of another component on the same network.
    Ref(String),
    /// The signing identity bound to a named role on the active network.
    Account(String),
}

impl Value {
    /// Shorthand for a dependency reference.
    pub fn reference(name: impl Into<String>) -> Self {
        Value::Ref(name.into())
    }

    /// Shorthand for a 256-bit unsigned integer.
    pub fn uint(value: u64) -> Self {
        Value::Uint(U256::from(value))
    }

    /// Whether this value (or any nested value) still needs resolution.
    pub fn is_resolved(&self) -> bool {
        match self {
            Value::Ref(_) | Value::Account(_) => false,
            Value::Array(items) => items.iter().all(Value::is_resolved),
            _ => true,
        }
    }

    /// Collect every component name referenced by this value, in order.
    pub fn references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Value::Ref(name) => out.push(name),
            Value::Array(items) => items.iter().for_each(|item| item.references(out)),
            _ => {}
        }
    }

    /// Replace references and account roles with concrete addresses.
    pub fn resolve(&self, registry: &Registry, network: &NetworkContext) -> Result<Value> {
        Ok(match self {
            Value::Ref(name) => Value::Address(registry.require(&network.name, name)?),
            Value::Account(role) => Value::Address(network.named_account(role)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(registry, network))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

/// Resolve a full argument list.
pub fn resolve_all(
    args: &[Value],
    registry: &Registry,
    network: &NetworkContext,
) -> Result<Vec<Value>> {
    args.iter().map(|arg| arg.resolve(registry, network)).collect()
}

/// Compute the SHA-256 hash of a resolved argument list.
///
/// The arguments are serialized to JSON first; the same list always yields the same
/// 64-character hex digest.
pub fn args_hash(args: &[Value]) -> String {
    let json = serde_json::to_string(args).expect("Value serialization should never fail");

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// U256 as a decimal string, read back from an integer or a decimal/0x string.
mod u256_repr {
    use std::str::FromStr;

    use alloy_core::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Int(u64),
        Str(String),
    }

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(v) => Ok(U256::from(v)),
            Repr::Str(s) => U256::from_str(s.trim().replace('_', "").as_str())
                .map_err(|e| D::Error::custom(format!("invalid uint `{s}`: {e}"))),
        }
    }
}
