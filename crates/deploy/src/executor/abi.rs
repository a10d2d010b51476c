//! ABI encoding of resolved argument values.

use alloy_core::{dyn_abi::DynSolValue, primitives::keccak256};

use crate::{error::ExecutionFailure, value::Value};

/// Convert a resolved value into its dynamic Solidity representation.
pub fn to_sol_value(value: &Value) -> Result<DynSolValue, ExecutionFailure> {
    Ok(match value {
        Value::Address(address) => DynSolValue::Address(*address),
        Value::Uint(v) => DynSolValue::Uint(*v, 256),
        Value::Bool(v) => DynSolValue::Bool(*v),
        Value::String(v) => DynSolValue::String(v.clone()),
        Value::Bytes(v) => DynSolValue::Bytes(v.to_vec()),
        Value::Array(items) => {
            DynSolValue::Array(items.iter().map(to_sol_value).collect::<Result<_, _>>()?)
        }
        Value::Ref(name) => {
            return Err(ExecutionFailure::InvalidRequest(format!(
                "unresolved reference to `{name}`"
            )));
        }
        Value::Account(role) => {
            return Err(ExecutionFailure::InvalidRequest(format!(
                "unresolved account role `{role}`"
            )));
        }
    })
}

fn to_sol_values(args: &[Value]) -> Result<Vec<DynSolValue>, ExecutionFailure> {
    args.iter().map(to_sol_value).collect()
}

/// ABI-encode an argument list as function parameters.
pub fn encode_args(args: &[Value]) -> Result<Vec<u8>, ExecutionFailure> {
    Ok(DynSolValue::Tuple(to_sol_values(args)?).abi_encode_params())
}

/// The canonical signature of `method` called with `args`.
///
/// A method written as `name(type,...)` is used verbatim (whitespace removed).
/// Otherwise the parameter types are inferred from the values.
pub fn signature(method: &str, args: &[Value]) -> Result<String, ExecutionFailure> {
    if method.contains('(') {
        return Ok(method.split_whitespace().collect());
    }

    let types = to_sol_values(args)?
        .iter()
        .map(|value| {
            value.sol_type_name().map(|name| name.into_owned()).ok_or_else(|| {
                ExecutionFailure::InvalidRequest(format!(
                    "cannot infer parameter types of `{method}`; write the full signature"
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(format!("{method}({})", types.join(",")))
}

/// The 4-byte selector of a canonical signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Selector followed by the encoded arguments.
pub fn encode_call(method: &str, args: &[Value]) -> Result<Vec<u8>, ExecutionFailure> {
    let signature = signature(method, args)?;
    let mut data = selector(&signature).to_vec();
    data.extend(encode_args(args)?);
    Ok(data)
}

/// Method name without an explicit parameter list.
pub fn method_name(method: &str) -> &str {
    method.split('(').next().unwrap_or(method).trim()
}
