//! Compiled contract artifacts.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use serde_json::Value as Json;

use crate::error::ExecutionFailure;

/// Directory of compiled artifacts, one `<ContractKind>.json` per binary.
///
/// Both hardhat (`"bytecode": "0x..."`) and foundry (`"bytecode": { "object": "0x..." }`)
/// layouts are understood. Files may be nested at any depth.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Locate the artifact file for `contract_kind`.
    pub fn find(&self, contract_kind: &str) -> Option<PathBuf> {
        let file_name = format!("{contract_kind}.json");
        let direct = self.dir.join(&file_name);
        if direct.is_file() {
            return Some(direct);
        }
        find_recursive(&self.dir, &file_name)
    }

    /// Creation bytecode of `contract_kind`.
    pub fn bytecode(&self, contract_kind: &str) -> Result<Bytes, ExecutionFailure> {
        let path = self.find(contract_kind).ok_or_else(|| {
            ExecutionFailure::InvalidRequest(format!(
                "no artifact for `{contract_kind}` under {}",
                self.dir.display()
            ))
        })?;

        let invalid = |reason: String| {
            ExecutionFailure::InvalidRequest(format!("{}: {reason}", path.display()))
        };

        let content = std::fs::read_to_string(&path).map_err(|e| invalid(e.to_string()))?;
        let json: Json = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        let hex_code = match json.get("bytecode") {
            Some(Json::String(code)) => code.as_str(),
            Some(Json::Object(obj)) => obj
                .get("object")
                .and_then(Json::as_str)
                .ok_or_else(|| invalid("bytecode object has no `object` field".to_string()))?,
            _ => return Err(invalid("missing `bytecode` field".to_string())),
        };

        let code = hex::decode(hex_code.trim_start_matches("0x"))
            .map_err(|e| invalid(format!("bytecode is not hex: {e}")))?;
        if code.is_empty() {
            return Err(invalid(format!(
                "`{contract_kind}` has no creation bytecode (abstract contract or interface?)"
            )));
        }

        Ok(Bytes::from(code))
    }
}

fn find_recursive(dir: &Path, file_name: &str) -> Option<PathBuf> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|name| name == file_name) {
            return Some(path);
        }
    }
    subdirs.sort();
    subdirs
        .into_iter()
        .find_map(|subdir| find_recursive(&subdir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_hardhat_layout() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        let nested = temp_dir.path().join("contracts/Treasury.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join("Treasury.json"),
            r#"{ "contractName": "Treasury", "bytecode": "0x6080604052" }"#,
        )
        .unwrap();

        let store = ArtifactStore::new(temp_dir.path());
        let code = store.bytecode("Treasury").unwrap();
        assert_eq!(code.to_vec(), vec![0x60, 0x80, 0x60, 0x40, 0x52]);
    }

    #[test]
    fn test_foundry_layout() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("Pool.json"),
            r#"{ "bytecode": { "object": "0x00ff" } }"#,
        )
        .unwrap();

        let store = ArtifactStore::new(temp_dir.path());
        assert_eq!(store.bytecode("Pool").unwrap().to_vec(), vec![0x00, 0xff]);
    }

    #[test]
    fn test_missing_and_empty_artifacts() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("IOracle.json"), r#"{ "bytecode": "0x" }"#).unwrap();

        let store = ArtifactStore::new(temp_dir.path());
        assert!(matches!(
            store.bytecode("Missing"),
            Err(ExecutionFailure::InvalidRequest(_))
        ));
        assert!(matches!(
            store.bytecode("IOracle"),
            Err(ExecutionFailure::InvalidRequest(_))
        ));
    }
}
