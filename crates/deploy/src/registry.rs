//! Artifact registry: the durable record of what has been deployed where.
//!
//! The registry is persisted as a flat JSON-lines file (`registry.jsonl`) inside the
//! deployments directory. Records are only ever appended; loading folds them by
//! `(network, name)` so a forced replacement simply supersedes the earlier line.
//! An exclusive advisory lock on `.lock` is held while the registry is open so two
//! operators cannot write the same deployments directory at once.

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    journal::{ExecutionLog, LogAction},
};

/// Default file name of the registry inside the deployments directory.
pub const REGISTRY_FILENAME: &str = "registry.jsonl";

/// Name of the advisory lock file inside the deployments directory.
pub const LOCK_FILENAME: &str = ".lock";

/// Metadata that identifies *what* was deployed under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    /// Which binary backs the component.
    pub contract_kind: String,
    /// SHA-256 of the resolved constructor arguments.
    pub constructor_args_hash: String,
}

/// A persisted registry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub network: String,
    pub name: String,
    pub contract_kind: String,
    pub constructor_args_hash: String,
    pub identity: Address,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

impl RegistryEntry {
    /// Describe how this entry differs from `metadata`, if at all.
    pub fn mismatch(&self, metadata: &ComponentMetadata) -> Option<String> {
        if self.contract_kind != metadata.contract_kind {
            return Some(format!(
                "registered as `{}`, requested `{}`",
                self.contract_kind, metadata.contract_kind
            ));
        }
        if self.constructor_args_hash != metadata.constructor_args_hash {
            return Some(format!(
                "constructor arguments changed ({} -> {})",
                short_hash(&self.constructor_args_hash),
                short_hash(&metadata.constructor_args_hash)
            ));
        }
        None
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(10)]
}

/// Result of a successful [`Registry::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No entry existed; one was created.
    Inserted,
    /// An entry with identical metadata already existed; nothing changed.
    Unchanged,
    /// A differing entry was superseded because replacement was forced.
    Replaced { previous: Address },
}

struct Store {
    file: File,
    path: PathBuf,
    _lock: File,
}

/// Registry of deployed components keyed by `(network, name)`.
pub struct Registry {
    entries: BTreeMap<(String, String), RegistryEntry>,
    store: Option<Store>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries.len())
            .field("path", &self.path())
            .finish()
    }
}

impl Registry {
    /// A registry that is not persisted. Useful for dry runs and tests.
    pub fn in_memory() -> Self {
        Self {
            entries: BTreeMap::new(),
            store: None,
        }
    }

    /// Open the registry in `dir`, creating the directory if needed.
    ///
    /// Fails with [`Error::Locked`] if another process holds the deployments directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILENAME);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        if let Err(err) = lock.try_lock_exclusive() {
            if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(Error::Locked {
                    path: dir.display().to_string(),
                });
            }
            return Err(err.into());
        }

        let path = dir.join(REGISTRY_FILENAME);
        let entries = Self::load_entries(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "Registry opened"
        );

        Ok(Self {
            entries,
            store: Some(Store {
                file,
                path,
                _lock: lock,
            }),
        })
    }

    /// Read a registry file without taking the lock.
    pub fn read_only(dir: &Path) -> Result<Self> {
        Ok(Self {
            entries: Self::load_entries(&dir.join(REGISTRY_FILENAME))?,
            store: None,
        })
    }

    fn load_entries(path: &Path) -> Result<BTreeMap<(String, String), RegistryEntry>> {
        let mut entries = BTreeMap::new();
        if !path.exists() {
            return Ok(entries);
        }

        let reader = BufReader::new(File::open(path)?);
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: RegistryEntry = serde_json::from_str(&line).map_err(|e| {
                Error::Persistence(format!("{}:{}: {e}", path.display(), index + 1))
            })?;
            entries.insert((entry.network.clone(), entry.name.clone()), entry);
        }
        Ok(entries)
    }

    /// Deployed identity of `name` on `network`, if any.
    pub fn get(&self, network: &str, name: &str) -> Option<Address> {
        self.entry(network, name).map(|entry| entry.identity)
    }

    /// Full record of `name` on `network`, if any.
    pub fn entry(&self, network: &str, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(&(network.to_string(), name.to_string()))
    }

    pub fn exists(&self, network: &str, name: &str) -> bool {
        self.entry(network, name).is_some()
    }

    /// Like [`Registry::get`] but fails with [`Error::UnresolvedDependency`].
    pub fn require(&self, network: &str, name: &str) -> Result<Address> {
        self.get(network, name)
            .ok_or_else(|| Error::UnresolvedDependency {
                network: network.to_string(),
                component: name.to_string(),
            })
    }

    /// Record a deployment.
    ///
    /// An existing entry with the same metadata makes this a no-op. An existing entry
    /// with different metadata is a [`Error::Conflict`] unless `force` is set, in which
    /// case a superseding record is appended. Every call is written to `log`.
    pub fn put(
        &mut self,
        network: &str,
        name: &str,
        identity: Address,
        metadata: ComponentMetadata,
        force: bool,
        log: &mut ExecutionLog,
    ) -> Result<PutOutcome> {
        let key = (network.to_string(), name.to_string());

        let outcome = match self.entries.get(&key) {
            Some(existing) if !force => match existing.mismatch(&metadata) {
                None => {
                    log.append(
                        network,
                        name,
                        LogAction::Reused {
                            identity: existing.identity,
                        },
                    )?;
                    return Ok(PutOutcome::Unchanged);
                }
                Some(reason) => {
                    return Err(Error::Conflict {
                        network: network.to_string(),
                        name: name.to_string(),
                        reason,
                    });
                }
            },
            Some(existing) => PutOutcome::Replaced {
                previous: existing.identity,
            },
            None => PutOutcome::Inserted,
        };

        let entry = RegistryEntry {
            network: network.to_string(),
            name: name.to_string(),
            contract_kind: metadata.contract_kind,
            constructor_args_hash: metadata.constructor_args_hash,
            identity,
            timestamp: chrono::Utc::now().timestamp(),
        };

        if let Some(store) = self.store.as_mut() {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            store.file.write_all(line.as_bytes())?;
            store.file.sync_data()?;
        }

        let action = match outcome {
            PutOutcome::Replaced { previous } => LogAction::Replaced {
                contract_kind: entry.contract_kind.clone(),
                previous,
                identity,
            },
            _ => LogAction::Deployed {
                contract_kind: entry.contract_kind.clone(),
                identity,
            },
        };

        // The record is durable from here on; memory must agree even if logging fails.
        self.entries.insert(key, entry);
        tracing::info!(network, name, %identity, ?outcome, "Registry entry written");

        log.append(network, name, action)?;
        Ok(outcome)
    }

    /// All entries, optionally restricted to one network, ordered by network then name.
    pub fn entries<'a>(&'a self, network: Option<&'a str>) -> impl Iterator<Item = &'a RegistryEntry> {
        self.entries
            .values()
            .filter(move |entry| network.is_none_or(|n| entry.network == n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the backing file, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.store.as_ref().map(|store| store.path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;
    use tempdir::TempDir;

    const TREASURY: Address = address!("4a812C5EE699A40530eB49727E1818D43964324e");
    const OTHER: Address = address!("D86b5923F3AD7b585eD81B448170ae026c65ae9a");

    fn metadata(kind: &str, hash: &str) -> ComponentMetadata {
        ComponentMetadata {
            contract_kind: kind.to_string(),
            constructor_args_hash: hash.to_string(),
        }
    }

    #[test]
    fn test_put_then_get() {
        let mut registry = Registry::in_memory();
        let mut log = ExecutionLog::in_memory();

        assert!(!registry.exists("matic", "Treasury"));
        let outcome = registry
            .put("matic", "Treasury", TREASURY, metadata("Treasury", "aa"), false, &mut log)
            .unwrap();

        assert_eq!(outcome, PutOutcome::Inserted);
        assert_eq!(registry.get("matic", "Treasury"), Some(TREASURY));
        assert!(registry.get("mumbai", "Treasury").is_none(), "Keys are per network");
        assert!(matches!(log.entries()[0].action, LogAction::Deployed { .. }));
    }

    #[test]
    fn test_identical_put_is_noop() {
        let mut registry = Registry::in_memory();
        let mut log = ExecutionLog::in_memory();

        registry
            .put("matic", "Treasury", TREASURY, metadata("Treasury", "aa"), false, &mut log)
            .unwrap();
        let outcome = registry
            .put("matic", "Treasury", OTHER, metadata("Treasury", "aa"), false, &mut log)
            .unwrap();

        assert_eq!(outcome, PutOutcome::Unchanged);
        assert_eq!(registry.get("matic", "Treasury"), Some(TREASURY));
        assert_eq!(log.entries().len(), 2, "Every put is logged");
    }

    #[test]
    fn test_conflicting_put_is_rejected() {
        let mut registry = Registry::in_memory();
        let mut log = ExecutionLog::in_memory();

        registry
            .put("matic", "PoolUSDC", TREASURY, metadata("Pool", "aa"), false, &mut log)
            .unwrap();

        let err = registry
            .put("matic", "PoolUSDC", OTHER, metadata("ZapPool", "aa"), false, &mut log)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let err = registry
            .put("matic", "PoolUSDC", OTHER, metadata("Pool", "bb"), false, &mut log)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        assert_eq!(registry.get("matic", "PoolUSDC"), Some(TREASURY), "Registry untouched");
    }

    #[test]
    fn test_forced_put_supersedes() {
        let mut registry = Registry::in_memory();
        let mut log = ExecutionLog::in_memory();

        registry
            .put("matic", "TreasuryFund", TREASURY, metadata("TreasuryFund", "aa"), false, &mut log)
            .unwrap();
        let outcome = registry
            .put("matic", "TreasuryFund", OTHER, metadata("TreasuryFund", "bb"), true, &mut log)
            .unwrap();

        assert_eq!(outcome, PutOutcome::Replaced { previous: TREASURY });
        assert_eq!(registry.get("matic", "TreasuryFund"), Some(OTHER));
    }

    #[test]
    fn test_require_missing_is_unresolved() {
        let registry = Registry::in_memory();
        let err = registry.require("matic", "Oracle").unwrap_err();
        assert!(matches!(err, Error::UnresolvedDependency { ref component, .. } if component == "Oracle"));
    }

    #[test]
    fn test_persistence_survives_reopen() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        let mut log = ExecutionLog::in_memory();

        {
            let mut registry = Registry::open(temp_dir.path()).unwrap();
            registry
                .put("matic", "Treasury", TREASURY, metadata("Treasury", "aa"), false, &mut log)
                .unwrap();
            registry
                .put("matic", "Treasury", OTHER, metadata("Treasury", "bb"), true, &mut log)
                .unwrap();
        }

        let registry = Registry::open(temp_dir.path()).unwrap();
        assert_eq!(registry.len(), 1, "Superseded records fold into one entry");
        assert_eq!(registry.get("matic", "Treasury"), Some(OTHER));

        let raw = std::fs::read_to_string(temp_dir.path().join(REGISTRY_FILENAME)).unwrap();
        assert_eq!(raw.lines().count(), 2, "Records are append-only");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_recorded_entry_survives_log_failure() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        // Every write to /dev/full fails with ENOSPC.
        let mut log = ExecutionLog::open(Path::new("/dev/full")).unwrap();

        {
            let mut registry = Registry::open(temp_dir.path()).unwrap();
            let err = registry
                .put("matic", "Treasury", TREASURY, metadata("Treasury", "aa"), false, &mut log)
                .unwrap_err();
            assert!(matches!(err, Error::Persistence(_)));
            assert_eq!(registry.get("matic", "Treasury"), Some(TREASURY));
        }

        let registry = Registry::open(temp_dir.path()).unwrap();
        assert_eq!(registry.get("matic", "Treasury"), Some(TREASURY));
    }

    #[test]
    fn test_concurrent_open_is_locked() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");

        let _first = Registry::open(temp_dir.path()).unwrap();
        let err = Registry::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));

        assert!(Registry::read_only(temp_dir.path()).is_ok());
    }

    #[test]
    fn test_corrupted_registry_is_rejected() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join(REGISTRY_FILENAME), "{ invalid json }\n").unwrap();

        let err = Registry::open(temp_dir.path()).unwrap_err();
        assert!(matches!(err, Error::Persistence(ref msg) if msg.contains(":1:")));
    }
}
