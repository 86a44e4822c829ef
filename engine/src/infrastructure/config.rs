//! Configuration file IO
//! YAML mapping of process definitions. Loads take a shared file lock,
//! saves an exclusive one. Validation covers every rule a definition map
//! must satisfy before the scheduler will touch it.

use crate::domain::services::dependency_graph;
use crate::domain::{DomainError, ProcessDef};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// On-disk document shape
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    processes: BTreeMap<String, ProcessDef>,
}

/// Parse and validate a config document from a string
pub fn parse_str(content: &str) -> Result<BTreeMap<String, Arc<ProcessDef>>, DomainError> {
    let file: ConfigFile =
        serde_yaml::from_str(content).map_err(|e| DomainError::ConfigInvalid {
            field: "processes".to_string(),
            reason: e.to_string(),
        })?;

    let mut defs = BTreeMap::new();
    for (name, mut def) in file.processes {
        if def.name.is_empty() {
            def.name = name.clone();
        } else if def.name != name {
            return Err(DomainError::ConfigInvalid {
                field: format!("{}.name", name),
                reason: format!("name '{}' does not match its key", def.name),
            });
        }
        def.validate()?;
        defs.insert(name, Arc::new(def));
    }

    validate_map(&defs)?;
    Ok(defs)
}

/// Graph-level validation over the enabled definitions: dependency targets
/// must exist and be enabled, and there must be no cycle.
pub fn validate_map(defs: &BTreeMap<String, Arc<ProcessDef>>) -> Result<(), DomainError> {
    let enabled: BTreeMap<String, Arc<ProcessDef>> = defs
        .iter()
        .filter(|(_, d)| d.enabled)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    dependency_graph::start_order(&enabled)?;
    Ok(())
}

/// Load and validate the config file under a shared lock
pub fn load(path: &Path) -> Result<BTreeMap<String, Arc<ProcessDef>>, DomainError> {
    let mut file = File::open(path).map_err(|e| DomainError::ConfigInvalid {
        field: path.display().to_string(),
        reason: format!("cannot open config file: {}", e),
    })?;
    file.lock_shared().map_err(|e| DomainError::ConfigInvalid {
        field: path.display().to_string(),
        reason: format!("cannot lock config file: {}", e),
    })?;
    let mut content = String::new();
    let read_result = file.read_to_string(&mut content);
    let _ = file.unlock();
    read_result.map_err(|e| DomainError::ConfigInvalid {
        field: path.display().to_string(),
        reason: format!("cannot read config file: {}", e),
    })?;

    let defs = parse_str(&content)?;
    info!(
        path = %path.display(),
        processes = defs.len(),
        "Loaded configuration"
    );
    Ok(defs)
}

/// Serialize the live definition map back to disk under an exclusive lock.
/// Formatting is not preserved; a reload of the written file yields an
/// equivalent definition map.
pub fn save(path: &Path, defs: &BTreeMap<String, Arc<ProcessDef>>) -> Result<(), DomainError> {
    let document = ConfigFile {
        processes: defs
            .iter()
            .map(|(name, def)| (name.clone(), (**def).clone()))
            .collect(),
    };
    let content = serde_yaml::to_string(&document).map_err(|e| DomainError::Internal {
        cause: format!("config serialization failed: {}", e),
    })?;

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|e| DomainError::ConfigInvalid {
            field: path.display().to_string(),
            reason: format!("cannot open config file for writing: {}", e),
        })?;
    file.lock_exclusive().map_err(|e| DomainError::ConfigInvalid {
        field: path.display().to_string(),
        reason: format!("cannot lock config file: {}", e),
    })?;
    let write_result = file
        .set_len(0)
        .and_then(|_| file.write_all(content.as_bytes()))
        .and_then(|_| file.sync_all());
    let _ = file.unlock();
    write_result.map_err(|e| DomainError::ConfigInvalid {
        field: path.display().to_string(),
        reason: format!("cannot write config file: {}", e),
    })?;

    info!(path = %path.display(), processes = defs.len(), "Saved configuration");
    Ok(())
}
