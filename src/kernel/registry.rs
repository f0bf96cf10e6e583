//! Domain registry — process-wide table of isolation domains.
//!
//! Writes happen only while the registry is being built, at boot or
//! during an administrative reconfiguration that constructs a fresh
//! registry. Once sealed behind an `Arc` it is read-concurrently from
//! the exec and trap paths with no locking.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::kernel::arch::PrivilegeBackend;
use crate::types::{DomainId, DomainPolicy, ExceptionLevel};

/// Registry construction errors. All are fatal to boot.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The same domain id was registered twice.
    #[error("domain {0} is already registered")]
    Conflict(DomainId),
    /// A domain names a privilege ceiling the backend cannot express.
    #[error("domain {domain} ceiling {ceiling:?} exceeds backend maximum {max:?}")]
    CeilingUnsupported {
        /// Offending domain.
        domain: DomainId,
        /// Requested ceiling.
        ceiling: ExceptionLevel,
        /// Backend maximum.
        max: ExceptionLevel,
    },
    /// The definitions file could not be read.
    #[error("failed to read domain definitions at {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The definitions file could not be parsed.
    #[error("failed to parse domain definitions at {path}: {source}")]
    Parse {
        /// File path.
        path: String,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// One domain definition as written by the operator.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainDef {
    /// Domain identifier.
    pub id: DomainId,
    /// Policy body.
    #[serde(flatten)]
    pub policy: DomainPolicy,
}

#[derive(Debug, Deserialize)]
struct DomainsFile {
    #[serde(default)]
    domain: Vec<DomainDef>,
}

/// Process-wide table mapping a domain id to its policy.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: HashMap<DomainId, DomainPolicy>,
}

impl DomainRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain. Rejects duplicate ids.
    pub fn register(&mut self, id: DomainId, policy: DomainPolicy) -> Result<(), RegistryError> {
        if self.domains.contains_key(&id) {
            return Err(RegistryError::Conflict(id));
        }
        debug!(domain = %id, name = %policy.name, ceiling = ?policy.ceiling, "domain registered");
        self.domains.insert(id, policy);
        Ok(())
    }

    /// Look up a domain's policy.
    pub fn lookup(&self, id: DomainId) -> Option<&DomainPolicy> {
        self.domains.get(&id)
    }

    /// Whether a domain id is registered.
    pub fn contains(&self, id: DomainId) -> bool {
        self.domains.contains_key(&id)
    }

    /// Number of registered domains.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Build a registry from operator definitions, validating each
    /// ceiling against the backend.
    pub fn from_definitions(
        defs: Vec<DomainDef>,
        backend: &dyn PrivilegeBackend,
    ) -> Result<Self, RegistryError> {
        let max = backend.max_ceiling();
        let mut registry = Self::new();
        for def in defs {
            if def.policy.ceiling > max {
                return Err(RegistryError::CeilingUnsupported {
                    domain: def.id,
                    ceiling: def.policy.ceiling,
                    max,
                });
            }
            registry.register(def.id, def.policy)?;
        }
        Ok(registry)
    }

    /// Load and validate a registry from a TOML definitions file.
    pub fn load(
        path: impl AsRef<Path>,
        backend: &dyn PrivilegeBackend,
    ) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: DomainsFile = toml::from_str(&contents).map_err(|source| RegistryError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_definitions(file.domain, backend)
    }
}
