//! Configuration loading and validation.
//!
//! One operator-owned `straylight.toml` pointing at the domain
//! definitions and classification rules files, plus core tunables.
//! Domains and rules live in their own files so the admin path can
//! replace rules without touching the rest.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::kernel::CoreOptions;
use crate::types::FaultClass;

/// Top-level operator configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// File locations.
    pub paths: PathsConfig,

    /// Core tunables.
    #[serde(default)]
    pub core: CoreConfig,
}

/// File locations named by the configuration.
#[derive(Debug, Deserialize)]
pub struct PathsConfig {
    /// Domain definitions (TOML, loaded once at boot).
    pub domains_file: PathBuf,

    /// Classification rules (TOML, replaceable via the admin path).
    pub rules_file: PathBuf,

    /// Where `simulate` exports the audit log as JSON lines.
    #[serde(default)]
    pub audit_export: Option<PathBuf>,
}

/// Core tunables.
#[derive(Debug, Deserialize)]
pub struct CoreConfig {
    /// Maximum retained audit records.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,

    /// Fault classes that terminate the offending task.
    #[serde(default = "default_fatal_faults")]
    pub fatal_faults: Vec<FaultClass>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            audit_capacity: default_audit_capacity(),
            fatal_faults: default_fatal_faults(),
        }
    }
}

impl CoreConfig {
    /// Convert to the core's construction options.
    pub fn to_options(&self) -> CoreOptions {
        CoreOptions {
            audit_capacity: self.audit_capacity,
            fatal_faults: self.fatal_faults.clone(),
        }
    }
}

// Default value functions for serde

fn default_audit_capacity() -> usize {
    1024
}

fn default_fatal_faults() -> Vec<FaultClass> {
    vec![FaultClass::PrivilegeViolation]
}

/// Load the operator config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.straylight/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".straylight"))
}
