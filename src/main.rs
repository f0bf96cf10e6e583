#![allow(missing_docs)]

//! Straylight operator CLI.
//!
//! One-shot subcommands over the operator's configuration: validate a
//! domain/rule set, classify a path, replay a scenario through a wired
//! core, and pretty-print an exported audit log.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use straylight::config::{load_config, Config};
use straylight::kernel::arch::aarch64::Aarch64Backend;
use straylight::kernel::registry::DomainRegistry;
use straylight::kernel::rules::RuleSet;
use straylight::kernel::IsolationCore;
use straylight::scenario::Scenario;

#[derive(Parser)]
#[command(name = "straylight", about = "Domain isolation core operator tools")]
struct Cli {
    /// Path to the operator config.
    #[arg(long, default_value = "straylight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the config, domain definitions, and classification rules.
    Check,
    /// Classify a resolved executable path against the rules.
    Classify {
        /// Path to classify.
        path: String,
    },
    /// Replay a scenario file through a wired core.
    Simulate {
        /// Scenario file (TOML).
        scenario: PathBuf,
        /// Also write JSON logs to this directory.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Pretty-print an exported audit log (JSON lines).
    Audit {
        /// Exported audit file.
        file: PathBuf,
    },
}

/// Load and validate the registry and rule set named by the config.
fn load_policy(config: &Config) -> Result<(DomainRegistry, RuleSet)> {
    let backend = Aarch64Backend::new();
    let registry = DomainRegistry::load(&config.paths.domains_file, &backend)
        .context("failed to load domain definitions")?;
    let rules = RuleSet::load(&config.paths.rules_file, &registry)
        .context("failed to load classification rules")?;
    Ok((registry, rules))
}

fn cmd_check(config: &Config) -> Result<()> {
    let (registry, rules) = load_policy(config)?;
    println!("domains: {}", registry.len());
    println!("rules: {}", rules.len());
    for pattern in rules.patterns() {
        println!("  {pattern}");
    }
    match rules.default_domain() {
        Some(domain) => println!("default domain: {domain}"),
        None => println!("no default domain: unmatched execs will be denied"),
    }
    println!("ok");
    Ok(())
}

fn cmd_classify(config: &Config, path: &str) -> Result<()> {
    let (registry, rules) = load_policy(config)?;
    match rules.classify(path) {
        Some(domain) => {
            let name = registry
                .lookup(domain)
                .map(|p| p.name.as_str())
                .unwrap_or("?");
            println!("{path} -> domain {domain} ({name})");
        }
        None => println!("{path} -> denied (no rule, no default domain)"),
    }
    Ok(())
}

fn cmd_simulate(config: &Config, scenario_path: &PathBuf) -> Result<()> {
    let (registry, rules) = load_policy(config)?;
    let core = IsolationCore::new(
        registry,
        rules,
        Arc::new(Aarch64Backend::new()),
        config.core.to_options(),
    );
    let scenario = Scenario::load(scenario_path)?;
    info!(steps = scenario.step.len(), "replaying scenario");

    let reports = straylight::scenario::run(&core, &scenario);
    for report in &reports {
        println!(
            "[{:>3}] {:<48} {}",
            report.index, report.action, report.outcome
        );
    }

    println!(
        "audit: {} records retained, {} dropped",
        core.audit().snapshot().len(),
        core.audit().dropped()
    );
    if let Some(export) = &config.paths.audit_export {
        let mut file = std::fs::File::create(export)
            .with_context(|| format!("failed to create audit export at {}", export.display()))?;
        core.audit().export(&mut file)?;
        println!("audit export written to {}", export.display());
    }
    Ok(())
}

fn cmd_audit(file: &PathBuf) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read audit log at {}", file.display()))?;
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let record: serde_json::Value =
            serde_json::from_str(line).context("malformed audit record")?;
        let timestamp = record["timestamp"].as_str().unwrap_or("-");
        let task = record["task"].as_u64();
        let domain = record["domain"].as_u64();
        println!(
            "{timestamp} task={} domain={} {}",
            task.map_or("-".to_owned(), |t| t.to_string()),
            domain.map_or("-".to_owned(), |d| d.to_string()),
            record["kind"]
        );
    }
    Ok(())
}

/// The `--config` path as given. When the flag was left at its default
/// and no `straylight.toml` exists in the working directory, fall back
/// to `~/.straylight/straylight.toml`.
fn resolve_config_path(cli: &Cli) -> PathBuf {
    if cli.config != PathBuf::from("straylight.toml") || cli.config.exists() {
        return cli.config.clone();
    }
    match straylight::config::config_dir() {
        Ok(dir) => dir.join("straylight.toml"),
        Err(_) => cli.config.clone(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Simulation gets the file layer; everything else is console-only.
    let _guard = match &cli.command {
        Command::Simulate {
            log_dir: Some(dir), ..
        } => Some(straylight::logging::init_simulation(dir)?),
        _ => {
            straylight::logging::init_cli();
            None
        }
    };

    let load = || -> Result<Config> {
        let path = resolve_config_path(&cli);
        load_config(&path).context("failed to load configuration")
    };
    match &cli.command {
        Command::Audit { file } => cmd_audit(file),
        Command::Check => cmd_check(&load()?),
        Command::Classify { path } => cmd_classify(&load()?, path),
        Command::Simulate { scenario, .. } => cmd_simulate(&load()?, scenario),
    }
}
