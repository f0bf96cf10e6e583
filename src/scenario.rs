//! Offline scenario replay.
//!
//! A scenario is an ordered list of task-lifecycle steps (spawn, exec,
//! fork, privileged op, syscall, fault, exit) written in TOML. The
//! `simulate` subcommand drives a fully wired core through the steps so
//! operators can validate a domain/rule configuration before deploying
//! it to a target.

use std::path::Path;

use serde::Deserialize;

use crate::kernel::IsolationCore;
use crate::types::{Capability, Decision, FaultClass, FaultInfo, TaskId};

/// One scenario step.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Start tracking a task.
    Spawn {
        /// Task id.
        task: TaskId,
    },
    /// Replace the task's image with the executable at `path`.
    Exec {
        /// Task id.
        task: TaskId,
        /// Resolved executable path.
        path: String,
    },
    /// Fork a child from a tracked parent.
    Fork {
        /// Parent task id.
        parent: TaskId,
        /// Child task id.
        child: TaskId,
    },
    /// Request a privileged operation needing one capability.
    Op {
        /// Task id.
        task: TaskId,
        /// Required capability.
        capability: Capability,
    },
    /// Issue a syscall by name.
    Syscall {
        /// Task id.
        task: TaskId,
        /// Syscall name.
        name: String,
    },
    /// Deliver a fault to the task.
    Fault {
        /// Task id.
        task: TaskId,
        /// Faulting address.
        address: u64,
        /// Faulting instruction word, if captured.
        #[serde(default)]
        instruction: Option<u32>,
        /// Fault classification.
        class: FaultClass,
    },
    /// Exit the task.
    Exit {
        /// Task id.
        task: TaskId,
    },
}

/// An ordered scenario.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    /// Steps, run in order.
    #[serde(default)]
    pub step: Vec<Step>,
}

impl Scenario {
    /// Load a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read scenario at {}: {e}", path.display()))?;
        let scenario: Scenario = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse scenario at {}: {e}", path.display()))?;
        Ok(scenario)
    }
}

/// Outcome of one replayed step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Zero-based step index.
    pub index: usize,
    /// What was attempted.
    pub action: String,
    /// What the core decided.
    pub outcome: String,
}

fn decision_str(decision: Decision) -> &'static str {
    match decision {
        Decision::Allow => "allow",
        Decision::Deny => "deny",
    }
}

/// Replay a scenario against a wired core, one report per step.
///
/// Replay never aborts early: a denied or failed step is reported and
/// the remaining steps still run, mirroring how the live hooks fail
/// operations rather than the core.
pub fn run(core: &IsolationCore, scenario: &Scenario) -> Vec<StepReport> {
    let mut reports = Vec::with_capacity(scenario.step.len());
    for (index, step) in scenario.step.iter().enumerate() {
        let (action, outcome) = match step {
            Step::Spawn { task } => (
                format!("spawn task {task}"),
                match core.adopt(*task) {
                    Ok(()) => "tracked".to_owned(),
                    Err(e) => format!("error: {e}"),
                },
            ),
            Step::Exec { task, path } => (
                format!("exec task {task} '{path}'"),
                match core.on_exec(*task, path) {
                    Ok(domain) => format!("domain {domain}"),
                    Err(e) => format!("denied: {e}"),
                },
            ),
            Step::Fork { parent, child } => (
                format!("fork {parent} -> {child}"),
                match core.on_fork(*parent, *child) {
                    Ok(Some(domain)) => format!("inherited domain {domain}"),
                    Ok(None) => "inherited unclassified".to_owned(),
                    Err(e) => format!("error: {e}"),
                },
            ),
            Step::Op { task, capability } => (
                format!("op task {task} {capability}"),
                decision_str(core.on_privileged_op(*task, capability)).to_owned(),
            ),
            Step::Syscall { task, name } => (
                format!("syscall task {task} {name}"),
                decision_str(core.check_syscall(*task, name)).to_owned(),
            ),
            Step::Fault {
                task,
                address,
                instruction,
                class,
            } => (
                format!("fault task {task} at {address:#x} ({class:?})"),
                format!(
                    "{:?}",
                    core.on_fault(
                        *task,
                        FaultInfo {
                            address: *address,
                            instruction: *instruction,
                            class: *class,
                        },
                    )
                ),
            ),
            Step::Exit { task } => (
                format!("exit task {task}"),
                match core.on_exit(*task) {
                    Some(_) => "terminated".to_owned(),
                    None => "not tracked".to_owned(),
                },
            ),
        };
        reports.push(StepReport {
            index,
            action,
            outcome,
        });
    }
    reports
}
