// Core types for the isolation domain model.

use serde::{Deserialize, Serialize};

/// Identifier of an isolation domain. Small integer, assigned by the
/// operator in the domain definitions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub u16);

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a task tracked by the core. Matches the embedding
/// scheduler's task id; the core never dereferences it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// AArch64 exception levels, ordered lowest to highest privilege.
///
/// A domain's ceiling is the highest level its tasks may ever run at;
/// the enforcer never grants a transition above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionLevel {
    /// Unprivileged application level.
    El0,
    /// OS kernel level.
    El1,
    /// Hypervisor level.
    El2,
    /// Secure monitor level.
    El3,
}

/// A privileged instruction class grantable as a scoped capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionClass {
    /// Cache maintenance by set/way and by VA.
    CacheMaintenance,
    /// Direct physical counter and timer register access.
    PhysicalTimer,
    /// Performance monitor unit access.
    PerfMonitor,
    /// Self-hosted debug register access.
    Debug,
}

/// A single scoped permission a domain's policy may grant.
///
/// Capabilities are deliberately narrow: one memory region or one
/// instruction class per grant, never a blanket privilege drop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Access to one named memory region from the domain's allow-list.
    Region(String),
    /// Use of one privileged instruction class.
    Instructions(InstructionClass),
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Region(name) => write!(f, "region:{name}"),
            Capability::Instructions(class) => write!(f, "instructions:{class:?}"),
        }
    }
}

/// Syscall filter applied to a domain's tasks.
///
/// `deny` takes precedence over `allow`. An empty `allow` list permits
/// everything not denied. Entries support a trailing `*` wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallFilter {
    /// Explicitly permitted syscall names. Empty means "all".
    #[serde(default)]
    pub allow: Vec<String>,
    /// Explicitly denied syscall names. Checked first.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl SyscallFilter {
    /// Whether the filter permits a syscall by name.
    pub fn permits(&self, name: &str) -> bool {
        if self.deny.iter().any(|d| pattern_matches(d, name)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|a| pattern_matches(a, name))
    }
}

/// Exact match, or prefix match when the entry carries a trailing `*`.
fn pattern_matches(entry: &str, name: &str) -> bool {
    match entry.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => entry == name,
    }
}

/// Policy attached to one isolation domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Human-readable domain name, for logs and audit records.
    pub name: String,
    /// Highest exception level this domain's tasks may reach.
    pub ceiling: ExceptionLevel,
    /// Memory regions grantable to this domain, by name.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Privileged instruction classes grantable to this domain.
    #[serde(default)]
    pub instructions: Vec<InstructionClass>,
    /// Syscall filter for this domain's tasks.
    #[serde(default)]
    pub syscalls: SyscallFilter,
}

impl DomainPolicy {
    /// Whether this policy contains the given capability.
    ///
    /// Authorization is a set-membership test on verified policy state,
    /// never a comparison against the executable path.
    pub fn permits(&self, capability: &Capability) -> bool {
        match capability {
            Capability::Region(name) => self.regions.iter().any(|r| r == name),
            Capability::Instructions(class) => self.instructions.contains(class),
        }
    }
}

/// Per-task lifecycle state.
///
/// `Unclassified -> Classified -> {Elevated <-> Classified} -> Terminated`.
/// `Terminated` is reachable from every state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Tracked but not yet through a successful exec.
    Unclassified,
    /// Running under a domain's baseline privilege state.
    Classified {
        /// Active domain.
        domain: DomainId,
    },
    /// Temporarily holding one scoped capability on top of the baseline.
    Elevated {
        /// Active domain.
        domain: DomainId,
        /// The single capability currently granted.
        capability: Capability,
    },
    /// Exited or killed; no further transitions.
    Terminated,
}

impl TaskState {
    /// The active domain, if the task is classified.
    pub fn domain(&self) -> Option<DomainId> {
        match self {
            TaskState::Classified { domain } | TaskState::Elevated { domain, .. } => Some(*domain),
            TaskState::Unclassified | TaskState::Terminated => None,
        }
    }
}

/// Outcome of a synchronous authorization check on the trap/exec path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The operation may proceed.
    Allow,
    /// The operation is refused. Never silently degraded to allow.
    Deny,
}

/// Classification of a delivered fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    /// Attempted use of privilege the active domain does not hold.
    PrivilegeViolation,
    /// Access outside the granted memory region.
    RegionViolation,
    /// Undefined or trapped instruction.
    UndefinedInstruction,
    /// Debug breakpoint or watchpoint.
    Breakpoint,
}

/// Fault details delivered by the embedding kernel's trap path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInfo {
    /// Faulting address.
    pub address: u64,
    /// Faulting instruction word, when the trap path captured it.
    pub instruction: Option<u32>,
    /// Fault classification.
    pub class: FaultClass,
}

/// Trap handler verdict for a delivered fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapVerdict {
    /// Recorded; the task continues in its baseline state.
    Logged,
    /// Recorded and the task was terminated.
    Killed,
}
