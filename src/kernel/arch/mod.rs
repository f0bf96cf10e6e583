//! Architecture backends for privilege transitions.
//!
//! The enforcer never writes processor state directly. It asks a
//! [`PrivilegeBackend`] to compute the per-task hardware context for a
//! domain's baseline and for each scoped grant, and the embedding kernel
//! installs that context at the next exception return. One backend
//! variant per architecture; AArch64 is provided.

pub mod aarch64;

use crate::types::{Capability, DomainPolicy, ExceptionLevel};

/// The slice of hardware context the core owns per task.
///
/// `spsr` is the saved program status word restored on exception return.
/// `enables` is an architecture-defined bitmask of unprivileged-access
/// enables for instruction-class grants (counter, PMU, debug, cache ops).
/// Memory-region grants do not appear here: translation-table attachment
/// is owned by the embedding kernel and keyed off the task's recorded
/// capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SavedContext {
    /// Saved program status word.
    pub spsr: u64,
    /// Facility-enable bitmask for the active grant set.
    pub enables: u64,
}

/// Computes hardware context words for domain baselines and scoped grants.
///
/// Implementations must be pure functions of their inputs: the enforcer
/// calls them under the task-entry lock on the trap path, so they may not
/// block, allocate, or consult mutable global state.
pub trait PrivilegeBackend: Send + Sync {
    /// Backend name for logs and audit records.
    fn name(&self) -> &'static str;

    /// Highest exception level this backend can express. Registry
    /// construction rejects domain ceilings above it.
    fn max_ceiling(&self) -> ExceptionLevel;

    /// The context a task runs under with no capability granted.
    fn baseline(&self, policy: &DomainPolicy) -> SavedContext;

    /// The context with exactly one capability granted on top of the
    /// baseline. Callers have already verified the capability against
    /// the domain's policy.
    fn grant(&self, baseline: &SavedContext, capability: &Capability) -> SavedContext;
}
