//! Privilege transition enforcer.
//!
//! Elevation is keyed by verified domain identity, never by anything
//! derived from the executable path. Each grant is scoped to a single
//! capability and checked against the registry at the instant of the
//! transition; nothing is cached. Revocation is automatic: guard drop,
//! trap delivery, exec, and exit all restore the baseline.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::kernel::arch::PrivilegeBackend;
use crate::kernel::audit::{AuditKind, AuditLog, AuditRecord};
use crate::kernel::registry::DomainRegistry;
use crate::kernel::task::TaskTable;
use crate::types::{Capability, Decision, DomainId, TaskId, TaskState};

/// Elevation request failures. A denied request fails the operation;
/// it never degrades to allow.
#[derive(Debug, Error)]
pub enum EnforcerError {
    /// The capability is not in the active domain's policy.
    #[error("domain {domain} does not grant {capability} to task {task}")]
    CapabilityDenied {
        /// Requesting task.
        task: TaskId,
        /// Its active domain.
        domain: DomainId,
        /// The refused capability.
        capability: Capability,
    },
    /// The task already holds a scoped grant; one at a time.
    #[error("task {0} already holds an elevation")]
    AlreadyElevated(TaskId),
    /// The task has not been classified by an exec yet.
    #[error("task {0} is unclassified")]
    Unclassified(TaskId),
    /// The task is not tracked.
    #[error("task {0} is not tracked")]
    Unknown(TaskId),
    /// The task has terminated.
    #[error("task {0} has terminated")]
    Terminated(TaskId),
}

/// Authorizes and applies capability-scoped privilege transitions.
pub struct TransitionEnforcer {
    registry: Arc<DomainRegistry>,
    tasks: Arc<TaskTable>,
    backend: Arc<dyn PrivilegeBackend>,
    audit: Arc<AuditLog>,
}

impl TransitionEnforcer {
    /// Create an enforcer over the sealed registry.
    pub fn new(
        registry: Arc<DomainRegistry>,
        tasks: Arc<TaskTable>,
        backend: Arc<dyn PrivilegeBackend>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            registry,
            tasks,
            backend,
            audit,
        }
    }

    /// Synchronous allow/deny check for a privileged operation.
    ///
    /// Runs on the trap path: one read lock, no allocation on either
    /// outcome, bounded time. The policy is consulted at call time; a
    /// previous allow is never reused.
    pub fn on_privileged_op(&self, task: TaskId, capability: &Capability) -> Decision {
        let allowed = self
            .tasks
            .with_entry(task, |entry| match &entry.state {
                TaskState::Classified { domain } | TaskState::Elevated { domain, .. } => self
                    .registry
                    .lookup(*domain)
                    .is_some_and(|policy| policy.permits(capability)),
                TaskState::Unclassified | TaskState::Terminated => false,
            })
            .unwrap_or(false);
        if allowed {
            Decision::Allow
        } else {
            self.deny_audit(task, capability);
            Decision::Deny
        }
    }

    /// Syscall check against the active domain's filter.
    pub fn check_syscall(&self, task: TaskId, name: &str) -> Decision {
        let allowed = self
            .tasks
            .with_entry(task, |entry| match &entry.state {
                TaskState::Classified { domain } | TaskState::Elevated { domain, .. } => self
                    .registry
                    .lookup(*domain)
                    .is_some_and(|policy| policy.syscalls.permits(name)),
                TaskState::Unclassified | TaskState::Terminated => false,
            })
            .unwrap_or(false);
        if allowed {
            Decision::Allow
        } else {
            warn!(task = %task, syscall = name, "syscall denied");
            self.audit.record(AuditRecord::new(
                Some(task),
                self.tasks.domain_of(task),
                AuditKind::SyscallDenied {
                    name: name.to_owned(),
                },
            ));
            Decision::Deny
        }
    }

    /// Grant one scoped capability for the duration of the returned guard.
    ///
    /// The transition is checked against the registry inside the task
    /// entry's critical section and applied through the backend. The
    /// guard restores the baseline when dropped; a trap or exec in the
    /// meantime restores it earlier, and the drop then does nothing.
    pub fn elevate(
        &self,
        task: TaskId,
        capability: Capability,
    ) -> Result<ElevationGuard<'_>, EnforcerError> {
        let outcome = self.tasks.mutate(task, |entry| {
            let domain = match &entry.state {
                TaskState::Classified { domain } => *domain,
                TaskState::Elevated { .. } => return Err(EnforcerError::AlreadyElevated(task)),
                TaskState::Unclassified => return Err(EnforcerError::Unclassified(task)),
                TaskState::Terminated => return Err(EnforcerError::Terminated(task)),
            };
            let policy = self
                .registry
                .lookup(domain)
                .filter(|policy| policy.permits(&capability))
                .ok_or_else(|| EnforcerError::CapabilityDenied {
                    task,
                    domain,
                    capability: capability.clone(),
                })?;
            entry.active = self.backend.grant(&entry.baseline, &capability);
            entry.state = TaskState::Elevated {
                domain,
                capability: capability.clone(),
            };
            debug!(
                task = %task,
                domain = %domain,
                name = %policy.name,
                capability = %capability,
                "scoped elevation granted"
            );
            Ok(())
        });

        match outcome {
            Ok(Ok(())) => Ok(ElevationGuard {
                enforcer: self,
                task,
                released: false,
            }),
            Ok(Err(denied)) => {
                if let EnforcerError::CapabilityDenied { capability, .. } = &denied {
                    self.deny_audit(task, capability);
                }
                Err(denied)
            }
            Err(crate::kernel::task::TaskError::Terminated(id)) => {
                Err(EnforcerError::Terminated(id))
            }
            Err(crate::kernel::task::TaskError::Unknown(id))
            | Err(crate::kernel::task::TaskError::AlreadyTracked(id)) => {
                Err(EnforcerError::Unknown(id))
            }
        }
    }

    /// Restore the task's baseline if it holds a grant. Idempotent.
    pub(crate) fn demote(&self, task: TaskId) {
        self.tasks.demote(task);
    }

    fn deny_audit(&self, task: TaskId, capability: &Capability) {
        warn!(task = %task, capability = %capability, "elevation denied");
        self.audit.record(AuditRecord::new(
            Some(task),
            self.tasks.domain_of(task),
            AuditKind::ElevationDenied {
                capability: capability.clone(),
            },
        ));
    }
}

/// Live scoped grant. Dropping it ends the elevation.
#[must_use = "dropping the guard immediately revokes the elevation"]
pub struct ElevationGuard<'a> {
    enforcer: &'a TransitionEnforcer,
    task: TaskId,
    released: bool,
}

impl ElevationGuard<'_> {
    /// The elevated task.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// End the elevation now rather than at scope end.
    pub fn release(mut self) {
        self.revoke();
    }

    fn revoke(&mut self) {
        if !self.released {
            self.released = true;
            self.enforcer.demote(self.task);
        }
    }
}

impl Drop for ElevationGuard<'_> {
    fn drop(&mut self) {
        self.revoke();
    }
}
