//! Isolation core — the trusted computing base.
//!
//! All enforcement happens here: exec-time classification, scoped
//! privilege transitions, trap verdicts, and the audit trail.

pub mod admin;
pub mod arch;
pub mod audit;
pub mod classifier;
pub mod enforcer;
pub mod registry;
pub mod rules;
pub mod task;

use std::sync::Arc;

use crate::types::{
    Capability, Decision, DomainId, FaultClass, FaultInfo, TaskId, TaskState, TrapVerdict,
};

use self::admin::AdminGate;
use self::arch::PrivilegeBackend;
use self::audit::{AuditLog, TrapHandler};
use self::classifier::{ClassifyError, ExecClassifier};
use self::enforcer::{ElevationGuard, EnforcerError, TransitionEnforcer};
use self::registry::DomainRegistry;
use self::rules::RuleSet;
use self::task::{TaskError, TaskTable};

/// Tunables fixed at core construction.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Maximum retained audit records.
    pub audit_capacity: usize,
    /// Fault classes that terminate the offending task.
    pub fatal_faults: Vec<FaultClass>,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            audit_capacity: 1024,
            fatal_faults: vec![FaultClass::PrivilegeViolation],
        }
    }
}

/// The wired isolation core: one registry, one rule set, one task
/// table, and the hooks the embedding kernel calls.
///
/// The exec, privileged-op, and fault hooks are synchronous and safe
/// to call concurrently from any task context.
pub struct IsolationCore {
    registry: Arc<DomainRegistry>,
    tasks: Arc<TaskTable>,
    classifier: Arc<ExecClassifier>,
    enforcer: TransitionEnforcer,
    traps: TrapHandler,
    audit: Arc<AuditLog>,
}

impl IsolationCore {
    /// Wire the core from a sealed registry, an initial rule set, and
    /// an architecture backend.
    pub fn new(
        registry: DomainRegistry,
        rules: RuleSet,
        backend: Arc<dyn PrivilegeBackend>,
        options: CoreOptions,
    ) -> Self {
        let registry = Arc::new(registry);
        let tasks = Arc::new(TaskTable::new());
        let audit = Arc::new(AuditLog::new(options.audit_capacity));
        let classifier = Arc::new(ExecClassifier::new(
            Arc::clone(&registry),
            rules,
            Arc::clone(&tasks),
            Arc::clone(&backend),
            Arc::clone(&audit),
        ));
        let enforcer = TransitionEnforcer::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            backend,
            Arc::clone(&audit),
        );
        let traps = TrapHandler::new(
            Arc::clone(&tasks),
            Arc::clone(&audit),
            options.fatal_faults,
        );
        Self {
            registry,
            tasks,
            classifier,
            enforcer,
            traps,
            audit,
        }
    }

    /// Start tracking a task before its first exec.
    pub fn adopt(&self, task: TaskId) -> Result<(), TaskError> {
        self.tasks.adopt(task)
    }

    /// Image-replacement hook. See [`ExecClassifier::on_exec`].
    pub fn on_exec(&self, task: TaskId, path: &str) -> Result<DomainId, ClassifyError> {
        self.classifier.on_exec(task, path)
    }

    /// Fork hook: the child inherits the parent's domain at baseline.
    pub fn on_fork(&self, parent: TaskId, child: TaskId) -> Result<Option<DomainId>, TaskError> {
        self.classifier.on_fork(parent, child)
    }

    /// Exit hook: terminates the task and revokes any held grant.
    pub fn on_exit(&self, task: TaskId) -> Option<TaskState> {
        self.tasks.terminate(task)
    }

    /// Privileged-operation hook. See [`TransitionEnforcer::on_privileged_op`].
    pub fn on_privileged_op(&self, task: TaskId, capability: &Capability) -> Decision {
        self.enforcer.on_privileged_op(task, capability)
    }

    /// Syscall-filter hook.
    pub fn check_syscall(&self, task: TaskId, name: &str) -> Decision {
        self.enforcer.check_syscall(task, name)
    }

    /// Request a scoped elevation. See [`TransitionEnforcer::elevate`].
    pub fn elevate(
        &self,
        task: TaskId,
        capability: Capability,
    ) -> Result<ElevationGuard<'_>, EnforcerError> {
        self.enforcer.elevate(task, capability)
    }

    /// Trap-delivery hook. See [`TrapHandler::on_fault`].
    pub fn on_fault(&self, task: TaskId, fault: FaultInfo) -> TrapVerdict {
        self.traps.on_fault(task, fault)
    }

    /// The current domain of a task, if classified.
    pub fn domain_of(&self, task: TaskId) -> Option<DomainId> {
        self.tasks.domain_of(task)
    }

    /// Classify a path without touching any task.
    pub fn classify_only(&self, path: &str) -> Option<DomainId> {
        self.classifier.classify_only(path)
    }

    /// The sealed domain registry.
    pub fn registry(&self) -> &DomainRegistry {
        &self.registry
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Build the administrative gate over this core.
    pub fn admin_gate(&self) -> AdminGate {
        AdminGate::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.classifier),
            Arc::clone(&self.tasks),
            Arc::clone(&self.audit),
        )
    }
}
