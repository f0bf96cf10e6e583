//! Exec-time classifier.
//!
//! Invoked synchronously on every image replacement, before the new
//! image's entry point runs. Classification and domain assignment are
//! one critical section over the task entry, so there is no window
//! where the new image runs under the old domain or under none. A
//! failed classification leaves the task exactly as it was.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kernel::arch::PrivilegeBackend;
use crate::kernel::audit::{AuditKind, AuditLog, AuditRecord};
use crate::kernel::registry::DomainRegistry;
use crate::kernel::rules::RuleSet;
use crate::kernel::task::{TaskError, TaskTable};
use crate::types::{DomainId, TaskId, TaskState};

/// Classification failures. All fail the requesting exec, never the core.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// No rule matched and no default domain is configured.
    #[error("no rule matches '{path}' and no default domain is configured")]
    UnclassifiedExecutable {
        /// The path that failed to classify.
        path: String,
    },
    /// The matched rule targets a domain missing from the registry.
    #[error("classification of '{path}' targets unregistered domain {domain}")]
    UnknownDomain {
        /// The classified path.
        path: String,
        /// The missing domain.
        domain: DomainId,
    },
    /// The task is not tracked or already terminated.
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Classifies tasks into domains at image-replacement time.
pub struct ExecClassifier {
    registry: Arc<DomainRegistry>,
    rules: RwLock<RuleSet>,
    tasks: Arc<TaskTable>,
    backend: Arc<dyn PrivilegeBackend>,
    audit: Arc<AuditLog>,
}

impl ExecClassifier {
    /// Create a classifier over a sealed registry and an initial rule set.
    pub fn new(
        registry: Arc<DomainRegistry>,
        rules: RuleSet,
        tasks: Arc<TaskTable>,
        backend: Arc<dyn PrivilegeBackend>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            registry,
            rules: RwLock::new(rules),
            tasks,
            backend,
            audit,
        }
    }

    fn rules_read(&self) -> RwLockReadGuard<'_, RuleSet> {
        self.rules.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify `path` and attach the resulting domain to `task`.
    ///
    /// Called by the image-replacement path after the executable path
    /// is fully resolved. On success the task is `Classified` under the
    /// new domain with any prior elevation gone; on failure the exec
    /// must be failed by the caller and the task keeps its prior state.
    pub fn on_exec(&self, task: TaskId, path: &str) -> Result<DomainId, ClassifyError> {
        let domain = match self.rules_read().classify(path) {
            Some(domain) => domain,
            None => {
                warn!(task = %task, path, "exec denied: unclassifiable executable");
                self.audit.record(AuditRecord::new(
                    Some(task),
                    self.tasks.domain_of(task),
                    AuditKind::ExecDenied {
                        path: path.to_owned(),
                    },
                ));
                return Err(ClassifyError::UnclassifiedExecutable {
                    path: path.to_owned(),
                });
            }
        };

        // Rule sets are validated against the registry when built, so a
        // miss here means the registry and rules went out of step.
        let policy = self.registry.lookup(domain).ok_or_else(|| {
            warn!(task = %task, path, domain = %domain, "exec denied: rule targets unknown domain");
            self.audit.record(AuditRecord::new(
                Some(task),
                self.tasks.domain_of(task),
                AuditKind::ExecDenied {
                    path: path.to_owned(),
                },
            ));
            ClassifyError::UnknownDomain {
                path: path.to_owned(),
                domain,
            }
        })?;
        let baseline = self.backend.baseline(policy);

        // Single critical section: assignment and elevation reset are
        // atomic with respect to the image replacement.
        self.tasks.mutate(task, |entry| match entry.state {
            TaskState::Terminated => Err(TaskError::Terminated(task)),
            _ => {
                entry.state = TaskState::Classified { domain };
                entry.baseline = baseline;
                entry.active = baseline;
                Ok(())
            }
        })??;

        info!(task = %task, path, domain = %domain, name = %policy.name, "task classified");
        Ok(domain)
    }

    /// Inherit the parent's domain into a freshly forked child.
    pub fn on_fork(&self, parent: TaskId, child: TaskId) -> Result<Option<DomainId>, TaskError> {
        let domain = self.tasks.fork(parent, child)?;
        debug!(parent = %parent, child = %child, domain = ?domain, "fork inherited domain");
        Ok(domain)
    }

    /// Swap in a new rule set. Admin path; serialized by the write lock.
    pub(crate) fn replace_rules(&self, rules: RuleSet) -> usize {
        let count = rules.len();
        let mut guard = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        *guard = rules;
        count
    }

    /// Classify a path against the current rules without touching any
    /// task. Used by the operator CLI and the admin query surface.
    pub fn classify_only(&self, path: &str) -> Option<DomainId> {
        self.rules_read().classify(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::arch::aarch64::Aarch64Backend;
    use crate::kernel::rules::RulesFile;
    use crate::types::{Capability, DomainPolicy, ExceptionLevel, SyscallFilter};

    fn fixture() -> (ExecClassifier, Arc<TaskTable>, Arc<AuditLog>) {
        let backend: Arc<dyn PrivilegeBackend> = Arc::new(Aarch64Backend::new());
        let mut registry = DomainRegistry::new();
        for (id, name, regions) in [
            (0, "untrusted", vec![]),
            (2, "trusted-daemons", vec!["region-a".to_owned()]),
        ] {
            registry
                .register(
                    DomainId(id),
                    DomainPolicy {
                        name: name.to_owned(),
                        ceiling: ExceptionLevel::El0,
                        regions,
                        instructions: vec![],
                        syscalls: SyscallFilter::default(),
                    },
                )
                .expect("register");
        }
        let registry = Arc::new(registry);
        let file: RulesFile = toml::from_str(
            r#"
default_domain = 0

[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2
"#,
        )
        .expect("parse");
        let rules = RuleSet::compile(file, &registry).expect("compile");
        let tasks = Arc::new(TaskTable::new());
        let audit = Arc::new(AuditLog::new(16));
        let classifier = ExecClassifier::new(
            registry,
            rules,
            Arc::clone(&tasks),
            backend,
            Arc::clone(&audit),
        );
        (classifier, tasks, audit)
    }

    #[test]
    fn test_exec_assigns_matching_domain() {
        let (classifier, tasks, _) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        let domain = classifier
            .on_exec(TaskId(1), "/usr/bin/trusted-daemon")
            .expect("classify");
        assert_eq!(domain, DomainId(2));
        assert_eq!(tasks.domain_of(TaskId(1)), Some(DomainId(2)));
    }

    #[test]
    fn test_exec_falls_back_to_default_domain() {
        let (classifier, tasks, _) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        let domain = classifier
            .on_exec(TaskId(1), "/tmp/payload")
            .expect("classify");
        assert_eq!(domain, DomainId(0));
    }

    #[test]
    fn test_exec_resets_elevation_to_new_baseline() {
        let (classifier, tasks, _) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        classifier
            .on_exec(TaskId(1), "/usr/bin/trusted-daemon")
            .expect("first exec");
        tasks
            .mutate(TaskId(1), |entry| {
                entry.state = TaskState::Elevated {
                    domain: DomainId(2),
                    capability: Capability::Region("region-a".to_owned()),
                };
                entry.active.enables = 0b1;
            })
            .expect("elevate");

        classifier
            .on_exec(TaskId(1), "/tmp/payload")
            .expect("second exec");
        tasks
            .with_entry(TaskId(1), |entry| {
                assert_eq!(
                    *entry.state(),
                    TaskState::Classified { domain: DomainId(0) }
                );
                assert_eq!(entry.active_context(), entry.baseline_context());
            })
            .expect("entry");
    }

    #[test]
    fn test_failed_exec_preserves_prior_domain() {
        let (classifier, tasks, audit) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        classifier
            .on_exec(TaskId(1), "/usr/bin/trusted-daemon")
            .expect("first exec");

        // Remove the default so the next classification fails outright.
        classifier.replace_rules(RuleSet::empty());
        let result = classifier.on_exec(TaskId(1), "/tmp/payload");
        assert!(matches!(
            result,
            Err(ClassifyError::UnclassifiedExecutable { .. })
        ));
        assert_eq!(tasks.domain_of(TaskId(1)), Some(DomainId(2)));

        let snapshot = audit.snapshot();
        assert!(matches!(snapshot.last().map(|r| &r.kind),
            Some(AuditKind::ExecDenied { path }) if path == "/tmp/payload"));
    }

    #[test]
    fn test_exec_on_terminated_task_fails() {
        let (classifier, tasks, _) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        tasks.terminate(TaskId(1)).expect("terminate");
        let result = classifier.on_exec(TaskId(1), "/tmp/payload");
        assert!(matches!(
            result,
            Err(ClassifyError::Task(TaskError::Terminated(TaskId(1))))
        ));
    }

    #[test]
    fn test_exec_on_untracked_task_fails() {
        let (classifier, _, _) = fixture();
        let result = classifier.on_exec(TaskId(99), "/tmp/payload");
        assert!(matches!(
            result,
            Err(ClassifyError::Task(TaskError::Unknown(TaskId(99))))
        ));
    }

    #[test]
    fn test_fork_then_exec_reclassifies_child() {
        let (classifier, tasks, _) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        classifier
            .on_exec(TaskId(1), "/usr/bin/trusted-daemon")
            .expect("exec");
        let inherited = classifier.on_fork(TaskId(1), TaskId(2)).expect("fork");
        assert_eq!(inherited, Some(DomainId(2)));

        let domain = classifier
            .on_exec(TaskId(2), "/tmp/payload")
            .expect("child exec");
        assert_eq!(domain, DomainId(0));
        // Parent keeps its own domain.
        assert_eq!(tasks.domain_of(TaskId(1)), Some(DomainId(2)));
    }
}
