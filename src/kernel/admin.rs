//! Administrative surface.
//!
//! The transport (console, debugfs node, management daemon) belongs to
//! the external collaborator; this module is the in-core half. Rule
//! replacement is the only mutation and is serialized by the
//! classifier's single writer lock; queries are plain reads. Every
//! mutation is audited.

use std::sync::Arc;

use tracing::info;

use crate::kernel::audit::{AuditKind, AuditLog, AuditRecord};
use crate::kernel::classifier::ExecClassifier;
use crate::kernel::registry::DomainRegistry;
use crate::kernel::rules::{RuleSet, RulesError, RulesFile};
use crate::kernel::task::TaskTable;
use crate::types::{DomainId, TaskId};

/// Snapshot of the audit state handed to the admin transport.
#[derive(Debug)]
pub struct AuditSnapshot {
    /// Retained records, oldest first.
    pub records: Vec<AuditRecord>,
    /// Records lost to saturation or contention since boot.
    pub dropped: u64,
}

/// In-core administrative operations.
pub struct AdminGate {
    registry: Arc<DomainRegistry>,
    classifier: Arc<ExecClassifier>,
    tasks: Arc<TaskTable>,
    audit: Arc<AuditLog>,
}

impl AdminGate {
    /// Create the gate over the live core components.
    pub fn new(
        registry: Arc<DomainRegistry>,
        classifier: Arc<ExecClassifier>,
        tasks: Arc<TaskTable>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            registry,
            classifier,
            tasks,
            audit,
        }
    }

    /// Validate and install a new classification rule set.
    ///
    /// The file is compiled against the sealed registry before the swap,
    /// so a rejected set leaves the previous rules untouched. Returns
    /// the number of installed rules.
    pub fn replace_rules(&self, file: RulesFile) -> Result<usize, RulesError> {
        let rules = RuleSet::compile(file, &self.registry)?;
        let count = self.classifier.replace_rules(rules);
        info!(rules = count, "classification rules replaced");
        self.audit.record(AuditRecord::new(
            None,
            None,
            AuditKind::RulesReplaced { rules: count },
        ));
        Ok(count)
    }

    /// The current domain of a task, if it is classified.
    pub fn query_domain(&self, task: TaskId) -> Option<DomainId> {
        self.tasks.domain_of(task)
    }

    /// Read the audit log and its loss counter.
    pub fn read_audit(&self) -> AuditSnapshot {
        AuditSnapshot {
            records: self.audit.snapshot(),
            dropped: self.audit.dropped(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::arch::aarch64::Aarch64Backend;
    use crate::kernel::arch::PrivilegeBackend;
    use crate::types::{DomainPolicy, ExceptionLevel, SyscallFilter};

    fn fixture() -> (AdminGate, Arc<ExecClassifier>, Arc<TaskTable>) {
        let backend: Arc<dyn PrivilegeBackend> = Arc::new(Aarch64Backend::new());
        let mut registry = DomainRegistry::new();
        for (id, name) in [(0, "untrusted"), (2, "trusted-daemons")] {
            registry
                .register(
                    DomainId(id),
                    DomainPolicy {
                        name: name.to_owned(),
                        ceiling: ExceptionLevel::El0,
                        regions: vec![],
                        instructions: vec![],
                        syscalls: SyscallFilter::default(),
                    },
                )
                .expect("register");
        }
        let registry = Arc::new(registry);
        let tasks = Arc::new(TaskTable::new());
        let audit = Arc::new(AuditLog::new(16));
        let classifier = Arc::new(ExecClassifier::new(
            Arc::clone(&registry),
            RuleSet::empty(),
            Arc::clone(&tasks),
            backend,
            Arc::clone(&audit),
        ));
        let gate = AdminGate::new(registry, Arc::clone(&classifier), Arc::clone(&tasks), audit);
        (gate, classifier, tasks)
    }

    #[test]
    fn test_replace_rules_installs_and_audits() {
        let (gate, classifier, _) = fixture();
        let file: RulesFile = toml::from_str(
            r#"
default_domain = 0

[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2
"#,
        )
        .expect("parse");
        let count = gate.replace_rules(file).expect("replace");
        assert_eq!(count, 1);
        assert_eq!(
            classifier.classify_only("/usr/bin/trusted-daemon"),
            Some(DomainId(2))
        );

        let snapshot = gate.read_audit();
        assert!(matches!(
            snapshot.records.last().map(|r| &r.kind),
            Some(AuditKind::RulesReplaced { rules: 1 })
        ));
    }

    #[test]
    fn test_rejected_rules_leave_previous_set() {
        let (gate, classifier, _) = fixture();
        let good: RulesFile = toml::from_str(
            r#"
[[rule]]
pattern = "/usr/bin/trusted-*"
domain = 2
"#,
        )
        .expect("parse");
        gate.replace_rules(good).expect("install good set");

        let bad: RulesFile = toml::from_str(
            r#"
[[rule]]
pattern = "/usr/bin/*"
domain = 42
"#,
        )
        .expect("parse");
        let result = gate.replace_rules(bad);
        assert!(matches!(result, Err(RulesError::UnknownDomain { .. })));
        assert_eq!(
            classifier.classify_only("/usr/bin/trusted-daemon"),
            Some(DomainId(2))
        );
    }

    #[test]
    fn test_query_domain_reflects_task_state() {
        let (gate, _, tasks) = fixture();
        tasks.adopt(TaskId(1)).expect("adopt");
        assert_eq!(gate.query_domain(TaskId(1)), None);
        tasks
            .mutate(TaskId(1), |entry| {
                entry.state = crate::types::TaskState::Classified { domain: DomainId(2) };
            })
            .expect("classify");
        assert_eq!(gate.query_domain(TaskId(1)), Some(DomainId(2)));
        assert_eq!(gate.query_domain(TaskId(9)), None);
    }
}
