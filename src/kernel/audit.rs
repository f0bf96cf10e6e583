//! Audit log and trap handler.
//!
//! Every denied transition and every policy-violation trap lands here.
//! The queue is bounded and strictly non-blocking: the fault path uses
//! `try_lock` and drops under contention, and a full queue drops its
//! oldest record. Either way a saturation counter keeps the loss
//! visible to the admin read; logging can never stall a faulting task.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::kernel::task::TaskTable;
use crate::types::{Capability, DomainId, FaultClass, FaultInfo, TaskId, TrapVerdict};

/// What happened, per record kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// An exec was refused by classification.
    ExecDenied {
        /// The path that failed to classify.
        path: String,
    },
    /// An elevation request was refused.
    ElevationDenied {
        /// The capability that was requested.
        capability: Capability,
    },
    /// A syscall was refused by the domain's filter.
    SyscallDenied {
        /// Syscall name.
        name: String,
    },
    /// A policy-violation trap was delivered.
    Fault {
        /// Faulting address.
        address: u64,
        /// Faulting instruction word, when captured.
        instruction: Option<u32>,
        /// Fault classification.
        class: FaultClass,
        /// Verdict applied.
        verdict: TrapVerdict,
    },
    /// The classification rule set was replaced via the admin path.
    RulesReplaced {
        /// Number of rules in the new set.
        rules: usize,
    },
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Correlation id.
    pub id: Uuid,
    /// When the record was made.
    pub timestamp: DateTime<Utc>,
    /// Task the record concerns, when there is one.
    pub task: Option<TaskId>,
    /// The task's domain at the time, when known.
    pub domain: Option<DomainId>,
    /// What happened.
    pub kind: AuditKind,
}

impl AuditRecord {
    /// Build a record stamped now.
    pub fn new(task: Option<TaskId>, domain: Option<DomainId>, kind: AuditKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            task,
            domain,
            kind,
        }
    }
}

/// Bounded in-memory audit queue.
#[derive(Debug)]
pub struct AuditLog {
    queue: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl AuditLog {
    /// Create a queue holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a record without ever blocking the caller.
    ///
    /// Under lock contention the record is counted as dropped; when the
    /// queue is full the oldest record gives way. Both outcomes are
    /// visible through [`AuditLog::dropped`].
    pub fn record(&self, record: AuditRecord) {
        match self.queue.try_lock() {
            Ok(queue) => self.push_bounded(queue, record),
            Err(TryLockError::Poisoned(poisoned)) => {
                self.push_bounded(poisoned.into_inner(), record);
            }
            Err(TryLockError::WouldBlock) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn push_bounded(
        &self,
        mut queue: std::sync::MutexGuard<'_, VecDeque<AuditRecord>>,
        record: AuditRecord,
    ) {
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(record);
    }

    /// Copy out the current records, oldest first. Admin path only.
    pub fn snapshot(&self) -> Vec<AuditRecord> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.iter().cloned().collect()
    }

    /// How many records were lost to saturation or contention.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Maximum number of retained records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write the current records as JSON lines, one record per line.
    pub fn export(&self, writer: &mut dyn Write) -> anyhow::Result<()> {
        for record in self.snapshot() {
            let line = serde_json::to_string(&record)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Receives policy-violation traps and applies the configured severity.
#[derive(Debug)]
pub struct TrapHandler {
    tasks: Arc<TaskTable>,
    audit: Arc<AuditLog>,
    fatal: HashSet<FaultClass>,
}

impl TrapHandler {
    /// Create a handler that kills tasks on the given fault classes.
    pub fn new(
        tasks: Arc<TaskTable>,
        audit: Arc<AuditLog>,
        fatal: impl IntoIterator<Item = FaultClass>,
    ) -> Self {
        Self {
            tasks,
            audit,
            fatal: fatal.into_iter().collect(),
        }
    }

    /// Deliver a fault for a task.
    ///
    /// Any held elevation is revoked before the verdict: a faulting
    /// task never stays elevated, whether it survives or not.
    pub fn on_fault(&self, task: TaskId, fault: FaultInfo) -> TrapVerdict {
        self.tasks.demote(task);
        let domain = self.tasks.domain_of(task);
        let verdict = if self.fatal.contains(&fault.class) {
            self.tasks.terminate(task);
            TrapVerdict::Killed
        } else {
            TrapVerdict::Logged
        };
        warn!(
            task = %task,
            address = fault.address,
            class = ?fault.class,
            verdict = ?verdict,
            "policy violation trap"
        );
        self.audit.record(AuditRecord::new(
            Some(task),
            domain,
            AuditKind::Fault {
                address: fault.address,
                instruction: fault.instruction,
                class: fault.class,
                verdict,
            },
        ));
        verdict
    }
}
