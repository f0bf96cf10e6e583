//! Task table — per-task domain state and hardware context.
//!
//! One entry per scheduler task id. Entries are mutated only through
//! the exec, elevation, fault, and exit entry points running in the
//! task's own context; the admin path reads, it never writes. The task
//! holds a `DomainId` index, never a reference into registry state.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

use crate::kernel::arch::SavedContext;
use crate::types::{DomainId, TaskId, TaskState};

/// Task table operation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    /// The task id is not tracked.
    #[error("task {0} is not tracked")]
    Unknown(TaskId),
    /// The task has terminated; no further transitions.
    #[error("task {0} has terminated")]
    Terminated(TaskId),
    /// The task id is already tracked and live.
    #[error("task {0} is already tracked")]
    AlreadyTracked(TaskId),
}

/// One tracked task: lifecycle state plus the hardware context slice
/// the enforcer owns for it.
#[derive(Debug, Clone)]
pub struct TaskEntry {
    /// Lifecycle state.
    pub(crate) state: TaskState,
    /// Context for the domain's unelevated state.
    pub(crate) baseline: SavedContext,
    /// Context currently installed (baseline, or baseline plus one grant).
    pub(crate) active: SavedContext,
}

impl TaskEntry {
    fn unclassified() -> Self {
        Self {
            state: TaskState::Unclassified,
            baseline: SavedContext::default(),
            active: SavedContext::default(),
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Currently installed hardware context.
    pub fn active_context(&self) -> SavedContext {
        self.active
    }

    /// Context of the domain's unelevated state.
    pub fn baseline_context(&self) -> SavedContext {
        self.baseline
    }
}

/// Table of all tracked tasks.
#[derive(Debug, Default)]
pub struct TaskTable {
    entries: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means another thread panicked mid-update of
    // its own entry; the map itself stays usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a task in the `Unclassified` state.
    ///
    /// A terminated entry under the same id is replaced (scheduler ids
    /// are reused); a live one is an error.
    pub fn adopt(&self, task: TaskId) -> Result<(), TaskError> {
        let mut entries = self.write();
        let live = entries
            .get(&task)
            .is_some_and(|e| e.state != TaskState::Terminated);
        if live {
            return Err(TaskError::AlreadyTracked(task));
        }
        entries.insert(task, TaskEntry::unclassified());
        Ok(())
    }

    /// Snapshot a task's lifecycle state.
    pub fn state(&self, task: TaskId) -> Option<TaskState> {
        self.read().get(&task).map(|e| e.state.clone())
    }

    /// The task's active domain, if classified.
    pub fn domain_of(&self, task: TaskId) -> Option<DomainId> {
        self.read().get(&task).and_then(|e| e.state.domain())
    }

    /// Run a read-only closure against a task's entry without cloning.
    /// Used on the authorization hot path.
    pub(crate) fn with_entry<R>(&self, task: TaskId, f: impl FnOnce(&TaskEntry) -> R) -> Option<R> {
        self.read().get(&task).map(f)
    }

    /// Run a mutating closure against a task's entry under the write
    /// lock. This is the single critical section for exec and
    /// elevation transitions.
    pub(crate) fn mutate<R>(
        &self,
        task: TaskId,
        f: impl FnOnce(&mut TaskEntry) -> R,
    ) -> Result<R, TaskError> {
        let mut entries = self.write();
        let entry = entries.get_mut(&task).ok_or(TaskError::Unknown(task))?;
        Ok(f(entry))
    }

    /// Inherit the parent's domain into a new child task.
    ///
    /// The child starts at the parent's baseline: an elevation held by
    /// the parent at fork time is scoped to the parent's operation and
    /// is not inherited.
    pub fn fork(&self, parent: TaskId, child: TaskId) -> Result<Option<DomainId>, TaskError> {
        let mut entries = self.write();
        let parent_entry = entries.get(&parent).ok_or(TaskError::Unknown(parent))?;
        let (state, context) = match &parent_entry.state {
            TaskState::Terminated => return Err(TaskError::Terminated(parent)),
            TaskState::Unclassified => (TaskState::Unclassified, SavedContext::default()),
            TaskState::Classified { domain } | TaskState::Elevated { domain, .. } => {
                (TaskState::Classified { domain: *domain }, parent_entry.baseline)
            }
        };
        let child_live = entries
            .get(&child)
            .is_some_and(|e| e.state != TaskState::Terminated);
        if child_live {
            return Err(TaskError::AlreadyTracked(child));
        }
        let domain = state.domain();
        entries.insert(
            child,
            TaskEntry {
                state,
                baseline: context,
                active: context,
            },
        );
        Ok(domain)
    }

    /// Drop any held elevation, restoring the baseline context.
    /// Idempotent; used on trap delivery and guard release.
    pub(crate) fn demote(&self, task: TaskId) {
        let mut entries = self.write();
        if let Some(entry) = entries.get_mut(&task) {
            if let TaskState::Elevated { domain, .. } = &entry.state {
                entry.state = TaskState::Classified { domain: *domain };
                entry.active = entry.baseline;
            }
        }
    }

    /// Terminate a task from any state. Elevated state is revoked with
    /// it; the entry stays for audit queries until reaped.
    pub fn terminate(&self, task: TaskId) -> Option<TaskState> {
        let mut entries = self.write();
        let entry = entries.get_mut(&task)?;
        let previous = std::mem::replace(&mut entry.state, TaskState::Terminated);
        entry.baseline = SavedContext::default();
        entry.active = SavedContext::default();
        Some(previous)
    }

    /// Remove terminated entries, returning how many were reaped.
    pub fn reap(&self) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, e| e.state != TaskState::Terminated);
        before.saturating_sub(entries.len())
    }

    /// Number of tracked tasks, including terminated ones not yet reaped.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
