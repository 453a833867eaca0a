/*!
 * Process Registry
 * Injectable identity-keyed table of registered processes
 *
 * One instance is the single authority on which processes exist; it is
 * passed to every lifecycle operation rather than living in a global. The
 * lock is reentrant because some paths re-enter while holding it (parent
 * lookup during a child's finalize). Mutation goes through the `RefCell`
 * and is confined to top-level entry points; re-entrant holders only read,
 * which the `RefCell` borrow check enforces at runtime.
 */

use crate::core::types::Pid;
use crate::process::process::Process;
use ahash::AHashMap;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;

pub struct ProcessRegistry {
    table: ReentrantMutex<RefCell<AHashMap<Pid, Arc<Process>>>>,
}

impl ProcessRegistry {
    pub fn new() -> ProcessRegistry {
        ProcessRegistry {
            table: ReentrantMutex::new(RefCell::new(AHashMap::new())),
        }
    }

    /// Register a process. The registry takes a strong handle.
    ///
    /// # Panics
    /// Identities are never reused, so registering one twice is a
    /// consistency violation.
    pub(crate) fn insert(&self, process: Arc<Process>) {
        let pid = process.pid();
        let guard = self.table.lock();
        let prev = guard.borrow_mut().insert(pid, process);
        assert!(prev.is_none(), "pid {pid} registered twice");
    }

    /// Unregister and return the process. Idempotent: explicit removal and
    /// destruction-time removal may race, so removing an absent identity is
    /// a no-op.
    pub(crate) fn remove(&self, pid: Pid) -> Option<Arc<Process>> {
        let guard = self.table.lock();
        let removed = guard.borrow_mut().remove(&pid);
        removed
    }

    pub fn find(&self, pid: Pid) -> Option<Arc<Process>> {
        self.table.lock().borrow().get(&pid).cloned()
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.table.lock().borrow().contains_key(&pid)
    }

    /// Copy the current membership out. Iteration and anything that can
    /// block happens on the snapshot, never under the lock.
    pub fn snapshot(&self) -> Vec<Arc<Process>> {
        self.table.lock().borrow().values().cloned().collect()
    }

    /// Registered identities, same snapshot discipline.
    pub fn pids(&self) -> Vec<Pid> {
        self.table.lock().borrow().keys().copied().collect()
    }

    /// Registered children of `parent`, snapshotted.
    pub fn children_of(&self, parent: Pid) -> Vec<Arc<Process>> {
        self.table
            .lock()
            .borrow()
            .values()
            .filter(|p| p.parent() == Some(parent))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.table.lock().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with the registry lock held, for multi-step sections that
    /// must be atomic against registration changes. Calls back into the
    /// registry from inside `f` re-enter the lock and must stay read-only.
    pub(crate) fn locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.table.lock();
        f()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
