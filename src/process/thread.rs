/*!
 * Thread
 * Kernel thread object: saved context, state, termination flags and
 * pending signals
 */

use crate::core::types::{CpuAffinity, Pid, Tid};
use crate::process::process::Process;
use crate::signals::Signal;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// Saved execution context. Register state beyond these belongs to the
/// context-switch layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuContext {
    pub instruction_pointer: u64,
    pub stack_pointer: u64,
    /// First-argument register; carries the opaque argument handed to a
    /// kernel entry function.
    pub argument: u64,
}

impl CpuContext {
    pub const fn at(instruction_pointer: u64, stack_pointer: u64) -> Self {
        Self {
            instruction_pointer,
            stack_pointer,
            argument: 0,
        }
    }
}

/// Thread run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadState {
    /// In the run queue.
    Runnable = 0,
    /// Not in the run queue: sleeping on a wait condition, or built but not
    /// yet admitted by the scheduler.
    Blocked = 1,
    /// Marked for termination; retires at the next scheduling boundary.
    Dying = 2,
    /// Retired; no longer a group member.
    Dead = 3,
}

impl ThreadState {
    fn from_u8(v: u8) -> ThreadState {
        match v {
            0 => ThreadState::Runnable,
            1 => ThreadState::Blocked,
            2 => ThreadState::Dying,
            _ => ThreadState::Dead,
        }
    }
}

/// Anything a thread can sleep on that must support forced wake, so a dying
/// or signaled thread cannot stay asleep past the request.
pub trait Blocker: Send + Sync {
    fn force_wake(&self);
}

/// A kernel thread.
///
/// The owning process holds the membership relation through its thread
/// group; the thread keeps only a non-owning back-reference.
pub struct Thread {
    tid: Tid,
    owner: Pid,
    process: Weak<Process>,
    name: Mutex<String>,
    context: Mutex<CpuContext>,
    affinity: AtomicU64,
    state: AtomicU8,
    should_die: AtomicBool,
    joinable: AtomicBool,
    pending_signals: AtomicU64,
    blocked_on: Mutex<Option<Weak<dyn Blocker>>>,
}

impl Thread {
    pub(crate) fn new(
        tid: Tid,
        process: &Arc<Process>,
        name: impl Into<String>,
        context: CpuContext,
        affinity: CpuAffinity,
    ) -> Arc<Thread> {
        Arc::new(Thread {
            tid,
            owner: process.pid(),
            process: Arc::downgrade(process),
            name: Mutex::new(name.into()),
            context: Mutex::new(context),
            affinity: AtomicU64::new(affinity.0),
            state: AtomicU8::new(ThreadState::Blocked as u8),
            should_die: AtomicBool::new(false),
            joinable: AtomicBool::new(true),
            pending_signals: AtomicU64::new(0),
            blocked_on: Mutex::new(None),
        })
    }

    #[inline]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Identity of the owning process.
    #[inline]
    pub fn pid(&self) -> Pid {
        self.owner
    }

    /// The owning process, unless it is already gone.
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Main thread: thread identity aliases the process identity.
    #[inline]
    pub fn is_main(&self) -> bool {
        self.tid == self.owner.main_tid()
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn context(&self) -> CpuContext {
        *self.context.lock()
    }

    pub(crate) fn set_context(&self, context: CpuContext) {
        *self.context.lock() = context;
    }

    pub fn affinity(&self) -> CpuAffinity {
        CpuAffinity(self.affinity.load(Ordering::Relaxed))
    }

    pub fn set_affinity(&self, affinity: CpuAffinity) {
        self.affinity.store(affinity.0, Ordering::Relaxed);
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Alive means still a potential signal recipient: runnable or blocked,
    /// neither marked for death nor retired.
    #[inline]
    pub fn is_alive(&self) -> bool {
        matches!(self.state(), ThreadState::Runnable | ThreadState::Blocked)
    }

    #[inline]
    pub fn should_die(&self) -> bool {
        self.should_die.load(Ordering::Acquire)
    }

    /// Cooperative termination request; force-wakes the thread from any
    /// blocked wait so the flag is observed promptly.
    pub(crate) fn mark_should_die(&self) {
        self.should_die.store(true, Ordering::Release);
        if self.state() != ThreadState::Dead {
            self.set_state(ThreadState::Dying);
        }
        self.interrupt_blocked_wait();
    }

    #[inline]
    pub fn is_joinable(&self) -> bool {
        self.joinable.load(Ordering::Acquire)
    }

    /// Detach so nobody can block joining this thread.
    pub(crate) fn detach(&self) {
        self.joinable.store(false, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Pending signals
    // ------------------------------------------------------------------

    /// Mark `signal` pending and force-wake any blocked wait. Lock-free on
    /// the mask; safe from interrupt context.
    pub(crate) fn deliver(&self, signal: Signal) {
        self.pending_signals.fetch_or(signal.mask(), Ordering::AcqRel);
        self.interrupt_blocked_wait();
    }

    #[inline]
    pub fn pending_signals(&self) -> u64 {
        self.pending_signals.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_pending_signal(&self) -> bool {
        self.pending_signals() != 0
    }

    /// Drain the pending set (consumed by the dispatch layer above this
    /// core).
    pub fn take_pending_signals(&self) -> u64 {
        self.pending_signals.swap(0, Ordering::AcqRel)
    }

    // ------------------------------------------------------------------
    // Blocker registration
    // ------------------------------------------------------------------

    pub(crate) fn begin_blocked_wait(&self, blocker: Weak<dyn Blocker>) {
        *self.blocked_on.lock() = Some(blocker);
        // Leaves the runnable set; a Dying mark is not overwritten.
        let _ = self.state.compare_exchange(
            ThreadState::Runnable as u8,
            ThreadState::Blocked as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn end_blocked_wait(&self) {
        *self.blocked_on.lock() = None;
        let _ = self.state.compare_exchange(
            ThreadState::Blocked as u8,
            ThreadState::Runnable as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn interrupt_blocked_wait(&self) {
        let blocker = self.blocked_on.lock().clone();
        if let Some(blocker) = blocker.and_then(|b| b.upgrade()) {
            blocker.force_wake();
        }
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("owner", &self.owner)
            .field("name", &self.name.lock())
            .field("state", &self.state())
            .field("should_die", &self.should_die())
            .finish()
    }
}
