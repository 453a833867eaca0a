/*!
 * Wait Condition
 * Per-process termination signalling between a finalized child and a
 * waiting parent
 *
 * The condition owns the only keep-alive handle a terminated process gets:
 * when finalization ends and a parent may still ask for the result, the
 * child's `Arc` is parked here and released exactly once, to the observer
 * that consumes the info. Observers beyond the first queue behind the mutex
 * and find the info consumed. Signalling termination and deciding the
 * keeper's fate are separate steps, in that order, so a parent woken by the
 * signal can consume before the disposition is settled.
 */

use crate::core::errors::{WaitError, WaitResult};
use crate::core::types::Pid;
use crate::process::process::{Process, WaitInfo};
use crate::process::thread::{Blocker, Thread};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};

/// A consumed wait: the info, plus the parked keep-alive handle when the
/// child was held as a zombie. The caller unregisters the child and drops
/// the keeper outside the condition lock.
pub(crate) struct Reaped {
    pub info: WaitInfo,
    pub keeper: Option<Arc<Process>>,
}

/// Outcome of the disposition step: drop the child's last strong handle now,
/// or park it until a parent consumes the terminal state.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
    DropNow,
    Deferred,
}

#[derive(Default)]
struct WaitState {
    info: Option<WaitInfo>,
    /// Set when the parent finalized first; the info has no consumer.
    disowned: bool,
    consumed: bool,
    keeper: Option<Arc<Process>>,
    observers: usize,
}

/// Condition a parent blocks on until the child terminates.
pub struct WaitCondition {
    pid: Pid,
    state: Mutex<WaitState>,
    signaled: Condvar,
}

impl WaitCondition {
    pub(crate) fn new(pid: Pid) -> Arc<WaitCondition> {
        Arc::new(WaitCondition {
            pid,
            state: Mutex::new(WaitState::default()),
            signaled: Condvar::new(),
        })
    }

    /// The child identity this condition reports on.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Observers currently blocked in [`wait`](Self::wait).
    pub fn pending_observers(&self) -> usize {
        self.state.lock().observers
    }

    pub fn is_disowned(&self) -> bool {
        self.state.lock().disowned
    }

    /// Whether the terminal state is published but not yet consumed.
    pub fn is_signaled(&self) -> bool {
        let state = self.state.lock();
        state.info.is_some() && !state.consumed
    }

    /// Block until the child's termination info is published, then consume
    /// it. Exactly one observer consumes; later observers see
    /// [`WaitError::NoChild`]. A pending signal or a death mark on the
    /// waiting thread interrupts the wait.
    pub(crate) fn wait(self: &Arc<Self>, waiter: &Arc<Thread>) -> WaitResult<Reaped> {
        let blocker: Weak<dyn Blocker> = Arc::<Self>::downgrade(self);
        waiter.begin_blocked_wait(blocker);
        let result = self.wait_inner(waiter);
        waiter.end_blocked_wait();
        result
    }

    fn wait_inner(&self, waiter: &Arc<Thread>) -> WaitResult<Reaped> {
        let mut state = self.state.lock();
        state.observers += 1;
        let result = loop {
            if state.consumed {
                break Err(WaitError::NoChild(self.pid));
            }
            if let Some(info) = state.info.clone() {
                state.consumed = true;
                let keeper = state.keeper.take();
                break Ok(Reaped { info, keeper });
            }
            if waiter.should_die() || waiter.has_pending_signal() {
                break Err(WaitError::Interrupted);
            }
            self.signaled.wait(&mut state);
        };
        state.observers -= 1;
        result
    }

    /// Publish the termination info and wake blocked observers. Finalize
    /// step prior to disposition; runs once.
    pub(crate) fn signal_terminated(&self, info: WaitInfo) {
        let mut state = self.state.lock();
        debug_assert!(state.info.is_none(), "termination signaled twice");
        state.info = Some(info);
        self.signaled.notify_all();
    }

    /// Decide the keeper's fate. `keeper` is the child's own handle;
    /// `consumer_expected` says a parent remains that has not opted out.
    /// The handle is parked only when such a parent exists, the child was
    /// not disowned, and nobody consumed the info during the wake window.
    pub(crate) fn dispose(&self, keeper: Arc<Process>, consumer_expected: bool) -> Disposition {
        let mut state = self.state.lock();
        if consumer_expected && !state.disowned && !state.consumed {
            state.keeper = Some(keeper);
            Disposition::Deferred
        } else {
            Disposition::DropNow
        }
    }

    /// Mark the info consumer gone. Returns the parked keeper when the
    /// child already terminated; the caller unregisters it.
    pub(crate) fn disown(&self) -> Option<Arc<Process>> {
        let mut state = self.state.lock();
        state.disowned = true;
        state.keeper.take()
    }
}

impl Blocker for WaitCondition {
    fn force_wake(&self) {
        // Taking the lock pins every observer at its recheck or in the
        // sleep, so the wake cannot slip between the two.
        let _state = self.state.lock();
        self.signaled.notify_all();
    }
}
