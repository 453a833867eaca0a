/*!
 * Scheduler Module
 * Run-queue front consumed by the lifecycle core
 *
 * Policy lives in the embedding scheduler; this front owns the queue lock
 * and the runnable transition. Threads marked for death are never admitted;
 * they retire at the next scheduling boundary instead.
 */

use crate::process::thread::{Thread, ThreadState};
use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct Scheduler {
    queue: Mutex<VecDeque<Arc<Thread>>>,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Admit a thread to the run queue. The runnable transition happens
    /// under the queue lock so admission and visibility are one step.
    pub fn make_runnable(&self, thread: Arc<Thread>) {
        let mut queue = self.queue.lock();
        if thread.should_die() {
            trace!("not requeueing dying tid {}", thread.tid());
            return;
        }
        thread.set_state(ThreadState::Runnable);
        queue.push_back(thread);
    }

    /// Pop the next runnable thread. The caller checks the should-die flag
    /// and retires the thread instead of running it.
    pub fn take_next(&self) -> Option<Arc<Thread>> {
        self.queue.lock().pop_front()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
