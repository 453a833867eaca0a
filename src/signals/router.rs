/*!
 * Signal Router
 * Resolves a process-directed signal to a receiving thread
 *
 * Target selection and delivery happen inside one critical section over the
 * thread-group member list, so a thread cannot depart between being picked
 * and receiving the signal.
 */

use crate::core::errors::{SignalError, SignalResult};
use crate::core::types::Pid;
use crate::process::registry::ProcessRegistry;
use crate::signals::types::Signal;
use log::debug;
use std::sync::Arc;

pub struct SignalRouter {
    registry: Arc<ProcessRegistry>,
}

impl SignalRouter {
    pub fn new(registry: Arc<ProcessRegistry>) -> SignalRouter {
        SignalRouter { registry }
    }

    /// Deliver `signal` to the process's main thread, or to an arbitrary
    /// surviving member when the main thread is gone. Which survivor gets
    /// picked is unspecified. Delivery marks the signal pending on the
    /// target and force-wakes any wait it is blocked in.
    ///
    /// `sender` is the signalling process, if any; kernel-originated
    /// signals pass none.
    pub fn send_signal(&self, pid: Pid, signal: Signal, sender: Option<Pid>) -> SignalResult<()> {
        let process = self
            .registry
            .find(pid)
            .ok_or(SignalError::NoSuchProcess(pid))?;

        process.thread_group().with_members(|members| {
            let main = members.iter().find(|t| t.is_main() && t.is_alive());
            let target = match main {
                Some(thread) => thread,
                None => members
                    .iter()
                    .find(|t| t.is_alive())
                    .ok_or(SignalError::NoSuchProcess(pid))?,
            };
            debug!(
                "routing {} to pid {} via tid {} (sender: {:?})",
                signal,
                pid,
                target.tid(),
                sender
            );
            target.deliver(signal);
            Ok(())
        })
    }
}
