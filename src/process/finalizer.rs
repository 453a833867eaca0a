/*!
 * Finalizer
 * Dedicated teardown context fed over a channel
 */

use crate::process::process::Process;
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Proof that the caller is running on the finalizer context. Only the
/// worker loop can mint one, so teardown cannot be invoked from an
/// arbitrary thread.
pub(crate) struct FinalizeToken {
    _private: (),
}

enum Job {
    Finalize(Arc<Process>),
    Flush(flume::Sender<()>),
    Shutdown,
}

/// Owns the worker thread that runs process teardown. Jobs are executed in
/// submission order by exactly one consumer, so finalization never races
/// itself.
pub(crate) struct Finalizer {
    sender: flume::Sender<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Finalizer {
    pub(crate) fn start<F>(run: F) -> Finalizer
    where
        F: Fn(Arc<Process>, &FinalizeToken) + Send + 'static,
    {
        let (sender, receiver) = flume::unbounded();
        let worker = std::thread::spawn(move || {
            let token = FinalizeToken { _private: () };
            for job in receiver.iter() {
                match job {
                    Job::Finalize(process) => run(process, &token),
                    Job::Flush(done) => {
                        let _ = done.send(());
                    }
                    Job::Shutdown => break,
                }
            }
            trace!("finalizer worker exiting");
        });
        Finalizer {
            sender,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub(crate) fn enqueue(&self, process: Arc<Process>) {
        debug!("queueing pid {} for finalization", process.pid());
        // Fails only after shutdown, when nothing is left to tear down.
        let _ = self.sender.send(Job::Finalize(process));
    }

    /// Blocks until every job enqueued before this call has run.
    pub(crate) fn flush(&self) {
        let (done_tx, done_rx) = flume::bounded(1);
        if self.sender.send(Job::Flush(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            // The last owner can be dropped from the worker itself; joining
            // there would wait forever.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let finalizer = Finalizer::start(move |process, _token| {
            sink.lock().push(process.pid());
        });

        let first = Process::for_tests(crate::core::types::Pid(5), "first");
        let second = Process::for_tests(crate::core::types::Pid(6), "second");
        finalizer.enqueue(first);
        finalizer.enqueue(second);
        finalizer.flush();

        let order: Vec<u64> = seen.lock().iter().map(|pid| pid.0).collect();
        assert_eq!(order, vec![5, 6]);
    }

    #[test]
    fn test_flush_waits_for_prior_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&counter);
        let finalizer = Finalizer::start(move |_process, _token| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            sink.fetch_add(1, Ordering::SeqCst);
        });

        for pid in 10..14 {
            finalizer.enqueue(Process::for_tests(crate::core::types::Pid(pid), "job"));
        }
        finalizer.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_drop_joins_worker() {
        let finalizer = Finalizer::start(|_process, _token| {});
        finalizer.enqueue(Process::for_tests(crate::core::types::Pid(9), "last"));
        drop(finalizer);
    }
}
