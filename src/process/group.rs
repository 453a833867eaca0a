/*!
 * Thread Group
 * Per-process membership set: lock-free member counter, separately locked
 * member list
 *
 * The counter serves hot-path "only thread left?" checks from signal
 * delivery and scheduling without touching the list lock; the list serves
 * iteration and the router's atomic lookup-and-send section.
 */

use crate::process::thread::Thread;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ThreadGroup {
    count: AtomicUsize,
    list: Mutex<Vec<Arc<Thread>>>,
}

impl ThreadGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Member count; lock-free, safe from interrupt context.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Add a member. Returns whether this was the first.
    pub fn add(&self, thread: Arc<Thread>) -> bool {
        let prev = self.count.fetch_add(1, Ordering::AcqRel);
        self.list.lock().push(thread);
        prev == 0
    }

    /// Remove a member. Returns whether this was the last, which makes the
    /// owning process finalize-eligible.
    ///
    /// # Panics
    /// Removing from an empty group is a consistency violation and panics.
    pub fn remove(&self, thread: &Thread) -> bool {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev != 0,
            "thread group count underflow removing tid {}",
            thread.tid()
        );
        self.list.lock().retain(|t| t.tid() != thread.tid());
        prev == 1
    }

    /// Iterate members under the list lock. The callback must not block or
    /// mutate the group.
    pub fn for_each<F: FnMut(&Arc<Thread>)>(&self, mut f: F) {
        let list = self.list.lock();
        for thread in list.iter() {
            f(thread);
        }
    }

    /// Run `f` against the member list while holding the list lock — the
    /// atomic section signal routing requires so no member departs between
    /// selection and delivery. Same no-block/no-mutate contract as
    /// [`for_each`](Self::for_each).
    pub fn with_members<R>(&self, f: impl FnOnce(&[Arc<Thread>]) -> R) -> R {
        let list = self.list.lock();
        f(&list)
    }

    /// Copy the member list out for iteration without the lock.
    pub fn snapshot(&self) -> Vec<Arc<Thread>> {
        self.list.lock().clone()
    }

    /// The live main thread, if it is still a member.
    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        self.list
            .lock()
            .iter()
            .find(|t| t.is_main() && t.is_alive())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CpuAffinity, Pid, Tid};
    use crate::process::process::Process;
    use crate::process::thread::CpuContext;

    fn member(process: &Arc<Process>, tid: u64) -> Arc<Thread> {
        Thread::new(
            Tid(tid),
            process,
            format!("t{tid}"),
            CpuContext::default(),
            CpuAffinity::ANY,
        )
    }

    #[test]
    fn test_first_and_last_member() {
        let process = Process::for_tests(Pid(10), "group-test");
        let group = ThreadGroup::new();

        let a = member(&process, 10);
        let b = member(&process, 11);

        assert!(group.add(Arc::clone(&a)));
        assert!(!group.add(Arc::clone(&b)));
        assert_eq!(group.count(), 2);

        assert!(!group.remove(&a));
        assert!(group.remove(&b));
        assert_eq!(group.count(), 0);
    }

    #[test]
    #[should_panic(expected = "thread group count underflow")]
    fn test_remove_from_empty_group_is_fatal() {
        let process = Process::for_tests(Pid(10), "group-test");
        let group = ThreadGroup::new();
        let stray = member(&process, 10);
        group.remove(&stray);
    }

    #[test]
    fn test_main_thread_lookup() {
        let process = Process::for_tests(Pid(10), "group-test");
        let group = ThreadGroup::new();
        let main = member(&process, 10);
        let worker = member(&process, 31);
        group.add(Arc::clone(&main));
        group.add(Arc::clone(&worker));

        assert_eq!(group.main_thread().unwrap().tid(), Tid(10));
    }

    #[test]
    fn test_for_each_sees_all_members() {
        let process = Process::for_tests(Pid(10), "group-test");
        let group = ThreadGroup::new();
        group.add(member(&process, 10));
        group.add(member(&process, 40));
        group.add(member(&process, 41));

        let mut seen = Vec::new();
        group.for_each(|t| seen.push(t.tid().as_raw()));
        seen.sort_unstable();
        assert_eq!(seen, vec![10, 40, 41]);
    }

    #[test]
    fn test_concurrent_membership_consistency() {
        use std::thread;

        let process = Process::for_tests(Pid(10), "group-test");
        let group = Arc::new(ThreadGroup::new());

        let mut handles = vec![];
        for batch in 0..8u64 {
            let group = Arc::clone(&group);
            let process = Arc::clone(&process);
            handles.push(thread::spawn(move || {
                let mut mine = vec![];
                for i in 0..50 {
                    let t = member(&process, 1000 + batch * 100 + i);
                    group.add(Arc::clone(&t));
                    mine.push(t);
                }
                for t in &mine {
                    group.remove(t);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(group.count(), 0);
        assert!(group.snapshot().is_empty());
    }
}
