/*!
 * Process
 * The process object: identity, owned resources, thread group, termination
 * state and accounting
 *
 * Lifecycle transitions (creation, die, finalize, reap) are driven by the
 * lifecycle controller; this type owns the state those transitions act on
 * and enforces the Active -> Dying -> Dead machine.
 */

use crate::core::types::{CpuTime, Pid, Uid};
use crate::memory::AddressSpace;
use crate::process::credentials::Credentials;
use crate::process::fd_table::FdTable;
use crate::process::group::ThreadGroup;
use crate::process::thread::Thread;
use crate::process::wait::WaitCondition;
use crate::signals::Signal;
use crate::vfs::{DirRef, Terminal, VfsNode};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Process lifecycle state. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessState {
    Active = 0,
    /// `die()` has run: threads are marked for termination.
    Dying = 1,
    /// `finalize()` completed; globally observable as dead.
    Dead = 2,
}

impl ProcessState {
    fn from_u8(v: u8) -> ProcessState {
        match v {
            0 => ProcessState::Active,
            1 => ProcessState::Dying,
            _ => ProcessState::Dead,
        }
    }
}

/// Why a process terminated, as reported to a waiting parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitCause {
    Exited,
    Killed,
}

/// Answer to the wait-info query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitInfo {
    pub pid: Pid,
    pub uid: Uid,
    pub cause: WaitCause,
    /// Exit status for [`WaitCause::Exited`], signal number for
    /// [`WaitCause::Killed`].
    pub status: i32,
    pub cpu_time: CpuTime,
}

/// Tracer attachment state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerState {
    pub tracer: Pid,
    pub pending_trap: Option<Signal>,
}

pub struct Process {
    pid: Pid,
    is_kernel: bool,
    name: Mutex<String>,
    credentials: Mutex<Credentials>,
    parent: Mutex<Option<Pid>>,
    space: Arc<AddressSpace>,
    cwd: Mutex<Option<DirRef>>,
    root_dir: Mutex<Option<DirRef>>,
    tty: Mutex<Option<Arc<Terminal>>>,
    fds: FdTable,
    thread_group: ThreadGroup,
    wait_condition: Arc<WaitCondition>,

    state: AtomicU8,
    termination_status: AtomicI32,
    // Signal number, 0 = none. Valid numbers start at 1.
    termination_signal: AtomicU32,
    dumpable: AtomicBool,
    finalized: AtomicBool,
    /// Set on a parent that declines child-termination signals.
    wait_opt_out: AtomicBool,

    executable: Mutex<Option<Arc<VfsNode>>>,
    arguments: Mutex<Vec<String>>,
    environment: Mutex<Vec<String>>,
    tracer: Mutex<Option<TracerState>>,
    perf_events: Mutex<Option<Arc<crate::diagnostics::PerfEventBuffer>>>,

    ticks_user: AtomicU64,
    ticks_kernel: AtomicU64,
    dead_children_ticks_user: AtomicU64,
    dead_children_ticks_kernel: AtomicU64,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        name: impl Into<String>,
        credentials: Credentials,
        parent: Option<Pid>,
        space: Arc<AddressSpace>,
        is_kernel: bool,
    ) -> Arc<Process> {
        Arc::new(Process {
            pid,
            is_kernel,
            name: Mutex::new(name.into()),
            credentials: Mutex::new(credentials),
            parent: Mutex::new(parent),
            space,
            cwd: Mutex::new(None),
            root_dir: Mutex::new(None),
            tty: Mutex::new(None),
            fds: FdTable::new(),
            thread_group: ThreadGroup::new(),
            wait_condition: WaitCondition::new(pid),
            state: AtomicU8::new(ProcessState::Active as u8),
            termination_status: AtomicI32::new(0),
            termination_signal: AtomicU32::new(0),
            dumpable: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            wait_opt_out: AtomicBool::new(false),
            executable: Mutex::new(None),
            arguments: Mutex::new(Vec::new()),
            environment: Mutex::new(Vec::new()),
            tracer: Mutex::new(None),
            perf_events: Mutex::new(None),
            ticks_user: AtomicU64::new(0),
            ticks_kernel: AtomicU64::new(0),
            dead_children_ticks_user: AtomicU64::new(0),
            dead_children_ticks_kernel: AtomicU64::new(0),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(pid: Pid, name: &str) -> Arc<Process> {
        Process::new(
            pid,
            name,
            Credentials::root(),
            None,
            AddressSpace::create(pid, None),
            false,
        )
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn is_kernel_process(&self) -> bool {
        self.is_kernel
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials.lock().clone()
    }

    pub fn parent(&self) -> Option<Pid> {
        *self.parent.lock()
    }

    pub(crate) fn set_parent(&self, parent: Option<Pid>) {
        *self.parent.lock() = parent;
    }

    #[inline]
    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    #[inline]
    pub fn fds(&self) -> &FdTable {
        &self.fds
    }

    #[inline]
    pub fn thread_group(&self) -> &ThreadGroup {
        &self.thread_group
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.thread_group.count()
    }

    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        self.thread_group.main_thread()
    }

    pub fn wait_condition(&self) -> Arc<WaitCondition> {
        Arc::clone(&self.wait_condition)
    }

    // ------------------------------------------------------------------
    // Directories, terminal, executable image
    // ------------------------------------------------------------------

    pub fn cwd(&self) -> Option<DirRef> {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, dir: DirRef) {
        *self.cwd.lock() = Some(dir);
    }

    pub fn root_dir(&self) -> Option<DirRef> {
        self.root_dir.lock().clone()
    }

    pub fn set_root_dir(&self, dir: DirRef) {
        *self.root_dir.lock() = Some(dir);
    }

    pub(crate) fn clear_directories(&self) {
        *self.cwd.lock() = None;
        *self.root_dir.lock() = None;
    }

    pub fn tty(&self) -> Option<Arc<Terminal>> {
        self.tty.lock().clone()
    }

    pub(crate) fn set_tty(&self, tty: Option<Arc<Terminal>>) {
        *self.tty.lock() = tty;
    }

    /// Drop the controlling-terminal reference. First step of `die()`; also
    /// part of finalization's resource release. Idempotent.
    pub(crate) fn release_tty(&self) {
        *self.tty.lock() = None;
    }

    pub fn executable(&self) -> Option<Arc<VfsNode>> {
        self.executable.lock().clone()
    }

    pub(crate) fn set_executable(&self, node: Arc<VfsNode>) {
        *self.executable.lock() = Some(node);
    }

    pub(crate) fn clear_executable(&self) {
        *self.executable.lock() = None;
    }

    pub fn arguments(&self) -> Vec<String> {
        self.arguments.lock().clone()
    }

    pub fn environment(&self) -> Vec<String> {
        self.environment.lock().clone()
    }

    pub(crate) fn set_arguments(&self, argv: Vec<String>, envp: Vec<String>) {
        *self.arguments.lock() = argv;
        *self.environment.lock() = envp;
    }

    pub(crate) fn clear_arguments(&self) {
        self.arguments.lock().clear();
        self.environment.lock().clear();
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    #[inline]
    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state() == ProcessState::Dead
    }

    /// Active -> Dying transition.
    ///
    /// # Panics
    /// Dying twice, or after death, is a consistency violation.
    pub(crate) fn begin_dying(&self) {
        let res = self.state.compare_exchange(
            ProcessState::Active as u8,
            ProcessState::Dying as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(
            res.is_ok(),
            "die() on process {} which is already {:?}",
            self.pid,
            self.state()
        );
    }

    /// Dying -> Dead transition, performed by the finalizer.
    pub(crate) fn mark_dead(&self) {
        let res = self.state.compare_exchange(
            ProcessState::Dying as u8,
            ProcessState::Dead as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        assert!(
            res.is_ok(),
            "marking process {} dead from state {:?}",
            self.pid,
            self.state()
        );
    }

    /// One-shot finalize guard.
    ///
    /// # Panics
    /// Re-finalizing is a consistency violation.
    pub(crate) fn claim_finalize(&self) {
        let already = self.finalized.swap(true, Ordering::AcqRel);
        assert!(!already, "process {} finalized twice", self.pid);
    }

    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Termination cause
    // ------------------------------------------------------------------

    pub(crate) fn set_termination_status(&self, status: i32) {
        self.termination_status.store(status, Ordering::Release);
    }

    pub(crate) fn set_termination_signal(&self, signal: Signal) {
        self.termination_signal
            .store(signal.number(), Ordering::Release);
    }

    pub fn termination_status(&self) -> i32 {
        self.termination_status.load(Ordering::Acquire)
    }

    pub fn termination_signal(&self) -> Option<Signal> {
        match self.termination_signal.load(Ordering::Acquire) {
            0 => None,
            n => Signal::from_number(n).ok(),
        }
    }

    pub fn should_dump_core(&self) -> bool {
        self.dumpable.load(Ordering::Acquire)
    }

    pub(crate) fn set_dump_core(&self, dump: bool) {
        self.dumpable.store(dump, Ordering::Release);
    }

    /// Whether this process declines child-termination signals.
    pub fn wait_opt_out(&self) -> bool {
        self.wait_opt_out.load(Ordering::Acquire)
    }

    pub fn set_wait_opt_out(&self, opt_out: bool) {
        self.wait_opt_out.store(opt_out, Ordering::Release);
    }

    /// Identity, credentials and termination cause for a waiting parent.
    pub fn wait_info(&self) -> WaitInfo {
        let (cause, status) = match self.termination_signal() {
            Some(signal) => (WaitCause::Killed, signal.number() as i32),
            None => (WaitCause::Exited, self.termination_status()),
        };
        WaitInfo {
            pid: self.pid,
            uid: self.credentials.lock().uid,
            cause,
            status,
            cpu_time: self.cpu_time(),
        }
    }

    // ------------------------------------------------------------------
    // Tracer / performance events
    // ------------------------------------------------------------------

    pub fn start_tracing(&self, tracer: Pid) {
        *self.tracer.lock() = Some(TracerState {
            tracer,
            pending_trap: None,
        });
    }

    pub fn stop_tracing(&self) {
        *self.tracer.lock() = None;
    }

    pub fn tracer(&self) -> Option<TracerState> {
        self.tracer.lock().clone()
    }

    /// Record a trap for the tracer. No-op when untraced.
    pub fn tracer_trap(&self, signal: Signal) {
        if let Some(state) = self.tracer.lock().as_mut() {
            state.pending_trap = Some(signal);
        }
    }

    /// Consume the pending trap, if any.
    pub fn take_tracer_trap(&self) -> Option<Signal> {
        self.tracer
            .lock()
            .as_mut()
            .and_then(|state| state.pending_trap.take())
    }

    /// Create the performance-event buffer on first use.
    pub fn ensure_perf_events(&self) -> Arc<crate::diagnostics::PerfEventBuffer> {
        let mut guard = self.perf_events.lock();
        match guard.as_ref() {
            Some(buffer) => Arc::clone(buffer),
            None => {
                let buffer = Arc::new(crate::diagnostics::PerfEventBuffer::new());
                *guard = Some(Arc::clone(&buffer));
                buffer
            }
        }
    }

    pub fn perf_events(&self) -> Option<Arc<crate::diagnostics::PerfEventBuffer>> {
        self.perf_events.lock().clone()
    }

    // ------------------------------------------------------------------
    // CPU-time accounting
    // ------------------------------------------------------------------

    /// Charge ticks to this process. Called from the scheduling layer.
    pub fn charge_ticks(&self, user: u64, kernel: u64) {
        self.ticks_user.fetch_add(user, Ordering::Relaxed);
        self.ticks_kernel.fetch_add(kernel, Ordering::Relaxed);
    }

    pub fn cpu_time(&self) -> CpuTime {
        CpuTime {
            user_ticks: self.ticks_user.load(Ordering::Relaxed),
            kernel_ticks: self.ticks_kernel.load(Ordering::Relaxed),
        }
    }

    /// Aggregate CPU time folded in from finalized children.
    pub fn dead_children_time(&self) -> CpuTime {
        CpuTime {
            user_ticks: self.dead_children_ticks_user.load(Ordering::Relaxed),
            kernel_ticks: self.dead_children_ticks_kernel.load(Ordering::Relaxed),
        }
    }

    /// Fold a finalized child's usage (its own plus its dead children's)
    /// into this process's aggregate. Caller holds the registry lock.
    pub(crate) fn fold_dead_child_time(&self, own: CpuTime, inherited: CpuTime) {
        self.dead_children_ticks_user
            .fetch_add(own.user_ticks + inherited.user_ticks, Ordering::Relaxed);
        self.dead_children_ticks_kernel.fetch_add(
            own.kernel_ticks + inherited.kernel_ticks,
            Ordering::Relaxed,
        );
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        // Threads finalize before their process is destroyed.
        assert_eq!(
            self.thread_group.count(),
            0,
            "process {} destroyed with live threads",
            self.pid
        );
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name.lock())
            .field("state", &self.state())
            .field("threads", &self.thread_group.count())
            .field("kernel", &self.is_kernel)
            .finish()
    }
}
