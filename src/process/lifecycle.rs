/*!
 * Lifecycle Controller
 * Creation, termination, finalization and reaping of processes
 *
 * One controller instance owns the identity allocator, registry, scheduler
 * front and finalizer; every lifecycle operation goes through it rather
 * than through globals. Termination is a three-act protocol: `die` marks
 * the process and its threads, threads retire at their next scheduling
 * boundary, and the finalizer tears the process down once the last thread
 * is gone.
 */

use crate::core::errors::{
    KernelResult, ProcessError, ProcessResult, SignalResult, WaitError, WaitResult,
};
use crate::core::id::IdAllocator;
use crate::core::limits::{
    COREDUMP_SUFFIX, KERNEL_STACK_BASE, KERNEL_STACK_SIZE, PERF_REPORT_SUFFIX, PREBOUND_FDS,
};
use crate::core::types::{CpuAffinity, Fd, Pid, Tid};
use crate::diagnostics::{dump_path, Clock, CoreDump, CrashReport, PerfReport, SymbolTable, WallClock};
use crate::exec::Loader;
use crate::memory::AddressSpace;
use crate::process::credentials::Credentials;
use crate::process::fd_table::FdFlags;
use crate::process::finalizer::{FinalizeToken, Finalizer};
use crate::process::process::{Process, ProcessState, WaitInfo};
use crate::process::registry::ProcessRegistry;
use crate::process::thread::{CpuContext, Thread, ThreadState};
use crate::process::wait::Disposition;
use crate::sched::Scheduler;
use crate::signals::{Signal, SignalRouter};
use crate::vfs::{OpenFlags, Terminal, Vfs};
use log::{debug, info, warn};
use std::sync::{Arc, Weak};

/// A kernel entry function, paired with the opaque argument passed at
/// creation.
pub type KernelEntry = fn(usize);

/// Builds a [`Lifecycle`] with injected collaborators. Anything not
/// supplied gets a working default.
pub struct LifecycleBuilder {
    vfs: Option<Arc<Vfs>>,
    symbols: Option<SymbolTable>,
    clock: Option<Arc<dyn Clock>>,
}

impl LifecycleBuilder {
    pub fn new() -> LifecycleBuilder {
        LifecycleBuilder {
            vfs: None,
            symbols: None,
            clock: None,
        }
    }

    pub fn with_vfs(mut self, vfs: Arc<Vfs>) -> Self {
        self.vfs = Some(vfs);
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Arc<Lifecycle> {
        let vfs = self.vfs.unwrap_or_else(Vfs::new);
        let symbols = self.symbols.unwrap_or_else(SymbolTable::with_kernel_map);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(WallClock) as Arc<dyn Clock>);
        let registry = Arc::new(ProcessRegistry::new());

        Arc::new_cyclic(|weak: &Weak<Lifecycle>| {
            let worker = Weak::clone(weak);
            let finalizer = Finalizer::start(move |process, token| {
                if let Some(lifecycle) = worker.upgrade() {
                    lifecycle.finalize(process, token);
                }
            });
            Lifecycle {
                router: SignalRouter::new(Arc::clone(&registry)),
                loader: Loader::new(Arc::clone(&vfs)),
                registry,
                scheduler: Arc::new(Scheduler::new()),
                vfs,
                ids: IdAllocator::new(),
                symbols,
                clock,
                finalizer,
            }
        })
    }
}

impl Default for LifecycleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Lifecycle {
    registry: Arc<ProcessRegistry>,
    scheduler: Arc<Scheduler>,
    vfs: Arc<Vfs>,
    loader: Loader,
    router: SignalRouter,
    ids: IdAllocator,
    symbols: SymbolTable,
    clock: Arc<dyn Clock>,
    finalizer: Finalizer,
}

impl Lifecycle {
    pub fn builder() -> LifecycleBuilder {
        LifecycleBuilder::new()
    }

    pub fn new() -> Arc<Lifecycle> {
        LifecycleBuilder::new().build()
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    #[inline]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    #[inline]
    pub fn vfs(&self) -> &Arc<Vfs> {
        &self.vfs
    }

    pub fn find(&self, pid: Pid) -> Option<Arc<Process>> {
        self.registry.find(pid)
    }

    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.registry.snapshot()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.registry.pids()
    }

    /// Deliver a process-directed signal; see [`SignalRouter::send_signal`].
    pub fn send_signal(&self, pid: Pid, signal: Signal, sender: Option<Pid>) -> SignalResult<()> {
        self.router.send_signal(pid, signal, sender)
    }

    /// Block until every process queued for finalization so far has been
    /// torn down.
    pub fn drain_finalizer(&self) {
        self.finalizer.flush();
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a kernel process whose sole thread starts at `entry` with
    /// `argument` in its first-argument register.
    ///
    /// The first identity ever allocated is the bootstrap identity; that
    /// process is never registered and stays invisible to enumeration.
    pub fn create_kernel_process(
        &self,
        name: &str,
        entry: KernelEntry,
        argument: usize,
        affinity: CpuAffinity,
    ) -> Arc<Process> {
        let pid = self.ids.allocate_pid();
        let space = AddressSpace::create(pid, None);
        let process = Process::new(pid, name, Credentials::root(), None, space, true);

        let tid = pid.main_tid();
        let context = CpuContext {
            instruction_pointer: entry as usize as u64,
            stack_pointer: kernel_stack_top(tid),
            argument: argument as u64,
        };
        let thread = Thread::new(tid, &process, name, context, affinity);
        process.thread_group().add(Arc::clone(&thread));

        if pid == Pid::BOOTSTRAP {
            debug!("pid 0 is the bootstrap identity; not registered");
        } else {
            self.registry.insert(Arc::clone(&process));
        }
        self.scheduler.make_runnable(thread);
        info!("created kernel process '{name}' (pid {pid})");
        process
    }

    /// Spawn an additional kernel thread inside an existing process.
    pub fn create_kernel_thread(
        &self,
        process: &Arc<Process>,
        name: &str,
        entry: KernelEntry,
        argument: usize,
    ) -> ProcessResult<Arc<Thread>> {
        if process.state() != ProcessState::Active {
            return Err(ProcessError::InvalidArgument(format!(
                "pid {} is not active",
                process.pid()
            )));
        }

        let tid = self.ids.allocate_tid();
        let context = CpuContext {
            instruction_pointer: entry as usize as u64,
            stack_pointer: kernel_stack_top(tid),
            argument: argument as u64,
        };
        let thread = Thread::new(tid, process, name, context, CpuAffinity::ANY);
        process.thread_group().add(Arc::clone(&thread));
        self.scheduler.make_runnable(Arc::clone(&thread));
        debug!(
            "spawned kernel thread '{}' (tid {}) in pid {}",
            name,
            tid,
            process.pid()
        );
        Ok(thread)
    }

    /// Create a user process by loading `path`.
    ///
    /// Directories are inherited from the parent (falling back to the
    /// filesystem root), the standard descriptors bind to the controlling
    /// terminal or the null device, and the image is loaded before the
    /// process becomes visible: a failed exec aborts creation without a
    /// trace in the registry.
    pub fn create_user_process(
        &self,
        path: &str,
        credentials: Credentials,
        parent: Option<Pid>,
        argv: Vec<String>,
        envp: Vec<String>,
        tty: Option<Arc<Terminal>>,
    ) -> KernelResult<Arc<Process>> {
        let pid = self.ids.allocate_pid();

        // Inherit under the registry lock so the parent cannot finalize
        // between lookup and copy.
        let (cwd, root_dir) = self.registry.locked(|| {
            match parent.and_then(|pp| self.registry.find(pp)) {
                Some(parent) => (parent.cwd(), parent.root_dir()),
                None => (None, None),
            }
        });
        let cwd = cwd.unwrap_or_else(|| self.vfs.root_directory());
        let root_dir = root_dir.unwrap_or_else(|| self.vfs.root_directory());

        let space = AddressSpace::create(pid, None);
        let process = Process::new(pid, basename(path), credentials.clone(), parent, space, false);
        process.set_cwd(cwd.clone());
        process.set_root_dir(root_dir.clone());
        process.set_tty(tty.clone());

        let device = match &tty {
            Some(terminal) => format!("/dev/{}", terminal.name()),
            None => "/dev/null".to_string(),
        };
        let standard = self
            .vfs
            .open(&device, OpenFlags::read_write(), 0, &root_dir, &credentials)?;
        for fd in 0..PREBOUND_FDS {
            process
                .fds()
                .set(Fd(fd as u32), Arc::clone(&standard), FdFlags::empty())?;
        }

        let image = self
            .loader
            .load(path, &argv, &envp, &cwd, &credentials, process.space())?;
        process.set_executable(Arc::clone(&image.executable));
        process.set_arguments(argv, envp);

        let thread = Thread::new(
            pid.main_tid(),
            &process,
            process.name(),
            CpuContext::at(image.entry_point, image.stack_pointer),
            CpuAffinity::ANY,
        );
        process.thread_group().add(Arc::clone(&thread));

        // Registration is deliberately last.
        self.registry.insert(Arc::clone(&process));
        self.scheduler.make_runnable(thread);
        info!(
            "created user process '{}' (pid {}, uid {})",
            process.name(),
            pid,
            process.credentials().uid
        );
        Ok(process)
    }

    /// Fork the calling thread's process. The child is single-threaded: only
    /// the caller crosses over, and its saved context is the child's
    /// starting point.
    pub fn fork(&self, calling_thread: &Arc<Thread>) -> KernelResult<Arc<Process>> {
        let parent = calling_thread
            .process()
            .ok_or(ProcessError::NotFound(calling_thread.pid()))?;

        let pid = self.ids.allocate_pid();
        let space = AddressSpace::create(pid, Some(parent.space().as_ref()));
        let child = Process::new(
            pid,
            parent.name(),
            parent.credentials(),
            Some(parent.pid()),
            space,
            false,
        );

        if let Some(dir) = parent.cwd() {
            child.set_cwd(dir);
        }
        if let Some(dir) = parent.root_dir() {
            child.set_root_dir(dir);
        }
        child.set_tty(parent.tty());
        child.fds().inherit(parent.fds());
        if let Some(node) = parent.executable() {
            child.set_executable(node);
        }
        child.set_arguments(parent.arguments(), parent.environment());

        let thread = Thread::new(
            pid.main_tid(),
            &child,
            calling_thread.name(),
            calling_thread.context(),
            calling_thread.affinity(),
        );
        child.thread_group().add(Arc::clone(&thread));

        self.registry.insert(Arc::clone(&child));
        self.scheduler.make_runnable(thread);
        info!("pid {} forked into pid {}", parent.pid(), pid);
        Ok(child)
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Record a fatal fault and start the faulting thread's process dying.
    ///
    /// Only a user process can crash; a kernel-process fault cannot be
    /// contained and panics. `out_of_memory` abbreviates the report, since
    /// assembling a full one allocates.
    ///
    /// # Panics
    /// On a kernel process, or when the process is already dying or dead.
    pub fn crash(
        &self,
        thread: &Arc<Thread>,
        signal: Signal,
        fault_address: Option<u64>,
        out_of_memory: bool,
    ) {
        let process = match thread.process() {
            Some(process) => process,
            None => panic!("crash on tid {} whose process is gone", thread.tid()),
        };
        assert!(
            !process.is_kernel_process(),
            "kernel process {} ({}) crashed: {}",
            process.pid(),
            process.name(),
            signal
        );
        assert_eq!(
            process.state(),
            ProcessState::Active,
            "crash on pid {} in state {:?}",
            process.pid(),
            process.state()
        );

        let report = CrashReport::assemble(
            &process,
            thread,
            signal,
            fault_address,
            out_of_memory,
            &self.symbols,
        );
        report.log();

        process.set_termination_signal(signal);
        process.set_dump_core(true);
        self.die(&process);
    }

    /// Kill the whole process in response to a fatal signal. Unlike
    /// [`crash`](Self::crash) this is a clean kill: no report, no dump.
    pub fn terminate_due_to_signal(&self, thread: &Arc<Thread>, signal: Signal) {
        let Some(process) = thread.process() else {
            return;
        };
        info!(
            "pid {} ({}) terminating: {}",
            process.pid(),
            process.name(),
            signal
        );
        process.set_termination_status(0);
        process.set_termination_signal(signal);
        self.die(&process);
    }

    /// Voluntary exit with a status code, from one of the exiting process's
    /// own threads.
    pub fn exit(&self, thread: &Arc<Thread>, status: i32) {
        let Some(process) = thread.process() else {
            return;
        };
        info!(
            "pid {} ({}) exiting with status {}",
            process.pid(),
            process.name(),
            status
        );
        process.set_termination_status(status);
        self.die(&process);
    }

    /// Take `process` from Active to Dying: drop the controlling terminal,
    /// then mark, detach and wake every member thread. Threads retire at
    /// their next scheduling boundary; finalization starts when the last
    /// one does.
    fn die(&self, process: &Arc<Process>) {
        process.begin_dying();

        // The paired terminal endpoint must observe the release before any
        // thread teardown.
        process.release_tty();

        let threads = process.thread_group().snapshot();
        debug!("pid {} dying with {} thread(s)", process.pid(), threads.len());
        for thread in &threads {
            if thread.is_joinable() {
                thread.detach();
            }
            thread.mark_should_die();
        }
    }

    /// Retire a thread at its scheduling boundary: it becomes Dead and
    /// leaves the group. Retiring the last member queues the process for
    /// finalization.
    pub fn retire_thread(&self, thread: &Arc<Thread>) {
        thread.set_state(ThreadState::Dead);
        let Some(process) = thread.process() else {
            return;
        };
        let last = process.thread_group().remove(thread);
        debug!(
            "tid {} retired (pid {}, last: {})",
            thread.tid(),
            process.pid(),
            last
        );
        if last {
            if process.state() == ProcessState::Active {
                // Every thread exited on its own; run the dying steps with
                // an already-empty group before handing off.
                self.die(&process);
            }
            self.finalizer.enqueue(process);
        }
    }

    /// Retire every member currently marked for death. Stands in for the
    /// per-CPU scheduling boundary in an embedding without one.
    pub fn retire_marked_threads(&self, process: &Arc<Process>) {
        for thread in process.thread_group().snapshot() {
            if thread.should_die() {
                self.retire_thread(&thread);
            }
        }
    }

    // ------------------------------------------------------------------
    // Finalization and reaping
    // ------------------------------------------------------------------

    /// Tear a thread-less process down. Runs only on the finalizer context.
    fn finalize(&self, process: Arc<Process>, _token: &FinalizeToken) {
        assert_eq!(
            process.thread_count(),
            0,
            "finalizing pid {} with live threads",
            process.pid()
        );
        process.claim_finalize();
        debug!("finalizing pid {} ({})", process.pid(), process.name());

        // 1. Diagnostics, while the address space is still mapped.
        if process.should_dump_core() {
            self.write_dumps(&process);
        }

        // 2. Owned resources: descriptors, terminal, image, directories,
        //    argument vectors.
        process.fds().clear_all();
        process.release_tty();
        process.clear_executable();
        process.clear_directories();
        process.clear_arguments();

        // 3. Globally observable as dead from here on.
        process.mark_dead();

        // 4. Notify the parent, unless it opted out of child signals.
        let parent = process.parent().and_then(|pid| self.registry.find(pid));
        if let Some(parent) = parent.as_ref() {
            if !parent.wait_opt_out() {
                if let Some(main) = parent.main_thread() {
                    main.deliver(Signal::SIGCHLD);
                }
            }
        }

        // 5. Fold CPU time into the parent under the registry lock, so the
        //    aggregate moves atomically against registration changes.
        if let Some(parent) = parent.as_ref() {
            self.registry.locked(|| {
                parent.fold_dead_child_time(process.cpu_time(), process.dead_children_time());
            });
        }

        // 6. Wake anyone blocked waiting on this process.
        process.wait_condition().signal_terminated(process.wait_info());

        // 7. The address space empties now; the dump above was its last
        //    reader.
        process.space().remove_all_regions();

        // 8. Keeper disposition. Surviving children are disowned first so
        //    their own disposition takes the drop-now path.
        for child in self.registry.children_of(process.pid()) {
            child.set_parent(None);
            if let Some(zombie) = child.wait_condition().disown() {
                self.registry.remove(zombie.pid());
                info!("dropped disowned zombie pid {}", zombie.pid());
            }
        }
        let consumer_expected = parent.map(|p| !p.wait_opt_out()).unwrap_or(false);
        match process
            .wait_condition()
            .dispose(Arc::clone(&process), consumer_expected)
        {
            Disposition::Deferred => {
                debug!("pid {} parked as zombie awaiting reap", process.pid());
            }
            Disposition::DropNow => {
                self.registry.remove(process.pid());
            }
        }
    }

    /// Best-effort core dump and performance report. Failures are logged,
    /// never fatal; finalization proceeds regardless.
    fn write_dumps(&self, process: &Arc<Process>) {
        let stamp = self.clock.unix_seconds();
        if process.space().region_count() > 0 {
            let path = dump_path(&process.name(), process.pid(), stamp, COREDUMP_SUFFIX);
            let dump = CoreDump::create(Arc::clone(process), Arc::clone(&self.vfs), path);
            if let Err(err) = dump.write() {
                warn!("core dump for pid {} failed: {}", process.pid(), err);
            }
        }
        if process.perf_events().is_some() {
            let path = dump_path(&process.name(), process.pid(), stamp, PERF_REPORT_SUFFIX);
            let report = PerfReport::create(Arc::clone(process), Arc::clone(&self.vfs), path);
            if let Err(err) = report.write() {
                warn!("performance report for pid {} failed: {}", process.pid(), err);
            }
        }
    }

    /// Block until `child` terminates, consume its terminal state and
    /// unregister it. Only the recorded parent may reap. A pending signal
    /// on the waiting thread interrupts with [`WaitError::Interrupted`].
    pub fn wait_for_child(&self, waiter: &Arc<Thread>, child: Pid) -> WaitResult<WaitInfo> {
        let target = self.registry.find(child).ok_or(WaitError::NoChild(child))?;
        if target.parent() != Some(waiter.pid()) {
            return Err(WaitError::NoChild(child));
        }
        let condition = target.wait_condition();
        // Our own handle goes before blocking; the keeper protocol owns the
        // child's lifetime from here.
        drop(target);

        let reaped = condition.wait(waiter)?;
        self.registry.remove(child);
        debug!(
            "pid {} reaped child {}: {:?}",
            waiter.pid(),
            child,
            reaped.info.cause
        );
        Ok(reaped.info)
    }
}

fn kernel_stack_top(tid: Tid) -> u64 {
    KERNEL_STACK_BASE + (tid.as_raw() + 1) * KERNEL_STACK_SIZE
}

fn basename(path: &str) -> &str {
    path.rsplit('/').find(|part| !part.is_empty()).unwrap_or(path)
}
