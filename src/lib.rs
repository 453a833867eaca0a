/*!
 * Vesper Kernel Library
 * Process and thread lifecycle core exposed as a library
 */

pub mod core;
pub mod diagnostics;
pub mod exec;
pub mod memory;
pub mod process;
pub mod sched;
pub mod signals;
pub mod vfs;

// Re-exports
pub use crate::core::errors::{KernelError, KernelResult};
pub use crate::core::id::IdAllocator;
pub use crate::core::types::{CpuAffinity, CpuTime, Fd, Gid, Pid, Tid, Uid};
pub use process::{
    Credentials, KernelEntry, Lifecycle, LifecycleBuilder, Process, ProcessRegistry, ProcessState,
    Thread, ThreadState, WaitCause, WaitInfo,
};
pub use sched::Scheduler;
pub use signals::{Signal, SignalRouter};
pub use vfs::{Terminal, Vfs};
