/*!
 * Process Module
 * Process and thread objects, registry, lifecycle control and the
 * wait/reap protocol
 */

pub mod credentials;
pub mod fd_table;
mod finalizer;
pub mod group;
pub mod lifecycle;
pub mod process;
pub mod registry;
pub mod thread;
pub mod wait;

// Re-export for convenience
pub use credentials::Credentials;
pub use fd_table::{FdFlags, FdTable};
pub use group::ThreadGroup;
pub use lifecycle::{KernelEntry, Lifecycle, LifecycleBuilder};
pub use process::{Process, ProcessState, TracerState, WaitCause, WaitInfo};
pub use registry::ProcessRegistry;
pub use thread::{Blocker, CpuContext, Thread, ThreadState};
pub use wait::WaitCondition;
