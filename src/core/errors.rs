/*!
 * Error Types
 * Typed recoverable errors per subsystem plus the kernel-wide umbrella
 */

use crate::core::types::{Fd, Pid, Tid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Process lifecycle, registry and descriptor-table errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessError {
    #[error("no such process: {0}")]
    NotFound(Pid),

    #[error("no such thread: {0}")]
    ThreadNotFound(Tid),

    #[error("descriptor table full ({capacity} slots)")]
    FdTableFull { capacity: usize },

    #[error("descriptor {0} out of range")]
    BadFd(Fd),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("exec failed: {0}")]
    Exec(#[from] ExecError),
}

/// Filesystem capability errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VfsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Program-loading capability errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecError {
    #[error("executable not found: {0}")]
    NotFound(String),

    #[error("not executable: {0}")]
    NotExecutable(String),

    #[error("malformed image: {0}")]
    MalformedImage(String),
}

impl From<VfsError> for ExecError {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::NotFound(path) => ExecError::NotFound(path),
            VfsError::AccessDenied(path) => ExecError::NotExecutable(path),
            other => ExecError::MalformedImage(other.to_string()),
        }
    }
}

/// Signal routing errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalError {
    #[error("no such process: {0}")]
    NoSuchProcess(Pid),

    #[error("invalid signal number: {0}")]
    InvalidSignal(u32),
}

/// Wait/reap protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitError {
    /// The waiting thread received a signal before the child terminated.
    #[error("wait interrupted by signal")]
    Interrupted,

    #[error("no waitable child: {0}")]
    NoChild(Pid),
}

/// Kernel-wide error umbrella
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

impl From<ExecError> for KernelError {
    fn from(err: ExecError) -> Self {
        KernelError::Process(ProcessError::Exec(err))
    }
}

pub type ProcessResult<T> = Result<T, ProcessError>;
pub type VfsResult<T> = Result<T, VfsError>;
pub type ExecResult<T> = Result<T, ExecError>;
pub type SignalResult<T> = Result<T, SignalError>;
pub type WaitResult<T> = Result<T, WaitError>;
pub type KernelResult<T> = Result<T, KernelError>;
