/*!
 * Core Types
 * Identity newtypes, CPU affinity masks and shared value types
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identity (64-bit, never reused within an uptime)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Pid(pub u64);

/// Thread identity, drawn from the same namespace as [`Pid`].
///
/// A process's main thread aliases the process identity; every other thread
/// carries a fresh value from the shared allocator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Tid(pub u64);

/// File descriptor index into a process's descriptor table
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Fd(pub u32);

impl Pid {
    /// The distinguished bootstrap identity; never registered.
    pub const BOOTSTRAP: Pid = Pid(0);

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Identity of this process's main thread.
    #[inline]
    pub const fn main_tid(self) -> Tid {
        Tid(self.0)
    }
}

impl Tid {
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl Fd {
    pub const STDIN: Fd = Fd(0);
    pub const STDOUT: Fd = Fd(1);
    pub const STDERR: Fd = Fd(2);

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identity
pub type Uid = u32;

/// Group identity
pub type Gid = u32;

/// CPU-affinity mask, one bit per CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuAffinity(pub u64);

impl CpuAffinity {
    /// Runnable on every CPU.
    pub const ANY: CpuAffinity = CpuAffinity(u64::MAX);

    /// Pinned to a single CPU.
    #[inline]
    pub const fn pinned(cpu: u32) -> Self {
        CpuAffinity(1 << (cpu as u64 % 64))
    }

    #[inline]
    pub const fn allows(self, cpu: u32) -> bool {
        self.0 & (1 << (cpu as u64 % 64)) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for CpuAffinity {
    fn default() -> Self {
        CpuAffinity::ANY
    }
}

/// CPU-time usage split into user and kernel ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTime {
    pub user_ticks: u64,
    pub kernel_ticks: u64,
}

impl CpuTime {
    #[inline]
    pub const fn total(self) -> u64 {
        self.user_ticks + self.kernel_ticks
    }
}
