/*!
 * Diagnostics Module
 * Crash reports, core dumps, performance events, symbols, wall clock
 */

pub mod clock;
pub mod coredump;
pub mod crash;
pub mod perf;
pub mod symbols;

// Re-export public API
pub use clock::{Clock, FixedClock, WallClock};
pub use coredump::CoreDump;
pub use crash::{BacktraceFrame, CrashReport};
pub use perf::{PerfEvent, PerfEventBuffer, PerfEventKind, PerfReport};
pub use symbols::{Symbol, SymbolTable};

use crate::core::limits::DUMP_DIRECTORY;
use crate::core::types::Pid;

/// Dump/report path under the fixed dump directory:
/// `<name>_<identity>_<unix-seconds>.<suffix>`. Path separators in the
/// process name are flattened so the name cannot escape the directory.
pub fn dump_path(name: &str, pid: Pid, unix_seconds: i64, suffix: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
        .collect();
    format!("{DUMP_DIRECTORY}/{safe}_{pid}_{unix_seconds}.{suffix}")
}
