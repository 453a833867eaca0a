/*!
 * Crash Reports
 * Diagnostic assembly and logging for a crashing process
 *
 * Assembly happens before `die()` runs, while the thread group is intact.
 * Under out-of-memory the report skips every collection that would
 * allocate, keeping the crash path viable when allocation is the problem.
 */

use crate::core::limits::KERNEL_VIRTUAL_BASE;
use crate::core::types::Pid;
use crate::diagnostics::symbols::SymbolTable;
use crate::memory::Region;
use crate::process::process::Process;
use crate::process::thread::Thread;
use crate::signals::Signal;
use log::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacktraceFrame {
    pub address: u64,
    pub symbol: Option<String>,
}

impl BacktraceFrame {
    fn resolve(address: u64, symbols: &SymbolTable) -> BacktraceFrame {
        let symbol = if address >= KERNEL_VIRTUAL_BASE {
            symbols.resolve_display(address)
        } else {
            None
        };
        BacktraceFrame { address, symbol }
    }
}

#[derive(Debug, Clone)]
pub struct CrashReport {
    pub pid: Pid,
    pub name: String,
    pub signal: Signal,
    pub fault_address: Option<u64>,
    /// `name+offset` when the fault lies in the kernel half.
    pub fault_symbol: Option<String>,
    pub out_of_memory: bool,
    pub backtrace: Vec<BacktraceFrame>,
    pub regions: Vec<Region>,
}

impl CrashReport {
    /// Assemble the report from the crashing thread's saved context.
    ///
    /// The backtrace holds the faulting frame only: walking the caller
    /// chain needs guest stack memory, which stays with the paging layer.
    pub fn assemble(
        process: &Process,
        thread: &Thread,
        signal: Signal,
        fault_address: Option<u64>,
        out_of_memory: bool,
        symbols: &SymbolTable,
    ) -> CrashReport {
        let fault_symbol = fault_address
            .filter(|addr| *addr >= KERNEL_VIRTUAL_BASE)
            .and_then(|addr| symbols.resolve_display(addr));

        let (backtrace, regions) = if out_of_memory {
            (Vec::new(), Vec::new())
        } else {
            let context = thread.context();
            (
                vec![BacktraceFrame::resolve(
                    context.instruction_pointer,
                    symbols,
                )],
                process.space().regions_snapshot(),
            )
        };

        CrashReport {
            pid: process.pid(),
            name: process.name(),
            signal,
            fault_address,
            fault_symbol,
            out_of_memory,
            backtrace,
            regions,
        }
    }

    pub fn log(&self) {
        error!("pid {} ({}) crashed: {}", self.pid, self.name, self.signal);
        match (self.fault_address, &self.fault_symbol) {
            (Some(addr), Some(symbol)) => error!("  fault address {addr:#x} in {symbol}"),
            (Some(addr), None) => error!("  fault address {addr:#x}"),
            (None, _) => {}
        }
        if self.out_of_memory {
            warn!("  out of memory, report abbreviated");
            return;
        }
        for frame in &self.backtrace {
            match &frame.symbol {
                Some(symbol) => error!("  at {:#x} {}", frame.address, symbol),
                None => error!("  at {:#x}", frame.address),
            }
        }
        for region in &self.regions {
            error!(
                "  region {:#x}..{:#x} {} {}",
                region.base,
                region.base + region.size,
                region.protection.describe(),
                region.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CpuAffinity, Tid};
    use crate::memory::Protection;
    use crate::process::thread::CpuContext;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn crashing_pair(ip: u64) -> (Arc<Process>, Arc<Thread>) {
        let process = Process::for_tests(Pid(30), "segfaulter");
        process
            .space()
            .add_region("text", 0x40_0000, 0x1000, Protection::READ | Protection::EXECUTE);
        let thread = Thread::new(
            Tid(30),
            &process,
            "main",
            CpuContext::at(ip, 0x7fff_0000),
            CpuAffinity::ANY,
        );
        (process, thread)
    }

    #[test]
    fn test_kernel_fault_is_symbolicated() {
        let (process, thread) = crashing_pair(KERNEL_VIRTUAL_BASE + 0x1010);
        let symbols = SymbolTable::with_kernel_map();

        let report = CrashReport::assemble(
            &process,
            &thread,
            Signal::SIGSEGV,
            Some(KERNEL_VIRTUAL_BASE + 0x1010),
            false,
            &symbols,
        );

        assert_eq!(report.fault_symbol.as_deref(), Some("kernel_main+0x10"));
        assert_eq!(report.backtrace.len(), 1);
        assert_eq!(
            report.backtrace[0].symbol.as_deref(),
            Some("kernel_main+0x10")
        );
        assert_eq!(report.regions.len(), 1);
    }

    #[test]
    fn test_user_fault_is_not_symbolicated() {
        let (process, thread) = crashing_pair(0x40_0123);
        let symbols = SymbolTable::with_kernel_map();

        let report = CrashReport::assemble(
            &process,
            &thread,
            Signal::SIGSEGV,
            Some(0x40_0123),
            false,
            &symbols,
        );

        assert_eq!(report.fault_symbol, None);
        assert_eq!(report.backtrace[0].symbol, None);
        assert_eq!(report.backtrace[0].address, 0x40_0123);
    }

    #[test]
    fn test_oom_report_is_abbreviated() {
        let (process, thread) = crashing_pair(0x40_0123);
        let symbols = SymbolTable::with_kernel_map();

        let report = CrashReport::assemble(
            &process,
            &thread,
            Signal::SIGSEGV,
            Some(0x40_0123),
            true,
            &symbols,
        );

        assert!(report.out_of_memory);
        assert!(report.backtrace.is_empty());
        assert!(report.regions.is_empty());
    }
}
