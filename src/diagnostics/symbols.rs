/*!
 * Kernel Symbols
 * Address-to-symbol resolution for crash reports
 *
 * An injectable table, not a global: the lifecycle controller owns one and
 * hands it to crash assembly. Symbols stay sorted by address so containing-
 * symbol lookup is a binary search.
 */

use crate::core::limits::KERNEL_VIRTUAL_BASE;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

pub struct SymbolTable {
    // Sorted by address, non-overlapping.
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable {
            symbols: Vec::new(),
        }
    }

    /// A table seeded with the kernel map entries crash paths care about.
    /// A real build would parse the ELF symbol table instead.
    pub fn with_kernel_map() -> SymbolTable {
        let mut table = SymbolTable::new();
        table.add("_start", KERNEL_VIRTUAL_BASE, 0x100);
        table.add("kernel_main", KERNEL_VIRTUAL_BASE + 0x1000, 0x500);
        table.add("schedule", KERNEL_VIRTUAL_BASE + 0x8000, 0x300);
        table.add("signal_dispatch", KERNEL_VIRTUAL_BASE + 0xc000, 0x200);
        table.add("page_fault_handler", KERNEL_VIRTUAL_BASE + 0x1_0000, 0x200);
        table.add("finalize_task", KERNEL_VIRTUAL_BASE + 0x1_4000, 0x400);
        table
    }

    pub fn add(&mut self, name: impl Into<String>, address: u64, size: u64) {
        self.symbols.push(Symbol {
            name: name.into(),
            address,
            size,
        });
        self.symbols.sort_by_key(|s| s.address);
    }

    /// Find the symbol containing `address`, with the offset into it.
    pub fn resolve(&self, address: u64) -> Option<(&Symbol, u64)> {
        let idx = self
            .symbols
            .binary_search_by(|s| {
                if address < s.address {
                    Ordering::Greater
                } else if address >= s.address + s.size {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()?;
        let symbol = &self.symbols[idx];
        Some((symbol, address - symbol.address))
    }

    /// `name+0x<offset>` rendering, or none if the address is unmapped.
    pub fn resolve_display(&self, address: u64) -> Option<String> {
        self.resolve(address)
            .map(|(symbol, offset)| format!("{}+{:#x}", symbol.name, offset))
    }

    pub fn count(&self) -> usize {
        self.symbols.len()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
