/*!
 * Address Space
 * Region bookkeeping behind the address-space capability
 *
 * Paging and allocator internals live elsewhere; the lifecycle core only
 * needs region ownership: create (optionally cloned from a fork source),
 * enumerate for diagnostics, and release everything at finalization.
 */

use crate::core::types::Pid;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::Arc;

bitflags! {
    /// Region protection bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Protection: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Protection {
    /// Compact `rwx` rendering for reports.
    pub fn describe(&self) -> String {
        let mut s = String::with_capacity(3);
        s.push(if self.contains(Self::READ) { 'r' } else { '-' });
        s.push(if self.contains(Self::WRITE) { 'w' } else { '-' });
        s.push(if self.contains(Self::EXECUTE) { 'x' } else { '-' });
        s
    }
}

/// One mapped region of an address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub size: u64,
    pub name: String,
    pub protection: Protection,
}

impl Region {
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base.saturating_add(self.size)
    }
}

/// Per-process address space: an owned region list.
#[derive(Debug)]
pub struct AddressSpace {
    owner: Pid,
    regions: Mutex<Vec<Region>>,
}

impl AddressSpace {
    /// Create an address space for `owner`, cloned from `fork_source` when
    /// present, else empty.
    pub fn create(owner: Pid, fork_source: Option<&AddressSpace>) -> Arc<AddressSpace> {
        let regions = match fork_source {
            Some(source) => source.regions.lock().clone(),
            None => Vec::new(),
        };
        Arc::new(AddressSpace {
            owner,
            regions: Mutex::new(regions),
        })
    }

    #[inline]
    pub fn owner(&self) -> Pid {
        self.owner
    }

    /// Map a region. Overlap checking is the paging layer's concern.
    pub fn add_region(&self, name: impl Into<String>, base: u64, size: u64, protection: Protection) {
        self.regions.lock().push(Region {
            base,
            size,
            name: name.into(),
            protection,
        });
    }

    /// Region containing `addr`, if any.
    pub fn find_region(&self, addr: u64) -> Option<Region> {
        self.regions.lock().iter().find(|r| r.contains(addr)).cloned()
    }

    /// Copy of the region table, for iteration without the lock.
    pub fn regions_snapshot(&self) -> Vec<Region> {
        self.regions.lock().clone()
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.lock().len()
    }

    /// Release every mapping. Idempotent.
    pub fn remove_all_regions(&self) {
        self.regions.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_and_stack(space: &AddressSpace) {
        space.add_region("text", 0x40_0000, 0x1000, Protection::READ | Protection::EXECUTE);
        space.add_region("stack", 0x7fff_0000, 0x10000, Protection::READ | Protection::WRITE);
    }

    #[test]
    fn test_create_empty() {
        let space = AddressSpace::create(Pid(1), None);
        assert_eq!(space.owner(), Pid(1));
        assert_eq!(space.region_count(), 0);
    }

    #[test]
    fn test_fork_clone_copies_regions() {
        let parent = AddressSpace::create(Pid(1), None);
        text_and_stack(&parent);

        let child = AddressSpace::create(Pid(2), Some(&parent));
        assert_eq!(child.region_count(), 2);
        assert_eq!(child.regions_snapshot(), parent.regions_snapshot());

        // Later parent mappings must not leak into the child.
        parent.add_region("heap", 0x60_0000, 0x2000, Protection::READ | Protection::WRITE);
        assert_eq!(child.region_count(), 2);
    }

    #[test]
    fn test_find_region() {
        let space = AddressSpace::create(Pid(1), None);
        text_and_stack(&space);

        let hit = space.find_region(0x40_0800).unwrap();
        assert_eq!(hit.name, "text");
        assert!(space.find_region(0xdead_0000_0000).is_none());
    }

    #[test]
    fn test_remove_all_regions_idempotent() {
        let space = AddressSpace::create(Pid(1), None);
        text_and_stack(&space);

        space.remove_all_regions();
        assert_eq!(space.region_count(), 0);
        space.remove_all_regions();
        assert_eq!(space.region_count(), 0);
    }

    #[test]
    fn test_protection_describe() {
        assert_eq!((Protection::READ | Protection::EXECUTE).describe(), "r-x");
        assert_eq!(Protection::WRITE.describe(), "-w-");
        assert_eq!(Protection::empty().describe(), "---");
    }
}
