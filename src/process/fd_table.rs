/*!
 * File Descriptor Table
 * Fixed-capacity per-process slot array of owned I/O handles
 */

use crate::core::errors::{ProcessError, ProcessResult};
use crate::core::limits::MAX_OPEN_FILES;
use crate::core::types::Fd;
use crate::vfs::OpenFile;
use bitflags::bitflags;
use parking_lot::Mutex;
use std::sync::Arc;

bitflags! {
    /// Per-slot flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FdFlags: u32 {
        const CLOEXEC = 1 << 0;
    }
}

#[derive(Debug)]
struct FdEntry {
    file: Arc<OpenFile>,
    flags: FdFlags,
}

/// Descriptor table. Private to its process: mutated only by a thread acting
/// as that process, or by the finalizer once the process cannot run.
#[derive(Debug)]
pub struct FdTable {
    slots: Mutex<Vec<Option<FdEntry>>>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_OPEN_FILES);
        slots.resize_with(MAX_OPEN_FILES, || None);
        Self {
            slots: Mutex::new(slots),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        MAX_OPEN_FILES
    }

    /// First empty slot at or after `hint`. Does not install anything.
    pub fn allocate(&self, hint: Fd) -> ProcessResult<Fd> {
        let slots = self.slots.lock();
        for idx in hint.as_index()..slots.len() {
            if slots[idx].is_none() {
                return Ok(Fd(idx as u32));
            }
        }
        Err(ProcessError::FdTableFull {
            capacity: MAX_OPEN_FILES,
        })
    }

    /// Install a handle into `fd`, replacing any previous occupant.
    pub fn set(&self, fd: Fd, file: Arc<OpenFile>, flags: FdFlags) -> ProcessResult<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(fd.as_index())
            .ok_or(ProcessError::BadFd(fd))?;
        *slot = Some(FdEntry { file, flags });
        Ok(())
    }

    /// Bounds-checked lookup; empty for any invalid index.
    pub fn lookup(&self, fd: Fd) -> Option<Arc<OpenFile>> {
        self.slots
            .lock()
            .get(fd.as_index())
            .and_then(|slot| slot.as_ref())
            .map(|entry| Arc::clone(&entry.file))
    }

    /// Flag bits for an occupied slot.
    pub fn flags(&self, fd: Fd) -> Option<FdFlags> {
        self.slots
            .lock()
            .get(fd.as_index())
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.flags)
    }

    /// Evict a slot, returning the handle it owned.
    pub fn clear(&self, fd: Fd) -> Option<Arc<OpenFile>> {
        self.slots
            .lock()
            .get_mut(fd.as_index())
            .and_then(|slot| slot.take())
            .map(|entry| entry.file)
    }

    /// Copy every open slot from `parent`, sharing the underlying handles.
    /// Used when forking; the table must still be empty.
    pub(crate) fn inherit(&self, parent: &FdTable) {
        let parent_slots = parent.slots.lock();
        let mut slots = self.slots.lock();
        for (slot, theirs) in slots.iter_mut().zip(parent_slots.iter()) {
            if let Some(entry) = theirs {
                *slot = Some(FdEntry {
                    file: Arc::clone(&entry.file),
                    flags: entry.flags,
                });
            }
        }
    }

    /// Release every slot. Finalization's descriptor-table step.
    pub fn clear_all(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }

    /// Occupied slot count.
    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::credentials::Credentials;
    use crate::vfs::{OpenFlags, Vfs};
    use pretty_assertions::assert_eq;

    fn null_handle(vfs: &Vfs) -> Arc<OpenFile> {
        let root = vfs.root_directory();
        vfs.open(
            "/dev/null",
            OpenFlags::read_write(),
            0,
            &root,
            &Credentials::root(),
        )
        .unwrap()
    }

    #[test]
    fn test_allocate_scans_from_hint() {
        let vfs = Vfs::new();
        let table = FdTable::new();

        assert_eq!(table.allocate(Fd(0)).unwrap(), Fd(0));

        table.set(Fd(0), null_handle(&vfs), FdFlags::empty()).unwrap();
        table.set(Fd(1), null_handle(&vfs), FdFlags::empty()).unwrap();
        table.set(Fd(2), null_handle(&vfs), FdFlags::empty()).unwrap();

        // First free from 0 skips the pre-bound standard descriptors.
        assert_eq!(table.allocate(Fd(0)).unwrap(), Fd(3));
        // A hint past occupied slots is honored.
        assert_eq!(table.allocate(Fd(100)).unwrap(), Fd(100));
    }

    #[test]
    fn test_lookup_bounds_checked() {
        let vfs = Vfs::new();
        let table = FdTable::new();
        table.set(Fd(1), null_handle(&vfs), FdFlags::CLOEXEC).unwrap();

        assert!(table.lookup(Fd(1)).is_some());
        assert_eq!(table.flags(Fd(1)), Some(FdFlags::CLOEXEC));
        assert!(table.lookup(Fd(0)).is_none());
        assert!(table.lookup(Fd(MAX_OPEN_FILES as u32)).is_none());
        assert!(table.lookup(Fd(u32::MAX)).is_none());
    }

    #[test]
    fn test_set_out_of_range() {
        let vfs = Vfs::new();
        let table = FdTable::new();
        let err = table
            .set(Fd(MAX_OPEN_FILES as u32), null_handle(&vfs), FdFlags::empty())
            .unwrap_err();
        assert_eq!(err, ProcessError::BadFd(Fd(MAX_OPEN_FILES as u32)));
    }

    #[test]
    fn test_exhaustion() {
        let vfs = Vfs::new();
        let table = FdTable::new();
        let handle = null_handle(&vfs);
        for idx in 0..MAX_OPEN_FILES {
            table
                .set(Fd(idx as u32), Arc::clone(&handle), FdFlags::empty())
                .unwrap();
        }

        let err = table.allocate(Fd(0)).unwrap_err();
        assert_eq!(
            err,
            ProcessError::FdTableFull {
                capacity: MAX_OPEN_FILES
            }
        );
    }

    #[test]
    fn test_inherit_shares_handles() {
        let vfs = Vfs::new();
        let parent = FdTable::new();
        let handle = null_handle(&vfs);
        parent.set(Fd(0), Arc::clone(&handle), FdFlags::empty()).unwrap();
        parent.set(Fd(7), Arc::clone(&handle), FdFlags::CLOEXEC).unwrap();

        let child = FdTable::new();
        child.inherit(&parent);

        assert_eq!(child.open_count(), 2);
        assert!(Arc::ptr_eq(&child.lookup(Fd(0)).unwrap(), &handle));
        assert_eq!(child.flags(Fd(7)), Some(FdFlags::CLOEXEC));
        assert!(child.lookup(Fd(1)).is_none());
    }

    #[test]
    fn test_clear_and_clear_all() {
        let vfs = Vfs::new();
        let table = FdTable::new();
        table.set(Fd(0), null_handle(&vfs), FdFlags::empty()).unwrap();
        table.set(Fd(7), null_handle(&vfs), FdFlags::empty()).unwrap();
        assert_eq!(table.open_count(), 2);

        assert!(table.clear(Fd(7)).is_some());
        assert!(table.clear(Fd(7)).is_none());
        assert_eq!(table.open_count(), 1);

        table.clear_all();
        assert_eq!(table.open_count(), 0);
        assert!(table.lookup(Fd(0)).is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The slot returned for any hint is empty, at or after the
            /// hint, and the first such slot.
            #[test]
            fn allocate_returns_first_free_at_or_after_hint(
                occupied in proptest::collection::btree_set(0usize..64, 0..32),
                hint in 0u32..64,
            ) {
                let vfs = Vfs::new();
                let table = FdTable::new();
                let handle = null_handle(&vfs);
                for &idx in &occupied {
                    table.set(Fd(idx as u32), Arc::clone(&handle), FdFlags::empty()).unwrap();
                }

                let fd = table.allocate(Fd(hint)).unwrap();
                prop_assert!(fd.0 >= hint);
                prop_assert!(!occupied.contains(&fd.as_index()));
                for idx in (hint as usize)..fd.as_index() {
                    prop_assert!(occupied.contains(&idx));
                }
            }
        }
    }
}
