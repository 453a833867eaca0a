/*!
 * System Limits and Constants
 *
 * Centralized location for the lifecycle core's tunables and magic numbers.
 * Values carry a rationale comment; consistency between related values is
 * checked in the test block.
 */

// =============================================================================
// DESCRIPTOR TABLE
// =============================================================================

/// Slots per process descriptor table.
/// Fixed capacity; allocation past it is a resource-exhaustion error.
pub const MAX_OPEN_FILES: usize = 1024;

/// Descriptors pre-bound at user-process creation (stdin, stdout, stderr).
pub const PREBOUND_FDS: usize = 3;

// =============================================================================
// SIGNALS
// =============================================================================

/// Exclusive upper bound on signal numbers; valid signals are 1..NSIG.
/// Pending sets are 64-bit masks, so this must stay <= 64.
pub const NSIG: u32 = 32;

// =============================================================================
// ADDRESS SPACE
// =============================================================================

/// Region granularity; mapped sizes are rounded up to this.
pub const PAGE_SIZE: u64 = 4096;

/// Base of the kernel half of the virtual address space.
/// Faults at or above this line are symbolicated against the kernel map.
pub const KERNEL_VIRTUAL_BASE: u64 = 0xffff_8000_0000_0000;

/// Load base for user program images.
pub const USER_IMAGE_BASE: u64 = 0x0000_0000_0040_0000;

/// Top of the initial user stack region.
pub const USER_STACK_TOP: u64 = 0x0000_7fff_ffff_f000;

/// Initial user stack region size (1MB).
pub const USER_STACK_SIZE: u64 = 1024 * 1024;

/// Kernel thread stack size (64KB).
pub const KERNEL_STACK_SIZE: u64 = 64 * 1024;

/// Kernel thread stacks are carved from a fixed window above this address,
/// indexed by thread identity.
pub const KERNEL_STACK_BASE: u64 = KERNEL_VIRTUAL_BASE + 0x200_0000;

// =============================================================================
// DIAGNOSTICS
// =============================================================================

/// Directory core dumps and performance reports are written under.
pub const DUMP_DIRECTORY: &str = "/tmp/dumps";

/// File suffix for core dumps.
pub const COREDUMP_SUFFIX: &str = "core";

/// File suffix for performance reports.
pub const PERF_REPORT_SUFFIX: &str = "profile";

/// Capacity of a per-process performance-event buffer.
/// Sampling past it drops events rather than reallocating.
pub const PERF_EVENT_BUFFER_CAPACITY: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_table_sizing() {
        // The pre-bound descriptors must fit the table with room to spare.
        assert!(PREBOUND_FDS < MAX_OPEN_FILES);
    }

    #[test]
    fn test_signal_bound_fits_mask() {
        // Pending-signal sets are u64 bitmasks.
        assert!(NSIG <= 64);
        assert!(NSIG > 1);
    }

    #[test]
    fn test_address_layout() {
        // User addresses stay strictly below the kernel half.
        assert!(USER_IMAGE_BASE < USER_STACK_TOP);
        assert!(USER_STACK_TOP < KERNEL_VIRTUAL_BASE);
        assert!(USER_STACK_SIZE < USER_STACK_TOP - USER_IMAGE_BASE);
        assert!(KERNEL_STACK_BASE > KERNEL_VIRTUAL_BASE);
    }

    #[test]
    fn test_page_alignment() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(USER_IMAGE_BASE % PAGE_SIZE, 0);
        assert_eq!(USER_STACK_TOP % PAGE_SIZE, 0);
        assert_eq!(USER_STACK_SIZE % PAGE_SIZE, 0);
        assert_eq!(KERNEL_STACK_SIZE % PAGE_SIZE, 0);
    }
}
