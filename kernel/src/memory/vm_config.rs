// kernel/src/memory/vm_config.rs
//
// Tunables for the demand-paging / swap / eviction subsystem.
// Plain consts, same style as user_code::USER_CODE_BASE.

/// Size of one page and one swap slot.
pub const PAGE_SIZE: u64 = 4096;

/// Maximum size a process stack may grow to (8 MiB, same ballpark as
/// the classic Pintos default).
pub const MAX_STACK_SIZE: u64 = 8 * 1024 * 1024;

/// How far below the captured stack pointer a fault may land and still
/// be treated as legitimate stack growth (covers a PUSHA-style bulk
/// push that faults before the stack pointer itself is updated).
pub const STACK_HEURISTIC: u64 = 32;

/// Highest legal user virtual address (exclusive). Addresses at or
/// above this are always kernel space.
pub const USER_ADDRESS_CEILING: u64 = 0x0000_8000_0000_0000;

/// Number of 4 KiB slots the in-memory swap device carries.
/// 8192 slots * 4 KiB = 32 MiB of swap, plenty for a teaching kernel.
pub const SWAP_SLOT_COUNT: usize = 8192;

/// Round a virtual address down to its containing page.
#[inline]
pub const fn round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}

/// Round a byte length up to a whole number of pages.
#[inline]
pub const fn page_count(len: u64) -> usize {
    ((len + PAGE_SIZE - 1) / PAGE_SIZE) as usize
}
