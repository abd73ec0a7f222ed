// kernel/src/memory/fault.rs
//
// Entry points for (a) the hardware page-fault handler and (b) every
// syscall's user-pointer validation. Both ultimately call the same SPT
// lookup / install_load / grow_stack machinery; the difference is
// pinning (syscalls pin, raw faults don't) and write validation.
//
// Kept free of any process::scheduler dependency: this module takes
// the caller's Spt and esp by reference instead of looking them up
// itself. init/devices.rs is the bridge that supplies them.

use super::error::{VmError, VmResult};
use super::frame_table;
use super::spt::{Spt, SptKind};
use super::vm_config::{PAGE_SIZE, STACK_HEURISTIC, USER_ADDRESS_CEILING, round_down};

/// Page fault error code bits (x86_64 §4.7).
pub const PF_PRESENT: u64 = 1 << 0;
pub const PF_WRITE: u64 = 1 << 1;
pub const PF_USER: u64 = 1 << 2;
pub const PF_RESERVED: u64 = 1 << 3;

/// Read CR2, the faulting linear address.
#[inline]
pub fn read_cr2() -> u64 {
    let addr: u64;
    unsafe {
        core::arch::asm!("mov {}, cr2", out(reg) addr);
    }
    addr
}

/// Pre-filter on the raw CPU error code: reserved-bit faults and
/// protection violations (page present but faulted) are never
/// resolvable by this subsystem.
pub fn is_demand_pageable(error_code: u64) -> Result<(), &'static str> {
    if error_code & PF_RESERVED != 0 {
        return Err("reserved bit set in page table entry");
    }
    if error_code & PF_PRESENT != 0 {
        return Err("protection violation, not a not-present fault");
    }
    Ok(())
}

/// Called from the hardware page-fault handler. `stack_pointer` is the
/// faulting frame's own RSP, not a syscall-entry snapshot — there is
/// no syscall context here.
pub fn handle_page_fault(spt: &mut Spt, fault_addr: u64, stack_pointer: u64) -> VmResult<()> {
    if fault_addr >= USER_ADDRESS_CEILING {
        return Err(VmError::UserFault("fault address outside user space"));
    }

    let page = round_down(fault_addr);
    if let Some(entry) = spt.lookup_mut(page) {
        if entry.frame.is_none() {
            super::spt::install_load(entry)?;
        }
        return Ok(());
    }

    if stack_pointer.saturating_sub(STACK_HEURISTIC) <= page {
        return spt.grow_stack(page, false);
    }

    Err(VmError::UserFault("segmentation fault: no SPT entry for address"))
}

/// Validate `[ptr, ptr+size)` before a syscall dereferences it: every
/// page must resolve to an SPT entry (loading and pinning it) or be a
/// plausible stack-growth target. `esp` must be the stack pointer
/// captured at syscall entry, not the current kernel stack pointer.
pub fn validate_user_range(spt: &mut Spt, esp: u64, ptr: u64, size: u64, for_write: bool) -> VmResult<()> {
    if size == 0 {
        return Ok(());
    }
    let end = ptr.checked_add(size).ok_or(VmError::UserFault("pointer range overflow"))?;
    if ptr >= USER_ADDRESS_CEILING || end > USER_ADDRESS_CEILING {
        return Err(VmError::UserFault("range outside user address space"));
    }

    let mut page = round_down(ptr);
    let last_page = round_down(end - 1);
    loop {
        validate_user_page(spt, esp, page, for_write)?;
        if page == last_page {
            break;
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

/// Pure policy: may a page of this kind be written to? Split out so the
/// read-only-enforcement property (spec §8) can be exercised without a
/// live SPT or page tables, same reasoning as
/// `frame_table::phase1_scan`. Only `File` entries can refuse a write —
/// `Code` is always anonymous/writable and `Mmap` is always writable
/// (that's the point of mapping it).
fn write_allowed(kind: &SptKind) -> bool {
    match kind {
        SptKind::File(fb) => fb.writable,
        SptKind::Code { .. } | SptKind::Mmap(_) => true,
    }
}

fn validate_user_page(spt: &mut Spt, esp: u64, page: u64, for_write: bool) -> VmResult<()> {
    if let Some(entry) = spt.lookup_mut(page) {
        if for_write && !write_allowed(&entry.kind) {
            return Err(VmError::UserFault("write to read-only file-backed page"));
        }
        {
            let _pin_guard = frame_table::pin_lock();
            entry.pinned = true;
        }
        if entry.frame.is_none() {
            super::spt::install_load(entry)?;
        }
        return Ok(());
    }

    if esp.saturating_sub(STACK_HEURISTIC) <= page && page < USER_ADDRESS_CEILING {
        return spt.grow_stack(page, true);
    }

    Err(VmError::UserFault("no SPT entry and not a plausible stack access"))
}

/// Like `validate_user_range`, but the length is unknown up front: scan
/// page by page until a NUL terminator is found. Returns the address
/// of the terminator.
pub fn validate_user_string(spt: &mut Spt, esp: u64, ptr: u64) -> VmResult<u64> {
    let mut page = round_down(ptr);
    loop {
        validate_user_page(spt, esp, page, false)?;

        let frame = spt.lookup(page).and_then(|e| e.frame).expect("just installed above");
        let phys_offset = crate::memory::physical_memory_offset();
        let page_bytes = unsafe {
            core::slice::from_raw_parts((phys_offset + frame.start_address().as_u64()).as_ptr::<u8>(), PAGE_SIZE as usize)
        };

        let start = if page == round_down(ptr) { ptr } else { page };
        let offset_in_page = (start - page) as usize;
        if let Some(rel) = page_bytes[offset_in_page..].iter().position(|&b| b == 0) {
            return Ok(start + rel as u64);
        }

        page += PAGE_SIZE;
        if page >= USER_ADDRESS_CEILING {
            return Err(VmError::UserFault("unterminated user string"));
        }
    }
}

/// Clear `pinned` on every page of `[ptr, ptr+size)`. Missing entries
/// are ignored — a short read may mean a page was never faulted in.
pub fn unpin_range(spt: &mut Spt, ptr: u64, size: u64) {
    if size == 0 {
        return;
    }
    let Some(end) = ptr.checked_add(size) else { return };
    let mut page = round_down(ptr);
    let last_page = round_down(end - 1);
    loop {
        if let Some(entry) = spt.lookup_mut(page) {
            let _pin_guard = frame_table::pin_lock();
            entry.pinned = false;
        }
        if page == last_page {
            break;
        }
        page += PAGE_SIZE;
    }
}

/// Unpin a NUL-terminated string starting at `ptr`, stopping at the
/// first missing entry or the terminator.
pub fn unpin_string(spt: &mut Spt, ptr: u64) {
    let mut page = round_down(ptr);
    loop {
        let Some(entry) = spt.lookup_mut(page) else { return };
        {
            let _pin_guard = frame_table::pin_lock();
            entry.pinned = false;
        }
        let Some(frame) = entry.frame else { return };

        let phys_offset = crate::memory::physical_memory_offset();
        let page_bytes = unsafe {
            core::slice::from_raw_parts((phys_offset + frame.start_address().as_u64()).as_ptr::<u8>(), PAGE_SIZE as usize)
        };
        let start = if page == round_down(ptr) { ptr } else { page };
        let offset_in_page = (start - page) as usize;
        if page_bytes[offset_in_page..].iter().any(|&b| b == 0) {
            return;
        }

        page += PAGE_SIZE;
        if page >= USER_ADDRESS_CEILING {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::backing_file::{BackingFile, BackingFileError, BackingFileResult};
    use super::super::spt::FileBacking;
    use alloc::sync::Arc;

    #[test]
    fn demand_pageable_rejects_reserved_bit() {
        assert!(is_demand_pageable(PF_RESERVED).is_err());
    }

    #[test]
    fn demand_pageable_rejects_protection_violation() {
        assert!(is_demand_pageable(PF_PRESENT | PF_USER).is_err());
    }

    #[test]
    fn demand_pageable_accepts_plain_not_present_fault() {
        assert!(is_demand_pageable(PF_USER).is_ok());
    }

    struct DummyFile;
    impl BackingFile for DummyFile {
        fn read_at(&self, _buf: &mut [u8], _offset: u64) -> BackingFileResult<usize> {
            Ok(0)
        }
        fn write_at(&self, _buf: &[u8], _offset: u64) -> BackingFileResult<usize> {
            Err(BackingFileError::Io)
        }
        fn length(&self) -> u64 {
            0
        }
        fn reopen(&self) -> Arc<dyn BackingFile> {
            Arc::new(DummyFile)
        }
    }

    fn file_backing(writable: bool) -> FileBacking {
        FileBacking {
            file: Arc::new(DummyFile),
            offset: 0,
            read_bytes: 0,
            zero_bytes: 0,
            writable,
        }
    }

    #[test]
    fn read_only_file_page_rejects_write() {
        assert!(!write_allowed(&SptKind::File(file_backing(false))));
    }

    #[test]
    fn writable_file_page_allows_write() {
        assert!(write_allowed(&SptKind::File(file_backing(true))));
    }

    #[test]
    fn code_and_mmap_pages_always_allow_write() {
        assert!(write_allowed(&SptKind::Code { in_swap: false, swap_slot: None }));
        assert!(write_allowed(&SptKind::Mmap(file_backing(true))));
    }
}
