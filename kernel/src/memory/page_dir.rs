// kernel/src/memory/page_dir.rs
//
// Page-directory external interface (spec §6): install / clear /
// get_page / is_dirty / is_accessed / set_dirty / set_accessed, all
// addressed by (pml4_phys, upage) rather than "the current page
// table". This is what lets the eviction scanner (frame_table.rs)
// inspect and clear bits belonging to a process other than the one
// currently running — every process's page table is reachable through
// the same physical-memory-offset direct map, so there is no need to
// switch CR3 to read or mutate it.
//
// Builds directly on memory::page_table_manager's phys-offset-mapped
// OffsetPageTable construction (OwnedPageTable::create_mapper does the
// same thing for `self`'s own pml4; this is the same trick
// parameterized over an arbitrary pml4_phys).

use x86_64::{
    PhysAddr, VirtAddr,
    structures::paging::{
        mapper::TranslateResult, Mapper, OffsetPageTable, Page, PageTable,
        PageTableFlags, PhysFrame, Size4KiB, Translate,
    },
};

use super::page_table_manager::BuddyFrameAllocator;

/// Borrow a mapper over an arbitrary process's page table.
///
/// # Safety
/// `pml4_phys` must be the physical address of a valid, live PML4
/// (i.e. some process's root page table that hasn't been torn down).
unsafe fn mapper_for(pml4_phys: PhysAddr) -> OffsetPageTable<'static> {
    let phys_offset = crate::memory::physical_memory_offset();
    let pml4_virt = phys_offset + pml4_phys.as_u64();
    let pml4: &mut PageTable = &mut *pml4_virt.as_mut_ptr::<PageTable>();
    OffsetPageTable::new(pml4, phys_offset)
}

#[inline]
fn page_of(upage: u64) -> Page<Size4KiB> {
    Page::containing_address(VirtAddr::new(super::vm_config::round_down(upage)))
}

/// Map `upage` to `frame` with the given writability. PRESENT and
/// USER_ACCESSIBLE are always added. Returns false on failure (OOM
/// while allocating an intermediate table, or already mapped).
pub fn install(pml4_phys: PhysAddr, upage: u64, frame: PhysFrame<Size4KiB>, writable: bool) -> bool {
    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if writable {
        flags |= PageTableFlags::WRITABLE;
    }

    let mut alloc = BuddyFrameAllocator;
    unsafe {
        let mut mapper = mapper_for(pml4_phys);
        match mapper.map_to(page_of(upage), frame, flags, &mut alloc) {
            Ok(flush) => {
                flush.flush();
                true
            }
            Err(_) => false,
        }
    }
}

/// Clear the mapping for `upage`, if any. Frees the (intermediate
/// page-table, not data) frames it owned are left to the caller; the
/// data frame itself is never freed here — callers free it explicitly
/// via the frame table, since the page-directory interface does not
/// own frame lifetime.
pub fn clear(pml4_phys: PhysAddr, upage: u64) {
    unsafe {
        let mut mapper = mapper_for(pml4_phys);
        if let Ok((_frame, flush)) = mapper.unmap(page_of(upage)) {
            flush.flush();
        }
    }
}

/// Physical frame currently mapped at `upage`, if resident.
pub fn get_page(pml4_phys: PhysAddr, upage: u64) -> Option<PhysFrame<Size4KiB>> {
    unsafe {
        let mapper = mapper_for(pml4_phys);
        match mapper.translate(VirtAddr::new(super::vm_config::round_down(upage))) {
            TranslateResult::Mapped { frame, .. } => match frame {
                x86_64::structures::paging::mapper::MappedFrame::Size4KiB(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }
}

fn flags_of(pml4_phys: PhysAddr, upage: u64) -> Option<PageTableFlags> {
    unsafe {
        let mapper = mapper_for(pml4_phys);
        match mapper.translate(VirtAddr::new(super::vm_config::round_down(upage))) {
            TranslateResult::Mapped { flags, .. } => Some(flags),
            _ => None,
        }
    }
}

pub fn is_dirty(pml4_phys: PhysAddr, upage: u64) -> bool {
    flags_of(pml4_phys, upage)
        .is_some_and(|f| f.contains(PageTableFlags::DIRTY))
}

pub fn is_accessed(pml4_phys: PhysAddr, upage: u64) -> bool {
    flags_of(pml4_phys, upage)
        .is_some_and(|f| f.contains(PageTableFlags::ACCESSED))
}

fn set_flag(pml4_phys: PhysAddr, upage: u64, flag: PageTableFlags, value: bool) {
    let Some(mut flags) = flags_of(pml4_phys, upage) else {
        return;
    };
    flags.set(flag, value);
    unsafe {
        let mut mapper = mapper_for(pml4_phys);
        if let Ok(flush) = mapper.update_flags(page_of(upage), flags) {
            flush.flush();
        }
    }
}

pub fn set_dirty(pml4_phys: PhysAddr, upage: u64, value: bool) {
    set_flag(pml4_phys, upage, PageTableFlags::DIRTY, value);
}

pub fn set_accessed(pml4_phys: PhysAddr, upage: u64, value: bool) {
    set_flag(pml4_phys, upage, PageTableFlags::ACCESSED, value);
}
