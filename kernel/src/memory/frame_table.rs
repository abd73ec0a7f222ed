// kernel/src/memory/frame_table.rs
//
// Global accounting of resident user frames plus the enhanced
// second-chance eviction policy.
//
// The frame-as-a-FIFO-list-behind-a-lock structure and the
// allocate-from-pool-first pattern are grounded on
// page_table_manager.rs's BuddyFrameAllocator (same allocate_frame()
// call) and the zero-then-map sequence every fresh user page needs;
// the three-phase victim scan itself is new code.
//
// The scan's policy (which frame to clean, which to evict) is split
// out into `phase1_scan`, a function of plain closures with no
// hardware or lock dependency, specifically so it can be exercised
// without a live page table — see the tests module.

use alloc::collections::VecDeque;
use spin::{Mutex, MutexGuard};
use x86_64::structures::paging::{FrameAllocator, PhysFrame, Size4KiB};

use super::page_dir;
use super::page_table_manager::{BuddyFrameAllocator, OwnedPageTable};
use super::spt::{SptEntry, SptKind};
use super::swap;
use super::vm_config::PAGE_SIZE;

struct FrameTableEntry {
    frame: PhysFrame<Size4KiB>,
    spte: *mut SptEntry,
    #[allow(dead_code)]
    pid: usize,
    pml4_phys: x86_64::PhysAddr,
}

// Safety: the raw `spte` pointer is only ever dereferenced while the
// owning process's SPT is alive; teardown frees the frame (and removes
// this entry) before the SPT entry itself is dropped (spt::free_spte).
unsafe impl Send for FrameTableEntry {}

static PIN_LOCK: Mutex<()> = Mutex::new(());
static EVICT_LOCK: Mutex<()> = Mutex::new(());
static FRAME_TABLE: Mutex<Option<VecDeque<FrameTableEntry>>> = Mutex::new(None);

pub fn init() {
    *FRAME_TABLE.lock() = Some(VecDeque::new());
    crate::serial_println!("Frame table ready");
}

/// Held for the whole body of `spt::install_load`, so eviction never
/// observes that entry half-resident.
pub fn evict_lock() -> MutexGuard<'static, ()> {
    EVICT_LOCK.lock()
}

/// Guards the `pinned` field of every SPT entry (spec §3.1/§5), not
/// just the scanner's read of it — any writer of `pinned` must hold
/// this around the write, same as the scanner already does around its
/// exhausted-pool victim scan.
pub fn pin_lock() -> MutexGuard<'static, ()> {
    PIN_LOCK.lock()
}

fn alloc_fresh() -> Option<PhysFrame<Size4KiB>> {
    let mut alloc = BuddyFrameAllocator;
    alloc.allocate_frame()
}

fn zero_frame(frame: PhysFrame<Size4KiB>) {
    unsafe { OwnedPageTable::zero_frame(frame) };
}

fn dealloc_physical(frame: PhysFrame<Size4KiB>) {
    unsafe {
        crate::allocator::buddy_allocator::BUDDY.lock().deallocate(frame.start_address(), 12);
    }
}

/// Allocate a frame for `spte`, evicting a victim if the pool is
/// exhausted. Panics if the frame table is simultaneously empty and
/// allocation still fails — the system is inconsistent at that point.
pub fn get_frame(zero: bool, spte: *mut SptEntry, pid: usize, pml4_phys: x86_64::PhysAddr) -> PhysFrame<Size4KiB> {
    if let Some(frame) = alloc_fresh() {
        if zero {
            zero_frame(frame);
        }
        push(FrameTableEntry { frame, spte, pid, pml4_phys });
        return frame;
    }

    // Exhausted: fixed lock order is pin_lock then frame_table_lock.
    let _pin_guard = PIN_LOCK.lock();
    loop {
        let victim = {
            let mut guard = FRAME_TABLE.lock();
            let table = guard.as_mut().expect("frame table not initialized");
            if table.is_empty() {
                panic!("frame pool exhausted and frame table empty: system inconsistent");
            }
            let idx = select_victim(table);
            table.remove(idx).expect("victim index is in range")
        };

        evict(victim);

        if let Some(frame) = alloc_fresh() {
            if zero {
                zero_frame(frame);
            }
            push(FrameTableEntry { frame, spte, pid, pml4_phys });
            return frame;
        }
    }
}

fn push(entry: FrameTableEntry) {
    let mut guard = FRAME_TABLE.lock();
    guard.as_mut().expect("frame table not initialized").push_back(entry);
}

/// Remove `frame`'s table entry (if any is still tracked — eviction
/// already removes it before calling `evict`) and return the physical
/// frame to the pool.
pub fn free_frame(frame: PhysFrame<Size4KiB>) {
    {
        let mut guard = FRAME_TABLE.lock();
        if let Some(table) = guard.as_mut() {
            if let Some(idx) = table.iter().position(|f| f.frame == frame) {
                table.remove(idx);
            }
        }
    }
    dealloc_physical(frame);
}

fn is_pinned(fte: &FrameTableEntry) -> bool {
    unsafe { (*fte.spte).pinned }
}

fn spte_upage(fte: &FrameTableEntry) -> u64 {
    unsafe { (*fte.spte).upage }
}

fn spte_is_code(fte: &FrameTableEntry) -> bool {
    unsafe { matches!((*fte.spte).kind, SptKind::Code { .. }) }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ScanAction {
    Clean(usize),
    Victim(usize),
}

/// Pure policy: given per-index (pinned, is_code, accessed, dirty)
/// predicates, decide which indices to opportunistically clean and
/// which index (if any) to evict, stopping at the first victim exactly
/// as a live scan would.
fn phase1_scan(
    n: usize,
    pinned: impl Fn(usize) -> bool,
    is_code: impl Fn(usize) -> bool,
    accessed: impl Fn(usize) -> bool,
    dirty: impl Fn(usize) -> bool,
) -> alloc::vec::Vec<ScanAction> {
    let mut actions = alloc::vec::Vec::new();
    for i in 0..n {
        if pinned(i) {
            continue;
        }
        let d = dirty(i);
        let code = is_code(i);
        if !code && d {
            actions.push(ScanAction::Clean(i));
            continue;
        }
        let a = accessed(i);
        if !a && (!d || code) {
            actions.push(ScanAction::Victim(i));
            return actions;
        }
    }
    actions
}

fn run_phase1(table: &VecDeque<FrameTableEntry>) -> Option<usize> {
    let n = table.len();
    let pinned = |i: usize| is_pinned(&table[i]);
    let is_code = |i: usize| spte_is_code(&table[i]);
    let accessed = |i: usize| page_dir::is_accessed(table[i].pml4_phys, spte_upage(&table[i]));
    let dirty = |i: usize| page_dir::is_dirty(table[i].pml4_phys, spte_upage(&table[i]));

    let mut victim = None;
    for action in phase1_scan(n, pinned, is_code, accessed, dirty) {
        match action {
            ScanAction::Clean(i) => {
                let ok = unsafe { write_to_disk(&mut *table[i].spte) };
                if !ok {
                    panic!("write-back failed during opportunistic clean");
                }
            }
            ScanAction::Victim(i) => victim = Some(i),
        }
    }
    victim
}

fn select_victim(table: &mut VecDeque<FrameTableEntry>) -> usize {
    if let Some(i) = run_phase1(table) {
        return i;
    }

    // Phase 2: second chance. Clear the accessed bit on every
    // unpinned frame, then re-run the same scan.
    for i in 0..table.len() {
        if !is_pinned(&table[i]) {
            page_dir::set_accessed(table[i].pml4_phys, spte_upage(&table[i]), false);
        }
    }
    if let Some(i) = run_phase1(table) {
        return i;
    }

    // Phase 3: fallback to the first unpinned frame in FIFO order.
    for i in 0..table.len() {
        if !is_pinned(&table[i]) {
            return i;
        }
    }
    panic!("no unpinned frame available for eviction");
}

fn evict(fte: FrameTableEntry) {
    let spte = unsafe { &mut *fte.spte };

    match &spte.kind {
        SptKind::Mmap(_) => {
            if !write_to_disk(spte) {
                panic!("mmap write-back failed during eviction");
            }
            page_dir::clear(fte.pml4_phys, spte.upage);
            dealloc_physical(fte.frame);
            spte.frame = None;
        }
        SptKind::File(_) => {
            // Promote to CODE: a writable FILE page that was dirtied
            // cannot be written back to the read-only executable, so
            // it is preserved in swap instead.
            spte.kind = SptKind::Code { in_swap: false, swap_slot: None };
            evict_as_code(&fte, spte);
        }
        SptKind::Code { .. } => {
            evict_as_code(&fte, spte);
        }
    }
}

fn evict_as_code(fte: &FrameTableEntry, spte: &mut SptEntry) {
    let slot = swap::swap_out(fte.frame).unwrap_or_else(|| panic!("swap device exhausted"));
    if let SptKind::Code { in_swap, swap_slot } = &mut spte.kind {
        *in_swap = true;
        *swap_slot = Some(slot);
    }
    page_dir::clear(fte.pml4_phys, spte.upage);
    dealloc_physical(fte.frame);
    spte.frame = None;
}

/// Write `spte`'s resident page back to its file, if dirty and
/// write-backable. A no-op (success) for clean pages, read-only FILE
/// entries, and CODE entries.
pub fn write_to_disk(spte: &mut SptEntry) -> bool {
    let Some(frame) = spte.frame else { return true };
    if !page_dir::is_dirty(spte.pml4_phys, spte.upage) {
        return true;
    }

    let fb = match &spte.kind {
        SptKind::Mmap(fb) => fb,
        SptKind::File(fb) if fb.writable => fb,
        _ => return true,
    };

    let phys_offset = crate::memory::physical_memory_offset();
    let src = unsafe {
        core::slice::from_raw_parts(
            (phys_offset + frame.start_address().as_u64()).as_ptr::<u8>(),
            fb.read_bytes as usize,
        )
    };

    let ok = fb.file.write_at(src, fb.offset).map(|n| n == fb.read_bytes as usize).unwrap_or(false);
    if ok {
        page_dir::set_dirty(spte.pml4_phys, spte.upage, false);
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_frames_are_never_chosen() {
        let pinned = |i: usize| i == 0;
        let is_code = |_: usize| false;
        let accessed = |_: usize| false;
        let dirty = |_: usize| false;
        let actions = phase1_scan(2, pinned, is_code, accessed, dirty);
        assert_eq!(actions, alloc::vec![ScanAction::Victim(1)]);
    }

    #[test]
    fn dirty_non_code_pages_are_cleaned_then_scan_continues() {
        let pinned = |_: usize| false;
        let is_code = |_: usize| false;
        let accessed = |_: usize| false;
        let dirty = |i: usize| i == 0;
        let actions = phase1_scan(2, pinned, is_code, accessed, dirty);
        assert_eq!(actions, alloc::vec![ScanAction::Clean(0), ScanAction::Victim(1)]);
    }

    #[test]
    fn dirty_code_pages_are_still_victim_candidates() {
        let pinned = |_: usize| false;
        let is_code = |_: usize| true;
        let accessed = |_: usize| false;
        let dirty = |_: usize| true;
        let actions = phase1_scan(1, pinned, is_code, accessed, dirty);
        assert_eq!(actions, alloc::vec![ScanAction::Victim(0)]);
    }

    #[test]
    fn accessed_pages_are_skipped_without_a_victim() {
        let pinned = |_: usize| false;
        let is_code = |_: usize| false;
        let accessed = |_: usize| true;
        let dirty = |_: usize| false;
        let actions = phase1_scan(2, pinned, is_code, accessed, dirty);
        assert!(actions.is_empty(), "no candidate found yet means phase 2 should run");
    }
}
