// kernel/src/memory/swap.rs
//
// Swap device: a fixed-size bitmap-allocated slot store, one slot per
// page. Slot lifecycle per spec §3.3: allocated by swap_out, freed by
// swap_in or process teardown.
//
// Slot/bitmap design and the "copy the frame's bytes through the
// physical-memory offset map" I/O technique are grounded on
// examples/other_examples/3e5b50c4_nathan237-TrustOS__kernel-src-memory-swap.rs.rs
// (its slot_bitmap + write_swap_slot/read_swap_slot pair), re-expressed
// against PhysFrame instead of raw phys_addr and without TrustOS's
// swap-encoded-PTE trick (this crate's SptEntry already records
// residency, so the PTE itself never needs to carry the slot number).

use alloc::vec::Vec;
use spin::Mutex;
use x86_64::structures::paging::{PhysFrame, Size4KiB};

use super::vm_config::{PAGE_SIZE, SWAP_SLOT_COUNT};

pub type SwapSlot = u32;

struct SwapDevice {
    /// true = slot in use.
    bitmap: Vec<bool>,
    /// Backing store: one contiguous buffer, `PAGE_SIZE` bytes per slot.
    /// A real swap partition would replace this with block I/O; this
    /// in-memory store stands in for it (the teaching kernel has no
    /// disk driver of its own, same simplification TrustOS makes for
    /// its in-memory swap fallback).
    store: Vec<u8>,
}

impl SwapDevice {
    fn new() -> Self {
        Self {
            bitmap: alloc::vec![false; SWAP_SLOT_COUNT],
            store: alloc::vec![0u8; SWAP_SLOT_COUNT * PAGE_SIZE as usize],
        }
    }

    fn alloc_slot(&mut self) -> Option<SwapSlot> {
        let idx = self.bitmap.iter().position(|used| !used)?;
        self.bitmap[idx] = true;
        Some(idx as SwapSlot)
    }

    fn free_slot(&mut self, slot: SwapSlot) {
        let idx = slot as usize;
        if idx < self.bitmap.len() {
            self.bitmap[idx] = false;
        }
    }

    fn slot_range(&self, slot: SwapSlot) -> core::ops::Range<usize> {
        let start = slot as usize * PAGE_SIZE as usize;
        start..start + PAGE_SIZE as usize
    }
}

static SWAP: Mutex<Option<SwapDevice>> = Mutex::new(None);

/// Bring the swap device online. Must run once, after the heap is
/// available, before the first swap_out.
pub fn init() {
    *SWAP.lock() = Some(SwapDevice::new());
    crate::serial_println!("Swap device ready: {} slots ({} KiB)", SWAP_SLOT_COUNT,
        (SWAP_SLOT_COUNT as u64 * PAGE_SIZE) / 1024);
}

/// Copy `frame`'s contents into a freshly-allocated swap slot.
///
/// Returns `None` if the swap device is exhausted — the caller (frame
/// table eviction) treats that as fatal per spec §7.
pub fn swap_out(frame: PhysFrame<Size4KiB>) -> Option<SwapSlot> {
    let mut guard = SWAP.lock();
    let dev = guard.as_mut().expect("swap device not initialized");

    let slot = dev.alloc_slot()?;
    let range = dev.slot_range(slot);

    let phys_offset = crate::memory::physical_memory_offset();
    let src = unsafe {
        core::slice::from_raw_parts(
            (phys_offset + frame.start_address().as_u64()).as_ptr::<u8>(),
            PAGE_SIZE as usize,
        )
    };
    dev.store[range].copy_from_slice(src);

    Some(slot)
}

/// Copy a swap slot's contents into `frame`, then free the slot.
pub fn swap_in(slot: SwapSlot, frame: PhysFrame<Size4KiB>) {
    let mut guard = SWAP.lock();
    let dev = guard.as_mut().expect("swap device not initialized");

    let range = dev.slot_range(slot);
    let phys_offset = crate::memory::physical_memory_offset();
    let dst = unsafe {
        core::slice::from_raw_parts_mut(
            (phys_offset + frame.start_address().as_u64()).as_mut_ptr::<u8>(),
            PAGE_SIZE as usize,
        )
    };
    dst.copy_from_slice(&dev.store[range]);

    dev.free_slot(slot);
}

/// Release a swap slot without reading it back (process teardown with
/// a page that was swapped out but never re-faulted).
pub fn release(slot: SwapSlot) {
    let mut guard = SWAP.lock();
    let dev = guard.as_mut().expect("swap device not initialized");
    dev.free_slot(slot);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_unique_until_freed() {
        let mut dev = SwapDevice::new();
        let a = dev.alloc_slot().unwrap();
        let b = dev.alloc_slot().unwrap();
        assert_ne!(a, b);
        dev.free_slot(a);
        let c = dev.alloc_slot().unwrap();
        assert_eq!(a, c, "freed slot should be reused before a fresh one");
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut dev = SwapDevice {
            bitmap: alloc::vec![false; 2],
            store: alloc::vec![0u8; 2 * PAGE_SIZE as usize],
        };
        assert!(dev.alloc_slot().is_some());
        assert!(dev.alloc_slot().is_some());
        assert!(dev.alloc_slot().is_none());
    }

    #[test]
    fn slot_ranges_do_not_overlap() {
        let dev = SwapDevice::new();
        let r0 = dev.slot_range(0);
        let r1 = dev.slot_range(1);
        assert_eq!(r0.end, r1.start);
        assert_eq!(r0.len(), PAGE_SIZE as usize);
    }
}
