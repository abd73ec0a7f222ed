// kernel/src/memory/address_space.rs
//
// AddressSpace: groups a process's page table + supplemental page
// table into a single unit that does NOT depend on PID directly (PID
// is recorded inside the Spt itself, at construction time).
//
// This is the only structural addition of the refactor.  Everything
// else is wiring changes. Originally this held a VmaList; the VMA
// model could only say "mapped or not, demand-page it the same way
// every time", not "this page is file-backed at this offset" or "this
// page was swapped out" — Spt carries both.

use x86_64::structures::paging::{Page, PageTableFlags, PhysFrame, Size4KiB, mapper::MapToError};

use super::page_table_manager::OwnedPageTable;
use super::spt::Spt;

pub struct AddressSpace {
    pub page_table: OwnedPageTable,
    pub spt: Spt,
}

unsafe impl Send for AddressSpace {}

impl AddressSpace {
    // ====================================================================
    // CONSTRUCTORS
    // ====================================================================

    /// Kernel address space: wraps the current CR3, empty SPT.
    /// Used by idle and shell processes — they never fault, so the SPT
    /// is never consulted.
    pub fn kernel() -> Self {
        let page_table = OwnedPageTable::from_current();
        let pml4_phys = page_table.pml4_phys();
        Self {
            page_table,
            spt: Spt::new(0, pml4_phys),
        }
    }

    /// New user address space: fresh page table with kernel entries
    /// copied, empty SPT keyed to `pid`.
    ///
    /// # Safety
    /// Buddy allocator must be initialized.
    pub unsafe fn new_user(pid: usize) -> Result<Self, &'static str> {
        let page_table = OwnedPageTable::new_user()?;
        let pml4_phys = page_table.pml4_phys();
        Ok(Self {
            page_table,
            spt: Spt::new(pid, pml4_phys),
        })
    }

    // ====================================================================
    // PAGE TABLE DELEGATION
    // ====================================================================

    /// Activate this address space (write CR3).
    /// No-op if already active.
    pub unsafe fn activate(&self) {
        self.page_table.activate();
    }

    /// Map a single user page.  Allocates data + intermediate frames
    /// from the Buddy allocator.
    pub unsafe fn map_user_page(
        &self,
        page: Page<Size4KiB>,
        flags: PageTableFlags,
    ) -> Result<PhysFrame, MapToError<Size4KiB>> {
        self.page_table.map_user_page(page, flags)
    }

    /// Physical address of the PML4 root frame.
    pub fn pml4_phys(&self) -> x86_64::PhysAddr {
        self.page_table.pml4_phys()
    }

    /// The root PhysFrame (for debug logging).
    pub fn root_frame(&self) -> PhysFrame {
        self.page_table.root_frame()
    }
}