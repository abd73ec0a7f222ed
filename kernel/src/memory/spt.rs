// kernel/src/memory/spt.rs
//
// Supplemental Page Table: per-process map from user virtual page to
// the metadata describing its backing store and residency. This is
// the table the fault handler and every syscall pointer-validator
// consult before touching user memory.
//
// Table shape (BTreeMap<u64, Box<SptEntry>> keyed by page-aligned
// upage) is grounded on vma.rs's per-process table-of-entries idea,
// generalized from a fixed array to a heap map since an SPT entry
// carries a file handle and swap bookkeeping vma.rs never needed. The
// `Box` indirection is required, not incidental: frame_table.rs keeps
// a raw `*mut SptEntry` per resident frame so the eviction scanner can
// inspect and mutate a victim's entry without going through this
// table's own lock (there isn't one — see module docs below); Box
// gives each entry a stable heap address that survives the BTreeMap
// rebalancing its internal nodes.
//
// install_load's file/swap materialization follows a read-zero-map
// sequence generalized from "always zero-fill anonymous" to the
// three-way FILE/MMAP/CODE dispatch a supplemental page table needs.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use x86_64::{PhysAddr, structures::paging::{PhysFrame, Size4KiB}};

use super::backing_file::BackingFile;
use super::error::{VmError, VmResult};
use super::frame_table;
use super::page_dir;
use super::swap::{self, SwapSlot};
use super::vm_config::{MAX_STACK_SIZE, PAGE_SIZE, USER_ADDRESS_CEILING, page_count, round_down};

/// File-backed metadata shared by `FILE` and `MMAP` entries.
pub struct FileBacking {
    pub file: Arc<dyn BackingFile>,
    pub offset: u64,
    pub read_bytes: u32,
    pub zero_bytes: u32,
    pub writable: bool,
}

pub enum SptKind {
    /// Anonymous, swap-backed: stack, heap, or a FILE page promoted on
    /// eviction.
    Code {
        in_swap: bool,
        swap_slot: Option<SwapSlot>,
    },
    /// Read-only (or writable-from-executable) file region.
    File(FileBacking),
    /// File mapped into memory; dirty pages write back on eviction/unmap.
    Mmap(FileBacking),
}

pub struct SptEntry {
    pub upage: u64,
    pub pid: usize,
    pub pml4_phys: PhysAddr,
    pub kind: SptKind,
    pub frame: Option<PhysFrame<Size4KiB>>,
    pub pinned: bool,
}

/// Per-process supplemental page table.
///
/// Needs no lock of its own: only that process's own thread ever calls
/// these methods directly, and the one cross-process access —
/// eviction inspecting/mutating a victim's entry — goes through the
/// raw pointer frame_table.rs stashed at install time, guarded by the
/// frame-table lock, not this struct.
pub struct Spt {
    pid: usize,
    pml4_phys: PhysAddr,
    entries: BTreeMap<u64, Box<SptEntry>>,
}

impl Spt {
    pub fn new(pid: usize, pml4_phys: PhysAddr) -> Self {
        Self {
            pid,
            pml4_phys,
            entries: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, addr: u64) -> Option<&SptEntry> {
        self.entries.get(&round_down(addr)).map(|b| b.as_ref())
    }

    pub fn lookup_mut(&mut self, addr: u64) -> Option<&mut SptEntry> {
        self.entries.get_mut(&round_down(addr)).map(|b| b.as_mut())
    }

    pub fn create_code(&mut self, upage: u64) -> VmResult<()> {
        let upage = round_down(upage);
        if self.entries.contains_key(&upage) {
            return Err(VmError::Fatal("duplicate SPT entry"));
        }
        self.entries.insert(
            upage,
            Box::new(SptEntry {
                upage,
                pid: self.pid,
                pml4_phys: self.pml4_phys,
                kind: SptKind::Code { in_swap: false, swap_slot: None },
                frame: None,
                pinned: false,
            }),
        );
        Ok(())
    }

    pub fn create_file(
        &mut self,
        file: Arc<dyn BackingFile>,
        offset: u64,
        upage: u64,
        read_bytes: u32,
        zero_bytes: u32,
        writable: bool,
    ) -> VmResult<()> {
        let upage = round_down(upage);
        if read_bytes as u64 + zero_bytes as u64 != PAGE_SIZE {
            return Err(VmError::Fatal("read_bytes + zero_bytes must equal page size"));
        }
        if self.entries.contains_key(&upage) {
            return Err(VmError::Fatal("duplicate SPT entry"));
        }
        self.entries.insert(
            upage,
            Box::new(SptEntry {
                upage,
                pid: self.pid,
                pml4_phys: self.pml4_phys,
                kind: SptKind::File(FileBacking { file, offset, read_bytes, zero_bytes, writable }),
                frame: None,
                pinned: false,
            }),
        );
        Ok(())
    }

    /// Register `ceil(length / PAGE_SIZE)` MMAP entries starting at
    /// `upage`. On overlap with an existing entry, every entry this
    /// call inserted is removed before returning.
    pub fn create_mmap(&mut self, file: Arc<dyn BackingFile>, length: u64, upage: u64) -> VmResult<u64> {
        let upage = round_down(upage);
        let pages = page_count(length);
        let mut inserted = Vec::with_capacity(pages);

        for i in 0..pages {
            let page_upage = upage + (i as u64) * PAGE_SIZE;
            if self.entries.contains_key(&page_upage) {
                for u in inserted {
                    self.entries.remove(&u);
                }
                return Err(VmError::MmapConflict);
            }

            let offset = (i as u64) * PAGE_SIZE;
            let remaining = length - offset;
            let read_bytes = remaining.min(PAGE_SIZE) as u32;
            let zero_bytes = PAGE_SIZE as u32 - read_bytes;

            self.entries.insert(
                page_upage,
                Box::new(SptEntry {
                    upage: page_upage,
                    pid: self.pid,
                    pml4_phys: self.pml4_phys,
                    kind: SptKind::Mmap(FileBacking {
                        file: file.clone(),
                        offset,
                        read_bytes,
                        zero_bytes,
                        writable: true,
                    }),
                    frame: None,
                    pinned: false,
                }),
            );
            inserted.push(page_upage);
        }

        Ok(upage)
    }

    /// Release every page of the mapping that started at `first_upage`.
    /// The page count is derived from the backing file's own length,
    /// not a separately-tracked mapping length, so a short or malformed
    /// intermediate entry can never truncate the walk early.
    pub fn destroy_mmap(&mut self, first_upage: u64) -> VmResult<()> {
        let first_upage = round_down(first_upage);

        let (file_ptr, length) = match self.entries.get(&first_upage).map(|e| &e.kind) {
            Some(SptKind::Mmap(fb)) => (Arc::as_ptr(&fb.file), fb.file.length()),
            _ => return Err(VmError::Fatal("destroy_mmap: not a mapped entry")),
        };

        let pages = page_count(length);
        for i in 0..pages {
            let u = first_upage + (i as u64) * PAGE_SIZE;
            let same_mapping = matches!(
                self.entries.get(&u).map(|e| &e.kind),
                Some(SptKind::Mmap(fb)) if core::ptr::eq(Arc::as_ptr(&fb.file), file_ptr)
            );
            if same_mapping {
                self.free_spte(u);
            }
        }
        Ok(())
    }

    pub fn destroy_all(&mut self) {
        let upages: Vec<u64> = self.entries.keys().copied().collect();
        for u in upages {
            self.free_spte(u);
        }
    }

    fn free_spte(&mut self, upage: u64) {
        let Some(mut entry) = self.entries.remove(&upage) else { return };

        if let Some(frame) = entry.frame {
            frame_table::write_to_disk(&mut entry);
            page_dir::clear(entry.pml4_phys, entry.upage);
            frame_table::free_frame(frame);
            entry.frame = None;
        }

        if let SptKind::Code { swap_slot: Some(slot), .. } = entry.kind {
            swap::release(slot);
        }
    }

    /// `grow_stack(addr, pinned)` per spec: create and load an
    /// anonymous page at `round_down(addr)`, refusing growth past
    /// `MAX_STACK_SIZE` below the user-address ceiling.
    pub fn grow_stack(&mut self, addr: u64, pinned: bool) -> VmResult<()> {
        let page = round_down(addr);
        if USER_ADDRESS_CEILING - page > MAX_STACK_SIZE {
            return Err(VmError::UserFault("stack growth exceeds maximum size"));
        }
        self.create_code(page)?;
        let entry = self.entries.get_mut(&page).expect("entry just inserted");
        if let Err(e) = install_load(entry) {
            self.entries.remove(&page);
            return Err(e);
        }
        self.entries.get_mut(&page).unwrap().pinned = pinned;
        Ok(())
    }

    pub fn dump_spt(&self) {
        crate::serial_println!("SPT for PID {}:", self.pid);
        for (upage, entry) in self.entries.iter() {
            let kind = match &entry.kind {
                SptKind::Code { in_swap: true, .. } => "code(swap)",
                SptKind::Code { in_swap: false, .. } => "code",
                SptKind::File(fb) if fb.writable => "file(rw)",
                SptKind::File(_) => "file(ro)",
                SptKind::Mmap(_) => "mmap",
            };
            crate::serial_println!(
                "  {:#x} [{}] resident={} pinned={}",
                upage, kind, entry.frame.is_some(), entry.pinned,
            );
        }
    }
}

/// Materialize `entry`'s contents into a fresh frame and install the
/// hardware mapping. Serialized against the victim scanner by the
/// eviction lock (see frame_table::evict_lock) for the whole body, so
/// a concurrent scan never observes this entry half-resident.
pub fn install_load(entry: &mut SptEntry) -> VmResult<()> {
    let _evict_guard = frame_table::evict_lock();

    let zero_on_alloc = matches!(entry.kind, SptKind::Code { in_swap: false, .. });
    let frame = frame_table::get_frame(zero_on_alloc, entry as *mut SptEntry, entry.pid, entry.pml4_phys);

    let materialized = match &mut entry.kind {
        SptKind::File(fb) | SptKind::Mmap(fb) => load_file_backed(frame, fb),
        SptKind::Code { in_swap, swap_slot } if *in_swap => {
            let slot = swap_slot.take().expect("in_swap entry without a swap slot");
            swap::swap_in(slot, frame);
            *in_swap = false;
            Ok(())
        }
        SptKind::Code { .. } => Ok(()),
    };

    if let Err(e) = materialized {
        frame_table::free_frame(frame);
        return Err(e);
    }

    let writable = match &entry.kind {
        SptKind::File(fb) => fb.writable,
        SptKind::Mmap(_) | SptKind::Code { .. } => true,
    };

    if !page_dir::install(entry.pml4_phys, entry.upage, frame, writable) {
        frame_table::free_frame(frame);
        return Err(VmError::Fatal("page directory refused the mapping"));
    }

    entry.frame = Some(frame);
    Ok(())
}

fn load_file_backed(frame: PhysFrame<Size4KiB>, fb: &FileBacking) -> VmResult<()> {
    let phys_offset = crate::memory::physical_memory_offset();
    let dst = unsafe {
        core::slice::from_raw_parts_mut(
            (phys_offset + frame.start_address().as_u64()).as_mut_ptr::<u8>(),
            PAGE_SIZE as usize,
        )
    };

    let read_bytes = fb.read_bytes as usize;
    let got = fb
        .file
        .read_at(&mut dst[..read_bytes], fb.offset)
        .map_err(|_| VmError::Fatal("backing file read failed"))?;
    if got < read_bytes {
        dst[got..read_bytes].fill(0);
    }
    dst[read_bytes..].fill(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use spin::Mutex as SpinMutex;

    struct MockFile {
        data: SpinMutex<Vec<u8>>,
    }

    impl BackingFile for MockFile {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> super::super::backing_file::BackingFileResult<usize> {
            let data = self.data.lock();
            let offset = offset as usize;
            if offset >= data.len() {
                return Ok(0);
            }
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            Ok(n)
        }

        fn write_at(&self, buf: &[u8], offset: u64) -> super::super::backing_file::BackingFileResult<usize> {
            let mut data = self.data.lock();
            let offset = offset as usize;
            if offset + buf.len() > data.len() {
                data.resize(offset + buf.len(), 0);
            }
            data[offset..offset + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }

        fn length(&self) -> u64 {
            self.data.lock().len() as u64
        }

        fn reopen(&self) -> Arc<dyn BackingFile> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn dummy_pml4() -> PhysAddr {
        PhysAddr::new(0x1000)
    }

    #[test]
    fn duplicate_upage_is_rejected() {
        let mut spt = Spt::new(1, dummy_pml4());
        spt.create_code(0x1000).unwrap();
        assert!(spt.create_code(0x1000).is_err());
    }

    #[test]
    fn mmap_overlap_is_rejected_and_rolled_back() {
        let mut spt = Spt::new(1, dummy_pml4());
        spt.create_code(0x3000).unwrap();

        let file: Arc<dyn BackingFile> = Arc::new(MockFile { data: SpinMutex::new(vec![0u8; 8192]) });
        let result = spt.create_mmap(file, 8192, 0x2000);

        assert!(result.is_err());
        assert!(spt.lookup(0x2000).is_none(), "rollback must remove entries already inserted");
        assert!(spt.lookup(0x3000).is_some(), "the pre-existing entry must survive the rollback");
    }

    #[test]
    fn destroy_all_empties_the_table() {
        let mut spt = Spt::new(1, dummy_pml4());
        spt.create_code(0x1000).unwrap();
        spt.create_code(0x2000).unwrap();
        spt.destroy_all();
        assert!(spt.lookup(0x1000).is_none());
        assert!(spt.lookup(0x2000).is_none());
    }

    #[test]
    fn read_only_file_pages_reject_write_access() {
        let mut spt = Spt::new(1, dummy_pml4());
        let file: Arc<dyn BackingFile> = Arc::new(MockFile { data: SpinMutex::new(vec![0u8; 4096]) });
        spt.create_file(file, 0, 0x4000, 4096, 0, false).unwrap();
        let entry = spt.lookup(0x4000).unwrap();
        assert!(matches!(&entry.kind, SptKind::File(fb) if !fb.writable));
    }
}
