// kernel/src/memory/mod.rs

use x86_64::VirtAddr;
use core::sync::atomic::{AtomicU64, Ordering};

pub mod paging;
pub mod frame_allocator;
pub mod page_table_manager;
pub mod address_space;

pub mod vm_config;
pub mod error;
pub mod backing_file;
pub mod page_dir;
pub mod swap;
pub mod spt;
pub mod frame_table;
pub mod fault;

static PHYSICAL_MEMORY_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Inicializa el offset de memoria física (llamar desde kernel_main)
pub fn init(physical_memory_offset: VirtAddr) {
    PHYSICAL_MEMORY_OFFSET.store(physical_memory_offset.as_u64(), Ordering::Relaxed);
}

/// Obtiene el offset de memoria física
pub fn physical_memory_offset() -> VirtAddr {
    VirtAddr::new(PHYSICAL_MEMORY_OFFSET.load(Ordering::Relaxed))
}