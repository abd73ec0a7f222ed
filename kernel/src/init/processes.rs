// kernel/src/init/processes.rs
//
// Process creation (idle, user, shell) and entry points.
// Code moved verbatim from kernel_main + helper functions.

use alloc::{boxed::Box, format, sync::Arc};
use x86_64::VirtAddr;

use crate::{
    memory::{
        address_space::AddressSpace,
        backing_file::StaticFile,
        vm_config::PAGE_SIZE,
    },
    process::{
        Pid, Process,
        scheduler::SCHEDULER,
        user_test_fileio,
    },
    serial_println,
};

// ============================================================================
// PUBLIC API
// ============================================================================

/// Create all processes: idle, user×2, shell.
pub fn init_all() {
    serial_println!("\n🔧 Creating processes with isolated address spaces...");

    create_idle_process();
    create_user_processes(2);
    create_shell_process();

    serial_println!("✅ All processes created!\n");
}

/// Print open file descriptors for every process (debug).
pub fn debug_file_descriptors() {
    let scheduler = SCHEDULER.lock();
    for proc in scheduler.iter_all() {
        serial_println!("Process {}: open files:", proc.pid.0);
        proc.files.debug_list();
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Allocar un kernel stack desde el Buddy (4 KiB).
fn allocate_kernel_stack() -> VirtAddr {
    let phys_addr = unsafe {
        crate::allocator::buddy_allocator::BUDDY.lock()
            .allocate(14)
            .expect("Failed to allocate kernel stack from buddy")
    };

    let virt_addr = crate::memory::physical_memory_offset() + phys_addr.as_u64();

    // Stack top (grows downward)
    VirtAddr::new(virt_addr.as_u64() + 4096)
}

// ============================================================================
// PROCESS CREATORS
// ============================================================================

/// Idle process — uses kernel address space.
fn create_idle_process() {
    let kernel_stack = allocate_kernel_stack();
    let address_space = AddressSpace::kernel();

    let mut idle_proc = Box::new(Process::new_kernel(
        Pid(0),
        VirtAddr::new(idle_task as *const () as u64),
        kernel_stack,
        address_space,
    ));

    idle_proc.set_name("idle");
    idle_proc.set_priority(0);

    {
        let mut scheduler = SCHEDULER.lock();
        scheduler.add_process(idle_proc);
    }

    serial_println!("✅ Created idle process (PID 0)");
}

/// User processes — each gets its own AddressSpace. Code is FILE-backed
/// (demand-loaded, read-only) instead of eagerly mapped; the stack is
/// CODE-backed and grows on demand the same way a real process's does.
fn create_user_processes(num_processes: usize) {
    let test_name = "write";

    user_test_fileio::print_available_tests();
    serial_println!("\n📝 Using test: '{}'", test_name);

    const CODE_BASE: u64 = 0x0000_0000_0040_0000;
    const CODE_PAGE_BYTES: u32 = 4096;

    for i in 0..num_processes {
        let kernel_stack = allocate_kernel_stack();
        let pid = {
            let mut scheduler = SCHEDULER.lock();
            scheduler.allocate_pid()
        };

        // ============ 1. CREATE ADDRESS SPACE ============
        let mut address_space = unsafe {
            AddressSpace::new_user(pid.0)
                .expect("Failed to create user address space")
        };

        serial_println!(
            "Created address space for process {}: PML4 at {:#x}",
            i,
            address_space.root_frame().start_address().as_u64()
        );

        // ============ 2. REGISTER CODE AS A FILE-BACKED SPT ENTRY ============
        // The "file" here is the in-memory test program; a real loader
        // would hand in an actual executable's FileHandle instead.
        let code_ptr = user_test_fileio::get_test_ptr(test_name);
        let code_bytes: &'static [u8] = unsafe {
            core::slice::from_raw_parts(code_ptr, CODE_PAGE_BYTES as usize)
        };
        let code_file: Arc<dyn crate::memory::backing_file::BackingFile> =
            Arc::new(StaticFile::new(code_bytes));

        address_space.spt
            .create_file(code_file, 0, CODE_BASE, CODE_PAGE_BYTES, 0, false)
            .expect("Failed to register code SPT entry");

        serial_println!("  Registered 1 file-backed code page at {:#x}", CODE_BASE);

        // ============ 3. REGISTER THE STACK'S TOP PAGE ============
        // Only the top page is pre-registered; fault.rs's grow_stack
        // extends it further on demand, same as any other stack fault.
        let user_stack_base = 0x0000_7100_0000_0000_u64 + (i as u64 * 0x10000);
        let stack_pages: u64 = 16; // 64 KiB virtual stack, demand-paged.
        let stack_top_page = user_stack_base + (stack_pages - 1) * PAGE_SIZE;

        address_space.spt
            .create_code(stack_top_page)
            .expect("Failed to register stack SPT entry");

        serial_println!(
            "  Stack: {:#x}..{:#x} ({} pages, demand-paged)",
            user_stack_base,
            user_stack_base + stack_pages * PAGE_SIZE,
            stack_pages,
        );

        address_space.spt.dump_spt();

        // ============ 4. CREATE PROCESS ============
        {
            // RSP points near the top of the stack region (grows downward).
            let user_stack_top = VirtAddr::new(
                user_stack_base + stack_pages * PAGE_SIZE - 8
            );

            let mut user_proc = Box::new(Process::new_user(
                pid,
                VirtAddr::new(CODE_BASE),
                user_stack_top,
                kernel_stack,
                address_space,
            ));

            user_proc.set_name(&format!("user_{}", i));
            user_proc.set_priority(5);

            let mut scheduler = SCHEDULER.lock();
            scheduler.add_process(user_proc);
        }

        serial_println!("✅ Created user process {} (PID {})", i, pid.0);
    }
}

/// Shell process — kernel, uses kernel address space.
fn create_shell_process() {
    let kernel_stack = allocate_kernel_stack();
    let address_space = AddressSpace::kernel();

    let pid = {
        let mut scheduler = SCHEDULER.lock();
        let pid = scheduler.allocate_pid();

        let mut shell = Box::new(Process::new_kernel(
            pid,
            VirtAddr::new(shell_process as *const () as u64),
            kernel_stack,
            address_space,
        ));

        shell.set_name("shell");
        shell.set_priority(8);

        scheduler.add_process(shell);
        pid
    };

    serial_println!("✅ Created shell process (PID {})", pid.0);
}

// ============================================================================
// PROCESS ENTRY POINTS
// ============================================================================

fn idle_task() -> ! {
    loop {
        unsafe { core::arch::asm!("hlt"); }
    }
}

fn shell_process() -> ! {
    let mut repl = crate::repl::Repl::new(10, 50);
    repl.show_prompt();

    loop {
        if let Some(character) = crate::keyboard::read_key() {
            repl.handle_char(character);
        }
        unsafe { core::arch::asm!("pause"); }
    }
}
