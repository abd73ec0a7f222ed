// kernel/src/process/mod.rs

use alloc::boxed::Box;
use x86_64::VirtAddr;

use crate::memory::address_space::AddressSpace;

pub mod context;
pub mod file;
pub mod syscall;
pub mod timer_preempt;
pub mod trapframe;
pub mod trapret;
pub mod tss;
pub mod user_test_fileio;
pub mod user_test_minimal;
pub mod userspace;
pub mod scheduler;

use context::Context;
use file::FileDescriptorTable;
use trapframe::TrapFrame;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub usize);

/// Estado del proceso
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,      // Listo para ejecutar
    Running,    // Ejecutándose actualmente
    Sleeping,   // Esperando I/O
    Zombie,     // Terminado pero no recolectado
}

/// Privilege level del proceso
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeLevel {
    Kernel,  // Ring 0
    User,    // Ring 3
}

/// Process Control Block (PCB)
pub struct Process {
    pub pid: Pid,
    pub state: ProcessState,
    pub context: Context,
    /// Only populated for user-privilege processes. Updated in place by
    /// `timer_preempt_handler` on every preemption; consulted by
    /// `scheduler::kill_and_switch` and `start_first_process` to build
    /// the iretq frame that resumes this process in Ring 3.
    pub trapframe: Option<Box<TrapFrame>>,
    pub kernel_stack: VirtAddr,
    pub user_stack: Option<VirtAddr>,
    pub privilege: PrivilegeLevel,
    pub address_space: AddressSpace,
    pub files: FileDescriptorTable,
    pub priority: u8,
    pub name: [u8; 32],
}

impl Process {
    /// Crea un nuevo proceso de kernel (Ring 0). Cooperatively scheduled
    /// via `context::switch_context`, same as before this process
    /// carried its own `AddressSpace`/`FileDescriptorTable`.
    pub fn new_kernel(pid: Pid, entry_point: VirtAddr, kernel_stack: VirtAddr, address_space: AddressSpace) -> Self {
        Self {
            pid,
            state: ProcessState::Ready,
            context: Context::new(entry_point, kernel_stack),
            trapframe: None,
            kernel_stack,
            user_stack: None,
            privilege: PrivilegeLevel::Kernel,
            address_space,
            files: FileDescriptorTable::new_with_stdio(),
            priority: 0,
            name: [0; 32],
        }
    }

    /// Crea un proceso de user space (Ring 3). Dispatched and preempted
    /// through its `TrapFrame` (see timer_preempt.rs), not through
    /// `context::switch_context` — `context` is left empty and unused.
    pub fn new_user(pid: Pid, entry_point: VirtAddr, user_stack_top: VirtAddr, kernel_stack: VirtAddr, address_space: AddressSpace) -> Self {
        let (user_cs, user_ss) = tss::get_user_selectors();
        let trapframe = TrapFrame::new_user(
            entry_point.as_u64(),
            user_stack_top.as_u64(),
            user_cs.0 as u64,
            user_ss.0 as u64,
        );

        Self {
            pid,
            state: ProcessState::Ready,
            context: Context::empty(),
            trapframe: Some(Box::new(trapframe)),
            kernel_stack,
            user_stack: Some(user_stack_top),
            privilege: PrivilegeLevel::User,
            address_space,
            files: FileDescriptorTable::new_with_stdio(),
            priority: 0,
            name: [0; 32],
        }
    }

    pub fn set_name(&mut self, name: &str) {
        let bytes = name.as_bytes();
        let len = bytes.len().min(31);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    pub fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }
}

/// Yield CPU para permitir context switch (kernel-privilege processes
/// only — user processes are preempted by the timer, not cooperatively).
pub fn yield_cpu() {
    use context::switch_context;

    let switch_info = {
        let mut scheduler = scheduler::SCHEDULER.lock();
        scheduler.switch_to_next()
    };

    if let Some((old_ctx, new_ctx)) = switch_info {
        unsafe {
            switch_context(old_ctx, new_ctx);
        }
    }
}

/// Dispatch the first process picked by the scheduler. Called once at
/// the end of boot, after every process has been created and queued.
/// Never returns: kernel processes are entered via `switch_context`
/// (discarding the throwaway "previous" context), user processes via
/// `trapret`.
pub fn start_first_process() -> ! {
    let (privilege, kernel_stack, ctx_ptr, tf_ptr) = {
        let mut scheduler = scheduler::SCHEDULER.lock();
        let proc = scheduler.processes.front_mut().expect("no processes to start");

        proc.state = ProcessState::Running;
        scheduler.current = Some(proc.pid);

        unsafe { proc.address_space.activate(); }

        let ctx_ptr = &proc.context as *const Context;
        let tf_ptr = proc.trapframe.as_deref().map(|tf| tf as *const TrapFrame);
        (proc.privilege, proc.kernel_stack, ctx_ptr, tf_ptr)
    };

    tss::set_kernel_stack(kernel_stack);

    match privilege {
        PrivilegeLevel::Kernel => {
            let mut discard = Context::empty();
            unsafe { context::switch_context(&mut discard as *mut Context, ctx_ptr); }
        }
        PrivilegeLevel::User => {
            let tf_ptr = tf_ptr.expect("user process created without a trapframe");
            unsafe { trapret::trapret(tf_ptr); }
        }
    }

    unreachable!("switch_context/trapret never return");
}

/// Función de prueba que ejecuta en Ring 3
#[no_mangle]
pub extern "C" fn user_test_function() -> ! {
    // Obtener PID
    let pid = userspace::sys_getpid();

    // Mensaje de prueba
    let msg = b"Hello from userspace! PID=";
    userspace::sys_write(1, msg.as_ptr(), msg.len());

    // ✅ FIX: Usar array estático o escribir char por char
    if pid < 10 {
        let c = b'0' + pid as u8;
        userspace::sys_write(1, &c as *const u8, 1);
    } else {
        let tens = b'0' + (pid / 10) as u8;
        let ones = b'0' + (pid % 10) as u8;
        userspace::sys_write(1, &tens as *const u8, 1);
        userspace::sys_write(1, &ones as *const u8, 1);
    }

    let newline = b"\n";
    userspace::sys_write(1, newline.as_ptr(), newline.len());

    // Salir con status 0
    userspace::sys_exit(0);
}
