//! Process and thread control block tests, and the synchronization
//! primitives (C6/C7) they're built on.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use influx_kernel::mm::PhysicalAddress;
use influx_kernel::process::signal::{SignalAction, SignalDisposition, SIGTERM};
use influx_kernel::process::{Process, ProcessId};
use influx_kernel::sync::{ConditionVariable, Mutex, Spinlock};
use influx_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[path = "common/mod.rs"]
mod common;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Process Management Tests");

    test_process_construction();
    test_process_fork_from();
    test_signal_action_defaults();
    test_spinlock_mutual_exclusion();
    test_mutex_try_lock();
    test_condvar_notify();

    serial_println!("All process tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_process_construction() {
    let pid = ProcessId(100);
    let process = Process::new(
        pid,
        ProcessId(1),
        5,
        false,
        PhysicalAddress::new(0x20_0000),
        0xffff_8000_0010_0000,
        alloc::string::String::from("test_process"),
    );

    assert_eq!(process.pid, pid);
    assert_eq!(process.ppid, ProcessId(1));
    assert!(process.alive);
    assert!(process.children.is_empty());

    serial_println!("[ok] process construction");
}

fn test_process_fork_from() {
    let parent = Process::new(
        ProcessId(200),
        ProcessId(1),
        5,
        false,
        PhysicalAddress::new(0x20_0000),
        0xffff_8000_0010_0000,
        alloc::string::String::from("parent"),
    );

    let mut child = Process::fork_from(&parent, ProcessId(201), PhysicalAddress::new(0x30_0000), 0xffff_8000_0020_0000);
    assert_eq!(child.ppid, parent.pid);
    assert_eq!(child.name, parent.name);

    child.add_child(ProcessId(202));
    assert!(child.has_live_child(ProcessId(202)));
    child.remove_child(ProcessId(202));
    assert!(!child.has_live_child(ProcessId(202)));

    serial_println!("[ok] fork_from copies parent state");
}

fn test_signal_action_defaults() {
    let action = SignalAction::default_action();
    assert_eq!(action.disposition, SignalDisposition::Default);
    let _ = SIGTERM;

    serial_println!("[ok] signal action defaults");
}

fn test_spinlock_mutual_exclusion() {
    let lock = Spinlock::new(0u32);
    {
        let mut guard = lock.lock();
        *guard += 1;
    }
    assert_eq!(*lock.lock(), 1);

    serial_println!("[ok] spinlock");
}

fn test_mutex_try_lock() {
    let mutex = Mutex::new(0u32);
    let guard = mutex.try_lock().expect("uncontended try_lock should succeed");
    assert!(mutex.try_lock().is_none());
    drop(guard);
    assert!(mutex.try_lock().is_some());

    serial_println!("[ok] mutex try_lock");
}

fn test_condvar_notify() {
    let mutex = Mutex::new(0u32);
    let condvar = ConditionVariable::new();
    // Single-threaded smoke test: notify with no waiters must not panic.
    condvar.notify_one();
    condvar.notify_all();
    let _ = mutex.lock();

    serial_println!("[ok] condvar notify with no waiters");
}
