//! Scheduler queue tests (C8): the ready-ring priority scheme, sleep-queue
//! ordering, and the killed-task FIFO, exercised directly against their
//! intrusive-list data structures.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;
use core::ptr::NonNull;

use alloc::boxed::Box;

use influx_kernel::arch::x86_64::context::X86_64Context;
use influx_kernel::sched::queue::{KilledQueue, PriorityQueues, SleepQueue};
use influx_kernel::sched::task::ThreadState;
use influx_kernel::sched::Tcb;
use influx_kernel::{exit_qemu, serial_println, test_panic_handler, QemuExitCode};

#[path = "common/mod.rs"]
mod common;

fn leaked_task(tid: u64, priority: u8) -> NonNull<Tcb> {
    let tcb = Tcb::new(tid, influx_kernel::process::ProcessId(1), priority, X86_64Context::default(), 0, 4096);
    let leaked: &'static mut Tcb = Box::leak(Box::new(tcb));
    NonNull::from(leaked)
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    common::init_test_env("Scheduler Tests");

    test_priority_queue_picks_highest_first();
    test_sleep_queue_orders_by_wake_time();
    test_killed_queue_is_fifo();

    serial_println!("All scheduler tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_priority_queue_picks_highest_first() {
    let mut queues = PriorityQueues::new();
    let low = leaked_task(1, 2);
    let high = leaked_task(2, 8);

    queues.push(low);
    queues.push(high);

    let picked = queues.pick_next().expect("queue should not be empty");
    assert_eq!(unsafe { picked.as_ref().tid }, 2);

    serial_println!("[ok] priority queue picks the highest ready priority");
}

fn test_sleep_queue_orders_by_wake_time() {
    let mut sleep_queue = SleepQueue::new();

    let mut a = leaked_task(10, 0);
    let mut b = leaked_task(11, 0);
    unsafe {
        a.as_mut().wake_at = 200;
        b.as_mut().wake_at = 100;
    }
    sleep_queue.insert(a);
    sleep_queue.insert(b);

    let expired: alloc::vec::Vec<_> = sleep_queue.pop_expired(150).collect();
    assert_eq!(expired.len(), 1);
    assert_eq!(unsafe { expired[0].as_ref().tid }, 11);

    assert_eq!(unsafe { a.as_ref().state }, ThreadState::Sleeping);

    serial_println!("[ok] sleep queue wakes only expired tasks in order");
}

fn test_killed_queue_is_fifo() {
    let mut killed = KilledQueue::new();
    killed.push(leaked_task(20, 0));
    killed.push(leaked_task(21, 0));

    let first = killed.pop().expect("first task");
    let second = killed.pop().expect("second task");
    assert_eq!(unsafe { first.as_ref().tid }, 20);
    assert_eq!(unsafe { second.as_ref().tid }, 21);
    assert!(killed.pop().is_none());

    serial_println!("[ok] killed queue drains FIFO");
}
