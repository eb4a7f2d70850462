use kernel_sync::IrqLock;
use kernel_sync::irq::{cli_stop_interrupts, interrupts_enabled, sti_enable_interrupts};
use std::panic;

#[test]
fn lock_masks_interrupts_and_restores_them() {
    sti_enable_interrupts();
    let l = IrqLock::new(0_u32);
    {
        let mut g = l.lock();
        assert!(!interrupts_enabled());
        *g = 41;
    }
    assert!(interrupts_enabled());
    l.with_lock(|v| *v += 1);
    assert_eq!(*l.lock(), 42);
}

#[test]
fn lock_leaves_disabled_interrupts_disabled() {
    cli_stop_interrupts();
    let l = IrqLock::new(());
    drop(l.lock());
    assert!(!interrupts_enabled());
}

#[test]
fn try_lock_reports_reentry() {
    let l = IrqLock::new(1_u8);
    let g1 = l.lock();
    assert!(l.try_lock().is_none());
    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn reentrant_lock_panics() {
    let l = IrqLock::new(5_i32);
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        let _a = l.lock();
        let _b = l.lock();
    }));
    assert!(result.is_err());
    // the outer guard was unwound, so the lock is usable again
    assert_eq!(*l.lock(), 5);
}

#[test]
fn get_mut_and_into_inner() {
    let mut l = IrqLock::new(vec![1, 2, 3]);
    l.get_mut().push(4);
    assert_eq!(l.into_inner(), vec![1, 2, 3, 4]);
}
