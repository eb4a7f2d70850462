use crate::irq::IrqGuard;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Interior-mutable container whose critical sections run with interrupts off.
///
/// On a single processor, disabling interrupts is all the mutual exclusion
/// kernel state needs: no other code can run until the guard is dropped. The
/// `held` flag does not wait for anything; it only catches re-entrant use
/// (for example an interrupt handler touching state its own caller had
/// borrowed) and turns it into a panic instead of aliased `&mut`.
pub struct IrqLock<T> {
    held: AtomicBool,
    cell: UnsafeCell<T>,
}

// Access is serialized by the IF bit on a uniprocessor.
unsafe impl<T: Send> Sync for IrqLock<T> {}
unsafe impl<T: Send> Send for IrqLock<T> {}

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            cell: UnsafeCell::new(value),
        }
    }

    /// Disables interrupts and borrows the value.
    ///
    /// # Panics
    /// If the lock is already held by the current execution context.
    #[inline]
    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        let irq = IrqGuard::new();
        assert!(
            !self.held.swap(true, Ordering::Acquire),
            "IrqLock re-entered while held"
        );
        IrqLockGuard { lock: self, _irq: irq }
    }

    /// Like [`lock`](Self::lock) but returns `None` instead of panicking on re-entry.
    #[inline]
    pub fn try_lock(&self) -> Option<IrqLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        if self.held.swap(true, Ordering::Acquire) {
            return None;
        }
        Some(IrqLockGuard { lock: self, _irq: irq })
    }

    /// Runs `f` with exclusive access to the value.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.cell.get_mut()
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }
}

impl<T: Default> Default for IrqLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Borrow of an [`IrqLock`]; interrupts stay disabled while it lives.
///
/// Field order matters: the flag is released before the interrupt state is
/// restored.
pub struct IrqLockGuard<'a, T> {
    lock: &'a IrqLock<T>,
    _irq: IrqGuard,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.cell.get() }
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.cell.get() }
    }
}

impl<T> Drop for IrqLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
