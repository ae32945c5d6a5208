//! # Kernel Write Lock
//!
//! With CR0.WP set, supervisor code faults on writes to read-only pages just
//! like user code does. The bootstrap sets it so the kernel's own read-only
//! sections are enforced; these helpers lift it briefly, e.g. to patch code.

use kernel_registers::cr0::Cr0;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_sync::IrqGuard;
use log::trace;

/// Whether supervisor writes to read-only pages fault (CR0.WP).
#[inline]
#[must_use]
pub fn is_write_locked() -> bool {
    // SAFETY: CR0 is readable at CPL0.
    unsafe { Cr0::load_unsafe() }.wp_write_protect()
}

/// Set or clear CR0.WP.
#[inline]
pub fn set_write_lock(locked: bool) {
    // SAFETY: only the WP bit changes; CPL0 is required and assumed.
    unsafe {
        let cr0 = Cr0::load_unsafe();
        cr0.with_wp_write_protect(locked).store_unsafe();
    }
    trace!("kernel write lock {}", if locked { "set" } else { "released" });
}

/// Run `f` with CR0.WP cleared and interrupts masked, then restore the
/// previous write-lock state.
///
/// ```
/// use kernel_vmem::write_lock::{is_write_locked, set_write_lock, with_write_lock_released};
///
/// set_write_lock(true);
/// let inside = with_write_lock_released(is_write_locked);
/// assert!(!inside);
/// assert!(is_write_locked());
/// ```
pub fn with_write_lock_released<R>(f: impl FnOnce() -> R) -> R {
    let _irq = IrqGuard::new();
    let _restore = WriteLockRestore {
        was_locked: is_write_locked(),
    };
    set_write_lock(false);
    f()
}

struct WriteLockRestore {
    was_locked: bool,
}

impl Drop for WriteLockRestore {
    fn drop(&mut self) {
        set_write_lock(self.was_locked);
    }
}
