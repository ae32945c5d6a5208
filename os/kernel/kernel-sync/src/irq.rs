//! # Interrupt Masking
//!
//! On a single CPU the only concurrency is an interrupt handler cutting into
//! kernel code. [`IrqGuard`] masks maskable interrupts for a scope and
//! [`Mutex::lock_irq`] pairs that with a lock, so a handler can never spin on
//! a lock its own CPU already holds.

use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::ops::{Deref, DerefMut};
use kernel_registers::LoadRegister;
use kernel_registers::eflags::Eflags;

/// Lock guard returned by [`Mutex::lock_irq`].
///
/// Holds the lock and an [`IrqGuard`]. Dropping it unlocks first and then
/// puts `EFLAGS.IF` back to what it was before the call.
///
/// ```no_run
/// use kernel_sync::SpinMutex;
///
/// static FREE_FRAMES: SpinMutex<u32> = SpinMutex::new(0);
///
/// let mut frames = FREE_FRAMES.lock_irq();
/// *frames += 1;
/// ```
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    // Field order matters: the lock is released before interrupts come back.
    g: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Mask interrupts, then take the lock.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let irq = IrqGuard::new();
        IrqMutex {
            g: self.lock(),
            _irq: irq,
        }
    }
}

impl<T, R: RawLock + RawUnlock> Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.g
    }
}

impl<T, R: RawLock + RawUnlock> DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.g
    }
}

/// Whether maskable interrupts are currently enabled (`EFLAGS.IF`).
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    Eflags::load().if_interrupt_enable()
}

/// `cli`. Requires CPL0 (or IOPL permitting it).
#[inline]
#[cfg(not(any(test, feature = "software-emulation")))]
pub fn cli_stop_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// `sti`. Same privilege requirement as [`cli_stop_interrupts`].
#[inline]
#[cfg(not(any(test, feature = "software-emulation")))]
pub fn sti_enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

/// Clears the emulated `EFLAGS.IF`.
#[inline]
#[cfg(any(test, feature = "software-emulation"))]
pub fn cli_stop_interrupts() {
    set_emulated_interrupt_flag(false);
}

/// Sets the emulated `EFLAGS.IF`.
#[inline]
#[cfg(any(test, feature = "software-emulation"))]
pub fn sti_enable_interrupts() {
    set_emulated_interrupt_flag(true);
}

#[cfg(any(test, feature = "software-emulation"))]
fn set_emulated_interrupt_flag(enabled: bool) {
    use kernel_registers::StoreRegisterUnsafe;
    let flags = Eflags::load().with_if_interrupt_enable(enabled);
    unsafe { flags.store_unsafe() }
}

/// Masks interrupts until dropped.
///
/// Remembers `EFLAGS.IF` on creation and only re-enables interrupts on drop
/// if they were enabled then. An inner guard therefore sees `IF=0` and
/// restores nothing.
///
/// ```no_run
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _irq = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    restore: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let restore = interrupts_enabled();
        if restore {
            cli_stop_interrupts();
        }
        Self { restore }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.restore {
            sti_enable_interrupts();
        }
    }
}
