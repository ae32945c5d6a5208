//! # Typed 32-bit x86 Registers
//!
//! The control registers the paging code touches: [`Cr0`](cr0::Cr0) for the
//! paging and write-protect switches, [`Cr3`](cr3::Cr3) for the page directory
//! base, and [`Eflags`](eflags::Eflags) for the interrupt flag.
//!
//! With the `asm` feature the registers are accessed with `mov`/`pushf`. Unit
//! tests and the `software-emulation` feature replace the hardware with
//! per-thread state (see [`emulation`]), so each test thread behaves like its
//! own CPU.

#![cfg_attr(not(any(test, doctest, feature = "software-emulation")), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "eflags")]
pub mod eflags;

#[cfg(any(test, feature = "software-emulation"))]
pub mod emulation;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// Reading this register is permitted at any privilege level.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
