//! # TLB Consistency
//!
//! The TLB is kept coherent by reloading CR3, which drops every non-global
//! translation. Only the *active* address space can have stale entries, so
//! changes to any other space never flush.

use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// Whether `root` is the page directory currently loaded in CR3.
#[inline]
#[must_use]
pub fn is_active(root: PhysicalPage<Size4K>) -> bool {
    // SAFETY: the paging code runs at CPL0, where CR3 is readable.
    let cr3 = unsafe { Cr3::load_unsafe() };
    cr3.page_directory() == root
}

/// Whether CR0.PG is set. Before that CR3 holds whatever the loader left.
#[inline]
#[must_use]
pub fn paging_enabled() -> bool {
    // SAFETY: CR0 is readable at CPL0.
    unsafe { Cr0::load_unsafe() }.pg_paging()
}

/// Flush the whole TLB by writing CR3 back to itself.
#[inline]
pub fn reload() {
    // SAFETY: storing the value just read keeps the active directory unchanged.
    unsafe {
        let cr3 = Cr3::load_unsafe();
        cr3.store_unsafe();
    }
}

/// Flush the TLB if `root` is the active page directory.
///
/// Returns whether a flush happened.
#[inline]
pub fn reload_if_active(root: PhysicalPage<Size4K>) -> bool {
    if is_active(root) {
        reload();
        return true;
    }
    false
}

/// Install `root` as the translation root.
///
/// # Safety
/// `root` must hold a valid page directory that maps the currently executing
/// code, the stack and everything else the caller touches afterwards.
#[inline]
pub unsafe fn load_root(root: PhysicalPage<Size4K>) {
    unsafe { Cr3::from_page_directory(root).store_unsafe() }
}

/// Restores a saved CR3 value when dropped.
pub(crate) struct RootRestore {
    previous: Cr3,
}

impl RootRestore {
    /// Switch to `root`, remembering the currently active directory.
    ///
    /// # Safety
    /// Same contract as [`load_root`], for both `root` and the directory
    /// that is restored on drop.
    pub(crate) unsafe fn switch_to(root: PhysicalPage<Size4K>) -> Self {
        let previous = unsafe { Cr3::load_unsafe() };
        unsafe { load_root(root) };
        Self { previous }
    }
}

impl Drop for RootRestore {
    fn drop(&mut self) {
        // SAFETY: this directory was active when the guard was created.
        unsafe { self.previous.store_unsafe() }
    }
}
