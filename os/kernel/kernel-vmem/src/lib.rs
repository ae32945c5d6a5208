//! # Virtual Memory Support
//!
//! Two-level x86 paging (32-bit, no PAE) for a small monolithic kernel.
//!
//! ## What you get
//! - An [`AddressSpace`] handle per page directory with creation, cloning,
//!   destruction and activation.
//! - Mapping and unmapping of single 4 KiB pages and page ranges, with
//!   all-or-nothing range semantics.
//! - Read-only queries: [`resolve`](AddressSpace::resolve),
//!   [`translate`](AddressSpace::translate), [`contains`](AddressSpace::contains), ...
//! - The boot-time [`KernelSpace`] that identity-maps RAM and write-protects
//!   the read-only sections of the kernel image.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  CR3 ─► PD ─► PT ─► Physical Page
//!          │     │
//!          │     └───► PTE (Page Table Entry)      → maps a 4 KiB page
//!          └─────────► PDE (Page Directory Entry)  → points to a PT
//! ```
//!
//! Both levels hold 1024 four-byte entries and occupy exactly one 4 KiB frame.
//! 4 MiB pages (`PDE.PS=1`) are never created.
//!
//! ## Owned and shared tables
//!
//! Every address space shares the kernel's page tables: a new space starts
//! with the kernel directory slots copied in, marked as
//! [`Shared`](page_table::pd::DirectoryEntryKind::Shared). Tables a space
//! allocates itself are [`Owned`](page_table::pd::DirectoryEntryKind::Owned)
//! and are freed with it; shared tables never are.
//!
//! ## Interrupts
//!
//! Every mutation runs inside a [`kernel_sync::IrqGuard`], so the page-fault
//! handler can never observe a half-written directory.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
pub mod elf_sections;
mod error;
pub mod kernel_space;
mod page_entry_bits;
pub mod page_table;
pub mod tlb;
pub mod write_lock;

#[cfg(test)]
mod test_support;

pub use crate::address_space::AddressSpace;
pub use crate::error::VmemError;
pub use crate::kernel_space::KernelSpace;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{DirectoryEntryKind, PageDirectory, PdEntry};
pub use crate::page_table::pt::{PageTable, PtEntry};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Source of **physical** 4 KiB frames for page directories and page tables.
///
/// The implementation decides where frames come from (bitmap, free list, ...).
/// Returned frames **must** be 4 KiB aligned; they need not be zeroed, the
/// paging code clears every frame it takes.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame, or `None` when out of memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }

    #[inline]
    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        (**self).free_4k(page);
    }
}

/// Converts physical addresses to *temporarily* usable references in the
/// current virtual address space.
///
/// Typical patterns:
/// - **Kernel**: all of RAM is identity mapped, so the address is the pointer.
/// - **Tests**: physical memory is a buffer; add the buffer's base.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable for `&mut T` in the current page tables.
    /// - The mapping must stay valid for `'a`; the lifetime is unchecked.
    /// - The bytes at `pa` must be a valid `T` and must not be aliased by
    ///   another live reference.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// View `len` bytes of physical memory starting at `pa`.
    ///
    /// The default implementation assumes the range is mapped contiguously.
    ///
    /// # Safety
    /// The whole range must be mapped and must not be mutated while the
    /// slice is alive.
    unsafe fn phys_to_slice<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a [u8] {
        let first: &u8 = unsafe { self.phys_to_mut::<u8>(pa) };
        unsafe { core::slice::from_raw_parts(core::ptr::from_ref(first), len) }
    }
}
