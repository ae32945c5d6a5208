//! # Physical Memory Access
//!
//! The kernel identity-maps all of RAM, so a physical address is also a
//! usable pointer. [`OffsetPhysMapper`] generalizes that to "physical memory
//! is visible at `offset + pa`", which also covers hosted tests where a
//! buffer plays the role of RAM.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::OffsetPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::{PageTable, PhysMapper};
//!
//! #[repr(C, align(4096))]
//! struct Ram([u8; 8192]);
//!
//! let mut ram = Box::new(Ram([0xFF; 8192]));
//! let mapper = OffsetPhysMapper::new(ram.0.as_mut_ptr().expose_provenance());
//! unsafe {
//!     let table: &mut PageTable = mapper.phys_to_mut(PhysicalAddress::new(0x1000));
//!     table.zero();
//! }
//! assert!(ram.0[0x1000..].iter().all(|&b| b == 0));
//! assert_eq!(ram.0[0], 0xFF);
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for physical memory mapped contiguously at a fixed offset.
///
/// # Safety
/// - The mapping must cover every physical range that is accessed.
/// - References handed out must only be used for valid, mapped and writable memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetPhysMapper {
    offset: usize,
}

impl OffsetPhysMapper {
    /// Physical memory is identity mapped.
    pub const IDENTITY: Self = Self::new(0);

    /// Physical address `pa` is visible at virtual address `offset + pa`.
    #[must_use]
    pub const fn new(offset: usize) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    fn address_of(&self, pa: PhysicalAddress) -> usize {
        self.offset + pa.as_u32() as usize
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = core::ptr::with_exposed_provenance_mut::<T>(self.address_of(pa));
        // SAFETY: the caller guarantees `pa` is mapped, valid for `T` and unaliased.
        unsafe { &mut *ptr }
    }

    unsafe fn phys_to_slice<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a [u8] {
        let ptr = core::ptr::with_exposed_provenance::<u8>(self.address_of(pa));
        // SAFETY: the caller guarantees the whole range is mapped and stable.
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }
}
