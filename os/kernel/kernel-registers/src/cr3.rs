use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3 — Page-Directory Base Register (32-bit paging, no PAE).
///
/// Holds the physical base address of the page directory and cache-control
/// flags for directory accesses. Writing CR3 flushes all non-global TLB
/// entries.
#[bitfield(u32)]
pub struct Cr3 {
    /// Bits 0–2 — Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3 — PWT: Page-level Write-Through for the page directory.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for the page directory.
    pub pcd: bool,

    /// Bits 5–11 — Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–31 — page directory physical base >> 12.
    #[bits(20)]
    directory_base_4k: u32,
}

impl Cr3 {
    /// Create a `Cr3` value pointing at the page directory in `directory`.
    #[must_use]
    pub fn from_page_directory(directory: PhysicalPage<Size4K>) -> Self {
        Self::new().with_directory_base_4k(directory.base().as_u32() >> 12)
    }

    /// The frame holding the active page directory.
    #[must_use]
    pub fn page_directory(&self) -> PhysicalPage<Size4K> {
        PhysicalAddress::new(self.directory_base_4k() << 12).page()
    }
}

#[cfg(all(feature = "asm", not(any(test, feature = "software-emulation"))))]
impl LoadRegisterUnsafe for Cr3 {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn load_unsafe() -> Self {
        let mut cr3: usize;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3 as u32)
    }
}

#[cfg(all(feature = "asm", not(any(test, feature = "software-emulation"))))]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits() as usize;
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(crate::emulation::load_cr3())
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        crate::emulation::store_cr3(self.into_bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_base_roundtrip() {
        let pd = PhysicalAddress::new(0x0012_3000).page::<Size4K>();
        let cr3 = Cr3::from_page_directory(pd).with_pcd(true);
        assert_eq!(cr3.into_bits(), 0x0012_3010);
        assert_eq!(cr3.page_directory(), pd);
    }

    #[test]
    fn every_store_counts_as_a_flush() {
        let pd = PhysicalAddress::new(0x0000_8000).page::<Size4K>();
        let before = crate::emulation::cr3_writes();
        unsafe {
            Cr3::from_page_directory(pd).store_unsafe();
            Cr3::load_unsafe().store_unsafe();
            assert_eq!(Cr3::load_unsafe().page_directory(), pd);
        }
        assert_eq!(crate::emulation::cr3_writes(), before + 2);
    }
}
