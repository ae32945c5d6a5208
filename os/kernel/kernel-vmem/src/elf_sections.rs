//! # Kernel ELF Section Headers
//!
//! The boot loader hands over the kernel image's ELF32 section header table
//! (address, entry count, entry size, string table index). This module reads
//! it without allocating, so the bootstrap can find the sections that may be
//! write-protected.

use kernel_info::memory::{PAGE_SIZE, PROTECTED_SECTION_ALIGN};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Size of an `Elf32_Shdr`.
pub const ELF32_SECTION_HEADER_SIZE: usize = 40;

/// `SHF_WRITE`: the section is writable at run time.
pub const SHF_WRITE: u32 = 0x1;

/// `SHF_ALLOC`: the section occupies memory at run time.
pub const SHF_ALLOC: u32 = 0x2;

/// `SHF_EXECINSTR`: the section holds executable code.
pub const SHF_EXECINSTR: u32 = 0x4;

/// Errors while reading a section header table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SectionTableError {
    #[error("section header entry size {0} is smaller than an ELF32 header")]
    EntryTooSmall(u32),
    #[error("section header table holds {available} bytes, {needed} needed")]
    Truncated { needed: usize, available: usize },
    #[error("section header table size overflows")]
    TooLarge,
}

/// One `Elf32_Shdr`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: u32,
    pub kind: u32,
    pub flags: u32,
    pub addr: VirtualAddress,
    pub offset: u32,
    pub size: u32,
    pub link: u32,
    pub info: u32,
    pub addralign: u32,
    pub entsize: u32,
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

impl SectionHeader {
    /// Decode one header from the first 40 bytes of `b`.
    ///
    /// Returns `None` if `b` is too short.
    #[must_use]
    pub fn parse(b: &[u8]) -> Option<Self> {
        let b = b.get(..ELF32_SECTION_HEADER_SIZE)?;
        Some(Self {
            name: le32(&b[0..4]),
            kind: le32(&b[4..8]),
            flags: le32(&b[8..12]),
            addr: VirtualAddress::new(le32(&b[12..16])),
            offset: le32(&b[16..20]),
            size: le32(&b[20..24]),
            link: le32(&b[24..28]),
            info: le32(&b[28..32]),
            addralign: le32(&b[32..36]),
            entsize: le32(&b[36..40]),
        })
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.flags & SHF_WRITE != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.flags & SHF_EXECINSTR != 0
    }

    /// Read-only and aligned to a page: mapped read-only during bootstrap.
    #[inline]
    #[must_use]
    pub const fn is_write_protectable(&self) -> bool {
        !self.is_writable() && self.addralign == PROTECTED_SECTION_ALIGN
    }

    /// First page of the section, as identity-mapped physical memory.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.addr.as_u32())
    }

    /// Number of 4 KiB pages the section occupies (rounded up).
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.size.div_ceil(PAGE_SIZE)
    }
}

/// A borrowed, validated section header table.
#[derive(Copy, Clone, Debug)]
pub struct SectionTable<'a> {
    bytes: &'a [u8],
    count: usize,
    entsize: usize,
}

impl<'a> SectionTable<'a> {
    /// Validate `count` entries of `entsize` bytes each in `bytes`.
    ///
    /// # Errors
    /// - [`SectionTableError::EntryTooSmall`] if `entsize < 40` while entries exist.
    /// - [`SectionTableError::TooLarge`] if `count * entsize` overflows.
    /// - [`SectionTableError::Truncated`] if `bytes` is shorter than the table.
    pub fn new(bytes: &'a [u8], count: u32, entsize: u32) -> Result<Self, SectionTableError> {
        if count == 0 {
            return Ok(Self::empty());
        }
        if (entsize as usize) < ELF32_SECTION_HEADER_SIZE {
            return Err(SectionTableError::EntryTooSmall(entsize));
        }

        let count = count as usize;
        let entsize = entsize as usize;
        let needed = count.checked_mul(entsize).ok_or(SectionTableError::TooLarge)?;
        if needed > bytes.len() {
            return Err(SectionTableError::Truncated {
                needed,
                available: bytes.len(),
            });
        }

        Ok(Self {
            bytes,
            count,
            entsize,
        })
    }

    /// A table without sections.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            bytes: &[],
            count: 0,
            entsize: ELF32_SECTION_HEADER_SIZE,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<SectionHeader> {
        if i >= self.count {
            return None;
        }
        let start = i * self.entsize;
        SectionHeader::parse(self.bytes.get(start..start + self.entsize)?)
    }

    /// Every section header, in table order.
    pub fn sections(&self) -> impl Iterator<Item = SectionHeader> + '_ {
        let table = *self;
        (0..table.count).filter_map(move |i| table.get(i))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::vec::Vec;

    /// Encode a section header the way a linker would.
    pub(crate) fn header_bytes(kind: u32, flags: u32, addr: u32, size: u32, align: u32) -> [u8; 40] {
        let mut b = [0_u8; 40];
        let fields = [1, kind, flags, addr, 0x1000, size, 0, 0, align, 0];
        for (chunk, value) in b.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        b
    }

    #[test]
    fn parses_fields() {
        let raw = header_bytes(1, SHF_ALLOC | SHF_EXECINSTR, 0x0010_0000, 0x2345, 4096);
        let h = SectionHeader::parse(&raw).unwrap();
        assert_eq!(h.addr, VirtualAddress::new(0x0010_0000));
        assert_eq!(h.size, 0x2345);
        assert!(h.is_executable());
        assert!(!h.is_writable());
        assert!(h.is_write_protectable());
        assert_eq!(h.page_count(), 3);
        assert!(SectionHeader::parse(&raw[..39]).is_none());
    }

    #[test]
    fn protection_needs_page_alignment_and_no_write() {
        let data = SectionHeader::parse(&header_bytes(1, SHF_ALLOC | SHF_WRITE, 0x1000, 16, 4096)).unwrap();
        assert!(!data.is_write_protectable());
        let rodata = SectionHeader::parse(&header_bytes(1, SHF_ALLOC, 0x1000, 16, 32)).unwrap();
        assert!(!rodata.is_write_protectable());
    }

    #[test]
    fn walks_entries_with_larger_stride() {
        let mut bytes = Vec::new();
        for addr in [0x1000, 0x2000, 0x3000] {
            bytes.extend_from_slice(&header_bytes(1, 0, addr, 1, 4096));
            bytes.extend_from_slice(&[0xEE; 8]);
        }

        let table = SectionTable::new(&bytes, 3, 48).unwrap();
        let addrs: Vec<u32> = table.sections().map(|h| h.addr.as_u32()).collect();
        assert_eq!(addrs, [0x1000, 0x2000, 0x3000]);
        assert!(table.get(3).is_none());
    }

    #[test]
    fn rejects_malformed_tables() {
        let bytes = [0_u8; 80];
        assert_eq!(
            SectionTable::new(&bytes, 2, 32).err(),
            Some(SectionTableError::EntryTooSmall(32))
        );
        assert_eq!(
            SectionTable::new(&bytes, 3, 40).err(),
            Some(SectionTableError::Truncated {
                needed: 120,
                available: 80
            })
        );
        assert!(SectionTable::new(&[], 0, 0).unwrap().is_empty());
    }
}
