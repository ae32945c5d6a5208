//! # Memory Layout

/// Size of a page and of a physical frame, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// Number of slots in a page directory and in a page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by one page-directory slot (one full page table).
pub const DIRECTORY_REGION_SIZE: u32 = PAGE_SIZE * 1024;

/// The page that stays unmapped in the kernel address space so that null
/// pointer dereferences fault.
pub const NULL_GUARD_PAGE: u32 = 0;

/// First address of the kernel's identity mapping of physical memory.
pub const FIRST_IDENTITY_PAGE: u32 = NULL_GUARD_PAGE + PAGE_SIZE;

/// Required `sh_addralign` of an ELF section for it to be write-protected.
pub const PROTECTED_SECTION_ALIGN: u32 = PAGE_SIZE;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(ENTRIES_PER_TABLE * 4 == PAGE_SIZE as usize);
    assert!(DIRECTORY_REGION_SIZE == 0x0040_0000);
    assert!(NULL_GUARD_PAGE.is_multiple_of(PAGE_SIZE));
    assert!(FIRST_IDENTITY_PAGE > NULL_GUARD_PAGE);
};
