use crate::elf_sections::SectionTableError;

/// Errors reported by address-space construction and the mapping operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmemError {
    /// The frame allocator had no frame left for a directory or page table.
    #[error("out of memory: no frame for a page directory or page table")]
    OutOfMemory,

    /// A page range runs past the end of the 32-bit address space.
    #[error("page range runs past the end of the address space")]
    RangeOverflow,

    /// The kernel's ELF section table handed over by the boot loader is malformed.
    #[error("invalid ELF section table: {0}")]
    SectionTable(#[from] SectionTableError),
}
