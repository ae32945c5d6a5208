//! # Kernel Boot Information

/// Information the paging bootstrap needs from the boot loader.
///
/// Keep this `#[repr(C)]`; the loader fills it in before paging is enabled.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelBootInfo {
    /// First physical address past the end of usable RAM.
    ///
    /// Everything in `[FIRST_IDENTITY_PAGE, memory_end)` is identity-mapped
    /// into the kernel address space.
    pub memory_end: u32,

    /// Location of the kernel image's ELF section header table.
    pub elf_sections: ElfSectionsInfo,
}

/// Where the kernel's ELF section header table lives, as reported by the
/// boot loader (multiboot `elf_sec` tag layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElfSectionsInfo {
    /// Address of the first section header (identity mapped at boot).
    pub addr: u32,

    /// Number of section headers.
    pub num: u32,

    /// Size of one section header in bytes.
    pub entsize: u32,

    /// Index of the section holding section names.
    pub shndx: u32,
}

impl ElfSectionsInfo {
    /// A table with no sections; nothing gets write-protected.
    pub const EMPTY: Self = Self {
        addr: 0,
        num: 0,
        entsize: 0,
        shndx: 0,
    };

    /// Total size of the table in bytes, or `None` if it overflows.
    #[must_use]
    pub const fn table_len(&self) -> Option<u32> {
        self.num.checked_mul(self.entsize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_len_multiplies_entries() {
        let info = ElfSectionsInfo {
            addr: 0x0010_0000,
            num: 12,
            entsize: 40,
            shndx: 11,
        };
        assert_eq!(info.table_len(), Some(480));
        assert_eq!(ElfSectionsInfo::EMPTY.table_len(), Some(0));
    }

    #[test]
    fn table_len_reports_overflow() {
        let info = ElfSectionsInfo {
            num: u32::MAX,
            entsize: 40,
            ..ElfSectionsInfo::EMPTY
        };
        assert_eq!(info.table_len(), None);
    }
}
