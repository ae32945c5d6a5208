use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// A single 32-bit x86 paging entry in its raw bitfield form.
///
/// Directory entries (PDEs) and table entries (PTEs) share this layout on
/// non-PAE x86, so the same type serves as the storage of both and as the
/// *flags* argument of the mapping operations.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P`             | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | Page size in a PDE (always 0 here), PAT in a PTE |
/// | 8      | `G`             | Global (PTE only) |
/// | 9      | owned           | Software: the directory slot owns its table |
/// | 10–11  | OS avail        | Ignored by hardware |
/// | 12–31  | `frame`         | Physical frame bits [31:12] |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::PhysicalAddress;
/// let e = PageEntryBits::new_user_rw()
///     .with_physical_address(PhysicalAddress::new(0x0040_3000));
/// assert!(e.present() && e.writable() && e.user_access());
/// assert_eq!(e.into_bits(), 0x0040_3007);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Set if the entry points to a valid page table (PDE) or a valid page
    /// (PTE). Clear implies a not-present entry; every other bit is then free
    /// for software.
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Effective permission is the AND of the PDE and PTE bits. Supervisor
    /// writes ignore it while CR0.WP is clear.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Effective permission is the AND of the PDE and PTE bits.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on the first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7) in a PDE, Page Attribute Table (PAT) in a PTE.
    ///
    /// 4 MiB pages are not used, so this is always clear in directory entries.
    pub large_page: bool,

    /// Global (G, bit 8). Keeps the TLB entry across CR3 reloads when CR4.PGE is set.
    pub global_translation: bool,

    /// Ownership marker (bit 9, ignored by hardware).
    ///
    /// In a directory entry: set if the referenced page table belongs to this
    /// address space and must be freed with it; clear if it is borrowed from
    /// the kernel address space.
    pub owned: bool,

    /// OS-available (bits 10..=11).
    #[bits(2)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    /// Physical base address stored in the entry (low 12 bits zero).
    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::from_addr(self.physical_address())
    }

    /// The flag bits only (bits 0..=11); the frame is cleared.
    #[inline]
    #[must_use]
    pub const fn flags_only(self) -> Self {
        self.with_frame(0)
    }

    /// Present, writable, supervisor-only.
    #[inline]
    #[must_use]
    pub const fn new_kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, read-only, supervisor-only.
    #[inline]
    #[must_use]
    pub const fn new_kernel_ro() -> Self {
        Self::new().with_present(true)
    }

    /// Present, writable, user-accessible.
    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// Present, read-only, user-accessible.
    #[inline]
    #[must_use]
    pub const fn new_user_ro() -> Self {
        Self::new().with_present(true).with_user_access(true)
    }
}
