//! # Page Directory (PD)
//!
//! The root paging level, referenced by CR3.
//!
//! - [`DirectoryIndex`]: index type for virtual-address bits `[31:22]`.
//! - [`PdEntry`]: a PD entry pointing to a Page Table.
//! - [`DirectoryEntryKind`]: decoded view of a present entry (owned vs shared table).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PD entries.
//!
//! ## Ownership
//!
//! Every present entry records whether this address space *owns* the page
//! table it points to, in the software-defined [`owned`](PageEntryBits::owned)
//! bit. Owned tables are freed together with the directory; shared tables are
//! borrowed from the kernel address space and are never freed through it.
//!
//! 4 MiB pages (`PS=1`) are never created.

use crate::PageEntryBits;
use kernel_info::memory::ENTRIES_PER_TABLE;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirectoryIndex(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PdEntry(PageEntryBits);

/// Decoded PDE.
///
/// - [`Owned`](DirectoryEntryKind::Owned): the table belongs to this address space.
/// - [`Shared`](DirectoryEntryKind::Shared): the table belongs to the kernel address space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirectoryEntryKind {
    Owned(PhysicalPage<Size4K>, PageEntryBits),
    Shared(PhysicalPage<Size4K>, PageEntryBits),
}

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES_PER_TABLE],
}

impl DirectoryIndex {
    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new((va.as_u32() >> 22) as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 1024);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Iterate over all 1024 directory indices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRIES_PER_TABLE as u16).map(Self::new)
    }
}

impl DirectoryEntryKind {
    /// The referenced page table, regardless of ownership.
    #[inline]
    #[must_use]
    pub const fn table(self) -> PhysicalPage<Size4K> {
        match self {
            Self::Owned(page, _) | Self::Shared(page, _) => page,
        }
    }

    /// The entry bits, regardless of ownership.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        match self {
            Self::Owned(_, bits) | Self::Shared(_, bits) => bits,
        }
    }
}

impl PdEntry {
    /// A zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    /// A present entry for a table this address space owns.
    ///
    /// Only the `writable` and `user_access` bits of `access` are taken over.
    #[inline]
    #[must_use]
    pub const fn owned_table(table: PhysicalPage<Size4K>, access: PageEntryBits) -> Self {
        Self(
            PageEntryBits::new()
                .with_present(true)
                .with_writable(access.writable())
                .with_user_access(access.user_access())
                .with_owned(true)
                .with_physical_address(table.base()),
        )
    }

    /// The same entry, marked as borrowed from another address space.
    #[inline]
    #[must_use]
    pub const fn into_shared(self) -> Self {
        Self(self.0.with_owned(false))
    }

    /// The same entry pointing at `table` and marked as owned.
    #[inline]
    #[must_use]
    pub const fn with_owned_table(self, table: PhysicalPage<Size4K>) -> Self {
        Self(self.0.with_owned(true).with_physical_address(table.base()))
    }

    /// The same entry with the `writable`/`user_access` bits of `access` added.
    #[inline]
    #[must_use]
    pub const fn merge_access(self, access: PageEntryBits) -> Self {
        Self(
            self.0
                .with_writable(self.0.writable() || access.writable())
                .with_user_access(self.0.user_access() || access.user_access()),
        )
    }

    /// Decode the entry, or `None` if not present.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<DirectoryEntryKind> {
        if !self.is_present() {
            return None;
        }

        let table = self.0.physical_page();
        Some(if self.0.owned() {
            DirectoryEntryKind::Owned(table, self.0)
        } else {
            DirectoryEntryKind::Shared(table, self.0)
        })
    }
}

impl PageDirectory {
    /// A fully zeroed Page Directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES_PER_TABLE],
        }
    }

    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    /// Plain load; does not imply any TLB synchronization.
    #[inline]
    #[must_use]
    pub const fn get(&self, i: DirectoryIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: DirectoryIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Set the entry at `i` to [`PdEntry::zero`].
    #[inline]
    pub const fn set_zero(&mut self, i: DirectoryIndex) {
        self.set(i, PdEntry::zero());
    }
}
