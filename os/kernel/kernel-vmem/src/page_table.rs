//! # Paging Structures
//!
//! The two levels of 32-bit x86 paging: the [`PageDirectory`](pd::PageDirectory)
//! referenced by CR3, and the [`PageTable`](pt::PageTable)s it points to.

pub mod pd;
pub mod pt;

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::TableIndex;
use kernel_memory_addresses::VirtualAddress;

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (DirectoryIndex, TableIndex) {
    (DirectoryIndex::from(va), TableIndex::from(va))
}
