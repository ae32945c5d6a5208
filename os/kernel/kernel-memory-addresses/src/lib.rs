//! # Virtual and Physical Memory Address Types (32-bit x86)
//!
//! Strongly typed wrappers for raw 32-bit addresses and page bases used by the
//! two-level x86 paging code.
//!
//! ## Overview
//!
//! Virtual and physical addresses are both plain `u32` values on non-PAE x86,
//! which makes them trivially easy to mix up. The types in this crate keep them
//! apart at compile time while remaining zero-cost.
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are wrapped to distinguish the two address kinds:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory frames. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`]: the 4 KiB page, the only leaf size that is mapped.
//! - [`Size4M`]: the 4 MiB span covered by a single page-directory slot.
//!   It is used to reason about directory *regions*; 4 MiB leaf pages are not
//!   supported.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_1234);
//!
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xC010_1000);
//! assert_eq!(off.as_u32(), 0x234);
//! assert_eq!(page.join(off), va);
//!
//! // The directory region that contains the address.
//! assert_eq!(va.page::<Size4M>().base().as_u32(), 0xC000_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;
