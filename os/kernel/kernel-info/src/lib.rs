//! # Kernel Configuration and Boot Interface
//!
//! Memory layout constants and the boot loader handoff used by the paging
//! subsystem.
//!
//! ## Memory Layout ([`memory`])
//!
//! The kernel address space identity-maps physical memory, except for the
//! very first page:
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │   Null guard page (unmapped)    │
//! 0x0000_1000 ├─────────────────────────────────┤ FIRST_IDENTITY_PAGE
//!             │  Identity-mapped physical RAM   │
//!             │  (kernel .text/.rodata are RO)  │
//! memory_end  ├─────────────────────────────────┤
//!             │   Free for process mappings     │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Boot Information ([`boot`])
//!
//! [`KernelBootInfo`](boot::KernelBootInfo) carries the end of usable RAM
//! and the location of the kernel's ELF section header table, from which
//! read-only sections are discovered.
//!
//! ```rust
//! use kernel_info::boot::{ElfSectionsInfo, KernelBootInfo};
//! use kernel_info::memory::{FIRST_IDENTITY_PAGE, PAGE_SIZE};
//!
//! let info = KernelBootInfo {
//!     memory_end: 0x0200_0000,
//!     elf_sections: ElfSectionsInfo::EMPTY,
//! };
//! let identity_pages = (info.memory_end - FIRST_IDENTITY_PAGE) / PAGE_SIZE;
//! assert_eq!(identity_pages, 8191);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
