//! # Kernel Memory Allocation
//!
//! The pieces the paging code in `kernel-vmem` needs from its surroundings:
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            kernel-vmem AddressSpace           │
//! └──────────────┬─────────────────────┬──────────┘
//!                │ FrameAlloc          │ PhysMapper
//! ┌──────────────▼──────────┐ ┌────────▼──────────┐
//! │ SharedFrameAlloc        │ │ OffsetPhysMapper  │
//! │  (IRQ-safe spin lock)   │ │  (identity/offset)│
//! │ BitmapFrameAlloc        │ └───────────────────┘
//! │  (1 bit per 4 KiB frame)│
//! └─────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, SharedFrameAlloc};
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::FrameAlloc;
//!
//! let bitmap = BitmapFrameAlloc::<16>::new(PhysicalAddress::new(0x0010_0000).page(), 1024).unwrap();
//! let shared = SharedFrameAlloc::new(bitmap);
//!
//! let mut alloc = &shared;
//! let frame = alloc.alloc_4k().unwrap();
//! alloc.free_4k(frame);
//! assert_eq!(shared.with(|a| a.used_frames()), 0);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod frame_alloc;
pub mod phys_mapper;
