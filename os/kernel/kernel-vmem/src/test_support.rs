//! In-memory "physical RAM" and a checking frame allocator for unit tests.

use crate::{FrameAlloc, PhysMapper};
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use std::collections::BTreeSet;
use std::vec::Vec;

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// Physical memory simulated as a vector of frames; physical addresses are
/// byte offsets into it.
pub struct TestPhys {
    frames: Vec<UnsafeCell<Frame>>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        let frames = (0..n).map(|_| UnsafeCell::new(Frame([0; 4096]))).collect();
        Self { frames }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn ptr_at(&self, pa: PhysicalAddress, len: usize) -> *mut u8 {
        let off = pa.as_u32() as usize;
        assert!(
            off + len <= self.frames.len() * 4096,
            "{pa:?} (+{len} bytes) is outside the test RAM"
        );
        // SAFETY: in bounds; the frames are `UnsafeCell`s and contiguous.
        unsafe { self.frames.as_ptr().cast::<u8>().cast_mut().add(off) }
    }

    /// Copy `bytes` into physical memory at `pa`.
    pub fn write_bytes(&self, pa: PhysicalAddress, bytes: &[u8]) {
        let dst = self.ptr_at(pa, bytes.len());
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len()) };
    }

    /// Fill the frame at `page` with `byte`.
    pub fn fill(&self, page: PhysicalPage<Size4K>, byte: u8) {
        let dst = self.ptr_at(page.base(), 4096);
        unsafe { core::ptr::write_bytes(dst, byte, 4096) };
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.ptr_at(pa, size_of::<T>()).cast::<T>();
        debug_assert!(ptr.is_aligned());
        unsafe { &mut *ptr }
    }

    unsafe fn phys_to_slice<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a [u8] {
        let ptr = self.ptr_at(pa, len);
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }
}

/// Frame allocator over a [`TestPhys`] that tracks every outstanding frame.
///
/// Panics on double frees and on frames it never handed out. Frame 0 is only
/// handed out by [`TrackingAlloc::including_frame_zero`].
pub struct TrackingAlloc {
    next: u32,
    end: u32,
    recycled: Vec<PhysicalPage<Size4K>>,
    outstanding: BTreeSet<u32>,
    budget: Option<usize>,
    total_allocations: usize,
}

impl TrackingAlloc {
    pub fn new(phys: &TestPhys) -> Self {
        Self::starting_at(phys, 1)
    }

    /// An allocator whose first frame is physical frame 0.
    pub fn including_frame_zero(phys: &TestPhys) -> Self {
        Self::starting_at(phys, 0)
    }

    fn starting_at(phys: &TestPhys, first: u32) -> Self {
        let end = u32::try_from(phys.frame_count()).expect("test RAM too large");
        Self {
            next: first,
            end,
            recycled: Vec::new(),
            outstanding: BTreeSet::new(),
            budget: None,
            total_allocations: 0,
        }
    }

    /// Let only `n` more allocations succeed.
    pub fn fail_after(&mut self, n: usize) {
        self.budget = Some(n);
    }

    /// Lift the allocation limit.
    pub fn unlimited(&mut self) {
        self.budget = None;
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    pub fn is_outstanding(&self, page: PhysicalPage<Size4K>) -> bool {
        self.outstanding.contains(&page.base().as_u32())
    }
}

impl FrameAlloc for TrackingAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }

        let page = if let Some(page) = self.recycled.pop() {
            page
        } else {
            if self.next >= self.end {
                return None;
            }
            let page = PhysicalAddress::new(self.next << 12).page();
            self.next += 1;
            page
        };

        assert!(self.outstanding.insert(page.base().as_u32()));
        self.total_allocations += 1;
        Some(page)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        assert!(
            self.outstanding.remove(&page.base().as_u32()),
            "double free or foreign frame: {page:?}"
        );
        self.recycled.push(page);
    }
}
