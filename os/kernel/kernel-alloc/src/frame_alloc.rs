//! # Physical Frame Allocation
//!
//! [`BitmapFrameAlloc`] tracks a fixed region of 4 KiB frames with one bit per
//! frame and needs no heap, so it works before anything else does.
//! [`SharedFrameAlloc`] puts any allocator behind an interrupt-masking spin
//! lock so the kernel and its interrupt handlers can share it.

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_sync::SpinMutex;
use kernel_vmem::FrameAlloc;
use log::{trace, warn};

const WORD_BITS: usize = u64::BITS as usize;

/// Errors when setting up a [`BitmapFrameAlloc`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("{requested} frames requested, the bitmap tracks at most {capacity}")]
    TooManyFrames { requested: usize, capacity: usize },
    #[error("frame region runs past the end of physical memory")]
    RegionOverflow,
}

/// Bitmap allocator over `[base, base + frames * 4 KiB)`.
///
/// `WORDS` sets the capacity: `WORDS * 64` frames. The search for a free frame
/// starts after the most recent allocation, so freed frames are not handed out
/// again right away.
pub struct BitmapFrameAlloc<const WORDS: usize> {
    base: PhysicalPage<Size4K>,
    frames: usize,
    bitmap: [u64; WORDS],
    next: usize,
    used: usize,
}

impl<const WORDS: usize> BitmapFrameAlloc<WORDS> {
    /// Maximum number of frames this allocator can track.
    pub const CAPACITY: usize = WORDS * WORD_BITS;

    /// Manage `frames` frames starting at `base`, all initially free.
    ///
    /// # Errors
    /// - [`FrameAllocError::TooManyFrames`] if `frames` exceeds [`Self::CAPACITY`].
    /// - [`FrameAllocError::RegionOverflow`] if the region wraps past 4 GiB.
    pub fn new(base: PhysicalPage<Size4K>, frames: usize) -> Result<Self, FrameAllocError> {
        if frames > Self::CAPACITY {
            return Err(FrameAllocError::TooManyFrames {
                requested: frames,
                capacity: Self::CAPACITY,
            });
        }
        if frames > 0 {
            let last = u32::try_from(frames - 1).map_err(|_| FrameAllocError::RegionOverflow)?;
            base.checked_add(last).ok_or(FrameAllocError::RegionOverflow)?;
        }

        Ok(Self {
            base,
            frames,
            bitmap: [0; WORDS],
            next: 0,
            used: 0,
        })
    }

    /// Mark `page` as in use, e.g. because the kernel image lives there.
    ///
    /// Returns `false` if the frame is outside the region or already taken.
    pub fn reserve(&mut self, page: PhysicalPage<Size4K>) -> bool {
        let Some(index) = self.index_of(page) else {
            return false;
        };
        if self.is_set(index) {
            return false;
        }
        self.set(index, true);
        true
    }

    /// Reserve every frame overlapping `[start, end)`.
    pub fn reserve_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        let mut page = start.page::<Size4K>();
        while page.base() < end {
            self.reserve(page);
            match page.checked_add(1) {
                Some(next) => page = next,
                None => break,
            }
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub const fn used_frames(&self) -> usize {
        self.used
    }

    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.frames - self.used
    }

    /// Whether `page` is currently allocated or reserved.
    #[must_use]
    pub fn is_allocated(&self, page: PhysicalPage<Size4K>) -> bool {
        self.index_of(page).is_some_and(|i| self.is_set(i))
    }

    fn index_of(&self, page: PhysicalPage<Size4K>) -> Option<usize> {
        let offset = page.base().as_u32().checked_sub(self.base.base().as_u32())?;
        let index = (offset >> 12) as usize;
        (index < self.frames).then_some(index)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn page_at(&self, index: usize) -> Option<PhysicalPage<Size4K>> {
        self.base.checked_add(index as u32)
    }

    const fn is_set(&self, index: usize) -> bool {
        self.bitmap[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    const fn set(&mut self, index: usize, used: bool) {
        let mask = 1 << (index % WORD_BITS);
        if used {
            self.bitmap[index / WORD_BITS] |= mask;
            self.used += 1;
        } else {
            self.bitmap[index / WORD_BITS] &= !mask;
            self.used -= 1;
        }
    }
}

impl<const WORDS: usize> FrameAlloc for BitmapFrameAlloc<WORDS> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        for _ in 0..self.frames {
            let index = self.next % self.frames;
            self.next = (index + 1) % self.frames;
            if !self.is_set(index) {
                self.set(index, true);
                let page = self.page_at(index)?;
                trace!("allocated frame {page}");
                return Some(page);
            }
        }
        None
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        match self.index_of(page) {
            Some(index) if self.is_set(index) => {
                self.set(index, false);
                trace!("freed frame {page}");
            }
            Some(_) => warn!("double free of frame {page}"),
            None => warn!("freeing frame {page} outside the managed region"),
        }
    }
}

/// An allocator shared between ordinary kernel code and interrupt handlers.
///
/// Every access runs with interrupts masked and the lock held. Pass
/// `&mut &shared` wherever a [`FrameAlloc`] is expected.
pub struct SharedFrameAlloc<A> {
    inner: SpinMutex<A>,
}

impl<A> SharedFrameAlloc<A> {
    pub const fn new(alloc: A) -> Self {
        Self {
            inner: SpinMutex::new(alloc),
        }
    }

    /// Run `f` on the allocator with interrupts masked.
    pub fn with<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        let mut guard = self.inner.lock_irq();
        f(&mut guard)
    }

    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}

impl<A: FrameAlloc> FrameAlloc for &SharedFrameAlloc<A> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.with(A::alloc_4k)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        self.with(|a| a.free_4k(page));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_sync::irq::interrupts_enabled;

    fn page(addr: u32) -> PhysicalPage<Size4K> {
        PhysicalAddress::new(addr).page()
    }

    #[test]
    fn hands_out_every_frame_once() {
        let mut alloc = BitmapFrameAlloc::<1>::new(page(0x0010_0000), 4).unwrap();
        let mut got = [None; 5];
        for slot in &mut got {
            *slot = alloc.alloc_4k();
        }
        assert_eq!(got[0], Some(page(0x0010_0000)));
        assert_eq!(got[3], Some(page(0x0010_3000)));
        assert_eq!(got[4], None);
        assert_eq!(alloc.free_frames(), 0);
    }

    #[test]
    fn freed_frames_come_back_after_a_full_rotation() {
        let mut alloc = BitmapFrameAlloc::<1>::new(page(0x1000), 3).unwrap();
        let a = alloc.alloc_4k().unwrap();
        let b = alloc.alloc_4k().unwrap();
        alloc.free_4k(a);
        assert_eq!(alloc.alloc_4k(), Some(page(0x3000)));
        assert_eq!(alloc.alloc_4k(), Some(a));
        assert!(alloc.is_allocated(b));
        assert_eq!(alloc.alloc_4k(), None);
    }

    #[test]
    fn bad_frees_are_ignored() {
        let mut alloc = BitmapFrameAlloc::<1>::new(page(0x1000), 2).unwrap();
        let a = alloc.alloc_4k().unwrap();
        alloc.free_4k(a);
        alloc.free_4k(a);
        alloc.free_4k(page(0x9000));
        alloc.free_4k(page(0));
        assert_eq!(alloc.used_frames(), 0);
    }

    #[test]
    fn reservations_are_never_allocated() {
        let mut alloc = BitmapFrameAlloc::<2>::new(page(0), 70).unwrap();
        alloc.reserve_range(PhysicalAddress::new(0), PhysicalAddress::new(0x0004_1001));
        assert_eq!(alloc.used_frames(), 66);
        assert!(!alloc.reserve(page(0x1000)), "already reserved");
        assert_eq!(alloc.alloc_4k(), Some(page(0x0004_2000)));
    }

    #[test]
    fn rejects_oversized_regions() {
        assert_eq!(
            BitmapFrameAlloc::<1>::new(page(0), 65).err(),
            Some(FrameAllocError::TooManyFrames {
                requested: 65,
                capacity: 64
            })
        );
        assert_eq!(
            BitmapFrameAlloc::<1>::new(page(0xFFFF_F000), 2).err(),
            Some(FrameAllocError::RegionOverflow)
        );
    }

    #[test]
    fn shared_allocator_masks_interrupts() {
        let shared = SharedFrameAlloc::new(BitmapFrameAlloc::<1>::new(page(0x1000), 2).unwrap());
        let inside = shared.with(|_| interrupts_enabled());
        assert!(!inside);
        assert!(interrupts_enabled());

        let mut handle = &shared;
        let frame = handle.alloc_4k().unwrap();
        handle.free_4k(frame);
        assert_eq!(shared.into_inner().used_frames(), 0);
    }
}
