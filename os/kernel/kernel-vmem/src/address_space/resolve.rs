//! Side-effect free lookups, safe to call from the page-fault handler.

use crate::page_table::pd::DirectoryIndex;
use crate::page_table::pt::{PtEntry, TableIndex};
use crate::{AddressSpace, PageEntryBits, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// The present page table entry for `va`, if any.
    ///
    /// Every other query is answered from this walk.
    #[must_use]
    pub fn resolve(&self, va: VirtualAddress) -> Option<PtEntry> {
        let root = self.root?;
        let kind = self.directory(root).get(DirectoryIndex::from(va)).kind()?;
        let entry = self.table(kind.table()).get(TableIndex::from(va));
        entry.is_present().then_some(entry)
    }

    #[inline]
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.resolve(va).is_some()
    }

    /// Whether every page overlapping `[ptr, ptr + size)` is mapped.
    ///
    /// An empty range is always contained, except in a detached space. A
    /// range that wraps past `0xFFFF_FFFF` never is.
    ///
    /// # Detached spaces
    /// A detached space contains nothing, not even an empty range: `size == 0`
    /// yields `false` there instead of the vacuous `true`, so callers checking
    /// a user buffer reject a process without a directory outright.
    ///
    /// ```
    /// # use kernel_vmem::AddressSpace;
    /// # use kernel_memory_addresses::VirtualAddress;
    /// # struct NoRam;
    /// # impl kernel_vmem::PhysMapper for NoRam {
    /// #     unsafe fn phys_to_mut<'a, T>(&self, _: kernel_memory_addresses::PhysicalAddress) -> &'a mut T { unreachable!() }
    /// # }
    /// let space = AddressSpace::detached(&NoRam);
    /// assert!(!space.contains(VirtualAddress::new(0x1000), 0));
    /// ```
    #[must_use]
    pub fn contains(&self, ptr: VirtualAddress, size: u32) -> bool {
        if self.is_detached() {
            return false;
        }
        if size == 0 {
            return true;
        }
        let Some(last) = ptr.checked_add(size - 1) else {
            return false;
        };

        let last = last.page::<Size4K>();
        let mut page = ptr.page::<Size4K>();
        loop {
            if !self.is_mapped(page.base()) {
                return false;
            }
            if page == last {
                return true;
            }
            match page.checked_add(1) {
                Some(next) => page = next,
                None => return true,
            }
        }
    }

    /// The physical address `va` translates to.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let (frame, _) = self.resolve(va)?.page_4k()?;
        Some(frame.join(va.offset::<Size4K>()))
    }

    /// The flags of the mapping of `va` (frame bits cleared), or
    /// [`PageEntryBits::new`] (not present) if unmapped.
    #[must_use]
    pub fn get_entry(&self, va: VirtualAddress) -> PageEntryBits {
        self.resolve(va)
            .map_or_else(PageEntryBits::new, |e| e.bits().flags_only())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{TestPhys, TrackingAlloc};
    use crate::{AddressSpace, PageEntryBits};
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn resolve_needs_directory_and_table_slot() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);
        let mut space = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        assert!(space.resolve(va(0x0040_0000)).is_none());

        space
            .map(&mut alloc, PhysicalAddress::new(0x9000), va(0x0040_0000), PageEntryBits::new_kernel_rw())
            .unwrap();
        let entry = space.resolve(va(0x0040_0ABC)).unwrap();
        assert_eq!(entry.bits().physical_address(), PhysicalAddress::new(0x9000));

        // Same table, different slot.
        assert!(space.resolve(va(0x0040_1000)).is_none());
        assert_eq!(space.translate(va(0x0040_1000)), None);
        assert_eq!(space.get_entry(va(0x0040_1000)), PageEntryBits::new());
        space.destroy(&mut alloc);
    }

    #[test]
    fn contains_checks_every_overlapping_page() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);
        let mut space = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        space
            .identity_range(&mut alloc, PhysicalAddress::new(0x0010_0000), 2, PageEntryBits::new_user_rw())
            .unwrap();

        assert!(space.contains(va(0x0010_0000), 0x2000));
        assert!(space.contains(va(0x0010_1FFF), 1));
        assert!(!space.contains(va(0x0010_1FFF), 2), "spills into the next page");
        assert!(!space.contains(va(0x000F_FFFF), 2), "starts in the page before");
        assert!(space.contains(va(0x0050_0000), 0), "empty ranges are vacuously mapped");
        space.destroy(&mut alloc);
    }

    #[test]
    fn contains_rejects_wrapping_ranges() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);
        let mut space = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        space
            .identity_range(&mut alloc, PhysicalAddress::new(0xFFFF_E000), 2, PageEntryBits::new_kernel_rw())
            .unwrap();

        assert!(space.contains(va(0xFFFF_E000), 0x2000));
        assert!(!space.contains(va(0xFFFF_F000), 0x1001));
        space.destroy(&mut alloc);
    }
}
