//! # Address Space (32-bit x86, PD-rooted)
//!
//! A handle to one page directory and the page tables hanging off it.
//!
//! ## Highlights
//!
//! - [`AddressSpace::create_blank`] / [`AddressSpace::create_from_kernel`] to
//!   build a new directory.
//! - [`AddressSpace::try_clone`] for fork-style copies: owned and user tables
//!   are deep-copied, shared kernel tables are aliased.
//! - [`AddressSpace::destroy`] to hand every owned frame back.
//! - [`AddressSpace::activate`] / [`AddressSpace::with_active`] to load CR3.
//! - Mapping and query operations live in the `mapping` and `resolve`
//!   submodules.
//!
//! ## Detached spaces
//!
//! [`AddressSpace::detached`] yields a handle without a directory. It stands
//! in for an uninitialized address space: mutations are no-ops and queries
//! report nothing mapped.
//!
//! ## Safety
//!
//! The provided [`PhysMapper`] must yield **writable** references to every
//! directory and table frame the space uses.

mod mapping;
mod resolve;

use crate::page_table::pd::{DirectoryEntryKind, DirectoryIndex, PageDirectory};
use crate::page_table::pt::PageTable;
use crate::{FrameAlloc, PhysMapper, VmemError, tlb};
use kernel_info::memory::NULL_GUARD_PAGE;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};
use kernel_sync::IrqGuard;
use log::{debug, warn};

/// The page-directory frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

/// Handle to a single, concrete address space.
///
/// The handle exclusively owns its directory and every table marked
/// [`Owned`](DirectoryEntryKind::Owned). It is not `Clone`; use
/// [`try_clone`](Self::try_clone) to duplicate the mappings and
/// [`destroy`](Self::destroy) to release the frames.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: Option<RootPage>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// A handle without a page directory.
    #[inline]
    #[must_use]
    pub const fn detached(mapper: &'m M) -> Self {
        Self { root: None, mapper }
    }

    /// Wrap an existing, initialized page directory.
    ///
    /// # Safety
    /// `root` must hold a valid page directory whose owned tables are not
    /// owned by any other handle.
    #[inline]
    pub const unsafe fn from_root(mapper: &'m M, root: RootPage) -> Self {
        Self {
            root: Some(root),
            mapper,
        }
    }

    /// Allocate an empty address space: one zeroed page directory.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is available.
    pub fn create_blank<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, VmemError> {
        let _irq = IrqGuard::new();
        let root = take_frame(alloc)?;
        let space = Self {
            root: Some(root),
            mapper,
        };
        space.directory_mut(root).zero();
        debug!("created page directory {root}");
        Ok(space)
    }

    /// Allocate a new address space that starts with every kernel mapping.
    ///
    /// All present slots of `kernel` are copied and marked
    /// [`Shared`](DirectoryEntryKind::Shared): the kernel's tables are used by
    /// reference and will never be freed through the new space.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is available.
    pub fn create_from_kernel<A: FrameAlloc>(
        kernel: &Self,
        alloc: &mut A,
    ) -> Result<Self, VmemError> {
        let _irq = IrqGuard::new();
        let space = Self::create_blank(kernel.mapper, alloc)?;
        let (Some(kernel_root), Some(root)) = (kernel.root, space.root) else {
            return Ok(space);
        };

        let src = kernel.directory(kernel_root);
        let dst = space.directory_mut(root);
        let mut shared = 0_usize;
        for i in DirectoryIndex::all() {
            let entry = src.get(i);
            if entry.is_present() {
                dst.set(i, entry.into_shared());
                shared += 1;
            }
        }

        debug!("page directory {root} shares {shared} kernel tables");
        Ok(space)
    }

    /// Duplicate this address space.
    ///
    /// Tables this space owns and tables reachable from user slots are copied
    /// into fresh frames owned by the clone; shared kernel tables are aliased.
    /// Cloning a detached space yields a detached space.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if any frame allocation fails. The partial
    /// clone is destroyed first; no frame is leaked.
    pub fn try_clone<A: FrameAlloc>(&self, alloc: &mut A) -> Result<Self, VmemError> {
        let _irq = IrqGuard::new();
        let Some(src_root) = self.root else {
            return Ok(Self::detached(self.mapper));
        };

        let clone = Self::create_blank(self.mapper, alloc)?;
        let Some(dst_root) = clone.root else {
            return Ok(clone);
        };

        let mut copied = 0_usize;
        for i in DirectoryIndex::all() {
            let entry = self.directory(src_root).get(i);
            let entry = match entry.kind() {
                None => continue,
                Some(DirectoryEntryKind::Shared(_, bits)) if !bits.user_access() => entry,
                Some(kind) => {
                    let Ok(copy) = take_frame(alloc) else {
                        debug!("clone of {src_root} ran out of memory after {copied} tables");
                        clone.destroy(alloc);
                        return Err(VmemError::OutOfMemory);
                    };
                    self.table_mut(copy).copy_from(self.table(kind.table()));
                    copied += 1;
                    entry.with_owned_table(copy)
                }
            };
            clone.directory_mut(dst_root).set(i, entry);
        }

        debug!("cloned {src_root} into {dst_root} ({copied} tables copied)");
        Ok(clone)
    }

    /// Release the page directory and every owned page table.
    ///
    /// Shared kernel tables are left alone. The space must not be active on
    /// any CPU.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A) {
        let _irq = IrqGuard::new();
        let Some(root) = self.root else {
            return;
        };
        debug_assert!(
            !(tlb::paging_enabled() && tlb::is_active(root)),
            "destroying the active address space"
        );

        let directory = self.directory(root);
        let mut freed = 0_usize;
        for i in DirectoryIndex::all() {
            if let Some(DirectoryEntryKind::Owned(table, _)) = directory.get(i).kind() {
                alloc.free_4k(table);
                freed += 1;
            }
        }
        alloc.free_4k(root);
        debug!("destroyed page directory {root} and {freed} page tables");
    }

    /// Load CR3 with this address space's directory. No-op when detached.
    ///
    /// # Safety
    /// The space must map the currently executing code, the stack and all
    /// data the caller accesses afterwards.
    #[inline]
    pub unsafe fn activate(&self) {
        if let Some(root) = self.root {
            unsafe { tlb::load_root(root) };
            debug!("activated page directory {root}");
        }
    }

    /// Run `f` with this space temporarily active, then restore the previous
    /// translation root.
    ///
    /// Nothing is switched when the space already is active or is detached.
    ///
    /// # Safety
    /// Same contract as [`activate`](Self::activate) for the duration of `f`.
    pub unsafe fn with_active<R>(&self, f: impl FnOnce() -> R) -> R {
        let Some(root) = self.root else {
            return f();
        };
        if tlb::is_active(root) {
            return f();
        }

        let _restore = unsafe { tlb::RootRestore::switch_to(root) };
        f()
    }

    /// Physical page of the page directory, `None` if detached.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> Option<RootPage> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.root.is_none()
    }

    /// Whether this space's directory is loaded in CR3.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.root.is_some_and(tlb::is_active)
    }

    /// The physical mapper this space uses.
    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Flush the TLB if this space is active.
    pub(crate) fn reload_if_active(&self) {
        if let Some(root) = self.root {
            tlb::reload_if_active(root);
        }
    }

    /// Take a frame for a new page table and clear it.
    pub(crate) fn alloc_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        let table = take_frame(alloc)?;
        self.table_mut(table).zero();
        Ok(table)
    }

    pub(crate) fn directory(&self, root: RootPage) -> &PageDirectory {
        self.directory_mut(root)
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn directory_mut(&self, root: RootPage) -> &mut PageDirectory {
        // SAFETY: the mapper maps every directory frame this handle holds.
        unsafe { self.mapper.phys_to_mut::<PageDirectory>(root.base()) }
    }

    pub(crate) fn table(&self, page: PhysicalPage<Size4K>) -> &PageTable {
        self.table_mut(page)
    }

    #[allow(clippy::mut_from_ref)]
    pub(crate) fn table_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        // SAFETY: the mapper maps every table frame referenced by a present slot.
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }
}

/// A frame for a page directory or table.
///
/// The null-guard frame is never used: it stays unmapped, so a structure
/// there would be unreachable through the identity mapping once paging is on.
/// If the allocator offers it, another frame is taken and it goes back.
pub(crate) fn take_frame<A: FrameAlloc>(alloc: &mut A) -> Result<PhysicalPage<Size4K>, VmemError> {
    let null_guard = PhysicalAddress::new(NULL_GUARD_PAGE).page::<Size4K>();
    let frame = alloc.alloc_4k().ok_or(VmemError::OutOfMemory)?;
    if frame != null_guard {
        return Ok(frame);
    }

    warn!("frame allocator handed out the null-guard frame {frame}, skipping it");
    let other = alloc.alloc_4k();
    alloc.free_4k(frame);
    other.ok_or(VmemError::OutOfMemory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageEntryBits;
    use crate::test_support::{TestPhys, TrackingAlloc};
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
    use kernel_registers::emulation::cr3_writes;
    use kernel_sync::irq::interrupts_enabled;

    const KERNEL_VA: u32 = 0xC000_0000;
    const USER_VA: u32 = 0x0804_8000;

    fn va(v: u32) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pa(p: u32) -> PhysicalAddress {
        PhysicalAddress::new(p)
    }

    fn kernel_with_one_page<'m>(
        phys: &'m TestPhys,
        alloc: &mut TrackingAlloc,
    ) -> AddressSpace<'m, TestPhys> {
        let mut kernel = AddressSpace::create_blank(phys, alloc).unwrap();
        kernel
            .map(alloc, pa(0x0010_0000), va(KERNEL_VA), PageEntryBits::new_kernel_rw())
            .unwrap();
        kernel
    }

    #[test]
    fn null_frame_is_never_a_directory() {
        let phys = TestPhys::with_frames(4);
        let mut alloc = TrackingAlloc::including_frame_zero(&phys);

        let space = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        assert_eq!(space.root_page(), Some(pa(0x1000).page()));
        assert!(!alloc.is_outstanding(pa(0).page()));
        assert_eq!(alloc.outstanding(), 1);

        space.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn blank_space_is_empty_and_zeroed() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);

        // Hand out a dirty frame to check that the directory gets cleared.
        let dirty = alloc.alloc_4k().unwrap();
        phys.fill(dirty, 0xFF);
        alloc.free_4k(dirty);

        let space = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        assert_eq!(space.root_page(), Some(dirty));
        assert!(!space.is_mapped(va(0)));
        assert!(!space.is_mapped(va(0xFFFF_F000)));
        assert_eq!(alloc.outstanding(), 1);

        space.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn blank_space_reports_oom() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);
        alloc.fail_after(0);
        assert_eq!(
            AddressSpace::create_blank(&phys, &mut alloc).err(),
            Some(VmemError::OutOfMemory)
        );
        assert_eq!(alloc.outstanding(), 0);
        assert!(interrupts_enabled());
    }

    #[test]
    fn kernel_copy_shares_tables() {
        let phys = TestPhys::with_frames(16);
        let mut alloc = TrackingAlloc::new(&phys);
        let kernel = kernel_with_one_page(&phys, &mut alloc);

        let process = AddressSpace::create_from_kernel(&kernel, &mut alloc).unwrap();
        assert_eq!(process.translate(va(KERNEL_VA)), Some(pa(0x0010_0000)));

        let root = process.root_page().unwrap();
        let slot = process.directory(root).get(DirectoryIndex::from(va(KERNEL_VA)));
        assert!(matches!(slot.kind(), Some(DirectoryEntryKind::Shared(..))));

        // Only the directory is new; destroying it leaves the kernel table alone.
        assert_eq!(alloc.outstanding(), 3);
        process.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 2);
        assert_eq!(kernel.translate(va(KERNEL_VA)), Some(pa(0x0010_0000)));

        kernel.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn kernel_copy_of_detached_kernel_is_blank() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);
        let kernel = AddressSpace::detached(&phys);

        let space = AddressSpace::create_from_kernel(&kernel, &mut alloc).unwrap();
        assert!(!space.is_detached());
        assert!(!space.is_mapped(va(KERNEL_VA)));
        space.destroy(&mut alloc);
    }

    #[test]
    fn clone_isolates_user_pages() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = TrackingAlloc::new(&phys);
        let kernel = kernel_with_one_page(&phys, &mut alloc);
        let mut source = AddressSpace::create_from_kernel(&kernel, &mut alloc).unwrap();
        let user = PageEntryBits::new_user_rw();

        source.map(&mut alloc, pa(0x0020_0000), va(USER_VA), user).unwrap();
        let mut dest = source.try_clone(&mut alloc).unwrap();
        assert_eq!(dest.translate(va(USER_VA)), Some(pa(0x0020_0000)));

        dest.map(&mut alloc, pa(0x0030_0000), va(USER_VA + 0x1000), user).unwrap();
        assert!(!source.is_mapped(va(USER_VA + 0x1000)));

        source.map(&mut alloc, pa(0x0040_0000), va(USER_VA + 0x2000), user).unwrap();
        assert!(!dest.is_mapped(va(USER_VA + 0x2000)));

        source.unmap(va(USER_VA));
        assert!(dest.is_mapped(va(USER_VA)), "unmap in the source leaks into the clone");

        dest.destroy(&mut alloc);
        source.destroy(&mut alloc);
        kernel.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn clone_aliases_kernel_tables() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = TrackingAlloc::new(&phys);
        let mut kernel = kernel_with_one_page(&phys, &mut alloc);
        let mut source = AddressSpace::create_from_kernel(&kernel, &mut alloc).unwrap();
        let mut dest = source.try_clone(&mut alloc).unwrap();
        assert_eq!(dest.translate(va(KERNEL_VA)), source.translate(va(KERNEL_VA)));

        // A kernel page in the shared region shows up everywhere.
        let next = va(KERNEL_VA + 0x1000);
        source
            .map(&mut alloc, pa(0x0011_0000), next, PageEntryBits::new_kernel_rw())
            .unwrap();
        assert_eq!(dest.translate(next), Some(pa(0x0011_0000)));
        assert_eq!(kernel.translate(next), Some(pa(0x0011_0000)));

        // A user page in the same region privatizes the table on that side only.
        let private = va(KERNEL_VA + 0x2000);
        dest.map(&mut alloc, pa(0x0012_0000), private, PageEntryBits::new_user_ro())
            .unwrap();
        assert!(!source.is_mapped(private));
        assert!(!kernel.is_mapped(private));

        kernel
            .map(&mut alloc, pa(0x0013_0000), va(KERNEL_VA + 0x3000), PageEntryBits::new_kernel_rw())
            .unwrap();
        assert!(source.is_mapped(va(KERNEL_VA + 0x3000)));
        assert!(!dest.is_mapped(va(KERNEL_VA + 0x3000)), "private copy must diverge");

        dest.destroy(&mut alloc);
        source.destroy(&mut alloc);
        kernel.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn clone_rolls_back_on_oom() {
        let phys = TestPhys::with_frames(32);
        let mut alloc = TrackingAlloc::new(&phys);
        let mut source = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        let user = PageEntryBits::new_user_rw();
        for region in 0..4 {
            let base = USER_VA + region * 0x0040_0000;
            source.map(&mut alloc, pa(0x0020_0000), va(base), user).unwrap();
        }
        let before = alloc.outstanding();

        // Directory plus two of four tables succeed.
        alloc.fail_after(3);
        assert_eq!(source.try_clone(&mut alloc).err(), Some(VmemError::OutOfMemory));
        assert_eq!(alloc.outstanding(), before);
        assert!(interrupts_enabled());

        alloc.unlimited();
        let clone = source.try_clone(&mut alloc).unwrap();
        assert_eq!(alloc.outstanding(), before * 2);
        clone.destroy(&mut alloc);
        source.destroy(&mut alloc);
        assert_eq!(alloc.outstanding(), 0);
    }

    #[test]
    fn clone_of_detached_is_detached() {
        let phys = TestPhys::with_frames(4);
        let mut alloc = TrackingAlloc::new(&phys);
        let clone = AddressSpace::detached(&phys).try_clone(&mut alloc).unwrap();
        assert!(clone.is_detached());
        assert_eq!(alloc.total_allocations(), 0);
        clone.destroy(&mut alloc);
    }

    #[test]
    fn activate_and_with_active() {
        let phys = TestPhys::with_frames(8);
        let mut alloc = TrackingAlloc::new(&phys);
        let a = AddressSpace::create_blank(&phys, &mut alloc).unwrap();
        let b = AddressSpace::create_blank(&phys, &mut alloc).unwrap();

        unsafe { a.activate() };
        assert!(a.is_active());
        assert!(!b.is_active());

        let seen = unsafe { b.with_active(|| (a.is_active(), b.is_active())) };
        assert_eq!(seen, (false, true));
        assert!(a.is_active());

        let writes = cr3_writes();
        unsafe { a.with_active(|| ()) };
        assert_eq!(cr3_writes(), writes, "already active; nothing to switch");

        unsafe { b.activate() };
        a.destroy(&mut alloc);
        unsafe { AddressSpace::detached(&phys).activate() };
        assert!(b.is_active());
    }
}
