//! Installing and removing 4 KiB mappings.
//!
//! Each public call flushes the TLB at most once, after all its changes, and
//! only if the space is active and something actually changed.
//!
//! A range is mapped in two steps. First every page table the range needs is
//! taken from the allocator into a [`TableReserve`]; running out of memory
//! there leaves the space untouched. Then the entries are written, drawing
//! tables from the reserve only.

use crate::page_table::pd::{DirectoryEntryKind, DirectoryIndex, PdEntry};
use crate::page_table::pt::PtEntry;
use crate::page_table::split_indices;
use crate::address_space::take_frame;
use crate::{AddressSpace, FrameAlloc, PageEntryBits, PhysMapper, VmemError};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, VirtualPage};
use kernel_sync::IrqGuard;
use log::{debug, trace};

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Map the 4 KiB page containing `va` to the frame containing `pa`.
    ///
    /// A missing page table is allocated; the directory slot gets the
    /// `writable`/`user_access` rights of `flags` added. The entry itself is
    /// written as `flags` with `present` forced on. Mapping a **user** page
    /// into a table shared with the kernel first gives this space a private
    /// copy of that table.
    ///
    /// No-op on a detached space.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if a page table could not be allocated.
    /// Nothing is written in that case.
    pub fn map<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        pa: PhysicalAddress,
        va: VirtualAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmemError> {
        let _irq = IrqGuard::new();
        if self.map_page(alloc, pa.page(), va.page(), flags)? {
            self.reload_if_active();
        }
        Ok(())
    }

    /// Map `count` consecutive pages starting at `va` to consecutive frames
    /// starting at `pa`.
    ///
    /// # Errors
    /// - [`VmemError::RangeOverflow`] if either range wraps past `0xFFFF_FFFF`.
    /// - [`VmemError::OutOfMemory`] if the page tables for the range could not
    ///   all be allocated. The space is left exactly as it was: no entry is
    ///   written, no directory slot changes and every frame taken is returned.
    pub fn map_range<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        pa: PhysicalAddress,
        va: VirtualAddress,
        count: u32,
        flags: PageEntryBits,
    ) -> Result<(), VmemError> {
        let _irq = IrqGuard::new();
        let Some(root) = self.root else {
            return Ok(());
        };
        if count == 0 {
            return Ok(());
        }

        let first_frame = pa.page::<Size4K>();
        let first_page = va.page::<Size4K>();
        let (Some(_), Some(last_page)) = (first_frame.checked_add(count - 1), first_page.checked_add(count - 1))
        else {
            return Err(VmemError::RangeOverflow);
        };

        let mut reserve = self.reserve_tables(alloc, root, first_page, last_page, flags)?;
        let mapped = (0..count).try_for_each(|i| {
            let (Some(frame), Some(page)) = (first_frame.checked_add(i), first_page.checked_add(i))
            else {
                return Err(VmemError::RangeOverflow);
            };
            self.map_page(&mut reserve, frame, page, flags).map(drop)
        });
        let unused = reserve.release(alloc);
        debug_assert_eq!(unused, 0, "page table reserve over-estimated");

        self.reload_if_active();
        mapped
    }

    /// Map the page containing `pa` at the same virtual address.
    ///
    /// # Errors
    /// See [`map`](Self::map).
    #[inline]
    pub fn identity<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmemError> {
        self.map(alloc, pa, VirtualAddress::new(pa.as_u32()), flags)
    }

    /// Identity-map `count` pages starting at the page containing `pa`.
    ///
    /// # Errors
    /// See [`map_range`](Self::map_range).
    #[inline]
    pub fn identity_range<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        pa: PhysicalAddress,
        count: u32,
        flags: PageEntryBits,
    ) -> Result<(), VmemError> {
        self.map_range(alloc, pa, VirtualAddress::new(pa.as_u32()), count, flags)
    }

    /// Remove the mapping of the page containing `va`.
    ///
    /// No-op if the page is not mapped. Emptied page tables stay allocated
    /// until the space is destroyed.
    pub fn unmap(&mut self, va: VirtualAddress) {
        let _irq = IrqGuard::new();
        if self.unmap_page(va.page()) {
            self.reload_if_active();
        }
    }

    /// Remove the mappings of `count` pages starting at the page containing
    /// `va`. Pages past `0xFFFF_FFFF` are ignored.
    pub fn unmap_range(&mut self, va: VirtualAddress, count: u32) {
        let _irq = IrqGuard::new();
        if self.unmap_pages(va.page(), count) {
            self.reload_if_active();
        }
    }

    /// Write one page table entry; returns whether anything was written.
    fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        frame: PhysicalPage<Size4K>,
        page: VirtualPage<Size4K>,
        flags: PageEntryBits,
    ) -> Result<bool, VmemError> {
        let Some(root) = self.root else {
            return Ok(false);
        };

        let (di, ti) = split_indices(page.base());
        let table = self.ensure_table(alloc, root, di, flags)?;
        self.table_mut(table).set(ti, PtEntry::make_4k(frame, flags));
        trace!("mapped {} -> {} ({flags:?})", page.base(), frame.base());
        Ok(true)
    }

    /// The page table for directory slot `di`, allocated or privatized as
    /// needed, with the access rights of `flags` granted on the slot.
    fn ensure_table<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        root: PhysicalPage<Size4K>,
        di: DirectoryIndex,
        flags: PageEntryBits,
    ) -> Result<PhysicalPage<Size4K>, VmemError> {
        let entry = self.directory(root).get(di);
        let (table, entry) = match entry.kind() {
            Some(kind) if !needs_new_table(entry, flags) => (kind.table(), entry.merge_access(flags)),
            None => {
                let table = self.alloc_table(alloc)?;
                debug!("allocated page table {table} for slot {}", di.as_usize());
                (table, PdEntry::owned_table(table, flags))
            }
            Some(kind) => {
                let shared = kind.table();
                let table = self.alloc_table(alloc)?;
                self.table_mut(table).copy_from(self.table(shared));
                debug!("privatized shared page table {shared} as {table}");
                (table, entry.with_owned_table(table).merge_access(flags))
            }
        };

        self.directory_mut(root).set(di, entry);
        Ok(table)
    }

    /// Take one frame for every directory slot in `first..=last` that
    /// [`ensure_table`](Self::ensure_table) would have to allocate.
    ///
    /// On failure the frames taken so far go back to `alloc`.
    fn reserve_tables<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        root: PhysicalPage<Size4K>,
        first: VirtualPage<Size4K>,
        last: VirtualPage<Size4K>,
        flags: PageEntryBits,
    ) -> Result<TableReserve<'m, M>, VmemError> {
        let first_slot = DirectoryIndex::from(first.base()).as_usize();
        let last_slot = DirectoryIndex::from(last.base()).as_usize();
        let directory = self.directory(root);

        let mut reserve = TableReserve::new(self.mapper);
        for di in DirectoryIndex::all().skip(first_slot).take(last_slot - first_slot + 1) {
            if !needs_new_table(directory.get(di), flags) {
                continue;
            }
            match take_frame(alloc) {
                Ok(frame) => reserve.free_4k(frame),
                Err(e) => {
                    let returned = reserve.release(alloc);
                    debug!("no page table for slot {}, returned {returned} reserved frames", di.as_usize());
                    return Err(e);
                }
            }
        }
        Ok(reserve)
    }

    /// Clear one page table entry; returns whether it was present.
    fn unmap_page(&self, page: VirtualPage<Size4K>) -> bool {
        let Some(root) = self.root else {
            return false;
        };

        let (di, ti) = split_indices(page.base());
        let Some(kind) = self.directory(root).get(di).kind() else {
            return false;
        };

        let table = self.table_mut(kind.table());
        if !table.get(ti).is_present() {
            return false;
        }
        table.set(ti, PtEntry::zero());
        trace!("unmapped {}", page.base());
        true
    }

    /// Unmap up to `count` pages; returns whether any was present.
    fn unmap_pages(&self, first: VirtualPage<Size4K>, count: u32) -> bool {
        let mut changed = false;
        for page in (0..count).map_while(|i| first.checked_add(i)) {
            changed |= self.unmap_page(page);
        }
        changed
    }
}

/// Whether mapping a page with `flags` under `entry` needs a fresh table:
/// the slot is empty, or it borrows a kernel table and the page is a user page.
const fn needs_new_table(entry: PdEntry, flags: PageEntryBits) -> bool {
    match entry.kind() {
        None => true,
        Some(DirectoryEntryKind::Shared(..)) => flags.user_access(),
        Some(DirectoryEntryKind::Owned(..)) => false,
    }
}

/// Frames set aside for page tables, chained through their first word.
///
/// The link word holds the next frame's address with bit 0 set, or zero at
/// the end of the chain. Tables are zeroed when taken, so the link never
/// survives into a live table.
struct TableReserve<'m, M: PhysMapper> {
    mapper: &'m M,
    head: Option<PhysicalPage<Size4K>>,
}

impl<'m, M: PhysMapper> TableReserve<'m, M> {
    const LINKED: u32 = 1;

    const fn new(mapper: &'m M) -> Self {
        Self { mapper, head: None }
    }

    #[allow(clippy::mut_from_ref)]
    fn link(&self, frame: PhysicalPage<Size4K>) -> &mut u32 {
        // SAFETY: reserved frames belong to this reserve and are mapped like any table frame.
        unsafe { self.mapper.phys_to_mut::<u32>(frame.base()) }
    }

    /// Hand every remaining frame back to `alloc`; returns how many there were.
    fn release<A: FrameAlloc>(mut self, alloc: &mut A) -> usize {
        let mut returned = 0;
        while let Some(frame) = self.alloc_4k() {
            alloc.free_4k(frame);
            returned += 1;
        }
        returned
    }
}

impl<M: PhysMapper> FrameAlloc for TableReserve<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        let frame = self.head?;
        let link = *self.link(frame);
        self.head = (link & Self::LINKED != 0).then(|| PhysicalAddress::new(link & !Self::LINKED).page());
        Some(frame)
    }

    fn free_4k(&mut self, frame: PhysicalPage<Size4K>) {
        *self.link(frame) = self.head.map_or(0, |next| next.base().as_u32() | Self::LINKED);
        self.head = Some(frame);
    }
}
