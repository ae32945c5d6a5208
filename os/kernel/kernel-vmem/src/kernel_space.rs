//! # Kernel Address Space
//!
//! The one address space that exists from boot to shutdown. It identity-maps
//! physical RAM, leaves the null page unmapped and maps the kernel image's
//! read-only sections read-only. Every process space starts as a copy of its
//! directory.
//!
//! There is no global instance: [`KernelSpace::init_kernel`] returns the value
//! and the kernel hands it to whoever needs it.

use crate::elf_sections::{SHF_ALLOC, SectionHeader, SectionTable, SectionTableError};
use crate::{AddressSpace, FrameAlloc, PageEntryBits, PhysMapper, VmemError};
use core::ops::{Deref, DerefMut};
use kernel_info::boot::{ElfSectionsInfo, KernelBootInfo};
use kernel_info::memory::{FIRST_IDENTITY_PAGE, NULL_GUARD_PAGE, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::cr0::Cr0;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_sync::IrqGuard;
use log::{debug, error, info};

/// The kernel address space. Never destroyed.
pub struct KernelSpace<'m, M: PhysMapper> {
    space: AddressSpace<'m, M>,
}

impl<'m, M: PhysMapper> KernelSpace<'m, M> {
    /// Build and activate the kernel address space, then turn on paging with
    /// supervisor write protection.
    ///
    /// # Panics
    /// If the address space cannot be built; there is nothing to fall back to.
    pub fn init_kernel<A: FrameAlloc>(boot: &KernelBootInfo, mapper: &'m M, alloc: &mut A) -> Self {
        match Self::bootstrap(boot, mapper, alloc) {
            Ok(kernel) => kernel,
            Err(e) => {
                error!("kernel address space setup failed: {e}");
                panic!("unable to build the kernel address space: {e}");
            }
        }
    }

    /// Fallible form of [`init_kernel`](Self::init_kernel).
    ///
    /// 1. allocate the kernel page directory,
    /// 2. identity-map `[FIRST_IDENTITY_PAGE, memory_end)` writable,
    /// 3. remap the read-only, page-aligned sections of the kernel image
    ///    read-only and supervisor-only,
    /// 4. make sure the null page is unmapped,
    /// 5. load CR3 and set CR0.PG and CR0.WP.
    ///
    /// # Errors
    /// - [`VmemError::OutOfMemory`] if a directory or table frame is missing.
    /// - [`VmemError::SectionTable`] if the ELF section table is malformed.
    ///
    /// All frames are returned and the paging state is left untouched on error.
    pub fn bootstrap<A: FrameAlloc>(
        boot: &KernelBootInfo,
        mapper: &'m M,
        alloc: &mut A,
    ) -> Result<Self, VmemError> {
        let _irq = IrqGuard::new();
        info!("building kernel address space, RAM ends at {:#010X}", boot.memory_end);

        let sections = section_table(&boot.elf_sections, mapper)?;
        let mut space = AddressSpace::create_blank(mapper, alloc)?;
        if let Err(e) = populate(&mut space, alloc, boot.memory_end, &sections) {
            space.destroy(alloc);
            return Err(e);
        }

        // SAFETY: all of RAM, including this code and the stack, is identity mapped.
        unsafe {
            space.activate();
            let cr0 = Cr0::load_unsafe();
            cr0.with_pg_paging(true).with_wp_write_protect(true).store_unsafe();
        }

        info!("paging enabled, kernel page directory at {:?}", space.root_page());
        Ok(Self { space })
    }

    /// A new process address space sharing every kernel mapping.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is available for the directory.
    pub fn create_process_space<A: FrameAlloc>(
        &self,
        alloc: &mut A,
    ) -> Result<AddressSpace<'m, M>, VmemError> {
        AddressSpace::create_from_kernel(&self.space, alloc)
    }
}

impl<'m, M: PhysMapper> Deref for KernelSpace<'m, M> {
    type Target = AddressSpace<'m, M>;

    fn deref(&self) -> &Self::Target {
        &self.space
    }
}

impl<M: PhysMapper> DerefMut for KernelSpace<'_, M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.space
    }
}

/// Read the section header table the boot loader pointed us to.
fn section_table<'a, M: PhysMapper>(
    info: &ElfSectionsInfo,
    mapper: &M,
) -> Result<SectionTable<'a>, VmemError> {
    if info.num == 0 {
        return Ok(SectionTable::empty());
    }

    let len = info.table_len().ok_or(SectionTableError::TooLarge)?;
    // SAFETY: the loader's table sits in identity-mapped RAM and is never written.
    let bytes = unsafe { mapper.phys_to_slice(PhysicalAddress::new(info.addr), len as usize) };
    Ok(SectionTable::new(bytes, info.num, info.entsize)?)
}

fn populate<M: PhysMapper, A: FrameAlloc>(
    space: &mut AddressSpace<'_, M>,
    alloc: &mut A,
    memory_end: u32,
    sections: &SectionTable<'_>,
) -> Result<(), VmemError> {
    let pages = memory_end.saturating_sub(FIRST_IDENTITY_PAGE) / PAGE_SIZE;
    space.identity_range(
        alloc,
        PhysicalAddress::new(FIRST_IDENTITY_PAGE),
        pages,
        PageEntryBits::new_kernel_rw(),
    )?;

    for section in sections.sections().filter(is_protected) {
        debug!(
            "write-protecting section at {} ({} pages)",
            section.addr,
            section.page_count()
        );
        space.identity_range(
            alloc,
            section.start(),
            section.page_count(),
            PageEntryBits::new_kernel_ro(),
        )?;
    }

    space.unmap(VirtualAddress::new(NULL_GUARD_PAGE));
    Ok(())
}

/// Loaded, read-only and page-aligned.
fn is_protected(section: &SectionHeader) -> bool {
    section.flags & SHF_ALLOC != 0 && section.is_write_protectable()
}
