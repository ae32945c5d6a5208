//! Address spaces built on the bitmap allocator and an offset mapper over a
//! heap buffer standing in for RAM.

use kernel_alloc::frame_alloc::{BitmapFrameAlloc, SharedFrameAlloc};
use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_info::boot::{ElfSectionsInfo, KernelBootInfo};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::write_lock::is_write_locked;
use kernel_vmem::{AddressSpace, KernelSpace, PageEntryBits, VmemError};

const RAM_FRAMES: usize = 64;

#[repr(C, align(4096))]
struct Ram([u8; RAM_FRAMES * 4096]);

fn ram() -> (Box<Ram>, OffsetPhysMapper) {
    let mut ram = Box::new(Ram([0; RAM_FRAMES * 4096]));
    let mapper = OffsetPhysMapper::new(ram.0.as_mut_ptr().expose_provenance());
    (ram, mapper)
}

/// Frames `[first, RAM_FRAMES)` of the buffer.
fn frames_from(first: u32) -> BitmapFrameAlloc<1> {
    let base = PhysicalAddress::new(first * 4096).page();
    BitmapFrameAlloc::new(base, RAM_FRAMES - first as usize).unwrap()
}

fn va(v: u32) -> VirtualAddress {
    VirtualAddress::new(v)
}

#[test]
fn spaces_return_every_frame() {
    let (_ram, mapper) = ram();
    let shared = SharedFrameAlloc::new(frames_from(1));
    let mut alloc = &shared;

    let mut space = AddressSpace::create_blank(&mapper, &mut alloc).unwrap();
    space
        .map_range(
            &mut alloc,
            PhysicalAddress::new(0x0002_0000),
            va(0x003F_E000),
            4,
            PageEntryBits::new_user_rw(),
        )
        .unwrap();
    assert_eq!(shared.with(|a| a.used_frames()), 3);
    assert_eq!(space.translate(va(0x0040_1234)), Some(PhysicalAddress::new(0x0002_3234)));

    let clone = space.try_clone(&mut alloc).unwrap();
    assert_eq!(shared.with(|a| a.used_frames()), 6);
    space.unmap(va(0x003F_E000));
    assert!(clone.is_mapped(va(0x003F_E000)));

    clone.destroy(&mut alloc);
    space.destroy(&mut alloc);
    assert_eq!(shared.with(|a| a.used_frames()), 0);
}

#[test]
fn exhausted_allocator_rolls_back_the_range() {
    let (_ram, mapper) = ram();
    let mut alloc = frames_from(RAM_FRAMES as u32 - 2);

    let mut space = AddressSpace::create_blank(&mapper, &mut alloc).unwrap();
    let result = space.map_range(
        &mut alloc,
        PhysicalAddress::new(0x0001_0000),
        va(0x003F_F000),
        2,
        PageEntryBits::new_kernel_rw(),
    );
    assert_eq!(result, Err(VmemError::OutOfMemory));
    assert!(!space.is_mapped(va(0x003F_F000)));
    assert!(!space.is_mapped(va(0x0040_0000)));
    assert_eq!(alloc.used_frames(), 1, "only the directory is left");

    space.destroy(&mut alloc);
    assert_eq!(alloc.used_frames(), 0);
}

#[test]
fn kernel_bootstrap_over_real_frames() {
    let (mut ram, mapper) = ram();

    // One read-only, page-aligned section at 0x3000 described by a table at 0x2000.
    let header: [u32; 10] = [1, 1, 0x2, 0x3000, 0x3000, 0x1800, 0, 0, 4096, 0];
    for (i, word) in header.iter().enumerate() {
        let at = 0x2000 + i * 4;
        ram.0[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
    let boot = KernelBootInfo {
        memory_end: (RAM_FRAMES * 4096) as u32,
        elf_sections: ElfSectionsInfo {
            addr: 0x2000,
            num: 1,
            entsize: 40,
            shndx: 0,
        },
    };

    let mut alloc = frames_from(8);
    let kernel = KernelSpace::init_kernel(&boot, &mapper, &mut alloc);
    assert!(kernel.is_active());
    assert!(is_write_locked());
    assert_eq!(alloc.used_frames(), 2);

    assert!(!kernel.is_mapped(va(0)));
    assert_eq!(kernel.translate(va(0x0003_F123)), Some(PhysicalAddress::new(0x0003_F123)));
    let rodata = kernel.get_entry(va(0x4000));
    assert!(rodata.present() && !rodata.writable() && !rodata.user_access());
    assert!(kernel.get_entry(va(0x5000)).writable());

    let mut process = kernel.create_process_space(&mut alloc).unwrap();
    process
        .map(&mut alloc, PhysicalAddress::new(0x0003_0000), va(0x0800_0000), PageEntryBits::new_user_rw())
        .unwrap();
    assert!(process.contains(va(0x1000), 0x3000));
    assert!(!kernel.is_mapped(va(0x0800_0000)));

    process.destroy(&mut alloc);
    assert_eq!(alloc.used_frames(), 2);
}
