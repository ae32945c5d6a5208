//! Per-thread software model of the registers.
//!
//! Every thread starts in protected mode with paging disabled, a zero CR3 and
//! interrupts enabled.

use core::cell::Cell;

/// CR0 with only PE (bit 0) set.
const RESET_CR0: u32 = 0x0000_0001;

/// EFLAGS with the always-one bit 1 and IF (bit 9) set.
const RESET_EFLAGS: u32 = 0x0000_0202;

std::thread_local! {
    static CR0: Cell<u32> = const { Cell::new(RESET_CR0) };
    static CR3: Cell<u32> = const { Cell::new(0) };
    static CR3_WRITES: Cell<u64> = const { Cell::new(0) };
    static EFLAGS: Cell<u32> = const { Cell::new(RESET_EFLAGS) };
}

/// Number of CR3 stores performed on this thread so far.
///
/// Every store flushes the (modeled) TLB, so this doubles as a flush counter.
#[must_use]
pub fn cr3_writes() -> u64 {
    CR3_WRITES.with(Cell::get)
}

pub(crate) fn load_cr0() -> u32 {
    CR0.with(Cell::get)
}

pub(crate) fn store_cr0(bits: u32) {
    CR0.with(|c| c.set(bits));
}

pub(crate) fn load_cr3() -> u32 {
    CR3.with(Cell::get)
}

pub(crate) fn store_cr3(bits: u32) {
    CR3.with(|c| c.set(bits));
    CR3_WRITES.with(|c| c.set(c.get() + 1));
}

pub(crate) fn load_eflags() -> u32 {
    EFLAGS.with(Cell::get)
}

pub(crate) fn store_eflags(bits: u32) {
    EFLAGS.with(|c| c.set(bits));
}
