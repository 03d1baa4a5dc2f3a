/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Virtual memory: per-task page directories built on the classic x86 recursive self-mapping
//! trick.
//!
//! Directory entry 1023 ("`DIR_MAP`") is made to point at the directory's own physical page, so
//! the directory behaves as a page table of itself: table `i`'s leaf entries become addressable as
//! ordinary memory at `0xFFC00000 + i * PAGE_SIZE`, and the directory's own 1024 entries become
//! addressable at `0xFFFFF000`. That only works for the *currently active* directory, since it
//! relies on `cr3` already pointing at it.
//!
//! Entry 1022 ("`DIR_MAP2`") is a scratch slot used to reach a directory that is not currently
//! active, one physical page at a time: [`scratch_map`] points it at an arbitrary physical page
//! and exposes that page's 1024 dwords flatly at `0xFF800000`. Reading a foreign directory's leaf
//! PTE is therefore two scratch maps: one of the directory page itself (to read the PDE and learn
//! the table's physical address), one of that table page (to read or write the PTE).
//!
//! Directory entries 768..1021 are the kernel half: every live directory's entries in that range
//! are copied once at creation and never touched again, so a context switch never has to
//! reconcile kernel mappings (§4.4).

use super::{PhysAddr, VirtAddr, KVBASE, PAGE_SIZE};
use crate::arch;
use utils::errno::AllocResult;
use utils::lock::IntMutex;

use super::zone::{self, ZoneType};

/// Index of the directory's self-mapping slot.
const DIR_MAP: usize = 1023;
/// Index of the scratch self-mapping slot, used for foreign directories.
const DIR_MAP2: usize = 1022;
/// Virtual base of the active directory's leaf-table window.
const DIR_MAP_BASE: usize = 0xFFC0_0000;
/// Virtual address of the active directory's own PDE array.
const DIR_MAP_SELF: usize = 0xFFFF_F000;
/// Virtual base of the scratch single-page window.
const SCRATCH_BASE: usize = 0xFF80_0000;

/// First kernel-half directory entry; copied verbatim into every new directory.
const KERNEL_FIRST_ENTRY: usize = 768;
/// One past the last kernel-half directory entry.
const KERNEL_LAST_ENTRY: usize = 1021;

const ENTRIES_PER_TABLE: usize = 1024;

bitflags::bitflags! {
	/// Page table/directory entry flags.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct Flags: u32 {
		/// The mapping is valid.
		const PRESENT = 1 << 0;
		/// Writable (otherwise read-only).
		const WRITE = 1 << 1;
		/// Accessible from ring 3.
		const USER = 1 << 2;
		/// Not flushed from the TLB on a `cr3` reload (used only for the permanent kernel mapping).
		const GLOBAL = 1 << 8;
	}
}

unsafe fn read_dword(addr: VirtAddr) -> u32 {
	core::ptr::read_volatile(addr.as_ptr())
}

unsafe fn write_dword(addr: VirtAddr, value: u32) {
	core::ptr::write_volatile(addr.as_ptr(), value);
}

/// Points the scratch slot at `phys` and returns the base address through which its 1024 dwords
/// are now flatly readable/writable.
///
/// Only safe to rely on until the next call to `scratch_map` (on any CPU; this core is
/// single-core, §9) or the next `switch_to`.
fn scratch_map(phys: PhysAddr) -> VirtAddr {
	unsafe {
		write_dword(
			VirtAddr(DIR_MAP_SELF + DIR_MAP2 * 4),
			(*phys) as u32 | Flags::PRESENT.bits() | Flags::WRITE.bits(),
		);
		arch::invlpg(SCRATCH_BASE);
	}
	VirtAddr(SCRATCH_BASE)
}

/// A live page directory.
pub struct AddressSpace {
	phys: PhysAddr,
}

static CURRENT: IntMutex<Option<PhysAddr>> = IntMutex::new(None);

fn is_active(phys: PhysAddr) -> bool {
	*CURRENT.lock() == Some(phys)
}

/// Adopts the boot stub's page directory (already loaded in `cr3`, self-mapped at `DIR_MAP` by
/// the stub's own setup, outside this core's scope per §6) as the current directory, so that
/// later [`AddressSpace::new`] calls have a kernel half to copy from.
pub fn init(boot_dir_phys: PhysAddr) {
	*CURRENT.lock() = Some(boot_dir_phys);
}

impl AddressSpace {
	/// Allocates a fresh directory with only the kernel half populated.
	pub fn new() -> AllocResult<Self> {
		let phys = zone::alloc(ZoneType::Low, 0)?;
		unsafe {
			core::ptr::write_bytes(phys.kernel_to_virtual().as_ptr::<u8>(), 0, PAGE_SIZE);
		}
		let window = scratch_map(phys);
		unsafe {
			write_dword(
				VirtAddr(*window + DIR_MAP * 4),
				(*phys) as u32 | Flags::PRESENT.bits() | Flags::WRITE.bits(),
			);
			for i in KERNEL_FIRST_ENTRY..=KERNEL_LAST_ENTRY {
				let kernel_entry = read_dword(VirtAddr(DIR_MAP_SELF + i * 4));
				write_dword(VirtAddr(*window + i * 4), kernel_entry);
			}
		}
		Ok(Self { phys })
	}

	/// Physical address of this directory's top-level page.
	pub fn phys_root(&self) -> PhysAddr {
		self.phys
	}

	/// Reads this directory's PDE for `table_idx`.
	fn read_pde(&self, table_idx: usize) -> u32 {
		if is_active(self.phys) {
			unsafe { read_dword(VirtAddr(DIR_MAP_SELF + table_idx * 4)) }
		} else {
			let window = scratch_map(self.phys);
			unsafe { read_dword(VirtAddr(*window + table_idx * 4)) }
		}
	}

	/// Writes this directory's PDE for `table_idx`.
	fn write_pde(&self, table_idx: usize, value: u32) {
		if is_active(self.phys) {
			unsafe { write_dword(VirtAddr(DIR_MAP_SELF + table_idx * 4), value) };
		} else {
			let window = scratch_map(self.phys);
			unsafe { write_dword(VirtAddr(*window + table_idx * 4), value) };
		}
	}

	/// Reads the leaf PTE at `(table_idx, page_idx)`, assuming the table is present.
	fn read_pte(&self, table_idx: usize, page_idx: usize) -> u32 {
		if is_active(self.phys) {
			unsafe { read_dword(VirtAddr(DIR_MAP_BASE + table_idx * PAGE_SIZE + page_idx * 4)) }
		} else {
			let table_phys = PhysAddr((self.read_pde(table_idx) & !0xFFF) as usize);
			let window = scratch_map(table_phys);
			unsafe { read_dword(VirtAddr(*window + page_idx * 4)) }
		}
	}

	/// Writes the leaf PTE at `(table_idx, page_idx)`, assuming the table is present.
	fn write_pte(&self, table_idx: usize, page_idx: usize, value: u32) {
		if is_active(self.phys) {
			unsafe {
				write_dword(VirtAddr(DIR_MAP_BASE + table_idx * PAGE_SIZE + page_idx * 4), value);
				arch::invlpg((table_idx * ENTRIES_PER_TABLE + page_idx) * PAGE_SIZE);
			}
		} else {
			let table_phys = PhysAddr((self.read_pde(table_idx) & !0xFFF) as usize);
			let window = scratch_map(table_phys);
			unsafe { write_dword(VirtAddr(*window + page_idx * 4), value) };
		}
	}

	/// Clears a freshly allocated table page and returns its physical address.
	fn new_table(&self) -> AllocResult<PhysAddr> {
		let phys = zone::alloc(ZoneType::Low, 0)?;
		let window = scratch_map(phys);
		unsafe { core::ptr::write_bytes(window.as_ptr::<u8>(), 0, PAGE_SIZE) };
		Ok(phys)
	}

	/// Switches `cr3` to this directory.
	///
	/// # Safety
	///
	/// The caller must ensure no reference into the previously active directory's tables outlives
	/// the switch.
	pub unsafe fn switch_to(&self) {
		arch::write_cr3(*self.phys);
		*CURRENT.lock() = Some(self.phys);
	}

	/// Maps `virt` to `phys` with the given flags, allocating an intermediate page table on demand.
	pub fn map(&self, virt: VirtAddr, phys: PhysAddr, flags: Flags) -> AllocResult<()> {
		let table_idx = *virt / (PAGE_SIZE * ENTRIES_PER_TABLE);
		let page_idx = (*virt / PAGE_SIZE) % ENTRIES_PER_TABLE;
		let dir_entry = self.read_pde(table_idx);
		if dir_entry & Flags::PRESENT.bits() == 0 {
			let table_phys = self.new_table()?;
			self.write_pde(
				table_idx,
				(*table_phys) as u32 | Flags::PRESENT.bits() | Flags::WRITE.bits() | Flags::USER.bits(),
			);
		}
		self.write_pte(table_idx, page_idx, (*phys) as u32 | flags.bits());
		Ok(())
	}

	/// Removes the mapping for `virt`, if any. Does not free the underlying frame; callers that
	/// own the frame (anonymous memory, not a file-backed mapping) are responsible for that.
	pub fn unmap(&self, virt: VirtAddr) {
		let table_idx = *virt / (PAGE_SIZE * ENTRIES_PER_TABLE);
		let page_idx = (*virt / PAGE_SIZE) % ENTRIES_PER_TABLE;
		if self.read_pde(table_idx) & Flags::PRESENT.bits() == 0 {
			return;
		}
		self.write_pte(table_idx, page_idx, 0);
	}

	/// Looks up the physical address mapped at `virt`, if present.
	pub fn translate(&self, virt: VirtAddr) -> Option<PhysAddr> {
		let table_idx = *virt / (PAGE_SIZE * ENTRIES_PER_TABLE);
		let page_idx = (*virt / PAGE_SIZE) % ENTRIES_PER_TABLE;
		if self.read_pde(table_idx) & Flags::PRESENT.bits() == 0 {
			return None;
		}
		let pte = self.read_pte(table_idx, page_idx);
		if pte & Flags::PRESENT.bits() == 0 {
			None
		} else {
			Some(PhysAddr((pte & !0xFFF) as usize))
		}
	}

	/// Deep-copies every user-half mapping into a new directory, each backed by a fresh physical
	/// frame (no copy-on-write — §9 records this as a deliberate simplification).
	pub fn clone_user_half(&self) -> AllocResult<Self> {
		let child = Self::new()?;
		for table_idx in 0..KERNEL_FIRST_ENTRY {
			let dir_entry = self.read_pde(table_idx);
			if dir_entry & Flags::PRESENT.bits() == 0 {
				continue;
			}
			for page_idx in 0..ENTRIES_PER_TABLE {
				let page_entry = self.read_pte(table_idx, page_idx);
				if page_entry & Flags::PRESENT.bits() == 0 {
					continue;
				}
				let src_phys = PhysAddr((page_entry & !0xFFF) as usize);
				let flags = Flags::from_bits_truncate(page_entry & 0xFFF);
				let dst_phys = zone::alloc(ZoneType::Low, 0)?;
				copy_frame(src_phys, dst_phys);
				let virt = VirtAddr((table_idx * ENTRIES_PER_TABLE + page_idx) * PAGE_SIZE);
				child.map(virt, dst_phys, flags)?;
			}
		}
		Ok(child)
	}

	/// Frees every user-half frame and page table, then the directory page itself.
	///
	/// # Safety
	///
	/// `self` must not be the currently active directory.
	pub unsafe fn destroy_user_half(&self) {
		for table_idx in 0..KERNEL_FIRST_ENTRY {
			let dir_entry = self.read_pde(table_idx);
			if dir_entry & Flags::PRESENT.bits() == 0 {
				continue;
			}
			for page_idx in 0..ENTRIES_PER_TABLE {
				let page_entry = self.read_pte(table_idx, page_idx);
				if page_entry & Flags::PRESENT.bits() != 0 {
					let phys = PhysAddr((page_entry & !0xFFF) as usize);
					zone::free(ZoneType::Low, phys, 0);
				}
			}
			let table_phys = PhysAddr((dir_entry & !0xFFF) as usize);
			zone::free(ZoneType::Low, table_phys, 0);
		}
		zone::free(ZoneType::Low, self.phys, 0);
	}
}

/// Copies one frame's contents into another, neither of which need be mapped in the currently
/// active address space, by round-tripping through the permanent kernel identity mapping — every
/// physical frame this core hands out is reachable this way regardless of which directory is
/// active.
fn copy_frame(src: PhysAddr, dst: PhysAddr) {
	unsafe {
		core::ptr::copy_nonoverlapping(
			src.kernel_to_virtual().as_ptr::<u8>(),
			dst.kernel_to_virtual().as_ptr::<u8>(),
			PAGE_SIZE,
		);
	}
}

/// Handles a page fault by lazily backing the faulting address with a fresh frame.
///
/// A kernel-half fault (`fault_addr >= KVBASE`) on an address already marked present is a
/// programming error (a stale TLB entry or a genuinely bad kernel pointer) and panics; otherwise a
/// frame is allocated from [`ZoneType::Low`] and mapped, then the new page-directory entry is
/// propagated into every other live directory so the kernel half stays byte-identical across tasks
/// (§4.4). A user-half fault allocates from [`ZoneType::High`] and maps it `PRESENT|WRITE|USER`
/// into the faulting task's own address space only.
///
/// Returns `true` if the fault was resolved and execution may resume, `false` if the caller should
/// report `SIGSEGV` to the faulting task instead (out of memory, or a second fault on an address
/// already marked present).
pub fn page_fault(fault_addr: VirtAddr, present: bool, write: bool) -> bool {
	let _ = write;
	if fault_addr >= KVBASE {
		if present {
			panic!("page fault in kernel half at {fault_addr:?} on an already-present mapping");
		}
		let Ok(phys) = zone::alloc(ZoneType::Low, 0) else {
			panic!("out of memory in kernel-half page fault handler");
		};
		let table_idx = *fault_addr / (PAGE_SIZE * ENTRIES_PER_TABLE);
		let space = crate::process::with_current(|task| task.address_space.clone());
		if space
			.map(fault_addr, phys, Flags::PRESENT | Flags::WRITE | Flags::GLOBAL)
			.is_err()
		{
			panic!("out of memory mapping kernel-half page fault at {fault_addr:?}");
		}
		propagate_kernel_entry(&space, table_idx);
		return true;
	}
	if present {
		return false;
	}
	let Ok(phys) = zone::alloc(ZoneType::High, 0) else {
		return false;
	};
	let space = crate::process::with_current(|task| task.address_space.clone());
	if space.map(fault_addr, phys, Flags::PRESENT | Flags::WRITE | Flags::USER).is_err() {
		zone::free(ZoneType::High, phys, 0);
		return false;
	}
	true
}

/// Copies `table_idx`'s PDE from `source` into every other live address space, keeping the kernel
/// half identical across all directories after a kernel-half page fault populates a new entry in
/// one of them.
///
/// Runs with interrupts disabled for its whole duration: [`crate::process::for_each_address_space`]
/// takes the process table's `IntMutex`, which disables interrupts across the critical section.
fn propagate_kernel_entry(source: &AddressSpace, table_idx: usize) {
	let entry = source.read_pde(table_idx);
	crate::process::for_each_address_space(|space| {
		if !core::ptr::eq(space.as_ref(), source) {
			space.write_pde(table_idx, entry);
		}
	});
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn dir_map_self_address_matches_constant() {
		assert_eq!(DIR_MAP_SELF, 0xFFC0_0000 + DIR_MAP * PAGE_SIZE);
	}

	#[test_case]
	fn scratch_base_is_one_table_window_below_dir_map() {
		assert_eq!(SCRATCH_BASE, DIR_MAP_BASE - 0x0040_0000);
	}
}
