/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! The boot-provided physical memory map.
//!
//! Populated by the boot stub (outside this core's scope, §6) from whatever the firmware/bootloader
//! reports (e.g. a multiboot memory map) and handed to [`crate::memory::init`] as-is.

use super::PhysAddr;

/// A single contiguous run of physical memory reported by the bootloader.
#[derive(Clone, Copy, Debug)]
pub struct MemoryRegion {
	/// Start of the region.
	pub base: PhysAddr,
	/// Length of the region, in bytes.
	pub length: usize,
	/// Whether this region is usable RAM (as opposed to reserved/ACPI/MMIO).
	pub available: bool,
}

/// The maximum number of regions a [`MemoryMap`] can hold.
///
/// Bounded so the map itself can live on the boot stack before any allocator exists.
pub const MAX_REGIONS: usize = 32;

/// The full boot-time physical memory layout.
#[derive(Clone, Copy)]
pub struct MemoryMap {
	regions: [MemoryRegion; MAX_REGIONS],
	count: usize,
}

impl MemoryMap {
	/// Builds a memory map from a slice of regions.
	///
	/// Panics if `regions` exceeds [`MAX_REGIONS`]; the boot stub's source (a multiboot tag list)
	/// is trusted to stay well under this in practice.
	pub fn new(regions: &[MemoryRegion]) -> Self {
		let mut map = Self {
			regions: [MemoryRegion {
				base: PhysAddr(0),
				length: 0,
				available: false,
			}; MAX_REGIONS],
			count: regions.len(),
		};
		map.regions[..regions.len()].copy_from_slice(regions);
		map
	}

	/// Iterates the available (usable RAM) regions.
	pub fn available_regions(&self) -> impl Iterator<Item = &MemoryRegion> {
		self.regions[..self.count].iter().filter(|r| r.available)
	}

	/// Returns the physical address one past the end of the highest usable region.
	pub fn top(&self) -> PhysAddr {
		self.available_regions()
			.map(|r| r.base + r.length)
			.max_by_key(|a| a.0)
			.unwrap_or(PhysAddr(0))
	}
}
