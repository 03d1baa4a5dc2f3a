/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Zones: physical memory regions grouped by the constraints their consumers have, each backed by
//! its own [`buddy::Buddy`] arena.
//!
//! Three zones are recognized:
//!
//! - [`ZoneType::Dma`]: the first 16 MiB, for devices whose DMA engines can't address above it.
//! - [`ZoneType::Low`]: the remainder of memory permanently mapped in kernelspace.
//! - [`ZoneType::High`]: memory above the permanent kernel mapping, usable only via temporary
//!   mappings (not yet needed by any caller in this core, but the zone exists so the allocator
//!   never silently folds it into `Low`).
//!
//! Allocation always prefers the least constrained zone that satisfies the request: a generic
//! `kmalloc`-style request tries `Low` before falling back to `Dma`, while an explicit DMA request
//! only ever looks at `Dma`.
//!
//! Each zone keeps a per-frame reference count alongside its buddy arena (§4.2): a frame is handed
//! back to the buddy allocator only once its count reaches zero, so a frame shared by more than one
//! mapping (the [`clone_user_half`](super::vmem::AddressSpace::clone_user_half) path does not share
//! frames today, but [`share`] exists for the mapping code that will) survives until every sharer
//! has freed it.

use super::buddy::Buddy;
use super::{memmap::MemoryMap, PhysAddr, PAGE_SIZE};
use alloc::vec;
use alloc::vec::Vec;
use utils::errno::AllocResult;
use utils::lock::IntMutex;

/// The size of the DMA-capable zone, in bytes.
const DMA_ZONE_SIZE: usize = 16 * 1024 * 1024;

/// Which zone an allocation may be satisfied from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZoneType {
	/// Below 16 MiB; required by legacy DMA-incapable devices.
	Dma,
	/// Permanently kernel-mapped memory above the DMA zone.
	Low,
	/// Memory above the permanent kernel mapping.
	High,
}

const ZONE_COUNT: usize = 3;

struct Zone {
	buddy: Buddy,
	/// Base address of this zone's arena, used to turn an address into a refcount index.
	begin: PhysAddr,
	/// Per-frame reference count, indexed by `(addr - begin) / PAGE_SIZE`.
	///
	/// Empty until [`init_refcounts`] runs (the heap this `Vec` allocates from isn't up yet during
	/// [`init`]); [`Zone::free`] treats an empty table as "not yet tracked" and always releases, so
	/// frames allocated during that bootstrap window behave exactly as they did before refcounting
	/// existed.
	refcounts: Vec<u32>,
}

impl Zone {
	fn frame_id(&self, addr: PhysAddr) -> usize {
		(*addr - *self.begin) / PAGE_SIZE
	}

	fn alloc(&mut self, order: u32) -> AllocResult<PhysAddr> {
		let addr = self.buddy.alloc(order)?;
		let id = self.frame_id(addr);
		if let Some(slot) = self.refcounts.get_mut(id) {
			*slot = 1;
		}
		Ok(addr)
	}

	fn share(&mut self, addr: PhysAddr) {
		let id = self.frame_id(addr);
		if let Some(slot) = self.refcounts.get_mut(id) {
			*slot += 1;
		}
	}

	fn free(&mut self, addr: PhysAddr, order: u32) {
		let id = self.frame_id(addr);
		let release = match self.refcounts.get_mut(id) {
			Some(count) if *count > 0 => {
				*count -= 1;
				*count == 0
			}
			_ => true,
		};
		if release {
			self.buddy.free(addr, order);
		}
	}
}

static ZONES: IntMutex<[Option<Zone>; ZONE_COUNT]> = IntMutex::new([None, None, None]);

fn index_of(ty: ZoneType) -> usize {
	match ty {
		ZoneType::Dma => 0,
		ZoneType::Low => 1,
		ZoneType::High => 2,
	}
}

/// Builds the zone table from the boot memory map. Called once, before any allocation.
pub fn init(memmap: &MemoryMap) {
	let mut zones = ZONES.lock();
	let dma_end = PhysAddr(DMA_ZONE_SIZE);

	for region in memmap.available_regions() {
		let mut cursor = region.base;
		let end = region.base + region.length;
		while cursor < end {
			let ty = if cursor < dma_end {
				ZoneType::Dma
			} else {
				ZoneType::Low
			};
			let zone_end = match ty {
				ZoneType::Dma => core::cmp::min(dma_end, end),
				_ => end,
			};
			let pages = ((*zone_end - *cursor) / PAGE_SIZE) as u32;
			if pages > 0 {
				let idx = index_of(ty);
				let buddy = unsafe { Buddy::new(cursor, pages) };
				match &mut zones[idx] {
					// A second disjoint region landing in an already-populated zone is dropped: stitching
					// non-contiguous arenas into one buddy allocator isn't supported, and a real machine
					// rarely reports more than one usable run per zone.
					Some(_existing) => {}
					slot @ None => {
						*slot = Some(Zone {
							buddy,
							begin: cursor,
							refcounts: Vec::new(),
						})
					}
				}
			}
			cursor = zone_end;
		}
	}
}

/// Allocates the refcount table for every populated zone.
///
/// Must run after [`super::slab::init`]: the `Vec` below allocates from the `kmalloc` heap, which
/// doesn't exist yet at the point [`init`] runs.
pub fn init_refcounts() {
	let mut zones = ZONES.lock();
	for zone in zones.iter_mut().flatten() {
		let pages = zone.buddy.pages_count() as usize;
		zone.refcounts = vec![0u32; pages];
	}
}

/// Allocates `2^order` contiguous frames, preferring `ty` and falling back to more constrained
/// zones only when `ty` is itself unconstrained (i.e. never promotes a DMA request to non-DMA
/// memory, but a `Low` request may fall back to `Dma`). The returned frame starts with a reference
/// count of one.
pub fn alloc(ty: ZoneType, order: u32) -> AllocResult<PhysAddr> {
	let mut zones = ZONES.lock();
	let tried = match ty {
		ZoneType::High => &[ZoneType::High, ZoneType::Low, ZoneType::Dma][..],
		ZoneType::Low => &[ZoneType::Low, ZoneType::Dma][..],
		ZoneType::Dma => &[ZoneType::Dma][..],
	};
	for &candidate in tried {
		if let Some(zone) = &mut zones[index_of(candidate)] {
			if let Ok(addr) = zone.alloc(order) {
				return Ok(addr);
			}
		}
	}
	Err(utils::errno::AllocError)
}

/// Increments the reference count of the single frame at `addr` (which must have come from
/// [`alloc`] with `order == 0`). Not yet called anywhere in this core, since no mapping path shares
/// frames today, but it's the counterpart [`free`] needs to ever be safe to add one.
pub fn share(ty: ZoneType, addr: PhysAddr) {
	let mut zones = ZONES.lock();
	if let Some(zone) = &mut zones[index_of(ty)] {
		zone.share(addr);
	}
}

/// Decrements the reference count of the block at `addr`/`order`, releasing it back to the buddy
/// allocator only once the count reaches zero.
pub fn free(ty: ZoneType, addr: PhysAddr, order: u32) {
	let mut zones = ZONES.lock();
	if let Some(zone) = &mut zones[index_of(ty)] {
		zone.free(addr, order);
	}
}

/// Total frames allocated across every zone, for accounting/`/proc`-style reporting.
pub fn allocated_pages() -> u32 {
	let zones = ZONES.lock();
	zones
		.iter()
		.filter_map(|z| z.as_ref())
		.map(|z| z.buddy.allocated_pages())
		.sum()
}

#[cfg(test)]
mod test {
	use super::*;

	fn test_zone(pages: u32) -> (Zone, Vec<u8>) {
		let mut backing = vec![0u8; (pages as usize + 1) * PAGE_SIZE];
		let aligned = (backing.as_mut_ptr() as usize).next_multiple_of(PAGE_SIZE);
		let begin = super::super::VirtAddr(aligned).kernel_to_physical();
		let buddy = unsafe { Buddy::new(begin, pages) };
		let zone = Zone {
			buddy,
			begin,
			refcounts: vec![0u32; pages as usize],
		};
		(zone, backing)
	}

	#[test_case]
	fn free_releases_to_buddy_only_at_zero_refcount() {
		let (mut zone, _backing) = test_zone(4);
		let addr = zone.alloc(0).expect("alloc");
		assert_eq!(zone.buddy.allocated_pages(), 1);
		zone.share(addr);
		zone.free(addr, 0);
		assert_eq!(
			zone.buddy.allocated_pages(),
			1,
			"still referenced once, must not be released yet"
		);
		zone.free(addr, 0);
		assert_eq!(
			zone.buddy.allocated_pages(),
			0,
			"last reference dropped, buddy reclaims the frame"
		);
	}

	#[test_case]
	fn fresh_alloc_starts_at_refcount_one() {
		let (mut zone, _backing) = test_zone(2);
		let addr = zone.alloc(0).expect("alloc");
		zone.free(addr, 0);
		assert_eq!(zone.buddy.allocated_pages(), 0, "a single free must fully release a fresh allocation");
	}
}
