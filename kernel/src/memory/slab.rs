/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! The slab allocator and the global `kmalloc` heap built on top of it.
//!
//! Each [`Cache`] hands out fixed-size objects carved out of whole pages ("slabs") obtained from
//! [`super::zone`]. A slab's own control block (the bufctl free-list head and occupancy counters)
//! is written directly into the first bytes of the slab's own page rather than allocated
//! separately: a separate allocation would have to come from `kmalloc` itself, and the very first
//! `kmalloc` call that needs a new slab would recurse into `grow()` before the cache that serves
//! it exists. Embedding the header sidesteps that bootstrap order entirely.
//!
//! [`kmalloc`]/[`kfree`] sit on top of a fixed ladder of power-of-two caches and are what
//! `#[global_allocator]` ultimately calls through.

use super::zone::{self, ZoneType};
use super::PAGE_SIZE;
use utils::errno::{AllocError, AllocResult};
use utils::lock::IntMutex;

/// Smallest and largest object sizes `kmalloc` services directly; anything bigger is rounded up
/// to whole pages and allocated straight from the zone layer.
const MIN_SHIFT: u32 = 5; // 32 bytes
const MAX_SHIFT: u32 = 11; // 2048 bytes
const KMALLOC_CACHES: usize = (MAX_SHIFT - MIN_SHIFT + 1) as usize;

/// An in-slab bufctl: the free list threaded through unused objects.
#[repr(C)]
struct Bufctl {
	next: u32,
}

const BUFCTL_NIL: u32 = u32::MAX;

/// A slab's control block, embedded at the start of the slab's own page(s).
///
/// Lives entirely inside memory obtained from [`zone::alloc`]; never touches `kmalloc`.
#[repr(C)]
struct SlabHeader {
	next: *mut SlabHeader,
	free_head: u32,
	free_count: u32,
	/// Kept for future occupancy reporting; not yet read anywhere.
	#[allow(dead_code)]
	total_count: u32,
}

/// A cache of same-sized objects.
///
/// Slabs are kept in a single list regardless of fill level: with objects as small as these,
/// scanning for one with a free slot is cheap, and it avoids the bookkeeping of shuffling slabs
/// between full/partial lists on every alloc/free.
pub struct Cache {
	obj_size: usize,
	objs_per_slab: u32,
	slab_order: u32,
	/// Byte offset from the start of a slab's page to its first object, past [`SlabHeader`],
	/// rounded up to an `obj_size` boundary so the embedded bufctl links stay aligned.
	data_offset: usize,
	/// Head of the slab list, or null if this cache hasn't grown yet.
	slabs: *mut SlabHeader,
}

// `Cache` owns its slabs exclusively through a raw pointer into memory it allocated itself; no
// other thread of control can reach the same pages, so moving a `Cache` across the `IntMutex` it
// lives behind is as sound as moving any other heap-owning type.
unsafe impl Send for Cache {}

impl Cache {
	const fn new(obj_size: usize) -> Self {
		Self {
			obj_size,
			objs_per_slab: 0,
			slab_order: 0,
			data_offset: 0,
			slabs: core::ptr::null_mut(),
		}
	}

	fn ensure_sized(&mut self) {
		if self.objs_per_slab != 0 {
			return;
		}
		self.data_offset = core::mem::size_of::<SlabHeader>().div_ceil(self.obj_size) * self.obj_size;
		let mut order = 0;
		loop {
			let usable = (PAGE_SIZE << order) as usize - self.data_offset;
			let count = usable / self.obj_size;
			if count >= 8 || order >= 3 {
				self.slab_order = order;
				self.objs_per_slab = count as u32;
				return;
			}
			order += 1;
		}
	}

	fn grow(&mut self) -> AllocResult<()> {
		self.ensure_sized();
		let phys = zone::alloc(ZoneType::Low, self.slab_order)?;
		let base: *mut u8 = phys.kernel_to_virtual().as_ptr();
		let header = base as *mut SlabHeader;
		unsafe {
			header.write(SlabHeader {
				next: self.slabs,
				free_head: 0,
				free_count: self.objs_per_slab,
				total_count: self.objs_per_slab,
			});
		}
		// Thread the free list through the raw objects themselves, past the header.
		let data = unsafe { base.add(self.data_offset) };
		for i in 0..self.objs_per_slab {
			let obj = unsafe { data.add(i as usize * self.obj_size) } as *mut Bufctl;
			let next = if i + 1 < self.objs_per_slab {
				i + 1
			} else {
				BUFCTL_NIL
			};
			unsafe { core::ptr::write_unaligned(obj, Bufctl { next }) };
		}
		self.slabs = header;
		Ok(())
	}

	fn has_free_slab(&self) -> bool {
		let mut cur = self.slabs;
		while !cur.is_null() {
			let slab = unsafe { &*cur };
			if slab.free_count > 0 {
				return true;
			}
			cur = slab.next;
		}
		false
	}

	fn alloc(&mut self) -> AllocResult<*mut u8> {
		if !self.has_free_slab() {
			self.grow()?;
		}
		let mut cur = self.slabs;
		while !cur.is_null() {
			let slab = unsafe { &mut *cur };
			if slab.free_count > 0 {
				let idx = slab.free_head;
				let data = unsafe { (cur as *mut u8).add(self.data_offset) };
				let obj = unsafe { data.add(idx as usize * self.obj_size) };
				let bufctl = unsafe { core::ptr::read_unaligned(obj as *const Bufctl) };
				slab.free_head = bufctl.next;
				slab.free_count -= 1;
				return Ok(obj);
			}
			cur = slab.next;
		}
		Err(AllocError)
	}

	/// Frees `ptr`, which must have come from this cache's [`Self::alloc`].
	fn free(&mut self, ptr: *mut u8) {
		let mut cur = self.slabs;
		let span = (PAGE_SIZE << self.slab_order) as isize - self.data_offset as isize;
		while !cur.is_null() {
			let slab = unsafe { &mut *cur };
			let data = unsafe { (cur as *mut u8).add(self.data_offset) };
			let offset = ptr as isize - data as isize;
			if offset >= 0 && offset < span {
				let idx = (offset as usize / self.obj_size) as u32;
				let bufctl = ptr as *mut Bufctl;
				unsafe {
					core::ptr::write_unaligned(
						bufctl,
						Bufctl {
							next: slab.free_head,
						},
					)
				};
				slab.free_head = idx;
				slab.free_count += 1;
				return;
			}
			cur = slab.next;
		}
	}
}

struct KmallocHeap {
	caches: [Cache; KMALLOC_CACHES],
}

static HEAP: IntMutex<Option<KmallocHeap>> = IntMutex::new(None);

/// Initializes the `kmalloc` cache ladder. Must run after [`super::zone::init`].
pub fn init() {
	let mut heap = HEAP.lock();
	*heap = Some(KmallocHeap {
		caches: core::array::from_fn(|i| Cache::new(1usize << (MIN_SHIFT as usize + i))),
	});
}

fn cache_index_for(size: usize) -> Option<usize> {
	let size = size.max(1 << MIN_SHIFT);
	let shift = usize::BITS - (size - 1).leading_zeros();
	if shift > MAX_SHIFT {
		None
	} else {
		Some((shift.max(MIN_SHIFT) - MIN_SHIFT) as usize)
	}
}

/// Allocates `size` bytes from the kmalloc heap.
///
/// Requests larger than the largest cache bucket go straight to the zone layer as a whole-page
/// run; this core has no consumer that needs objects bigger than 2 KiB from a cache, so nothing
/// in between is implemented.
pub fn kmalloc(size: usize) -> AllocResult<*mut u8> {
	if size == 0 {
		return Err(AllocError);
	}
	match cache_index_for(size) {
		Some(idx) => {
			let mut heap = HEAP.lock();
			let heap = heap.as_mut().expect("slab heap not initialized");
			heap.caches[idx].alloc()
		}
		None => {
			let pages = size.div_ceil(PAGE_SIZE);
			let order = 32 - (pages as u32 - 1).leading_zeros();
			let addr = zone::alloc(ZoneType::Low, order)?;
			Ok(addr.kernel_to_virtual().as_ptr())
		}
	}
}

/// Frees a block obtained from [`kmalloc`] of the given `size`.
///
/// The caller must know the original size, as this allocator keeps no out-of-band size tag:
/// tracking it would cost a header on every single allocation, and every caller here already
/// knows what it asked for.
pub fn kfree(ptr: *mut u8, size: usize) {
	match cache_index_for(size) {
		Some(idx) => {
			let mut heap = HEAP.lock();
			let heap = heap.as_mut().expect("slab heap not initialized");
			heap.caches[idx].free(ptr);
		}
		None => {
			let pages = size.div_ceil(PAGE_SIZE);
			let order = 32 - (pages as u32 - 1).leading_zeros();
			let virt = super::VirtAddr(ptr as usize);
			zone::free(ZoneType::Low, virt.kernel_to_physical(), order);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn cache_index_buckets() {
		assert_eq!(cache_index_for(1), Some(0));
		assert_eq!(cache_index_for(32), Some(0));
		assert_eq!(cache_index_for(33), Some(1));
		assert_eq!(cache_index_for(2048), Some(KMALLOC_CACHES - 1));
		assert_eq!(cache_index_for(2049), None);
	}

	#[test_case]
	fn grow_never_recurses_through_kmalloc() {
		// `Cache::grow` must source its slab pages from `zone::alloc` directly, never from
		// `kmalloc` (which would recurse back into `grow` on the first call). Exercising a cache
		// through several allocations that force at least one `grow` call is as close as this
		// module can get to testing that property without a full boot environment: a regression
		// back to a `Box`-backed slab header would overflow the stack here instead of returning.
		let mut cache = Cache::new(64);
		let mut objs = alloc::vec::Vec::new();
		for _ in 0..40 {
			objs.push(cache.alloc().expect("cache alloc"));
		}
		for obj in objs {
			cache.free(obj);
		}
	}
}
