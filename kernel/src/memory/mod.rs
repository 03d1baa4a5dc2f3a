/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Physical and virtual memory management.
//!
//! The system's virtual address space is split in two: userspace below [`KVBASE`], shared by
//! nothing but the currently running task, and kernelspace above it, whose mappings are kept
//! identical across every live page directory (§4.4).

pub mod buddy;
pub mod memmap;
pub mod slab;
pub mod vmem;
pub mod zone;

use core::alloc::{GlobalAlloc, Layout};
use core::fmt;
use core::ops::{Add, Deref, DerefMut, Sub};

/// The size of a memory page/frame, in bytes.
pub const PAGE_SIZE: usize = utils::limits::PAGE_SIZE;

/// The address of the start of kernelspace.
///
/// Below this address, mappings belong to the currently running task's address space and are
/// torn down and rebuilt on every `fork`/`execve`. At and above it, mappings are shared by
/// reference across every live task (§4.4 invariant on directory entries 768..1021).
pub const KVBASE: VirtAddr = VirtAddr(0xC000_0000);

/// A physical memory address.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PhysAddr(pub usize);

/// A virtual memory address.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VirtAddr(pub usize);

macro_rules! addr_impl {
	($name:ident) => {
		impl $name {
			/// Returns whether the address is aligned to `align` (which must be a power of two).
			pub fn is_aligned_to(self, align: usize) -> bool {
				self.0 & (align - 1) == 0
			}

			/// Rounds the address down to the previous multiple of `align`.
			pub fn down_align_to(self, align: usize) -> Self {
				Self(self.0 & !(align - 1))
			}

			/// Rounds the address up to the next multiple of `align`.
			pub fn align_to(self, align: usize) -> Self {
				Self((self.0 + align - 1) & !(align - 1))
			}

			/// Returns a raw pointer at this address.
			pub fn as_ptr<T>(self) -> *mut T {
				self.0 as *mut T
			}
		}

		impl Deref for $name {
			type Target = usize;
			fn deref(&self) -> &usize {
				&self.0
			}
		}

		impl DerefMut for $name {
			fn deref_mut(&mut self) -> &mut usize {
				&mut self.0
			}
		}

		impl Add<usize> for $name {
			type Output = Self;
			fn add(self, rhs: usize) -> Self {
				Self(self.0.wrapping_add(rhs))
			}
		}

		impl Sub<usize> for $name {
			type Output = Self;
			fn sub(self, rhs: usize) -> Self {
				Self(self.0.wrapping_sub(rhs))
			}
		}

		impl fmt::Debug for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{:#010x}", self.0)
			}
		}
	};
}

addr_impl!(PhysAddr);
addr_impl!(VirtAddr);

impl PhysAddr {
	/// Converts a physical address to its permanent virtual mapping in kernelspace.
	///
	/// The boot stub identity-maps all of physical RAM at `KVBASE` (§6), so this is a pure offset.
	pub fn kernel_to_virtual(self) -> VirtAddr {
		VirtAddr(self.0 + *KVBASE)
	}
}

impl VirtAddr {
	/// Converts a kernelspace virtual address back to its physical address.
	///
	/// Panics if `self` is not within the permanent kernel mapping.
	pub fn kernel_to_physical(self) -> PhysAddr {
		PhysAddr(self.0.checked_sub(*KVBASE).expect("not a kernel address"))
	}
}

/// Initializes the physical memory subsystem (zones, buddy allocators) from the boot-provided
/// memory map.
///
/// Must run before any other subsystem allocates memory.
pub fn init(memmap: &memmap::MemoryMap) {
	zone::init(memmap);
	slab::init();
	zone::init_refcounts();
}

/// Routes `alloc`-crate allocations (`Box`, `Vec`, the slab cache's own `Slab` nodes, ...) through
/// [`slab::kmalloc`]/[`slab::kfree`].
///
/// Alignment above the requested size is handled by rounding the request up, since every
/// `kmalloc` bucket is itself a power of two and therefore naturally aligned to its own size.
struct KernelAllocator;

#[global_allocator]
static ALLOCATOR: KernelAllocator = KernelAllocator;

unsafe impl GlobalAlloc for KernelAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		let size = layout.size().max(layout.align());
		slab::kmalloc(size).unwrap_or(core::ptr::null_mut())
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		let size = layout.size().max(layout.align());
		slab::kfree(ptr, size);
	}
}
