/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Mounts the boot-provided initrd image as the root filesystem.
//!
//! The boot stub (§6) hands the kernel a raw byte range holding an ext2 image; there is no block
//! device underneath it, so this just copies it into a heap buffer `Ext2Fs` can index directly.

use alloc::sync::Arc;
use utils::errno::EResult;

use super::{Ext2Fs, Ext2Handle};
use crate::file::vfs::Superblock;

/// The device number assigned to the initrd mount. Only one filesystem is ever mounted (§4.8
/// non-goal on multiple mounts), so this is a fixed constant rather than an allocator.
const INITRD_DEV: u32 = 1;

/// Parses `image` and returns it as a mountable [`Superblock`].
pub fn mount(image: &[u8]) -> EResult<Arc<dyn Superblock>> {
	let fs = Ext2Fs::parse(image.to_vec(), INITRD_DEV)?;
	Ok(Arc::new(Ext2Handle(Arc::new(fs))))
}
