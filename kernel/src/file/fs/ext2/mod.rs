/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! A read-only ext2 reader (§4.8): superblock and group descriptor parsing, 128-byte on-disk
//! inodes, and direct + single-indirect block reading. Double and triple indirect blocks are not
//! implemented — a file needing them trips the `unimplemented!` in [`Ext2Fs::resolve_block`], a
//! deliberate limit rather than a silent truncation.

pub mod initrd;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use utils::errno::{errno, EResult};

use crate::file::vfs::{Inode, InodeOps, InodeType, Superblock};

const EXT2_MAGIC: u16 = 0xEF53;
const ROOT_INO: u32 = 2;

fn read_u16(buf: &[u8], off: usize) -> u16 {
	u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}
fn read_u32(buf: &[u8], off: usize) -> u32 {
	u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

/// A group descriptor table entry, the fields this reader needs.
struct GroupDesc {
	inode_table: u32,
}

/// A mounted, read-only ext2 image.
pub struct Ext2Fs {
	image: Vec<u8>,
	block_size: u32,
	inodes_per_group: u32,
	groups: Vec<GroupDesc>,
	dev: u32,
}

impl Ext2Fs {
	/// Parses `image` (the raw contents of an ext2-formatted block device or, for this core, an
	/// in-memory initrd) as an ext2 filesystem.
	pub fn parse(image: Vec<u8>, dev: u32) -> EResult<Self> {
		if image.len() < 1024 + 84 {
			return Err(errno!(EINVAL));
		}
		let sb = &image[1024..];
		let magic = read_u16(sb, 56);
		if magic != EXT2_MAGIC {
			return Err(errno!(EINVAL));
		}
		let log_block_size = read_u32(sb, 24);
		let block_size = 1024u32 << log_block_size;
		let blocks_count = read_u32(sb, 4);
		let blocks_per_group = read_u32(sb, 32);
		let inodes_per_group = read_u32(sb, 40);
		let group_count = blocks_count.div_ceil(blocks_per_group) as usize;

		let gdt_block = if block_size == 1024 { 2 } else { 1 };
		let gdt_offset = gdt_block as usize * block_size as usize;
		let mut groups = Vec::with_capacity(group_count);
		for i in 0..group_count {
			let base = gdt_offset + i * 32;
			if base + 4 > image.len() {
				return Err(errno!(EINVAL));
			}
			groups.push(GroupDesc {
				inode_table: read_u32(&image, base + 8),
			});
		}

		Ok(Self {
			image,
			block_size,
			inodes_per_group,
			groups,
			dev,
		})
	}

	fn block_offset(&self, block: u32) -> usize {
		block as usize * self.block_size as usize
	}

	fn read_block(&self, block: u32) -> &[u8] {
		let off = self.block_offset(block);
		&self.image[off..off + self.block_size as usize]
	}

	fn read_raw_inode(&self, ino: u32) -> EResult<RawInode> {
		if ino == 0 {
			return Err(errno!(EINVAL));
		}
		let index = (ino - 1) % self.inodes_per_group;
		let group = (ino - 1) / self.inodes_per_group;
		let group = self.groups.get(group as usize).ok_or(errno!(EINVAL))?;
		let inode_size = 128;
		let offset =
			self.block_offset(group.inode_table) + index as usize * inode_size;
		if offset + inode_size > self.image.len() {
			return Err(errno!(EINVAL));
		}
		Ok(RawInode::parse(&self.image[offset..offset + inode_size]))
	}

	/// Reads `len` bytes of inode `ino`'s data starting at `offset`, following direct and
	/// single-indirect block pointers.
	fn read_inode_data(&self, raw: &RawInode, offset: u64, buf: &mut [u8]) -> EResult<usize> {
		let bs = self.block_size as u64;
		let mut total = 0usize;
		while total < buf.len() {
			let file_pos = offset + total as u64;
			if file_pos >= raw.size {
				break;
			}
			let block_idx = file_pos / bs;
			let block_off = (file_pos % bs) as usize;
			let phys_block = self.resolve_block(raw, block_idx)?;
			let chunk_len = (bs as usize - block_off).min(buf.len() - total).min((raw.size - file_pos) as usize);
			if phys_block == 0 {
				for b in &mut buf[total..total + chunk_len] {
					*b = 0;
				}
			} else {
				let block_data = self.read_block(phys_block);
				buf[total..total + chunk_len]
					.copy_from_slice(&block_data[block_off..block_off + chunk_len]);
			}
			total += chunk_len;
		}
		Ok(total)
	}

	fn resolve_block(&self, raw: &RawInode, block_idx: u64) -> EResult<u32> {
		const DIRECT_COUNT: u64 = 12;
		let ptrs_per_block = self.block_size as u64 / 4;
		if block_idx < DIRECT_COUNT {
			return Ok(raw.block[block_idx as usize]);
		}
		let indirect_idx = block_idx - DIRECT_COUNT;
		if indirect_idx < ptrs_per_block {
			let indirect_block = raw.block[12];
			if indirect_block == 0 {
				return Ok(0);
			}
			let table = self.read_block(indirect_block);
			let off = indirect_idx as usize * 4;
			return Ok(read_u32(table, off));
		}
		unimplemented!("ext2 double/triple indirect blocks are not supported by this core");
	}
}

struct RawInode {
	mode: u16,
	size: u64,
	block: [u32; 15],
}

impl RawInode {
	fn parse(raw: &[u8]) -> Self {
		let mode = read_u16(raw, 0);
		let size_lo = read_u32(raw, 4) as u64;
		let size_hi = read_u32(raw, 108) as u64;
		let mut block = [0u32; 15];
		for (i, slot) in block.iter_mut().enumerate() {
			*slot = read_u32(raw, 40 + i * 4);
		}
		Self {
			mode,
			size: size_lo | (size_hi << 32),
			block,
		}
	}

	fn kind(&self) -> InodeType {
		match self.mode & 0xF000 {
			0x4000 => InodeType::Directory,
			0x2000 => InodeType::CharDevice,
			0x6000 => InodeType::BlockDevice,
			0xA000 => InodeType::Symlink,
			_ => InodeType::Regular,
		}
	}
}

/// [`Superblock`] is implemented on a handle wrapping `Arc<Ext2Fs>` (rather than on `Ext2Fs`
/// directly) so every inode's `ops` can hold a strong reference back to the filesystem without
/// borrowing it.
pub struct Ext2Handle(pub Arc<Ext2Fs>);

impl Superblock for Ext2Handle {
	fn root_ino(&self) -> u32 {
		ROOT_INO
	}

	fn dev(&self) -> u32 {
		self.0.dev
	}

	fn read_inode(&self, ino: u32) -> EResult<Inode> {
		let raw = self.0.read_raw_inode(ino)?;
		let kind = raw.kind();
		// Device-special files encode their (major, minor) in `i_block[0]`, per the historical
		// ext2 on-disk format: low byte minor, next byte major.
		let rdev = match kind {
			InodeType::CharDevice | InodeType::BlockDevice => {
				let packed = raw.block[0];
				((packed >> 8) & 0xFF, packed & 0xFF)
			}
			_ => (0, 0),
		};
		Ok(Inode {
			dev: self.0.dev,
			ino,
			kind,
			size: raw.size,
			rdev,
			ops: Arc::new(Ext2InodeOps {
				fs: self.0.clone(),
				raw_block: raw.block,
			}),
		})
	}
}

struct Ext2InodeOps {
	fs: Arc<Ext2Fs>,
	raw_block: [u32; 15],
}

impl InodeOps for Ext2InodeOps {
	fn read(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> EResult<usize> {
		if matches!(inode.kind, InodeType::CharDevice | InodeType::BlockDevice) {
			return crate::device::read(inode.rdev.0, inode.rdev.1, offset, buf);
		}
		let raw = RawInode {
			mode: 0,
			size: inode.size,
			block: self.raw_block,
		};
		self.fs.read_inode_data(&raw, offset, buf)
	}

	fn write(&self, inode: &Inode, offset: u64, buf: &[u8]) -> EResult<usize> {
		if matches!(inode.kind, InodeType::CharDevice | InodeType::BlockDevice) {
			return crate::device::write(inode.rdev.0, inode.rdev.1, offset, buf);
		}
		Err(errno!(EROFS))
	}

	fn lookup(&self, inode: &Inode, name: &str) -> EResult<u32> {
		if inode.kind != InodeType::Directory {
			return Err(errno!(ENOTDIR));
		}
		let mut idx = 0;
		loop {
			match self.readdir(inode, idx)? {
				Some((entry_name, ino)) if entry_name == name => return Ok(ino),
				Some(_) => idx += 1,
				None => return Err(errno!(ENOENT)),
			}
		}
	}

	fn readdir(&self, inode: &Inode, index: usize) -> EResult<Option<(String, u32)>> {
		let raw = RawInode {
			mode: 0,
			size: inode.size,
			block: self.raw_block,
		};
		let mut buf = alloc::vec![0u8; inode.size as usize];
		self.fs.read_inode_data(&raw, 0, &mut buf)?;
		let mut pos = 0usize;
		let mut seen = 0usize;
		while pos + 8 <= buf.len() {
			let ino = read_u32(&buf, pos);
			let rec_len = read_u16(&buf, pos + 4) as usize;
			let name_len = buf[pos + 6] as usize;
			if rec_len == 0 {
				break;
			}
			if ino != 0 {
				if seen == index {
					let name = String::from_utf8_lossy(&buf[pos + 8..pos + 8 + name_len]).into_owned();
					return Ok(Some((name, ino)));
				}
				seen += 1;
			}
			pos += rec_len;
		}
		Ok(None)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn rejects_bad_magic() {
		let image = alloc::vec![0u8; 2048];
		assert!(Ext2Fs::parse(image, 1).is_err());
	}
}
