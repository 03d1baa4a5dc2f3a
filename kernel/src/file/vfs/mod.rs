/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! The virtual filesystem layer: one mounted [`Superblock`], an inode cache keyed by `(dev, ino)`,
//! and `/`-relative path resolution.
//!
//! Device nodes (`InodeType::CharDevice`/`BlockDevice`) are backed by [`crate::device`] rather
//! than by the mounted filesystem's own I/O path — their `ops` forwards reads/writes to the
//! device dispatch table keyed by the inode's `rdev`.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use utils::errno::{errno, EResult};
use utils::lock::IntMutex;

/// What kind of object an inode names.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InodeType {
	Regular,
	Directory,
	CharDevice,
	BlockDevice,
	Fifo,
	Symlink,
}

/// The operations a filesystem (or the device layer, for device-special inodes) implements.
///
/// Object-safe so a [`Superblock`] can return a trait object per inode without knowing the
/// concrete filesystem type at the VFS layer.
pub trait InodeOps: Send + Sync {
	/// Reads up to `buf.len()` bytes starting at `offset`, returning the count actually read (0 at
	/// EOF).
	fn read(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> EResult<usize>;

	/// Writes `buf` at `offset`. Filesystems that are read-only (ext2, in this core) return
	/// `EROFS`; device nodes forward to their device's write path.
	fn write(&self, inode: &Inode, offset: u64, buf: &[u8]) -> EResult<usize> {
		let _ = (inode, offset, buf);
		Err(errno!(EROFS))
	}

	/// Looks up `name` in the directory `inode`, returning its inode number.
	fn lookup(&self, inode: &Inode, name: &str) -> EResult<u32> {
		let _ = (inode, name);
		Err(errno!(ENOTDIR))
	}

	/// Returns the `index`-th directory entry `(name, ino)`, or `None` past the last entry.
	fn readdir(&self, inode: &Inode, index: usize) -> EResult<Option<(String, u32)>> {
		let _ = (inode, index);
		Err(errno!(ENOTDIR))
	}
}

/// A cached inode.
pub struct Inode {
	pub dev: u32,
	pub ino: u32,
	pub kind: InodeType,
	pub size: u64,
	/// For device-special inodes: the (major, minor) pair identifying the device.
	pub rdev: (u32, u32),
	pub ops: Arc<dyn InodeOps>,
}

/// A mounted filesystem.
pub trait Superblock: Send + Sync {
	/// Inode number of the filesystem's root directory.
	fn root_ino(&self) -> u32;

	/// Reads inode `ino` from backing storage (or returns it from the filesystem's own cache; the
	/// VFS-level cache in this module is keyed separately).
	fn read_inode(&self, ino: u32) -> EResult<Inode>;

	/// The device number this superblock is mounted as, for inode-cache keying.
	fn dev(&self) -> u32;
}

struct Mount {
	sb: Arc<dyn Superblock>,
}

static MOUNT: IntMutex<Option<Mount>> = IntMutex::new(None);
static INODE_CACHE: IntMutex<BTreeMap<(u32, u32), Arc<Inode>>> = IntMutex::new(BTreeMap::new());

/// Mounts `sb` as the (sole) root filesystem.
pub fn init(sb: Arc<dyn Superblock>) {
	*MOUNT.lock() = Some(Mount { sb });
}

fn root_sb() -> Arc<dyn Superblock> {
	MOUNT.lock().as_ref().expect("no filesystem mounted").sb.clone()
}

/// Fetches inode `ino`, populating the cache on a miss.
pub fn get_inode(ino: u32) -> EResult<Arc<Inode>> {
	let sb = root_sb();
	let key = (sb.dev(), ino);
	if let Some(cached) = INODE_CACHE.lock().get(&key) {
		return Ok(cached.clone());
	}
	let inode = Arc::new(sb.read_inode(ino)?);
	INODE_CACHE.lock().insert(key, inode.clone());
	Ok(inode)
}

/// Resolves an absolute path to its inode, walking one path component at a time through each
/// directory's `lookup`.
///
/// Relative paths are resolved against the root, since this core has no per-task working
/// directory lookup wired into path resolution yet beyond what `chdir`/`getcwd` track on the task
/// (§4.8); callers that need cwd-relative resolution prepend it before calling.
pub fn namei(path: &str) -> EResult<Arc<Inode>> {
	let sb = root_sb();
	let mut current = get_inode(sb.root_ino())?;
	for component in path.split('/').filter(|c| !c.is_empty()) {
		if current.kind != InodeType::Directory {
			return Err(errno!(ENOTDIR));
		}
		let child_ino = current.ops.lookup(&current, component)?;
		current = get_inode(child_ino)?;
	}
	Ok(current)
}

/// Reads an inode's entire contents into a freshly allocated buffer.
///
/// Used by `execve` to load a program image; not suitable for device-special inodes whose `size`
/// is meaningless (a real `read(2)` on those instead reads via [`InodeOps::read`] directly with a
/// caller-sized buffer).
pub fn read_whole(inode: &Arc<Inode>) -> EResult<Vec<u8>> {
	let mut buf = alloc::vec![0u8; inode.size as usize];
	let mut offset = 0u64;
	while (offset as usize) < buf.len() {
		let n = inode.ops.read(inode, offset, &mut buf[offset as usize..])?;
		if n == 0 {
			break;
		}
		offset += n as u64;
	}
	buf.truncate(offset as usize);
	Ok(buf)
}

/// A file descriptor's open-file state: the inode it refers to plus a private seek offset.
pub struct OpenFile {
	pub inode: Arc<Inode>,
	pub offset: u64,
}

impl OpenFile {
	/// Opens `path`, failing with `ENOENT` if it does not resolve.
	pub fn open(path: &str) -> EResult<Self> {
		Ok(Self {
			inode: namei(path)?,
			offset: 0,
		})
	}

	/// Reads into `buf` at the current offset, advancing it by the amount read.
	pub fn read(&mut self, buf: &mut [u8]) -> EResult<usize> {
		let n = self.inode.ops.read(&self.inode, self.offset, buf)?;
		self.offset += n as u64;
		Ok(n)
	}

	/// Writes `buf` at the current offset, advancing it by the amount written.
	pub fn write(&mut self, buf: &[u8]) -> EResult<usize> {
		let n = self.inode.ops.write(&self.inode, self.offset, buf)?;
		self.offset += n as u64;
		Ok(n)
	}

	/// Repositions the file offset; `whence` follows `lseek(2)`'s `SEEK_SET`/`CUR`/`END` (0/1/2).
	pub fn seek(&mut self, offset: i64, whence: u32) -> EResult<u64> {
		let base = match whence {
			0 => 0,
			1 => self.offset,
			2 => self.inode.size,
			_ => return Err(errno!(EINVAL)),
		};
		let new_offset = base as i64 + offset;
		if new_offset < 0 {
			return Err(errno!(EINVAL));
		}
		self.offset = new_offset as u64;
		Ok(self.offset)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// A tiny in-memory filesystem standing in for the real ext2 reader, just rich enough to drive
	/// `namei`'s path-walking loop and the inode cache: a flat `ino -> (kind, children-or-data)`
	/// table, with inode 1 as the root directory.
	#[derive(Clone)]
	struct FakeFs {
		entries: Arc<BTreeMap<u32, FakeInode>>,
	}

	#[derive(Clone)]
	enum FakeInode {
		Dir(Vec<(String, u32)>),
		File(Vec<u8>),
	}

	impl FakeFs {
		fn new() -> Self {
			let mut entries = BTreeMap::new();
			entries.insert(1, FakeInode::Dir(alloc::vec![(String::from("file.txt"), 2)]));
			entries.insert(2, FakeInode::File(b"hello".to_vec()));
			Self { entries: Arc::new(entries) }
		}
	}

	impl Superblock for FakeFs {
		fn root_ino(&self) -> u32 {
			1
		}

		fn read_inode(&self, ino: u32) -> EResult<Inode> {
			let entry = self.entries.get(&ino).ok_or(errno!(ENOENT))?;
			let (kind, size) = match entry {
				FakeInode::Dir(_) => (InodeType::Directory, 0),
				FakeInode::File(data) => (InodeType::Regular, data.len() as u64),
			};
			Ok(Inode {
				dev: self.dev(),
				ino,
				kind,
				size,
				rdev: (0, 0),
				ops: Arc::new(self.clone()),
			})
		}

		fn dev(&self) -> u32 {
			99
		}
	}

	impl InodeOps for FakeFs {
		fn read(&self, inode: &Inode, offset: u64, buf: &mut [u8]) -> EResult<usize> {
			let Some(FakeInode::File(data)) = self.entries.get(&inode.ino) else {
				return Err(errno!(EISDIR));
			};
			let start = offset as usize;
			if start >= data.len() {
				return Ok(0);
			}
			let n = buf.len().min(data.len() - start);
			buf[..n].copy_from_slice(&data[start..start + n]);
			Ok(n)
		}

		fn lookup(&self, inode: &Inode, name: &str) -> EResult<u32> {
			let Some(FakeInode::Dir(children)) = self.entries.get(&inode.ino) else {
				return Err(errno!(ENOTDIR));
			};
			children
				.iter()
				.find(|(n, _)| n == name)
				.map(|(_, ino)| *ino)
				.ok_or(errno!(ENOENT))
		}
	}

	fn mount_fake() {
		init(Arc::new(FakeFs::new()));
	}

	#[test_case]
	fn namei_walks_path_components_to_a_file() {
		mount_fake();
		let inode = namei("/file.txt").expect("resolves");
		assert_eq!(inode.kind, InodeType::Regular);
		assert_eq!(inode.size, 5);
	}

	#[test_case]
	fn namei_on_missing_component_is_enoent() {
		mount_fake();
		assert_eq!(namei("/nope").err(), Some(errno!(ENOENT)));
	}

	#[test_case]
	fn read_whole_returns_full_file_contents() {
		mount_fake();
		let inode = namei("/file.txt").expect("resolves");
		let data = read_whole(&inode).expect("read");
		assert_eq!(&data, b"hello");
	}
}
