/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Device I/O dispatch by major number.
//!
//! A device-special inode's `rdev` is `(major, minor)`; [`read`]/[`write`] route to the handler
//! registered for `major`, passing `minor` through so a single handler can serve a family of
//! devices (every tty, every ramdisk slot, ...).

use utils::errno::{errno, EResult};

/// Major number for tty devices (`/dev/tty*`, `/dev/console`).
pub const MAJOR_TTY: u32 = 4;
/// Major number for the in-memory ramdisk device this core backs the initrd with conceptually;
/// the initrd itself is mounted directly from a byte range (see `file::fs::ext2::initrd`) rather
/// than through this path, but other ramdisk-backed nodes a running system creates go through it.
pub const MAJOR_RAMDISK: u32 = 1;

/// Reads `buf.len()` bytes from `(major, minor)` at `offset`, returning the count read.
pub fn read(major: u32, minor: u32, offset: u64, buf: &mut [u8]) -> EResult<usize> {
	match major {
		MAJOR_TTY => crate::tty::device_read(minor, buf),
		MAJOR_RAMDISK => ramdisk::read(minor, offset, buf),
		_ => Err(errno!(ENXIO)),
	}
}

/// Writes `buf` to `(major, minor)` at `offset`, returning the count written.
pub fn write(major: u32, minor: u32, offset: u64, buf: &[u8]) -> EResult<usize> {
	match major {
		MAJOR_TTY => crate::tty::device_write(minor, buf),
		MAJOR_RAMDISK => ramdisk::write(minor, offset, buf),
		_ => Err(errno!(ENXIO)),
	}
}

mod ramdisk {
	use alloc::collections::BTreeMap;
	use alloc::vec::Vec;
	use utils::errno::{errno, EResult};
	use utils::lock::IntMutex;

	static DISKS: IntMutex<BTreeMap<u32, Vec<u8>>> = IntMutex::new(BTreeMap::new());

	pub fn read(minor: u32, offset: u64, buf: &mut [u8]) -> EResult<usize> {
		let disks = DISKS.lock();
		let disk = disks.get(&minor).ok_or(errno!(ENXIO))?;
		let start = offset as usize;
		if start >= disk.len() {
			return Ok(0);
		}
		let n = buf.len().min(disk.len() - start);
		buf[..n].copy_from_slice(&disk[start..start + n]);
		Ok(n)
	}

	pub fn write(minor: u32, offset: u64, buf: &[u8]) -> EResult<usize> {
		let mut disks = DISKS.lock();
		let disk = disks.entry(minor).or_default();
		let start = offset as usize;
		if disk.len() < start + buf.len() {
			disk.resize(start + buf.len(), 0);
		}
		disk[start..start + buf.len()].copy_from_slice(buf);
		Ok(buf.len())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn unknown_major_is_enxio() {
		let mut buf = [0u8; 4];
		assert_eq!(read(0xff, 0, 0, &mut buf), Err(errno!(ENXIO)));
		assert_eq!(write(0xff, 0, 0, &[1, 2, 3]), Err(errno!(ENXIO)));
	}

	#[test_case]
	fn ramdisk_write_then_read_roundtrips() {
		let minor = 77;
		let written = write(MAJOR_RAMDISK, minor, 0, b"hello world").expect("write");
		assert_eq!(written, 11);
		let mut buf = [0u8; 5];
		let n = read(MAJOR_RAMDISK, minor, 6, &mut buf).expect("read");
		assert_eq!(n, 5);
		assert_eq!(&buf, b"world");
	}

	#[test_case]
	fn ramdisk_read_past_end_returns_zero() {
		let minor = 78;
		write(MAJOR_RAMDISK, minor, 0, b"abc").expect("write");
		let mut buf = [0u8; 4];
		let n = read(MAJOR_RAMDISK, minor, 100, &mut buf).expect("read");
		assert_eq!(n, 0);
	}
}
