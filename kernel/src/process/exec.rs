/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! `execve`: replaces a task's address space and register state with a freshly loaded ELF binary.

use alloc::vec::Vec;
use utils::errno::{errno, EResult};

use crate::elf;
use crate::file::vfs;
use crate::memory::vmem::{AddressSpace, Flags};
use crate::memory::{VirtAddr, PAGE_SIZE};

/// Top of the user stack, one page below kernelspace so a stack overflow faults instead of
/// silently corrupting the first kernel mapping.
const USER_STACK_TOP: usize = 0xBFFF_F000;
/// Default stack size reserved for a freshly exec'd task.
const USER_STACK_PAGES: usize = 64;

/// Replaces the current task's address space with the program at `path`, passing `argv`.
///
/// On success this never returns to the caller in the traditional sense: the trap frame is
/// rewritten to enter the new program's entry point on return to user mode. That rewrite is
/// deferred to whatever drains `task.exec_entry` on the way back to user space (the syscall-return
/// path, §6); this function's job ends at computing `(entry, esp)` and storing it there.
pub fn execve(path: &str, argv: &[&str]) -> EResult<()> {
	let inode = vfs::namei(path)?;
	let data = vfs::read_whole(&inode)?;
	let image = elf::Image::parse(&data).map_err(|_| errno!(ENOEXEC))?;

	let space = AddressSpace::new().map_err(|_| errno!(ENOMEM))?;
	for segment in image.loadable_segments() {
		load_segment(&space, &data, segment)?;
	}

	let mut esp = USER_STACK_TOP;
	for i in 0..USER_STACK_PAGES {
		let frame = crate::memory::zone::alloc(crate::memory::zone::ZoneType::Low, 0)
			.map_err(|_| errno!(ENOMEM))?;
		let virt_base = USER_STACK_TOP - (i + 1) * PAGE_SIZE;
		if i == 0 {
			let page: &mut [u8] =
				unsafe { core::slice::from_raw_parts_mut(frame.kernel_to_virtual().as_ptr(), PAGE_SIZE) };
			page.fill(0);
			let offset = layout_argv(page, virt_base, argv).ok_or(errno!(E2BIG))?;
			esp = virt_base + offset;
		}
		space
			.map(VirtAddr(virt_base), frame, Flags::PRESENT | Flags::WRITE | Flags::USER)
			.map_err(|_| errno!(ENOMEM))?;
	}

	crate::process::with_current(|task| {
		task.address_space = alloc::sync::Arc::new(space);
		task.exec_entry = Some((image.entry as usize, esp));
	});
	Ok(())
}

/// Writes argc/argv/the argument strings themselves into `page`, the highest page of a fresh user
/// stack, following the usual cdecl `_start` convention: strings at the top, a NUL-terminated
/// pointer array below them, `argc` at the very bottom.
///
/// `page_virt_base` is the virtual address `page[0]` will be mapped at, needed so the pointers
/// written into the `argv` array are valid once the page is actually mapped into the task. Returns
/// the byte offset within `page` of the resulting stack pointer (pointing at `argc`), or `None` if
/// `argv` doesn't fit in one page.
fn layout_argv(page: &mut [u8], page_virt_base: usize, argv: &[&str]) -> Option<usize> {
	let mut cursor = page.len();
	let mut str_offsets = Vec::with_capacity(argv.len());
	for s in argv.iter().rev() {
		let bytes = s.as_bytes();
		let len = bytes.len() + 1;
		cursor = cursor.checked_sub(len)?;
		page[cursor..cursor + bytes.len()].copy_from_slice(bytes);
		page[cursor + bytes.len()] = 0;
		str_offsets.push(cursor);
	}
	str_offsets.reverse();

	cursor &= !0x3;
	let ptr_array_len = (argv.len() + 1) * 4;
	cursor = cursor.checked_sub(ptr_array_len)?;
	let ptr_array = cursor;
	for (i, &off) in str_offsets.iter().enumerate() {
		let ptr = (page_virt_base + off) as u32;
		page[ptr_array + i * 4..ptr_array + i * 4 + 4].copy_from_slice(&ptr.to_le_bytes());
	}
	page[ptr_array + argv.len() * 4..ptr_array + argv.len() * 4 + 4].copy_from_slice(&0u32.to_le_bytes());

	cursor = cursor.checked_sub(4)?;
	page[cursor..cursor + 4].copy_from_slice(&(argv.len() as u32).to_le_bytes());
	Some(cursor)
}

fn load_segment(space: &AddressSpace, data: &[u8], segment: elf::ProgramHeader) -> EResult<()> {
	let page_count = (segment.mem_size as usize).div_ceil(PAGE_SIZE);
	for i in 0..page_count {
		let frame = crate::memory::zone::alloc(crate::memory::zone::ZoneType::Low, 0)
			.map_err(|_| errno!(ENOMEM))?;
		let dst: *mut u8 = frame.kernel_to_virtual().as_ptr();
		unsafe { core::ptr::write_bytes(dst, 0, PAGE_SIZE) };
		let file_off = segment.offset as usize + i * PAGE_SIZE;
		let copy_len = (segment.file_size as usize).saturating_sub(i * PAGE_SIZE).min(PAGE_SIZE);
		if copy_len > 0 && file_off < data.len() {
			let available = (data.len() - file_off).min(copy_len);
			unsafe {
				core::ptr::copy_nonoverlapping(data[file_off..].as_ptr(), dst, available);
			}
		}
		let mut flags = Flags::PRESENT | Flags::USER;
		if segment.writable {
			flags |= Flags::WRITE;
		}
		let virt = VirtAddr(segment.vaddr as usize + i * PAGE_SIZE);
		space.map(virt, frame, flags).map_err(|_| errno!(ENOMEM))?;
	}
	Ok(())
}

/// Spawns the init task (pid 1): forks the idle task and execs `path` in the child.
pub fn spawn_init(path: &[u8]) -> EResult<()> {
	let path = core::str::from_utf8(path).map_err(|_| errno!(EINVAL))?;
	let _pid = crate::process::fork()?;
	execve(path, &[path])
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn layout_argv_places_argc_argv_and_strings() {
		let mut page = [0u8; PAGE_SIZE];
		let base = 0xBFFF_E000;
		let esp = layout_argv(&mut page, base, &["/bin/sh", "-c", "ls"]).expect("fits in one page");
		let read_u32 = |off: usize| u32::from_le_bytes(page[off..off + 4].try_into().unwrap());
		let argc = read_u32(esp);
		assert_eq!(argc, 3);
		let argv_ptr = |i: usize| read_u32(esp + 4 + i * 4) as usize - base;
		let read_cstr = |off: usize| {
			let end = page[off..].iter().position(|&b| b == 0).unwrap();
			core::str::from_utf8(&page[off..off + end]).unwrap()
		};
		assert_eq!(read_cstr(argv_ptr(0)), "/bin/sh");
		assert_eq!(read_cstr(argv_ptr(1)), "-c");
		assert_eq!(read_cstr(argv_ptr(2)), "ls");
		assert_eq!(read_u32(esp + 4 + 3 * 4), 0);
	}

	#[test_case]
	fn layout_argv_rejects_oversized_argv() {
		let mut page = [0u8; PAGE_SIZE];
		let huge = alloc::string::String::from_utf8(alloc::vec![b'a'; PAGE_SIZE]).unwrap();
		assert_eq!(layout_argv(&mut page, 0, &[huge.as_str()]), None);
	}
}
