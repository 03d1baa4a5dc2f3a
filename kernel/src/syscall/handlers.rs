/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Per-syscall handler bodies, one function per [`super::Syscall`] variant.
//!
//! Handlers read their arguments straight out of [`super::Args`] and return [`super::SyscallResult`];
//! `dispatch` folds `Err` into the negative-`errno` ABI value. Pointer arguments are user-space
//! addresses handed over as raw `u32`s — validating that they actually lie in the calling task's
//! mapped user half is a `copy_from_user`/`copy_to_user` concern (§6, an external collaborator
//! pairing with the trap stub) this module assumes has already happened by the time a `&[u8]`/`&str`
//! reaches these functions in a real build; here each `as_user_slice` helper stands in for that
//! boundary so the rest of the dispatch logic reads the way it would once it's wired up.

use alloc::string::String;
use alloc::sync::Arc;
use utils::errno::{errno, EResult};
use utils::lock::IntMutex;

use crate::file::vfs::OpenFile;
use crate::process::signal::{SigAction, Signal, SignalHandler, SigSet};
use crate::process::{self, Pid};

use super::{Args, Syscall, SyscallResult};

/// Interprets `ptr`/`len` as a byte slice in the caller's address space.
///
/// # Safety
///
/// The real trap-stub boundary (§6) is responsible for ensuring `ptr..ptr+len` lies within the
/// calling task's mapped, readable user half before a syscall handler ever runs; this wrapper
/// exists so that boundary has a single, auditable call site rather than every handler doing its
/// own pointer arithmetic.
unsafe fn user_slice<'a>(ptr: u32, len: u32) -> &'a [u8] {
	core::slice::from_raw_parts(ptr as *const u8, len as usize)
}

/// Interprets `ptr`/`len` as a mutable byte slice in the caller's address space. See
/// [`user_slice`].
unsafe fn user_slice_mut<'a>(ptr: u32, len: u32) -> &'a mut [u8] {
	core::slice::from_raw_parts_mut(ptr as *mut u8, len as usize)
}

/// Interprets `ptr`/`len` as a UTF-8 path string. Non-UTF-8 input is reported as `EINVAL`, this
/// core having no notion of opaque byte-string paths.
unsafe fn user_str<'a>(ptr: u32, len: u32) -> EResult<&'a str> {
	core::str::from_utf8(user_slice(ptr, len)).map_err(|_| errno!(EINVAL))
}

pub fn handle(sys: Syscall, args: Args, frame: &mut crate::arch::TrapFrame) -> SyscallResult {
	match sys {
		Syscall::Exit => sys_exit(args),
		Syscall::Fork => sys_fork(),
		Syscall::Read => sys_read(args),
		Syscall::Write => sys_write(args),
		Syscall::Open => sys_open(args),
		Syscall::Close => sys_close(args),
		Syscall::Waitpid => sys_waitpid(args),
		Syscall::Execve => sys_execve(args, frame),
		Syscall::Chdir => sys_chdir(args),
		Syscall::Lseek => sys_lseek(args),
		Syscall::Getpid => sys_getpid(),
		Syscall::Kill => sys_kill(args),
		Syscall::Dup => sys_dup(args),
		Syscall::Getppid => sys_getppid(),
		Syscall::Setpgid => sys_setpgid(args),
		Syscall::Getpgrp => sys_getpgrp(),
		Syscall::Setuid => sys_setuid(args),
		Syscall::Sigaction => sys_sigaction(args),
		Syscall::Sigprocmask => sys_sigprocmask(args),
		Syscall::Nanosleep => sys_nanosleep(args),
		Syscall::Brk => sys_brk(args),
		Syscall::Getcwd => sys_getcwd(args),
		Syscall::Fstat => sys_fstat(args),
		Syscall::Mknod => sys_mknod(args),
		Syscall::Tcsetpgrp => sys_tcsetpgrp(args),
		Syscall::Tcgetpgrp => sys_tcgetpgrp(),
		Syscall::Sigsuspend => sys_sigsuspend(args),
		Syscall::Sigreturn => sys_sigreturn(frame),
	}
}

fn sys_exit(args: Args) -> SyscallResult {
	process::exit(args.a0 as i32);
}

fn sys_fork() -> SyscallResult {
	Ok(process::fork()?.0 as i32)
}

fn fd_table_get(task: &process::Task, fd: u32) -> EResult<Arc<IntMutex<OpenFile>>> {
	task.fds
		.get(fd as usize)
		.and_then(|slot| slot.clone())
		.ok_or(errno!(EBADF))
}

fn sys_read(args: Args) -> SyscallResult {
	let buf = unsafe { user_slice_mut(args.a1, args.a2) };
	let file = process::with_current(|task| fd_table_get(task, args.a0))?;
	let n = file.lock().read(buf)?;
	Ok(n as i32)
}

fn sys_write(args: Args) -> SyscallResult {
	let buf = unsafe { user_slice(args.a1, args.a2) };
	let file = process::with_current(|task| fd_table_get(task, args.a0))?;
	let n = file.lock().write(buf)?;
	Ok(n as i32)
}

fn sys_open(args: Args) -> SyscallResult {
	let path = unsafe { user_str(args.a0, args.a1)? };
	let file = OpenFile::open(path)?;
	process::with_current(|task| {
		let slot = task
			.fds
			.iter_mut()
			.position(|f| f.is_none())
			.ok_or(errno!(EMFILE))?;
		task.fds[slot] = Some(Arc::new(IntMutex::new(file)));
		Ok(slot as i32)
	})
}

fn sys_close(args: Args) -> SyscallResult {
	process::with_current(|task| {
		let slot = task.fds.get_mut(args.a0 as usize).ok_or(errno!(EBADF))?;
		if slot.take().is_none() {
			return Err(errno!(EBADF));
		}
		Ok(0)
	})
}

/// `waitpid(2)`'s `WNOHANG`.
const WNOHANG: u32 = 1;

fn sys_waitpid(args: Args) -> SyscallResult {
	let raw_pid = args.a0 as i32;
	let target = match raw_pid {
		0 | -1 => None,
		p if p > 0 => Some(Pid(p as u32)),
		_ => return Err(errno!(EINVAL)),
	};
	let nohang = args.a2 & WNOHANG != 0;
	let reaped = process::waitpid(target, nohang)?;
	let Some((pid, status)) = reaped else {
		return Ok(0);
	};
	if args.a1 != 0 {
		let status_buf = unsafe { user_slice_mut(args.a1, 4) };
		status_buf.copy_from_slice(&status.to_le_bytes());
	}
	Ok(pid.0 as i32)
}

fn sys_execve(args: Args, frame: &mut crate::arch::TrapFrame) -> SyscallResult {
	let path = unsafe { user_str(args.a0, args.a1)? };
	process::exec::execve(path, &[path])?;
	let (entry, esp) = process::with_current(|task| task.exec_entry.take()).ok_or(errno!(EINVAL))?;
	frame.eip = entry as u32;
	frame.user_esp = esp as u32;
	Ok(0)
}

fn sys_sigreturn(frame: &mut crate::arch::TrapFrame) -> SyscallResult {
	let restored = process::with_current(|task| task.saved_frame.take()).ok_or(errno!(EINVAL))?;
	let original_eax = restored.eax;
	*frame = restored;
	Ok(original_eax as i32)
}

fn sys_chdir(args: Args) -> SyscallResult {
	let path = unsafe { user_str(args.a0, args.a1)? };
	let inode = crate::file::vfs::namei(path)?;
	if inode.kind != crate::file::vfs::InodeType::Directory {
		return Err(errno!(ENOTDIR));
	}
	process::with_current(|task| task.cwd = String::from(path));
	Ok(0)
}

fn sys_lseek(args: Args) -> SyscallResult {
	let file = process::with_current(|task| fd_table_get(task, args.a0))?;
	let offset = args.a1 as i32 as i64;
	let new_offset = file.lock().seek(offset, args.a2)?;
	Ok(new_offset as i32)
}

fn sys_getpid() -> SyscallResult {
	Ok(process::current_pid().0 as i32)
}

fn sys_kill(args: Args) -> SyscallResult {
	let signal = Signal::from_number(args.a1 as u8).ok_or(errno!(EINVAL))?;
	process::kill(Pid(args.a0), signal)?;
	Ok(0)
}

fn sys_dup(args: Args) -> SyscallResult {
	process::with_current(|task| {
		let file = fd_table_get(task, args.a0)?;
		let slot = task
			.fds
			.iter_mut()
			.position(|f| f.is_none())
			.ok_or(errno!(EMFILE))?;
		task.fds[slot] = Some(file);
		Ok(slot as i32)
	})
}

fn sys_getppid() -> SyscallResult {
	Ok(process::with_current(|task| task.ppid.0) as i32)
}

fn sys_setpgid(args: Args) -> SyscallResult {
	let target = if args.a0 == 0 { process::current_pid() } else { Pid(args.a0) };
	let pgid = if args.a1 == 0 { target } else { Pid(args.a1) };
	process::with_task(target, |task| task.pgid = pgid).ok_or(errno!(ESRCH))?;
	Ok(0)
}

fn sys_getpgrp() -> SyscallResult {
	Ok(process::with_current(|task| task.pgid.0) as i32)
}

/// `setuid(2)`'s BSD saved-set-uid semantics: a privileged caller (`euid == 0`) sets the real,
/// effective and saved uid together; an unprivileged caller may only move its effective uid to a
/// value it could always move back from, i.e. its current real or saved uid.
fn sys_setuid(args: Args) -> SyscallResult {
	let new_uid = args.a0;
	process::with_current(|task| {
		let creds = &mut task.creds;
		if creds.euid == 0 {
			creds.uid = new_uid;
			creds.euid = new_uid;
			creds.suid = new_uid;
		} else if new_uid == creds.uid || new_uid == creds.suid {
			creds.euid = new_uid;
		} else {
			return Err(errno!(EPERM));
		}
		Ok(0)
	})
}

fn sys_sigaction(args: Args) -> SyscallResult {
	let signal = Signal::from_number(args.a0 as u8).ok_or(errno!(EINVAL))?;
	let handler = match args.a1 {
		0 => SignalHandler::Default,
		1 => SignalHandler::Ignore,
		entry => SignalHandler::Handler(entry as usize),
	};
	process::with_current(|task| {
		task.sigactions[signal as usize] = SigAction {
			handler,
			mask: SigSet::empty(),
		};
	});
	Ok(0)
}

fn sys_sigprocmask(args: Args) -> SyscallResult {
	const SIG_BLOCK: u32 = 0;
	const SIG_UNBLOCK: u32 = 1;
	const SIG_SETMASK: u32 = 2;
	let how = args.a0;
	let new_bits = args.a1;
	process::with_current(|task| {
		let mut raw = task.sigmask;
		match how {
			SIG_BLOCK => {
				for n in 1u8..=22 {
					if new_bits & (1 << n) != 0 {
						if let Some(s) = Signal::from_number(n) {
							raw.insert(s);
						}
					}
				}
			}
			SIG_UNBLOCK => {
				for n in 1u8..=22 {
					if new_bits & (1 << n) != 0 {
						if let Some(s) = Signal::from_number(n) {
							raw.remove(s);
						}
					}
				}
			}
			SIG_SETMASK => {
				raw = SigSet::empty();
				for n in 1u8..=22 {
					if new_bits & (1 << n) != 0 {
						if let Some(s) = Signal::from_number(n) {
							raw.insert(s);
						}
					}
				}
			}
			_ => return Err(errno!(EINVAL)),
		}
		task.sigmask = raw;
		Ok(0)
	})
}

fn sys_nanosleep(args: Args) -> SyscallResult {
	let ms = args.a0 as u64 * 1000 + (args.a1 as u64) / 1_000_000;
	let ticks = crate::time::ms_to_ticks(ms);
	let wake_at = crate::time::ticks() + ticks;
	crate::time::timer::schedule(process::current_pid(), wake_at);
	process::scheduler::block_current();
	Ok(0)
}

fn sys_brk(_args: Args) -> SyscallResult {
	// This core's user-space heap is grown by `mmap`-style segment loading at `execve` time (§4.7);
	// dynamic `brk` growth is not implemented, matching the Non-goal on a user-space allocator.
	Err(errno!(ENOSYS))
}

fn sys_getcwd(args: Args) -> SyscallResult {
	let buf = unsafe { user_slice_mut(args.a0, args.a1) };
	process::with_current(|task| {
		let bytes = task.cwd.as_bytes();
		if bytes.len() >= buf.len() {
			return Err(errno!(ERANGE));
		}
		buf[..bytes.len()].copy_from_slice(bytes);
		buf[bytes.len()] = 0;
		Ok(bytes.len() as i32)
	})
}

fn sys_fstat(args: Args) -> SyscallResult {
	let file = process::with_current(|task| fd_table_get(task, args.a0))?;
	let guard = file.lock();
	let stat_buf = unsafe { user_slice_mut(args.a1, 20) };
	stat_buf[0..4].copy_from_slice(&guard.inode.dev.to_le_bytes());
	stat_buf[4..8].copy_from_slice(&guard.inode.ino.to_le_bytes());
	stat_buf[8..16].copy_from_slice(&guard.inode.size.to_le_bytes());
	stat_buf[16..20].copy_from_slice(&(guard.inode.kind as u32).to_le_bytes());
	Ok(0)
}

fn sys_mknod(args: Args) -> SyscallResult {
	let _path = unsafe { user_str(args.a0, args.a1)? };
	// Node creation requires a writable filesystem; this core's only mounted filesystem (ext2, read
	// via `file::fs::ext2`) is read-only, matching the Non-goal on filesystem mutation.
	Err(errno!(EROFS))
}

fn sys_tcsetpgrp(args: Args) -> SyscallResult {
	crate::tty::set_fg_pgrp(args.a0, Pid(args.a1))?;
	Ok(0)
}

fn sys_tcgetpgrp() -> SyscallResult {
	Ok(crate::tty::fg_pgrp(0)?.0 as i32)
}

fn sys_sigsuspend(args: Args) -> SyscallResult {
	let mask_bits = args.a0;
	let saved = process::with_current(|task| {
		let saved = task.sigmask;
		task.sigmask = SigSet::empty();
		for n in 1u8..=22 {
			if mask_bits & (1 << n) != 0 {
				if let Some(s) = Signal::from_number(n) {
					task.sigmask.insert(s);
				}
			}
		}
		saved
	});
	process::scheduler::block_current();
	process::with_current(|task| task.sigmask = saved);
	Err(errno!(EINTR))
}

#[cfg(test)]
mod test {
	use super::*;

	fn with_restored_creds(f: impl FnOnce()) {
		let before = process::with_current(|t| t.creds);
		f();
		process::with_current(|t| t.creds = before);
	}

	#[test_case]
	fn setuid_privileged_sets_all_three() {
		with_restored_creds(|| {
			process::with_current(|t| t.creds = process::Credentials::new(0, 0));
			let args = Args { a0: 42, ..Args::default() };
			assert_eq!(sys_setuid(args), Ok(0));
			let creds = process::with_current(|t| t.creds);
			assert_eq!((creds.uid, creds.euid, creds.suid), (42, 42, 42));
		});
	}

	#[test_case]
	fn setuid_unprivileged_to_saved_uid_only_moves_euid() {
		with_restored_creds(|| {
			process::with_current(|t| {
				t.creds = process::Credentials {
					uid: 1000,
					euid: 1000,
					suid: 0,
					gid: 1000,
					egid: 1000,
					sgid: 1000,
				}
			});
			let args = Args { a0: 0, ..Args::default() };
			assert_eq!(sys_setuid(args), Ok(0));
			let creds = process::with_current(|t| t.creds);
			assert_eq!(creds.uid, 1000);
			assert_eq!(creds.euid, 0);
		});
	}

	#[test_case]
	fn setuid_unprivileged_to_arbitrary_uid_is_eperm() {
		with_restored_creds(|| {
			process::with_current(|t| t.creds = process::Credentials::new(1000, 1000));
			let args = Args { a0: 7, ..Args::default() };
			assert_eq!(sys_setuid(args), Err(errno!(EPERM)));
		});
	}

	#[test_case]
	fn sigreturn_without_a_saved_frame_is_einval() {
		let mut frame = crate::arch::TrapFrame::default();
		assert_eq!(sys_sigreturn(&mut frame), Err(errno!(EINVAL)));
	}

	#[test_case]
	fn sigreturn_restores_the_saved_frame() {
		let saved = crate::arch::TrapFrame { eax: 99, eip: 0x1000, ..Default::default() };
		process::with_current(|t| t.saved_frame = Some(saved));
		let mut frame = crate::arch::TrapFrame { eip: 0x2000, ..Default::default() };
		assert_eq!(sys_sigreturn(&mut frame), Ok(99));
		assert_eq!(frame.eip, 0x1000);
		assert!(process::with_current(|t| t.saved_frame.is_none()));
	}
}
