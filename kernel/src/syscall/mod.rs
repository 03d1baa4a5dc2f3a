/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Syscall dispatch.
//!
//! A syscall enters through the (external, §6) `int 0x80`/`sysenter` stub, which packs the
//! syscall number and up to six `u32` arguments into a [`Args`] and calls [`dispatch`]. The
//! return value is a signed 32-bit integer: non-negative on success, `-errno` on failure,
//! matching the raw Linux syscall ABI this core's libc (outside this repo's scope) expects.

use utils::errno::{errno, Errno};

#[cfg(feature = "strace")]
mod strace;

/// Syscall numbers, assigned in the same order `entry.S`-style stubs would expect them (§6 owns
/// the actual trap gate; this is just the lookup key).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Syscall {
	Exit = 1,
	Fork = 2,
	Read = 3,
	Write = 4,
	Open = 5,
	Close = 6,
	Waitpid = 7,
	Execve = 11,
	Chdir = 12,
	Lseek = 19,
	Getpid = 20,
	Kill = 37,
	Dup = 41,
	Getppid = 64,
	Setpgid = 57,
	Getpgrp = 65,
	Setuid = 23,
	Sigaction = 67,
	Sigprocmask = 126,
	Nanosleep = 162,
	Brk = 45,
	Getcwd = 183,
	Fstat = 108,
	Mknod = 14,
	Tcsetpgrp = 201,
	Tcgetpgrp = 202,
	Sigsuspend = 72,
	/// Resumes the trap frame a signal handler was dispatched from, restoring `Task::saved_frame`.
	/// Numbered to match the Linux x86 `rt_sigreturn` slot since this core's trampoline bytes
	/// (`arch::TrapFrame::push_signal_frame`) encode this constant directly.
	Sigreturn = 173,
}

impl Syscall {
	fn from_number(n: u32) -> Option<Self> {
		use Syscall::*;
		const ALL: &[Syscall] = &[
			Exit, Fork, Read, Write, Open, Close, Waitpid, Execve, Chdir, Lseek, Getpid, Kill, Dup,
			Getppid, Setpgid, Getpgrp, Setuid, Sigaction, Sigprocmask, Nanosleep, Brk, Getcwd,
			Fstat, Mknod, Tcsetpgrp, Tcgetpgrp, Sigsuspend, Sigreturn,
		];
		ALL.iter().copied().find(|s| *s as u32 == n)
	}
}

/// Raw syscall arguments, as handed off by the trap stub.
#[derive(Clone, Copy, Debug, Default)]
pub struct Args {
	pub a0: u32,
	pub a1: u32,
	pub a2: u32,
	pub a3: u32,
	pub a4: u32,
	pub a5: u32,
}

mod handlers;

/// Dispatches one syscall, returning the raw ABI return value (`-errno` encoded as a negative
/// `i32` on failure).
///
/// `frame` is the trap frame the `int 0x80`/`sysenter` stub (§6) was entered with; `execve` and
/// `sigreturn` rewrite it directly so the handlers that implement them need more than the plain
/// `Args` every other syscall gets by with.
pub fn dispatch(number: u32, args: Args, frame: &mut crate::arch::TrapFrame) -> i32 {
	#[cfg(feature = "strace")]
	strace::enter(number, &args);

	let result = match Syscall::from_number(number) {
		Some(sys) => handlers::handle(sys, args, frame),
		None => Err(errno!(ENOSYS)),
	};

	#[cfg(feature = "strace")]
	strace::exit(number, &result);

	match result {
		Ok(value) => value,
		Err(e) => -(e.0),
	}
}

/// The common result type syscall handlers return before being folded into the raw ABI value.
pub type SyscallResult = Result<i32, Errno>;

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn unknown_syscall_number_is_enosys() {
		let mut frame = crate::arch::TrapFrame::default();
		assert_eq!(dispatch(0xffff, Args::default(), &mut frame), -(Errno::ENOSYS.0));
	}

	#[test_case]
	fn getpid_matches_current_pid() {
		let mut frame = crate::arch::TrapFrame::default();
		let got = dispatch(Syscall::Getpid as u32, Args::default(), &mut frame);
		assert_eq!(got, crate::process::current_pid().0 as i32);
	}
}
