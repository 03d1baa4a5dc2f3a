/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Syscall tracing, enabled by the `strace` feature. Logs entry and exit through the kernel
//! logger rather than a dedicated ring buffer, so it shows up interleaved with everything else.

use super::{Args, SyscallResult};

pub fn enter(number: u32, args: &Args) {
	crate::println!(
		"strace: syscall {number}({:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}) = ?",
		args.a0,
		args.a1,
		args.a2,
		args.a3,
		args.a4,
		args.a5,
	);
}

pub fn exit(number: u32, result: &SyscallResult) {
	match result {
		Ok(value) => crate::println!("strace: syscall {number} = {value}"),
		Err(e) => crate::println!("strace: syscall {number} = -{} ({e:?})", e.0),
	}
}
