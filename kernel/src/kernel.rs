/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! beeos is a small Unix-like kernel core written in Rust: a buddy/slab memory stack, recursive
//! page-directory virtual memory, a preemptive round-robin scheduler with POSIX signals, and a
//! read-only ext2 reader.
//!
//! This crate implements only the core: the boot trampoline, interrupt controller setup and
//! device drivers are external collaborators whose contract is stated at the edges of each
//! module.

#![no_std]
#![cfg_attr(not(test), no_main)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::selftest::runner)]
#![reexport_test_harness_main = "kernel_selftest"]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(internal_features)]
#![allow(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[macro_use]
pub mod print;
pub mod arch;
pub mod debug;
pub mod device;
pub mod elf;
pub mod file;
pub mod logger;
pub mod memory;
pub mod panic;
pub mod process;
pub mod selftest;
pub mod syscall;
pub mod time;
pub mod tty;

pub use utils;
use utils::errno::EResult;

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The path of the init program, loaded from the initrd's root directory.
pub const INIT_PATH: &[u8] = b"/bin/sh";

/// Runs kernel initialization and spawns the init task.
///
/// Called once by the boot stub (§6) after it has set up the initial identity-mapped page
/// directory, installed the GDT/IDT/PIC and handed off the memory map and initrd location. Never
/// returns on success: control transfers to the init task on first return to user mode.
pub fn kernel_main(
	memmap: &memory::memmap::MemoryMap,
	boot_dir: memory::PhysAddr,
	initrd: &[u8],
) -> ! {
	println!("{NAME} {VERSION} booting");
	memory::init(memmap);
	memory::vmem::init(boot_dir);
	time::init();
	tty::init();
	let root_device = file::fs::ext2::initrd::mount(initrd).unwrap_or_else(|e| {
		panic!("failed to mount initrd: {e:?}");
	});
	file::vfs::init(root_device);
	process::init();
	match process::exec::spawn_init(INIT_PATH) {
		Ok(()) => unreachable!("spawn_init does not return on success"),
		Err(e) => panic!("failed to spawn init: {e:?}"),
	}
}

/// Re-export for modules that need a crate-wide fallible-path alias without importing `utils`
/// directly.
pub type KResult<T> = EResult<T>;
