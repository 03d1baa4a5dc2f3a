/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Kernel panic handling.
//!
//! A panic here is reserved for conditions classified in §7 as *programming invariants*: mapping
//! an address that is already mapped writable, walking off the end of ext2's supported indirect
//! block depth, running out of memory while resolving a kernel-space page fault. None of these are
//! recoverable, so the handler halts the machine after dumping a stack trace.

use crate::{arch, debug, logger::LOGGER, println};
use core::panic::PanicInfo;

#[panic_handler]
fn panic_handler(info: &PanicInfo) -> ! {
	arch::cli();
	LOGGER.lock().silent = false;
	println!("-- KERNEL PANIC --");
	println!("{info}");
	debug::print_callstack();
	println!("-- end trace --");
	arch::halt_loop()
}
