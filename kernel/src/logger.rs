/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Kernel logging.
//!
//! The logger is a ring buffer of raw bytes, not a structured record type: early boot code runs
//! before the slab allocator is up, so the log sink cannot itself allocate. Unless muted, every
//! line is additionally echoed to the currently active TTY (§4.9).

use core::cmp::{min, Ordering};
use core::fmt;
use core::fmt::Write;
use utils::lock::IntMutex;

/// The size of the kernel logs ring buffer, in bytes.
const LOGS_SIZE: usize = 64 * 1024;

/// The kernel's logger.
pub static LOGGER: IntMutex<Logger> = IntMutex::new(Logger::new());

/// Kernel logger, storing and optionally echoing kernel logs.
pub struct Logger {
	/// If set, log lines are kept in the ring buffer but not echoed to the active TTY.
	pub silent: bool,
	buf: [u8; LOGS_SIZE],
	read_head: usize,
	write_head: usize,
}

impl Logger {
	/// Creates a new, empty logger.
	pub const fn new() -> Self {
		Self {
			silent: false,
			buf: [0; LOGS_SIZE],
			read_head: 0,
			write_head: 0,
		}
	}

	/// Returns the number of free bytes left in the ring buffer.
	fn available_space(&self) -> usize {
		match self.write_head.cmp(&self.read_head) {
			Ordering::Equal => self.buf.len(),
			Ordering::Greater => self.buf.len() - (self.write_head - self.read_head),
			Ordering::Less => self.read_head - self.write_head - 1,
		}
	}

	/// Returns the full backing buffer, for `/proc`-style log dumping.
	pub fn get_content(&self) -> &[u8] {
		&self.buf
	}

	/// Appends `s` to the ring buffer, evicting the oldest lines if needed.
	pub fn push(&mut self, s: &[u8]) {
		if self.available_space() < s.len() {
			self.pop(s.len() - self.available_space());
		}
		let len = min(self.available_space(), s.len());
		let end = (self.write_head + len) % self.buf.len();
		if end < self.write_head {
			let tail = self.buf.len() - self.write_head;
			self.buf[self.write_head..].copy_from_slice(&s[..tail]);
			self.buf[..end].copy_from_slice(&s[tail..len]);
		} else {
			self.buf[self.write_head..end].copy_from_slice(&s[..len]);
		}
		self.write_head = end;
	}

	/// Evicts at least `n` bytes, rounding up to a full line so log output never starts
	/// mid-line.
	fn pop(&mut self, n: usize) {
		let read_new = (self.read_head + n) % self.buf.len();
		if read_new >= self.write_head && read_new < self.read_head {
			self.read_head = self.write_head;
			return;
		}
		let mut i = 0;
		while i < self.buf.len() {
			let off = (read_new + i) % self.buf.len();
			if off == self.write_head || self.buf[off] == b'\n' {
				break;
			}
			i += 1;
		}
		self.read_head = (read_new + i) % self.buf.len();
	}
}

impl Write for Logger {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.push(s.as_bytes());
		if !self.silent {
			crate::tty::write_active(s.as_bytes());
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn wraps_without_panicking() {
		let mut log = Logger::new();
		for _ in 0..(LOGS_SIZE / 4) {
			log.push(b"0123456789\n");
		}
		assert!(log.get_content().len() == LOGS_SIZE);
	}
}
