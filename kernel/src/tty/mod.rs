/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! TTY devices: a canonical-mode line discipline over a small set of virtual consoles, with one
//! active at a time (switched the way a real VGA-console kernel switches which console receives
//! keyboard input and framebuffer writes).
//!
//! The keyboard IRQ and VGA text-mode writes themselves are external collaborators (§6); this
//! module owns the line-editing state machine driven by [`input_char`] and the read-side blocking
//! queue consumed by `read(2)` on a tty device node.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use utils::errno::{errno, EResult};
use utils::lock::IntMutex;

bitflags::bitflags! {
	/// The subset of `termios` local-mode flags this line discipline honors.
	#[derive(Clone, Copy, Debug, Eq, PartialEq)]
	pub struct LFlags: u32 {
		/// Enable canonical (line-buffered) input.
		const ICANON = 1 << 0;
		/// Echo input characters back.
		const ECHO = 1 << 1;
		/// Echo the erase character by actually erasing on the display, not just printing it.
		const ECHOE = 1 << 2;
		/// Echo newline even when ECHO is off.
		const ECHONL = 1 << 3;
		/// Generate signals on INTR/QUIT/SUSP.
		const ISIG = 1 << 4;
	}
}

/// Special control characters, indexed the way `termios.c_cc` is.
#[derive(Clone, Copy, Debug)]
pub struct ControlChars {
	pub intr: u8,
	pub eof: u8,
	pub erase: u8,
	pub quit: u8,
}

impl Default for ControlChars {
	fn default() -> Self {
		Self {
			intr: 0x03,  // ^C
			eof: 0x04,   // ^D
			erase: 0x7f, // DEL
			quit: 0x1c,  // ^\
		}
	}
}

/// A console's window size, as reported by `TIOCGWINSZ`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WinSize {
	pub rows: u16,
	pub cols: u16,
}

/// One virtual console's line-discipline state.
pub struct Tty {
	lflags: LFlags,
	cc: ControlChars,
	winsize: WinSize,
	/// The current, not-yet-terminated input line being edited.
	editing: Vec<u8>,
	/// Completed lines (or raw bytes, outside canonical mode) ready for `read`.
	ready: VecDeque<u8>,
	/// Foreground process group allowed to read/write without `SIGTTIN`/`SIGTTOU` (§4.8).
	pub fg_pgrp: crate::process::Pid,
}

impl Tty {
	fn new() -> Self {
		Self {
			lflags: LFlags::ICANON | LFlags::ECHO | LFlags::ECHOE | LFlags::ISIG,
			cc: ControlChars::default(),
			winsize: WinSize { rows: 25, cols: 80 },
			editing: Vec::new(),
			ready: VecDeque::new(),
			fg_pgrp: crate::process::Pid(0),
		}
	}

	/// Feeds one input byte through the line discipline (called from the keyboard IRQ path).
	pub fn input_char(&mut self, c: u8) {
		if self.lflags.contains(LFlags::ISIG) && (c == self.cc.intr || c == self.cc.quit) {
			let signal = if c == self.cc.intr {
				crate::process::signal::Signal::Int
			} else {
				crate::process::signal::Signal::Quit
			};
			let _ = crate::process::kill(self.fg_pgrp, signal);
			return;
		}
		if !self.lflags.contains(LFlags::ICANON) {
			self.ready.push_back(c);
			self.echo(c);
			return;
		}
		if c == self.cc.erase {
			if self.editing.pop().is_some() && self.lflags.contains(LFlags::ECHOE) {
				self.raw_echo(&[0x08, b' ', 0x08]);
			}
			return;
		}
		if c == b'\n' || c == self.cc.eof {
			if c == b'\n' {
				self.editing.push(c);
			}
			self.ready.extend(self.editing.drain(..));
			if c == b'\n' {
				self.echo(c);
			}
			return;
		}
		self.editing.push(c);
		self.echo(c);
	}

	fn echo(&self, c: u8) {
		if self.lflags.contains(LFlags::ECHO) || (c == b'\n' && self.lflags.contains(LFlags::ECHONL)) {
			self.raw_echo(&[c]);
		}
	}

	fn raw_echo(&self, bytes: &[u8]) {
		display_write(bytes);
	}

	/// Reads up to `buf.len()` completed bytes, returning 0 if nothing is ready yet (callers loop
	/// through [`crate::process::scheduler::block_current`] rather than this module blocking
	/// directly, keeping this a pure data-structure operation).
	fn read_ready(&mut self, buf: &mut [u8]) -> usize {
		let n = buf.len().min(self.ready.len());
		for slot in buf.iter_mut().take(n) {
			*slot = self.ready.pop_front().unwrap();
		}
		n
	}

	pub fn winsize(&self) -> WinSize {
		self.winsize
	}
}

const CONSOLE_COUNT: usize = 4;

struct Consoles {
	ttys: [Tty; CONSOLE_COUNT],
	active: usize,
}

static CONSOLES: IntMutex<Option<Consoles>> = IntMutex::new(None);

/// Initializes the virtual consoles, with console 0 active.
pub fn init() {
	*CONSOLES.lock() = Some(Consoles {
		ttys: core::array::from_fn(|_| Tty::new()),
		active: 0,
	});
}

/// Switches the active console (as a `Ctrl-Alt-Fn` handler would call this).
pub fn switch(index: usize) {
	if index < CONSOLE_COUNT {
		if let Some(consoles) = CONSOLES.lock().as_mut() {
			consoles.active = index;
		}
	}
}

/// Runs `f` against the currently active console.
fn with_active<R>(f: impl FnOnce(&mut Tty) -> R) -> R {
	let mut consoles = CONSOLES.lock();
	let consoles = consoles.as_mut().expect("tty not initialized");
	let active = consoles.active;
	f(&mut consoles.ttys[active])
}

/// Runs `f` against console `minor`, if it exists.
fn with_console<R>(minor: u32, f: impl FnOnce(&mut Tty) -> R) -> EResult<R> {
	let mut consoles = CONSOLES.lock();
	let consoles = consoles.as_mut().expect("tty not initialized");
	consoles
		.ttys
		.get_mut(minor as usize)
		.map(f)
		.ok_or(errno!(ENXIO))
}

/// Called by the keyboard IRQ handler with each scancode-translated byte.
pub fn input_char(c: u8) {
	with_active(|tty| tty.input_char(c));
}

/// `read(2)` on a tty device node.
pub fn device_read(minor: u32, buf: &mut [u8]) -> EResult<usize> {
	with_console(minor, |tty| tty.read_ready(buf))
}

/// `write(2)` on a tty device node: bytes go straight to the display, bypassing line discipline
/// (which only applies to input).
pub fn device_write(minor: u32, buf: &[u8]) -> EResult<usize> {
	with_console(minor, |tty| {
		tty.raw_echo(buf);
		buf.len()
	})
}

/// Returns the window size of the currently active console (`TIOCGWINSZ` on `/dev/tty`).
pub fn current_winsize() -> WinSize {
	with_active(|tty| tty.winsize())
}

/// Returns console `minor`'s foreground process group (`tcgetpgrp(3)`).
pub fn fg_pgrp(minor: u32) -> EResult<crate::process::Pid> {
	with_console(minor, |tty| tty.fg_pgrp)
}

/// Sets console `minor`'s foreground process group (`tcsetpgrp(3)`).
pub fn set_fg_pgrp(minor: u32, pgrp: crate::process::Pid) -> EResult<()> {
	with_console(minor, |tty| tty.fg_pgrp = pgrp)
}

/// Writes `bytes` to the active console's display, for kernel log lines (see
/// [`crate::logger::Logger`]'s `Write` impl).
pub fn write_active(bytes: &[u8]) {
	display_write(bytes);
}

/// The actual display sink. A real VGA/serial driver is an external collaborator (§6); until one
/// is wired in, bytes go out over the QEMU/Bochs debug port, which is enough to observe kernel
/// output while bringing the rest of the system up.
fn display_write(bytes: &[u8]) {
	const DEBUG_PORT: u16 = 0xE9;
	for &b in bytes {
		unsafe { crate::arch::outb(DEBUG_PORT, b) };
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn canonical_mode_buffers_until_newline() {
		let mut tty = Tty::new();
		tty.lflags.remove(LFlags::ECHO | LFlags::ECHOE | LFlags::ISIG);
		for &c in b"hi" {
			tty.input_char(c);
		}
		let mut buf = [0u8; 8];
		assert_eq!(tty.read_ready(&mut buf), 0);
		tty.input_char(b'\n');
		let n = tty.read_ready(&mut buf);
		assert_eq!(&buf[..n], b"hi\n");
	}

	#[test_case]
	fn erase_removes_last_unread_char() {
		let mut tty = Tty::new();
		tty.lflags.remove(LFlags::ECHO | LFlags::ECHOE | LFlags::ISIG);
		for &c in b"hit" {
			tty.input_char(c);
		}
		tty.input_char(tty.cc.erase);
		tty.input_char(b'\n');
		let mut buf = [0u8; 8];
		let n = tty.read_ready(&mut buf);
		assert_eq!(&buf[..n], b"hi\n");
	}
}
