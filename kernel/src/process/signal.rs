/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! POSIX signal delivery.
//!
//! Dispositions, the pending set and the process mask live on [`super::Task`]; this module
//! defines the vocabulary (`Signal`, `SigAction`, `SigSet`) and the trap-frame rewrite that
//! actually delivers a signal to a task about to return to user mode.

use crate::arch::TrapFrame;

/// The signals this core recognizes, numbered per POSIX (signal 0 is reserved and has no variant
/// here).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Signal {
	Hup = 1,
	Int = 2,
	Quit = 3,
	Ill = 4,
	Trap = 5,
	Abrt = 6,
	Bus = 7,
	Fpe = 8,
	Kill = 9,
	Usr1 = 10,
	Segv = 11,
	Usr2 = 12,
	Pipe = 13,
	Alrm = 14,
	Term = 15,
	Chld = 17,
	Cont = 18,
	Stop = 19,
	Tstp = 20,
	Ttin = 21,
	Ttou = 22,
}

impl Signal {
	/// Returns the signal with the given number, if it names one this core recognizes.
	pub fn from_number(n: u8) -> Option<Self> {
		use Signal::*;
		Some(match n {
			1 => Hup,
			2 => Int,
			3 => Quit,
			4 => Ill,
			5 => Trap,
			6 => Abrt,
			7 => Bus,
			8 => Fpe,
			9 => Kill,
			10 => Usr1,
			11 => Segv,
			12 => Usr2,
			13 => Pipe,
			14 => Alrm,
			15 => Term,
			17 => Chld,
			18 => Cont,
			19 => Stop,
			20 => Tstp,
			21 => Ttin,
			22 => Ttou,
			_ => return None,
		})
	}
}

/// A bitset of pending/blocked signals, indexed by signal number.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SigSet(u32);

impl SigSet {
	/// An empty set.
	pub const fn empty() -> Self {
		Self(0)
	}

	/// Adds `signal` to the set.
	pub fn insert(&mut self, signal: Signal) {
		self.0 |= 1 << (signal as u8);
	}

	/// Removes `signal` from the set.
	pub fn remove(&mut self, signal: Signal) {
		self.0 &= !(1 << (signal as u8));
	}

	/// Whether `signal` is a member of the set.
	pub fn contains(&self, signal: Signal) -> bool {
		self.0 & (1 << (signal as u8)) != 0
	}

	/// Returns the lowest-numbered signal present in `self` but not in `blocked`, if any.
	pub fn first_unblocked(&self, blocked: SigSet) -> Option<Signal> {
		let deliverable = self.0 & !blocked.0;
		if deliverable == 0 {
			return None;
		}
		Signal::from_number(deliverable.trailing_zeros() as u8)
	}
}

/// A user-installed signal handler, as set by `sigaction`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalHandler {
	/// The signal's default disposition (terminate, ignore, or stop, depending on the signal).
	Default,
	/// The signal is ignored outright.
	Ignore,
	/// A user-space function to call, at this address.
	Handler(usize),
}

impl Default for SignalHandler {
	fn default() -> Self {
		Self::Default
	}
}

/// The disposition installed for one signal number (`sigaction(2)`'s `struct sigaction`).
#[derive(Clone, Copy, Debug, Default)]
pub struct SigAction {
	pub handler: SignalHandler,
	/// Additional signals blocked while the handler runs.
	pub mask: SigSet,
}

/// Whether a signal whose disposition is `Default` terminates the task outright (as opposed to
/// being ignored by default, like `SIGCHLD`).
fn default_terminates(signal: Signal) -> bool {
	!matches!(signal, Signal::Chld | Signal::Cont)
}

/// Picks the next deliverable signal for `task` and rewrites its trap frame to run the handler on
/// return to user mode, or applies the default action directly for `Default`/`Ignore`.
///
/// Returns `true` if the task should be scheduled to run its handler (frame rewritten), `false` if
/// there was nothing to deliver or the default action was terminal (in which case the caller's
/// task is already a zombie).
pub fn prepare_execution(task: &mut super::Task, frame: &mut TrapFrame) -> bool {
	let Some(signal) = task.pending.first_unblocked(task.sigmask) else {
		return false;
	};
	task.pending.remove(signal);
	let action = task.sigactions[signal as usize];
	match action.handler {
		SignalHandler::Ignore => false,
		SignalHandler::Default => {
			if default_terminates(signal) {
				super::exit(128 + signal as i32);
			}
			false
		}
		SignalHandler::Handler(entry) => {
			task.saved_frame = Some(*frame);
			frame.push_signal_frame(entry, signal as u32, crate::syscall::Syscall::Sigreturn as u32);
			task.sigmask.insert(signal);
			true
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn sigset_first_unblocked_skips_masked() {
		let mut pending = SigSet::empty();
		pending.insert(Signal::Chld);
		pending.insert(Signal::Int);
		let mut blocked = SigSet::empty();
		blocked.insert(Signal::Chld);
		assert_eq!(pending.first_unblocked(blocked), Some(Signal::Int));
	}
}
