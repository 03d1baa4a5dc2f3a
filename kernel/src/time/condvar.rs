/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Condition variables: a spinlock-protected wait queue the scheduler sleeps tasks on and wakes
//! them from, used wherever a task needs to block until some predicate the caller checks becomes
//! true (a child reaping its exit status, a pipe having data, ...).

use alloc::vec::Vec;
use utils::lock::IntMutex;

use crate::process::{self, Pid};

/// A wait queue with no associated data; the condition itself is checked by the caller before and
/// after waiting; this is needed to not end up waiting on the condvar forever, since the notifier
/// may run before the waiter parks.
pub struct CondVar {
	waiters: IntMutex<Vec<Pid>>,
}

impl CondVar {
	/// Creates an empty condition variable.
	pub const fn new() -> Self {
		Self {
			waiters: IntMutex::new(Vec::new()),
		}
	}

	/// Parks the calling task until [`Self::notify_one`] or [`Self::notify_all`] wakes it.
	///
	/// The caller must re-check its condition on return, since a wake is not a guarantee the
	/// condition holds (spurious wakes are possible if `notify_all` targets a group the caller
	/// shares with an unrelated waiter).
	pub fn wait(&self) {
		let me = process::current_pid();
		self.waiters.lock().push(me);
		process::scheduler::block_current();
	}

	/// Wakes one waiting task, if any, in FIFO order.
	pub fn notify_one(&self) {
		let mut waiters = self.waiters.lock();
		if !waiters.is_empty() {
			let pid = waiters.remove(0);
			drop(waiters);
			process::scheduler::wake(pid);
		}
	}

	/// Wakes every waiting task.
	pub fn notify_all(&self) {
		let mut waiters = self.waiters.lock();
		let woken: Vec<Pid> = waiters.drain(..).collect();
		drop(waiters);
		for pid in woken {
			process::scheduler::wake(pid);
		}
	}
}

impl Default for CondVar {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	/// Pids used here don't name real tasks; `scheduler::wake` is a no-op against an unknown pid
	/// (`with_task` returns `None`), so this exercises the queue bookkeeping itself without needing
	/// a live process table entry for every waiter.
	#[test_case]
	fn notify_one_wakes_exactly_one_waiter_fifo() {
		let cv = CondVar::new();
		cv.waiters.lock().extend([Pid(0x1001), Pid(0x1002), Pid(0x1003)]);
		cv.notify_one();
		let remaining = cv.waiters.lock().clone();
		assert_eq!(remaining, [Pid(0x1002), Pid(0x1003)]);
	}

	#[test_case]
	fn notify_all_drains_every_waiter() {
		let cv = CondVar::new();
		cv.waiters.lock().extend([Pid(0x2001), Pid(0x2002)]);
		cv.notify_all();
		assert!(cv.waiters.lock().is_empty());
	}

	#[test_case]
	fn notify_one_on_empty_queue_is_a_no_op() {
		let cv = CondVar::new();
		cv.notify_one();
		assert!(cv.waiters.lock().is_empty());
	}
}
