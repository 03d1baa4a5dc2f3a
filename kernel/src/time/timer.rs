/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! A sorted queue of one-shot timer events, used by `nanosleep` and by anything else that needs
//! to be woken after a deadline rather than by a specific condition becoming true.

use alloc::collections::BinaryHeap;
use core::cmp::Ordering;
use utils::lock::IntMutex;

use crate::process::Pid;

/// A pending wakeup, ordered by `fire_at` so the earliest deadline sorts first out of the
/// max-heap (via the reversed [`Ord`] impl below).
struct Event {
	fire_at: u64,
	task: Pid,
}

impl PartialEq for Event {
	fn eq(&self, other: &Self) -> bool {
		self.fire_at == other.fire_at
	}
}
impl Eq for Event {}

impl PartialOrd for Event {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Event {
	fn cmp(&self, other: &Self) -> Ordering {
		// Reversed: `BinaryHeap` is a max-heap, and we want the soonest deadline on top.
		other.fire_at.cmp(&self.fire_at)
	}
}

static QUEUE: IntMutex<BinaryHeap<Event>> = IntMutex::new(BinaryHeap::new());

/// Schedules a wakeup for `task` at `fire_at` (an absolute tick count, see [`super::ticks`]).
pub fn schedule(task: Pid, fire_at: u64) {
	QUEUE.lock().push(Event { fire_at, task });
}

/// Cancels every pending wakeup for `task` (used when a sleep is interrupted by a signal).
pub fn cancel(task: Pid) {
	let mut queue = QUEUE.lock();
	let remaining: alloc::vec::Vec<Event> = queue.drain().filter(|e| e.task != task).collect();
	*queue = remaining.into_iter().collect();
}

/// Wakes every task whose deadline has passed as of `now`. Called from [`super::tick`].
pub fn fire_due(now: u64) {
	let mut queue = QUEUE.lock();
	while let Some(top) = queue.peek() {
		if top.fire_at > now {
			break;
		}
		let event = queue.pop().unwrap();
		crate::process::scheduler::wake(event.task);
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn earliest_deadline_first() {
		let mut heap = BinaryHeap::new();
		heap.push(Event { fire_at: 10, task: Pid(1) });
		heap.push(Event { fire_at: 2, task: Pid(2) });
		heap.push(Event { fire_at: 5, task: Pid(3) });
		assert_eq!(heap.pop().unwrap().fire_at, 2);
		assert_eq!(heap.pop().unwrap().fire_at, 5);
		assert_eq!(heap.pop().unwrap().fire_at, 10);
	}
}
