/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! A preemptive round-robin scheduler over a ring of runnable tasks.
//!
//! The ring is a plain FIFO of pids; a tick decrements the current task's timeslice and, once it
//! hits zero, rotates to the next runnable entry. There is no priority or fairness accounting
//! beyond that (§2 scopes this core to round-robin only).

use alloc::collections::VecDeque;
use utils::lock::IntMutex;

use super::{Pid, State, KTASK_PID};

/// Ticks a task runs before being preempted in favor of the next runnable task.
pub const SCHED_TIMESLICE: u32 = 10;

static RING: IntMutex<VecDeque<Pid>> = IntMutex::new(VecDeque::new());

/// Adds `pid` to the back of the runnable ring (a freshly forked or woken task).
pub fn enqueue(pid: Pid) {
	let mut ring = RING.lock();
	if !ring.contains(&pid) {
		ring.push_back(pid);
	}
}

/// Called once per timer tick. Decrements the current task's timeslice and switches away once it
/// expires.
pub fn on_tick() {
	let expired = super::with_current(|task| {
		if task.state != State::Running {
			return false;
		}
		task.timeslice = task.timeslice.saturating_sub(1);
		task.timeslice == 0
	});
	if expired {
		switch();
	}
}

/// Picks the next runnable task and switches `cr3`/the trap-frame-return path onto it.
///
/// Never switches to a `Sleeping` or `Zombie` task; falls back to the idle task (pid 0) when
/// nothing else is runnable.
pub fn switch() {
	let next = {
		let mut ring = RING.lock();
		let mut chosen = None;
		for _ in 0..ring.len() {
			let candidate = ring.pop_front().unwrap();
			ring.push_back(candidate);
			let runnable = super::with_task(candidate, |t| t.state == State::Running).unwrap_or(false);
			if runnable {
				chosen = Some(candidate);
				break;
			}
		}
		chosen.unwrap_or(KTASK_PID)
	};
	super::with_task(next, |t| t.timeslice = SCHED_TIMESLICE);
	unsafe { switch_to(next) };
}

/// Performs the actual context switch: swaps the active address space and, on a real boot, the
/// saved register set. The register-set half is owned by the (external, §6) ISR return path;
/// this core's responsibility ends at making `next` current and active.
///
/// # Safety
///
/// Must only be called with interrupts disabled, on the path back from an interrupt/syscall.
unsafe fn switch_to(next: Pid) {
	super::with_table(|table| {
		table.current = next;
	});
	let space = super::with_task(next, |t| t.address_space.clone());
	if let Some(space) = space {
		space.switch_to();
	}
}

/// Puts the currently running task to sleep and immediately reschedules.
///
/// Returns once some other part of the kernel calls [`wake`] on this task and it is chosen to run
/// again.
pub fn block_current() {
	let me = super::current_pid();
	super::with_task(me, |t| t.state = State::Sleeping);
	switch();
}

/// Marks `pid` runnable again and re-enqueues it, if it isn't already a zombie.
pub fn wake(pid: Pid) {
	let woke = super::with_task(pid, |t| {
		if t.state == State::Sleeping {
			t.state = State::Running;
			true
		} else {
			false
		}
	})
	.unwrap_or(false);
	if woke {
		enqueue(pid);
	}
}

/// Used by [`super::exit`]: marks the current task gone and switches away for good.
///
/// `switch()` only swaps `cr3` and the process table's notion of "current"; it does not itself
/// transfer control off this kernel stack (that's the external ISR-return path's job, §6). A
/// single call therefore returns right back here on the exiting task's own stack, which is still
/// live until something resumes a different task through the interrupt-return path. Loop switching
/// and halting until that happens, rather than assuming one `switch()` is the last code this stack
/// ever runs.
pub fn reschedule_and_never_return() -> ! {
	loop {
		switch();
		crate::arch::halt();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn enqueue_does_not_duplicate_pids() {
		let mut ring = RING.lock();
		ring.clear();
		drop(ring);
		enqueue(Pid(9001));
		enqueue(Pid(9001));
		let ring = RING.lock();
		assert_eq!(ring.iter().filter(|&&p| p == Pid(9001)).count(), 1);
		drop(ring);
		RING.lock().clear();
	}

	#[test_case]
	fn switch_falls_back_to_idle_when_nothing_else_runnable() {
		let mut ring = RING.lock();
		ring.clear();
		drop(ring);
		let pid = super::super::fork().expect("fork");
		super::super::with_task(pid, |t| t.state = State::Sleeping);
		enqueue(pid);
		switch();
		assert_eq!(super::super::current_pid(), KTASK_PID);
		super::super::with_table(|table| {
			table.tasks.remove(&pid);
		});
		RING.lock().clear();
	}
}
