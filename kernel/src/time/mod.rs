/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! Ticks, timers and condition variables.
//!
//! The PIT/APIC timer interrupt (an external collaborator, §6) calls [`tick`] once per period;
//! everything else in this module is built on the monotonic counter that advances.

pub mod condvar;
pub mod timer;

use utils::lock::IntMutex;

/// Ticks per second the timer interrupt is configured to deliver.
pub const TICKS_PER_SEC: u64 = 100;

static TICKS: IntMutex<u64> = IntMutex::new(0);

/// Initializes the tick counter. Actual PIT/APIC programming is done by the boot stub (§6).
pub fn init() {
	*TICKS.lock() = 0;
}

/// Called from the timer interrupt handler once per tick.
///
/// Advances the monotonic counter, fires any due [`timer::TimerQueue`] entries, and lets the
/// scheduler account the current task's timeslice — the scheduler hook itself lives in
/// `process::scheduler` to avoid a dependency cycle; this just drives it.
pub fn tick() {
	let now = {
		let mut ticks = TICKS.lock();
		*ticks += 1;
		*ticks
	};
	timer::fire_due(now);
	crate::process::scheduler::on_tick();
}

/// Returns the number of ticks elapsed since boot.
pub fn ticks() -> u64 {
	*TICKS.lock()
}

/// Converts a duration in milliseconds to a tick count, rounding up so a sleep never wakes early.
pub fn ms_to_ticks(ms: u64) -> u64 {
	ms.saturating_mul(TICKS_PER_SEC).div_ceil(1000)
}
