/*
 * beeos - a small x86 Unix-like kernel core
 *
 * This file is part of beeos.
 */

//! In-kernel self-test harness.
//!
//! `#[test_case]` functions run with the full kernel environment available (the allocators,
//! virtual memory, the scheduler) so subsystems that cannot be exercised from a hosted `cargo
//! test` (anything that needs real frames or a page directory) still get direct coverage.

/// A self-test, as registered by the `#[test_case]` attribute under the custom test framework.
pub trait Testable {
	/// Runs the test.
	fn run(&self);
}

impl<T: Fn()> Testable for T {
	fn run(&self) {
		crate::print!("{} ... ", core::any::type_name::<T>());
		self();
		crate::println!("ok");
	}
}

/// The test runner installed via `#![test_runner]`.
pub fn runner(tests: &[&dyn Testable]) {
	crate::println!("running {} tests", tests.len());
	for test in tests {
		test.run();
	}
	crate::println!("test result: ok. {} passed", tests.len());
}
