//! Spinlocks.
//!
//! [`Mutex`] is a plain spinlock: safe to use between tasks, unsafe to take from an interrupt
//! handler while held by the interrupted context (it would deadlock, since this kernel never
//! preempts onto another CPU). [`IntMutex`] additionally disables interrupts for the duration the
//! lock is held, which is the only way a lock that can be taken from both top-half and bottom-half
//! code (an ISR) is safe (§5 of the design).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Disables interrupts, returning whether they were previously enabled.
///
/// # Safety
///
/// The caller is responsible for eventually restoring the previous state with
/// [`restore_interrupts`].
#[inline]
pub unsafe fn disable_interrupts() -> bool {
	let enabled: usize;
	#[cfg(target_arch = "x86")]
	{
		use core::arch::asm;
		asm!("pushfd", "pop {0}", "cli", out(reg) enabled, options(nostack));
	}
	#[cfg(not(target_arch = "x86"))]
	{
		enabled = 0;
	}
	enabled & 0x200 != 0
}

/// Restores the interrupt flag to the state returned by [`disable_interrupts`].
///
/// # Safety
///
/// Must only be called with a value obtained from a matching [`disable_interrupts`] call.
#[inline]
pub unsafe fn restore_interrupts(was_enabled: bool) {
	#[cfg(target_arch = "x86")]
	{
		use core::arch::asm;
		if was_enabled {
			asm!("sti", options(nostack));
		}
	}
	#[cfg(not(target_arch = "x86"))]
	{
		let _ = was_enabled;
	}
}

/// A plain, non-reentrant spinlock.
pub struct Mutex<T: ?Sized> {
	locked: AtomicBool,
	data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
	/// Creates a new, unlocked mutex wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			data: UnsafeCell::new(data),
		}
	}
}

impl<T: ?Sized> Mutex<T> {
	/// Locks the mutex, spinning until it becomes available.
	pub fn lock(&self) -> MutexGuard<'_, T> {
		while self
			.locked
			.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
			.is_err()
		{
			core::hint::spin_loop();
		}
		MutexGuard { mutex: self }
	}
}

/// An RAII guard releasing a [`Mutex`] on drop.
pub struct MutexGuard<'m, T: ?Sized> {
	mutex: &'m Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { &*self.mutex.data.get() }
	}
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.mutex.data.get() }
	}
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
	fn drop(&mut self) {
		self.mutex.locked.store(false, Ordering::Release);
	}
}

/// A spinlock that disables interrupts for the duration it is held.
///
/// Use this for any state that is also touched from an interrupt handler (the timer tick, the
/// keyboard IRQ, ...).
pub struct IntMutex<T: ?Sized> {
	inner: Mutex<T>,
}

unsafe impl<T: ?Sized + Send> Sync for IntMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for IntMutex<T> {}

impl<T> IntMutex<T> {
	/// Creates a new, unlocked mutex wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			inner: Mutex::new(data),
		}
	}
}

impl<T: ?Sized> IntMutex<T> {
	/// Locks the mutex after disabling interrupts.
	pub fn lock(&self) -> IntMutexGuard<'_, T> {
		let was_enabled = unsafe { disable_interrupts() };
		IntMutexGuard {
			guard: core::mem::ManuallyDrop::new(self.inner.lock()),
			was_enabled,
		}
	}
}

/// An RAII guard releasing an [`IntMutex`] and restoring interrupts on drop.
pub struct IntMutexGuard<'m, T: ?Sized> {
	guard: core::mem::ManuallyDrop<MutexGuard<'m, T>>,
	was_enabled: bool,
}

impl<T: ?Sized> Deref for IntMutexGuard<'_, T> {
	type Target = T;
	fn deref(&self) -> &T {
		&self.guard
	}
}

impl<T: ?Sized> DerefMut for IntMutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		&mut self.guard
	}
}

impl<T: ?Sized> Drop for IntMutexGuard<'_, T> {
	fn drop(&mut self) {
		// Release the spinlock before restoring interrupts, so a timer tick can never observe us
		// still holding it.
		unsafe {
			core::mem::ManuallyDrop::drop(&mut self.guard);
			restore_interrupts(self.was_enabled);
		}
	}
}
