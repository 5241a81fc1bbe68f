//! Synchronization primitives with loom support.
//!
//! Everything in the crate that blocks or shares ownership goes through
//! this module rather than naming `std::sync` or `parking_lot` directly:
//!
//! ```ignore
//! use crate::sync::{Arc, Condvar, Mutex, MutexGuard};
//! ```
//!
//! Under normal compilation these are parking_lot's mutex and condvar plus
//! `std::sync::Arc`. Compiling with `--cfg loom` (and the `loom` feature)
//! swaps in loom's model-checked equivalents, which lets the tests under
//! tests/loom_tests.rs explore thread interleavings deterministically.

// Allow unused items - some are only used under loom cfg
#![allow(unused)]

// ===========================================================================
// Arc
// ===========================================================================

#[cfg(not(loom))]
pub use std::sync::Arc;

#[cfg(loom)]
pub use loom::sync::Arc;

// ===========================================================================
// Mutex and Condvar
// ===========================================================================

// Note: parking_lot and loom have different APIs. parking_lot's Mutex::lock
// returns a guard directly and Condvar::wait takes `&mut MutexGuard`, while
// loom follows std with Result-returning methods and by-value guard passing.
// We need wrapper types to unify them.

#[cfg(not(loom))]
pub use parking_lot::{Condvar, Mutex, MutexGuard};

#[cfg(loom)]
mod loom_mutex {
	//! Wrapper types for loom's Mutex/Condvar to match parking_lot's API.

	use loom::sync::{Condvar as LoomCondvar, Mutex as LoomMutex, MutexGuard as LoomGuard};

	/// A wrapper around loom's Mutex that provides a parking_lot-compatible API.
	pub struct Mutex<T>(LoomMutex<T>);

	impl<T> Mutex<T> {
		/// Creates a new Mutex.
		pub fn new(value: T) -> Self {
			Mutex(LoomMutex::new(value))
		}

		/// Acquires the mutex, blocking until available.
		pub fn lock(&self) -> MutexGuard<'_, T> {
			MutexGuard(Some(self.0.lock().unwrap()))
		}
	}

	/// Wrapper around loom's guard.
	///
	/// The inner `Option` exists so `Condvar::wait` can move the guard out
	/// and back in through a `&mut` reference; it is `None` only during that
	/// handoff.
	pub struct MutexGuard<'a, T>(Option<LoomGuard<'a, T>>);

	impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
		type Target = T;
		fn deref(&self) -> &T {
			self.0.as_ref().expect("guard taken during condvar wait")
		}
	}

	impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
		fn deref_mut(&mut self) -> &mut T {
			self.0.as_mut().expect("guard taken during condvar wait")
		}
	}

	/// A wrapper around loom's Condvar that provides a parking_lot-compatible API.
	pub struct Condvar(LoomCondvar);

	impl Condvar {
		/// Creates a new Condvar.
		pub fn new() -> Self {
			Condvar(LoomCondvar::new())
		}

		/// Blocks the current thread until this condition variable is notified.
		pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
			let inner = guard.0.take().expect("guard taken during condvar wait");
			guard.0 = Some(self.0.wait(inner).unwrap());
		}

		/// Wakes up one blocked thread on this condvar.
		pub fn notify_one(&self) {
			self.0.notify_one();
		}

		/// Wakes up all blocked threads on this condvar.
		pub fn notify_all(&self) {
			self.0.notify_all();
		}
	}

	impl Default for Condvar {
		fn default() -> Self {
			Condvar::new()
		}
	}
}

#[cfg(loom)]
pub use loom_mutex::{Condvar, Mutex, MutexGuard};
