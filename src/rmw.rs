//! # Fair Read / May-Write / Write Lock
//!
//! This module provides the [`RmwLock`], a three-mode blocking lock used as the
//! per-node latch of the concurrent sorted list. It is the pessimistic cousin
//! of an upgradable reader-writer lock: instead of optimistic validation and
//! retry, every acquisition blocks until it is admitted, and admission order
//! is first-in-first-out.
//!
//! ## Access Modes
//!
//! | Mode      | Shared with readers? | May coexist with itself? | Upgradable? |
//! |-----------|----------------------|--------------------------|-------------|
//! | Read      | Yes                  | Yes (unlimited)          | No          |
//! | May-write | Yes                  | No (at most one)         | Yes, to write |
//! | Write     | No                   | No                       | -           |
//!
//! ### Read
//!
//! Admissible whenever no writer holds the lock. Any number of readers can
//! hold the lock at once, alongside at most one may-writer.
//!
//! ### May-write
//!
//! Shared access with a reserved path to exclusivity. A may-writer counts as
//! a reader while it holds the lock, but no second may-writer is admitted, so
//! the holder can always [`upgrade`](RmwLock::upgrade) without risking a
//! deadlock against a symmetric upgrader.
//!
//! ### Write
//!
//! Fully exclusive. Admissible only when nothing else holds the lock.
//!
//! ## Fairness
//!
//! Waiters queue in arrival order and are admitted from the front of the
//! queue. A thread that cannot enter immediately always goes to the back,
//! with exactly two bends:
//!
//! 1. **Reader coalescing.** A reader that must wait joins the waiter at the
//!    back of the queue when that waiter is also a reader group, instead of
//!    appending its own entry. The whole group shares one condition variable
//!    and wakes together, which preserves arrival order *between* reader
//!    groups and other waiters while letting contiguous readers enter as a
//!    batch.
//! 2. **Upgrade priority.** [`upgrade`](RmwLock::upgrade) enqueues its write
//!    request at the *front* of the queue. The upgrader already holds the
//!    lock in may-write mode, so no other may-writer or writer can be active,
//!    and the only thing it waits for is the current readers draining out.
//!
//! Arrival also admits immediately in two narrow cases: when the queue is
//! empty and the admission predicate holds, and when a reader arrives while
//! the only queued waiter is a reader group whose predicate currently holds
//! (a waiting reader group does not block new readers of equal priority).
//!
//! ## Wake-up Protocol
//!
//! Releases signal only the waiter group at the front of the queue, and only
//! when its mode is admissible. An admitted reader or may-writer dequeues
//! itself and then checks whether the *next* waiter became admissible too
//! (a may-writer can be followed by compatible readers, and vice versa); an
//! admitted writer never chain-wakes. Every waiter rechecks both its queue
//! position and its admission predicate after waking, so spurious wake-ups
//! and double notifications are harmless.
//!
//! ## Preconditions
//!
//! The lock does not validate its callers. Releasing a mode that is not held
//! or upgrading without holding may-write is a programming error: debug
//! builds assert, release builds silently corrupt the admission counters.
//! Acquisitions never fail and cannot be cancelled or timed out.
//!
//! ## Protected Data
//!
//! Like a `RwLock`, an `RmwLock<T>` owns the value it protects. Unlike a
//! `RwLock`, it hands out no lifetime-bound guards of its own: the list layer
//! wraps nodes in owning guards and derefs the cell through
//! [`data_ptr`](RmwLock::data_ptr) under the lock discipline it maintains.

use std::cell::UnsafeCell;
use std::collections::VecDeque;

use crate::sync::{Arc, Condvar, Mutex, MutexGuard};

// ===========================================================================
// Waiter Queue
// ===========================================================================

/// The mode a thread acquires (or waits to acquire) the lock in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
	Read,
	MayWrite,
	Write,
}

/// One entry in the waiter queue: a condition variable shared by `count`
/// threads waiting to enter in `mode`.
///
/// `count` is 1 for every waiter except a coalesced reader group, where it is
/// the number of readers that joined the group while it sat at the back of
/// the queue.
struct Waiter {
	cond: Arc<Condvar>,
	mode: Mode,
	count: u32,
}

/// Admission counters plus the FIFO waiter queue, all guarded by the lock's
/// internal mutex.
struct State {
	/// Holders in read or may-write mode. The may-writer is counted here, so
	/// the last shared release is always the one that sees `readers == 0`.
	readers: u32,
	/// Whether a writer currently holds the lock.
	writer_held: bool,
	/// Whether a may-writer currently holds the lock.
	may_writer_held: bool,
	/// Waiters in arrival order; the front is the next to be admitted.
	queue: VecDeque<Waiter>,
}

impl State {
	/// Read is admissible while no writer holds the lock.
	fn read_admissible(&self) -> bool {
		!self.writer_held
	}

	/// May-write is admissible while no writer and no other may-writer hold
	/// the lock.
	fn may_write_admissible(&self) -> bool {
		!self.may_writer_held && self.read_admissible()
	}

	/// Write is admissible only while nothing holds the lock.
	fn write_admissible(&self) -> bool {
		self.readers == 0 && self.may_write_admissible()
	}

	fn admissible(&self, mode: Mode) -> bool {
		match mode {
			Mode::Read => self.read_admissible(),
			Mode::MayWrite => self.may_write_admissible(),
			Mode::Write => self.write_admissible(),
		}
	}

	/// Appends a fresh waiter, or prepends it when `vip` (upgrade only).
	fn enqueue(&mut self, mode: Mode, vip: bool) {
		let waiter = Waiter {
			cond: Arc::new(Condvar::new()),
			mode,
			count: 1,
		};
		if vip {
			self.queue.push_front(waiter);
		} else {
			self.queue.push_back(waiter);
		}
	}

	/// Folds an arriving reader into the reader group at the back of the
	/// queue, if there is one. Returns whether the fold happened.
	fn coalesce_read(&mut self) -> bool {
		match self.queue.back_mut() {
			Some(back) if back.mode == Mode::Read => {
				debug_assert!(back.count > 0);
				back.count += 1;
				true
			}
			_ => false,
		}
	}

	/// Decides whether an arriving thread must wait, enqueueing it if so.
	///
	/// Immediate entry is allowed only when nothing would be overtaken: an
	/// empty queue, or a reader arriving while the sole queued waiter is a
	/// reader group and the read predicate holds. In every other case the
	/// thread waits behind whoever came first, a reader by coalescing into a
	/// trailing reader group when possible, anything else as a new waiter at
	/// the back.
	///
	/// On a `true` return the caller's waiter is the back of the queue.
	fn should_wait(&mut self, mode: Mode) -> bool {
		let wait = match self.queue.len() {
			0 => !self.admissible(mode),
			1 => {
				mode != Mode::Read
					|| self.queue.front().expect("queue has one waiter").mode != Mode::Read
					|| !self.admissible(mode)
			}
			_ => true,
		};

		if wait {
			if mode == Mode::Read && self.coalesce_read() {
				return true;
			}
			self.enqueue(mode, false);
		}

		wait
	}

	/// Signals the waiter group at the front of the queue if its mode is
	/// admissible under the current counters. Waiters past the front are
	/// never signalled directly; an admitted reader or may-writer chains the
	/// wake-up forward itself.
	fn try_notify_next(&self) {
		if let Some(front) = self.queue.front() {
			if self.admissible(front.mode) {
				front.cond.notify_all();
			}
		}
	}
}

// ===========================================================================
// RmwLock
// ===========================================================================

/// A fair three-mode lock protecting a value of type `T`.
///
/// See the [module documentation](self) for admission rules, fairness, and
/// the wake-up protocol.
pub struct RmwLock<T> {
	state: Mutex<State>,
	data: UnsafeCell<T>,
}

// SAFETY: RmwLock can be sent between threads if T can be sent.
unsafe impl<T: Send> Send for RmwLock<T> {}

// SAFETY: RmwLock can be shared between threads if T is Send+Sync.
// The lock provides its own synchronization.
unsafe impl<T: Send + Sync> Sync for RmwLock<T> {}

impl<T> RmwLock<T> {
	/// Creates a new, unheld lock protecting `data`.
	pub fn new(data: T) -> RmwLock<T> {
		RmwLock {
			state: Mutex::new(State {
				readers: 0,
				writer_held: false,
				may_writer_held: false,
				queue: VecDeque::new(),
			}),
			data: UnsafeCell::new(data),
		}
	}

	// -----------------------------------------------------------------------
	// Acquisition
	// -----------------------------------------------------------------------

	/// Acquires the lock in read mode, blocking until admitted.
	pub fn lock_read(&self) {
		let mut state = self.state.lock();
		Self::wait_for_admission(&mut state, Mode::Read);
		state.readers += 1;
	}

	/// Acquires the lock in may-write mode, blocking until admitted.
	///
	/// The holder counts as a reader until it releases or upgrades.
	pub fn lock_may_write(&self) {
		let mut state = self.state.lock();
		Self::wait_for_admission(&mut state, Mode::MayWrite);
		state.readers += 1;
		debug_assert!(!state.may_writer_held);
		state.may_writer_held = true;
	}

	/// Acquires the lock in write mode, blocking until admitted.
	pub fn lock_write(&self) {
		let mut state = self.state.lock();
		Self::wait_for_admission(&mut state, Mode::Write);
		debug_assert!(!state.writer_held);
		state.writer_held = true;
	}

	/// Upgrades a held may-write into a write, blocking until the current
	/// readers drain.
	///
	/// The upgrade request goes to the *front* of the waiter queue: it runs
	/// ahead of every waiter that arrived while the caller held may-write,
	/// and readers arriving afterwards queue up behind it, so the upgrader
	/// cannot be starved. Two upgraders can never collide because holding
	/// may-write excludes a second may-writer.
	///
	/// # Preconditions
	///
	/// The calling thread must hold this lock in may-write mode. Debug builds
	/// assert this; release builds do not check.
	pub fn upgrade(&self) {
		let mut state = self.state.lock();

		debug_assert!(state.readers > 0);
		debug_assert!(state.may_writer_held);
		state.readers -= 1;
		state.may_writer_held = false;

		if !state.write_admissible() {
			state.enqueue(Mode::Write, true);

			let cond =
				state.queue.front().expect("upgrade waiter was just enqueued").cond.clone();
			// The upgrade waiter is the queue head and nothing can be
			// inserted ahead of it, so only the admission predicate needs
			// rechecking after a wake-up.
			while !state.write_admissible() {
				cond.wait(&mut state);
			}

			state.queue.pop_front();
		}

		debug_assert!(!state.writer_held);
		state.writer_held = true;
	}

	// -----------------------------------------------------------------------
	// Release
	// -----------------------------------------------------------------------

	/// Releases a read acquisition.
	///
	/// Only the last shared holder wakes the queue: while other readers (or
	/// the may-writer, who is counted among them) remain, the only waiters
	/// that could enter are readers, and those were admitted alongside this
	/// one or folded into a waiting group already.
	pub fn unlock_read(&self) {
		let mut state = self.state.lock();

		debug_assert!(state.readers > 0);
		state.readers -= 1;

		if state.readers > 0 {
			return;
		}
		state.try_notify_next();
	}

	/// Releases a may-write acquisition without upgrading.
	///
	/// Unlike [`unlock_read`](Self::unlock_read) this always probes the
	/// queue, because clearing the may-writer can admit a waiting may-writer
	/// even while plain readers remain. The probe must stay conditional on
	/// admissibility: the next in line may be a writer that still has
	/// readers to wait out.
	pub fn unlock_may_write(&self) {
		let mut state = self.state.lock();

		debug_assert!(state.readers > 0);
		debug_assert!(state.may_writer_held);
		state.readers -= 1;
		state.may_writer_held = false;

		state.try_notify_next();
	}

	/// Releases a write acquisition and wakes the waiter group at the front
	/// of the queue.
	///
	/// No admissibility probe is needed: with the writer gone and the lock
	/// otherwise empty, whatever waits at the front can enter.
	pub fn unlock_write(&self) {
		let mut state = self.state.lock();

		debug_assert!(state.writer_held);
		state.writer_held = false;

		if let Some(front) = state.queue.front() {
			front.cond.notify_all();
		}
	}

	// -----------------------------------------------------------------------
	// Data Access
	// -----------------------------------------------------------------------

	/// Returns a raw pointer to the protected value.
	///
	/// # Safety contract
	///
	/// Dereferencing the pointer is only sound under the lock discipline:
	/// shared references require the lock held in read or may-write mode,
	/// and a mutable reference requires it held in write mode. The caller
	/// sites (the list's node guards) document this at each deref.
	pub fn data_ptr(&self) -> *mut T {
		self.data.get()
	}

	/// Returns mutable access to the protected value without locking.
	///
	/// Safe because `&mut self` proves no other reference to the lock (and
	/// hence no holder) exists.
	pub fn as_mut(&mut self) -> &mut T {
		self.data.get_mut()
	}

	// -----------------------------------------------------------------------
	// Admission
	// -----------------------------------------------------------------------

	/// Blocks the calling thread until it is admitted in `mode`, maintaining
	/// the queue along the way. On return the caller has been admitted but
	/// its mode's counters are not yet updated; the callers above do that.
	fn wait_for_admission(state: &mut MutexGuard<'_, State>, mode: Mode) {
		if !state.should_wait(mode) {
			return;
		}

		// Our waiter (or the reader group we joined) is at the back of the
		// queue right now; it is admitted once it reaches the front *and*
		// the predicate holds. Both must be rechecked on every wake-up
		// because condition variables wake spuriously and releases may
		// signal a group more than once.
		let cond = state.queue.back().expect("waiter was just enqueued").cond.clone();
		loop {
			cond.wait(state);
			if let Some(front) = state.queue.front() {
				if Arc::ptr_eq(&front.cond, &cond) && state.admissible(mode) {
					break;
				}
			}
		}

		if mode == Mode::Read {
			let front = state.queue.front_mut().expect("admitted waiter is still queued");
			debug_assert!(front.count > 0);
			front.count -= 1;
			if front.count != 0 {
				// More of the group is still waking; the last member pops
				// the waiter and chains the wake-up.
				return;
			}
		}

		state.queue.pop_front();

		// Readers and may-writers admit compatible successors themselves
		// rather than waking them just to have them re-check and re-wait.
		// A writer admits no one: it is exclusive.
		if mode != Mode::Write {
			state.try_notify_next();
		}
	}
}

// ===========================================================================
// Tests
// ===========================================================================
