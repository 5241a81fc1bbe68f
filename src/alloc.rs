//! Allocation tracking for memory leak detection.
//!
//! The list's `prev` and `next` links are reference-counted in both
//! directions, so every adjacent pair of nodes forms an `Arc` cycle, and the
//! destructor walk that severs those cycles is the only thing standing
//! between a dropped list and a leak. This module provides a counting global
//! allocator so the test suite can prove the walk actually ran.
//!
//! # Usage
//!
//! Install the allocator in a test binary, take a [`snapshot`] before the
//! workload, and compare afterwards:
//!
//! ```ignore
//! use fernlist::alloc::{snapshot, CountingAllocator};
//!
//! #[global_allocator]
//! static ALLOC: CountingAllocator = CountingAllocator;
//!
//! #[test]
//! fn no_leak() {
//!     let before = fernlist::alloc::snapshot();
//!     // ... build and drop a list ...
//!     fernlist::alloc::snapshot().assert_reclaimed_since(&before, 8);
//! }
//! ```
//!
//! Baselines compose better than resettable counters when the test harness
//! runs other tests on sibling threads, but the counters are still global:
//! an exact-zero check needs `--test-threads=1`.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicIsize, Ordering};

static LIVE_ALLOCATIONS: AtomicIsize = AtomicIsize::new(0);
static LIVE_BYTES: AtomicIsize = AtomicIsize::new(0);

/// A wrapper around the system allocator that maintains live-allocation and
/// live-byte counters.
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		let ptr = System.alloc(layout);
		if !ptr.is_null() {
			LIVE_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
			LIVE_BYTES.fetch_add(layout.size() as isize, Ordering::Relaxed);
		}
		ptr
	}

	unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
		let ptr = System.alloc_zeroed(layout);
		if !ptr.is_null() {
			LIVE_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
			LIVE_BYTES.fetch_add(layout.size() as isize, Ordering::Relaxed);
		}
		ptr
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		LIVE_ALLOCATIONS.fetch_sub(1, Ordering::Relaxed);
		LIVE_BYTES.fetch_sub(layout.size() as isize, Ordering::Relaxed);
		System.dealloc(ptr, layout)
	}

	unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
		let new_ptr = System.realloc(ptr, layout, new_size);
		if !new_ptr.is_null() {
			LIVE_BYTES.fetch_add(new_size as isize - layout.size() as isize, Ordering::Relaxed);
		}
		new_ptr
	}
}

/// A point-in-time reading of the live-allocation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocSnapshot {
	/// Allocations minus deallocations at snapshot time.
	pub live_allocations: isize,
	/// Bytes allocated minus bytes freed at snapshot time.
	pub live_bytes: isize,
}

impl AllocSnapshot {
	/// Asserts that everything allocated after `baseline` has been freed
	/// again, within `tolerance` allocations either way.
	///
	/// The tolerance absorbs lazily initialized state in the test harness
	/// (thread-local buffers, output capture) that legitimately outlives a
	/// single test body.
	///
	/// # Panics
	///
	/// Panics if more than `tolerance` allocations made since `baseline`
	/// are still live.
	pub fn assert_reclaimed_since(&self, baseline: &AllocSnapshot, tolerance: isize) {
		let leaked = self.live_allocations - baseline.live_allocations;
		assert!(
			leaked.abs() <= tolerance,
			"{} allocations outlived the workload ({} bytes still live, tolerance {})",
			leaked,
			self.live_bytes - baseline.live_bytes,
			tolerance
		);
	}
}

/// Reads the counters. Only meaningful when [`CountingAllocator`] is
/// installed as the global allocator; otherwise both values stay zero.
pub fn snapshot() -> AllocSnapshot {
	AllocSnapshot {
		live_allocations: LIVE_ALLOCATIONS.load(Ordering::SeqCst),
		live_bytes: LIVE_BYTES.load(Ordering::SeqCst),
	}
}
