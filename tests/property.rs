//! # Property-Based Tests for the Fernlist Sorted List
//!
//! This module contains property-based tests using proptest to systematically
//! discover edge cases through randomized testing. These tests verify that
//! list behavior matches a sequential oracle across thousands of random
//! inputs.
//!
//! ## Test Properties
//!
//! - Insert-then-lookup: All inserted keys must be retrievable
//! - First-insert-wins: A duplicate insert never changes the stored payload
//! - Remove-then-lookup: Removed keys must not be found
//! - Length consistency: List length matches the oracle
//! - Oracle comparison: Behavior matches a BTreeMap-with-set-semantics
//!   reference for arbitrary operation sequences

use fernlist::SortedList;
use proptest::prelude::*;
use std::collections::BTreeMap;

// ===========================================================================
// Strategy Helpers
// ===========================================================================

/// Generate a vector of unique keys for testing
fn unique_keys(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
	prop::collection::hash_set(any::<i32>(), 0..max_len).prop_map(|s| s.into_iter().collect())
}

/// Operations that can be performed on the list
#[derive(Debug, Clone)]
enum Op {
	InsertHead(i32, i32),
	InsertTail(i32, i32),
	Remove(i32),
	Lookup(i32),
}

/// Generate a sequence of random operations over a compact key space so
/// inserts, removes, and lookups actually collide.
fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
	let key = 0i32..64;
	prop::collection::vec(
		prop_oneof![
			(key.clone(), any::<i32>()).prop_map(|(k, v)| Op::InsertHead(k, v)),
			(key.clone(), any::<i32>()).prop_map(|(k, v)| Op::InsertTail(k, v)),
			key.clone().prop_map(Op::Remove),
			key.prop_map(Op::Lookup),
		],
		0..max_ops,
	)
}

// ===========================================================================
// Insert-Then-Lookup Properties
// ===========================================================================

proptest! {
	/// Property: After inserting unique keys, every one is retrievable with
	/// its payload.
	#[test]
	fn insert_then_lookup(keys in unique_keys(200)) {
		let list: SortedList<i32, i32> = SortedList::new();

		for k in &keys {
			prop_assert!(list.insert_head(*k, k.wrapping_mul(10)));
		}

		list.assert_invariants();
		prop_assert_eq!(list.len(), keys.len());

		for k in &keys {
			prop_assert_eq!(list.lookup(k, |v| *v), Some(k.wrapping_mul(10)));
		}
	}

	/// Property: A duplicate insert fails and leaves the first payload in
	/// place, regardless of which end either insert came from.
	#[test]
	fn first_insert_wins(keys in unique_keys(100), from_tail in any::<bool>()) {
		let list: SortedList<i32, i32> = SortedList::new();

		for k in &keys {
			prop_assert!(list.insert_head(*k, 1));
		}
		for k in &keys {
			let second = if from_tail {
				list.insert_tail(*k, 2)
			} else {
				list.insert_head(*k, 2)
			};
			prop_assert!(!second);
			prop_assert_eq!(list.lookup(k, |v| *v), Some(1));
		}

		prop_assert_eq!(list.len(), keys.len());
	}
}

// ===========================================================================
// Remove-Then-Lookup Properties
// ===========================================================================

proptest! {
	/// Property: After removing a key, lookup returns None, and a second
	/// remove reports absence.
	#[test]
	fn remove_then_lookup(keys in unique_keys(100)) {
		let list: SortedList<i32, i32> = SortedList::new();

		for k in &keys {
			list.insert_tail(*k, *k);
		}

		list.assert_invariants();

		for k in &keys {
			prop_assert!(list.remove(k), "first remove of {} must succeed", k);
			prop_assert!(!list.remove(k), "second remove of {} must fail", k);
			prop_assert_eq!(list.lookup(k, |v| *v), None);
		}

		list.assert_invariants();
		prop_assert!(list.is_empty());
	}

	/// Property: Removing keys that were never inserted reports absence and
	/// leaves the rest of the list intact.
	#[test]
	fn remove_nonexistent_returns_false(
		existing in unique_keys(60),
		nonexistent in unique_keys(60)
	) {
		let list: SortedList<i32, i32> = SortedList::new();

		for k in &existing {
			list.insert_head(*k, *k);
		}

		for k in &nonexistent {
			if !existing.contains(k) {
				prop_assert!(!list.remove(k));
			}
		}

		list.assert_invariants();
		prop_assert_eq!(list.len(), existing.len());
	}
}

// ===========================================================================
// Oracle Comparison
// ===========================================================================

proptest! {
	/// Property: An arbitrary operation sequence leaves the list in the same
	/// state a sequential map with first-insert-wins semantics would reach.
	#[test]
	fn matches_sequential_oracle(ops in operations(300)) {
		let list: SortedList<i32, i32> = SortedList::new();
		let mut oracle: BTreeMap<i32, i32> = BTreeMap::new();

		for op in &ops {
			match *op {
				Op::InsertHead(k, v) => {
					let inserted = list.insert_head(k, v);
					prop_assert_eq!(inserted, !oracle.contains_key(&k));
					oracle.entry(k).or_insert(v);
				}
				Op::InsertTail(k, v) => {
					let inserted = list.insert_tail(k, v);
					prop_assert_eq!(inserted, !oracle.contains_key(&k));
					oracle.entry(k).or_insert(v);
				}
				Op::Remove(k) => {
					prop_assert_eq!(list.remove(&k), oracle.remove(&k).is_some());
				}
				Op::Lookup(k) => {
					prop_assert_eq!(list.lookup(&k, |v| *v), oracle.get(&k).copied());
				}
			}
		}

		list.assert_invariants();
		prop_assert_eq!(list.len(), oracle.len());
		for (k, v) in &oracle {
			prop_assert_eq!(list.lookup(k, |val| *val), Some(*v));
		}
	}
}
