//! # Test Utilities for the Sorted List
//!
//! This module provides utilities for loading sample lists from JSON
//! fixtures. It's only compiled in test builds (`#[cfg(test)]`).
//!
//! ## Purpose
//!
//! Fixture lists are wired node-by-node, bypassing the insertion code, so
//! tests can check lookups and invariants against a structure the insert
//! path had no hand in building.
//!
//! ## JSON Format
//!
//! ```json
//! {
//!   "entries": [
//!     { "key": 2, "value": 20 },
//!     { "key": 3, "value": 30 },
//!     { "key": 5, "value": 50 }
//!   ]
//! }
//! ```
//!
//! Entries must be in strictly increasing key order; the loader panics
//! otherwise rather than hand tests a malformed list.
//!
//! ## Usage
//!
//! ```ignore
//! #[test]
//! fn test_with_fixture() {
//!     let list = sample_list("fixtures/sample_list.json");
//!     assert_eq!(list.lookup(&2, |v| *v), Some(20));
//! }
//! ```
//!
//! ## Limitations
//!
//! - Keys are always `i64`
//! - Values are always `u64`

use serde::Deserialize;

use crate::rmw::RmwLock;
use crate::sync::Arc;
use crate::{Links, Node, NodeRef, SortedList, WriteGuard};

// ---------------------------------------------------------------------------
// JSON Deserialization Structures
// ---------------------------------------------------------------------------

/// A key-value entry in the fixture.
#[derive(Deserialize, Debug)]
struct Entry {
	/// The entry's key.
	key: i64,
	/// The entry's value.
	value: u64,
}

/// Top-level structure of a JSON fixture file.
#[derive(Deserialize, Debug)]
struct SampleList {
	/// The entries, in strictly increasing key order.
	entries: Vec<Entry>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Loads a sample list from a JSON fixture file.
///
/// The list is assembled link by link with write locks held, the same way a
/// finished insertion leaves the structure, but without running any search
/// or insertion logic.
///
/// # Panics
///
/// Panics if the file cannot be found or parsed, or if the entries are not
/// in strictly increasing key order.
pub fn sample_list<P: AsRef<std::path::Path>>(path: P) -> SortedList<i64, u64> {
	let file = std::fs::File::open(path).expect("failed to find file");
	let json: SampleList = serde_json::from_reader(file).unwrap();

	for pair in json.entries.windows(2) {
		assert!(pair[0].key < pair[1].key, "fixture entries must be strictly increasing");
	}

	let list: SortedList<i64, u64> = SortedList::new();
	let mut last: NodeRef<i64, u64> = NodeRef::clone(&list.head);

	for entry in json.entries {
		let node: NodeRef<i64, u64> = Arc::new(Node {
			key: Some(entry.key),
			value: Some(entry.value),
			links: RmwLock::new(Links {
				prev: Some(NodeRef::clone(&last)),
				next: Some(NodeRef::clone(&list.tail)),
				active: true,
			}),
		});

		{
			let mut guard = WriteGuard::acquire(NodeRef::clone(&last));
			guard.links_mut().next = Some(NodeRef::clone(&node));
		}
		last = node;
	}

	{
		let mut guard = WriteGuard::acquire(NodeRef::clone(&list.tail));
		guard.links_mut().prev = Some(last);
	}

	list
}

#[cfg(not(loom))]
mod tests {
	use super::*;

	#[test]
	fn sample_list_loads_and_validates() {
		let list = sample_list("fixtures/sample_list.json");

		list.assert_invariants();
		assert_eq!(list.len(), 3);
		assert_eq!(list.lookup(&2, |v| *v), Some(20));
		assert_eq!(list.lookup(&3, |v| *v), Some(30));
		assert_eq!(list.lookup(&5, |v| *v), Some(50));
		assert_eq!(list.lookup(&4, |v| *v), None);
	}

	#[test]
	fn fixture_list_accepts_further_operations() {
		let list = sample_list("fixtures/sample_list.json");

		assert!(list.insert_tail(4, 40));
		assert!(!list.insert_head(5, 99));
		assert!(list.remove(&2));

		list.assert_invariants();
		assert_eq!(list.len(), 3);
	}
}
