//! Implementation of a concurrent sorted doubly-linked-list map guarded by fair
//! per-node read/may-write/write locks.
//!
//! The list keeps its nodes in strictly increasing key order between two
//! permanent sentinels and lets any number of threads insert, remove, and
//! search concurrently without a list-wide lock: every operation walks the
//! chain hand-over-hand, holding at most two adjacent node locks at a time.
//! The three-mode lock ([`rmw::RmwLock`]) is what makes the walk safe: a
//! mutating traverser holds the pair in *may-write* mode, which keeps rival
//! writers out of the neighborhood while still admitting readers, and
//! upgrades to full write mode only for the final splice.
//!
//! ```
//! use fernlist::SortedList;
//!
//! let list = SortedList::new();
//!
//! assert!(list.insert_head(5, "five"));
//! assert!(!list.insert_tail(5, "five again"));
//! assert_eq!(list.lookup(&5, |v| *v), Some("five"));
//! ```

use std::fmt;
use std::mem::ManuallyDrop;

pub mod alloc;
pub mod rmw;
pub(crate) mod sync;
#[cfg(test)]
pub mod util;

use crate::rmw::RmwLock;
use crate::sync::Arc;

/// Shared handle to a node. Cloned freely by traversers; a node stays fully
/// readable for every holder even after it is unlinked from the list.
type NodeRef<K, V> = Arc<Node<K, V>>;

// ===========================================================================
// Node Model
// ===========================================================================

/// A list node: an immutable key/value pair plus the lock-guarded links.
///
/// The two sentinels carry `None` for `key` and `value`; everything that
/// needs to distinguish them compares handles against the list's `head` and
/// `tail` by identity, never by key.
pub(crate) struct Node<K, V> {
	key: Option<K>,
	value: Option<V>,
	links: RmwLock<Links<K, V>>,
}

/// The mutable part of a node, protected by the node's own lock.
pub(crate) struct Links<K, V> {
	/// Predecessor in list order; `None` only for the head sentinel and for
	/// nodes severed by the list destructor.
	prev: Option<NodeRef<K, V>>,
	/// Successor in list order; `None` only for the tail sentinel and for
	/// severed nodes.
	next: Option<NodeRef<K, V>>,
	/// Cleared exactly once, under exclusive locks, when the node is
	/// unlinked. Never set back to true.
	active: bool,
}

impl<K, V> Node<K, V> {
	fn sentinel() -> Node<K, V> {
		Node {
			key: None,
			value: None,
			links: RmwLock::new(Links {
				prev: None,
				next: None,
				active: true,
			}),
		}
	}

	fn key(&self) -> &K {
		self.key.as_ref().expect("sentinels are never compared by key")
	}
}

impl<K: fmt::Debug, V> fmt::Debug for Node<K, V> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.key {
			Some(ref key) => f.debug_tuple("Node").field(key).finish(),
			None => f.write_str("Sentinel"),
		}
	}
}

// ===========================================================================
// Node Guards
// ===========================================================================
//
// Lock-coupling hands locks across function boundaries while the nodes are
// shared through `Arc`, so the guards own the `NodeRef` they locked instead
// of borrowing it. Dropping a guard releases its mode; `MayWriteGuard`
// additionally consumes itself into a `WriteGuard` via the lock's upgrade.
//
// Every deref of the link cell below relies on the same safety argument:
// the guard's mode is held from construction to drop, shared modes only ever
// produce `&Links`, and the write mode is exclusive for `&mut Links`.

/// Shared access to a node's links. Coexists with other readers and with
/// one may-writer.
struct ReadGuard<K, V> {
	node: NodeRef<K, V>,
}

impl<K, V> ReadGuard<K, V> {
	fn acquire(node: NodeRef<K, V>) -> ReadGuard<K, V> {
		node.links.lock_read();
		ReadGuard {
			node,
		}
	}

	fn node(&self) -> &NodeRef<K, V> {
		&self.node
	}

	fn links(&self) -> &Links<K, V> {
		// SAFETY: the read lock is held for this guard's lifetime, so no
		// writer can be mutating the cell.
		unsafe { &*self.node.links.data_ptr() }
	}
}

impl<K, V> Drop for ReadGuard<K, V> {
	fn drop(&mut self) {
		self.node.links.unlock_read();
	}
}

/// Shared access with a reserved upgrade path. At most one of these exists
/// per node, which is exactly what keeps two splicers out of the same
/// neighborhood during traversal.
struct MayWriteGuard<K, V> {
	node: NodeRef<K, V>,
}

impl<K, V> MayWriteGuard<K, V> {
	fn acquire(node: NodeRef<K, V>) -> MayWriteGuard<K, V> {
		node.links.lock_may_write();
		MayWriteGuard {
			node,
		}
	}

	fn node(&self) -> &NodeRef<K, V> {
		&self.node
	}

	fn links(&self) -> &Links<K, V> {
		// SAFETY: may-write is a shared mode held for this guard's
		// lifetime; writers are excluded.
		unsafe { &*self.node.links.data_ptr() }
	}

	/// Trades the may-write hold for a write hold, blocking until current
	/// readers drain. The upgrade request overtakes every queued waiter.
	fn upgrade(self) -> WriteGuard<K, V> {
		let node = self.into_node();
		node.links.upgrade();
		WriteGuard {
			node,
		}
	}

	/// Disassembles the guard without running its release; the caller takes
	/// over the lock hold.
	fn into_node(self) -> NodeRef<K, V> {
		let this = ManuallyDrop::new(self);
		// SAFETY: `this` is never dropped, so the node handle is moved out
		// exactly once and the may-write hold is not released here.
		unsafe { std::ptr::read(&this.node) }
	}
}

impl<K, V> Drop for MayWriteGuard<K, V> {
	fn drop(&mut self) {
		self.node.links.unlock_may_write();
	}
}

/// Exclusive access to a node's links.
struct WriteGuard<K, V> {
	node: NodeRef<K, V>,
}

impl<K, V> WriteGuard<K, V> {
	fn acquire(node: NodeRef<K, V>) -> WriteGuard<K, V> {
		node.links.lock_write();
		WriteGuard {
			node,
		}
	}

	fn node(&self) -> &NodeRef<K, V> {
		&self.node
	}

	fn links(&self) -> &Links<K, V> {
		// SAFETY: the write lock is exclusive and held for this guard's
		// lifetime.
		unsafe { &*self.node.links.data_ptr() }
	}

	fn links_mut(&mut self) -> &mut Links<K, V> {
		// SAFETY: as above, and `&mut self` makes this the only path to the
		// cell through this guard.
		unsafe { &mut *self.node.links.data_ptr() }
	}
}

impl<K, V> Drop for WriteGuard<K, V> {
	fn drop(&mut self) {
		self.node.links.unlock_write();
	}
}

// ===========================================================================
// SortedList
// ===========================================================================

/// A concurrent map backed by a sorted doubly-linked list.
///
/// Keys are unique and kept in strictly increasing order between a permanent
/// head and tail sentinel. All operations are safe to call from any number
/// of threads simultaneously; none of them takes a structure-wide lock.
///
/// # Traversal discipline
///
/// Searches walk forward holding at most one node lock in read mode at a
/// time, releasing it before acquiring the successor; the shared handle
/// keeps the bridged node alive and readable across the gap. Mutating
/// operations walk forward holding an adjacent *pair* in may-write mode,
/// which admits concurrent readers but excludes any other would-be writer
/// from the same pair; the final splice upgrades both holds to write mode.
/// [`insert_tail`](SortedList::insert_tail) approaches from the rear
/// instead, hopping backward with *no* lock held across each hop (holding
/// one would deadlock against the forward walkers) and revalidating its
/// position after every reacquisition.
pub struct SortedList<K, V> {
	head: NodeRef<K, V>,
	tail: NodeRef<K, V>,
}

impl<K: Ord, V> Default for SortedList<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: Ord, V> SortedList<K, V> {
	/// Makes a new, empty `SortedList`.
	///
	/// Allocates the two sentinels and wires them to each other.
	pub fn new() -> SortedList<K, V> {
		let head: NodeRef<K, V> = Arc::new(Node::sentinel());
		let tail: NodeRef<K, V> = Arc::new(Node {
			key: None,
			value: None,
			links: RmwLock::new(Links {
				prev: Some(NodeRef::clone(&head)),
				next: None,
				active: true,
			}),
		});

		{
			let mut head_guard = WriteGuard::acquire(NodeRef::clone(&head));
			head_guard.links_mut().next = Some(NodeRef::clone(&tail));
		}

		SortedList {
			head,
			tail,
		}
	}

	#[inline]
	fn is_head(&self, node: &NodeRef<K, V>) -> bool {
		Arc::ptr_eq(node, &self.head)
	}

	#[inline]
	fn is_tail(&self, node: &NodeRef<K, V>) -> bool {
		Arc::ptr_eq(node, &self.tail)
	}

	// -----------------------------------------------------------------------
	// Traversal
	// -----------------------------------------------------------------------

	/// Walks forward from `start` to the candidate for `key`: the first node
	/// whose key is `>= key`, or the tail sentinel. The head sentinel is
	/// stepped over unconditionally.
	///
	/// Single-lock coupling with a gap: each step captures the successor
	/// handle under the current lock, releases it, and only then acquires
	/// the successor. Holding the current lock while queueing on the
	/// successor would close a cycle against an upgrader waiting for this
	/// reader to drain while a backward walker sits queued ahead of us on
	/// the successor, so the lock-free gap is mandatory, not an
	/// optimization. The `Arc` keeps the successor alive across the gap,
	/// and a node deleted inside the gap still carries usable links; the
	/// caller's `active` recheck on the candidate covers the rest.
	fn find_key_read(&self, start: ReadGuard<K, V>, key: &K) -> ReadGuard<K, V> {
		let mut current = start;

		loop {
			{
				let node = current.node();
				if !self.is_head(node) && (self.is_tail(node) || node.key() >= key) {
					return current;
				}
			}

			let next = current
				.links()
				.next
				.clone()
				.expect("a node before the tail has a successor");
			// No lock is held between these two statements.
			drop(current);
			current = ReadGuard::acquire(next);
		}
	}

	/// Walks forward from `position` to the candidate for `key`, returning
	/// the `(predecessor, candidate)` pair with both held in may-write mode.
	///
	/// The caller must hold `position` in may-write mode; `position` must be
	/// active and must not be the tail.
	///
	/// Two-lock coupling: while the pair is held, a competing splice between
	/// the two nodes would need both of them in write mode, which the
	/// may-write holds exclude. Advancing releases the trailing lock only
	/// after the leading one is secured.
	fn find_key_may_write(
		&self,
		position: MayWriteGuard<K, V>,
		key: &K,
	) -> (MayWriteGuard<K, V>, MayWriteGuard<K, V>) {
		let mut prev = position;
		let mut next = {
			let first = prev
				.links()
				.next
				.clone()
				.expect("a node before the tail has a successor");
			MayWriteGuard::acquire(first)
		};

		loop {
			{
				let node = next.node();
				if self.is_tail(node) || node.key() >= key {
					return (prev, next);
				}
			}

			let ahead = next
				.links()
				.next
				.clone()
				.expect("a node before the tail has a successor");
			drop(prev);
			prev = next;
			next = MayWriteGuard::acquire(ahead);
		}
	}

	// -----------------------------------------------------------------------
	// Insertion
	// -----------------------------------------------------------------------

	/// Splices `key`/`value` in at the sorted position found forward of
	/// `position`, unless the key is already present.
	///
	/// The caller must hold `position` in may-write mode; `position` must be
	/// active and must not be the tail. Both upgrades below are safe to
	/// request in sequence: upgrades overtake the waiter queue, and a second
	/// upgrader on the same pair cannot exist while we hold may-write.
	fn insert_from_position(&self, position: MayWriteGuard<K, V>, key: K, value: V) -> bool {
		let (prev, next) = self.find_key_may_write(position, &key);

		if !self.is_tail(next.node()) && *next.node().key() == key {
			// Both may-write holds release on drop.
			return false;
		}

		let mut prev = prev.upgrade();
		let mut next = next.upgrade();

		let node: NodeRef<K, V> = Arc::new(Node {
			key: Some(key),
			value: Some(value),
			links: RmwLock::new(Links {
				prev: Some(NodeRef::clone(prev.node())),
				next: Some(NodeRef::clone(next.node())),
				active: true,
			}),
		});

		prev.links_mut().next = Some(NodeRef::clone(&node));
		next.links_mut().prev = Some(node);

		true
	}

	/// Inserts `key`/`value` at its sorted position, searching forward from
	/// the head sentinel.
	///
	/// Returns `true` on insertion, `false` if the key was already present
	/// (in which case the stored value is untouched).
	pub fn insert_head(&self, key: K, value: V) -> bool {
		let position = MayWriteGuard::acquire(NodeRef::clone(&self.head));
		self.insert_from_position(position, key, value)
	}

	/// Inserts `key`/`value` at its sorted position, searching backward from
	/// the tail sentinel.
	///
	/// Returns `true` on insertion, `false` if the key was already present.
	///
	/// Backward motion cannot use the forward pair-coupling (acquiring
	/// against list order would deadlock with forward walkers), so each hop
	/// releases its lock before taking the next one. The gap means the node
	/// reacquired as `prev` may have been unlinked in the meantime; an
	/// inactive node is stepped over by following its (possibly stale, but
	/// still chain-connected) `prev` link, and the final forward search from
	/// the resting position absorbs any concurrent splices.
	pub fn insert_tail(&self, key: K, value: V) -> bool {
		let first_prev = {
			let tail_guard = ReadGuard::acquire(NodeRef::clone(&self.tail));
			tail_guard.links().prev.clone().expect("tail sentinel has a predecessor")
		};
		// No lock is held here.
		let mut prev = MayWriteGuard::acquire(first_prev);

		loop {
			let hop = {
				let node = prev.node();
				if self.is_head(node) {
					None
				} else {
					let links = prev.links();
					if links.active && *node.key() <= key {
						None
					} else {
						Some(
							links
								.prev
								.clone()
								.expect("a node behind the head has a predecessor"),
						)
					}
				}
			};

			match hop {
				Some(behind) => {
					// No lock is held across the hop.
					drop(prev);
					prev = MayWriteGuard::acquire(behind);
				}
				None => break,
			}
		}

		if !self.is_head(prev.node()) && *prev.node().key() == key {
			return false;
		}

		self.insert_from_position(prev, key, value)
	}

	// -----------------------------------------------------------------------
	// Removal
	// -----------------------------------------------------------------------

	/// Unlinks the node with `key`, if present, and marks it inactive.
	///
	/// Returns `true` if a node was removed. Traversers that still hold a
	/// handle to the removed node keep reading it safely: its key, value,
	/// and links stay intact, only `active` flips.
	pub fn remove(&self, key: &K) -> bool {
		let position = MayWriteGuard::acquire(NodeRef::clone(&self.head));
		let (prev, target) = self.find_key_may_write(position, key);

		if self.is_tail(target.node()) || *target.node().key() != *key {
			return false;
		}

		let mut prev = prev.upgrade();
		let mut target = target.upgrade();

		let succ = target
			.links()
			.next
			.clone()
			.expect("a node before the tail has a successor");
		// The successor is strictly ahead of the held pair in list order,
		// and no forward walker can pass the write-held target to reach it,
		// so a fresh write acquisition cannot deadlock.
		let mut succ = WriteGuard::acquire(succ);

		prev.links_mut().next = Some(NodeRef::clone(succ.node()));
		succ.links_mut().prev = Some(NodeRef::clone(prev.node()));
		// The target's own links are left pointing into the list so that a
		// backward walker still holding it can rejoin the live chain.
		target.links_mut().active = false;

		true
	}

	// -----------------------------------------------------------------------
	// Search
	// -----------------------------------------------------------------------

	/// Looks up `key` and applies `f` to the stored value under the
	/// candidate node's read lock.
	///
	/// Returns `None` if the key is absent. The closure borrows the value in
	/// place; nothing is copied out of the list.
	pub fn lookup<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
		let start = ReadGuard::acquire(NodeRef::clone(&self.head));
		let candidate = self.find_key_read(start, key);

		let node = candidate.node();
		if self.is_tail(node) || !candidate.links().active || *node.key() != *key {
			return None;
		}

		Some(f(node.value.as_ref().expect("a real node carries a value")))
	}

	/// Returns `true` if `key` is present.
	pub fn contains_key(&self, key: &K) -> bool {
		self.lookup(key, |_| ()).is_some()
	}

	// -----------------------------------------------------------------------
	// Observers
	// -----------------------------------------------------------------------

	/// Returns the number of entries, counted by a read-coupled walk. Exact
	/// at any quiescent point; a snapshot of one possible state while
	/// writers are active.
	pub fn len(&self) -> usize {
		let mut count = 0usize;
		let mut current = ReadGuard::acquire(NodeRef::clone(&self.head));

		loop {
			let next = current
				.links()
				.next
				.clone()
				.expect("a node before the tail has a successor");
			drop(current);
			current = ReadGuard::acquire(next);

			if self.is_tail(current.node()) {
				return count;
			}
			count += 1;
		}
	}

	/// Returns `true` if the list holds no entries.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<K: Ord + fmt::Debug, V> SortedList<K, V> {
	/// Walks the whole list with paired read locks and panics on any
	/// structural violation: keys out of order, asymmetric links, an
	/// inactive node still reachable, or a sentinel with an outward link.
	///
	/// The structural guarantees it checks hold at quiescent points, so
	/// call it when no mutating operation is in flight.
	pub fn assert_invariants(&self) {
		let mut prev = ReadGuard::acquire(NodeRef::clone(&self.head));
		assert!(prev.links().prev.is_none(), "head sentinel has a predecessor");
		assert!(prev.links().active, "head sentinel marked inactive");

		loop {
			let next = prev
				.links()
				.next
				.clone()
				.expect("a node before the tail has a successor");
			let next_guard = ReadGuard::acquire(next);

			{
				let back = next_guard
					.links()
					.prev
					.clone()
					.expect("a reachable node has a predecessor");
				assert!(
					Arc::ptr_eq(&back, prev.node()),
					"link symmetry violated after {:?}",
					prev.node().as_ref()
				);
				assert!(
					next_guard.links().active,
					"inactive node reachable from the head: {:?}",
					next_guard.node().as_ref()
				);
			}

			if self.is_tail(next_guard.node()) {
				assert!(next_guard.links().next.is_none(), "tail sentinel has a successor");
				return;
			}

			if !self.is_head(prev.node()) {
				let a = prev.node().key();
				let b = next_guard.node().key();
				assert!(a < b, "keys out of order: {:?} before {:?}", a, b);
			}

			drop(prev);
			prev = next_guard;
		}
	}
}

impl<K, V> Drop for SortedList<K, V> {
	/// Severs every `prev`/`next` pair so the reference-counted link cycles
	/// cannot strand memory.
	fn drop(&mut self) {
		// `&mut self` guarantees no operation is in flight and no guard
		// exists, so the link cells can be reached without locking.
		//
		// SAFETY: exclusive access per above; each cell is dereferenced at
		// most once at a time.
		let mut cursor = unsafe { (*self.head.links.data_ptr()).next.take() };
		while let Some(node) = cursor {
			if Arc::ptr_eq(&node, &self.tail) {
				break;
			}
			let links = unsafe { &mut *node.links.data_ptr() };
			links.prev = None;
			cursor = links.next.take();
		}
		unsafe { (*self.tail.links.data_ptr()).prev = None };
	}
}

// ===========================================================================
// Tests
// ===========================================================================
