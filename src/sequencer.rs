use std::collections::VecDeque;

use log::trace;
use parking_lot::RwLock;
use static_assertions::assert_impl_all;

use crate::replacement_map::{Overlay, ReplacementMap};

/// MVCC ordering of committed transactions.
///
/// Readers started before a commit continue to see pre-commit bytes through
/// the undo map retained by that commit's record. The list is protected by a
/// single reader/writer lock: [`read_at`](TxSequencer::read_at) holds the
/// reader side for the duration of one call; [`begin`](TxSequencer::begin)
/// and [`commit`](TxSequencer::commit) hold the writer side briefly.
pub struct TxSequencer {
	inner: RwLock<Inner>,
}
assert_impl_all!(TxSequencer: Send, Sync);

struct Record {
	committed: bool,
	undo: ReplacementMap,
}

enum Slot {
	Occupied(Record),
	Vacant(Option<usize>),
}

#[derive(Default)]
struct Inner {
	arena: Vec<Slot>,
	free_head: Option<usize>,
	order: VecDeque<usize>,
}

impl Inner {
	fn alloc(&mut self, record: Record) -> usize {
		match self.free_head {
			Some(id) => {
				let Slot::Vacant(next) = self.arena[id] else {
					unreachable!("free list pointed at an occupied slot")
				};
				self.free_head = next;
				self.arena[id] = Slot::Occupied(record);
				id
			}
			None => {
				self.arena.push(Slot::Occupied(record));
				self.arena.len() - 1
			}
		}
	}

	fn free(&mut self, id: usize) -> Record {
		let slot = std::mem::replace(&mut self.arena[id], Slot::Vacant(self.free_head));
		self.free_head = Some(id);
		match slot {
			Slot::Occupied(record) => record,
			Slot::Vacant(_) => unreachable!("freed an already-vacant slot"),
		}
	}

	fn record(&self, id: usize) -> &Record {
		match &self.arena[id] {
			Slot::Occupied(record) => record,
			Slot::Vacant(_) => unreachable!("record handle outlived its slot"),
		}
	}

	fn record_mut(&mut self, id: usize) -> &mut Record {
		match &mut self.arena[id] {
			Slot::Occupied(record) => record,
			Slot::Vacant(_) => unreachable!("record handle outlived its slot"),
		}
	}

	fn detach(&mut self, id: usize) {
		let pos = self
			.order
			.iter()
			.position(|&candidate| candidate == id)
			.expect("record id must be present in the order list");
		self.order.remove(pos);
	}

	/// Drops committed records from the front of the list as long as no live
	/// (uncommitted) transaction predates them.
	fn prune(&mut self) {
		while let Some(&id) = self.order.front() {
			if !self.record(id).committed {
				break;
			}
			self.order.pop_front();
			self.free(id);
			trace!("tx_sequencer: pruned record {id}");
		}
	}
}

/// A handle identifying a transaction's position in the [`TxSequencer`].
#[derive(Debug)]
pub struct TxSeqTx {
	id: usize,
}

impl TxSequencer {
	pub fn new() -> Self {
		Self {
			inner: RwLock::new(Inner::default()),
		}
	}

	/// Begins a new transaction. `alloc` runs under the writer lock so that
	/// transaction id allocation and the sequencer's bookkeeping stay
	/// consistent with each other.
	pub fn begin<T>(&self, alloc: impl FnOnce() -> T) -> (T, TxSeqTx) {
		let mut inner = self.inner.write();
		let value = alloc();
		let id = inner.alloc(Record {
			committed: false,
			undo: ReplacementMap::new(),
		});
		inner.order.push_back(id);
		(value, TxSeqTx { id })
	}

	/// Reads through every later *committed* record's undo map, in order,
	/// stopping at the first hit. Clamps across record boundaries exactly
	/// like [`ReplacementMap::read_at`].
	pub fn read_at(&self, tx: &TxSeqTx, off: u64, buf: &mut [u8]) -> Overlay {
		let inner = self.inner.read();
		let start = inner
			.order
			.iter()
			.position(|&id| id == tx.id)
			.expect("transaction must still be registered");

		let mut len = buf.len();
		for &id in inner.order.iter().skip(start + 1) {
			let record = inner.record(id);
			if !record.committed {
				continue;
			}
			match record.undo.read_at(off, &mut buf[..len]) {
				Overlay::Hit(n) => return Overlay::Hit(n),
				Overlay::Gap(g) => len = len.min(g),
			}
		}
		Overlay::Gap(len)
	}

	/// Commits `tx`, retaining `undo` so older readers keep seeing pre-commit
	/// bytes. `tx`'s record moves from its begin-time position to the tail.
	pub fn commit(&self, tx: TxSeqTx, undo: ReplacementMap) {
		let mut inner = self.inner.write();
		inner.detach(tx.id);
		{
			let record = inner.record_mut(tx.id);
			record.committed = true;
			record.undo = undo;
		}
		inner.order.push_back(tx.id);
		inner.prune();
	}

	/// Ends a transaction that performed no commit (read-only completion, or
	/// rollback of a write transaction). Its placeholder is removed with no
	/// undo retained.
	pub fn end(&self, tx: TxSeqTx) {
		let mut inner = self.inner.write();
		inner.detach(tx.id);
		inner.free(tx.id);
		inner.prune();
	}
}

impl Default for TxSequencer {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn reader_sees_undo_of_later_commit() {
		let seq = TxSequencer::new();
		let (_, reader) = seq.begin(|| ());

		let (_, writer) = seq.begin(|| ());
		let mut undo = ReplacementMap::new();
		undo.write_at(0, b"before", true).unwrap().commit();
		seq.commit(writer, undo);

		let mut buf = [0u8; 6];
		assert_eq!(seq.read_at(&reader, 0, &mut buf), Overlay::Hit(6));
		assert_eq!(&buf, b"before");

		seq.end(reader);
	}

	#[test]
	fn reader_started_after_commit_falls_through() {
		let seq = TxSequencer::new();
		let (_, writer) = seq.begin(|| ());
		let mut undo = ReplacementMap::new();
		undo.write_at(0, b"before", true).unwrap().commit();
		seq.commit(writer, undo);

		let (_, reader) = seq.begin(|| ());
		let mut buf = [0u8; 6];
		assert_eq!(seq.read_at(&reader, 0, &mut buf), Overlay::Gap(6));
		seq.end(reader);
	}

	#[test]
	fn committed_head_with_no_earlier_readers_is_pruned() {
		let seq = TxSequencer::new();
		let (_, writer) = seq.begin(|| ());
		let mut undo = ReplacementMap::new();
		undo.write_at(0, b"x", true).unwrap().commit();
		seq.commit(writer, undo);

		let inner = seq.inner.read();
		assert!(inner.order.is_empty());
	}

	#[test]
	fn retained_undo_survives_until_oldest_reader_ends() {
		let seq = TxSequencer::new();
		let (_, reader) = seq.begin(|| ());

		let (_, writer) = seq.begin(|| ());
		let mut undo = ReplacementMap::new();
		undo.write_at(0, b"x", true).unwrap().commit();
		seq.commit(writer, undo);

		assert_eq!(seq.inner.read().order.len(), 2);
		seq.end(reader);
		assert!(seq.inner.read().order.is_empty());
	}
}
