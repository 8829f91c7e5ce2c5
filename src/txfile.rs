//! The public façade: a crash-safe, MVCC-capable, byte-addressable file.
//!
//! [`TxFile`] owns the write-ahead log ([`crate::wal`]) and the
//! [`TxSequencer`](crate::sequencer::TxSequencer) that gives each
//! [`Transaction`] a consistent snapshot. A transaction is move-only: it is
//! consumed by [`Transaction::commit`] or [`Transaction::rollback`], and
//! dropped-without-either rolls back, mirroring the original C++ design
//! without needing a destructor flag checked by hand.

use std::{io, sync::Arc};

use static_assertions::assert_impl_all;

use crate::{
	config::WalConfig,
	error::TxFileError,
	positional_file::PositionalFile,
	sequencer::{TxSeqTx, TxSequencer},
	wal::WalRegion,
};

/// A crash-safe, MVCC-capable, byte-addressable file built from a
/// write-ahead log and a transaction sequencer.
pub struct TxFile<F: PositionalFile = std::fs::File> {
	wal: WalRegion<F>,
	sequencer: TxSequencer,
}
assert_impl_all!(TxFile<std::fs::File>: Send, Sync);

impl<F: PositionalFile> TxFile<F> {
	/// Initialises a brand-new front header and write-ahead log over `file`,
	/// starting at `front_off`, per `config`.
	pub fn create(file: F, front_off: u64, config: &WalConfig) -> Result<Self, TxFileError> {
		let wal = WalRegion::create(Arc::new(file), front_off, config)?;
		Ok(Self {
			wal,
			sequencer: TxSequencer::new(),
		})
	}

	/// Opens an existing front header, replaying its write-ahead log. Only
	/// `config`'s rotation thresholds apply; the WAL region's length is read
	/// back from the on-disk front header.
	pub fn open(file: F, front_off: u64, config: &WalConfig) -> Result<Self, TxFileError> {
		let wal = WalRegion::open(Arc::new(file), front_off, config)?;
		Ok(Self {
			wal,
			sequencer: TxSequencer::new(),
		})
	}

	/// Begins a new transaction. A read-only transaction's writes are
	/// rejected with [`TxFileError::ReadOnlyTx`]; committing it is
	/// equivalent to ending it, since it never produced an undo record.
	pub fn begin(&self, read_only: bool) -> Transaction<'_, F> {
		let (tx_id, seq_tx) = self.sequencer.begin(|| self.wal.alloc_tx_id());
		Transaction {
			file: self,
			tx_id,
			seq_tx: Some(seq_tx),
			read_only,
			active: true,
		}
	}
}

/// A single transaction against a [`TxFile`]. Borrow-checked single-writer:
/// `&mut Transaction` is required to write, so at most one mutation is in
/// flight at a time.
pub struct Transaction<'f, F: PositionalFile = std::fs::File> {
	file: &'f TxFile<F>,
	tx_id: u32,
	seq_tx: Option<TxSeqTx>,
	read_only: bool,
	active: bool,
}

impl<F: PositionalFile> Transaction<'_, F> {
	fn require_active(&self) -> Result<(), TxFileError> {
		if self.active {
			Ok(())
		} else {
			Err(TxFileError::BadTransaction)
		}
	}

	fn seq_tx(&self) -> &TxSeqTx {
		self.seq_tx
			.as_ref()
			.expect("active transaction always holds a sequencer handle")
	}

	/// Composite read: this transaction's own pending writes, then the WAL's
	/// committed overlay, then every later committed transaction's undo map,
	/// then the underlying file, clamped to this transaction's visible size.
	pub fn read_at(&self, off: u64, buf: &mut [u8]) -> Result<usize, TxFileError> {
		self.require_active()?;
		let seq_tx = self.seq_tx();
		self.file
			.wal
			.read_at(self.tx_id, off, buf, |o, b| self.file.sequencer.read_at(seq_tx, o, b))
	}

	/// Reads exactly `buf.len()` bytes, looping over short reads.
	pub fn read_at_exact(&self, mut off: u64, mut buf: &mut [u8]) -> Result<(), TxFileError> {
		while !buf.is_empty() {
			let n = self.read_at(off, buf)?;
			if n == 0 {
				return Err(TxFileError::Io(io::Error::new(
					io::ErrorKind::UnexpectedEof,
					"transaction read ended before the requested range was filled",
				)));
			}
			buf = &mut buf[n..];
			off += n as u64;
		}
		Ok(())
	}

	pub fn write_at(&mut self, off: u64, bytes: &[u8]) -> Result<(), TxFileError> {
		self.require_active()?;
		if self.read_only {
			return Err(TxFileError::ReadOnlyTx);
		}
		self.file.wal.write_at(self.tx_id, off, bytes)
	}

	/// Applies several writes as part of the same pending change set. They
	/// become visible to other transactions together, at commit.
	pub fn write_at_many(&mut self, writes: &[(u64, &[u8])]) -> Result<(), TxFileError> {
		for &(off, bytes) in writes {
			self.write_at(off, bytes)?;
		}
		Ok(())
	}

	pub fn resize(&mut self, new_size: u64) -> Result<(), TxFileError> {
		self.require_active()?;
		if self.read_only {
			return Err(TxFileError::ReadOnlyTx);
		}
		self.file.wal.resize(self.tx_id, new_size);
		Ok(())
	}

	/// This transaction's view of the file's size: its own pending resize if
	/// any, otherwise the last committed size.
	pub fn size(&self) -> Result<u64, TxFileError> {
		self.require_active()?;
		Ok(self.file.wal.size_for(self.tx_id))
	}

	/// Commits pending writes durably to the write-ahead log and folds them
	/// into the file's committed state. A read-only transaction has nothing
	/// to commit, so this is equivalent to ending it.
	pub fn commit(mut self) -> Result<(), TxFileError> {
		self.require_active()?;
		let seq_tx = self.seq_tx.take().expect("checked by require_active");

		if self.read_only {
			self.file.sequencer.end(seq_tx);
		} else {
			let undo = self
				.file
				.wal
				.commit(self.tx_id, |o, b| self.file.sequencer.read_at(&seq_tx, o, b))?;
			self.file.sequencer.commit(seq_tx, undo);
		}
		self.active = false;
		Ok(())
	}

	/// Discards pending writes. Other transactions never observed them.
	pub fn rollback(mut self) -> Result<(), TxFileError> {
		self.require_active()?;
		self.do_rollback();
		Ok(())
	}

	fn do_rollback(&mut self) {
		self.file.wal.discard(self.tx_id);
		if let Some(seq_tx) = self.seq_tx.take() {
			self.file.sequencer.end(seq_tx);
		}
		self.active = false;
	}
}

impl<F: PositionalFile> Drop for Transaction<'_, F> {
	fn drop(&mut self) {
		if self.active {
			self.do_rollback();
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use tempfile::tempfile;

	use super::*;

	fn new_txfile() -> TxFile {
		TxFile::create(tempfile().unwrap(), 0, &WalConfig { wal_len: 4096, ..Default::default() }).unwrap()
	}

	#[test]
	fn write_commit_then_read_back() {
		let file = new_txfile();
		let mut tx = file.begin(false);
		tx.resize(5).unwrap();
		tx.write_at(0, b"hello").unwrap();
		tx.commit().unwrap();

		let tx = file.begin(true);
		let mut buf = [0u8; 5];
		tx.read_at_exact(0, &mut buf).unwrap();
		assert_eq!(&buf, b"hello");
	}

	#[test]
	fn reader_keeps_snapshot_across_a_later_commit() {
		let file = new_txfile();
		let mut setup = file.begin(false);
		setup.resize(5).unwrap();
		setup.write_at(0, b"old!!").unwrap();
		setup.commit().unwrap();

		let reader = file.begin(true);

		let mut writer = file.begin(false);
		writer.write_at(0, b"NEW!!").unwrap();
		writer.commit().unwrap();

		let mut buf = [0u8; 5];
		reader.read_at_exact(0, &mut buf).unwrap();
		assert_eq!(&buf, b"old!!", "reader must not see the later writer's commit");

		let mut fresh = [0u8; 5];
		file.begin(true).read_at_exact(0, &mut fresh).unwrap();
		assert_eq!(&fresh, b"NEW!!");
	}

	#[test]
	fn rollback_discards_pending_writes() {
		let file = new_txfile();
		let mut setup = file.begin(false);
		setup.resize(5).unwrap();
		setup.write_at(0, b"abcde").unwrap();
		setup.commit().unwrap();

		let mut tx = file.begin(false);
		tx.write_at(0, b"XXXXX").unwrap();
		tx.rollback().unwrap();

		let mut buf = [0u8; 5];
		file.begin(true).read_at_exact(0, &mut buf).unwrap();
		assert_eq!(&buf, b"abcde");
	}

	#[test]
	fn dropping_an_uncommitted_transaction_rolls_it_back() {
		let file = new_txfile();
		let mut setup = file.begin(false);
		setup.resize(5).unwrap();
		setup.write_at(0, b"abcde").unwrap();
		setup.commit().unwrap();

		{
			let mut tx = file.begin(false);
			tx.write_at(0, b"XXXXX").unwrap();
			// dropped without commit or rollback
		}

		let mut buf = [0u8; 5];
		file.begin(true).read_at_exact(0, &mut buf).unwrap();
		assert_eq!(&buf, b"abcde");
	}

	#[test]
	fn survives_crash_recovery() {
		let file = tempfile().unwrap();
		{
			let txfile = TxFile::create(file.try_clone().unwrap(), 0, &WalConfig { wal_len: 4096, ..Default::default() }).unwrap();
			let mut tx = txfile.begin(false);
			tx.resize(11).unwrap();
			tx.write_at(0, b"crash-safe!").unwrap();
			tx.commit().unwrap();
			// txfile dropped here, simulating a process restart
		}

		let txfile = TxFile::open(file, 0, &WalConfig::default()).unwrap();
		let mut buf = [0u8; 11];
		txfile.begin(true).read_at_exact(0, &mut buf).unwrap();
		assert_eq!(&buf, b"crash-safe!");
	}

	#[test]
	fn write_on_read_only_transaction_is_rejected() {
		let file = new_txfile();
		let mut tx = file.begin(true);
		assert!(matches!(
			tx.write_at(0, b"nope"),
			Err(TxFileError::ReadOnlyTx)
		));
	}

	#[test]
	fn write_at_many_applies_as_one_change_set() {
		let file = new_txfile();
		let mut tx = file.begin(false);
		tx.resize(10).unwrap();
		tx.write_at_many(&[(0, b"AAAAA".as_slice()), (5, b"BBBBB".as_slice())])
			.unwrap();
		tx.commit().unwrap();

		let mut buf = [0u8; 10];
		file.begin(true).read_at_exact(0, &mut buf).unwrap();
		assert_eq!(&buf, b"AAAAABBBBB");
	}
}
