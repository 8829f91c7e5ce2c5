use parking_lot::Mutex;
use static_assertions::assert_impl_all;

use crate::{
	config::SequenceConfig,
	consts::SEQUENCE_MAGIC,
	error::{SequenceError, TxFileError},
	txfile::{Transaction, TxFile},
};

/// On-disk layout, at a caller-chosen offset: 8 bytes magic, 8 bytes
/// big-endian "next batch start" counter.
const MAGIC_SIZE: u64 = SEQUENCE_MAGIC.len() as u64;

/// Writes the sequence header (magic + initial counter) as part of an
/// already-open transaction. The caller commits.
pub fn init(tx: &mut Transaction, offset: u64, initial: u64) -> Result<(), TxFileError> {
	tx.write_at(offset, &SEQUENCE_MAGIC)?;
	tx.write_at(offset + MAGIC_SIZE, &initial.to_be_bytes())?;
	Ok(())
}

fn read_counter(tx: &Transaction, offset: u64) -> Result<u64, TxFileError> {
	let mut buf = [0u8; 8];
	tx.read_at_exact(offset + MAGIC_SIZE, &mut buf)?;
	Ok(u64::from_be_bytes(buf))
}

fn check_magic(tx: &Transaction, offset: u64) -> Result<(), SequenceError> {
	let mut magic = [0u8; MAGIC_SIZE as usize];
	tx.read_at_exact(offset, &mut magic)?;
	if magic != SEQUENCE_MAGIC {
		return Err(SequenceError::InvalidMagic);
	}
	Ok(())
}

struct State {
	cache_avail: u64,
	next_val: u64,
}

/// A monotone ID allocator durable across restarts, with a batched in-memory
/// cache to amortise WAL writes. Gaps after a crash are expected: unused
/// cached IDs are simply lost, but strict monotonicity is preserved.
pub struct Sequence<'f> {
	file: &'f TxFile,
	offset: u64,
	cache_size: u64,
	state: Mutex<State>,
}
assert_impl_all!(Sequence<'static>: Send, Sync);

impl<'f> Sequence<'f> {
	/// Creates a brand-new sequence header and commits it.
	pub fn create(
		file: &'f TxFile,
		offset: u64,
		initial: u64,
		config: &SequenceConfig,
	) -> Result<Self, SequenceError> {
		if config.cache_size == 0 {
			return Err(SequenceError::ZeroCacheSize);
		}
		let mut tx = file.begin(false);
		init(&mut tx, offset, initial)?;
		tx.commit()?;

		Ok(Self {
			file,
			offset,
			cache_size: config.cache_size,
			state: Mutex::new(State {
				cache_avail: 0,
				next_val: initial,
			}),
		})
	}

	/// Opens an existing sequence header, validating its magic number.
	pub fn open(
		file: &'f TxFile,
		offset: u64,
		config: &SequenceConfig,
	) -> Result<Self, SequenceError> {
		if config.cache_size == 0 {
			return Err(SequenceError::ZeroCacheSize);
		}
		let tx = file.begin(true);
		check_magic(&tx, offset)?;

		Ok(Self {
			file,
			offset,
			cache_size: config.cache_size,
			state: Mutex::new(State {
				cache_avail: 0,
				next_val: 0,
			}),
		})
	}

	/// Returns the next value in the sequence, refilling the on-disk counter
	/// in a batch of `cache_size` whenever the in-memory cache runs dry.
	pub fn next(&self) -> Result<u64, SequenceError> {
		let mut state = self.state.lock();
		if state.cache_avail == 0 {
			let mut tx = self.file.begin(false);
			let counter = read_counter(&tx, self.offset)?;
			let new_counter = counter + self.cache_size;
			tx.write_at(self.offset + MAGIC_SIZE, &new_counter.to_be_bytes())?;
			tx.commit()?;

			state.next_val = counter;
			state.cache_avail = self.cache_size;
		}

		let val = state.next_val;
		state.next_val += 1;
		state.cache_avail -= 1;
		Ok(val)
	}
}

#[cfg(test)]
mod tests {
	use tempfile::tempfile;

	use super::*;
	use crate::config::WalConfig;

	fn new_txfile() -> TxFile {
		let file = tempfile().unwrap();
		TxFile::create(file, 0, &WalConfig { wal_len: 4096, ..Default::default() }).unwrap()
	}

	#[test]
	fn batches_allocations_and_persists_across_reopen() {
		let txfile = new_txfile();
		let mut tx = txfile.begin(false);
		init(&mut tx, 0, 100).unwrap();
		tx.commit().unwrap();

		let config = SequenceConfig { cache_size: 10 };
		let seq = Sequence::open(&txfile, 0, &config).unwrap();
		let values: Vec<u64> = (0..10).map(|_| seq.next().unwrap()).collect();
		assert_eq!(values, (100..110).collect::<Vec<_>>());

		// "Reopen": a fresh Sequence handle reads the on-disk counter again.
		let seq2 = Sequence::open(&txfile, 0, &config).unwrap();
		assert_eq!(seq2.next().unwrap(), 110);
	}

	#[test]
	fn create_allocates_from_the_initial_value() {
		let txfile = new_txfile();
		let seq = Sequence::create(&txfile, 0, 42, &SequenceConfig { cache_size: 4 }).unwrap();
		assert_eq!(seq.next().unwrap(), 42);
		assert_eq!(seq.next().unwrap(), 43);
	}

	#[test]
	fn zero_cache_size_is_rejected() {
		let txfile = new_txfile();
		assert!(matches!(
			Sequence::create(&txfile, 0, 0, &SequenceConfig { cache_size: 0 }),
			Err(SequenceError::ZeroCacheSize)
		));
	}

	#[test]
	fn opening_a_non_sequence_fails_with_invalid_magic() {
		let txfile = new_txfile();
		let mut tx = txfile.begin(false);
		tx.resize(64).unwrap();
		tx.write_at(0, b"not a sequence!!").unwrap();
		tx.commit().unwrap();

		assert!(matches!(
			Sequence::open(&txfile, 0, &SequenceConfig { cache_size: 1 }),
			Err(SequenceError::InvalidMagic)
		));
	}
}
