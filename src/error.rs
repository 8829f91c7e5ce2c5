use std::io;

use thiserror::Error;

/// Errors surfaced by [`crate::ReplacementMap`](crate::replacement_map::ReplacementMap).
#[derive(Debug, Error)]
pub enum ReplacementMapError {
	#[error("offset + length overflowed a 64-bit offset")]
	Overflow,

	#[error("out of memory while inserting a replacement segment")]
	OutOfMemory,
}

/// Errors surfaced by [`crate::Sequence`](crate::sequence::Sequence).
#[derive(Debug, Error)]
pub enum SequenceError {
	#[error(transparent)]
	TxFile(#[from] Box<TxFileError>),

	#[error("sequence header has an invalid magic number")]
	InvalidMagic,

	#[error("sequence cache size must be at least 1")]
	ZeroCacheSize,
}

/// The unified error type for the transactional file substrate.
#[derive(Debug, Error)]
pub enum TxFileError {
	#[error(transparent)]
	Io(#[from] io::Error),

	#[error("operation attempted on a transaction that has already committed or rolled back")]
	BadTransaction,

	#[error("attempted to mutate a read-only transaction")]
	ReadOnlyTx,

	#[error("write-ahead log is corrupted: {0}")]
	WalCorrupt(&'static str),

	#[error("transaction does not fit in the write-ahead log, even after rotation")]
	WalFull,

	#[error(transparent)]
	ReplacementMap(#[from] ReplacementMapError),

	#[error("front header has an invalid magic number")]
	InvalidMagic,
}

impl From<TxFileError> for SequenceError {
	fn from(err: TxFileError) -> Self {
		SequenceError::TxFile(Box::new(err))
	}
}
