//! `monsoon-txfile` is the transactional storage substrate underlying
//! Monsoon's history store: a crash-safe, MVCC-capable, byte-addressable
//! file built from a write-ahead log, an in-memory replacement-map overlay,
//! a transaction sequencer providing snapshot isolation, a durable monotone
//! [`Sequence`](sequence::Sequence), and a fixed-layout
//! [`TxAwareRecord`](tx_record::TxAwareRecord) header for MVCC visibility in
//! higher layers (such as the B-tree built on top of this crate).

pub mod config;
pub mod consts;
pub mod error;
pub mod positional_file;
mod replacement_map;
pub mod sequence;
mod sequencer;
pub mod tx_record;
pub mod txfile;
mod wal;

pub use config::{SequenceConfig, WalConfig};
pub use error::TxFileError;
pub use positional_file::PositionalFile;
pub use sequence::Sequence;
pub use tx_record::TxAwareRecord;
pub use txfile::{Transaction, TxFile};
