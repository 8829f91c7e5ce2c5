mod record;

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace, warn};
use parking_lot::Mutex;
use static_assertions::assert_impl_all;

pub(crate) use record::WalRecord;

use crate::{
	config::WalConfig,
	consts::{FRONT_HEADER_SIZE, FRONT_MAGIC},
	error::TxFileError,
	positional_file::{read_at_exact, write_at_all, PositionalFile},
	replacement_map::{Overlay, ReplacementMap},
};

const PAGE_HEADER_SIZE: u64 = 8;
/// Reserved for the file-size baseline record that every fresh page carries,
/// immediately after its `InvalidatePreviousWal`. Never used for a real
/// transaction.
const BASELINE_TX_ID: u32 = 0;

#[derive(Default, Clone)]
struct PendingTx {
	writes: ReplacementMap,
	resize: Option<u64>,
}

struct WalState {
	committed_map: ReplacementMap,
	pending: HashMap<u32, PendingTx>,
	file_size: u64,
	active_page: u8,
	page_seq: [u64; 2],
	/// Absolute offset (within the backing file) of the next record to append
	/// on the active page.
	cursor: u64,
	next_tx_id: u32,
}

/// Write-ahead log: durable record stream, replay on open, file-size
/// metadata, and per-transaction pending changes.
pub(crate) struct WalRegion<F: PositionalFile> {
	file: Arc<F>,
	wal_off: u64,
	wal_len: u64,
	data_off: u64,
	rotate_threshold_num: u64,
	rotate_threshold_den: u64,
	state: Mutex<WalState>,
}
assert_impl_all!(WalRegion<std::fs::File>: Send, Sync);

impl<F: PositionalFile> WalRegion<F> {
	fn page_size(&self) -> u64 {
		self.wal_len / 2
	}

	fn page_base(&self, page: u8) -> u64 {
		self.wal_off + page as u64 * self.page_size()
	}

	/// Writes the front header, both (empty) WAL pages, and marks page 0
	/// authoritative. `wal_len` comes from `config.wal_len`.
	pub fn create(file: Arc<F>, front_off: u64, config: &WalConfig) -> Result<Self, TxFileError> {
		let wal_len = config.wal_len;
		let wal_off = front_off + FRONT_HEADER_SIZE;
		let data_off = wal_off + wal_len;

		let mut header = Vec::with_capacity(FRONT_HEADER_SIZE as usize);
		header.extend_from_slice(&FRONT_MAGIC);
		header.extend_from_slice(&wal_len.to_be_bytes());
		header.push(0);
		write_at_all(&*file, front_off, &header)?;
		// Both WAL pages must be backed by the file before anything tries to
		// read page 1's header, even though its content is logically all
		// zero until the first rotation.
		file.resize(data_off)?;

		let region = Self {
			file,
			wal_off,
			wal_len,
			data_off,
			rotate_threshold_num: config.rotate_threshold_num,
			rotate_threshold_den: config.rotate_threshold_den,
			state: Mutex::new(WalState {
				committed_map: ReplacementMap::new(),
				pending: HashMap::new(),
				file_size: 0,
				active_page: 0,
				page_seq: [0, 0],
				cursor: 0,
				next_tx_id: 0,
			}),
		};

		// Page 0 starts authoritative (seq 1 > page 1's seq 0); page 1 stays
		// all-zero, which reads as an empty, non-authoritative page.
		{
			let mut state = region.state.lock();
			state.page_seq[0] = 1;
			write_at_all(&*region.file, region.page_base(0), &1u64.to_be_bytes())?;
			region.write_fresh_page_header(&mut state, 0)?;
			region.file.flush_data_only()?;
		}

		Ok(region)
	}

	/// Writes `InvalidatePreviousWal` + the file-size baseline record as the
	/// first two records of `page`, and sets the in-memory cursor to follow them.
	fn write_fresh_page_header(&self, state: &mut WalState, page: u8) -> Result<(), TxFileError> {
		let mut buf = Vec::new();
		WalRecord::InvalidatePreviousWal.encode(&mut buf);
		WalRecord::Resize {
			tx_id: BASELINE_TX_ID,
			new_size: state.file_size,
		}
		.encode(&mut buf);

		let records_off = self.page_base(page) + PAGE_HEADER_SIZE;
		write_at_all(&*self.file, records_off, &buf)?;
		state.active_page = page;
		state.cursor = records_off + buf.len() as u64;
		Ok(())
	}

	/// Reads the front header and replays the authoritative page. `wal_len`
	/// is read back from the header itself; only the rotation thresholds
	/// come from `config`.
	pub fn open(file: Arc<F>, front_off: u64, config: &WalConfig) -> Result<Self, TxFileError> {
		let mut header = [0u8; FRONT_HEADER_SIZE as usize];
		read_at_exact(&*file, front_off, &mut header)?;
		if header[..FRONT_MAGIC.len()] != FRONT_MAGIC {
			return Err(TxFileError::InvalidMagic);
		}
		let wal_len = u64::from_be_bytes(header[15..23].try_into().unwrap());

		let wal_off = front_off + FRONT_HEADER_SIZE;
		let data_off = wal_off + wal_len;
		let page_size = wal_len / 2;

		let mut seq = [0u64; 2];
		for (page, slot) in seq.iter_mut().enumerate() {
			let mut buf = [0u8; 8];
			read_at_exact(&*file, wal_off + page as u64 * page_size, &mut buf)?;
			*slot = u64::from_be_bytes(buf);
		}
		let active_page: u8 = if seq[0] >= seq[1] { 0 } else { 1 };

		let mut page_bytes = vec![0u8; page_size as usize];
		file.read_at(wal_off + active_page as u64 * page_size, &mut page_bytes)?;

		let (records, consumed) = scan_page(&page_bytes[PAGE_HEADER_SIZE as usize..])?;
		debug!(
			"wal: replaying {} records from page {active_page} (seq {})",
			records.len(),
			seq[active_page as usize]
		);

		let mut staging: HashMap<u32, PendingTx> = HashMap::new();
		let mut committed_map = ReplacementMap::new();
		let mut file_size = 0u64;

		for record in records {
			match record {
				WalRecord::End | WalRecord::InvalidatePreviousWal => {}
				WalRecord::Write {
					tx_id,
					offset,
					bytes,
				} => {
					staging
						.entry(tx_id)
						.or_default()
						.writes
						.write_at(offset, &bytes, true)
						.map_err(TxFileError::from)?
						.commit();
				}
				WalRecord::Resize {
					tx_id: BASELINE_TX_ID,
					new_size,
				} => file_size = new_size,
				WalRecord::Resize { tx_id, new_size } => {
					staging.entry(tx_id).or_default().resize = Some(new_size);
				}
				WalRecord::Commit { tx_id } => {
					if let Some(pending) = staging.remove(&tx_id) {
						for segment in pending.writes.iter() {
							committed_map
								.write_at(segment.offset, &segment.bytes, true)
								.map_err(TxFileError::from)?
								.commit();
						}
						if let Some(new_size) = pending.resize {
							file_size = new_size;
						}
					}
				}
				WalRecord::Copy { tx_id, .. } => {
					warn!("wal: ignoring unsupported Copy record for tx {tx_id} during recovery");
				}
			}
		}
		for tx_id in staging.keys() {
			trace!("wal: discarding uncommitted transaction {tx_id} found during recovery");
		}

		Ok(Self {
			file,
			wal_off,
			wal_len,
			data_off,
			rotate_threshold_num: config.rotate_threshold_num,
			rotate_threshold_den: config.rotate_threshold_den,
			state: Mutex::new(WalState {
				committed_map,
				pending: HashMap::new(),
				file_size,
				active_page,
				page_seq: seq,
				cursor: wal_off
					+ active_page as u64 * page_size
					+ PAGE_HEADER_SIZE + consumed as u64,
				next_tx_id: 0,
			}),
		})
	}

	pub fn alloc_tx_id(&self) -> u32 {
		let mut state = self.state.lock();
		state.next_tx_id = state.next_tx_id.wrapping_add(1);
		if state.next_tx_id == BASELINE_TX_ID {
			state.next_tx_id = 1;
		}
		state.next_tx_id
	}

	pub fn write_at(&self, tx_id: u32, off: u64, bytes: &[u8]) -> Result<(), TxFileError> {
		let mut state = self.state.lock();
		state
			.pending
			.entry(tx_id)
			.or_default()
			.writes
			.write_at(off, bytes, true)
			.map_err(TxFileError::from)?
			.commit();
		Ok(())
	}

	pub fn resize(&self, tx_id: u32, new_size: u64) {
		let mut state = self.state.lock();
		state.pending.entry(tx_id).or_default().resize = Some(new_size);
	}

	pub fn size_for(&self, tx_id: u32) -> u64 {
		let state = self.state.lock();
		state
			.pending
			.get(&tx_id)
			.and_then(|p| p.resize)
			.unwrap_or(state.file_size)
	}

	pub fn discard(&self, tx_id: u32) {
		self.state.lock().pending.remove(&tx_id);
	}

	/// Composite read: this transaction's own pending writes, then `seq_read`
	/// (the `TxSequencer` undo chain, which overrides bytes touched by commits
	/// later than this transaction's snapshot), then the durable-but-
	/// unmaterialised `committed_map`, then the underlying file, clamped to
	/// the transaction-visible size.
	pub fn read_at(
		&self,
		tx_id: u32,
		off: u64,
		buf: &mut [u8],
		mut seq_read: impl FnMut(u64, &mut [u8]) -> Overlay,
	) -> Result<usize, TxFileError> {
		let state = self.state.lock();
		self.read_locked(&state, Some(tx_id), off, buf, &mut seq_read)
	}

	fn read_locked(
		&self,
		state: &WalState,
		tx_id: Option<u32>,
		off: u64,
		buf: &mut [u8],
		seq_read: &mut dyn FnMut(u64, &mut [u8]) -> Overlay,
	) -> Result<usize, TxFileError> {
		let mut len = buf.len();

		if let Some(tx_id) = tx_id {
			if let Some(pending) = state.pending.get(&tx_id) {
				match pending.writes.read_at(off, &mut buf[..len]) {
					Overlay::Hit(n) => return Ok(n),
					Overlay::Gap(g) => len = len.min(g),
				}
			}
		}

		// The sequencer's undo chain must be consulted before `committed_map`:
		// a hit here means a *later* commit touched these bytes, so the
		// current committed state is not what this snapshot should see. A
		// gap means nothing changed since this transaction began, so
		// `committed_map` (the newest state) is safe to read directly.
		match seq_read(off, &mut buf[..len]) {
			Overlay::Hit(n) => return Ok(n),
			Overlay::Gap(g) => len = len.min(g),
		}

		match state.committed_map.read_at(off, &mut buf[..len]) {
			Overlay::Hit(n) => return Ok(n),
			Overlay::Gap(g) => len = len.min(g),
		}

		let visible_size = tx_id
			.and_then(|id| state.pending.get(&id))
			.and_then(|p| p.resize)
			.unwrap_or(state.file_size);
		if off >= visible_size {
			return Ok(0);
		}
		len = len.min((visible_size - off) as usize);
		if len == 0 {
			return Ok(0);
		}

		let n = self.file.read_at(self.data_off + off, &mut buf[..len])?;
		for b in &mut buf[n..len] {
			*b = 0;
		}
		Ok(len)
	}

	/// Commits `tx_id`'s pending writes/resize. Returns the undo map (prior
	/// bytes at each written offset) for the caller to retain in the
	/// `TxSequencer`. A transaction with no pending changes commits as a
	/// no-op, returning an empty undo map.
	pub fn commit(
		&self,
		tx_id: u32,
		mut seq_read: impl FnMut(u64, &mut [u8]) -> Overlay,
	) -> Result<ReplacementMap, TxFileError> {
		let mut state = self.state.lock();
		let Some(pending) = state.pending.remove(&tx_id) else {
			return Ok(ReplacementMap::new());
		};
		if pending.writes.is_empty() && pending.resize.is_none() {
			return Ok(ReplacementMap::new());
		}

		let mut undo = ReplacementMap::new();
		for segment in pending.writes.iter() {
			let mut buf = vec![0u8; segment.bytes.len()];
			self.read_locked(&state, None, segment.offset, &mut buf, &mut seq_read)?;
			undo
				.write_at(segment.offset, &buf, true)
				.map_err(TxFileError::from)?
				.commit();
		}

		self.append_commit_records(&mut state, tx_id, &pending)?;

		for segment in pending.writes.iter() {
			state
				.committed_map
				.write_at(segment.offset, &segment.bytes, true)
				.map_err(TxFileError::from)?
				.commit();
		}
		if let Some(new_size) = pending.resize {
			state.file_size = new_size;
		}

		Ok(undo)
	}

	fn append_commit_records(
		&self,
		state: &mut WalState,
		tx_id: u32,
		pending: &PendingTx,
	) -> Result<(), TxFileError> {
		let mut records = Vec::new();
		for segment in pending.writes.iter() {
			WalRecord::Write {
				tx_id,
				offset: segment.offset,
				bytes: segment.bytes.to_vec(),
			}
			.encode(&mut records);
		}
		if let Some(new_size) = pending.resize {
			WalRecord::Resize { tx_id, new_size }.encode(&mut records);
		}
		WalRecord::Commit { tx_id }.encode(&mut records);

		self.ensure_capacity(state, records.len() as u64)?;

		write_at_all(&*self.file, state.cursor, &records)?;
		self.file.flush_data_only()?;
		state.cursor += records.len() as u64;
		Ok(())
	}

	fn ensure_capacity(&self, state: &mut WalState, needed: u64) -> Result<(), TxFileError> {
		let page_end = self.page_base(state.active_page) + self.page_size();
		let rotate_threshold = self.page_base(state.active_page)
			+ self.page_size() * self.rotate_threshold_num / self.rotate_threshold_den;

		if state.cursor + needed > page_end || state.cursor + needed > rotate_threshold {
			self.rotate(state)?;
		}

		let page_end = self.page_base(state.active_page) + self.page_size();
		if state.cursor + needed > page_end {
			return Err(TxFileError::WalFull);
		}
		Ok(())
	}

	/// Materialises `committed_map` into the real file area, flushes, then
	/// activates the other page with a fresh `InvalidatePreviousWal`.
	fn rotate(&self, state: &mut WalState) -> Result<(), TxFileError> {
		debug!("wal: rotating out of page {}", state.active_page);
		for segment in state.committed_map.iter() {
			write_at_all(&*self.file, self.data_off + segment.offset, &segment.bytes)?;
		}
		self.file.resize(self.data_off + state.file_size)?;
		self.file.flush_data_only()?;
		state.committed_map = ReplacementMap::new();

		let other = 1 - state.active_page;
		let new_seq = state.page_seq[state.active_page as usize] + 1;

		let zeros = vec![0u8; self.page_size() as usize];
		write_at_all(&*self.file, self.page_base(other), &zeros)?;
		write_at_all(&*self.file, self.page_base(other), &new_seq.to_be_bytes())?;
		state.page_seq[other as usize] = new_seq;

		self.write_fresh_page_header(state, other)?;
		self.file.flush_data_only()?;
		Ok(())
	}

}

/// Scans a page's record area (everything after the 8-byte page header),
/// returning the well-formed prefix of records and how many bytes they
/// occupy. Stops cleanly at an explicit `End`, at the end of the page, or at
/// a truncated trailing record (a torn write is harmless, per `spec.md` §4.3).
/// An unrecognised tag byte before any of those is reported as corruption.
fn scan_page(area: &[u8]) -> Result<(Vec<WalRecord>, usize), TxFileError> {
	let mut pos = 0;
	let mut records = Vec::new();

	while pos < area.len() {
		match WalRecord::decode(&area[pos..]) {
			Some((WalRecord::End, _)) => break,
			Some((record, consumed)) => {
				pos += consumed;
				records.push(record);
			}
			None => {
				if is_recognized_tag(area[pos]) {
					// Truncated trailing record: the writer crashed mid-append.
					break;
				}
				return Err(TxFileError::WalCorrupt(
					"unrecognised WAL record tag before an End marker",
				));
			}
		}
	}

	Ok((records, pos))
}

fn is_recognized_tag(tag: u8) -> bool {
	matches!(tag, 0 | 1 | 2 | 10 | 11 | 20)
}
