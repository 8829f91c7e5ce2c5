/// `tx_id` is a 24-bit value packed into the low bits of a 32-bit field.
pub const TX_ID_MASK: u32 = 0x00ff_ffff;

const TAG_END: u8 = 0;
const TAG_COMMIT: u8 = 1;
const TAG_INVALIDATE_PREVIOUS_WAL: u8 = 2;
const TAG_WRITE: u8 = 10;
const TAG_RESIZE: u8 = 11;
const TAG_COPY: u8 = 20;

/// One entry in the write-ahead log's record stream. See `spec.md` §6 for
/// the wire layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
	/// Terminator of the current log page's valid record run. A freshly
	/// zeroed page reads as an implicit `End` at every unwritten position,
	/// so this tag is rarely written explicitly.
	End,
	Commit {
		tx_id: u32,
	},
	/// Written as the first record of a freshly rotated page; records from
	/// the other page are no longer authoritative.
	InvalidatePreviousWal,
	Write {
		tx_id: u32,
		offset: u64,
		bytes: Vec<u8>,
	},
	Resize {
		tx_id: u32,
		new_size: u64,
	},
	/// Describes an in-file copy. Monsoon's own writer never emits this -
	/// see `DESIGN.md` for the compatibility decision - but it is decoded
	/// for forward compatibility with logs written by other implementations.
	Copy {
		tx_id: u32,
		src: u64,
		dst: u64,
		len: u64,
	},
}

impl WalRecord {
	/// Appends this record's wire encoding to `out`, returning the number of
	/// bytes written.
	pub fn encode(&self, out: &mut Vec<u8>) -> usize {
		let start = out.len();
		match self {
			WalRecord::End => out.push(TAG_END),
			WalRecord::Commit { tx_id } => {
				out.push(TAG_COMMIT);
				out.extend_from_slice(&(tx_id & TX_ID_MASK).to_be_bytes());
			}
			WalRecord::InvalidatePreviousWal => out.push(TAG_INVALIDATE_PREVIOUS_WAL),
			WalRecord::Write {
				tx_id,
				offset,
				bytes,
			} => {
				out.push(TAG_WRITE);
				out.extend_from_slice(&(tx_id & TX_ID_MASK).to_be_bytes());
				out.extend_from_slice(&offset.to_be_bytes());
				out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
				out.extend_from_slice(bytes);
			}
			WalRecord::Resize { tx_id, new_size } => {
				out.push(TAG_RESIZE);
				out.extend_from_slice(&(tx_id & TX_ID_MASK).to_be_bytes());
				out.extend_from_slice(&new_size.to_be_bytes());
			}
			WalRecord::Copy {
				tx_id,
				src,
				dst,
				len,
			} => {
				out.push(TAG_COPY);
				out.extend_from_slice(&(tx_id & TX_ID_MASK).to_be_bytes());
				out.extend_from_slice(&src.to_be_bytes());
				out.extend_from_slice(&dst.to_be_bytes());
				out.extend_from_slice(&len.to_be_bytes());
			}
		}
		out.len() - start
	}

	/// The number of bytes [`encode`](Self::encode) will produce for this record.
	pub fn encoded_len(&self) -> usize {
		match self {
			WalRecord::End | WalRecord::InvalidatePreviousWal => 1,
			WalRecord::Commit { .. } => 1 + 4,
			WalRecord::Write { bytes, .. } => 1 + 4 + 8 + 4 + bytes.len(),
			WalRecord::Resize { .. } => 1 + 4 + 8,
			WalRecord::Copy { .. } => 1 + 4 + 8 + 8 + 8,
		}
	}

	/// Decodes one record from the front of `buf`. Returns `None` if `buf`
	/// doesn't hold a complete record (including the zero-filled "unused
	/// space" case, which decodes as `End` with zero bytes consumed) or the
	/// tag byte is unrecognised.
	pub fn decode(buf: &[u8]) -> Option<(WalRecord, usize)> {
		let (&tag, rest) = buf.split_first()?;

		fn take(buf: &[u8], n: usize) -> Option<(&[u8], &[u8])> {
			if buf.len() < n {
				return None;
			}
			Some(buf.split_at(n))
		}

		fn u32_be(buf: &[u8]) -> u32 {
			let mut arr = [0u8; 4];
			arr.copy_from_slice(buf);
			u32::from_be_bytes(arr)
		}
		fn u64_be(buf: &[u8]) -> u64 {
			let mut arr = [0u8; 8];
			arr.copy_from_slice(buf);
			u64::from_be_bytes(arr)
		}

		match tag {
			TAG_END => Some((WalRecord::End, 1)),
			TAG_COMMIT => {
				let (tx_id_buf, _) = take(rest, 4)?;
				Some((
					WalRecord::Commit {
						tx_id: u32_be(tx_id_buf) & TX_ID_MASK,
					},
					5,
				))
			}
			TAG_INVALIDATE_PREVIOUS_WAL => Some((WalRecord::InvalidatePreviousWal, 1)),
			TAG_WRITE => {
				let (tx_id_buf, rest) = take(rest, 4)?;
				let (offset_buf, rest) = take(rest, 8)?;
				let (len_buf, rest) = take(rest, 4)?;
				let len = u32_be(len_buf) as usize;
				let (bytes_buf, _) = take(rest, len)?;
				Some((
					WalRecord::Write {
						tx_id: u32_be(tx_id_buf) & TX_ID_MASK,
						offset: u64_be(offset_buf),
						bytes: bytes_buf.to_vec(),
					},
					1 + 4 + 8 + 4 + len,
				))
			}
			TAG_RESIZE => {
				let (tx_id_buf, rest) = take(rest, 4)?;
				let (size_buf, _) = take(rest, 8)?;
				Some((
					WalRecord::Resize {
						tx_id: u32_be(tx_id_buf) & TX_ID_MASK,
						new_size: u64_be(size_buf),
					},
					1 + 4 + 8,
				))
			}
			TAG_COPY => {
				let (tx_id_buf, rest) = take(rest, 4)?;
				let (src_buf, rest) = take(rest, 8)?;
				let (dst_buf, rest) = take(rest, 8)?;
				let (len_buf, _) = take(rest, 8)?;
				Some((
					WalRecord::Copy {
						tx_id: u32_be(tx_id_buf) & TX_ID_MASK,
						src: u64_be(src_buf),
						dst: u64_be(dst_buf),
						len: u64_be(len_buf),
					},
					1 + 4 + 8 + 8 + 8,
				))
			}
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn roundtrip(record: WalRecord) {
		let mut buf = Vec::new();
		let written = record.encode(&mut buf);
		assert_eq!(written, record.encoded_len());
		let (decoded, consumed) = WalRecord::decode(&buf).unwrap();
		assert_eq!(consumed, written);
		assert_eq!(decoded, record);
	}

	#[test]
	fn round_trips_every_variant() {
		roundtrip(WalRecord::End);
		roundtrip(WalRecord::Commit { tx_id: 0x00_abcd });
		roundtrip(WalRecord::InvalidatePreviousWal);
		roundtrip(WalRecord::Write {
			tx_id: 7,
			offset: 1234,
			bytes: vec![1, 2, 3, 4, 5],
		});
		roundtrip(WalRecord::Resize {
			tx_id: 7,
			new_size: 99999,
		});
		roundtrip(WalRecord::Copy {
			tx_id: 7,
			src: 1,
			dst: 2,
			len: 3,
		});
	}

	#[test]
	fn tx_id_is_masked_to_24_bits() {
		let mut buf = Vec::new();
		WalRecord::Commit {
			tx_id: 0xff_abcdef,
		}
		.encode(&mut buf);
		let (decoded, _) = WalRecord::decode(&buf).unwrap();
		assert_eq!(decoded, WalRecord::Commit { tx_id: 0x00_abcdef });
	}

	#[test]
	fn decode_reports_none_on_truncated_buffer() {
		let mut buf = Vec::new();
		WalRecord::Write {
			tx_id: 1,
			offset: 0,
			bytes: vec![9; 16],
		}
		.encode(&mut buf);
		assert!(WalRecord::decode(&buf[..buf.len() - 1]).is_none());
	}

	#[test]
	fn zero_filled_space_decodes_as_end() {
		let buf = [0u8; 8];
		assert_eq!(WalRecord::decode(&buf), Some((WalRecord::End, 1)));
	}
}
