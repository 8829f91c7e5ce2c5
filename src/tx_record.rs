use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Fixed 20-byte record header prefixed to every MVCC record in layers built
/// on top of this file substrate (such as a B-tree's leaf entries).
///
/// On disk: `creation_id(8) deletion_id(8) flags(4)`, all big-endian.
pub const TX_AWARE_RECORD_SIZE: usize = 20;

const CREATION_PRESENT: u32 = 1 << 0;
const CREATION_ALWAYS: u32 = 1 << 1;
const DELETION_PRESENT: u32 = 1 << 2;
const DELETION_ALWAYS: u32 = 1 << 3;

/// In-memory, decoded form of the 20-byte on-disk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxAwareRecord {
	pub creation_id: Option<u64>,
	pub creation_always: bool,
	pub deletion_id: Option<u64>,
	pub deletion_always: bool,
}

impl TxAwareRecord {
	/// A record that is always visible and never deleted.
	pub fn always_visible() -> Self {
		Self {
			creation_always: true,
			..Self::default()
		}
	}

	/// A record created by `creation_id`, not yet deleted.
	pub fn created_by(creation_id: u64) -> Self {
		Self {
			creation_id: Some(creation_id),
			..Self::default()
		}
	}

	pub fn mark_deleted_by(&mut self, deletion_id: u64) {
		self.deletion_id = Some(deletion_id);
	}

	/// Whether this record is visible to a transaction with the given commit id.
	pub fn visible_in(&self, tx_id: u64) -> bool {
		let created = self.creation_always || self.creation_id.is_some_and(|id| id <= tx_id);
		let deleted = self.deletion_always || self.deletion_id.is_some_and(|id| id <= tx_id);
		created && !deleted
	}

	pub fn to_bytes(self) -> [u8; TX_AWARE_RECORD_SIZE] {
		let mut flags = 0u32;
		if self.creation_id.is_some() {
			flags |= CREATION_PRESENT;
		}
		if self.creation_always {
			flags |= CREATION_ALWAYS;
		}
		if self.deletion_id.is_some() {
			flags |= DELETION_PRESENT;
		}
		if self.deletion_always {
			flags |= DELETION_ALWAYS;
		}

		let repr = RawTxAwareRecord {
			creation_id: self.creation_id.unwrap_or(0).to_be_bytes(),
			deletion_id: self.deletion_id.unwrap_or(0).to_be_bytes(),
			flags: flags.to_be_bytes(),
		};
		repr.as_bytes().try_into().expect("size is fixed")
	}

	pub fn from_bytes(bytes: &[u8; TX_AWARE_RECORD_SIZE]) -> Self {
		let repr = RawTxAwareRecord::read_from(bytes.as_slice()).expect("size is fixed");
		let flags = u32::from_be_bytes(repr.flags);
		let creation_id = u64::from_be_bytes(repr.creation_id);
		let deletion_id = u64::from_be_bytes(repr.deletion_id);

		Self {
			creation_id: (flags & CREATION_PRESENT != 0).then_some(creation_id),
			creation_always: flags & CREATION_ALWAYS != 0,
			deletion_id: (flags & DELETION_PRESENT != 0).then_some(deletion_id),
			deletion_always: flags & DELETION_ALWAYS != 0,
		}
	}
}

#[derive(AsBytes, FromZeroes, FromBytes)]
#[repr(C, packed)]
struct RawTxAwareRecord {
	creation_id: [u8; 8],
	deletion_id: [u8; 8],
	flags: [u8; 4],
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_bytes() {
		let mut record = TxAwareRecord::created_by(5);
		record.mark_deleted_by(10);

		let bytes = record.to_bytes();
		assert_eq!(bytes.len(), TX_AWARE_RECORD_SIZE);
		assert_eq!(TxAwareRecord::from_bytes(&bytes), record);
	}

	#[test]
	fn visibility_follows_creation_and_deletion_ids() {
		let mut record = TxAwareRecord::created_by(5);
		assert!(!record.visible_in(4));
		assert!(record.visible_in(5));
		assert!(record.visible_in(100));

		record.mark_deleted_by(10);
		assert!(record.visible_in(9));
		assert!(!record.visible_in(10));
		assert!(!record.visible_in(100));
	}

	#[test]
	fn always_visible_ignores_ids() {
		let record = TxAwareRecord::always_visible();
		assert!(record.visible_in(0));
		assert!(record.visible_in(u64::MAX));
	}

	#[test]
	fn deletion_always_hides_regardless_of_creation() {
		let mut record = TxAwareRecord::always_visible();
		record.deletion_always = true;
		assert!(!record.visible_in(0));
		assert!(!record.visible_in(u64::MAX));
	}
}
