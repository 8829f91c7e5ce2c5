/// Magic bytes identifying a Monsoon transactional file front header.
///
/// `17 19 07 0B` followed by the ASCII text `MON-soon-db`.
pub const FRONT_MAGIC: [u8; 15] = [
	0x17, 0x19, 0x07, 0x0B, b'M', b'O', b'N', b'-', b's', b'o', b'o', b'n', b'-', b'd', b'b',
];

/// Magic bytes identifying a [`crate::sequence::Sequence`] header.
pub const SEQUENCE_MAGIC: [u8; 8] = *b"MON-SEQ\0";

/// Size, in bytes, of the front header (magic + WAL length + reserved byte).
pub const FRONT_HEADER_SIZE: u64 = 24;

/// Default size in bytes of the whole WAL region (both pages combined).
pub const DEFAULT_WAL_REGION_SIZE: u64 = 1024 * 1024;

/// Default number of IDs a [`crate::sequence::Sequence`] caches per disk refill.
pub const DEFAULT_SEQUENCE_CACHE_SIZE: u64 = 64;

/// A WAL page is considered full once it has used this fraction of its capacity,
/// triggering a rotation on the next commit.
pub const WAL_ROTATE_THRESHOLD_NUM: u64 = 3;
pub const WAL_ROTATE_THRESHOLD_DEN: u64 = 4;
