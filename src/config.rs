use crate::consts::{
	DEFAULT_SEQUENCE_CACHE_SIZE, DEFAULT_WAL_REGION_SIZE, WAL_ROTATE_THRESHOLD_DEN,
	WAL_ROTATE_THRESHOLD_NUM,
};

/// Tunables for a [`crate::wal::WalRegion`], mirroring the teacher's
/// `WalConfig`/`PhysicalStorageConfig` pattern: one small, `Default`-able
/// struct per subsystem rather than free-floating parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalConfig {
	/// Total size, in bytes, of the WAL region (both pages combined). Only
	/// consulted by [`crate::TxFile::create`]; an opened file reads its
	/// actual length back from the front header.
	pub wal_len: u64,
	/// A page rotates once it has used `rotate_threshold_num /
	/// rotate_threshold_den` of its capacity.
	pub rotate_threshold_num: u64,
	pub rotate_threshold_den: u64,
}

impl Default for WalConfig {
	fn default() -> Self {
		Self {
			wal_len: DEFAULT_WAL_REGION_SIZE,
			rotate_threshold_num: WAL_ROTATE_THRESHOLD_NUM,
			rotate_threshold_den: WAL_ROTATE_THRESHOLD_DEN,
		}
	}
}

/// Tunables for a [`crate::Sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceConfig {
	/// Number of ids batched per on-disk counter advance.
	pub cache_size: u64,
}

impl Default for SequenceConfig {
	fn default() -> Self {
		Self {
			cache_size: DEFAULT_SEQUENCE_CACHE_SIZE,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_matches_documented_constants() {
		let config = WalConfig::default();
		assert_eq!(config.wal_len, DEFAULT_WAL_REGION_SIZE);
		assert_eq!(config.rotate_threshold_num, WAL_ROTATE_THRESHOLD_NUM);
		assert_eq!(config.rotate_threshold_den, WAL_ROTATE_THRESHOLD_DEN);
	}

	#[test]
	fn sequence_config_default_matches_documented_constant() {
		let config = SequenceConfig::default();
		assert_eq!(config.cache_size, DEFAULT_SEQUENCE_CACHE_SIZE);
	}
}
