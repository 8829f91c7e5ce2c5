use std::{fs::File, io};

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// A byte-addressable file handle with positional read/write/flush.
///
/// Every operation carries its own offset; there is no seek cursor. Short
/// reads and writes are allowed - callers loop until they have the bytes
/// they need.
pub trait PositionalFile: Send + Sync {
	fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<usize>;

	fn write_at(&self, off: u64, buf: &[u8]) -> io::Result<usize>;

	fn size(&self) -> io::Result<u64>;

	fn resize(&self, new_size: u64) -> io::Result<()>;

	fn flush(&self) -> io::Result<()>;

	fn flush_data_only(&self) -> io::Result<()>;
}

/// Reads exactly `buf.len()` bytes, looping over short reads.
pub fn read_at_exact(file: &impl PositionalFile, mut off: u64, mut buf: &mut [u8]) -> io::Result<()> {
	while !buf.is_empty() {
		let n = file.read_at(off, buf)?;
		if n == 0 {
			return Err(io::Error::new(
				io::ErrorKind::UnexpectedEof,
				"positional file ended before the requested read completed",
			));
		}
		buf = &mut buf[n..];
		off += n as u64;
	}
	Ok(())
}

/// Writes all of `buf`, looping over short writes.
pub fn write_at_all(file: &impl PositionalFile, mut off: u64, mut buf: &[u8]) -> io::Result<()> {
	while !buf.is_empty() {
		let n = file.write_at(off, buf)?;
		if n == 0 {
			return Err(io::Error::new(
				io::ErrorKind::WriteZero,
				"positional file accepted zero bytes of the requested write",
			));
		}
		buf = &buf[n..];
		off += n as u64;
	}
	Ok(())
}

#[cfg(unix)]
impl PositionalFile for File {
	fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<usize> {
		FileExt::read_at(self, buf, off)
	}

	fn write_at(&self, off: u64, buf: &[u8]) -> io::Result<usize> {
		FileExt::write_at(self, buf, off)
	}

	fn size(&self) -> io::Result<u64> {
		Ok(self.metadata()?.len())
	}

	fn resize(&self, new_size: u64) -> io::Result<()> {
		self.set_len(new_size)
	}

	fn flush(&self) -> io::Result<()> {
		self.sync_all()
	}

	fn flush_data_only(&self) -> io::Result<()> {
		self.sync_data()
	}
}

#[cfg(windows)]
impl PositionalFile for File {
	fn read_at(&self, off: u64, buf: &mut [u8]) -> io::Result<usize> {
		FileExt::seek_read(self, buf, off)
	}

	fn write_at(&self, off: u64, buf: &[u8]) -> io::Result<usize> {
		FileExt::seek_write(self, buf, off)
	}

	fn size(&self) -> io::Result<u64> {
		Ok(self.metadata()?.len())
	}

	fn resize(&self, new_size: u64) -> io::Result<()> {
		self.set_len(new_size)
	}

	fn flush(&self) -> io::Result<()> {
		self.sync_all()
	}

	fn flush_data_only(&self) -> io::Result<()> {
		// Windows has no data-only fsync equivalent exposed through std.
		self.sync_all()
	}
}

#[cfg(not(any(unix, windows)))]
compile_error!("monsoon-txfile's positional file backend needs unix or windows");

#[cfg(test)]
mod tests {
	use tempfile::tempfile;

	use super::*;

	#[test]
	fn write_then_read_back() {
		let file = tempfile().unwrap();
		file.resize(16).unwrap();
		write_at_all(&file, 4, b"hello world").unwrap();

		let mut buf = [0u8; 11];
		read_at_exact(&file, 4, &mut buf).unwrap();
		assert_eq!(&buf, b"hello world");
	}

	#[test]
	fn size_reflects_resize() {
		let file = tempfile().unwrap();
		assert_eq!(file.size().unwrap(), 0);
		file.resize(128).unwrap();
		assert_eq!(file.size().unwrap(), 128);
	}

	#[test]
	fn read_past_eof_errors() {
		let file = tempfile().unwrap();
		file.resize(4).unwrap();
		let mut buf = [0u8; 8];
		let err = read_at_exact(&file, 0, &mut buf).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
	}
}
