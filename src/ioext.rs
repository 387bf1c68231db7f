use std::io::{
	Write, Read,
	Seek, SeekFrom,
};

use crate::error::VfsResult;

/// For types that can be written to a writer.
pub trait Writable {
	fn write_to<W: Write>(&self, writer: &mut W) -> VfsResult<usize>;
}

/// For types that can be read from a reader.
pub trait Readable: Sized {
	fn read_from<R: Read>(reader: &mut R) -> VfsResult<Self>;
}

/// For types that represent a seekable file offset.
pub trait Seekable: Sized {
	fn seek_to<S: Seek>(&self, seeker: &mut S) -> VfsResult<u64> {
		Ok(seeker.seek(self.seeker())?)
	}

	fn seeker(&self) -> SeekFrom;
}

pub trait WriteExt: Write + Sized {
	fn write_value<T: Writable>(&mut self, value: T) -> VfsResult<usize>;
}

pub trait ReadExt: Read + Sized {
	fn read_value<T: Readable>(&mut self) -> VfsResult<T>;
}

impl<W: Write + Sized> WriteExt for W {
	fn write_value<T: Writable>(&mut self, value: T) -> VfsResult<usize> {
		value.write_to(self)
	}
}

impl<R: Read + Sized> ReadExt for R {
	fn read_value<T: Readable>(&mut self) -> VfsResult<T> {
		T::read_from(self)
	}
}

pub trait SeekExt: Seek + Sized {
	fn seek_to<S: Seekable>(&mut self, seek_offset: &S) -> VfsResult<u64>;

	fn seek_return(&mut self) -> VfsResult<SeekFrom>;
}

impl<T: Seek + Sized> SeekExt for T {
	fn seek_to<S: Seekable>(&mut self, seek_offset: &S) -> VfsResult<u64> {
		seek_offset.seek_to(self)
	}

	fn seek_return(&mut self) -> VfsResult<SeekFrom> {
		Ok(SeekFrom::Start(self.stream_position()?))
	}
}

/// Writes `count` zero bytes to `writer`.
pub fn write_zeroes<W: Write>(writer: &mut W, count: usize) -> VfsResult<()> {
	const ZEROES: &[u8; 64] = &[0u8; 64];
	let mut remainder = count;
	while remainder >= ZEROES.len() {
		writer.write_all(ZEROES)?;
		remainder -= ZEROES.len();
	}
	if remainder != 0 {
		writer.write_all(&ZEROES[0..remainder])?;
	}
	Ok(())
}
