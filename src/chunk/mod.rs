//! The chunk codec: a versioned binary container format. A chunk file is a
//! sequence of `(header, body)` pairs; the body is an 8-byte-aligned blob
//! whose first `count` records form a typed array and whose tail is a
//! region of appended strings and arrays addressed by self-relative
//! offsets.
//!
//! See [`writer`] for building chunks and [`reader`] for parsing them.

pub mod reader;
pub mod writer;

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::VfsResult;
use crate::ioext::{Readable, Writable};

pub use reader::{read_chunk_file, ChunkReader};
pub use writer::{write_chunk_file, ChunkWriter};

/// Tests if a value is a multiple of 8.
pub const fn is_multiple_of_8(n: u64) -> bool {
	(n & 7) == 0
}

/// Returns the pad size needed to bring `size` up to a multiple of 8.
pub const fn pad_size_8(size: u64) -> u64 {
	(8 - (size & 7)) & 7
}

/// A 4-byte ASCII chunk tag, NUL-padded (e.g. `"GBFI"`, `"GBRL"`).
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ChunkType(pub [u8; 4]);

impl ChunkType {
	pub const fn new(tag: &[u8; 4]) -> Self {
		ChunkType(*tag)
	}

	/// Builds a tag from up to 4 ASCII bytes, zero-padding the rest.
	pub fn from_str(tag: &str) -> Self {
		let mut bytes = [0u8; 4];
		for (i, b) in tag.as_bytes().iter().take(4).enumerate() {
			bytes[i] = *b;
		}
		ChunkType(bytes)
	}

	pub fn as_bytes(&self) -> [u8; 4] {
		self.0
	}
}

impl std::fmt::Debug for ChunkType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "ChunkType({:?})", self.to_string())
	}
}

impl std::fmt::Display for ChunkType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
		write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
	}
}

impl Readable for ChunkType {
	fn read_from<R: Read>(reader: &mut R) -> VfsResult<Self> {
		let mut bytes = [0u8; 4];
		reader.read_exact(&mut bytes)?;
		Ok(ChunkType(bytes))
	}
}

impl Writable for ChunkType {
	fn write_to<W: Write>(&self, writer: &mut W) -> VfsResult<usize> {
		writer.write_all(&self.0)?;
		Ok(4)
	}
}

/// The chunk type marking the optional leading file-header chunk.
pub const CHUNK_TYPE_FILE: ChunkType = ChunkType::new(b"GBFI");

/// Exactly 16 bytes on disk: a 4-byte tag, two `i32` fields, and a tagged
/// union `i32` that is either a record count (ordinary chunks) or a 4-byte
/// ASCII file-type tag (the leading file-header chunk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHeader {
	pub chunk_type: ChunkType,
	pub version: i32,
	pub size: i32,
	tail: i32,
}

impl ChunkHeader {
	pub fn for_chunk(chunk_type: ChunkType, version: i32, size: i32, count: i32) -> Self {
		ChunkHeader { chunk_type, version, size, tail: count }
	}

	pub fn for_file(file_type: ChunkType, version: i32) -> Self {
		ChunkHeader { chunk_type: CHUNK_TYPE_FILE, version, size: 0, tail: i32::from_le_bytes(file_type.0) }
	}

	pub fn count(&self) -> i32 {
		self.tail
	}

	pub fn file_type(&self) -> ChunkType {
		ChunkType(self.tail.to_le_bytes())
	}
}

impl Readable for ChunkHeader {
	fn read_from<R: Read>(reader: &mut R) -> VfsResult<Self> {
		let chunk_type = ChunkType::read_from(reader)?;
		let version = reader.read_i32::<LittleEndian>()?;
		let size = reader.read_i32::<LittleEndian>()?;
		let tail = reader.read_i32::<LittleEndian>()?;
		Ok(ChunkHeader { chunk_type, version, size, tail })
	}
}

impl Writable for ChunkHeader {
	fn write_to<W: Write>(&self, writer: &mut W) -> VfsResult<usize> {
		let mut written = self.chunk_type.write_to(writer)?;
		writer.write_i32::<LittleEndian>(self.version)?;
		writer.write_i32::<LittleEndian>(self.size)?;
		writer.write_i32::<LittleEndian>(self.tail)?;
		written += 12;
		Ok(written)
	}
}

/// An 8-byte-aligned growable byte buffer backing chunk bodies and extra
/// regions. Backed by a `Vec<u64>` so that views cast through
/// [`bytemuck`] to any `T` with alignment no greater than 8 are always
/// validly aligned.
#[derive(Debug, Clone, Default)]
pub(crate) struct AlignedBuffer(Vec<u64>);

impl AlignedBuffer {
	pub(crate) fn with_byte_len(bytes: usize) -> Self {
		debug_assert!(is_multiple_of_8(bytes as u64));
		AlignedBuffer(vec![0u64; bytes / 8])
	}

	pub(crate) fn byte_len(&self) -> usize {
		self.0.len() * 8
	}

	pub(crate) fn as_bytes(&self) -> &[u8] {
		bytemuck::cast_slice(&self.0)
	}

	pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
		bytemuck::cast_slice_mut(&mut self.0)
	}

	/// Grows the buffer by `extra` bytes (rounded up to a multiple of 8),
	/// returning the byte offset the new region starts at.
	pub(crate) fn grow(&mut self, extra: usize) -> usize {
		let offset = self.byte_len();
		let padded = extra + pad_size_8(extra as u64) as usize;
		self.0.resize(self.0.len() + padded / 8, 0);
		offset
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chunk_type_roundtrips_through_display() {
		let t = ChunkType::from_str("GBFI");
		assert_eq!(t.to_string(), "GBFI");
	}

	#[test]
	fn header_roundtrips_through_bytes() {
		let header = ChunkHeader::for_chunk(ChunkType::from_str("XMPL"), 1, 24, 1);
		let mut buf = Vec::new();
		header.write_to(&mut buf).unwrap();
		assert_eq!(buf.len(), 16);
		let parsed = ChunkHeader::read_from(&mut &buf[..]).unwrap();
		assert_eq!(parsed, header);
		assert_eq!(parsed.count(), 1);
	}

	#[test]
	fn file_header_packs_file_type_into_tail() {
		let header = ChunkHeader::for_file(ChunkType::from_str("XMPL"), 1);
		assert_eq!(header.file_type().to_string(), "XMPL");
		assert_eq!(header.size, 0);
	}

	#[test]
	fn pad_size_8_rounds_up_to_next_multiple() {
		assert_eq!(pad_size_8(0), 0);
		assert_eq!(pad_size_8(1), 7);
		assert_eq!(pad_size_8(8), 0);
		assert_eq!(pad_size_8(12), 4);
	}
}
