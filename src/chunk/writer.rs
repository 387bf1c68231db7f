//! Builder for a single chunk: a primary record array plus an
//! append-only "extra" region of strings and record arrays.

use bytemuck::Pod;

use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::ioext::Writable;

use super::{pad_size_8, AlignedBuffer, ChunkHeader, ChunkType};

pub struct ChunkWriter {
	chunk_type: ChunkType,
	version: i32,
	count: i32,
	chunk_buffer: AlignedBuffer,
	extra_buffer: AlignedBuffer,
}

impl ChunkWriter {
	/// A chunk holding a single `T` record.
	pub fn new<T: Pod>(chunk_type: ChunkType, version: i32) -> Self {
		Self::new_array::<T>(chunk_type, version, 1)
	}

	/// A chunk holding `count` `T` records.
	pub fn new_array<T: Pod>(chunk_type: ChunkType, version: i32, count: usize) -> Self {
		let raw_len = count * std::mem::size_of::<T>();
		let padded = raw_len + pad_size_8(raw_len as u64) as usize;
		ChunkWriter {
			chunk_type,
			version,
			count: count as i32,
			chunk_buffer: AlignedBuffer::with_byte_len(padded),
			extra_buffer: AlignedBuffer::default(),
		}
	}

	/// A chunk holding an opaque body (e.g. a FlatBuffer root). Counted as
	/// one record for accounting purposes.
	pub fn new_raw(chunk_type: ChunkType, version: i32, raw_bytes: &[u8]) -> Self {
		let padded = raw_bytes.len() + pad_size_8(raw_bytes.len() as u64) as usize;
		let mut buffer = AlignedBuffer::with_byte_len(padded);
		buffer.as_bytes_mut()[..raw_bytes.len()].copy_from_slice(raw_bytes);
		ChunkWriter { chunk_type, version, count: 1, chunk_buffer: buffer, extra_buffer: AlignedBuffer::default() }
	}

	pub fn get_type(&self) -> ChunkType {
		self.chunk_type
	}

	pub fn get_version(&self) -> i32 {
		self.version
	}

	/// A mutable view into the primary record array.
	pub fn get_chunk_data<T: Pod>(&mut self) -> &mut [T] {
		let byte_len = (self.count as usize) * std::mem::size_of::<T>();
		bytemuck::cast_slice_mut(&mut self.chunk_buffer.as_bytes_mut()[..byte_len])
	}

	/// Appends a NUL-terminated string to the extra region, 8-byte padded.
	/// Returns its offset from the start of the chunk body.
	pub fn add_string(&mut self, s: &str) -> i32 {
		self.reserve_nonzero_offset();
		let mut bytes = Vec::with_capacity(s.len() + 1);
		bytes.extend_from_slice(s.as_bytes());
		bytes.push(0);
		let body_offset = self.chunk_buffer.byte_len() + self.extra_buffer.byte_len();
		let slot_offset = self.extra_buffer.grow(bytes.len());
		self.extra_buffer.as_bytes_mut()[slot_offset..slot_offset + bytes.len()].copy_from_slice(&bytes);
		body_offset as i32
	}

	/// Appends a `T` array to the extra region, 8-byte padded. An empty
	/// slice writes nothing and returns offset 0 (null).
	pub fn add_data<T: Pod>(&mut self, slice: &[T]) -> i32 {
		if slice.is_empty() {
			return 0;
		}
		self.reserve_nonzero_offset();
		let bytes: &[u8] = bytemuck::cast_slice(slice);
		let body_offset = self.chunk_buffer.byte_len() + self.extra_buffer.byte_len();
		let slot_offset = self.extra_buffer.grow(bytes.len());
		self.extra_buffer.as_bytes_mut()[slot_offset..slot_offset + bytes.len()].copy_from_slice(bytes);
		body_offset as i32
	}

	/// Offset 0 is the null sentinel (see `ChunkReader::resolve_slice`), but
	/// when the primary record array is zero-sized the first extra-region
	/// append would otherwise land there. Pad with one throwaway slot so no
	/// real payload is ever placed at absolute body offset 0.
	fn reserve_nonzero_offset(&mut self) {
		if self.chunk_buffer.byte_len() + self.extra_buffer.byte_len() == 0 {
			self.extra_buffer.grow(8);
		}
	}

	fn header(&self) -> ChunkHeader {
		let size = (self.chunk_buffer.byte_len() + self.extra_buffer.byte_len()) as i32;
		ChunkHeader::for_chunk(self.chunk_type, self.version, size, self.count)
	}

	/// Writes the header, chunk body, and extra region, in that order. A
	/// short write at any stage aborts without writing subsequent sections.
	pub fn write(&self, file: &mut File) -> VfsResult<()> {
		let mut header_bytes = Vec::with_capacity(16);
		self.header().write_to(&mut header_bytes)?;
		if file.write(&header_bytes) != 16
			|| file.write(self.chunk_buffer.as_bytes()) != self.chunk_buffer.byte_len() as i64
			|| file.write(self.extra_buffer.as_bytes()) != self.extra_buffer.byte_len() as i64
		{
			return Err(VfsError::format_error(format!("short write on chunk {}", self.chunk_type)));
		}
		Ok(())
	}
}

/// Writes a `"GBFI"` file header followed by each chunk in sequence. No
/// chunk is permitted to fail independently of the whole file write failing.
pub fn write_chunk_file(file: &mut File, file_type: ChunkType, chunks: &[ChunkWriter]) -> VfsResult<()> {
	let file_header = ChunkHeader::for_file(file_type, 1);
	let mut header_bytes = Vec::with_capacity(16);
	file_header.write_to(&mut header_bytes)?;
	if file.write(&header_bytes) != 16 {
		log::error!("failed to write chunk file header");
		return Err(VfsError::format_error("failed to write chunk file header"));
	}
	for chunk in chunks {
		if let Err(err) = chunk.write(file) {
			log::error!("failed to write chunk {}: {err}", chunk.get_type());
			return Err(err);
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::memory::MemoryFileProtocol;
	use crate::protocol::{FileFlags, FileProtocol};

	#[repr(C)]
	#[derive(Clone, Copy, Pod, bytemuck::Zeroable)]
	struct Example {
		a: i32,
		b: i32,
	}

	fn open_write(proto: &MemoryFileProtocol, path: &str) -> File {
		let raw = proto.open_file(path, FileFlags::CREATE | FileFlags::WRITE).unwrap();
		File::new(raw, FileFlags::CREATE | FileFlags::WRITE)
	}

	fn open_read(proto: &MemoryFileProtocol, path: &str) -> File {
		let raw = proto.open_file(path, FileFlags::READ).unwrap();
		File::new(raw, FileFlags::READ)
	}

	#[test]
	fn single_record_chunk_pads_to_8() {
		let mut writer = ChunkWriter::new::<Example>(ChunkType::from_str("XMPL"), 1);
		{
			let data = writer.get_chunk_data::<Example>();
			data[0] = Example { a: 1, b: 2 };
		}
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/c.bin");
		writer.write(&mut file).unwrap();
		drop(file);
		assert_eq!(proto.path_info("/c.bin").size, 16 + 8);
	}

	#[test]
	fn string_table_is_8_byte_aligned() {
		let mut writer = ChunkWriter::new_array::<u8>(ChunkType::from_str("STRS"), 1, 0);
		let offsets: Vec<i32> = (0..=8).map(|len| writer.add_string(&"a".repeat(len))).collect();
		for pair in offsets.windows(2) {
			assert_eq!((pair[1] - pair[0]) % 8, 0);
		}
	}

	#[test]
	fn write_chunk_file_round_trips_header() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/f.bin");
		let writer = ChunkWriter::new::<Example>(ChunkType::from_str("XMPL"), 1);
		write_chunk_file(&mut file, ChunkType::from_str("XMPL"), &[writer]).unwrap();
		drop(file);
		let mut file = open_read(&proto, "/f.bin");
		let mut header_bytes = vec![0u8; 16];
		assert_eq!(file.read(&mut header_bytes), 16);
	}
}
