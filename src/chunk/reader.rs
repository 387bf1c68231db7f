//! Parses chunks written by [`super::writer`].

use bytemuck::Pod;

use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::ioext::Readable;

use super::{AlignedBuffer, ChunkHeader, ChunkType, CHUNK_TYPE_FILE};

pub struct ChunkReader {
	header: ChunkHeader,
	data: Option<AlignedBuffer>,
}

impl ChunkReader {
	pub fn get_type(&self) -> ChunkType {
		self.header.chunk_type
	}

	pub fn get_version(&self) -> i32 {
		self.header.version
	}

	pub fn get_size(&self) -> i32 {
		self.header.size
	}

	pub fn get_count(&self) -> i32 {
		self.header.count()
	}

	/// A view of the primary record array, or `None` if `release` has been
	/// called or `T` doesn't fit the recorded count.
	pub fn data<T: Pod>(&self) -> Option<&[T]> {
		let buffer = self.data.as_ref()?;
		let needed = (self.header.count() as usize).checked_mul(std::mem::size_of::<T>())?;
		if needed > buffer.byte_len() {
			return None;
		}
		Some(bytemuck::cast_slice(&buffer.as_bytes()[..needed]))
	}

	pub fn data_mut<T: Pod>(&mut self) -> Option<&mut [T]> {
		let count = self.header.count() as usize;
		let needed = count.checked_mul(std::mem::size_of::<T>())?;
		let buffer = self.data.as_mut()?;
		if needed > buffer.byte_len() {
			return None;
		}
		Some(bytemuck::cast_slice_mut(&mut buffer.as_bytes_mut()[..needed]))
	}

	/// Resolves a self-relative byte offset (as stored by
	/// [`super::writer::ChunkWriter::add_data`]) into a borrowed `T` array.
	/// Offset 0 is the null sentinel.
	pub fn resolve_slice<T: Pod>(&self, offset: i32, count: usize) -> Option<&[T]> {
		if offset == 0 {
			return None;
		}
		let buffer = self.data.as_ref()?;
		let start = offset as usize;
		let needed = count.checked_mul(std::mem::size_of::<T>())?;
		let bytes = buffer.as_bytes();
		let end = start.checked_add(needed)?;
		if end > bytes.len() {
			return None;
		}
		Some(bytemuck::cast_slice(&bytes[start..end]))
	}

	/// Resolves a self-relative byte offset into a NUL-terminated string
	/// (as stored by [`super::writer::ChunkWriter::add_string`]). Offset 0
	/// is the null sentinel.
	pub fn resolve_str(&self, offset: i32) -> Option<&str> {
		if offset == 0 {
			return None;
		}
		let buffer = self.data.as_ref()?;
		let bytes = buffer.as_bytes();
		let start = offset as usize;
		let end = start + bytes[start..].iter().position(|&b| b == 0)?;
		std::str::from_utf8(&bytes[start..end]).ok()
	}

	/// The leading 8-byte little-endian `ResourceId` of a FlatBuffer-variant
	/// chunk body. `None` if the body is shorter than 8 bytes.
	pub fn flatbuffer_resource_id(&self) -> Option<u64> {
		let bytes = self.data.as_ref()?.as_bytes();
		Some(u64::from_le_bytes(bytes.get(..8)?.try_into().ok()?))
	}

	/// The remainder of a FlatBuffer-variant chunk body after its leading
	/// 8-byte `ResourceId`, as an opaque slice. `None` if the body is
	/// shorter than 8 bytes.
	pub fn flatbuffer_body(&self) -> Option<&[u8]> {
		let bytes = self.data.as_ref()?.as_bytes();
		bytes.get(8..)
	}

	/// Transfers ownership of the body buffer to the caller. Metadata
	/// (type/size/version/count) remains accessible; [`Self::data`]
	/// returns `None` afterward.
	pub fn release(&mut self) -> Option<Vec<u8>> {
		self.data.take().map(|buffer| buffer.as_bytes().to_vec())
	}

	/// Reads one chunk. Returns `Ok(None)` on a clean end-of-file (zero
	/// bytes read for the header); any other short read or validation
	/// failure is `Err`.
	pub fn read(file: &mut File) -> VfsResult<Option<ChunkReader>> {
		let mut header_bytes = [0u8; 16];
		let read_size = file.read(&mut header_bytes);
		if read_size == 0 {
			return Ok(None);
		}
		if read_size != 16 {
			return Err(VfsError::format_error("truncated chunk header"));
		}
		let header = ChunkHeader::read_from(&mut &header_bytes[..])?;
		if header.version <= 0 || header.size < 0 || header.size % 8 != 0 || header.count() < 0 || header.count() > header.size {
			log::error!("corrupt chunk in chunk file");
			return Err(VfsError::format_error("corrupt chunk in chunk file"));
		}

		let size = header.size as usize;
		let mut buffer = AlignedBuffer::with_byte_len(size);
		if size > 0 {
			let bytes_read = file.read(buffer.as_bytes_mut());
			if bytes_read != size as i64 {
				log::error!("chunk {} is not complete", header.chunk_type);
				return Err(VfsError::format_error(format!("chunk {} is not complete", header.chunk_type)));
			}
		}

		Ok(Some(ChunkReader { header, data: Some(buffer) }))
	}
}

/// Reads the leading `"GBFI"` file header and, if `chunks` is given, every
/// chunk that follows until a clean EOF.
pub fn read_chunk_file(file: &mut File, file_type: Option<&mut ChunkType>, chunks: Option<&mut Vec<ChunkReader>>) -> VfsResult<()> {
	let mut header_bytes = [0u8; 16];
	if file.read(&mut header_bytes) != 16 {
		log::error!("failed to read chunk file header");
		return Err(VfsError::format_error("failed to read chunk file header"));
	}
	let file_header = ChunkHeader::read_from(&mut &header_bytes[..])?;
	if file_header.chunk_type != CHUNK_TYPE_FILE {
		log::error!("file is not a chunk file");
		return Err(VfsError::format_error("file is not a chunk file"));
	}
	if file_header.version < 0 || file_header.size != 0 {
		log::error!("corrupt chunk file");
		return Err(VfsError::format_error("corrupt chunk file"));
	}
	if file_header.version > 1 {
		log::error!("unsupported chunk file version: {}", file_header.version);
		return Err(VfsError::format_error(format!("unsupported chunk file version: {}", file_header.version)));
	}
	if let Some(ft) = file_type {
		*ft = file_header.file_type();
	}
	let Some(chunks) = chunks else {
		return Ok(());
	};
	while let Some(chunk) = ChunkReader::read(file)? {
		chunks.push(chunk);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chunk::writer::{write_chunk_file, ChunkWriter};
	use crate::ioext::Writable;
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
	fn empty_chunk_file_round_trips() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/empty.bin");
		write_chunk_file(&mut file, ChunkType::from_str("XMPL"), &[]).unwrap();
		drop(file);

		let mut file = open_read(&proto, "/empty.bin");
		let mut file_type = ChunkType::default();
		let mut chunks = Vec::new();
		read_chunk_file(&mut file, Some(&mut file_type), Some(&mut chunks)).unwrap();
		assert_eq!(file_type.to_string(), "XMPL");
		assert!(chunks.is_empty());
	}

	#[test]
	fn aligned_single_chunk_round_trips_zeroed_data() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/one.bin");
		let writer = ChunkWriter::new::<Example>(ChunkType::from_str("XMPL"), 1);
		write_chunk_file(&mut file, ChunkType::from_str("XMPL"), &[writer]).unwrap();
		drop(file);

		assert_eq!(proto.path_info("/one.bin").size, 16 + 16 + 8);

		let mut file = open_read(&proto, "/one.bin");
		let mut chunks = Vec::new();
		read_chunk_file(&mut file, None, Some(&mut chunks)).unwrap();
		assert_eq!(chunks.len(), 1);
		let data: &[Example] = chunks[0].data().unwrap();
		assert_eq!(data.len(), 1);
		assert_eq!(data[0].a, 0);
		assert_eq!(data[0].b, 0);
	}

	#[test]
	fn string_table_resolves_through_offsets() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/strs.bin");
		let mut writer = ChunkWriter::new_array::<u8>(ChunkType::from_str("STRS"), 1, 0);
		let offsets: Vec<i32> = (0..8).map(|len| writer.add_string(&"x".repeat(len))).collect();
		writer.write(&mut file).unwrap();
		drop(file);

		let mut file = open_read(&proto, "/strs.bin");
		let chunk = ChunkReader::read(&mut file).unwrap().unwrap();
		for (len, offset) in offsets.into_iter().enumerate() {
			assert_eq!(chunk.resolve_str(offset).unwrap(), "x".repeat(len));
		}
	}

	#[test]
	fn unaligned_record_plus_string_table_round_trips() {
		#[repr(C)]
		#[derive(Clone, Copy, Pod, bytemuck::Zeroable)]
		struct Bar {
			a: i32,
			b: i32,
			c: f32,
		}
		assert_eq!(std::mem::size_of::<Bar>(), 12);

		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/bar.bin");
		let mut writer = ChunkWriter::new_array::<Bar>(ChunkType::from_str("BARS"), 1, 3);
		let offsets: Vec<i32> = (0..8).map(|len| writer.add_string(&"s".repeat(len))).collect();
		writer.write(&mut file).unwrap();
		drop(file);

		let string_table_bytes: i64 = (0..8usize)
			.map(|len| {
				let raw = (len + 1) as u64;
				(raw + super::super::pad_size_8(raw)) as i64
			})
			.sum();
		assert_eq!(proto.path_info("/bar.bin").size, 16 + 40 + string_table_bytes);

		let mut file = open_read(&proto, "/bar.bin");
		let chunk = ChunkReader::read(&mut file).unwrap().unwrap();
		let bars: &[Bar] = chunk.data().unwrap();
		assert_eq!(bars.len(), 3);
		for bar in bars {
			assert_eq!((bar.a, bar.b, bar.c), (0, 0, 0.0));
		}
		for (len, offset) in offsets.into_iter().enumerate() {
			assert_eq!(chunk.resolve_str(offset).unwrap(), "s".repeat(len));
		}
	}

	#[test]
	fn flatbuffer_accessors_split_on_leading_resource_id() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/fb.bin");
		let payload = [0xABu8, 0xCD, 0xEF, 0x01];
		let mut raw_bytes = Vec::new();
		raw_bytes.extend_from_slice(&77u64.to_le_bytes());
		raw_bytes.extend_from_slice(&payload);
		raw_bytes.resize(raw_bytes.len() + super::super::pad_size_8(raw_bytes.len() as u64) as usize, 0);
		let writer = ChunkWriter::new_raw(ChunkType::from_str("FBUF"), 1, &raw_bytes);
		writer.write(&mut file).unwrap();
		drop(file);

		let mut file = open_read(&proto, "/fb.bin");
		let chunk = ChunkReader::read(&mut file).unwrap().unwrap();
		assert_eq!(chunk.flatbuffer_resource_id().unwrap(), 77);
		assert_eq!(&chunk.flatbuffer_body().unwrap()[..4], &payload);
	}

	#[test]
	fn corrupt_header_reports_error() {
		let _ = env_logger::Builder::from_default_env().is_test(true).try_init();
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/bad.bin");
		// size not a multiple of 8.
		let header = ChunkHeader::for_chunk(ChunkType::from_str("BADD"), 1, 3, 0);
		let mut bytes = Vec::new();
		header.write_to(&mut bytes).unwrap();
		assert_eq!(file.write(&bytes), 16);
		drop(file);

		let mut file = open_read(&proto, "/bad.bin");
		assert!(ChunkReader::read(&mut file).is_err());
	}
}
