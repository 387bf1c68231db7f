//! Reads resource files through the four-step sequence: parse the chunk
//! file, pre-load every declared dependency, dispatch the remaining chunks
//! to their registered `(type, version)` reader, then require exactly one
//! of them to have produced the top-level resource.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::chunk::{read_chunk_file, ChunkReader, ChunkType};
use crate::error::{VfsError, VfsResult};
use crate::file::File;

use super::{ResourceId, ResourceLoadChunk, CHUNK_TYPE_RESOURCE_LOAD};

/// What a registered chunk reader produced.
pub enum ChunkReaderOutcome {
	/// Consumed into the file's scratch state; no resource produced.
	Scratch,
	/// The resource this chunk (together with any scratch state already
	/// accumulated) was building toward.
	Resource(Box<dyn Any>),
}

/// Resources loaded so far while reading a single file, addressable by the
/// id they were declared under in a `"GBRL"` chunk.
#[derive(Default)]
pub struct LoadedResources {
	by_id: HashMap<ResourceId, Box<dyn Any>>,
}

impl LoadedResources {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, id: ResourceId, resource: Box<dyn Any>) {
		self.by_id.insert(id, resource);
	}

	pub fn get<R: Any>(&self, id: ResourceId) -> Option<&R> {
		self.by_id.get(&id)?.downcast_ref()
	}
}

type ReaderFn = Box<dyn Fn(&ChunkReader, &mut LoadedResources) -> VfsResult<ChunkReaderOutcome>>;

/// Dispatches chunks to the reader registered for their `(type, version)`.
#[derive(Default)]
pub struct ResourceFileReader {
	readers: HashMap<(ChunkType, i32), ReaderFn>,
}

impl ResourceFileReader {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the reader for `(chunk_type, version)`. Returns
	/// `Conflict` if that pair is already registered.
	pub fn register(
		&mut self,
		chunk_type: ChunkType,
		version: i32,
		reader: impl Fn(&ChunkReader, &mut LoadedResources) -> VfsResult<ChunkReaderOutcome> + 'static,
	) -> VfsResult<()> {
		let key = (chunk_type, version);
		if self.readers.contains_key(&key) {
			return Err(VfsError::conflict(format!("chunk reader already registered for {chunk_type} v{version}")));
		}
		self.readers.insert(key, Box::new(reader));
		Ok(())
	}

	/// Reads a resource of type `R` from `file`. `resolve_dependency` loads
	/// a declared dependency by its resource name, returning the id it
	/// should be addressable under in the scratch context and the loaded
	/// value itself.
	pub fn read<R: Any>(&self, file: &mut File, resolve_dependency: impl Fn(&str) -> VfsResult<Box<dyn Any>>) -> VfsResult<R> {
		let mut chunks = Vec::new();
		read_chunk_file(file, None, Some(&mut chunks))?;

		let mut loaded = LoadedResources::new();
		let mut remaining = Vec::new();
		for chunk in chunks {
			if chunk.get_type() == CHUNK_TYPE_RESOURCE_LOAD {
				let records: &[ResourceLoadChunk] =
					chunk.data().ok_or_else(|| VfsError::format_error("malformed resource-load chunk"))?;
				let records = records.to_vec();
				for record in records {
					let name = chunk
						.resolve_str(record.resource_name)
						.ok_or_else(|| VfsError::DependencyError("dependency name offset is null".into()))?;
					let resource = resolve_dependency(name)?;
					loaded.insert(record.id, resource);
				}
			} else {
				remaining.push(chunk);
			}
		}

		let mut result: Option<Box<dyn Any>> = None;
		for chunk in &remaining {
			let key = (chunk.get_type(), chunk.get_version());
			let reader = self
				.readers
				.get(&key)
				.ok_or_else(|| VfsError::MissingDecoder { chunk_type: chunk.get_type().as_bytes(), version: chunk.get_version() })?;
			if let ChunkReaderOutcome::Resource(resource) = reader(chunk, &mut loaded)? {
				if result.is_some() {
					return Err(VfsError::format_error("more than one chunk produced a top-level resource"));
				}
				result = Some(resource);
			}
		}

		let result = result.ok_or_else(|| VfsError::format_error("no chunk produced the top-level resource"))?;
		let type_id = (*result).type_id();
		if type_id != TypeId::of::<R>() {
			return Err(VfsError::format_error("resource file produced an unexpected resource type"));
		}
		Ok(*result.downcast::<R>().map_err(|_| VfsError::format_error("resource downcast failed"))?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chunk::{write_chunk_file, ChunkWriter};
	use crate::protocol::memory::MemoryFileProtocol;
	use crate::protocol::{FileFlags, FileProtocol};

	#[repr(C)]
	#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
	struct WidgetRecord {
		width: i32,
		height: i32,
	}

	#[derive(Debug, PartialEq)]
	struct Widget {
		width: i32,
		height: i32,
	}

	#[derive(Debug, PartialEq, Clone)]
	struct Texture {
		name: String,
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
	fn resource_without_dependencies_reads_back() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/w.bin");
		let mut chunk = ChunkWriter::new::<WidgetRecord>(ChunkType::from_str("WDGT"), 1);
		chunk.get_chunk_data::<WidgetRecord>()[0] = WidgetRecord { width: 3, height: 4 };
		write_chunk_file(&mut file, ChunkType::from_str("WDGT"), &[chunk]).unwrap();
		drop(file);

		let mut registry = ResourceFileReader::new();
		registry
			.register(ChunkType::from_str("WDGT"), 1, |chunk, _loaded| {
				let record: WidgetRecord = chunk.data::<WidgetRecord>().unwrap()[0];
				Ok(ChunkReaderOutcome::Resource(Box::new(Widget { width: record.width, height: record.height })))
			})
			.unwrap();

		let mut file = open_read(&proto, "/w.bin");
		let widget: Widget = registry.read(&mut file, |_name| unreachable!("no dependencies declared")).unwrap();
		assert_eq!(widget, Widget { width: 3, height: 4 });
	}

	#[test]
	fn unregistered_chunk_type_reports_missing_decoder() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/w.bin");
		let chunk = ChunkWriter::new::<WidgetRecord>(ChunkType::from_str("WDGT"), 1);
		write_chunk_file(&mut file, ChunkType::from_str("WDGT"), &[chunk]).unwrap();
		drop(file);

		let registry = ResourceFileReader::new();
		let mut file = open_read(&proto, "/w.bin");
		let result: VfsResult<Widget> = registry.read(&mut file, |_name| unreachable!());
		assert!(matches!(result, Err(VfsError::MissingDecoder { .. })));
	}

	#[test]
	fn dependencies_are_preloaded_before_dispatch() {
		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/w.bin");

		let mut load_chunk = ChunkWriter::new_array::<ResourceLoadChunk>(CHUNK_TYPE_RESOURCE_LOAD, 1, 1);
		let resource_name = load_chunk.add_string("stone");
		let type_name = load_chunk.add_string("Texture");
		load_chunk.get_chunk_data::<ResourceLoadChunk>()[0] = ResourceLoadChunk { type_name, resource_name, id: 42 };

		let widget_chunk = ChunkWriter::new::<WidgetRecord>(ChunkType::from_str("WDGT"), 1);
		write_chunk_file(&mut file, ChunkType::from_str("WDGT"), &[load_chunk, widget_chunk]).unwrap();
		drop(file);

		let mut registry = ResourceFileReader::new();
		registry
			.register(ChunkType::from_str("WDGT"), 1, |_chunk, loaded| {
				let texture: &Texture = loaded.get(42).expect("dependency 42 should already be loaded");
				assert_eq!(texture.name, "stone");
				Ok(ChunkReaderOutcome::Resource(Box::new(Widget { width: 0, height: 0 })))
			})
			.unwrap();

		let mut file = open_read(&proto, "/w.bin");
		let widget: Widget = registry
			.read(&mut file, |name| Ok(Box::new(Texture { name: name.to_string() }) as Box<dyn Any>))
			.unwrap();
		assert_eq!(widget, Widget { width: 0, height: 0 });
	}
}
