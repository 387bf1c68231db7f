//! Writes resources through the registry-dispatch convention: look up the
//! writer registered for a resource's concrete type, emit its declared
//! dependencies as a leading `"GBRL"` chunk, then the resource's own chunks.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::chunk::{write_chunk_file, ChunkType, ChunkWriter};
use crate::error::{VfsError, VfsResult};
use crate::file::File;

use super::{ResourceDependency, ResourceLoadChunk, CHUNK_TYPE_RESOURCE_LOAD};

/// Implemented by values that can be saved through the resource-file
/// dialect.
pub trait SaveResource: Any {
	/// Cross-file resources this value depends on, loaded before it.
	fn dependencies(&self) -> Vec<ResourceDependency> {
		Vec::new()
	}

	/// Emits the chunks describing this resource, in write order. The last
	/// chunk's type must equal the file's registered `chunk_type`.
	fn write_chunks(&self) -> VfsResult<Vec<ChunkWriter>>;
}

type WriterFn = Box<dyn Fn(&dyn Any) -> VfsResult<Vec<ChunkWriter>>>;

/// Dispatches a concrete Rust type to the chunk type its resource-file
/// entries are tagged with.
#[derive(Default)]
pub struct ResourceFileWriter {
	writers: HashMap<TypeId, (ChunkType, WriterFn)>,
}

impl ResourceFileWriter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers the writer for resource type `R`, tagging its files with
	/// `chunk_type`. Returns `Conflict` if `R` is already registered.
	pub fn register<R: SaveResource + 'static>(&mut self, chunk_type: ChunkType) -> VfsResult<()> {
		let type_id = TypeId::of::<R>();
		if self.writers.contains_key(&type_id) {
			return Err(VfsError::conflict(format!("resource writer already registered for chunk type {chunk_type}")));
		}
		let write: WriterFn = Box::new(|resource: &dyn Any| {
			let resource = resource.downcast_ref::<R>().expect("resource type mismatch with registered writer");
			resource.write_chunks()
		});
		self.writers.insert(type_id, (chunk_type, write));
		Ok(())
	}

	/// Writes `resource` to `file`: a leading dependency chunk if it has
	/// any, followed by its own registered chunks, under a file header
	/// tagged with the resource's registered chunk type.
	pub fn write<R: SaveResource + 'static>(&self, file: &mut File, resource: &R) -> VfsResult<()> {
		let type_id = TypeId::of::<R>();
		let (chunk_type, writer) = self
			.writers
			.get(&type_id)
			.ok_or_else(|| VfsError::format_error("no resource writer registered for this type"))?;

		let mut chunks = Vec::new();
		let dependencies = resource.dependencies();
		if !dependencies.is_empty() {
			chunks.push(build_load_chunk(&dependencies));
		}
		chunks.extend(writer(resource)?);

		write_chunk_file(file, *chunk_type, &chunks)
	}
}

fn build_load_chunk(dependencies: &[ResourceDependency]) -> ChunkWriter {
	let mut load_chunk = ChunkWriter::new_array::<ResourceLoadChunk>(CHUNK_TYPE_RESOURCE_LOAD, 1, dependencies.len());
	let mut records = Vec::with_capacity(dependencies.len());
	for dependency in dependencies {
		let type_name = load_chunk.add_string(&dependency.type_name);
		let resource_name = load_chunk.add_string(&dependency.resource_name);
		records.push(ResourceLoadChunk { type_name, resource_name, id: dependency.id });
	}
	load_chunk.get_chunk_data::<ResourceLoadChunk>().copy_from_slice(&records);
	load_chunk
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chunk::{read_chunk_file, ChunkReader};
	use crate::protocol::memory::MemoryFileProtocol;
	use crate::protocol::{FileFlags, FileProtocol};

	#[repr(C)]
	#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
	struct WidgetRecord {
		width: i32,
		height: i32,
	}

	struct Widget {
		width: i32,
		height: i32,
		deps: Vec<ResourceDependency>,
	}

	impl SaveResource for Widget {
		fn dependencies(&self) -> Vec<ResourceDependency> {
			self.deps.clone()
		}

		fn write_chunks(&self) -> VfsResult<Vec<ChunkWriter>> {
			let mut chunk = ChunkWriter::new::<WidgetRecord>(ChunkType::from_str("WDGT"), 1);
			chunk.get_chunk_data::<WidgetRecord>()[0] = WidgetRecord { width: self.width, height: self.height };
			Ok(vec![chunk])
		}
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
	fn resource_without_dependencies_writes_single_chunk() {
		let mut registry = ResourceFileWriter::new();
		registry.register::<Widget>(ChunkType::from_str("WDGT")).unwrap();

		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/w.bin");
		let widget = Widget { width: 4, height: 5, deps: Vec::new() };
		registry.write(&mut file, &widget).unwrap();
		drop(file);

		let mut file = open_read(&proto, "/w.bin");
		let mut chunks: Vec<ChunkReader> = Vec::new();
		read_chunk_file(&mut file, None, Some(&mut chunks)).unwrap();
		assert_eq!(chunks.len(), 1);
		assert_eq!(chunks[0].get_type().to_string(), "WDGT");
	}

	#[test]
	fn resource_with_two_dependencies_emits_leading_load_chunk() {
		let mut registry = ResourceFileWriter::new();
		registry.register::<Widget>(ChunkType::from_str("WDGT")).unwrap();

		let proto = MemoryFileProtocol::default();
		let mut file = open_write(&proto, "/w.bin");
		let widget = Widget {
			width: 1,
			height: 2,
			deps: vec![
				ResourceDependency { type_name: "Texture".into(), resource_name: "stone".into(), id: 10 },
				ResourceDependency { type_name: "Texture".into(), resource_name: "dirt".into(), id: 11 },
			],
		};
		registry.write(&mut file, &widget).unwrap();
		drop(file);

		let mut file = open_read(&proto, "/w.bin");
		let mut chunks: Vec<ChunkReader> = Vec::new();
		read_chunk_file(&mut file, None, Some(&mut chunks)).unwrap();
		assert_eq!(chunks.len(), 2);
		assert_eq!(chunks[0].get_type(), CHUNK_TYPE_RESOURCE_LOAD);
		let records: &[ResourceLoadChunk] = chunks[0].data().unwrap();
		assert_eq!(records.len(), 2);
		assert_eq!(chunks[0].resolve_str(records[0].resource_name).unwrap(), "stone");
		assert_eq!(records[0].id, 10);
		assert_eq!(chunks[0].resolve_str(records[1].resource_name).unwrap(), "dirt");
		assert_eq!(records[1].id, 11);
		assert_eq!(chunks[1].get_type().to_string(), "WDGT");
	}

	#[test]
	fn duplicate_registration_is_rejected() {
		let mut registry = ResourceFileWriter::new();
		registry.register::<Widget>(ChunkType::from_str("WDGT")).unwrap();
		assert!(registry.register::<Widget>(ChunkType::from_str("WDG2")).is_err());
	}
}
