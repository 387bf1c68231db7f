//! The resource-file dialect: a thin convention layered on the chunk codec
//! for versioned resource graphs with cross-resource references. A resource
//! file is a chunk file whose `file_type` is the resource's own chunk type,
//! optionally preceded by a `"GBRL"` chunk declaring other resources this
//! one depends on by name.
//!
//! See [`writer`] for building resource files and [`reader`] for parsing
//! them.

pub mod reader;
pub mod writer;

use bytemuck::{Pod, Zeroable};

use crate::chunk::ChunkType;

pub use reader::{ChunkReaderOutcome, LoadedResources, ResourceFileReader};
pub use writer::{ResourceFileWriter, SaveResource};

/// Identifies a resource within a file's dependency graph. Meaning beyond
/// uniqueness is left to the caller.
pub type ResourceId = u64;

/// The chunk type marking the leading dependency-declaration chunk.
pub const CHUNK_TYPE_RESOURCE_LOAD: ChunkType = ChunkType::new(b"GBRL");

/// One entry in a resource-load chunk: a dependency's type name and
/// resource name (both self-relative string-table offsets) plus its id.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable, Default)]
pub struct ResourceLoadChunk {
	pub type_name: i32,
	pub resource_name: i32,
	pub id: ResourceId,
}

/// A cross-file dependency a resource declares before its own chunks are
/// written.
#[derive(Debug, Clone)]
pub struct ResourceDependency {
	pub type_name: String,
	pub resource_name: String,
	pub id: ResourceId,
}
