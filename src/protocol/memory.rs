//! An in-heap [`FileProtocol`] backed by a `BTreeMap` of nodes. Registers
//! under the `mem` protocol name by default. Safe for concurrent use: each
//! operation takes its own short-lived lock on the node map; open file
//! contents are independently `Mutex`-protected so reads/writes on one
//! handle don't block unrelated directory operations.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use super::{FileFlags, FileProtocol, FileProtocolFlags, PathInfo, PathType, RawFile};

struct NodeInner {
	kind: PathType,
	size: AtomicI64,
	open: AtomicBool,
	contents: Mutex<Vec<u8>>,
}

impl NodeInner {
	fn folder() -> Arc<Self> {
		Arc::new(NodeInner {
			kind: PathType::Folder,
			size: AtomicI64::new(0),
			open: AtomicBool::new(false),
			contents: Mutex::new(Vec::new()),
		})
	}

	fn file() -> Arc<Self> {
		Arc::new(NodeInner {
			kind: PathType::File,
			size: AtomicI64::new(0),
			open: AtomicBool::new(false),
			contents: Mutex::new(Vec::new()),
		})
	}
}

pub struct MemoryFileProtocol {
	flags: FileProtocolFlags,
	nodes: RwLock<BTreeMap<String, Arc<NodeInner>>>,
}

impl MemoryFileProtocol {
	pub fn new(flags: FileProtocolFlags) -> Self {
		let mut nodes = BTreeMap::new();
		nodes.insert("/".to_string(), NodeInner::folder());
		MemoryFileProtocol { flags, nodes: RwLock::new(nodes) }
	}
}

impl Default for MemoryFileProtocol {
	fn default() -> Self {
		Self::new(FileProtocolFlags::all())
	}
}

struct MemoryFile {
	node: Weak<NodeInner>,
	position: i64,
}

impl MemoryFile {
	fn open(node: &Arc<NodeInner>) -> Self {
		node.open.store(true, Ordering::SeqCst);
		MemoryFile { node: Arc::downgrade(node), position: 0 }
	}
}

impl Drop for MemoryFile {
	fn drop(&mut self) {
		if let Some(node) = self.node.upgrade() {
			node.open.store(false, Ordering::SeqCst);
		}
	}
}

impl RawFile for MemoryFile {
	fn seek_end(&mut self) -> i64 {
		match self.node.upgrade() {
			None => {
				self.position = -1;
				-1
			}
			Some(node) => {
				self.position = node.contents.lock().unwrap().len() as i64;
				self.position
			}
		}
	}

	fn seek_to(&mut self, position: i64) -> i64 {
		match self.node.upgrade() {
			None => {
				self.position = -1;
				-1
			}
			Some(node) => {
				let len = node.contents.lock().unwrap().len() as i64;
				self.position = position.clamp(0, len);
				self.position
			}
		}
	}

	fn write(&mut self, buf: &[u8]) -> i64 {
		match self.node.upgrade() {
			None => {
				self.position = -1;
				0
			}
			Some(node) => {
				let mut contents = node.contents.lock().unwrap();
				let end = self.position + buf.len() as i64;
				if end > contents.len() as i64 {
					contents.resize(end as usize, 0);
					node.size.store(end, Ordering::SeqCst);
				}
				contents[self.position as usize..end as usize].copy_from_slice(buf);
				self.position = end;
				buf.len() as i64
			}
		}
	}

	fn read(&mut self, buf: &mut [u8]) -> i64 {
		match self.node.upgrade() {
			None => {
				self.position = -1;
				0
			}
			Some(node) => {
				let contents = node.contents.lock().unwrap();
				let available = (contents.len() as i64 - self.position).max(0) as usize;
				let to_read = buf.len().min(available);
				let start = self.position as usize;
				buf[..to_read].copy_from_slice(&contents[start..start + to_read]);
				self.position += to_read as i64;
				to_read as i64
			}
		}
	}
}

impl FileProtocol for MemoryFileProtocol {
	fn flags(&self) -> FileProtocolFlags {
		self.flags
	}

	fn default_names(&self) -> Vec<String> {
		vec!["mem".to_string()]
	}

	fn path_info(&self, path: &str) -> PathInfo {
		let nodes = self.nodes.read().unwrap();
		match nodes.get(path) {
			None => PathInfo::invalid(),
			Some(node) if node.kind == PathType::Folder => PathInfo { kind: PathType::Folder, size: 0 },
			Some(node) => PathInfo { kind: PathType::File, size: node.size.load(Ordering::SeqCst) },
		}
	}

	fn basic_list(&self, path: &str) -> Vec<String> {
		let prefix = if path == "/" { "/".to_string() } else { format!("{path}/") };
		let nodes = self.nodes.read().unwrap();
		nodes
			.range(prefix.clone()..)
			.take_while(|(key, _)| key.starts_with(&prefix))
			.filter_map(|(key, _)| {
				let item = &key[prefix.len()..];
				if item.is_empty() || item.contains('/') {
					None
				} else {
					Some(format!("mem:{prefix}{item}"))
				}
			})
			.collect()
	}

	fn basic_create_folder(&self, path: &str) -> bool {
		self.nodes.write().unwrap().insert(path.to_string(), NodeInner::folder());
		true
	}

	fn basic_delete_folder(&self, path: &str) -> bool {
		self.nodes.write().unwrap().remove(path);
		true
	}

	fn basic_delete_file(&self, path: &str) -> bool {
		let mut nodes = self.nodes.write().unwrap();
		match nodes.get(path) {
			None => false,
			Some(node) if node.open.load(Ordering::SeqCst) => false,
			Some(_) => {
				nodes.remove(path);
				true
			}
		}
	}

	fn basic_open_file(&self, path: &str, flags: FileFlags) -> Option<Box<dyn RawFile>> {
		if flags.contains(FileFlags::CREATE) {
			let node = NodeInner::file();
			let file = MemoryFile::open(&node);
			self.nodes.write().unwrap().insert(path.to_string(), node);
			return Some(Box::new(file));
		}
		let nodes = self.nodes.read().unwrap();
		let node = nodes.get(path)?;
		if node.open.load(Ordering::SeqCst) {
			return None;
		}
		if flags.contains(FileFlags::RESET) {
			node.contents.lock().unwrap().clear();
			node.size.store(0, Ordering::SeqCst);
		}
		Some(Box::new(MemoryFile::open(node)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::{FolderMode, ALL_PATH_TYPES};

	fn protocol() -> MemoryFileProtocol {
		MemoryFileProtocol::default()
	}

	#[test]
	fn create_and_list_files() {
		let proto = protocol();
		assert!(proto.create_folder("/a", FolderMode::Normal));
		let mut file = proto.open_file("/a/one.txt", FileFlags::CREATE | FileFlags::WRITE).unwrap();
		assert_eq!(file.write(b"hello"), 5);
		drop(file);
		let listed = proto.list("/a", "*", FolderMode::Normal, ALL_PATH_TYPES);
		assert_eq!(listed, vec!["mem:/a/one.txt".to_string()]);
		let info = proto.path_info("/a/one.txt");
		assert_eq!(info.kind, PathType::File);
		assert_eq!(info.size, 5);
		let _ = file;
	}

	#[test]
	fn read_after_write_round_trips() {
		let proto = protocol();
		{
			let mut file = proto.open_file("/x.bin", FileFlags::CREATE | FileFlags::WRITE).unwrap();
			file.write(b"abcdef");
		}
		let mut file = proto.open_file("/x.bin", FileFlags::READ).unwrap();
		let mut buf = [0u8; 4];
		assert_eq!(file.read(&mut buf), 4);
		assert_eq!(&buf, b"abcd");
	}

	#[test]
	fn delete_file_fails_while_open() {
		let proto = protocol();
		let file = proto.open_file("/held.txt", FileFlags::CREATE | FileFlags::WRITE).unwrap();
		assert!(!proto.delete_file("/held.txt"));
		drop(file);
		assert!(proto.delete_file("/held.txt"));
	}

	#[test]
	fn copy_file_streams_contents() {
		let proto = protocol();
		{
			let mut file = proto.open_file("/src.txt", FileFlags::CREATE | FileFlags::WRITE).unwrap();
			file.write(b"payload");
		}
		assert!(proto.copy_file("/src.txt", "/dst.txt"));
		let mut dst = proto.open_file("/dst.txt", FileFlags::READ).unwrap();
		let mut buf = [0u8; 7];
		assert_eq!(dst.read(&mut buf), 7);
		assert_eq!(&buf, b"payload");
	}
}
