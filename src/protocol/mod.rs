//! The `FileProtocol` trait: the pluggable backend layer the VFS mounts and
//! routes to. A small set of `basic_*` primitives must be implemented per
//! backend; the rest of the public surface (`list`, `create_folder`,
//! `copy_folder`, `copy_file`, ...) is provided generically in terms of
//! those primitives, exactly as a backend author would want: write the
//! primitive once, get folder recursion, cross-call copies, and path-type
//! filtering for free.

pub mod memory;
pub mod native;

use bitflags::bitflags;

use crate::path::{self, PathFlags};

/// Buffer size used by the default streaming `basic_copy_file` implementation.
pub const BASIC_COPY_BUFFER_SIZE: usize = 32 * 1024;

bitflags! {
	/// Capabilities a protocol declares at mount time.
	pub struct FileProtocolFlags: u32 {
		const INFO = 1 << 0;
		const LIST = 1 << 1;
		const FOLDER_CREATE = 1 << 2;
		const FILE_CREATE = 1 << 3;
		const FILE_READ = 1 << 4;
		const FILE_WRITE = 1 << 5;
	}
}

impl FileProtocolFlags {
	/// Checks the invariants a protocol's declared flags must satisfy:
	/// `LIST` implies `INFO`, `FOLDER_CREATE` implies `FILE_CREATE`,
	/// `FILE_CREATE` implies `FILE_WRITE`, and at least one of
	/// `FILE_READ`/`FILE_WRITE` must be set.
	pub fn is_valid(&self) -> bool {
		if self.contains(FileProtocolFlags::LIST) && !self.contains(FileProtocolFlags::INFO) {
			return false;
		}
		if self.contains(FileProtocolFlags::FOLDER_CREATE) && !self.contains(FileProtocolFlags::FILE_CREATE) {
			return false;
		}
		if self.contains(FileProtocolFlags::FILE_CREATE) && !self.contains(FileProtocolFlags::FILE_WRITE) {
			return false;
		}
		self.intersects(FileProtocolFlags::FILE_READ | FileProtocolFlags::FILE_WRITE)
	}
}

bitflags! {
	/// Flags passed to `FileProtocol::open_file`.
	pub struct FileFlags: u32 {
		const READ = 1 << 0;
		const WRITE = 1 << 1;
		const CREATE = 1 << 2;
		const RESET = 1 << 3;
	}
}

impl FileFlags {
	/// `CREATE` and `RESET` each require `WRITE`; at least one of
	/// `READ`/`WRITE` must be set.
	pub fn is_valid(&self) -> bool {
		if !self.intersects(FileFlags::READ | FileFlags::WRITE) {
			return false;
		}
		if self.contains(FileFlags::CREATE) && !self.contains(FileFlags::WRITE) {
			return false;
		}
		if self.contains(FileFlags::RESET) && !self.contains(FileFlags::WRITE) {
			return false;
		}
		true
	}
}

/// The kind of thing found at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathType {
	#[default]
	Invalid,
	File,
	Folder,
}

bitflags! {
	/// A filter set over [`PathType`], used by `List` to restrict which
	/// entry kinds are returned.
	pub struct PathTypeFlags: u8 {
		const FILE = 1 << 0;
		const FOLDER = 1 << 1;
	}
}

/// Equivalent of `kAllPathTypes`: matches every [`PathType`] except
/// `Invalid`.
pub const ALL_PATH_TYPES: PathTypeFlags = PathTypeFlags::from_bits_truncate(
	PathTypeFlags::FILE.bits() | PathTypeFlags::FOLDER.bits(),
);

impl PathTypeFlags {
	pub fn is_set(&self, kind: PathType) -> bool {
		match kind {
			PathType::Invalid => false,
			PathType::File => self.contains(PathTypeFlags::FILE),
			PathType::Folder => self.contains(PathTypeFlags::FOLDER),
		}
	}
}

/// The result of a `path_info`/`get_path_info` query.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathInfo {
	pub kind: PathType,
	pub size: i64,
}

impl PathInfo {
	pub fn invalid() -> Self {
		PathInfo { kind: PathType::Invalid, size: 0 }
	}

	pub fn is_valid(&self) -> bool {
		self.kind != PathType::Invalid
	}
}

/// Whether `create_folder`/`delete_folder` act only on the named folder or
/// recurse through its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderMode {
	Normal,
	Recursive,
}

/// A total order over the strength of a lock a protocol may take around a
/// single operation: `Query < OpenRead < OpenWrite < Modify`. Protocols
/// never nest locks; each `lock`/`unlock` call pair is independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockType {
	Query,
	OpenRead,
	OpenWrite,
	Modify,
}

/// A handle to an open file, as returned by a protocol's `basic_open_file`.
/// All methods report failure with `-1`; once any call fails the handle is
/// expected to keep failing (sticky error state is the caller's, i.e.
/// `File`'s, responsibility to track, but a well-behaved `RawFile` should
/// not un-error itself either).
pub trait RawFile: Send {
	fn seek_end(&mut self) -> i64;
	fn seek_to(&mut self, position: i64) -> i64;
	fn read(&mut self, buf: &mut [u8]) -> i64;
	fn write(&mut self, buf: &[u8]) -> i64;
}

/// A mountable backend. Implement the `basic_*` primitives and `path_info`;
/// the rest of the trait is generic in terms of those primitives.
///
/// Paths passed into every method here are already normalized, absolute,
/// and stripped of any protocol prefix by the time they reach a protocol —
/// that stripping and routing is the VFS's job, not the protocol's.
pub trait FileProtocol: Send + Sync {
	/// The capabilities this protocol supports. Checked against
	/// [`FileProtocolFlags::is_valid`] at mount time by the VFS.
	fn flags(&self) -> FileProtocolFlags;

	/// Default mount names this protocol would like to be registered under,
	/// if the caller doesn't supply its own.
	fn default_names(&self) -> Vec<String> {
		Vec::new()
	}

	/// Acquire a lock of at least `lock_type` strength around the operation
	/// that follows. Protocols that are inherently safe for concurrent use
	/// (e.g. the OS filesystem) can leave this a no-op.
	fn lock(&self, _lock_type: LockType) {}

	/// Release a lock taken by a matching `lock` call.
	fn unlock(&self, _lock_type: LockType) {}

	/// Returns information about what's at `path`, or `PathInfo::invalid()`
	/// if nothing is there.
	fn path_info(&self, path: &str) -> PathInfo;

	/// Lists the immediate (non-recursive) children of `path`. Returned
	/// entries are full local paths, not just names.
	fn basic_list(&self, path: &str) -> Vec<String>;

	/// Creates the folder at `path`. The default `create_folder` has
	/// already verified the immediate parent exists and is a folder.
	fn basic_create_folder(&self, path: &str) -> bool;

	/// Deletes the folder at `path`. The default `delete_folder` has
	/// already emptied it when operating recursively.
	fn basic_delete_folder(&self, path: &str) -> bool;

	/// Deletes the file at `path`. The default `delete_file` has already
	/// verified `path` names a file.
	fn basic_delete_file(&self, path: &str) -> bool;

	/// Opens the file at `path` with `flags`. The default `open_file` has
	/// already validated preconditions (parent exists, not a folder, etc).
	fn basic_open_file(&self, path: &str, flags: FileFlags) -> Option<Box<dyn RawFile>>;

	/// Copies the file at `from_path` to `to_path`, both within this
	/// protocol. The default implementation streams bytes through
	/// `basic_open_file` in `BASIC_COPY_BUFFER_SIZE` chunks; override for a
	/// protocol-native copy (e.g. a hard link or a `BTreeMap` clone).
	fn basic_copy_file(&self, from_path: &str, to_path: &str) -> bool {
		let Some(mut source) = self.basic_open_file(from_path, FileFlags::READ) else {
			return false;
		};
		let Some(mut dest) = self.basic_open_file(to_path, FileFlags::CREATE | FileFlags::RESET | FileFlags::WRITE) else {
			return false;
		};
		let mut buffer = vec![0u8; BASIC_COPY_BUFFER_SIZE];
		loop {
			let read = source.read(&mut buffer);
			if read < 0 {
				return false;
			}
			if read == 0 {
				return true;
			}
			let written = dest.write(&buffer[..read as usize]);
			if written != read {
				return false;
			}
		}
	}

	/// Returns information about what's at `path`.
	fn get_path_info(&self, path: &str) -> PathInfo {
		self.path_info(path)
	}

	/// Lists entries under `path` matching `pattern` (see
	/// [`crate::path::path_matches_pattern`]) and `types`, optionally
	/// recursing into subfolders.
	fn list(&self, path: &str, pattern: &str, mode: FolderMode, types: PathTypeFlags) -> Vec<String> {
		let mut results = Vec::new();
		let mut remaining: std::collections::VecDeque<String> = self.basic_list(path).into();
		while let Some(current) = remaining.pop_front() {
			let (local, _) = path::remove_protocol(&current, path::GENERIC_PATH_FLAGS);
			let current_info = self.path_info(local);
			if !current_info.is_valid() {
				continue;
			}
			if current_info.kind == PathType::Folder && mode == FolderMode::Recursive {
				for child in self.basic_list(local) {
					remaining.push_back(child);
				}
			}
			if types != ALL_PATH_TYPES && !types.is_set(current_info.kind) {
				continue;
			}
			let (_, filename) = path::remove_filename(local, path::LOCAL_PATH_FLAGS);
			if path::path_matches_pattern(filename, pattern) {
				results.push(current);
			}
		}
		results
	}

	/// Creates the folder at `path`. In [`FolderMode::Normal`], the
	/// immediate parent must already exist as a folder. In
	/// [`FolderMode::Recursive`], missing ancestors are created as needed.
	fn create_folder(&self, path: &str, mode: FolderMode) -> bool {
		if self.path_info(path).is_valid() {
			return self.path_info(path).kind == PathType::Folder;
		}
		match mode {
			FolderMode::Normal => {
				let (parent, _) = path::remove_filename(path, path::LOCAL_PATH_FLAGS);
				if !path::is_root_path(parent, path::LOCAL_PATH_FLAGS) && self.path_info(parent).kind != PathType::Folder {
					return false;
				}
				self.basic_create_folder(path)
			}
			FolderMode::Recursive => {
				let mut stack = vec![path.to_string()];
				loop {
					let current = stack.last().unwrap();
					let (parent, _) = path::remove_filename(current, path::LOCAL_PATH_FLAGS);
					if path::is_root_path(parent, path::LOCAL_PATH_FLAGS) || self.path_info(parent).kind == PathType::Folder {
						break;
					}
					stack.push(parent.to_string());
				}
				while let Some(to_create) = stack.pop() {
					if !self.path_info(&to_create).is_valid() && !self.basic_create_folder(&to_create) {
						return false;
					}
				}
				true
			}
		}
	}

	/// Deletes the folder at `path`. Fails on a root path. In
	/// [`FolderMode::Normal`], fails if the folder is non-empty. Deleting a
	/// path that's already absent succeeds.
	fn delete_folder(&self, path: &str, mode: FolderMode) -> bool {
		if path::is_root_path(path, path::LOCAL_PATH_FLAGS) {
			return false;
		}
		if self.path_info(path).kind != PathType::Folder {
			return self.path_info(path).kind == PathType::Invalid;
		}
		let children = self.basic_list(path);
		if mode == FolderMode::Normal {
			if !children.is_empty() {
				return false;
			}
			return self.basic_delete_folder(path);
		}
		for child in &children {
			let (local, _) = path::remove_protocol(child, path::GENERIC_PATH_FLAGS);
			let info = self.path_info(local);
			match info.kind {
				PathType::Folder => {
					if !self.delete_folder(local, FolderMode::Recursive) {
						return false;
					}
				}
				PathType::File => {
					if !self.delete_file(local) {
						return false;
					}
				}
				PathType::Invalid => {}
			}
		}
		self.basic_delete_folder(path)
	}

	/// Recursively copies the folder at `from_path` (and its contents) to
	/// `to_path`, both within this protocol.
	fn copy_folder(&self, from_path: &str, to_path: &str) -> bool {
		if self.path_info(from_path).kind != PathType::Folder {
			return false;
		}
		if !self.path_info(to_path).is_valid() && !self.basic_create_folder(to_path) {
			return false;
		}
		if self.path_info(to_path).kind != PathType::Folder {
			return false;
		}
		for child in self.basic_list(from_path) {
			let (local, _) = path::remove_protocol(&child, path::GENERIC_PATH_FLAGS);
			let (_, filename) = path::remove_filename(local, path::LOCAL_PATH_FLAGS);
			let Some(dest) = path::join_path(to_path, filename, path::LOCAL_PATH_FLAGS) else {
				return false;
			};
			match self.path_info(local).kind {
				PathType::Folder => {
					if !self.copy_folder(local, &dest) {
						return false;
					}
				}
				PathType::File => {
					if !self.copy_file(local, &dest) {
						return false;
					}
				}
				PathType::Invalid => {}
			}
		}
		true
	}

	/// Copies the file at `from_path` to `to_path`, both within this
	/// protocol.
	fn copy_file(&self, from_path: &str, to_path: &str) -> bool {
		if self.path_info(from_path).kind != PathType::File {
			return false;
		}
		let to_info = self.path_info(to_path);
		if to_info.kind == PathType::Folder {
			return false;
		}
		if !to_info.is_valid() {
			let (parent, _) = path::remove_filename(to_path, path::LOCAL_PATH_FLAGS);
			if !path::is_root_path(parent, path::LOCAL_PATH_FLAGS) && self.path_info(parent).kind != PathType::Folder {
				return false;
			}
		}
		if from_path == to_path {
			return true;
		}
		self.basic_copy_file(from_path, to_path)
	}

	/// Deletes the file at `path`. Deleting a path that's already absent
	/// succeeds; deleting a folder fails.
	fn delete_file(&self, path: &str) -> bool {
		let info = self.path_info(path);
		match info.kind {
			PathType::Invalid => true,
			PathType::Folder => false,
			PathType::File => self.basic_delete_file(path),
		}
	}

	/// Opens the file at `path` with `flags`.
	fn open_file(&self, path: &str, mut flags: FileFlags) -> Option<Box<dyn RawFile>> {
		let info = self.path_info(path);
		if info.kind == PathType::Folder {
			return None;
		}
		if info.kind == PathType::Invalid {
			if !flags.contains(FileFlags::CREATE) {
				return None;
			}
			let (parent, _) = path::remove_filename(path, path::LOCAL_PATH_FLAGS);
			if !path::is_root_path(parent, path::LOCAL_PATH_FLAGS) && self.path_info(parent).kind != PathType::Folder {
				return None;
			}
		} else if flags.contains(FileFlags::CREATE) {
			flags.remove(FileFlags::CREATE);
		}
		self.basic_open_file(path, flags)
	}
}
