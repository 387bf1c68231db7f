//! The top-level virtual file system: routes normalized paths to a
//! registered [`FileProtocol`] by protocol prefix (or the configured
//! default), enforces each protocol's declared capabilities, and handles
//! cross-protocol folder/file copies generically by streaming through
//! `File`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{VfsError, VfsResult};
use crate::file::File;
use crate::path::{self, PathFlags};
use crate::protocol::{FileFlags, FileProtocol, FileProtocolFlags, FolderMode, PathInfo, PathType, PathTypeFlags, ALL_PATH_TYPES};

/// Number of bytes copied at a time when copying files across protocols.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

const FILESYSTEM_PATH_FLAGS: PathFlags = PathFlags::from_bits_truncate(
	path::GENERIC_PATH_FLAGS.bits() | PathFlags::REQUIRE_ROOT.bits(),
);

/// A virtual file system composed of one or more mounted [`FileProtocol`]s.
///
/// Safe for concurrent use once mounts are established; mounting or
/// changing the default protocol concurrently with other calls is not
/// supported.
pub struct FileSystem {
	protocols: HashMap<String, Arc<dyn FileProtocol>>,
	default_protocol_name: String,
}

impl FileSystem {
	pub fn new() -> Self {
		FileSystem { protocols: HashMap::new(), default_protocol_name: String::new() }
	}

	/// Mounts `protocol` under its own default protocol names.
	pub fn register<P: FileProtocol + 'static>(&mut self, protocol: P) -> VfsResult<()> {
		let names = protocol.default_names();
		self.register_impl(Arc::new(protocol), names)
	}

	/// Mounts `protocol` under a single given name.
	pub fn register_named<P: FileProtocol + 'static>(&mut self, protocol: P, name: impl Into<String>) -> VfsResult<()> {
		self.register_impl(Arc::new(protocol), vec![name.into()])
	}

	/// Mounts `protocol` under every name in `names`.
	pub fn register_names<P: FileProtocol + 'static>(&mut self, protocol: P, names: Vec<String>) -> VfsResult<()> {
		self.register_impl(Arc::new(protocol), names)
	}

	fn register_impl(&mut self, protocol: Arc<dyn FileProtocol>, names: Vec<String>) -> VfsResult<()> {
		if names.is_empty() {
			return Err(VfsError::EmptyMountNames);
		}
		if !protocol.flags().is_valid() {
			return Err(VfsError::InvalidProtocolFlags);
		}
		for name in &names {
			if !path::is_valid_protocol_name(name) {
				return Err(VfsError::InvalidProtocolName(name.clone()));
			}
			if self.protocols.contains_key(name) {
				return Err(VfsError::DuplicateMount(name.clone()));
			}
		}
		for name in names {
			self.protocols.insert(name, protocol.clone());
		}
		Ok(())
	}

	pub fn is_registered(&self, protocol_name: &str) -> bool {
		self.protocols.contains_key(protocol_name)
	}

	pub fn protocol_names(&self) -> Vec<String> {
		self.protocols.keys().cloned().collect()
	}

	pub fn set_default_protocol(&mut self, protocol_name: &str) -> VfsResult<()> {
		if !self.protocols.contains_key(protocol_name) {
			return Err(VfsError::UnknownProtocol(protocol_name.to_string()));
		}
		self.default_protocol_name = protocol_name.to_string();
		Ok(())
	}

	pub fn default_protocol_name(&self) -> &str {
		&self.default_protocol_name
	}

	pub fn flags(&self, protocol_name: &str) -> Option<FileProtocolFlags> {
		self.protocols.get(protocol_name).map(|p| p.flags())
	}

	fn route<'a>(&self, path: &'a str) -> VfsResult<(String, Arc<dyn FileProtocol>, &'a str)> {
		let (local, protocol_name) = path::remove_protocol(path, path::GENERIC_PATH_FLAGS);
		let name = protocol_name.unwrap_or(&self.default_protocol_name);
		if name.is_empty() {
			return Err(VfsError::NoDefaultProtocol);
		}
		match self.protocols.get(name) {
			Some(protocol) => Ok((name.to_string(), protocol.clone(), local)),
			None => Err(VfsError::UnknownProtocol(name.to_string())),
		}
	}

	fn normalize(&self, path: &str) -> VfsResult<String> {
		path::normalize_path(path, FILESYSTEM_PATH_FLAGS).map_err(|flag| VfsError::PathError { path: path.to_string(), flag })
	}

	/// Lists files and folders under `path` matching `pattern` (empty
	/// matches everything).
	pub fn list(&self, path: &str, pattern: &str, mode: FolderMode) -> VfsResult<Vec<String>> {
		self.list_typed(path, pattern, mode, ALL_PATH_TYPES)
	}

	pub fn list_folders(&self, path: &str, pattern: &str, mode: FolderMode) -> VfsResult<Vec<String>> {
		self.list_typed(path, pattern, mode, PathTypeFlags::FOLDER)
	}

	pub fn list_files(&self, path: &str, pattern: &str, mode: FolderMode) -> VfsResult<Vec<String>> {
		self.list_typed(path, pattern, mode, PathTypeFlags::FILE)
	}

	fn list_typed(&self, path: &str, pattern: &str, mode: FolderMode, types: PathTypeFlags) -> VfsResult<Vec<String>> {
		let normalized = self.normalize(path)?;
		let (_, protocol, local) = self.route(&normalized)?;
		if !protocol.flags().contains(FileProtocolFlags::LIST) {
			return Err(VfsError::CapabilityError("list"));
		}
		Ok(protocol.list(local, pattern, mode, types))
	}

	pub fn create_folder(&self, path: &str, mode: FolderMode) -> VfsResult<()> {
		let normalized = self.normalize(path)?;
		let (_, protocol, local) = self.route(&normalized)?;
		if !protocol.flags().contains(FileProtocolFlags::FOLDER_CREATE) {
			return Err(VfsError::CapabilityError("folder_create"));
		}
		if protocol.create_folder(local, mode) {
			Ok(())
		} else {
			Err(VfsError::conflict(format!("could not create folder {path}")))
		}
	}

	pub fn delete_folder(&self, path: &str, mode: FolderMode) -> VfsResult<()> {
		let normalized = self.normalize(path)?;
		let (_, protocol, local) = self.route(&normalized)?;
		if !protocol.flags().contains(FileProtocolFlags::FOLDER_CREATE) {
			return Err(VfsError::CapabilityError("folder_create"));
		}
		if protocol.delete_folder(local, mode) {
			Ok(())
		} else {
			Err(VfsError::conflict(format!("could not delete folder {path}")))
		}
	}

	pub fn delete_file(&self, path: &str) -> VfsResult<()> {
		let normalized = self.normalize(path)?;
		let (_, protocol, local) = self.route(&normalized)?;
		if !protocol.flags().contains(FileProtocolFlags::FILE_CREATE) {
			return Err(VfsError::CapabilityError("file_create"));
		}
		if protocol.delete_file(local) {
			Ok(())
		} else {
			Err(VfsError::conflict(format!("could not delete file {path}")))
		}
	}

	pub fn copy_folder(&self, from_path: &str, to_path: &str) -> VfsResult<()> {
		let from_normalized = self.normalize(from_path)?;
		let to_normalized = self.normalize(to_path)?;
		let (from_name, from_protocol, from_local) = self.route(&from_normalized)?;
		let (to_name, to_protocol, to_local) = self.route(&to_normalized)?;

		let from_flags = from_protocol.flags();
		let to_flags = if Arc::ptr_eq(&from_protocol, &to_protocol) { from_flags } else { to_protocol.flags() };
		if !to_flags.contains(FileProtocolFlags::FOLDER_CREATE) {
			return Err(VfsError::CapabilityError("folder_create"));
		}

		if !Arc::ptr_eq(&from_protocol, &to_protocol) || from_name != to_name {
			if !from_flags.intersects(FileProtocolFlags::FILE_READ | FileProtocolFlags::LIST)
				|| !to_flags.intersects(FileProtocolFlags::FOLDER_CREATE | FileProtocolFlags::FILE_CREATE | FileProtocolFlags::FILE_WRITE)
			{
				return Err(VfsError::CapabilityError("cross-protocol copy"));
			}
			return self.generic_copy_folder(&from_name, from_protocol.as_ref(), from_local, &to_name, to_protocol.as_ref(), to_local);
		}

		if path::is_root_path(from_local, path::LOCAL_PATH_FLAGS)
			|| from_local == to_local
			|| to_local.starts_with(&format!("{from_local}/"))
		{
			return Err(VfsError::conflict("cannot copy a folder into itself or an ancestor"));
		}
		if from_protocol.copy_folder(from_local, to_local) {
			Ok(())
		} else {
			Err(VfsError::conflict(format!("could not copy folder {from_path} to {to_path}")))
		}
	}

	pub fn copy_file(&self, from_path: &str, to_path: &str) -> VfsResult<()> {
		let from_normalized = self.normalize(from_path)?;
		let to_normalized = self.normalize(to_path)?;
		let (from_name, from_protocol, from_local) = self.route(&from_normalized)?;
		let (to_name, to_protocol, to_local) = self.route(&to_normalized)?;

		let from_flags = from_protocol.flags();
		let to_flags = if Arc::ptr_eq(&from_protocol, &to_protocol) { from_flags } else { to_protocol.flags() };
		if !to_flags.contains(FileProtocolFlags::FILE_CREATE) {
			return Err(VfsError::CapabilityError("file_create"));
		}
		if !Arc::ptr_eq(&from_protocol, &to_protocol) || from_name != to_name {
			if !from_flags.contains(FileProtocolFlags::FILE_READ)
				|| !to_flags.intersects(FileProtocolFlags::FILE_CREATE | FileProtocolFlags::FILE_WRITE)
			{
				return Err(VfsError::CapabilityError("cross-protocol copy"));
			}
			return self.generic_copy_file(from_protocol.as_ref(), from_local, to_protocol.as_ref(), to_local);
		}
		if from_protocol.copy_file(from_local, to_local) {
			Ok(())
		} else {
			Err(VfsError::conflict(format!("could not copy file {from_path} to {to_path}")))
		}
	}

	pub fn is_valid_path(&self, path: &str) -> bool {
		self.path_info(path).map(|info| info.is_valid()).unwrap_or(false)
	}

	pub fn is_valid_folder(&self, path: &str) -> bool {
		matches!(self.path_info(path), Ok(info) if info.kind == PathType::Folder)
	}

	pub fn is_valid_file(&self, path: &str) -> bool {
		matches!(self.path_info(path), Ok(info) if info.kind == PathType::File)
	}

	pub fn path_info(&self, path: &str) -> VfsResult<PathInfo> {
		let normalized = self.normalize(path)?;
		let (_, protocol, local) = self.route(&normalized)?;
		if !protocol.flags().contains(FileProtocolFlags::INFO) {
			return Err(VfsError::CapabilityError("info"));
		}
		Ok(protocol.get_path_info(local))
	}

	pub fn open_file(&self, path: &str, flags: FileFlags) -> VfsResult<File> {
		if !flags.is_valid() {
			return Err(VfsError::conflict("invalid file flags"));
		}
		let normalized = self.normalize(path)?;
		let (_, protocol, local) = self.route(&normalized)?;
		let protocol_flags = protocol.flags();
		if flags.contains(FileFlags::READ) && !protocol_flags.contains(FileProtocolFlags::FILE_READ) {
			return Err(VfsError::CapabilityError("file_read"));
		}
		if flags.contains(FileFlags::WRITE) && !protocol_flags.contains(FileProtocolFlags::FILE_WRITE) {
			return Err(VfsError::CapabilityError("file_write"));
		}
		if flags.contains(FileFlags::CREATE) && !protocol_flags.contains(FileProtocolFlags::FILE_CREATE) {
			return Err(VfsError::CapabilityError("file_create"));
		}
		let raw_file = protocol.open_file(local, flags).ok_or_else(|| VfsError::not_found(path))?;
		Ok(File::new(raw_file, flags))
	}

	/// Writes `buffer` to `path`, creating or overwriting it.
	pub fn write_file(&self, path: &str, buffer: &str) -> VfsResult<()> {
		let mut file = self.open_file(path, FileFlags::CREATE | FileFlags::RESET | FileFlags::WRITE)?;
		if file.write_string(buffer) != buffer.len() as i64 {
			return Err(VfsError::conflict(format!("short write to {path}")));
		}
		Ok(())
	}

	/// Writes `buffer` to `path` as raw little-endian values of `T`.
	pub fn write_file_values<T: bytemuck::Pod>(&self, path: &str, buffer: &[T]) -> VfsResult<()> {
		let mut file = self.open_file(path, FileFlags::CREATE | FileFlags::RESET | FileFlags::WRITE)?;
		if file.write_typed(buffer) != buffer.len() as i64 {
			return Err(VfsError::conflict(format!("short write to {path}")));
		}
		Ok(())
	}

	/// Reads the entire contents of `path` as a UTF-8 string.
	pub fn read_file(&self, path: &str) -> VfsResult<String> {
		let mut file = self.open_file(path, FileFlags::READ)?;
		Ok(file.read_remaining_string())
	}

	/// Reads the entire contents of `path` as a sequence of `T` values.
	pub fn read_file_values<T: bytemuck::Pod>(&self, path: &str) -> VfsResult<Vec<T>> {
		let mut file = self.open_file(path, FileFlags::READ)?;
		Ok(file.read_remaining_typed::<T>())
	}

	fn generic_copy_folder(
		&self,
		from_name: &str,
		from_protocol: &dyn FileProtocol,
		from_path: &str,
		to_name: &str,
		to_protocol: &dyn FileProtocol,
		to_path: &str,
	) -> VfsResult<()> {
		if !to_protocol.create_folder(to_path, FolderMode::Normal) {
			return Err(VfsError::conflict(format!("could not create destination folder {to_path}")));
		}
		let from_files = from_protocol.list(from_path, "", FolderMode::Normal, PathTypeFlags::FILE);
		let from_folders = from_protocol.list(from_path, "", FolderMode::Normal, PathTypeFlags::FOLDER);
		for entry in from_files {
			let (local, _) = path::remove_protocol(&entry, path::GENERIC_PATH_FLAGS);
			let (_, filename) = path::remove_filename(local, path::LOCAL_PATH_FLAGS);
			let dest = path::join_path(to_path, filename, path::LOCAL_PATH_FLAGS)
				.ok_or_else(|| VfsError::conflict(format!("could not join destination path for {local}")))?;
			self.generic_copy_file(from_protocol, local, to_protocol, &dest)?;
		}
		for entry in from_folders {
			let (local, _) = path::remove_protocol(&entry, path::GENERIC_PATH_FLAGS);
			let (_, filename) = path::remove_filename(local, path::LOCAL_PATH_FLAGS);
			let dest = path::join_path(to_path, filename, path::LOCAL_PATH_FLAGS)
				.ok_or_else(|| VfsError::conflict(format!("could not join destination path for {local}")))?;
			self.generic_copy_folder(from_name, from_protocol, local, to_name, to_protocol, &dest)?;
		}
		Ok(())
	}

	fn generic_copy_file(&self, from_protocol: &dyn FileProtocol, from_path: &str, to_protocol: &dyn FileProtocol, to_path: &str) -> VfsResult<()> {
		let Some(mut from_file) = from_protocol.open_file(from_path, FileFlags::READ) else {
			return Err(VfsError::not_found(from_path));
		};
		let Some(mut to_file) = to_protocol.open_file(to_path, FileFlags::CREATE | FileFlags::RESET | FileFlags::WRITE) else {
			return Err(VfsError::conflict(format!("could not open destination file {to_path}")));
		};
		let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
		loop {
			let read = from_file.read(&mut buffer);
			if read < 0 {
				return Err(VfsError::conflict(format!("read failed copying {from_path}")));
			}
			if read > 0 {
				let written = to_file.write(&buffer[..read as usize]);
				if written != read {
					return Err(VfsError::conflict(format!("write failed copying to {to_path}")));
				}
			}
			if (read as usize) < COPY_BUFFER_SIZE {
				break;
			}
		}
		Ok(())
	}
}

impl Default for FileSystem {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::memory::MemoryFileProtocol;

	fn filesystem_with_mem() -> FileSystem {
		let mut fs = FileSystem::new();
		fs.register(MemoryFileProtocol::default()).unwrap();
		fs.set_default_protocol("mem").unwrap();
		fs
	}

	#[test]
	fn write_then_read_round_trips() {
		let fs = filesystem_with_mem();
		fs.write_file("mem:/hello.txt", "world").unwrap();
		assert_eq!(fs.read_file("mem:/hello.txt").unwrap(), "world");
		assert_eq!(fs.read_file("/hello.txt").unwrap(), "world");
	}

	#[test]
	fn unregistered_protocol_errors() {
		let fs = filesystem_with_mem();
		let err = fs.read_file("nope:/a").unwrap_err();
		assert!(matches!(err, VfsError::UnknownProtocol(_)));
	}

	#[test]
	fn copy_folder_rejects_self_nesting() {
		let fs = filesystem_with_mem();
		fs.create_folder("mem:/a", FolderMode::Normal).unwrap();
		let err = fs.copy_folder("mem:/a", "mem:/a/b").unwrap_err();
		assert!(matches!(err, VfsError::Conflict(_)));
	}

	#[test]
	fn cross_protocol_folder_copy_preserves_bytes() {
		let mut fs = FileSystem::new();
		fs.register(MemoryFileProtocol::default()).unwrap();
		fs.register_named(MemoryFileProtocol::default(), "alt").unwrap();
		fs.set_default_protocol("mem").unwrap();

		fs.create_folder("mem:/src", FolderMode::Normal).unwrap();
		fs.write_file("mem:/src/a.txt", "one").unwrap();
		fs.create_folder("mem:/src/nested", FolderMode::Normal).unwrap();
		fs.write_file("mem:/src/nested/b.txt", "two").unwrap();

		fs.copy_folder("mem:/src", "alt:/dst").unwrap();

		assert_eq!(fs.read_file("alt:/dst/a.txt").unwrap(), "one");
		assert_eq!(fs.read_file("alt:/dst/nested/b.txt").unwrap(), "two");
	}

	#[test]
	fn missing_capability_is_reported() {
		let mut fs = FileSystem::new();
		fs.register(MemoryFileProtocol::new(crate::protocol::FileProtocolFlags::FILE_READ | crate::protocol::FileProtocolFlags::FILE_WRITE))
			.unwrap();
		fs.set_default_protocol("mem").unwrap();
		let err = fs.create_folder("mem:/a", FolderMode::Normal).unwrap_err();
		assert!(matches!(err, VfsError::CapabilityError(_)));
	}
}
