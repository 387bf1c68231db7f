//! A [`FileProtocol`] rooted in a folder on the local operating system.
//! Registers under the `file` protocol name by default.
//!
//! Only regular files and directories are supported; symlinks are skipped
//! during listing and folder operations, and report as invalid when
//! queried directly.

use std::fs::{self, File as StdFile, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use super::{FileFlags, FileProtocol, FileProtocolFlags, FolderMode, PathInfo, PathType, PathTypeFlags, RawFile, ALL_PATH_TYPES};
use crate::path;

fn other_error(msg: impl Into<String>) -> IoError {
	IoError::new(ErrorKind::Other, msg.into())
}

/// Builds a [`NativeFileProtocol`], resolving and optionally creating its
/// root folder.
pub struct NativeFileProtocolBuilder {
	root: String,
	unique_root: bool,
	delete_at_exit: bool,
	flags: FileProtocolFlags,
}

impl NativeFileProtocolBuilder {
	pub fn new() -> Self {
		NativeFileProtocolBuilder {
			root: String::new(),
			unique_root: false,
			delete_at_exit: false,
			flags: FileProtocolFlags::all(),
		}
	}

	/// The root folder on the host filesystem. Relative paths are resolved
	/// against the current working directory. Defaults to the current
	/// directory if never set.
	pub fn root(mut self, root: impl Into<String>) -> Self {
		self.root = root.into();
		self
	}

	/// Requests that a new, uniquely-named folder be created under `root`
	/// rather than using `root` itself.
	pub fn unique_root(mut self, unique: bool) -> Self {
		self.unique_root = unique;
		self
	}

	/// If set, the protocol's contents (and, combined with `unique_root`,
	/// the root folder itself) are deleted when the protocol is dropped.
	pub fn delete_at_exit(mut self, delete: bool) -> Self {
		self.delete_at_exit = delete;
		self
	}

	pub fn flags(mut self, flags: FileProtocolFlags) -> Self {
		self.flags = flags;
		self
	}

	pub fn build(self) -> std::io::Result<NativeFileProtocol> {
		let mut root = PathBuf::from(&self.root);
		if root.as_os_str().is_empty() {
			root = std::env::current_dir()?;
		} else if root.is_relative() {
			root = std::env::current_dir()?.join(root);
		}

		if root.exists() && !root.is_dir() {
			return Err(other_error(format!("root path {} exists but is not a directory", root.display())));
		}
		if !root.exists() {
			let parent = root
				.parent()
				.ok_or_else(|| other_error("root path has no parent directory"))?;
			if !parent.is_dir() {
				return Err(other_error(format!("root path's parent {} is not a directory", parent.display())));
			}
		}

		if self.unique_root {
			let mut rng = rand::thread_rng();
			let mut attempts = 0;
			loop {
				let suffix: u32 = rng.gen_range(1..=999_999);
				let candidate = root.join(format!("{suffix:06}"));
				if !candidate.exists() {
					root = candidate;
					break;
				}
				attempts += 1;
				if attempts >= 100 {
					return Err(other_error("could not find a unique root folder after 100 attempts"));
				}
			}
		}

		fs::create_dir_all(&root)?;

		Ok(NativeFileProtocol {
			flags: self.flags,
			root,
			unique_root: self.unique_root,
			delete_at_exit: self.delete_at_exit,
		})
	}
}

impl Default for NativeFileProtocolBuilder {
	fn default() -> Self {
		Self::new()
	}
}

pub struct NativeFileProtocol {
	flags: FileProtocolFlags,
	root: PathBuf,
	unique_root: bool,
	delete_at_exit: bool,
}

impl NativeFileProtocol {
	pub fn builder() -> NativeFileProtocolBuilder {
		NativeFileProtocolBuilder::new()
	}

	/// Convenience constructor rooted in a fresh, unique folder under the
	/// platform temp directory, deleted when the protocol is dropped.
	pub fn create_temp(prefix: &str) -> std::io::Result<Self> {
		let temp_root = std::env::temp_dir().join(prefix);
		NativeFileProtocolBuilder::new()
			.root(temp_root.to_string_lossy().into_owned())
			.unique_root(true)
			.delete_at_exit(true)
			.build()
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn full_path(&self, path: &str) -> PathBuf {
		self.root.join(path.trim_start_matches('/'))
	}

	fn collect_entries(&self, dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
		let Ok(read_dir) = fs::read_dir(dir) else { return };
		for entry in read_dir.flatten() {
			let entry_path = entry.path();
			let Ok(meta) = fs::symlink_metadata(&entry_path) else { continue };
			if meta.file_type().is_symlink() {
				continue;
			}
			let is_dir = meta.is_dir();
			out.push(entry_path.clone());
			if recursive && is_dir {
				self.collect_entries(&entry_path, recursive, out);
			}
		}
	}

	fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
		fs::create_dir_all(to)?;
		for entry in fs::read_dir(from)? {
			let entry = entry?;
			let file_type = entry.file_type()?;
			if file_type.is_symlink() {
				continue;
			}
			let dest = to.join(entry.file_name());
			if file_type.is_dir() {
				Self::copy_dir_recursive(&entry.path(), &dest)?;
			} else if file_type.is_file() {
				fs::copy(entry.path(), dest)?;
			}
		}
		Ok(())
	}
}

impl Drop for NativeFileProtocol {
	fn drop(&mut self) {
		if !self.delete_at_exit {
			return;
		}
		if self.unique_root {
			let _ = fs::remove_dir_all(&self.root);
			return;
		}
		if let Ok(entries) = fs::read_dir(&self.root) {
			for entry in entries.flatten() {
				let _ = fs::remove_dir_all(entry.path());
			}
		}
	}
}

struct NativeFile {
	file: StdFile,
	position: i64,
}

impl RawFile for NativeFile {
	fn seek_end(&mut self) -> i64 {
		match self.file.seek(SeekFrom::End(0)) {
			Ok(pos) => {
				self.position = pos as i64;
				self.position
			}
			Err(_) => {
				self.position = -1;
				-1
			}
		}
	}

	fn seek_to(&mut self, position: i64) -> i64 {
		match self.file.seek(SeekFrom::Start(position.max(0) as u64)) {
			Ok(pos) => {
				self.position = pos as i64;
				self.position
			}
			Err(_) => {
				self.position = -1;
				-1
			}
		}
	}

	fn read(&mut self, buf: &mut [u8]) -> i64 {
		match self.file.read(buf) {
			Ok(n) => {
				self.position += n as i64;
				n as i64
			}
			Err(_) => {
				self.position = -1;
				-1
			}
		}
	}

	fn write(&mut self, buf: &[u8]) -> i64 {
		match self.file.write(buf) {
			Ok(n) => {
				self.position += n as i64;
				n as i64
			}
			Err(_) => {
				self.position = -1;
				-1
			}
		}
	}
}

impl FileProtocol for NativeFileProtocol {
	fn flags(&self) -> FileProtocolFlags {
		self.flags
	}

	fn default_names(&self) -> Vec<String> {
		vec!["file".to_string()]
	}

	fn path_info(&self, path: &str) -> PathInfo {
		match fs::symlink_metadata(self.full_path(path)) {
			Ok(meta) if meta.is_dir() => PathInfo { kind: PathType::Folder, size: 0 },
			Ok(meta) if meta.is_file() => PathInfo { kind: PathType::File, size: meta.len() as i64 },
			_ => PathInfo::invalid(),
		}
	}

	fn list(&self, path: &str, pattern: &str, mode: FolderMode, types: PathTypeFlags) -> Vec<String> {
		let full_path = self.full_path(path);
		let mut entries = Vec::new();
		self.collect_entries(&full_path, mode == FolderMode::Recursive, &mut entries);
		let mut results = Vec::new();
		for entry in entries {
			let Ok(meta) = fs::symlink_metadata(&entry) else { continue };
			let kind = if meta.is_dir() {
				PathType::Folder
			} else if meta.is_file() {
				PathType::File
			} else {
				continue;
			};
			if !types.is_set(kind) {
				continue;
			}
			let filename = entry.file_name().and_then(|n| n.to_str()).unwrap_or("");
			if !pattern.is_empty() && !path::path_matches_pattern(filename, pattern) {
				continue;
			}
			let Ok(relative) = entry.strip_prefix(&self.root) else { continue };
			let relative_str = relative.to_string_lossy().replace('\\', "/");
			results.push(format!("file:/{relative_str}"));
		}
		results
	}

	fn create_folder(&self, path: &str, mode: FolderMode) -> bool {
		let full_path = self.full_path(path);
		match mode {
			FolderMode::Normal => {
				if full_path.is_dir() {
					return true;
				}
				if full_path.exists() {
					return false;
				}
				fs::create_dir(&full_path).is_ok()
			}
			FolderMode::Recursive => fs::create_dir_all(&full_path).is_ok(),
		}
	}

	fn delete_folder(&self, path: &str, mode: FolderMode) -> bool {
		if path::is_root_path(path, path::LOCAL_PATH_FLAGS) {
			return false;
		}
		let full_path = self.full_path(path);
		if !full_path.is_dir() {
			return !full_path.exists();
		}
		match mode {
			FolderMode::Normal => fs::remove_dir(&full_path).is_ok(),
			FolderMode::Recursive => fs::remove_dir_all(&full_path).is_ok(),
		}
	}

	fn copy_folder(&self, from_path: &str, to_path: &str) -> bool {
		let full_from = self.full_path(from_path);
		if !full_from.is_dir() {
			return false;
		}
		let full_to = self.full_path(to_path);
		if full_to.exists() && !full_to.is_dir() {
			return false;
		}
		Self::copy_dir_recursive(&full_from, &full_to).is_ok()
	}

	fn copy_file(&self, from_path: &str, to_path: &str) -> bool {
		fs::copy(self.full_path(from_path), self.full_path(to_path)).is_ok()
	}

	fn delete_file(&self, path: &str) -> bool {
		let full_path = self.full_path(path);
		match fs::symlink_metadata(&full_path) {
			Err(_) => true,
			Ok(meta) if !meta.is_file() => false,
			Ok(_) => fs::remove_file(&full_path).is_ok(),
		}
	}

	fn open_file(&self, path: &str, flags: FileFlags) -> Option<Box<dyn RawFile>> {
		let full_path = self.full_path(path);
		let file_exists = full_path.is_file();
		if !flags.contains(FileFlags::CREATE) && !file_exists {
			return None;
		}
		let mut options = OpenOptions::new();
		options.read(flags.contains(FileFlags::READ));
		if flags.contains(FileFlags::WRITE) {
			options.write(true);
			if flags.contains(FileFlags::RESET) || !file_exists {
				options.truncate(true);
			}
		}
		if flags.contains(FileFlags::CREATE) {
			options.create(true);
		}
		let file = options.open(&full_path).ok()?;
		Some(Box::new(NativeFile { file, position: 0 }))
	}

	fn basic_list(&self, path: &str) -> Vec<String> {
		self.list(path, "", FolderMode::Normal, ALL_PATH_TYPES)
	}

	fn basic_create_folder(&self, path: &str) -> bool {
		fs::create_dir(self.full_path(path)).is_ok()
	}

	fn basic_delete_folder(&self, path: &str) -> bool {
		fs::remove_dir(self.full_path(path)).is_ok()
	}

	fn basic_delete_file(&self, path: &str) -> bool {
		fs::remove_file(self.full_path(path)).is_ok()
	}

	fn basic_open_file(&self, path: &str, flags: FileFlags) -> Option<Box<dyn RawFile>> {
		self.open_file(path, flags)
	}
}
