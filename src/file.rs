//! A buffered, typed façade over an open [`RawFile`](crate::protocol::RawFile)
//! handle, as returned by [`crate::filesystem::FileSystem::open_file`].
//!
//! Once any operation on the underlying raw file reports an error, the
//! file becomes permanently invalid (`position` goes negative) and all
//! further reads/writes are no-ops. A new handle must be opened to
//! continue.

use bytemuck::{Pod, Zeroable};

use crate::protocol::{FileFlags, RawFile};

/// Size of the lookahead buffer used by the line-reading state machine.
/// Exposed for tests only; not meaningful for general use.
pub const LINE_BUFFER_SIZE: usize = 256;

struct ReadLineState {
	buffer: Vec<u8>,
	pos: usize,
}

impl ReadLineState {
	fn new() -> Self {
		ReadLineState { buffer: Vec::new(), pos: 0 }
	}
}

pub struct File {
	file: Box<dyn RawFile>,
	flags: FileFlags,
	position: i64,
}

impl File {
	pub(crate) fn new(file: Box<dyn RawFile>, flags: FileFlags) -> Self {
		File { file, flags, position: 0 }
	}

	pub fn flags(&self) -> FileFlags {
		self.flags
	}

	/// False once any operation has failed; a new handle must be opened to
	/// recover.
	pub fn is_valid(&self) -> bool {
		self.position >= 0
	}

	pub fn position(&self) -> i64 {
		self.position
	}

	pub fn seek_begin(&mut self) -> i64 {
		self.seek_to(0)
	}

	pub fn seek_end(&mut self) -> i64 {
		self.position = self.file.seek_end();
		self.position
	}

	pub fn seek_to(&mut self, position: i64) -> i64 {
		self.position = self.file.seek_to(position);
		self.position
	}

	pub fn seek_by(&mut self, delta: i64) -> i64 {
		self.seek_to(self.position + delta)
	}

	fn do_write(&mut self, buffer: &[u8]) -> i64 {
		if self.position < 0 || !self.flags.contains(FileFlags::WRITE) {
			return 0;
		}
		let actual = self.file.write(buffer);
		self.position += actual;
		actual
	}

	fn do_read(&mut self, buffer: &mut [u8]) -> i64 {
		if self.position < 0 || !self.flags.contains(FileFlags::READ) {
			return 0;
		}
		let actual = self.file.read(buffer);
		self.position += actual;
		actual
	}

	pub fn read(&mut self, buffer: &mut [u8]) -> i64 {
		self.do_read(buffer)
	}

	pub fn write(&mut self, buffer: &[u8]) -> i64 {
		self.do_write(buffer)
	}

	fn calculate_remaining(&mut self) -> i64 {
		if self.position < 0 {
			return -1;
		}
		let end = self.file.seek_end();
		if end < 0 || self.file.seek_to(self.position) < 0 {
			self.position = -1;
			return -1;
		}
		end - self.position
	}

	/// Reads up to `count` values of `T`, resizing `buffer` to the number
	/// actually read. Returns that count.
	pub fn read_typed<T: Pod>(&mut self, buffer: &mut Vec<T>, count: usize) -> i64 {
		buffer.resize(count, T::zeroed());
		let type_size = std::mem::size_of::<T>() as i64;
		let bytes = bytemuck::cast_slice_mut(buffer.as_mut_slice());
		let read_bytes = self.do_read(bytes);
		let actual_count = (read_bytes.max(0) / type_size.max(1)) as usize;
		buffer.truncate(actual_count);
		buffer.len() as i64
	}

	pub fn read_typed_count<T: Pod>(&mut self, count: usize) -> Vec<T> {
		let mut buffer = Vec::new();
		self.read_typed(&mut buffer, count);
		buffer
	}

	/// Reads all remaining whole values of `T`. If a partial value trails
	/// the file, it is left unread and the position does not reach EOF.
	pub fn read_remaining_typed<T: Pod>(&mut self) -> Vec<T> {
		if !self.flags.contains(FileFlags::READ) {
			return Vec::new();
		}
		let remaining = self.calculate_remaining();
		if remaining < 0 {
			return Vec::new();
		}
		let type_size = std::mem::size_of::<T>() as i64;
		let count = remaining / type_size;
		if count == 0 {
			return Vec::new();
		}
		let mut buffer = vec![T::zeroed(); count as usize];
		let bytes = bytemuck::cast_slice_mut(buffer.as_mut_slice());
		let bytes_read = self.do_read(bytes);
		let actual_count = (bytes_read.max(0) / type_size) as usize;
		buffer.truncate(actual_count);
		buffer
	}

	/// Writes `buffer` as raw `T` values. Returns the number of whole
	/// values actually written.
	pub fn write_typed<T: Pod>(&mut self, buffer: &[T]) -> i64 {
		let type_size = std::mem::size_of::<T>() as i64;
		if type_size == 0 {
			return 0;
		}
		let bytes = bytemuck::cast_slice(buffer);
		self.do_write(bytes) / type_size
	}

	/// Reads up to `count` raw bytes as a (possibly lossily-converted)
	/// string.
	pub fn read_string(&mut self, count: usize) -> String {
		let mut buffer = vec![0u8; count];
		let read_bytes = self.do_read(&mut buffer);
		buffer.truncate(read_bytes.max(0) as usize);
		String::from_utf8_lossy(&buffer).into_owned()
	}

	fn read_remaining_bytes(&mut self) -> Vec<u8> {
		if !self.flags.contains(FileFlags::READ) {
			return Vec::new();
		}
		let remaining = self.calculate_remaining();
		if remaining < 0 {
			return Vec::new();
		}
		let mut buffer = vec![0u8; remaining as usize];
		if remaining == 0 {
			return buffer;
		}
		let bytes_read = self.do_read(&mut buffer);
		buffer.truncate(bytes_read.max(0) as usize);
		buffer
	}

	/// Reads the remainder of the file as raw bytes (not line-ending
	/// aware), lossily converted to UTF-8.
	pub fn read_remaining_string(&mut self) -> String {
		String::from_utf8_lossy(&self.read_remaining_bytes()).into_owned()
	}

	/// Writes `text` as raw bytes. Returns the number of bytes written.
	pub fn write_string(&mut self, text: &str) -> i64 {
		self.do_write(text.as_bytes())
	}

	fn do_read_line(&mut self, state: &mut ReadLineState, line: &mut Vec<u8>) -> bool {
		line.clear();
		let mut skip_linefeed = false;
		loop {
			if state.pos >= state.buffer.len() {
				state.buffer.resize(LINE_BUFFER_SIZE, 0);
				let read_bytes = self.do_read(&mut state.buffer);
				if read_bytes > 0 && skip_linefeed && state.buffer[0] == b'\n' {
					state.pos = 1;
				} else {
					state.pos = 0;
				}
				state.buffer.truncate(read_bytes.max(0) as usize);
				if skip_linefeed {
					return true;
				}
				if state.pos == state.buffer.len() {
					return !line.is_empty();
				}
				skip_linefeed = false;
			}

			let rel = state.buffer[state.pos..].iter().position(|&b| b == b'\r' || b == b'\n');
			let Some(rel) = rel else {
				line.extend_from_slice(&state.buffer[state.pos..]);
				state.pos = state.buffer.len();
				continue;
			};
			let mut sep_pos = state.pos + rel;
			line.extend_from_slice(&state.buffer[state.pos..sep_pos]);
			if state.buffer[sep_pos] == b'\r' {
				if state.buffer.len() == sep_pos + 1 {
					skip_linefeed = true;
				} else if state.buffer[sep_pos + 1] == b'\n' {
					sep_pos += 1;
				}
			}
			state.pos = sep_pos + 1;
			if !skip_linefeed {
				break;
			}
		}
		true
	}

	/// Reads a single line (terminated by `\r`, `\n`, `\r\n`, or EOF, with
	/// no terminator included). Returns `None` if no line could be read
	/// (almost always end-of-file).
	pub fn read_line(&mut self) -> Option<String> {
		let mut state = ReadLineState::new();
		let mut line = Vec::new();
		if !self.do_read_line(&mut state, &mut line) {
			return None;
		}
		if state.pos < state.buffer.len() {
			self.seek_by(-((state.buffer.len() - state.pos) as i64));
		}
		Some(String::from_utf8_lossy(&line).into_owned())
	}

	/// Reads up to `count` lines.
	pub fn read_lines(&mut self, count: usize) -> Vec<String> {
		let mut lines = Vec::with_capacity(count);
		let mut state = ReadLineState::new();
		for _ in 0..count {
			let mut line = Vec::new();
			if !self.do_read_line(&mut state, &mut line) {
				break;
			}
			lines.push(String::from_utf8_lossy(&line).into_owned());
		}
		if state.pos < state.buffer.len() {
			self.seek_by(-((state.buffer.len() - state.pos) as i64));
		}
		lines
	}

	/// Reads all remaining lines.
	pub fn read_remaining_lines(&mut self) -> Vec<String> {
		let text = self.read_remaining_string();
		if text.is_empty() {
			return Vec::new();
		}
		let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
		let mut lines: Vec<String> = normalized.split('\n').map(str::to_string).collect();
		if normalized.ends_with('\n') {
			lines.pop();
		}
		lines
	}

	/// Writes `line` followed by `line_end`. Returns false (possibly after
	/// a partial write) if either part couldn't be written in full.
	pub fn write_line(&mut self, line: &str, line_end: &str) -> bool {
		if self.position < 0 {
			return false;
		}
		let line_bytes = line.as_bytes();
		if !line_bytes.is_empty() && self.do_write(line_bytes) < line_bytes.len() as i64 {
			return false;
		}
		let end_bytes = line_end.as_bytes();
		if !end_bytes.is_empty() && self.do_write(end_bytes) < end_bytes.len() as i64 {
			return false;
		}
		true
	}

	/// Writes each line in turn, stopping at the first failure. Returns
	/// the number of lines fully written.
	pub fn write_lines<'a, I: IntoIterator<Item = &'a str>>(&mut self, lines: I, line_end: &str) -> i64 {
		let mut count = 0i64;
		for line in lines {
			if !self.write_line(line, line_end) {
				break;
			}
			count += 1;
		}
		count
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::protocol::memory::MemoryFileProtocol;
	use crate::protocol::FileProtocol;

	fn open(contents: &[u8]) -> File {
		let proto = MemoryFileProtocol::default();
		let mut file = proto.open_file("/t", FileFlags::CREATE | FileFlags::WRITE).unwrap();
		file.write(contents);
		drop(file);
		let raw = proto.open_file("/t", FileFlags::READ | FileFlags::WRITE).unwrap();
		File::new(raw, FileFlags::READ | FileFlags::WRITE)
	}

	#[test]
	fn read_lines_handles_mixed_endings() {
		let mut file = open(b"one\r\ntwo\nthree\rfour");
		assert_eq!(file.read_line().unwrap(), "one");
		assert_eq!(file.read_line().unwrap(), "two");
		assert_eq!(file.read_line().unwrap(), "three");
		assert_eq!(file.read_line().unwrap(), "four");
		assert!(file.read_line().is_none());
	}

	#[test]
	fn read_remaining_lines_drops_trailing_blank() {
		let mut file = open(b"a\nb\nc\n");
		assert_eq!(file.read_remaining_lines(), vec!["a", "b", "c"]);
	}

	#[test]
	fn read_remaining_typed_only_reads_whole_values() {
		let mut file = open(&[1u8, 2, 3, 4, 5, 6, 7]);
		let values: Vec<u16> = file.read_remaining_typed();
		assert_eq!(values.len(), 3);
		assert_eq!(file.position(), 6);
	}

	#[test]
	fn write_line_then_read_back() {
		let proto = MemoryFileProtocol::default();
		let raw = proto.open_file("/lines.txt", FileFlags::CREATE | FileFlags::WRITE).unwrap();
		let mut file = File::new(raw, FileFlags::CREATE | FileFlags::WRITE);
		assert_eq!(file.write_lines(["alpha", "beta"], "\n"), 2);
		drop(file);
		let raw = proto.open_file("/lines.txt", FileFlags::READ).unwrap();
		let mut file = File::new(raw, FileFlags::READ);
		assert_eq!(file.read_lines(2), vec!["alpha", "beta"]);
	}

	#[test]
	fn invalid_file_stops_further_io() {
		let proto = MemoryFileProtocol::default();
		let raw = proto.open_file("/gone.txt", FileFlags::CREATE | FileFlags::WRITE).unwrap();
		let mut file = File::new(raw, FileFlags::READ | FileFlags::WRITE);
		assert!(proto.delete_file("/gone.txt"));
		assert_eq!(file.seek_end(), -1);
		assert!(!file.is_valid());
		assert_eq!(file.write(b"x"), 0);
	}
}
