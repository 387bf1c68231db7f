use thiserror::Error;

/// The master error type for path, protocol, filesystem, file, and chunk
/// operations.
#[derive(Debug, Error)]
pub enum VfsError {
	#[error("{0}")]
	Custom(String),
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("path normalization violated flag {flag:?}: {path}")]
	PathError { path: String, flag: crate::path::PathFlags },
	#[error("invalid protocol name: {0}")]
	InvalidProtocolName(String),

	#[error("unknown protocol: {0}")]
	UnknownProtocol(String),
	#[error("protocol name already registered: {0}")]
	DuplicateMount(String),
	#[error("no names given when registering protocol")]
	EmptyMountNames,
	#[error("invalid protocol flag combination")]
	InvalidProtocolFlags,
	#[error("no default protocol is set")]
	NoDefaultProtocol,

	#[error("operation requires capability not declared by the mount: {0}")]
	CapabilityError(&'static str),

	#[error("path does not exist: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("chunk format error: {0}")]
	FormatError(String),
	#[error("no chunk reader registered for type {chunk_type:?} version {version}")]
	MissingDecoder { chunk_type: [u8; 4], version: i32 },
	#[error("resource dependency error: {0}")]
	DependencyError(String),

	#[error("file is no longer valid")]
	Invalid,
}

impl VfsError {
	#[inline(always)]
	pub fn custom<T, S: AsRef<str>>(msg: S) -> Result<T, Self> {
		Err(VfsError::Custom(msg.as_ref().to_owned()))
	}

	pub fn not_found<S: Into<String>>(path: S) -> Self {
		VfsError::NotFound(path.into())
	}

	pub fn conflict<S: Into<String>>(msg: S) -> Self {
		VfsError::Conflict(msg.into())
	}

	pub fn format_error<S: Into<String>>(msg: S) -> Self {
		VfsError::FormatError(msg.into())
	}
}

pub type VfsResult<T> = Result<T, VfsError>;
