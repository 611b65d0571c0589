use thiserror::Error;

/// Errors raised by the storage layer and the text model.
///
/// Corruption-class variants (`TagMismatch`, `ConsistencyFault`,
/// `Corruption`, `DataMismatch`) are fatal: the affected data is never
/// repaired silently.
#[derive(Debug, Error)]
pub enum Error {
	/// The store's backing region is full. Nothing was committed.
	#[error("store capacity exceeded")]
	CapacityExceeded,

	#[error("store still full after {0} growth attempts")]
	GrowthExhausted(usize),

	#[error("tag mismatch at {path}: expected {expected}, found {found}")]
	TagMismatch {
		path: String,
		expected: &'static str,
		found: &'static str,
	},

	#[error("consistency fault at {path}: {detail}")]
	ConsistencyFault { path: String, detail: String },

	#[error("corrupt record: {0}")]
	Corruption(String),

	#[error("sentence {index} differs from the stored one")]
	DataMismatch { index: u64 },

	#[error("no sentences available for generation")]
	EmptyCorpus,

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("store lock poisoned")]
	LockPoisoned,

	#[error("storage error: {0}")]
	Storage(rusqlite::Error),

	#[error("codec error: {0}")]
	Codec(#[from] postcard::Error),

	#[error("config error: {0}")]
	Config(#[from] serde_yaml::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl Error {
	/// True for the fatal data-integrity variants.
	pub fn is_corruption(&self) -> bool {
		matches!(
			self,
			Error::TagMismatch { .. }
				| Error::ConsistencyFault { .. }
				| Error::Corruption(_)
				| Error::DataMismatch { .. }
		)
	}
}

impl From<rusqlite::Error> for Error {
	fn from(err: rusqlite::Error) -> Self {
		match err {
			rusqlite::Error::SqliteFailure(ref failure, _)
				if failure.code == rusqlite::ErrorCode::DiskFull =>
			{
				Error::CapacityExceeded
			}
			other => Error::Storage(other),
		}
	}
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
