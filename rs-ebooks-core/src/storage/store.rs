use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
	key BLOB PRIMARY KEY NOT NULL,
	value BLOB NOT NULL
) WITHOUT ROWID;";

/// Handle to an embedded, ordered, transactional byte store.
///
/// Backed by a single SQLite table whose BLOB primary key gives the ordered
/// cursor. The capacity of the region is enforced through SQLite's page
/// limit; exceeding it yields `Error::CapacityExceeded` and commits nothing.
///
/// # Concurrency
/// - All calls are synchronous and serialized on one connection.
/// - While a thread owns a transaction, calls from other threads wait until
///   it commits or rolls back, so they never observe partial writes.
/// - `grow` takes the same exclusive path.
///
/// Cloning is cheap: clones share the same connection.
#[derive(Clone)]
pub struct Store {
	inner: Arc<Inner>,
}

struct Inner {
	engine: Mutex<Engine>,
	/// Thread currently owning a transaction.
	writer: Mutex<Option<ThreadId>>,
	released: Condvar,
	config: StoreConfig,
	location: String,
}

struct Engine {
	conn: Connection,
	page_size: u64,
	capacity: u64,
}

impl std::fmt::Debug for Store {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Store").field("location", &self.inner.location).finish()
	}
}

/// Rounds `bytes` up to the next multiple of `alignment`.
pub fn align_up(bytes: u64, alignment: u64) -> u64 {
	bytes.div_ceil(alignment).saturating_mul(alignment)
}

/// Capacity after one growth step: `capacity * factor`, aligned, and always
/// at least one alignment unit larger than before.
pub fn grown_capacity(capacity: u64, factor: f64, alignment: u64) -> u64 {
	let scaled = (capacity as f64 * factor).ceil() as u64;
	align_up(scaled, alignment).max(capacity.saturating_add(alignment))
}

impl Store {
	/// Opens (or creates) a store backed by the file at `path`.
	pub fn open<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
		config.validate()?;
		let path = path.as_ref();
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let conn = Connection::open(path)?;
		Self::init(conn, config, path.display().to_string())
	}

	/// Opens a private, non-persistent store. Mostly useful for tests.
	pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
		config.validate()?;
		let conn = Connection::open_in_memory()?;
		Self::init(conn, config, ":memory:".to_owned())
	}

	fn init(conn: Connection, config: StoreConfig, location: String) -> Result<Self> {
		conn.execute_batch(SCHEMA)?;
		let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
		let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
		let page_size = page_size.max(1) as u64;
		let used = page_count.max(0) as u64 * page_size;

		let capacity = align_up(config.initial_capacity.max(used), config.alignment);
		let mut engine = Engine { conn, page_size, capacity };
		engine.apply_capacity()?;
		debug!("Opened store {location} with capacity {} bytes", engine.capacity);

		Ok(Self {
			inner: Arc::new(Inner {
				engine: Mutex::new(engine),
				writer: Mutex::new(None),
				released: Condvar::new(),
				config,
				location,
			}),
		})
	}

	/// Settings the store was opened with.
	pub fn config(&self) -> &StoreConfig {
		&self.inner.config
	}

	/// Human-readable location (file path or `:memory:`).
	pub fn location(&self) -> &str {
		&self.inner.location
	}

	/// Runs `f` on the engine once no other thread owns a transaction.
	fn with_engine<T>(&self, f: impl FnOnce(&mut Engine) -> Result<T>) -> Result<T> {
		let me = thread::current().id();
		let mut owner = self.inner.writer.lock().map_err(|_| Error::LockPoisoned)?;
		while matches!(*owner, Some(id) if id != me) {
			owner = self.inner.released.wait(owner).map_err(|_| Error::LockPoisoned)?;
		}
		let mut engine = self.inner.engine.lock().map_err(|_| Error::LockPoisoned)?;
		let result = f(&mut engine);
		drop(engine);
		drop(owner);
		result
	}

	/// Reads the value stored under `key`.
	///
	/// # Errors
	/// Fails when the engine reports an error or a lock is poisoned.
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
		self.with_engine(|engine| {
			let mut stmt = engine.conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
			Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
		})
	}

	/// Inserts or overwrites the record under `key`.
	///
	/// # Errors
	/// `Error::CapacityExceeded` once the page budget is spent; engine errors otherwise.
	///
	/// # Notes
	/// Outside a transaction the write commits on its own.
	pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
		self.with_engine(|engine| {
			let mut stmt = engine.conn.prepare_cached(
				"INSERT INTO kv (key, value) VALUES (?1, ?2)
				 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
			)?;
			stmt.execute(params![key, value])?;
			Ok(())
		})
	}

	/// Removes `key`. Returns whether it was present.
	pub fn delete(&self, key: &[u8]) -> Result<bool> {
		self.with_engine(|engine| {
			let mut stmt = engine.conn.prepare_cached("DELETE FROM kv WHERE key = ?1")?;
			Ok(stmt.execute(params![key])? > 0)
		})
	}

	/// Ascending stream of records whose key is `>= key`.
	pub fn cursor_from(&self, key: &[u8]) -> Cursor {
		Cursor {
			store: self.clone(),
			from: key.to_vec(),
			inclusive: true,
			buffer: VecDeque::new(),
			exhausted: false,
		}
	}

	fn fetch(&self, from: &[u8], inclusive: bool, limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
		let sql = if inclusive {
			"SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key LIMIT ?2"
		} else {
			"SELECT key, value FROM kv WHERE key > ?1 ORDER BY key LIMIT ?2"
		};
		self.with_engine(|engine| {
			let mut stmt = engine.conn.prepare_cached(sql)?;
			let rows = stmt.query_map(params![from, limit as i64], |row| {
				Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
			})?;
			let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(limit);
			for row in rows {
				out.push(row?);
			}
			Ok(out)
		})
	}

	/// True if the calling thread currently owns a transaction.
	pub fn in_transaction(&self) -> Result<bool> {
		let owner = self.inner.writer.lock().map_err(|_| Error::LockPoisoned)?;
		Ok(*owner == Some(thread::current().id()))
	}

	/// Runs `f` atomically.
	///
	/// Every write made through this store by `f` commits together, or not at
	/// all when `f` returns an error or panics. Calling `transaction` again
	/// from inside `f` joins the outer transaction.
	pub fn transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
		if self.in_transaction()? {
			return f();
		}

		let guard = self.begin()?;
		match f() {
			Ok(value) => {
				guard.commit()?;
				Ok(value)
			}
			Err(err) => {
				guard.rollback();
				Err(err)
			}
		}
	}

	fn begin(&self) -> Result<TxnGuard<'_>> {
		let me = thread::current().id();
		let mut owner = self.inner.writer.lock().map_err(|_| Error::LockPoisoned)?;
		while owner.is_some() {
			owner = self.inner.released.wait(owner).map_err(|_| Error::LockPoisoned)?;
		}
		{
			let engine = self.inner.engine.lock().map_err(|_| Error::LockPoisoned)?;
			engine.conn.execute_batch("BEGIN IMMEDIATE")?;
		}
		*owner = Some(me);
		Ok(TxnGuard { store: self, finished: false })
	}

	/// Releases the transaction, committing or rolling back.
	fn finish(&self, commit: bool) -> Result<()> {
		let mut owner = self.inner.writer.lock().map_err(|_| Error::LockPoisoned)?;
		let result = match self.inner.engine.lock() {
			Ok(engine) => {
				let outcome = if commit { engine.conn.execute_batch("COMMIT").map_err(Error::from) } else { Ok(()) };
				if (outcome.is_err() || !commit) && !engine.conn.is_autocommit() {
					if let Err(e) = engine.conn.execute_batch("ROLLBACK") {
						warn!("Rollback failed on {}: {e}", self.inner.location);
					}
				}
				outcome
			}
			Err(_) => Err(Error::LockPoisoned),
		};
		*owner = None;
		self.inner.released.notify_all();
		result
	}

	/// Current capacity in bytes.
	pub fn capacity(&self) -> Result<u64> {
		self.with_engine(|engine| Ok(engine.capacity))
	}

	/// Grows the capacity by `factor`, rounded up to the configured alignment.
	///
	/// Returns the new capacity.
	pub fn grow(&self, factor: f64) -> Result<u64> {
		if !(factor > 1.0) || !factor.is_finite() {
			return Err(Error::InvalidInput(format!("growth factor must be above 1.0, got {factor}")));
		}
		let alignment = self.inner.config.alignment;
		self.with_engine(|engine| {
			let previous = engine.capacity;
			engine.capacity = grown_capacity(previous, factor, alignment);
			engine.apply_capacity()?;
			info!("Grew store {} from {previous} to {} bytes", self.inner.location, engine.capacity);
			Ok(engine.capacity)
		})
	}

	/// `with_growth_retry` around `transaction`.
	pub fn atomically<T>(&self, mut f: impl FnMut() -> Result<T>) -> Result<T> {
		with_growth_retry(self, || self.transaction(&mut f))
	}
}

impl Engine {
	fn apply_capacity(&mut self) -> Result<()> {
		let pages = (self.capacity / self.page_size).max(1);
		// PRAGMA arguments cannot be bound; `pages` is an integer.
		let applied: i64 = self
			.conn
			.query_row(&format!("PRAGMA max_page_count = {pages}"), [], |row| row.get(0))?;
		self.capacity = applied.max(0) as u64 * self.page_size;
		Ok(())
	}
}

/// Rolls back on drop unless committed.
struct TxnGuard<'a> {
	store: &'a Store,
	finished: bool,
}

impl TxnGuard<'_> {
	fn commit(mut self) -> Result<()> {
		self.finished = true;
		self.store.finish(true)
	}

	fn rollback(mut self) {
		self.finished = true;
		if let Err(e) = self.store.finish(false) {
			warn!("Failed to release transaction on {}: {e}", self.store.inner.location);
		}
	}
}

impl Drop for TxnGuard<'_> {
	fn drop(&mut self) {
		if !self.finished {
			warn!("Transaction on {} abandoned, rolling back", self.store.inner.location);
			let _ = self.store.finish(false);
		}
	}
}

/// Runs `f`, growing the store and retrying whenever it reports
/// `CapacityExceeded`.
///
/// Bounded by `StoreConfig::max_grow_retries`. Inside a transaction owned by
/// the caller nothing is retried: the error propagates to the outermost
/// wrapper, which is the only place where a retry is sound.
pub fn with_growth_retry<T>(store: &Store, mut f: impl FnMut() -> Result<T>) -> Result<T> {
	if store.in_transaction()? {
		return f();
	}

	let config = *store.config();
	let mut attempts = 0;
	loop {
		match f() {
			Err(Error::CapacityExceeded) if attempts < config.max_grow_retries => {
				attempts += 1;
				store.grow(config.growth_factor)?;
			}
			Err(Error::CapacityExceeded) => return Err(Error::GrowthExhausted(attempts)),
			other => return other,
		}
	}
}

/// Lazy ascending cursor over a store.
///
/// Records are fetched in batches of `StoreConfig::cursor_batch`; no lock is
/// held between batches.
pub struct Cursor {
	store: Store,
	from: Vec<u8>,
	inclusive: bool,
	buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
	exhausted: bool,
}

impl Cursor {
	/// Repositions the cursor at the first key `>= key`.
	pub fn seek(&mut self, key: Vec<u8>) {
		self.from = key;
		self.inclusive = true;
		self.buffer.clear();
		self.exhausted = false;
	}

	/// Stops the cursor; subsequent calls to `next` yield `None`.
	pub fn close(&mut self) {
		self.buffer.clear();
		self.exhausted = true;
	}

	fn fill(&mut self) -> Result<()> {
		let limit = self.store.config().cursor_batch;
		let rows = self.store.fetch(&self.from, self.inclusive, limit)?;
		if rows.len() < limit {
			self.exhausted = true;
		}
		if let Some((last, _)) = rows.last() {
			self.from = last.clone();
			self.inclusive = false;
		}
		self.buffer.extend(rows);
		Ok(())
	}
}

impl Iterator for Cursor {
	type Item = Result<(Vec<u8>, Vec<u8>)>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.buffer.is_empty() && !self.exhausted {
			if let Err(e) = self.fill() {
				self.close();
				return Some(Err(e));
			}
		}
		self.buffer.pop_front().map(Ok)
	}
}
