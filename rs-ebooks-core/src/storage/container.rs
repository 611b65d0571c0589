use serde::Serialize;
use serde::de::DeserializeOwned;

use super::codec::{Path, Record, Segment, Tag, decode_path, encode_path, pack, prefix_successor, unpack};
use super::store::{Cursor, Store};
use crate::error::{Error, Result};

/// Value written into a container slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
	/// Opaque payload, usually produced by `codec::pack`.
	Scalar(Vec<u8>),
	/// Creates an empty nested array at the slot.
	EmptyArray,
	/// Creates an empty nested map at the slot.
	EmptyMap,
	/// Deletes the slot.
	Absent,
}

/// Value read from a container slot.
///
/// Nested containers come back as views bound to the child path: writes
/// through them are visible to later reads of the parent.
#[derive(Clone, Debug)]
pub enum Entry {
	Scalar(Vec<u8>),
	Array(PersistentArray),
	Map(PersistentMap),
}

impl Entry {
	fn tag(&self) -> Tag {
		match self {
			Entry::Scalar(_) => Tag::Scalar,
			Entry::Array(_) => Tag::SubArray,
			Entry::Map(_) => Tag::SubMap,
		}
	}

	/// The nested array, if this entry is one.
	pub fn into_array(self) -> Option<PersistentArray> {
		match self {
			Entry::Array(array) => Some(array),
			_ => None,
		}
	}

	/// The nested map, if this entry is one.
	pub fn into_map(self) -> Option<PersistentMap> {
		match self {
			Entry::Map(map) => Some(map),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
	Array,
	Map,
}

impl Kind {
	fn tag(self) -> Tag {
		match self {
			Kind::Array => Tag::SubArray,
			Kind::Map => Tag::SubMap,
		}
	}

	fn record(self, count: u64) -> Record {
		match self {
			Kind::Array => Record::SubArray(count),
			Kind::Map => Record::SubMap(count),
		}
	}
}

/// Shared machinery of arrays and maps: a store handle plus a path.
///
/// Holds no data of its own. The size record lives at the node's own key,
/// which is also the parent's entry for this node.
#[derive(Clone, Debug)]
struct Node {
	store: Store,
	path: Path,
	kind: Kind,
	key: Vec<u8>,
}

impl Node {
	fn new(store: Store, path: Path, kind: Kind) -> Self {
		let key = encode_path(&path);
		Self { store, path, kind, key }
	}

	fn tag_mismatch(&self, path: &Path, expected: Tag, found: Tag) -> Error {
		Error::TagMismatch { path: path.to_string(), expected: expected.name(), found: found.name() }
	}

	fn fault(&self, detail: impl Into<String>) -> Error {
		Error::ConsistencyFault { path: self.path.to_string(), detail: detail.into() }
	}

	fn check_key(&self, key: &Segment) -> Result<()> {
		match (self.kind, key) {
			(Kind::Array, Segment::Int(_)) | (Kind::Map, Segment::Str(_)) => Ok(()),
			_ => Err(Error::InvalidInput(format!("key {key} does not address a {:?} at {}", self.kind, self.path))),
		}
	}

	fn size(&self) -> Result<u64> {
		match self.store.get(&self.key)? {
			None => Ok(0),
			Some(bytes) => match Record::decode(&bytes)? {
				Record::SubArray(n) if self.kind == Kind::Array => Ok(n),
				Record::SubMap(n) if self.kind == Kind::Map => Ok(n),
				other => Err(self.tag_mismatch(&self.path, self.kind.tag(), other.tag())),
			},
		}
	}

	/// Writes the size record; a zero count removes it and tells the parent
	/// that this entry is gone.
	fn resize(&self, count: u64) -> Result<()> {
		if count > 0 {
			return self.store.put(&self.key, &self.kind.record(count).encode());
		}
		if self.store.delete(&self.key)? {
			if let (Some(parent), Some(key)) = (self.parent()?, self.path.last()) {
				parent.forget(key)?;
			}
		}
		Ok(())
	}

	/// Re-binds the enclosing container from its own record.
	fn parent(&self) -> Result<Option<Node>> {
		let Some(path) = self.path.parent() else {
			return Ok(None);
		};
		let kind = match self.store.get(&encode_path(&path))? {
			Some(bytes) => match Record::decode(&bytes)? {
				Record::SubArray(_) => Kind::Array,
				Record::SubMap(_) => Kind::Map,
				Record::Scalar(_) => return Err(self.tag_mismatch(&path, Tag::SubArray, Tag::Scalar)),
			},
			None => return Err(self.fault("parent container has no size record")),
		};
		Ok(Some(Node::new(self.store.clone(), path, kind)))
	}

	fn child_path(&self, key: &Segment) -> Path {
		self.path.child(key.clone())
	}

	fn raw(&self, key: &Segment) -> Result<Option<Record>> {
		match self.store.get(&encode_path(&self.child_path(key)))? {
			Some(bytes) => Ok(Some(Record::decode(&bytes)?)),
			None => Ok(None),
		}
	}

	fn bind(&self, key: &Segment, record: Record) -> Entry {
		let path = self.child_path(key);
		match record {
			Record::Scalar(bytes) => Entry::Scalar(bytes),
			Record::SubArray(_) => Entry::Array(PersistentArray { node: Node::new(self.store.clone(), path, Kind::Array) }),
			Record::SubMap(_) => Entry::Map(PersistentMap { node: Node::new(self.store.clone(), path, Kind::Map) }),
		}
	}

	fn nested(&self, key: &Segment, record: &Record) -> Option<Node> {
		let kind = match record {
			Record::SubArray(_) => Kind::Array,
			Record::SubMap(_) => Kind::Map,
			Record::Scalar(_) => return None,
		};
		Some(Node::new(self.store.clone(), self.child_path(key), kind))
	}

	fn get(&self, key: &Segment) -> Result<Option<Entry>> {
		self.check_key(key)?;
		Ok(self.raw(key)?.map(|record| self.bind(key, record)))
	}

	fn put(&self, key: &Segment, value: &Value) -> Result<Option<Entry>> {
		self.check_key(key)?;
		let record = match value {
			Value::Absent => {
				self.delete(key)?;
				return Ok(None);
			}
			Value::Scalar(bytes) => Record::Scalar(bytes.clone()),
			Value::EmptyArray => Record::SubArray(0),
			Value::EmptyMap => Record::SubMap(0),
		};

		match self.raw(key)? {
			Some(existing) => {
				// The slot stays occupied, so only the old subtree goes.
				if let Some(child) = self.nested(key, &existing) {
					child.clear_contents()?;
				}
			}
			None => self.note_insert(key)?,
		}
		self.store.put(&encode_path(&self.child_path(key)), &record.encode())?;
		Ok(Some(self.bind(key, record)))
	}

	/// Size bookkeeping for a key that was absent and is about to be written.
	fn note_insert(&self, key: &Segment) -> Result<()> {
		let size = self.size()?;
		match (self.kind, key) {
			(Kind::Array, Segment::Int(index)) => {
				if *index >= size {
					self.resize(index + 1)?;
				}
			}
			_ => self.resize(size + 1)?,
		}
		Ok(())
	}

	fn delete(&self, key: &Segment) -> Result<()> {
		self.check_key(key)?;
		let Some(existing) = self.raw(key)? else {
			return Ok(());
		};
		if let Some(child) = self.nested(key, &existing) {
			child.clear_contents()?;
		}
		self.store.delete(&encode_path(&self.child_path(key)))?;
		self.forget(key)
	}

	/// Size bookkeeping after the record at `key` disappeared.
	///
	/// Arrays never compact: only removing the last index shrinks them, and
	/// then past any trailing holes.
	fn forget(&self, key: &Segment) -> Result<()> {
		let size = self.size()?;
		match (self.kind, key) {
			(Kind::Array, Segment::Int(index)) => {
				if index + 1 != size {
					return Ok(());
				}
				let mut new_size = *index;
				while new_size > 0 && self.raw(&Segment::Int(new_size - 1))?.is_none() {
					new_size -= 1;
				}
				self.resize(new_size)
			}
			_ => {
				if size == 0 {
					return Err(self.fault(format!("removed {key} from a map whose count is already 0")));
				}
				self.resize(size - 1)
			}
		}
	}

	/// Deletes every element (nested containers first) and the size record.
	fn clear(&self) -> Result<()> {
		self.clear_contents()?;
		self.resize(0)
	}

	/// Deletes every element without touching the size record.
	fn clear_contents(&self) -> Result<()> {
		let mut iter = self.iter(false);
		while let Some(item) = iter.next_raw() {
			let (key, record) = item?;
			if let Some(child) = self.nested(&key, &record) {
				child.clear_contents()?;
			}
			self.store.delete(&encode_path(&self.child_path(&key)))?;
		}
		Ok(())
	}

	fn iter(&self, checked: bool) -> Iter {
		Iter {
			node: self.clone(),
			cursor: self.store.cursor_from(&self.key),
			depth: self.path.len() + 1,
			order: Ascending::default(),
			seen: 0,
			checked,
			state: IterState::Cursor,
		}
	}
}

/// Strictly ascending check over the keys and array indices a cursor yields.
#[derive(Debug, Default)]
struct Ascending {
	last_key: Option<Vec<u8>>,
	last_index: Option<u64>,
}

impl Ascending {
	fn key(&mut self, key: &[u8]) -> std::result::Result<(), String> {
		if self.last_key.as_deref().is_some_and(|last| key <= last) {
			return Err("cursor returned keys out of ascending order".to_owned());
		}
		self.last_key = Some(key.to_vec());
		Ok(())
	}

	fn index(&mut self, index: u64) -> std::result::Result<(), String> {
		if self.last_index.is_some_and(|last| index <= last) {
			return Err(format!("cursor index {index} is not ascending"));
		}
		self.last_index = Some(index);
		Ok(())
	}
}

enum IterState {
	Cursor,
	Fallback { next: u64, end: u64 },
	Done,
}

/// Lazy ascending iteration over the direct children of a container.
///
/// Walks a store cursor from the container's own key, skips grandchildren,
/// and stops at the first key outside the container. Once the cursor is
/// exhausted, arrays re-check the indices their size record promises.
struct Iter {
	node: Node,
	cursor: Cursor,
	depth: usize,
	order: Ascending,
	seen: u64,
	checked: bool,
	state: IterState,
}

impl Iter {
	fn fail(&mut self, err: Error) -> Option<Result<(Segment, Record)>> {
		self.state = IterState::Done;
		self.cursor.close();
		Some(Err(err))
	}

	/// Next direct child as a raw record.
	fn next_raw(&mut self) -> Option<Result<(Segment, Record)>> {
		loop {
			match self.state {
				IterState::Done => return None,
				IterState::Fallback { next, end } => {
					if next >= end {
						self.state = IterState::Done;
						continue;
					}
					self.state = IterState::Fallback { next: next + 1, end };
					let key = Segment::Int(next);
					match self.node.raw(&key) {
						Ok(Some(record)) => return Some(Ok((key, record))),
						Ok(None) if next + 1 == end => {
							let err = self.node.fault(format!("size record promises index {next} but it is missing"));
							return self.fail(err);
						}
						// Earlier indices may be legitimate holes.
						Ok(None) => continue,
						Err(e) => return self.fail(e),
					}
				}
				IterState::Cursor => {
					let (key, value) = match self.cursor.next() {
						None => {
							if let Err(e) = self.enter_fallback() {
								return self.fail(e);
							}
							continue;
						}
						Some(Err(e)) => return self.fail(e),
						Some(Ok(pair)) => pair,
					};

					if !key.starts_with(&self.node.key) {
						self.cursor.close();
						continue;
					}
					if key == self.node.key {
						continue;
					}
					if let Err(detail) = self.order.key(&key) {
						let err = self.node.fault(detail);
						return self.fail(err);
					}

					let path = match decode_path(&key) {
						Ok(path) => path,
						Err(e) => return self.fail(e),
					};
					if path.len() > self.depth {
						// A grandchild: jump past the whole subtree of that child.
						match prefix_successor(&encode_path(&path.truncated(self.depth))) {
							Some(next) => self.cursor.seek(next),
							None => self.cursor.close(),
						}
						continue;
					}
					let Some(segment) = path.last().cloned() else {
						continue;
					};

					if let Segment::Int(index) = &segment {
						let index = *index;
						if let Err(detail) = self.order.index(index) {
							let err = self.node.fault(detail);
							return self.fail(err);
						}
					}

					return match Record::decode(&value) {
						Ok(record) => {
							self.seen += 1;
							Some(Ok((segment, record)))
						}
						Err(e) => self.fail(e),
					};
				}
			}
		}
	}

	fn enter_fallback(&mut self) -> Result<()> {
		self.state = IterState::Done;
		if !self.checked {
			return Ok(());
		}
		let size = self.node.size()?;
		match self.node.kind {
			Kind::Array => {
				let next = self.order.last_index.map_or(0, |i| i + 1);
				if next < size {
					self.state = IterState::Fallback { next, end: size };
				}
			}
			Kind::Map => {
				if self.seen < size {
					return Err(self.node.fault(format!("count is {size} but only {} keys exist", self.seen)));
				}
			}
		}
		Ok(())
	}
}

impl Iterator for Iter {
	type Item = Result<(Segment, Entry)>;

	fn next(&mut self) -> Option<Self::Item> {
		let item = self.next_raw()?;
		Some(item.map(|(key, record)| {
			let entry = self.node.bind(&key, record);
			(key, entry)
		}))
	}
}

fn decode_scalar<T: DeserializeOwned>(path: &Path, entry: Entry) -> Result<T> {
	match entry {
		Entry::Scalar(bytes) => unpack(&bytes),
		other => Err(Error::TagMismatch { path: path.to_string(), expected: Tag::Scalar.name(), found: other.tag().name() }),
	}
}

/// Integer-indexed, append-mostly persistent array.
///
/// # Invariants
/// - `size()` is one past the highest present index (0 when empty).
/// - Deleting an index below the last leaves a hole; `get` there is `None`.
#[derive(Clone, Debug)]
pub struct PersistentArray {
	node: Node,
}

impl PersistentArray {
	/// Binds the top-level array `name`, checking any existing size record.
	pub fn open(store: &Store, name: &str) -> Result<Self> {
		let array = Self { node: Node::new(store.clone(), Path::root(name), Kind::Array) };
		array.size()?;
		Ok(array)
	}

	/// Path of this array inside the store.
	pub fn path(&self) -> &Path {
		&self.node.path
	}

	/// One past the highest present index.
	///
	/// # Errors
	/// `Error::ConsistencyFault` when the stored size record is malformed.
	pub fn size(&self) -> Result<u64> {
		self.node.size()
	}

	/// True when no index is present.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.size()? == 0)
	}

	/// Reads the slot at `index`, handing out a handle for nested containers.
	pub fn get(&self, index: u64) -> Result<Option<Entry>> {
		self.node.get(&Segment::Int(index))
	}

	/// Reads a scalar slot; a nested container there is a tag mismatch.
	pub fn get_scalar<T: DeserializeOwned>(&self, index: u64) -> Result<Option<T>> {
		match self.get(index)? {
			Some(entry) => Ok(Some(decode_scalar(&self.node.child_path(&Segment::Int(index)), entry)?)),
			None => Ok(None),
		}
	}

	/// Writes `value` at `index`, replacing whatever was there.
	///
	/// Returns a handle when `value` creates a nested container.
	///
	/// # Errors
	/// `Error::CapacityExceeded` when the write does not fit; the slot is left unchanged.
	pub fn put(&self, index: u64, value: Value) -> Result<Option<Entry>> {
		let key = Segment::Int(index);
		self.node.store.atomically(|| self.node.put(&key, &value))
	}

	/// Packs `value` with postcard and stores it at `index`.
	pub fn put_scalar<T: Serialize + ?Sized>(&self, index: u64, value: &T) -> Result<()> {
		self.put(index, Value::Scalar(pack(value)?))?;
		Ok(())
	}

	/// Removes `index` and everything nested under it.
	///
	/// # Notes
	/// Deleting the last index shrinks `size()` past any trailing holes.
	pub fn delete(&self, index: u64) -> Result<()> {
		let key = Segment::Int(index);
		self.node.store.atomically(|| self.node.delete(&key))
	}

	/// Writes `value` at index `size()`.
	pub fn append(&self, value: Value) -> Result<Option<Entry>> {
		self.node.store.atomically(|| {
			let key = Segment::Int(self.node.size()?);
			self.node.put(&key, &value)
		})
	}

	/// Appends a packed scalar and returns its index.
	pub fn append_scalar<T: Serialize + ?Sized>(&self, value: &T) -> Result<u64> {
		let value = Value::Scalar(pack(value)?);
		self.node.store.atomically(|| {
			let index = self.node.size()?;
			self.node.put(&Segment::Int(index), &value)?;
			Ok(index)
		})
	}

	/// Returns the nested array at `index`, creating it when absent.
	pub fn ensure_array(&self, index: u64) -> Result<PersistentArray> {
		let key = Segment::Int(index);
		self.node.store.atomically(|| ensure_array(&self.node, &key))
	}

	/// Lazily iterates `(index, entry)` pairs in ascending index order.
	pub fn iter(&self) -> impl Iterator<Item = Result<(u64, Entry)>> + use<> {
		self.node.iter(true).map(|item| {
			item.and_then(|(key, entry)| match key {
				Segment::Int(index) => Ok((index, entry)),
				Segment::Str(s) => Err(Error::Corruption(format!("string key {s:?} inside an array"))),
			})
		})
	}

	/// Iterates scalar payloads, decoding each one.
	pub fn scalars<T: DeserializeOwned>(&self) -> impl Iterator<Item = Result<(u64, T)>> + use<T> {
		let path = self.node.path.clone();
		self.iter()
			.map(move |item| item.and_then(|(index, entry)| Ok((index, decode_scalar(&path.child(Segment::Int(index)), entry)?))))
	}

	/// Removes every element and resets the size to 0.
	pub fn clear(&self) -> Result<()> {
		self.node.store.atomically(|| self.node.clear())
	}
}

/// String-keyed persistent map; `size()` counts present keys.
#[derive(Clone, Debug)]
pub struct PersistentMap {
	node: Node,
}

impl PersistentMap {
	/// Binds the top-level map `name`, checking any existing size record.
	pub fn open(store: &Store, name: &str) -> Result<Self> {
		let map = Self { node: Node::new(store.clone(), Path::root(name), Kind::Map) };
		map.size()?;
		Ok(map)
	}

	/// Path of this map inside the store.
	pub fn path(&self) -> &Path {
		&self.node.path
	}

	/// Number of present keys.
	pub fn size(&self) -> Result<u64> {
		self.node.size()
	}

	/// True when the map holds no keys.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.size()? == 0)
	}

	/// Reads the entry under `key`.
	pub fn get(&self, key: &str) -> Result<Option<Entry>> {
		self.node.get(&Segment::from(key))
	}

	/// Reads a scalar under `key`.
	///
	/// # Errors
	/// `Error::TagMismatch` when `key` holds a nested container.
	pub fn get_scalar<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
		match self.get(key)? {
			Some(entry) => Ok(Some(decode_scalar(&self.node.child_path(&Segment::from(key)), entry)?)),
			None => Ok(None),
		}
	}

	/// Writes `value` under `key`; a new key bumps `size()`.
	///
	/// # Errors
	/// `Error::CapacityExceeded` when the write does not fit; the map is left unchanged.
	pub fn put(&self, key: &str, value: Value) -> Result<Option<Entry>> {
		let key = Segment::from(key);
		self.node.store.atomically(|| self.node.put(&key, &value))
	}

	/// Packs `value` with postcard and stores it under `key`.
	pub fn put_scalar<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
		self.put(key, Value::Scalar(pack(value)?))?;
		Ok(())
	}

	/// Removes `key` and anything nested under it. Missing keys are ignored.
	pub fn delete(&self, key: &str) -> Result<()> {
		let key = Segment::from(key);
		self.node.store.atomically(|| self.node.delete(&key))
	}

	/// Returns the nested array under `key`, creating it when absent.
	pub fn ensure_array(&self, key: &str) -> Result<PersistentArray> {
		let key = Segment::from(key);
		self.node.store.atomically(|| ensure_array(&self.node, &key))
	}

	/// Lazily iterates `(key, entry)` pairs in ascending key order.
	pub fn iter(&self) -> impl Iterator<Item = Result<(String, Entry)>> + use<> {
		self.node.iter(true).map(|item| {
			item.and_then(|(key, entry)| match key {
				Segment::Str(s) => Ok((s, entry)),
				Segment::Int(i) => Err(Error::Corruption(format!("integer key {i} inside a map"))),
			})
		})
	}

	/// Removes every key.
	pub fn clear(&self) -> Result<()> {
		self.node.store.atomically(|| self.node.clear())
	}
}

fn ensure_array(node: &Node, key: &Segment) -> Result<PersistentArray> {
	match node.get(key)? {
		Some(Entry::Array(array)) => Ok(array),
		Some(other) => Err(node.tag_mismatch(&node.child_path(key), Tag::SubArray, other.tag())),
		None => match node.put(key, &Value::EmptyArray)? {
			Some(Entry::Array(array)) => Ok(array),
			_ => Err(node.fault(format!("failed to create array at {key}"))),
		},
	}
}
