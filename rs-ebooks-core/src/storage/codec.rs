use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

const INT_TAG: u8 = 0x01;
const STR_TAG: u8 = 0x02;
const STR_END: u8 = 0x00;
const STR_ESCAPE: u8 = 0x01;

/// One component of a container path.
///
/// The derived ordering (integers before strings, integers numerically,
/// strings byte-wise) is exactly the ordering of the encoded bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
	Int(u64),
	Str(String),
}

impl From<u64> for Segment {
	fn from(value: u64) -> Self {
		Segment::Int(value)
	}
}

impl From<&str> for Segment {
	fn from(value: &str) -> Self {
		Segment::Str(value.to_owned())
	}
}

impl fmt::Display for Segment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Segment::Int(i) => write!(f, "{i}"),
			Segment::Str(s) => write!(f, "{s:?}"),
		}
	}
}

/// Address of a node in the container tree.
///
/// Top-level containers live at a single named segment; everything below
/// them is addressed by appending keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<Segment>);

impl Path {
	/// Path of a top-level container.
	pub fn root(name: &str) -> Self {
		Path(vec![Segment::Str(name.to_owned())])
	}

	/// Path made of `segments`, outermost first.
	pub fn from_segments(segments: Vec<Segment>) -> Self {
		Path(segments)
	}

	/// Path one level below `self`, ending in `key`.
	pub fn child(&self, key: Segment) -> Self {
		let mut segments = self.0.clone();
		segments.push(key);
		Path(segments)
	}

	/// Path of the enclosing container, `None` for top-level paths.
	pub fn parent(&self) -> Option<Path> {
		if self.0.len() <= 1 {
			return None;
		}
		Some(Path(self.0[..self.0.len() - 1].to_vec()))
	}

	/// Final segment, the key of this path inside its parent.
	pub fn last(&self) -> Option<&Segment> {
		self.0.last()
	}

	/// Depth of the path.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// True for the degenerate path with no segments.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Segments, outermost first.
	pub fn segments(&self) -> &[Segment] {
		&self.0
	}

	/// Truncated copy holding the first `len` segments.
	pub fn truncated(&self, len: usize) -> Path {
		Path(self.0[..len.min(self.0.len())].to_vec())
	}
}

impl fmt::Display for Path {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for segment in &self.0 {
			if !first {
				f.write_str("/")?;
			}
			first = false;
			match segment {
				Segment::Int(i) => write!(f, "{i}")?,
				Segment::Str(s) => f.write_str(s)?,
			}
		}
		Ok(())
	}
}

/// Encodes a path so that byte order matches path order.
///
/// - integers: `0x01` followed by 8 big-endian bytes
/// - strings: `0x02`, the bytes with `0x00` written as `0x01 0x01` and `0x01`
///   as `0x01 0x02`, then `0x00`
///
/// `0x00` only ever terminates a string, so no encoded path is a byte prefix
/// of another path unless it is one of its ancestors.
pub fn encode_path(path: &Path) -> Vec<u8> {
	let mut out = Vec::with_capacity(path.len() * 9);
	for segment in path.segments() {
		match segment {
			Segment::Int(i) => {
				out.push(INT_TAG);
				out.extend_from_slice(&i.to_be_bytes());
			}
			Segment::Str(s) => {
				out.push(STR_TAG);
				for &b in s.as_bytes() {
					if b <= STR_ESCAPE {
						out.push(STR_ESCAPE);
						out.push(b + 1);
					} else {
						out.push(b);
					}
				}
				out.push(STR_END);
			}
		}
	}
	out
}

/// Inverse of `encode_path`.
pub fn decode_path(bytes: &[u8]) -> Result<Path> {
	let mut segments = Vec::new();
	let mut i = 0;
	while i < bytes.len() {
		match bytes[i] {
			INT_TAG => {
				let raw = bytes
					.get(i + 1..i + 9)
					.ok_or_else(|| Error::Corruption(format!("truncated integer segment at byte {i}")))?;
				let mut buf = [0u8; 8];
				buf.copy_from_slice(raw);
				segments.push(Segment::Int(u64::from_be_bytes(buf)));
				i += 9;
			}
			STR_TAG => {
				i += 1;
				let mut raw = Vec::new();
				loop {
					let b = *bytes
						.get(i)
						.ok_or_else(|| Error::Corruption("unterminated string segment".to_owned()))?;
					i += 1;
					match b {
						STR_END => break,
						STR_ESCAPE => {
							let escaped = match bytes.get(i) {
								Some(&e) if e == STR_END + 1 || e == STR_ESCAPE + 1 => e - 1,
								_ => return Err(Error::Corruption(format!("bad escape in string segment at byte {i}"))),
							};
							raw.push(escaped);
							i += 1;
						}
						_ => raw.push(b),
					}
				}
				let s = String::from_utf8(raw)
					.map_err(|e| Error::Corruption(format!("string segment is not UTF-8: {e}")))?;
				segments.push(Segment::Str(s));
			}
			tag => return Err(Error::Corruption(format!("unknown segment tag {tag:#04x} at byte {i}"))),
		}
	}
	Ok(Path(segments))
}

/// Smallest byte string that sorts after every string starting with `prefix`.
///
/// Returns `None` when no such string exists (empty or all `0xFF`).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
	let mut out = prefix.to_vec();
	while let Some(last) = out.pop() {
		if last != 0xFF {
			out.push(last + 1);
			return Some(out);
		}
	}
	None
}

/// Kind of a stored record, used for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
	SubArray = 1,
	SubMap = 2,
	Scalar = 3,
}

impl Tag {
	/// Lowercase name used in error messages.
	pub fn name(self) -> &'static str {
		match self {
			Tag::SubArray => "array",
			Tag::SubMap => "map",
			Tag::Scalar => "scalar",
		}
	}
}

/// A stored value.
///
/// Container markers double as the size record of the container they
/// introduce: the record at a container's own path holds its count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
	SubArray(u64),
	SubMap(u64),
	Scalar(Vec<u8>),
}

impl Record {
	/// Tag byte this value is stored under.
	pub fn tag(&self) -> Tag {
		match self {
			Record::SubArray(_) => Tag::SubArray,
			Record::SubMap(_) => Tag::SubMap,
			Record::Scalar(_) => Tag::Scalar,
		}
	}

	/// Stored form: the tag byte followed by a big-endian count or the raw payload.
	pub fn encode(&self) -> Vec<u8> {
		match self {
			Record::SubArray(count) | Record::SubMap(count) => {
				let mut out = Vec::with_capacity(9);
				out.push(self.tag() as u8);
				out.extend_from_slice(&count.to_be_bytes());
				out
			}
			Record::Scalar(payload) => {
				let mut out = Vec::with_capacity(payload.len() + 1);
				out.push(Tag::Scalar as u8);
				out.extend_from_slice(payload);
				out
			}
		}
	}

	/// Parses a stored value.
	///
	/// # Errors
	/// `Error::Corruption` on an unknown tag or a marker whose count is not 8 bytes.
	pub fn decode(bytes: &[u8]) -> Result<Self> {
		let (&tag, rest) = bytes
			.split_first()
			.ok_or_else(|| Error::Corruption("empty record".to_owned()))?;

		let count = || -> Result<u64> {
			let raw: [u8; 8] = rest
				.try_into()
				.map_err(|_| Error::Corruption(format!("container marker has {} payload bytes", rest.len())))?;
			Ok(u64::from_be_bytes(raw))
		};

		match tag {
			t if t == Tag::SubArray as u8 => Ok(Record::SubArray(count()?)),
			t if t == Tag::SubMap as u8 => Ok(Record::SubMap(count()?)),
			t if t == Tag::Scalar as u8 => Ok(Record::Scalar(rest.to_vec())),
			other => Err(Error::Corruption(format!("unknown record tag {other}"))),
		}
	}
}

/// Packs a scalar payload.
pub fn pack<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
	Ok(postcard::to_stdvec(value)?)
}

/// Unpacks a scalar payload written by `pack`.
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
	Ok(postcard::from_bytes(bytes)?)
}
