use std::collections::BTreeSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::generator::subseq;
use crate::storage::{Entry, PersistentArray, Store};

/// Dense integer id of a unique token.
pub type Tiki = u32;

/// Reserved tiki marking the start of every sentence in the indexes.
///
/// Slot 0 of the token table is reserved for it, so no real token ever
/// receives this id.
pub const SENTINEL: Tiki = 0;

/// Where a continuation starts inside a stored sentence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Position {
	/// Offset of the next token.
	At(u32),
	/// The sentence ends right after the indexed token.
	End,
}

/// Occurrence of a unigram or bigram in a stored sentence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
	pub sentence: u64,
	pub position: Position,
}

impl Reference {
	/// Reference to `position` inside sentence `sentence`.
	pub fn new(sentence: u64, position: Position) -> Self {
		Self { sentence, position }
	}
}

/// Persistent corpus of tiki sentences with their position indexes.
///
/// # Responsibilities
/// - Store sentences of at least two tikis, each exactly once
/// - Maintain the unigram index (previous tiki → references) and the bigram
///   index (previous tiki → tiki → references) used by the `Generator`
/// - Answer verbatim queries against the stored corpus
///
/// # Invariants
/// For a stored sentence `S` of length `n` at index `i` and `j in 0..n`, with
/// `p` being `S[j-1]` or `SENTINEL` when `j == 0`:
/// - `unigram[p]` holds `(i, At(j))`
/// - `bigram[p][S[j]]` holds `(i, At(j+1))`, or `(i, End)` when `j == n-1`
/// - `unigram[S[n-1]]` holds `(i, End)`
///
/// # Notes
/// - Each logical insert is one store transaction, retried after growing the
///   store when it runs out of room.
#[derive(Clone, Debug)]
pub struct MarkovIndex {
	name: String,
	store: Store,
	sentences: PersistentArray,
	unigrams: PersistentArray,
	bigrams: PersistentArray,
}

impl MarkovIndex {
	/// Binds the index named `name`, creating nothing until the first insert.
	///
	/// # Errors
	/// Returns `TagMismatch` if one of the roots holds something else.
	pub fn open(store: &Store, name: &str) -> Result<Self> {
		Ok(Self {
			name: name.to_owned(),
			store: store.clone(),
			sentences: PersistentArray::open(store, &format!("{name}.sentences"))?,
			unigrams: PersistentArray::open(store, &format!("{name}.unigrams"))?,
			bigrams: PersistentArray::open(store, &format!("{name}.bigrams"))?,
		})
	}

	/// Prefix of the containers backing this index.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Number of sentence slots.
	pub fn len(&self) -> Result<u64> {
		self.sentences.size()
	}

	/// True when no sentence was ever added.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.len()? == 0)
	}

	/// Tikis of the sentence at `index`, `None` for a missing slot.
	///
	/// # Errors
	/// `Error::TagMismatch` when the slot holds a container instead of a sentence.
	pub fn sentence(&self, index: u64) -> Result<Option<Vec<Tiki>>> {
		self.sentences.get_scalar(index)
	}

	/// References of every position that follows `tiki`.
	pub fn unigram(&self, tiki: Tiki) -> Result<Option<PersistentArray>> {
		self.sub_array(&self.unigrams, tiki)
	}

	/// References of every position that follows the pair `(a, b)`.
	pub fn bigram(&self, a: Tiki, b: Tiki) -> Result<Option<PersistentArray>> {
		match self.sub_array(&self.bigrams, a)? {
			Some(row) => self.sub_array(&row, b),
			None => Ok(None),
		}
	}

	fn sub_array(&self, parent: &PersistentArray, tiki: Tiki) -> Result<Option<PersistentArray>> {
		match parent.get(tiki as u64)? {
			None => Ok(None),
			Some(Entry::Array(array)) => Ok(Some(array)),
			Some(_) => Err(Error::TagMismatch {
				path: format!("{}/{tiki}", parent.path()),
				expected: "array",
				found: "scalar",
			}),
		}
	}

	/// Decodes a reference list.
	pub fn references(&self, array: &PersistentArray) -> Result<Vec<Reference>> {
		array.scalars::<Reference>().map(|item| item.map(|(_, reference)| reference)).collect()
	}

	/// Indices of the sentences in which `tiki` occurs, ascending.
	pub fn sentences_containing(&self, tiki: Tiki) -> Result<Vec<u64>> {
		let Some(array) = self.unigram(tiki)? else {
			return Ok(Vec::new());
		};
		let mut found = BTreeSet::new();
		for item in array.scalars::<Reference>() {
			let (_, reference) = item?;
			found.insert(reference.sentence);
		}
		Ok(found.into_iter().collect())
	}

	/// Appends `sentence` unless it is too short or already stored.
	///
	/// Returns whether it was stored.
	pub fn insert(&self, sentence: &[Tiki]) -> Result<bool> {
		if sentence.len() < 2 {
			return Ok(false);
		}
		self.store.atomically(|| {
			if self.contains(sentence)? {
				return Ok(false);
			}
			let index = self.sentences.size()?;
			self.write_at(index, sentence)?;
			Ok(true)
		})
	}

	/// True if exactly `sentence` is stored.
	///
	/// Walks the sentinel-prefixed pairs of `sentence`; one missing pair
	/// settles it, otherwise only the shortest reference list is checked.
	pub fn contains(&self, sentence: &[Tiki]) -> Result<bool> {
		let Some(first) = sentence.first() else {
			return Ok(false);
		};
		let mut pairs = vec![(SENTINEL, *first)];
		pairs.extend(sentence.windows(2).map(|w| (w[0], w[1])));

		let Some(candidates) = self.shortest_list(&pairs)? else {
			return Ok(false);
		};
		for item in candidates.scalars::<Reference>() {
			let (_, reference) = item?;
			if self.sentence(reference.sentence)?.as_deref() == Some(sentence) {
				return Ok(true);
			}
		}
		Ok(false)
	}

	/// True if `sequence` overlaps a stored sentence as a contiguous
	/// subsequence in either direction.
	///
	/// Sequences shorter than two tikis are never verbatim.
	pub fn verbatim(&self, sequence: &[Tiki]) -> Result<bool> {
		if sequence.len() < 2 {
			return Ok(false);
		}
		let pairs: Vec<(Tiki, Tiki)> = sequence.windows(2).map(|w| (w[0], w[1])).collect();
		let Some(candidates) = self.shortest_list(&pairs)? else {
			return Ok(false);
		};
		for item in candidates.scalars::<Reference>() {
			let (_, reference) = item?;
			if let Some(stored) = self.sentence(reference.sentence)? {
				if subseq(&stored, sequence) {
					return Ok(true);
				}
			}
		}
		Ok(false)
	}

	/// Reference list with the fewest entries among `pairs`, or `None` as
	/// soon as one pair was never seen.
	fn shortest_list(&self, pairs: &[(Tiki, Tiki)]) -> Result<Option<PersistentArray>> {
		let mut best: Option<(u64, PersistentArray)> = None;
		for &(a, b) in pairs {
			let Some(list) = self.bigram(a, b)? else {
				return Ok(None);
			};
			let size = list.size()?;
			if best.as_ref().is_none_or(|(best_size, _)| size < *best_size) {
				best = Some((size, list));
			}
		}
		Ok(best.map(|(_, list)| list))
	}

	/// Writes `sentence` at slot `index` together with its index entries.
	fn write_at(&self, index: u64, sentence: &[Tiki]) -> Result<()> {
		self.sentences.put_scalar(index, sentence)?;

		let last = sentence.len() - 1;
		let mut previous = SENTINEL;
		for (j, &tiki) in sentence.iter().enumerate() {
			let offset = u32::try_from(j)
				.map_err(|_| Error::InvalidInput(format!("sentence {index} has more than u32::MAX tokens")))?;

			self.unigrams
				.ensure_array(previous as u64)?
				.append_scalar(&Reference::new(index, Position::At(offset)))?;

			let following = if j == last { Position::End } else { Position::At(offset + 1) };
			self.bigrams
				.ensure_array(previous as u64)?
				.ensure_array(tiki as u64)?
				.append_scalar(&Reference::new(index, following))?;

			if j == last {
				self.unigrams.ensure_array(tiki as u64)?.append_scalar(&Reference::new(index, Position::End))?;
			}
			previous = tiki;
		}
		Ok(())
	}

	/// Synchronises the index with `corpus` position by position.
	///
	/// Sentences shorter than two tikis are dropped first. An index holding
	/// more sentences than the corpus is cleared; missing positions are
	/// written in transactions of `batch_size` sentences.
	///
	/// # Returns
	/// The number of sentences written.
	///
	/// # Errors
	/// `DataMismatch` when a stored position differs from the corpus. The
	/// batch containing it is rolled back.
	pub fn rebuild(&self, corpus: &[Vec<Tiki>], batch_size: usize) -> Result<u64> {
		if batch_size == 0 {
			return Err(Error::InvalidInput("batch_size must be positive".to_owned()));
		}
		let corpus: Vec<&[Tiki]> = corpus.iter().map(Vec::as_slice).filter(|s| s.len() >= 2).collect();

		if self.len()? > corpus.len() as u64 {
			info!("Index {} holds more sentences than its corpus, clearing it", self.name);
			self.clear()?;
		}

		let mut written = 0u64;
		for (batch_no, batch) in corpus.chunks(batch_size).enumerate() {
			let start = (batch_no * batch_size) as u64;
			debug!("Building {}: sentence {start} of {}", self.name, corpus.len());
			written += self.store.atomically(|| {
				let mut count = 0;
				for (offset, sentence) in batch.iter().enumerate() {
					let index = start + offset as u64;
					match self.sentence(index)? {
						None => {
							self.write_at(index, sentence)?;
							count += 1;
						}
						Some(existing) if existing.as_slice() != *sentence => {
							return Err(Error::DataMismatch { index });
						}
						Some(_) => {}
					}
				}
				Ok(count)
			})?;
		}
		Ok(written)
	}

	/// Removes every sentence and index entry.
	pub fn clear(&self) -> Result<()> {
		self.store.atomically(|| {
			self.sentences.clear()?;
			self.unigrams.clear()?;
			self.bigrams.clear()
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::StoreConfig;

	fn index() -> MarkovIndex {
		let store = Store::open_in_memory(StoreConfig::default()).unwrap();
		MarkovIndex::open(&store, "statements").unwrap()
	}

	fn refs(index: &MarkovIndex, array: Option<PersistentArray>) -> Vec<Reference> {
		index.references(&array.unwrap()).unwrap()
	}

	#[test]
	fn test_insert_builds_both_indexes() {
		let index = index();
		assert!(index.insert(&[1, 2, 3]).unwrap());
		assert_eq!(index.len().unwrap(), 1);
		assert_eq!(index.sentence(0).unwrap(), Some(vec![1, 2, 3]));

		let at = |p| Reference::new(0, Position::At(p));
		let end = Reference::new(0, Position::End);

		assert_eq!(refs(&index, index.unigram(SENTINEL).unwrap()), vec![at(0)]);
		assert_eq!(refs(&index, index.unigram(1).unwrap()), vec![at(1)]);
		assert_eq!(refs(&index, index.unigram(2).unwrap()), vec![at(2)]);
		assert_eq!(refs(&index, index.unigram(3).unwrap()), vec![end]);

		assert_eq!(refs(&index, index.bigram(SENTINEL, 1).unwrap()), vec![at(1)]);
		assert_eq!(refs(&index, index.bigram(1, 2).unwrap()), vec![at(2)]);
		assert_eq!(refs(&index, index.bigram(2, 3).unwrap()), vec![end]);
		assert!(index.bigram(3, 1).unwrap().is_none());
	}

	#[test]
	fn test_short_sentences_are_ignored() {
		let index = index();
		assert!(!index.insert(&[]).unwrap());
		assert!(!index.insert(&[7]).unwrap());
		assert!(index.is_empty().unwrap());
	}

	#[test]
	fn test_duplicates_are_stored_once() {
		let index = index();
		assert!(index.insert(&[1, 2, 3]).unwrap());
		assert!(!index.insert(&[1, 2, 3]).unwrap());
		assert!(index.insert(&[1, 2]).unwrap());
		assert!(index.insert(&[2, 3]).unwrap());
		assert_eq!(index.len().unwrap(), 3);
		assert!(index.contains(&[2, 3]).unwrap());
		assert!(!index.contains(&[1, 3]).unwrap());
	}

	#[test]
	fn test_verbatim() {
		let index = index();
		index.insert(&[1, 2, 3, 4]).unwrap();
		assert!(index.verbatim(&[1, 2, 3, 4]).unwrap());
		assert!(index.verbatim(&[2, 3]).unwrap());
		assert!(!index.verbatim(&[1, 2, 3, 4, 5]).unwrap());
		assert!(!index.verbatim(&[1, 3]).unwrap());
		assert!(!index.verbatim(&[2]).unwrap());
	}

	#[test]
	fn test_sentences_containing() {
		let index = index();
		index.insert(&[1, 2, 3]).unwrap();
		index.insert(&[4, 5, 2]).unwrap();
		index.insert(&[6, 7]).unwrap();
		assert_eq!(index.sentences_containing(2).unwrap(), vec![0, 1]);
		assert_eq!(index.sentences_containing(7).unwrap(), vec![2]);
		assert!(index.sentences_containing(9).unwrap().is_empty());
	}

	#[test]
	fn test_rebuild_is_positional() {
		let index = index();
		let corpus = vec![vec![1, 2], vec![3], vec![3, 4], vec![5, 6, 7]];
		assert_eq!(index.rebuild(&corpus, 2).unwrap(), 3);
		assert_eq!(index.sentence(1).unwrap(), Some(vec![3, 4]));
		assert_eq!(index.rebuild(&corpus, 2).unwrap(), 0);

		let mut longer = corpus.clone();
		longer.push(vec![8, 9]);
		assert_eq!(index.rebuild(&longer, 2).unwrap(), 1);
		assert_eq!(index.len().unwrap(), 4);

		// A shorter corpus starts over.
		assert_eq!(index.rebuild(&[vec![9, 9]], 2).unwrap(), 1);
		assert_eq!(index.len().unwrap(), 1);
		assert!(index.unigram(5).unwrap().is_none());
	}

	#[test]
	fn test_rebuild_detects_mismatch() {
		let index = index();
		index.rebuild(&[vec![1, 2], vec![3, 4]], 10).unwrap();
		let result = index.rebuild(&[vec![1, 2], vec![4, 3], vec![5, 6]], 10);
		assert!(matches!(result, Err(Error::DataMismatch { index: 1 })));
		// The whole batch was rolled back.
		assert_eq!(index.len().unwrap(), 2);
	}

	#[test]
	fn test_clear() {
		let index = index();
		index.insert(&[1, 2, 3]).unwrap();
		index.clear().unwrap();
		assert!(index.is_empty().unwrap());
		assert!(index.unigram(SENTINEL).unwrap().is_none());
		assert!(index.bigram(1, 2).unwrap().is_none());
		assert!(index.insert(&[1, 2, 3]).unwrap());
	}

	#[test]
	fn test_reference_packing() {
		let reference = Reference::new(12, Position::End);
		let bytes = crate::storage::pack(&reference).unwrap();
		assert_eq!(crate::storage::unpack::<Reference>(&bytes).unwrap(), reference);
	}
}
