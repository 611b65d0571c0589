use crate::error::{Error, Result};
use crate::model::markov_index::{SENTINEL, Tiki};
use crate::storage::{PersistentArray, PersistentMap, Store};

/// Case-folding used by `TokenTable::fuzzy` unless another one is given.
pub fn fold_case(token: &str) -> String {
	token.to_lowercase()
}

/// Persistent, append-only mapping between tokens and tikis.
///
/// # Invariants
/// - Tikis are assigned densely in first-sight order and never reused.
/// - Slot `SENTINEL` is reserved and never resolves to a token.
/// - Every tiki appears in exactly one fold bucket.
#[derive(Clone, Debug)]
pub struct TokenTable {
	store: Store,
	tokens: PersistentArray,
	ids: PersistentMap,
	folds: PersistentMap,
	fold: fn(&str) -> String,
}

impl TokenTable {
	/// Opens the table in `store` with the default Unicode case folding.
	///
	/// A fresh table gets the sentinel at index 0 so real tikis start at 1.
	pub fn open(store: &Store) -> Result<Self> {
		Self::with_fold(store, fold_case)
	}

	/// Opens the table with a custom case-folding function.
	pub fn with_fold(store: &Store, fold: fn(&str) -> String) -> Result<Self> {
		let table = Self {
			store: store.clone(),
			tokens: PersistentArray::open(store, "tokens")?,
			ids: PersistentMap::open(store, "token_ids")?,
			folds: PersistentMap::open(store, "token_folds")?,
			fold,
		};
		if table.tokens.is_empty()? {
			table.tokens.put_scalar(SENTINEL as u64, "")?;
		}
		Ok(table)
	}

	/// Number of assigned tikis, the sentinel excluded.
	pub fn len(&self) -> Result<u64> {
		Ok(self.tokens.size()?.saturating_sub(1))
	}

	/// True until the first token is interned.
	pub fn is_empty(&self) -> Result<bool> {
		Ok(self.len()? == 0)
	}

	/// Applies the table's case folding to `token`.
	pub fn fold(&self, token: &str) -> String {
		(self.fold)(token)
	}

	/// Exact lookup, without assigning a tiki.
	pub fn lookup(&self, token: &str) -> Result<Option<Tiki>> {
		self.ids.get_scalar(token)
	}

	/// Returns the tiki of `token`, assigning the next one if it is new.
	pub fn intern(&self, token: &str) -> Result<Tiki> {
		self.store.atomically(|| {
			if let Some(tiki) = self.lookup(token)? {
				return Ok(tiki);
			}
			let index = self.tokens.append_scalar(token)?;
			let tiki = Tiki::try_from(index)
				.map_err(|_| Error::InvalidInput(format!("token table is full at {index} entries")))?;
			self.ids.put_scalar(token, &tiki)?;
			self.folds.ensure_array(&(self.fold)(token))?.append_scalar(&tiki)?;
			Ok(tiki)
		})
	}

	/// Interns every token in one transaction.
	///
	/// # Errors
	/// On `Error::CapacityExceeded` none of the new tokens in the batch are kept.
	pub fn intern_all<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<Tiki>> {
		self.store.atomically(|| tokens.iter().map(|t| self.intern(t.as_ref())).collect())
	}

	/// Token for `tiki`. The sentinel and unassigned tikis resolve to `None`.
	pub fn resolve(&self, tiki: Tiki) -> Result<Option<String>> {
		if tiki == SENTINEL {
			return Ok(None);
		}
		self.tokens.get_scalar(tiki as u64)
	}

	/// Resolves every tiki; an unknown one is a consistency fault.
	pub fn resolve_all(&self, tikis: &[Tiki]) -> Result<Vec<String>> {
		tikis
			.iter()
			.map(|&tiki| {
				self.resolve(tiki)?.ok_or_else(|| Error::ConsistencyFault {
					path: format!("tokens/{tiki}"),
					detail: "tiki does not resolve to a token".to_owned(),
				})
			})
			.collect()
	}

	/// Tikis of every token folding to the same bucket as `token`.
	pub fn fuzzy(&self, token: &str) -> Result<Vec<Tiki>> {
		let Some(bucket) = self.folds.get((self.fold)(token).as_str())? else {
			return Ok(Vec::new());
		};
		let Some(bucket) = bucket.into_array() else {
			return Err(Error::TagMismatch { path: format!("token_folds/{token}"), expected: "array", found: "scalar" });
		};
		bucket.scalars::<Tiki>().map(|item| item.map(|(_, tiki)| tiki)).collect()
	}
}
