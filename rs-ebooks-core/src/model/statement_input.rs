use crate::error::{Error, Result};

/// Per-call parameters of `Model::make_statement` and `Model::make_response`.
///
/// # Responsibilities
/// - Track the length bounds a generated statement must respect
/// - Track how hard the model tries before giving up
///
/// # Invariants
/// - `limit` is never 0
#[derive(Debug, Clone, PartialEq)]
pub struct StatementInput {
	/// Candidates with at most this many tokens are rejected.
	pub min_length: usize,

	/// Generation attempts before giving up. The first half uses bigram
	/// alternatives, the rest unigram ones.
	pub retry_limit: usize,

	/// Recombination passes per attempt.
	pub passes: usize,

	/// Maximum length of the reconstructed text, in characters.
	limit: usize,
}

impl Default for StatementInput {
	fn default() -> Self {
		Self { min_length: 3, retry_limit: 100, passes: 3, limit: 140 }
	}
}

impl StatementInput {
	/// Returns the maximum statement length in characters.
	pub fn limit(&self) -> usize {
		self.limit
	}

	/// Sets the maximum statement length in characters.
	///
	/// # Errors
	/// Returns an error if `limit` is 0.
	pub fn set_limit(&mut self, limit: usize) -> Result<()> {
		if limit == 0 {
			return Err(Error::InvalidInput("limit must be positive".to_owned()));
		}
		self.limit = limit;
		Ok(())
	}

	/// Number of leading attempts that use bigram alternatives.
	pub(crate) fn bigram_attempts(&self) -> usize {
		self.retry_limit / 2
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let input = StatementInput::default();
		assert_eq!(input.limit(), 140);
		assert_eq!(input.retry_limit, 100);
		assert_eq!(input.bigram_attempts(), 50);
	}

	#[test]
	fn test_limit_must_be_positive() {
		let mut input = StatementInput::default();
		assert!(input.set_limit(0).is_err());
		input.set_limit(280).unwrap();
		assert_eq!(input.limit(), 280);
	}
}
