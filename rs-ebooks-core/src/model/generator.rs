use std::collections::HashSet;

use log::{debug, warn};
use rand::Rng;
use rand::seq::SliceRandom;
use rand::seq::index::sample;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::model::markov_index::{MarkovIndex, Position, Reference, Tiki};

/// Which index supplies the alternatives at a variation site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
	/// Any sentence continuing after the same token. More adventurous.
	Unigram,
	/// Any sentence continuing after the same pair of tokens.
	Bigram,
}

/// Result of one generation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
	Generated(Vec<Tiki>),
	/// Every attempted pass hit a variation site that used up its attempt budget.
	Stuck,
}

impl Outcome {
	/// Generated tikis, `None` when the generator got stuck.
	pub fn into_tikis(self) -> Option<Vec<Tiki>> {
		match self {
			Outcome::Generated(tikis) => Some(tikis),
			Outcome::Stuck => None,
		}
	}
}

/// Returns true if one sequence occurs contiguously in the other.
///
/// Equal sequences match and so does an empty one. Otherwise the shorter
/// sequence is anchored at the first occurrence of its first element in the
/// longer one, and only that window is compared.
pub fn subseq(a: &[Tiki], b: &[Tiki]) -> bool {
	if a == b || a.is_empty() || b.is_empty() {
		return true;
	}
	let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
	match long.iter().position(|t| *t == short[0]) {
		Some(start) => long.get(start..start + short.len()) == Some(short),
		None => false,
	}
}

/// Suffix-recombination generator over one `MarkovIndex`.
///
/// # Responsibilities
/// - Pick a random starting sentence
/// - Repeatedly splice the suffix of another sentence at a shared token
///   (or token pair), refusing splices that reproduce corpus text
/// - Report `Outcome::Stuck` when no pass could make progress within budget
///
/// # Notes
/// - Randomness is injected so seeded runs are reproducible.
/// - `alternatives_cap` and `attempt_budget` are the only bounds on the work
///   done by a call. The budget applies to each variation site: a site
///   rejecting more candidates than that makes the whole pass stuck.
pub struct Generator<'a> {
	index: &'a MarkovIndex,
	config: GenerationConfig,
}

/// Candidate splices at one position of the current sequence.
struct Site {
	/// Index of the token after which the suffix is spliced in.
	end: usize,
	alternatives: Vec<Reference>,
}

impl<'a> Generator<'a> {
	/// Generator over `index`, tuned by `config`.
	pub fn new(index: &'a MarkovIndex, config: GenerationConfig) -> Self {
		Self { index, config }
	}

	/// Generates from a uniformly chosen starting sentence.
	///
	/// # Errors
	/// - `EmptyCorpus` if the index holds no sentence.
	/// - Storage and consistency errors from the index.
	pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R, passes: usize, mode: Mode) -> Result<Outcome> {
		let len = self.index.len()?;
		if len == 0 {
			return Err(Error::EmptyCorpus);
		}
		let start = rng.random_range(0..len);
		self.generate_from(rng, start, passes, mode)
	}

	/// Generates starting from sentence `start`.
	pub fn generate_from<R: Rng + ?Sized>(
		&self,
		rng: &mut R,
		start: u64,
		passes: usize,
		mode: Mode,
	) -> Result<Outcome> {
		let mut tikis = match self.index.sentence(start)? {
			Some(sentence) => sentence,
			None if self.index.is_empty()? => return Err(Error::EmptyCorpus),
			None => return Err(Error::InvalidInput(format!("no sentence at index {start} in {}", self.index.name()))),
		};
		let mut used: HashSet<u64> = HashSet::from([start]);
		let mut pool: Vec<Vec<Tiki>> = vec![tikis.clone()];

		let mut stuck = 0usize;
		let mut progressed = 0usize;

		for pass in 0..passes {
			let mut sites = self.variation_sites(rng, &tikis, mode, &used)?;
			if sites.is_empty() {
				debug!("Pass {pass}: no variation site left");
				break;
			}
			sites.shuffle(rng);

			let mut rejected = 0usize;
			let mut pass_stuck = false;
			let mut variant = None;

			'sites: for site in &mut sites {
				site.alternatives.shuffle(rng);
				let mut rejected_here = 0usize;
				for alt in &site.alternatives {
					let Position::At(offset) = alt.position else {
						continue;
					};
					let sentence = self.index.sentence(alt.sentence)?.ok_or_else(|| Error::ConsistencyFault {
						path: format!("{}.sentences/{}", self.index.name(), alt.sentence),
						detail: "referenced sentence is missing".to_owned(),
					})?;
					let Some(suffix) = sentence.get(offset as usize..) else {
						return Err(Error::ConsistencyFault {
							path: format!("{}.sentences/{}", self.index.name(), alt.sentence),
							detail: format!("reference offset {offset} is past the sentence end"),
						});
					};

					let mut potential = tikis[..=site.end].to_vec();
					potential.extend_from_slice(suffix);

					if subseq(&sentence, &potential) || pool.iter().any(|v| subseq(v, &potential)) {
						rejected += 1;
						rejected_here += 1;
						if rejected_here > self.config.attempt_budget {
							pass_stuck = true;
							break 'sites;
						}
						continue;
					}

					used.insert(alt.sentence);
					pool.push(sentence);
					variant = Some(potential);
					break 'sites;
				}
			}

			if pass_stuck {
				warn!("Pass {pass} got stuck: a site rejected more than {} candidates", self.config.attempt_budget);
				stuck += 1;
			}
			if let Some(variant) = variant {
				debug!("Pass {pass}: {} tokens after {rejected} rejections", variant.len());
				tikis = variant;
				progressed += 1;
			}
		}

		if stuck > 0 && progressed == 0 {
			return Ok(Outcome::Stuck);
		}
		Ok(Outcome::Generated(tikis))
	}

	/// Sites `k >= 1` of `tikis` with their usable alternatives.
	///
	/// Alternatives ending a sentence or coming from an already used sentence
	/// are dropped; the rest is sampled down to `alternatives_cap`.
	fn variation_sites<R: Rng + ?Sized>(
		&self,
		rng: &mut R,
		tikis: &[Tiki],
		mode: Mode,
		used: &HashSet<u64>,
	) -> Result<Vec<Site>> {
		let mut sites = Vec::new();
		for k in 1..tikis.len().saturating_sub(1) {
			let list = match mode {
				Mode::Unigram => self.index.unigram(tikis[k + 1])?,
				Mode::Bigram => self.index.bigram(tikis[k], tikis[k + 1])?,
			};
			let Some(list) = list else {
				continue;
			};

			let mut alternatives: Vec<Reference> = self
				.index
				.references(&list)?
				.into_iter()
				.filter(|r| r.position != Position::End && !used.contains(&r.sentence))
				.collect();

			if alternatives.len() > self.config.alternatives_cap {
				alternatives = sample(rng, alternatives.len(), self.config.alternatives_cap)
					.into_iter()
					.map(|i| alternatives[i])
					.collect();
			}
			if !alternatives.is_empty() {
				sites.push(Site { end: k + 1, alternatives });
			}
		}
		Ok(sites)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::StoreConfig;
	use crate::storage::Store;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn index_with(sentences: &[&[Tiki]]) -> MarkovIndex {
		let store = Store::open_in_memory(StoreConfig::default()).unwrap();
		let index = MarkovIndex::open(&store, "statements").unwrap();
		for sentence in sentences {
			index.insert(sentence).unwrap();
		}
		index
	}

	#[test]
	fn test_subseq() {
		assert!(subseq(&[1, 2, 3], &[2, 3]));
		assert!(subseq(&[2, 3], &[1, 2, 3]));
		assert!(!subseq(&[1, 2, 3], &[2, 4]));
		assert!(subseq(&[1, 2], &[1, 2]));
		assert!(subseq(&[], &[1]));
		assert!(!subseq(&[1, 2, 3], &[3, 4]));
		// Only the first occurrence of the head is considered.
		assert!(!subseq(&[1, 2, 1, 3], &[1, 3]));
	}

	#[test]
	fn test_empty_index() {
		let index = index_with(&[]);
		let generator = Generator::new(&index, GenerationConfig::default());
		let mut rng = StdRng::seed_from_u64(1);
		assert!(matches!(generator.generate(&mut rng, 3, Mode::Bigram), Err(Error::EmptyCorpus)));
	}

	#[test]
	fn test_zero_passes_returns_stored_sentence() {
		let index = index_with(&[&[1, 2, 3], &[4, 5, 6]]);
		let generator = Generator::new(&index, GenerationConfig::default());
		let mut rng = StdRng::seed_from_u64(7);
		for _ in 0..10 {
			let tikis = generator.generate(&mut rng, 0, Mode::Bigram).unwrap().into_tikis().unwrap();
			assert!(tikis == vec![1, 2, 3] || tikis == vec![4, 5, 6]);
		}
	}

	#[test]
	fn test_bigram_splice() {
		let index = index_with(&[&[1, 2, 3, 4], &[5, 2, 3, 6]]);
		let generator = Generator::new(&index, GenerationConfig::default());
		let mut rng = StdRng::seed_from_u64(3);
		let outcome = generator.generate_from(&mut rng, 0, 1, Mode::Bigram).unwrap();
		assert_eq!(outcome, Outcome::Generated(vec![1, 2, 3, 6]));
	}

	#[test]
	fn test_unigram_splice() {
		let index = index_with(&[&[1, 2, 3, 4], &[5, 6, 3, 7, 8]]);
		let generator = Generator::new(&index, GenerationConfig::default());
		let mut rng = StdRng::seed_from_u64(3);
		let outcome = generator.generate_from(&mut rng, 0, 1, Mode::Unigram).unwrap();
		assert_eq!(outcome, Outcome::Generated(vec![1, 2, 3, 7, 8]));
	}

	#[test]
	fn test_no_alternatives_keeps_sentence() {
		let index = index_with(&[&[1, 2, 3, 4], &[5, 6, 7, 8]]);
		let generator = Generator::new(&index, GenerationConfig::default());
		let mut rng = StdRng::seed_from_u64(3);
		let outcome = generator.generate_from(&mut rng, 1, 5, Mode::Unigram).unwrap();
		assert_eq!(outcome, Outcome::Generated(vec![5, 6, 7, 8]));
	}

	#[test]
	fn test_stuck_when_budget_runs_out() {
		// Every site offers two candidates that only reproduce the start.
		let index = index_with(&[&[1, 2, 3, 4, 5], &[9, 2, 3, 4, 5], &[8, 2, 3, 4, 5]]);
		let config = GenerationConfig { attempt_budget: 1, ..GenerationConfig::default() };
		let generator = Generator::new(&index, config);
		let mut rng = StdRng::seed_from_u64(11);
		assert_eq!(generator.generate_from(&mut rng, 0, 1, Mode::Bigram).unwrap(), Outcome::Stuck);

		// With room to try everything the pass merely makes no progress.
		let generator = Generator::new(&index, GenerationConfig::default());
		let outcome = generator.generate_from(&mut rng, 0, 1, Mode::Bigram).unwrap();
		assert_eq!(outcome, Outcome::Generated(vec![1, 2, 3, 4, 5]));
	}

	#[test]
	fn test_budget_counts_per_site() {
		// Sites (2,3) and (3,4) offer three rejected candidates each; only
		// (4,5) has a usable splice, from the last sentence.
		let index = index_with(&[
			&[1, 2, 3, 4, 5, 6],
			&[10, 2, 3, 4, 5, 6],
			&[11, 2, 3, 4, 5, 6],
			&[12, 2, 3, 4, 5, 6],
			&[20, 4, 5, 7, 8],
		]);
		let config = GenerationConfig { attempt_budget: 3, ..GenerationConfig::default() };
		let generator = Generator::new(&index, config);
		for seed in 0..50 {
			let mut rng = StdRng::seed_from_u64(seed);
			let outcome = generator.generate_from(&mut rng, 0, 1, Mode::Bigram).unwrap();
			assert_eq!(outcome, Outcome::Generated(vec![1, 2, 3, 4, 5, 7, 8]), "seed {seed}");
		}
	}

	#[test]
	fn test_unknown_start() {
		let index = index_with(&[&[1, 2]]);
		let generator = Generator::new(&index, GenerationConfig::default());
		let mut rng = StdRng::seed_from_u64(0);
		assert!(matches!(generator.generate_from(&mut rng, 5, 1, Mode::Bigram), Err(Error::InvalidInput(_))));
	}
}
