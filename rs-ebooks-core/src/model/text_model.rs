use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;

use log::{debug, info, warn};
use rand::Rng;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io;
use crate::model::generator::{Generator, Mode, Outcome};
use crate::model::markov_index::{MarkovIndex, Tiki};
use crate::model::nlp::{Nlp, SimpleNlp, punctuation};
use crate::model::statement_input::StatementInput;
use crate::model::token_table::TokenTable;
use crate::storage::{PersistentArray, Store};

/// Keywords kept after ranking a corpus.
pub const KEYWORD_LIMIT: usize = 2000;

/// Relevant matches needed before a response is built from them.
pub const RELEVANT_THRESHOLD: usize = 30;

/// Slightly relevant matches needed when too few are relevant.
pub const SLIGHTLY_RELEVANT_THRESHOLD: usize = 50;

/// Counters collected by one `Model::consume_lines` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumeReport {
	/// Lines received.
	pub lines: usize,
	/// Comment and retweet lines dropped.
	pub skipped_lines: usize,
	/// Sentences added to the statements index.
	pub statements: u64,
	/// Sentences added to the mentions index.
	pub mentions: u64,
	/// Sentences already present in their index.
	pub duplicates: u64,
	/// Sentences with fewer than two usable tokens.
	pub too_short: u64,
	/// Size of the token table afterwards.
	pub tokens: u64,
	/// Keywords stored.
	pub keywords: usize,
}

/// Sentences of an index related to some input.
///
/// The sentence lists are distinct and ascending. The match counts add one
/// per input token found in a sentence, so a sentence sharing two input
/// tokens counts twice; response thresholds apply to the counts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Relevance {
	/// Sentences sharing a meaningful (non-stopword) token with the input.
	pub relevant: Vec<u64>,
	/// Sentences sharing any token with the input.
	pub slightly_relevant: Vec<u64>,
	pub relevant_matches: usize,
	pub slightly_relevant_matches: usize,
	/// Case-folded input tokens.
	pub tokens: Vec<String>,
}

/// A persistent text model: tokens, two sentence indexes and keywords.
///
/// # Responsibilities
/// - Ingest corpora: split lines into statements and mentions, tokenize them
///   in parallel, intern tokens and index sentences in batches
/// - Generate statements that do not copy the corpus
/// - Generate responses from sentences related to an input
///
/// # Notes
/// - Everything lives in `<root>/<name>/model.sqlite3`; response caches in
///   `<root>/<name>/responses/`.
/// - One writer per model directory. Reads may happen from any thread.
pub struct Model {
	name: String,
	dir: PathBuf,
	config: Config,
	nlp: Arc<dyn Nlp>,
	store: Store,
	tokens: TokenTable,
	statements: MarkovIndex,
	mentions: MarkovIndex,
	keywords: PersistentArray,
}

impl std::fmt::Debug for Model {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Model").field("name", &self.name).field("dir", &self.dir).finish()
	}
}

impl Model {
	/// Opens (or creates) the model `name` under `root` with `SimpleNlp`.
	pub fn open<P: AsRef<Path>>(root: P, name: &str, config: Config) -> Result<Self> {
		Self::with_nlp(root, name, config, Arc::new(SimpleNlp))
	}

	/// Opens (or creates) the model `name` under `root`.
	///
	/// # Errors
	/// - `InvalidInput` for an invalid config or an empty name.
	/// - Storage errors, or `TagMismatch` if the store holds something else.
	pub fn with_nlp<P: AsRef<Path>>(root: P, name: &str, config: Config, nlp: Arc<dyn Nlp>) -> Result<Self> {
		config.validate()?;
		if name.trim().is_empty() {
			return Err(Error::InvalidInput("model name cannot be empty".to_owned()));
		}
		let dir = io::model_dir(root, name);
		let store = Store::open(dir.join(io::MODEL_FILE), config.store)?;
		info!("Opened model {name} at {}", store.location());

		Ok(Self {
			name: name.to_owned(),
			tokens: TokenTable::open(&store)?,
			statements: MarkovIndex::open(&store, "statements")?,
			mentions: MarkovIndex::open(&store, "mentions")?,
			keywords: PersistentArray::open(&store, "keywords")?,
			dir,
			config,
			nlp,
			store,
		})
	}

	/// Model name, also the stem of the store file.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Directory holding the store and the response caches.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Settings the model was opened with.
	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Token table shared by both corpora.
	pub fn tokens(&self) -> &TokenTable {
		&self.tokens
	}

	/// Index over the statement corpus.
	pub fn statements(&self) -> &MarkovIndex {
		&self.statements
	}

	/// Index over the mention corpus.
	pub fn mentions(&self) -> &MarkovIndex {
		&self.mentions
	}

	/// Stored keywords, most important first.
	pub fn keywords(&self) -> Result<Vec<String>> {
		self.keywords.scalars::<String>().map(|item| item.map(|(_, word)| word)).collect()
	}

	/// Consumes a plaintext corpus, one text per line.
	pub fn consume<P: AsRef<Path>>(&self, path: P) -> Result<ConsumeReport> {
		info!("Reading plaintext corpus from {}", path.as_ref().display());
		let lines = io::read_file(path)?;
		self.consume_lines(&lines)
	}

	/// Consumes several plaintext corpora as a single one.
	pub fn consume_all<P: AsRef<Path>>(&self, paths: &[P]) -> Result<ConsumeReport> {
		let mut lines = Vec::new();
		for path in paths {
			info!("Reading plaintext corpus from {}", path.as_ref().display());
			lines.extend(io::read_file(path)?);
		}
		self.consume_lines(&lines)
	}

	/// Consumes every file with `extension` directly inside `dir`.
	pub fn consume_dir<P: AsRef<Path>>(&self, dir: P, extension: &str) -> Result<ConsumeReport> {
		let dir = dir.as_ref();
		let paths: Vec<PathBuf> = io::list_files(dir, extension)?.into_iter().map(|f| dir.join(f)).collect();
		self.consume_all(&paths)
	}

	/// Consumes a sequence of lines.
	///
	/// # Behavior
	/// - Drops lines starting with `#` and lines containing `RT` or `MT`.
	/// - Lines starting with `@`, or with whitespace followed by `@`, are
	///   mentions; the others are statements.
	/// - Tokens containing `@` or `http` are dropped.
	/// - Replaces the stored keywords with the top ones of the statements.
	pub fn consume_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<ConsumeReport> {
		let mut report = ConsumeReport { lines: lines.len(), ..ConsumeReport::default() };

		let mut statements = Vec::new();
		let mut mentions = Vec::new();
		for line in lines {
			let line = line.as_ref();
			if line.starts_with('#') || line.contains("RT") || line.contains("MT") {
				report.skipped_lines += 1;
				continue;
			}
			if is_mention(line) {
				mentions.push(self.nlp.normalize(line));
			} else {
				statements.push(self.nlp.normalize(line));
			}
		}

		info!("Tokenizing {} statements and {} mentions", statements.len(), mentions.len());
		let statement_sentences = self.tokenize_all(&statements);
		let mention_sentences = self.tokenize_all(&mentions);

		let added = self.ingest(&self.statements, &statement_sentences, &mut report)?;
		report.statements = added;
		let added = self.ingest(&self.mentions, &mention_sentences, &mut report)?;
		report.mentions = added;

		info!("Ranking keywords");
		let mut keywords = self.nlp.keywords(&statements.join("\n"));
		keywords.truncate(KEYWORD_LIMIT);
		self.store.atomically(|| {
			self.keywords.clear()?;
			for word in &keywords {
				self.keywords.append_scalar(word.as_str())?;
			}
			Ok(())
		})?;
		if keywords.len() >= 3 {
			info!("Top keywords: {} {} {}", keywords[0], keywords[1], keywords[2]);
		}

		report.keywords = keywords.len();
		report.tokens = self.tokens.len()?;
		Ok(report)
	}

	/// Splits texts into token sentences across worker threads.
	///
	/// Work is cut into `num_cpus * 8` chunks; results keep corpus order.
	fn tokenize_all(&self, texts: &[String]) -> Vec<Vec<String>> {
		if texts.is_empty() {
			return Vec::new();
		}
		let chunks = num_cpus::get() * 8;
		let chunk_size = texts.len().div_ceil(chunks);

		let (tx, rx) = mpsc::channel();
		thread::scope(|scope| {
			for (chunk_no, chunk) in texts.chunks(chunk_size).enumerate() {
				let tx = tx.clone();
				let nlp = &self.nlp;
				scope.spawn(move || {
					let sentences: Vec<Vec<String>> = chunk
						.iter()
						.flat_map(|text| nlp.sentences(text))
						.map(|sentence| {
							nlp.tokenize(&sentence)
								.into_iter()
								.filter(|t| !t.contains('@') && !t.contains("http"))
								.collect()
						})
						.collect();
					// The receiver outlives the scope.
					let _ = tx.send((chunk_no, sentences));
				});
			}
		});
		drop(tx);

		let mut parts: Vec<(usize, Vec<Vec<String>>)> = rx.iter().collect();
		parts.sort_by_key(|(chunk_no, _)| *chunk_no);
		parts.into_iter().flat_map(|(_, sentences)| sentences).collect()
	}

	/// Interns and inserts sentences in transactions of `batch_size`.
	///
	/// Returns the number of sentences added.
	fn ingest(&self, index: &MarkovIndex, sentences: &[Vec<String>], report: &mut ConsumeReport) -> Result<u64> {
		let mut added = 0;
		for (batch_no, batch) in sentences.chunks(self.config.batch_size).enumerate() {
			let (inserted, duplicates, too_short) = self.store.atomically(|| {
				let (mut inserted, mut duplicates, mut too_short) = (0, 0, 0);
				for tokens in batch {
					if tokens.len() < 2 {
						too_short += 1;
						continue;
					}
					let tikis = self.tokens.intern_all(tokens)?;
					if index.insert(&tikis)? {
						inserted += 1;
					} else {
						duplicates += 1;
					}
				}
				Ok((inserted, duplicates, too_short))
			})?;
			added += inserted;
			report.duplicates += duplicates;
			report.too_short += too_short;
			info!(
				"Building {}: sentence {} of {}",
				index.name(),
				(batch_no * self.config.batch_size + batch.len()),
				sentences.len()
			);
		}
		Ok(added)
	}

	/// Joins the tokens of `tikis` back into text.
	pub fn reconstruct(&self, tikis: &[Tiki]) -> Result<String> {
		Ok(self.nlp.reconstruct(&self.tokens.resolve_all(tikis)?))
	}

	/// True if `tikis` reproduces a statement or a mention.
	pub fn verbatim(&self, tikis: &[Tiki]) -> Result<bool> {
		Ok(self.statements.verbatim(tikis)? || self.mentions.verbatim(tikis)?)
	}

	/// Generates a statement from the statements index.
	pub fn statement<R: Rng + ?Sized>(&self, rng: &mut R, input: &StatementInput) -> Result<Option<String>> {
		self.make_statement(rng, &self.statements, input)
	}

	/// Generates a statement from `index`.
	///
	/// # Behavior
	/// - The first `retry_limit / 2` attempts use bigram alternatives, the
	///   others unigram ones.
	/// - A candidate needs more than `min_length` tokens, must not be
	///   verbatim in either index, and its text must fit in `limit`
	///   characters with balanced enclosers.
	///
	/// # Returns
	/// `None` once every attempt was rejected.
	pub fn make_statement<R: Rng + ?Sized>(
		&self,
		rng: &mut R,
		index: &MarkovIndex,
		input: &StatementInput,
	) -> Result<Option<String>> {
		let generator = Generator::new(index, self.config.generation);

		for attempt in 0..input.retry_limit {
			let mode = if attempt < input.bigram_attempts() { Mode::Bigram } else { Mode::Unigram };
			debug!("Attempting to produce statement try {}/{}", attempt + 1, input.retry_limit);

			let tikis = match generator.generate(rng, input.passes, mode)? {
				Outcome::Generated(tikis) => tikis,
				Outcome::Stuck => continue,
			};
			if tikis.len() <= input.min_length {
				continue;
			}
			if self.verbatim(&tikis)? {
				debug!("Verbatim: {}", self.reconstruct(&tikis)?);
				continue;
			}
			let text = self.reconstruct(&tikis)?;
			if text.chars().count() <= input.limit() && !self.nlp.unmatched_enclosers(&text) {
				return Ok(Some(text));
			}
		}

		info!("Unable to produce a valid non-verbatim statement in {} attempts", input.retry_limit);
		Ok(None)
	}

	/// Finds the sentences of `index` sharing a token with `input`, ignoring
	/// case.
	pub fn find_relevant(&self, index: &MarkovIndex, input: &str) -> Result<Relevance> {
		let tokens: Vec<String> = self.nlp.tokenize(input).iter().map(|t| self.tokens.fold(t)).collect();

		let mut found = Relevance::default();
		let mut relevant = BTreeSet::new();
		let mut slightly_relevant = BTreeSet::new();
		for token in &tokens {
			let weak = self.nlp.stopword(token) || punctuation(token);
			let mut matching = BTreeSet::new();
			for tiki in self.tokens.fuzzy(token)? {
				matching.extend(index.sentences_containing(tiki)?);
			}
			if !weak {
				found.relevant_matches += matching.len();
				relevant.extend(matching.iter().copied());
			}
			found.slightly_relevant_matches += matching.len();
			slightly_relevant.extend(matching);
		}

		found.relevant = relevant.into_iter().collect();
		found.slightly_relevant = slightly_relevant.into_iter().collect();
		found.tokens = tokens;
		Ok(found)
	}

	/// Generates a response to `input`.
	///
	/// Mentions are preferred, then statements: the first index with enough
	/// related sentences feeds a cached response index. Without any, the
	/// whole statements index is used.
	pub fn make_response<R: Rng + ?Sized>(
		&self,
		rng: &mut R,
		input: &str,
		params: &StatementInput,
	) -> Result<Option<String>> {
		for source in [&self.mentions, &self.statements] {
			let found = self.find_relevant(source, input)?;
			let chosen = if found.relevant_matches >= RELEVANT_THRESHOLD {
				found.relevant
			} else if found.slightly_relevant_matches >= SLIGHTLY_RELEVANT_THRESHOLD {
				found.slightly_relevant
			} else {
				continue;
			};

			let slug = io::slug(&found.tokens);
			info!("Making response for {slug} from {} {} sentences", chosen.len(), source.name());
			let index = self.response_index(&slug, source, &chosen)?;
			return self.make_statement(rng, &index, params);
		}

		self.make_statement(rng, &self.statements, params)
	}

	/// Opens the response cache `slug` and synchronises it with the given
	/// sentences of `source`.
	fn response_index(&self, slug: &str, source: &MarkovIndex, sentences: &[u64]) -> Result<MarkovIndex> {
		let corpus = sentences
			.iter()
			.map(|&i| {
				source.sentence(i)?.ok_or_else(|| Error::ConsistencyFault {
					path: format!("{}.sentences/{i}", source.name()),
					detail: "indexed sentence is missing".to_owned(),
				})
			})
			.collect::<Result<Vec<_>>>()?;

		let path = self.dir.join(io::RESPONSES_DIR).join(format!("{slug}.sqlite3"));
		let store = Store::open(&path, self.config.store)?;
		let index = MarkovIndex::open(&store, "responses")?;

		match index.rebuild(&corpus, self.config.batch_size) {
			Err(Error::DataMismatch { index: position }) => {
				warn!("Response cache {} disagrees at sentence {position}, rebuilding it", path.display());
				index.clear()?;
				index.rebuild(&corpus, self.config.batch_size)?;
			}
			other => {
				other?;
			}
		}
		Ok(index)
	}
}

/// True for lines addressed to someone.
fn is_mention(line: &str) -> bool {
	line.starts_with('@') || line.chars().zip(line.chars().skip(1)).any(|(a, b)| a.is_whitespace() && b == '@')
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	fn model(dir: &Path) -> Model {
		Model::open(dir, "bot", Config::default()).unwrap()
	}

	#[test]
	fn test_is_mention() {
		assert!(is_mention("@bob hi"));
		assert!(is_mention("hi @bob"));
		assert!(is_mention("hi\t@bob"));
		assert!(!is_mention("mail me at bob@example.com"));
	}

	#[test]
	fn test_consume_lines_sorts_and_filters() {
		let dir = tempfile::tempdir().unwrap();
		let model = model(dir.path());
		let report = model
			.consume_lines(&[
				"# a comment",
				"RT something old",
				"The cat sat on the mat.",
				"@bob the cat is fine",
				"The cat sat on the mat.",
				"Look at http://example.com now",
				"Hi",
			])
			.unwrap();

		assert_eq!(report.lines, 7);
		assert_eq!(report.skipped_lines, 2);
		assert_eq!(report.statements, 2);
		assert_eq!(report.mentions, 1);
		assert_eq!(report.duplicates, 1);
		assert_eq!(report.too_short, 1);
		assert!(model.tokens().lookup("http://example.com").unwrap().is_none());
		assert!(model.tokens().lookup("@bob").unwrap().is_none());
		assert_eq!(model.keywords().unwrap()[0], "cat");
	}

	#[test]
	fn test_model_survives_reopen() {
		let dir = tempfile::tempdir().unwrap();
		{
			let model = model(dir.path());
			model.consume_lines(&["one two three", "four five six"]).unwrap();
		}
		let model = model(dir.path());
		assert_eq!(model.statements().len().unwrap(), 2);
		assert_eq!(model.tokens().len().unwrap(), 6);
		assert_eq!(io::list_models(dir.path()).unwrap(), vec!["bot"]);
	}

	#[test]
	fn test_statement_is_not_verbatim() {
		let dir = tempfile::tempdir().unwrap();
		let model = model(dir.path());
		model
			.consume_lines(&[
				"the quick brown fox jumps over the lazy dog",
				"a slow brown fox sleeps under the warm sun",
				"my quick brown cat naps over the old fence",
			])
			.unwrap();

		let mut rng = StdRng::seed_from_u64(5);
		let mut input = StatementInput::default();
		input.retry_limit = 200;
		for _ in 0..5 {
			if let Some(text) = model.statement(&mut rng, &input).unwrap() {
				let tikis: Vec<Tiki> =
					text.split(' ').map(|t| model.tokens().lookup(t).unwrap().unwrap()).collect();
				assert!(!model.verbatim(&tikis).unwrap());
				assert!(tikis.len() > input.min_length);
			}
		}
	}

	#[test]
	fn test_statement_gives_up_on_tiny_corpus() {
		let dir = tempfile::tempdir().unwrap();
		let model = model(dir.path());
		model.consume_lines(&["only one sentence here"]).unwrap();
		let mut rng = StdRng::seed_from_u64(1);
		let mut input = StatementInput::default();
		input.retry_limit = 10;
		assert_eq!(model.statement(&mut rng, &input).unwrap(), None);
	}

	#[test]
	fn test_find_relevant() {
		let dir = tempfile::tempdir().unwrap();
		let model = model(dir.path());
		model.consume_lines(&["I love Rust", "the crab is red", "rust never sleeps"]).unwrap();
		let found = model.find_relevant(model.statements(), "RUST and the crab").unwrap();
		assert_eq!(found.tokens, vec!["rust", "and", "the", "crab"]);
		assert_eq!(found.relevant, vec![0, 1, 2]);
		assert_eq!(found.slightly_relevant, vec![0, 1, 2]);
		// "the" adds sentence 1 a second time to the slight matches.
		assert_eq!(found.relevant_matches, 3);
		assert_eq!(found.slightly_relevant_matches, 4);

		let found = model.find_relevant(model.statements(), "the").unwrap();
		assert!(found.relevant.is_empty());
		assert_eq!(found.slightly_relevant, vec![1]);
	}

	#[test]
	fn test_thresholds_count_each_matching_token() {
		let dir = tempfile::tempdir().unwrap();
		let model = model(dir.path());
		let lines: Vec<String> = (0..15).map(|i| format!("red crabs walk past stone {i}")).collect();
		model.consume_lines(&lines).unwrap();

		let found = model.find_relevant(model.statements(), "red crabs").unwrap();
		assert_eq!(found.relevant.len(), 15);
		assert_eq!(found.relevant_matches, 30);

		// 15 sentences, but two matching tokens each: enough for a cache.
		let mut rng = StdRng::seed_from_u64(4);
		model.make_response(&mut rng, "red crabs", &StatementInput::default()).unwrap();
		let cache = dir.path().join("bot").join(io::RESPONSES_DIR).join("red.crabs.sqlite3");
		assert!(cache.is_file());
		let store = Store::open(&cache, model.config().store).unwrap();
		assert_eq!(MarkovIndex::open(&store, "responses").unwrap().len().unwrap(), 15);
	}

	#[test]
	fn test_response_builds_cache() {
		let dir = tempfile::tempdir().unwrap();
		let model = model(dir.path());
		let lines: Vec<String> = (0..40)
			.map(|i| format!("crabs walk sideways on beach number {i} today"))
			.chain((0..40).map(|i| format!("some crabs dance slowly near rock {i}")))
			.collect();
		model.consume_lines(&lines).unwrap();

		let mut rng = StdRng::seed_from_u64(9);
		model.make_response(&mut rng, "crabs", &StatementInput::default()).unwrap();
		let cache = dir.path().join("bot").join(io::RESPONSES_DIR).join("crabs.sqlite3");
		assert!(cache.is_file());

		// A second response reuses the cache without rewriting it.
		model.make_response(&mut rng, "crabs", &StatementInput::default()).unwrap();
		let store = Store::open(&cache, model.config().store).unwrap();
		assert_eq!(MarkovIndex::open(&store, "responses").unwrap().len().unwrap(), 80);
	}
}
