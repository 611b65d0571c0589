use std::collections::HashMap;

/// Common English words ignored when ranking keywords and judging relevance.
const STOPWORDS: &[&str] = &[
	"a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at", "be", "because", "been",
	"before", "but", "by", "can", "could", "did", "do", "does", "for", "from", "get", "got", "had", "has", "have",
	"he", "her", "him", "his", "how", "i", "if", "im", "in", "into", "is", "it", "its", "just", "like", "me", "more",
	"my", "no", "not", "now", "of", "on", "one", "only", "or", "other", "our", "out", "over", "really", "rt", "she",
	"so", "some", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this", "to", "too",
	"up", "us", "very", "was", "we", "were", "what", "when", "which", "who", "will", "with", "would", "you", "your",
];

const ENCLOSERS: &[(char, char)] = &[('(', ')'), ('[', ']'), ('{', '}')];

/// Language collaborator used by `Model` to turn text into tokens and back.
///
/// Every method has a plain-English default, so implementors only override
/// what their language needs.
pub trait Nlp: Send + Sync {
	/// Cleans a raw corpus line: decodes common HTML entities and
	/// straightens typographic quotes.
	fn normalize(&self, text: &str) -> String {
		text.replace("&amp;", "&")
			.replace("&lt;", "<")
			.replace("&gt;", ">")
			.replace("&quot;", "\"")
			.replace("&#39;", "'")
			.replace(['\u{2018}', '\u{2019}'], "'")
			.replace(['\u{201C}', '\u{201D}'], "\"")
			.replace('\u{2026}', "...")
	}

	/// Splits text into sentences at line breaks and at `.`, `!` or `?`
	/// followed by whitespace.
	fn sentences(&self, text: &str) -> Vec<String> {
		let mut out = Vec::new();
		for line in text.lines() {
			let mut current = String::new();
			let mut chars = line.chars().peekable();
			while let Some(c) = chars.next() {
				current.push(c);
				let terminal = matches!(c, '.' | '!' | '?');
				if terminal && chars.peek().is_some_and(|n| n.is_whitespace()) {
					push_trimmed(&mut out, &current);
					current.clear();
				}
			}
			push_trimmed(&mut out, &current);
		}
		out
	}

	/// Splits a sentence on whitespace, detaching leading and trailing
	/// punctuation runs from words.
	fn tokenize(&self, sentence: &str) -> Vec<String> {
		let mut tokens = Vec::new();
		for word in sentence.split_whitespace() {
			let Some(start) = word.find(|c: char| c.is_alphanumeric()) else {
				tokens.push(word.to_owned());
				continue;
			};
			let end = word
				.char_indices()
				.rev()
				.find(|(_, c)| c.is_alphanumeric())
				.map(|(i, c)| i + c.len_utf8())
				.unwrap_or(word.len());

			// Leading '@' and '#' belong to the word.
			let start = word[..start].trim_end_matches(['@', '#']).len();
			if start > 0 {
				tokens.push(word[..start].to_owned());
			}
			tokens.push(word[start..end].to_owned());
			if end < word.len() {
				tokens.push(word[end..].to_owned());
			}
		}
		tokens
	}

	/// Words of `text` ranked by frequency, most frequent first, stopwords
	/// and punctuation excluded.
	fn keywords(&self, text: &str) -> Vec<String> {
		let mut counts: HashMap<String, usize> = HashMap::new();
		for sentence in self.sentences(text) {
			for token in self.tokenize(&sentence) {
				let token = token.to_lowercase();
				if punctuation(&token) || self.stopword(&token) || token.contains("http") || token.starts_with('@') {
					continue;
				}
				*counts.entry(token).or_insert(0) += 1;
			}
		}
		let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
		ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
		ranked.into_iter().map(|(word, _)| word).collect()
	}

	fn stopword(&self, token: &str) -> bool {
		let token = token.to_lowercase();
		STOPWORDS.binary_search(&token.as_str()).is_ok()
	}

	/// Joins tokens back into text, without spaces before punctuation.
	fn reconstruct(&self, tokens: &[String]) -> String {
		let mut text = String::new();
		let mut previous: Option<&str> = None;
		for token in tokens {
			if let Some(previous) = previous {
				if space_between(previous, token) {
					text.push(' ');
				}
			}
			text.push_str(token);
			previous = Some(token.as_str());
		}
		text
	}

	/// True if brackets are unbalanced or a double quote is left open.
	fn unmatched_enclosers(&self, text: &str) -> bool {
		for &(open, close) in ENCLOSERS {
			let mut depth = 0i64;
			for c in text.chars() {
				if c == open {
					depth += 1;
				} else if c == close {
					depth -= 1;
					if depth < 0 {
						return true;
					}
				}
			}
			if depth != 0 {
				return true;
			}
		}
		text.chars().filter(|c| *c == '"').count() % 2 != 0
	}
}

fn push_trimmed(out: &mut Vec<String>, sentence: &str) {
	let trimmed = sentence.trim();
	if !trimmed.is_empty() {
		out.push(trimmed.to_owned());
	}
}

/// True if `token` has no alphanumeric character.
pub fn punctuation(token: &str) -> bool {
	!token.chars().any(char::is_alphanumeric)
}

fn space_between(previous: &str, token: &str) -> bool {
	match (punctuation(previous), punctuation(token)) {
		(_, true) => token.starts_with(['(', '[', '{', '"']),
		(true, false) => !previous.ends_with(['(', '[', '{']),
		(false, false) => true,
	}
}

/// Plain-English `Nlp` with every default behaviour.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleNlp;

impl Nlp for SimpleNlp {}

#[cfg(test)]
mod tests {
	use super::*;

	fn strings(tokens: &[&str]) -> Vec<String> {
		tokens.iter().map(|t| t.to_string()).collect()
	}

	#[test]
	fn test_stopwords_are_sorted() {
		assert!(STOPWORDS.windows(2).all(|w| w[0] < w[1]));
		assert!(SimpleNlp.stopword("The"));
		assert!(!SimpleNlp.stopword("crab"));
	}

	#[test]
	fn test_sentences() {
		let text = "Hello there. How are you?\nFine!  ok then\n\n";
		assert_eq!(SimpleNlp.sentences(text), strings(&["Hello there.", "How are you?", "Fine!", "ok then"]));
	}

	#[test]
	fn test_tokenize_detaches_punctuation() {
		assert_eq!(
			SimpleNlp.tokenize("\"Hi,\" said @bob (twice)... #rust"),
			strings(&["\"", "Hi", ",\"", "said", "@bob", "(", "twice", ")...", "#rust"])
		);
		assert_eq!(SimpleNlp.tokenize("don't stop"), strings(&["don't", "stop"]));
	}

	#[test]
	fn test_reconstruct_round_trips_simple_text() {
		let nlp = SimpleNlp;
		for text in ["Hello, world!", "I like (big) crabs.", "One more thing... ok"] {
			let tokens = nlp.tokenize(text);
			assert_eq!(nlp.reconstruct(&tokens), text);
		}
	}

	#[test]
	fn test_unmatched_enclosers() {
		assert!(!SimpleNlp.unmatched_enclosers("a (b) [c] \"d\""));
		assert!(SimpleNlp.unmatched_enclosers("a (b"));
		assert!(SimpleNlp.unmatched_enclosers("a) (b"));
		assert!(SimpleNlp.unmatched_enclosers("say \"hi"));
	}

	#[test]
	fn test_keywords_rank_by_frequency() {
		let text = "Crabs are great. Crabs walk sideways. The ocean has crabs and fish. Fish swim.";
		let keywords = SimpleNlp.keywords(text);
		assert_eq!(&keywords[..2], &strings(&["crabs", "fish"])[..]);
		assert!(!keywords.contains(&"the".to_owned()));
	}

	#[test]
	fn test_normalize() {
		assert_eq!(SimpleNlp.normalize("Fish &amp; chips \u{201C}now\u{201D}"), "Fish & chips \"now\"");
	}
}
