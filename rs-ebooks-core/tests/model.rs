use rand::SeedableRng;
use rand::rngs::StdRng;

use rs_ebooks_core::Config;
use rs_ebooks_core::model::{Model, StatementInput};

const CORPUS: &str = "\
# collected posts
the morning sun warms the quiet harbor
a quiet harbor hides the old fishing boats
old fishing boats dream of the open sea
the open sea sings to the morning gulls
RT someone else said this
@friend the harbor looks lovely today
morning gulls circle above the warm sun
";

#[test]
fn consume_file_and_generate() {
	let dir = tempfile::tempdir().unwrap();
	let corpus = dir.path().join("corpus.txt");
	std::fs::write(&corpus, CORPUS).unwrap();

	let model = Model::open(dir.path().join("model"), "harbor", Config::default()).unwrap();
	let report = model.consume(&corpus).unwrap();
	assert_eq!(report.skipped_lines, 2);
	assert_eq!(report.statements, 5);
	assert_eq!(report.mentions, 1);
	assert!(!model.keywords().unwrap().is_empty());

	let mut rng = StdRng::seed_from_u64(1);
	let mut input = StatementInput::default();
	input.retry_limit = 200;
	input.min_length = 2;
	let mut produced = 0;
	for _ in 0..10 {
		if let Some(text) = model.statement(&mut rng, &input).unwrap() {
			assert!(text.chars().count() <= input.limit());
			assert!(!CORPUS.lines().any(|line| line.contains(&text)));
			produced += 1;
		}
	}
	assert!(produced > 0);
}

#[test]
fn response_falls_back_to_statements() {
	let dir = tempfile::tempdir().unwrap();
	let model = Model::open(dir.path(), "harbor", Config::default()).unwrap();
	model.consume_lines(&CORPUS.lines().collect::<Vec<_>>()).unwrap();

	let mut rng = StdRng::seed_from_u64(2);
	let mut input = StatementInput::default();
	input.retry_limit = 200;
	input.min_length = 2;
	// Too few related sentences for a cache: nothing is written.
	model.make_response(&mut rng, "harbor boats", &input).unwrap();
	assert!(!dir.path().join("harbor").join("responses").exists());
}
