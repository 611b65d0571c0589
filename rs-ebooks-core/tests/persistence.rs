use rs_ebooks_core::config::StoreConfig;
use rs_ebooks_core::model::MarkovIndex;
use rs_ebooks_core::storage::Store;
use rs_ebooks_core::{Config, Error};

fn tiny() -> StoreConfig {
	StoreConfig { initial_capacity: 16 * 1024, alignment: 16 * 1024, ..StoreConfig::default() }
}

#[test]
fn inserts_grow_a_full_store() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path().join("grow.sqlite3"), tiny()).unwrap();
	let index = MarkovIndex::open(&store, "statements").unwrap();
	let start = store.capacity().unwrap();

	let sentences: Vec<Vec<u32>> = (0..400u32).map(|i| vec![i + 1, i + 2, i + 3, i % 7 + 1]).collect();
	for sentence in &sentences {
		assert!(index.insert(sentence).unwrap());
	}

	assert!(store.capacity().unwrap() > start);
	assert_eq!(index.len().unwrap(), 400);
	for (i, sentence) in sentences.iter().enumerate() {
		assert_eq!(index.sentence(i as u64).unwrap().as_ref(), Some(sentence));
	}
}

#[test]
fn bounded_growth_reports_exhaustion() {
	let config = StoreConfig { max_grow_retries: 0, ..tiny() };
	let store = Store::open_in_memory(config).unwrap();
	let index = MarkovIndex::open(&store, "statements").unwrap();
	let mut result = Ok(true);
	for i in 0..2000u32 {
		result = index.insert(&[i + 1, i + 2, i + 3]);
		if result.is_err() {
			break;
		}
	}
	assert!(matches!(result, Err(Error::GrowthExhausted(0))));
	// Earlier sentences are intact.
	assert_eq!(index.sentence(0).unwrap(), Some(vec![1, 2, 3]));
}

#[test]
fn duplicate_sentences_across_reopen() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("model.sqlite3");
	let config = Config::default();
	{
		let store = Store::open(&path, config.store).unwrap();
		let index = MarkovIndex::open(&store, "statements").unwrap();
		assert!(index.insert(&[1, 2, 3]).unwrap());
	}
	let store = Store::open(&path, config.store).unwrap();
	let index = MarkovIndex::open(&store, "statements").unwrap();
	assert!(!index.insert(&[1, 2, 3]).unwrap());
	assert!(index.verbatim(&[1, 2, 3]).unwrap());
	assert!(!index.verbatim(&[1, 3]).unwrap());
	assert_eq!(index.len().unwrap(), 1);
}
