use rand::SeedableRng;
use rand::rngs::StdRng;

use rs_ebooks_core::config::{GenerationConfig, StoreConfig};
use rs_ebooks_core::model::{Generator, MarkovIndex, Mode, Outcome, Tiki};
use rs_ebooks_core::storage::Store;

fn index(sentences: &[&[Tiki]]) -> MarkovIndex {
	let store = Store::open_in_memory(StoreConfig::default()).unwrap();
	let index = MarkovIndex::open(&store, "statements").unwrap();
	for sentence in sentences {
		index.insert(sentence).unwrap();
	}
	index
}

#[test]
fn splices_shared_bigram() {
	let index = index(&[&[1, 2, 3, 4], &[5, 2, 3, 6]]);
	let generator = Generator::new(&index, GenerationConfig::default());
	for seed in 0..8 {
		let mut rng = StdRng::seed_from_u64(seed);
		let outcome = generator.generate_from(&mut rng, 0, 1, Mode::Bigram).unwrap();
		assert_eq!(outcome, Outcome::Generated(vec![1, 2, 3, 6]));
	}
}

#[test]
fn zero_passes_returns_a_stored_sentence() {
	let index = index(&[&[1, 2, 3, 4], &[5, 2, 3, 6]]);
	let generator = Generator::new(&index, GenerationConfig::default());
	let mut rng = StdRng::seed_from_u64(42);
	for _ in 0..20 {
		let tikis = generator.generate(&mut rng, 0, Mode::Unigram).unwrap().into_tikis().unwrap();
		assert!(index.contains(&tikis).unwrap());
	}
}

#[test]
fn stuck_detection() {
	let index = index(&[&[1, 2, 3, 4, 5], &[9, 2, 3, 4, 5], &[8, 2, 3, 4, 5]]);
	let config = GenerationConfig { attempt_budget: 1, ..GenerationConfig::default() };
	let generator = Generator::new(&index, config);
	let mut rng = StdRng::seed_from_u64(0);
	assert_eq!(generator.generate_from(&mut rng, 0, 3, Mode::Bigram).unwrap(), Outcome::Stuck);
}

#[test]
fn alternatives_are_capped() {
	let mut sentences: Vec<Vec<Tiki>> = Vec::new();
	for i in 0..50 {
		sentences.push(vec![300 + i, 2, 3, 100 + i, 200 + i]);
	}
	let refs: Vec<&[Tiki]> = sentences.iter().map(Vec::as_slice).collect();
	let index = index(&refs);
	let config = GenerationConfig { alternatives_cap: 2, ..GenerationConfig::default() };
	let generator = Generator::new(&index, config);
	let mut rng = StdRng::seed_from_u64(8);
	let tikis = generator.generate_from(&mut rng, 0, 1, Mode::Bigram).unwrap().into_tikis().unwrap();
	assert_eq!(&tikis[..3], &[300, 2, 3]);
	assert_eq!(tikis.len(), 5);
	assert_ne!(tikis, vec![300, 2, 3, 100, 200]);
}
