//! Configuration for stores, generation and ingestion.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One mebibyte, the default growth alignment.
pub const MIB: u64 = 1024 * 1024;

/// Default file looked up by `Config::load` when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rs-ebooks.yml";

/// Capacity and growth policy of a `Store`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
	/// Capacity given to a fresh store, in bytes.
	#[serde(default = "default_initial_capacity")]
	pub initial_capacity: u64,

	/// Multiplicative factor applied on every `CapacityExceeded`.
	#[serde(default = "default_growth_factor")]
	pub growth_factor: f64,

	/// Capacities are always rounded up to a multiple of this many bytes.
	#[serde(default = "default_alignment")]
	pub alignment: u64,

	/// How many grow + retry cycles a single logical write may take.
	#[serde(default = "default_max_grow_retries")]
	pub max_grow_retries: usize,

	/// Number of records fetched per cursor round trip.
	#[serde(default = "default_cursor_batch")]
	pub cursor_batch: usize,
}

fn default_initial_capacity() -> u64 {
	8 * MIB
}

fn default_growth_factor() -> f64 {
	1.4
}

fn default_alignment() -> u64 {
	MIB
}

fn default_max_grow_retries() -> usize {
	32
}

fn default_cursor_batch() -> usize {
	256
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			initial_capacity: default_initial_capacity(),
			growth_factor: default_growth_factor(),
			alignment: default_alignment(),
			max_grow_retries: default_max_grow_retries(),
			cursor_batch: default_cursor_batch(),
		}
	}
}

impl StoreConfig {
	/// Requires a finite growth factor above 1 and nonzero sizes.
	///
	/// # Errors
	/// `Error::InvalidInput` naming the offending setting.
	pub fn validate(&self) -> Result<()> {
		if !(self.growth_factor > 1.0) || !self.growth_factor.is_finite() {
			return Err(Error::InvalidInput(format!(
				"growth_factor must be a finite number above 1.0, got {}",
				self.growth_factor
			)));
		}
		if self.alignment == 0 {
			return Err(Error::InvalidInput("alignment must be positive".to_owned()));
		}
		if self.initial_capacity == 0 {
			return Err(Error::InvalidInput("initial_capacity must be positive".to_owned()));
		}
		if self.cursor_batch == 0 {
			return Err(Error::InvalidInput("cursor_batch must be positive".to_owned()));
		}
		Ok(())
	}
}

/// Bounds on the work done by one `Generator::generate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
	/// Alternatives kept per variation site; larger lists are sampled down.
	#[serde(default = "default_alternatives_cap")]
	pub alternatives_cap: usize,

	/// Rejected candidates tolerated at one variation site before the pass
	/// is abandoned.
	#[serde(default = "default_attempt_budget")]
	pub attempt_budget: usize,
}

fn default_alternatives_cap() -> usize {
	10_000
}

fn default_attempt_budget() -> usize {
	10_000
}

impl Default for GenerationConfig {
	fn default() -> Self {
		Self {
			alternatives_cap: default_alternatives_cap(),
			attempt_budget: default_attempt_budget(),
		}
	}
}

impl GenerationConfig {
	/// Rejects a zero alternatives cap or attempt budget.
	pub fn validate(&self) -> Result<()> {
		if self.alternatives_cap == 0 || self.attempt_budget == 0 {
			return Err(Error::InvalidInput(
				"alternatives_cap and attempt_budget must be positive".to_owned(),
			));
		}
		Ok(())
	}
}

/// Top-level configuration of a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub store: StoreConfig,

	#[serde(default)]
	pub generation: GenerationConfig,

	/// Sentences written per ingestion transaction.
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
}

fn default_batch_size() -> usize {
	1000
}

impl Default for Config {
	fn default() -> Self {
		Self {
			store: StoreConfig::default(),
			generation: GenerationConfig::default(),
			batch_size: default_batch_size(),
		}
	}
}

impl Config {
	/// Loads the config from `path`, or from `rs-ebooks.yml` in the working
	/// directory, or falls back to defaults.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		if let Some(config_path) = path {
			return Self::read(config_path);
		}

		let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
		if fallback.exists() {
			return Self::read(&fallback);
		}

		Ok(Config::default())
	}

	fn read(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)?;
		let config: Config = serde_yaml::from_str(&content)?;
		config.validate()?;
		Ok(config)
	}

	/// Saves the config as YAML.
	pub fn save(&self, path: &Path) -> Result<()> {
		let content = serde_yaml::to_string(self)?;
		std::fs::write(path, content)?;
		Ok(())
	}

	/// Validates every section.
	///
	/// # Errors
	/// The first `Error::InvalidInput` found.
	pub fn validate(&self) -> Result<()> {
		self.store.validate()?;
		self.generation.validate()?;
		if self.batch_size == 0 {
			return Err(Error::InvalidInput("batch_size must be positive".to_owned()));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = Config::default();
		assert_eq!(config.store.growth_factor, 1.4);
		assert_eq!(config.store.alignment, MIB);
		assert_eq!(config.generation.alternatives_cap, 10_000);
		assert_eq!(config.generation.attempt_budget, 10_000);
		assert_eq!(config.batch_size, 1000);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_partial_yaml_uses_defaults() {
		let config: Config = serde_yaml::from_str("store:\n  growth_factor: 2.0\nbatch_size: 10\n").unwrap();
		assert_eq!(config.store.growth_factor, 2.0);
		assert_eq!(config.store.alignment, MIB);
		assert_eq!(config.batch_size, 10);
		assert_eq!(config.generation, GenerationConfig::default());
	}

	#[test]
	fn test_rejects_shrinking_growth() {
		let mut config = Config::default();
		config.store.growth_factor = 1.0;
		assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
		config.store.growth_factor = f64::NAN;
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.yml");
		let mut config = Config::default();
		config.generation.attempt_budget = 42;
		config.save(&path).unwrap();

		let loaded = Config::load(Some(&path)).unwrap();
		assert_eq!(loaded, config);
	}
}
