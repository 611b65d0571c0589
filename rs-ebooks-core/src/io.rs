use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::{fs, io};

/// File holding a model's store inside its directory.
pub const MODEL_FILE: &str = "model.sqlite3";

/// Sub-directory of a model holding its response caches.
pub const RESPONSES_DIR: &str = "responses";

/// Reads a text file and returns all its lines as a `Vec<String>`.
///
/// - Reads the entire file into memory
/// - Splits on `\n` / `\r\n`
pub fn read_file<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut contents = String::new();
	File::open(filename)?.read_to_string(&mut contents)?;
	Ok(contents.lines().map(str::to_owned).collect())
}

/// Lists all files with a given extension in a directory, sorted.
///
/// Returns file names only (no paths).
pub fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> io::Result<Vec<String>> {
	let mut files = Vec::new();

	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let path = entry.path();

		if path.is_file() && path.extension() == Some(std::ffi::OsStr::new(extension)) {
			if let Some(name) = path.file_name() {
				files.push(name.to_string_lossy().to_string());
			}
		}
	}

	files.sort();
	Ok(files)
}

/// Directory of the model `name` under `root`.
pub fn model_dir<P: AsRef<Path>>(root: P, name: &str) -> PathBuf {
	root.as_ref().join(name)
}

/// Lists the models stored under `root`: sub-directories holding a
/// `model.sqlite3` file. A missing root has no models.
pub fn list_models<P: AsRef<Path>>(root: P) -> io::Result<Vec<String>> {
	let root = root.as_ref();
	if !root.is_dir() {
		return Ok(Vec::new());
	}

	let mut models = Vec::new();
	for entry in fs::read_dir(root)? {
		let path = entry?.path();
		if path.join(MODEL_FILE).is_file() {
			if let Some(name) = path.file_name() {
				models.push(name.to_string_lossy().to_string());
			}
		}
	}

	models.sort();
	Ok(models)
}

/// Turns folded input tokens into a file-name-safe cache key.
///
/// Non-alphanumeric characters become `_`; tokens are joined with `.`.
pub fn slug<S: AsRef<str>>(tokens: &[S]) -> String {
	tokens
		.iter()
		.map(|t| t.as_ref().chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect::<String>())
		.collect::<Vec<_>>()
		.join(".")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_list_files_and_models() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("b.txt"), "x").unwrap();
		fs::write(dir.path().join("a.txt"), "x").unwrap();
		fs::write(dir.path().join("c.json"), "x").unwrap();
		assert_eq!(list_files(dir.path(), "txt").unwrap(), vec!["a.txt", "b.txt"]);

		let root = dir.path().join("model");
		assert!(list_models(&root).unwrap().is_empty());
		fs::create_dir_all(model_dir(&root, "bot")).unwrap();
		fs::create_dir_all(model_dir(&root, "empty")).unwrap();
		fs::write(model_dir(&root, "bot").join(MODEL_FILE), "").unwrap();
		assert_eq!(list_models(&root).unwrap(), vec!["bot"]);
	}

	#[test]
	fn test_slug() {
		assert_eq!(slug(&["what's", "up?"]), "what_s.up_");
		assert_eq!(slug::<&str>(&[]), "");
	}
}
