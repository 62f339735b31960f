use crate::data::{Completion, CompletionCache, TextGenerator};
use crate::error::ServiceError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

/// Hex-encoded SHA-256 of `text`.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Completion cache stored as plain files.
///
/// Layout: `{folder}/{model_hash}/{key}.cache`, where `model_hash` is the
/// hash of the model name so switching models never serves stale answers.
#[derive(Debug, Clone)]
pub struct FileCompletionCache {
    folder: PathBuf,
    model_hash: String,
}

impl FileCompletionCache {
    pub fn new(folder: impl Into<PathBuf>, model: &str) -> Self {
        Self {
            folder: folder.into(),
            model_hash: sha256_hex(model),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.folder.join(&self.model_hash)
    }

    /// Keys are hex hashes, so they are already safe file names.
    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir().join(format!("{}.cache", key))
    }
}

impl CompletionCache for FileCompletionCache {
    fn lookup(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.cache_path(key)).ok()
    }

    fn store(&self, key: &str, completion: &str) {
        let dir = self.cache_dir();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, "failed to create cache directory {}", dir.display());
            return;
        }
        let path = self.cache_path(key);
        if let Err(e) = fs::write(&path, completion) {
            tracing::warn!(error = %e, "failed to write cache file {}", path.display());
        }
    }
}

/// A text generator that answers repeated prompts from a cache.
pub struct CachedGenerator<G: TextGenerator, C: CompletionCache> {
    inner: G,
    cache: C,
}

impl<G: TextGenerator, C: CompletionCache> CachedGenerator<G, C> {
    pub fn new(inner: G, cache: C) -> Self {
        Self { inner, cache }
    }
}

impl<G: TextGenerator, C: CompletionCache> TextGenerator for CachedGenerator<G, C> {
    fn generate(&self, prompt: &str) -> Result<Completion, ServiceError> {
        let key = sha256_hex(prompt);
        if let Some(text) = self.cache.lookup(&key) {
            tracing::debug!(key = %key, "completion served from cache");
            return Ok(Completion::new(text));
        }

        let completion = self.inner.generate(prompt)?;
        if !completion.text.trim().is_empty() {
            self.cache.store(&key, &completion.text);
        }
        Ok(completion)
    }
}
