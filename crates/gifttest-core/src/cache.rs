//! Persistent cache of generated explanations.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::model::{Question, QuestionId};

/// File name used inside the data directory.
pub const CACHE_FILE: &str = "explanations.json";

const CACHE_FORMAT: &str = "gifttest-explanations";
const CACHE_VERSION: u32 = 1;

/// Identifies one explanation.
///
/// The question digest keeps banks whose ids collide apart, and the prompt
/// hash invalidates entries when the prompt configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub question_id: QuestionId,
    pub question_digest: String,
    pub prompt_hash: String,
    pub provider: String,
    pub model: String,
}

impl CacheKey {
    pub fn new(question: &Question, prompt_hash: &str, provider: &str, model: &str) -> Self {
        Self {
            question_id: question.id,
            question_digest: question_digest(question),
            prompt_hash: prompt_hash.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub text: String,
    pub generated_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// blake3 over the stem and every answer, correctness included.
pub fn question_digest(question: &Question) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(question.stem.as_bytes());
    for answer in &question.answers {
        hasher.update(&[0, u8::from(answer.is_correct)]);
        hasher.update(answer.text.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// blake3 over the system prompt and the prompt template.
pub fn prompt_hash(system_prompt: &str, prompt_template: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(system_prompt.as_bytes());
    hasher.update(&[0]);
    hasher.update(prompt_template.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[derive(Serialize, Deserialize)]
struct CacheDocument {
    format: String,
    version: u32,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    entry: CacheEntry,
}

#[derive(Debug)]
pub struct ExplanationCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    persist_lock: Mutex<()>,
}

impl ExplanationCache {
    /// Load the cache file. A missing or unreadable file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match decode(&content) {
                Ok(entries) => entries,
                Err(reason) => {
                    tracing::warn!(path = %path.display(), "ignoring explanation cache: {reason}");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "cannot read explanation cache: {e}");
                HashMap::new()
            }
        };
        tracing::debug!(entries = entries.len(), "explanation cache loaded");

        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store an entry and rewrite the cache file.
    ///
    /// The entry stays cached in memory even if the file cannot be written.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry) -> Result<(), PersistenceError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
        self.persist()
    }

    /// Drop one entry, e.g. to force regeneration.
    pub fn remove(&self, key: &CacheKey) -> Result<Option<CacheEntry>, PersistenceError> {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if removed.is_some() {
            self.persist()?;
        }
        Ok(removed)
    }

    fn persist(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let document = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            CacheDocument {
                format: CACHE_FORMAT.to_string(),
                version: CACHE_VERSION,
                entries: entries
                    .iter()
                    .map(|(key, entry)| StoredEntry {
                        key: key.clone(),
                        entry: entry.clone(),
                    })
                    .collect(),
            }
        };
        let json = serde_json::to_vec_pretty(&document).map_err(|source| PersistenceError::Encode {
            what: "explanation cache",
            source,
        })?;

        write_atomic(path, &json)?;
        tracing::info!(entries = document.entries.len(), "explanation cache written");
        Ok(())
    }
}

fn decode(content: &str) -> Result<HashMap<CacheKey, CacheEntry>, String> {
    let document: CacheDocument = serde_json::from_str(content).map_err(|e| e.to_string())?;
    if document.format != CACHE_FORMAT || document.version != CACHE_VERSION {
        return Err(format!(
            "unsupported format {} v{}",
            document.format, document.version
        ));
    }
    Ok(document
        .entries
        .into_iter()
        .map(|stored| (stored.key, stored.entry))
        .collect())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PersistenceError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| PersistenceError::io(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| PersistenceError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PersistenceError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn question(text: &str) -> Question {
        let (bank, _) = parse(text, "t");
        bank.by_id(QuestionId(1)).unwrap().clone()
    }

    fn entry(text: &str) -> CacheEntry {
        CacheEntry {
            text: text.into(),
            generated_at: Utc::now(),
            elapsed_ms: 1200,
        }
    }

    #[test]
    fn keys_separate_banks_and_prompts() {
        let a = question("::Q:: Capital of Portugal? {=Lisboa ~Porto}");
        let b = question("::Q:: Capital of Spain? {=Madrid ~Porto}");
        assert_eq!(a.id, b.id);

        let hash = prompt_hash("sys", "template");
        assert_ne!(
            CacheKey::new(&a, &hash, "groq", "m"),
            CacheKey::new(&b, &hash, "groq", "m")
        );
        assert_ne!(hash, prompt_hash("sys", "other template"));
        assert_ne!(prompt_hash("ab", "c"), prompt_hash("a", "bc"));
        assert_eq!(question_digest(&a), question_digest(&a.clone()));
    }

    #[test]
    fn entries_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);
        let q = question("::Q:: 1+1? {=2 ~3}");
        let key = CacheKey::new(&q, &prompt_hash("s", "t"), "groq", "llama");

        let cache = ExplanationCache::load(&path);
        assert!(cache.is_empty());
        cache.insert(key.clone(), entry("Because.")).unwrap();

        let reloaded = ExplanationCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(&key).unwrap().text, "Because.");
        assert_eq!(reloaded.get(&key).unwrap().elapsed_ms, 1200);

        assert!(reloaded.remove(&key).unwrap().is_some());
        assert!(ExplanationCache::load(&path).is_empty());
    }

    #[test]
    fn corrupt_file_is_an_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);
        fs::write(&path, "not json").unwrap();
        assert!(ExplanationCache::load(&path).is_empty());

        fs::write(
            &path,
            r#"{"format":"gifttest-explanations","version":7,"entries":[]}"#,
        )
        .unwrap();
        assert!(ExplanationCache::load(&path).is_empty());
    }

    #[test]
    fn write_failure_keeps_entry_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        // Parent "directory" is a regular file.
        let cache = ExplanationCache::load(blocker.join(CACHE_FILE));

        let q = question("::Q:: 1+1? {=2 ~3}");
        let key = CacheKey::new(&q, "h", "groq", "m");
        assert!(cache.insert(key.clone(), entry("kept")).is_err());
        assert_eq!(cache.get(&key).unwrap().text, "kept");
    }
}
