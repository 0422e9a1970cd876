// src/storage/meta.rs

//! Persistent per-source metadata store.
//!
//! Maps a case-normalized source URI to its last known change-detection
//! state. Backed by an embedded sled tree so committed state survives
//! process restarts; the external supervisor restarts the engine on fatal
//! errors and change detection must pick up where it left off.

use std::path::Path;
use std::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::SourceMetadata;

/// Durable map from source URI to [`SourceMetadata`].
///
/// Constructed once at process start and handed to every component that
/// needs it. Methods take `&self`; the store is shared across workers
/// behind an `Arc`.
pub struct MetadataStore {
    db: sled::Db,
    /// Serializes every read-compare-write so two workers fetching the
    /// same source cannot both observe "unchanged" or write stale state.
    update_lock: Mutex<()>,
    /// Tombstoned keys, applied at the next `save()`.
    pending_removals: Mutex<Vec<String>>,
}

impl MetadataStore {
    /// Open (or create) a store rooted at the given directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            update_lock: Mutex::new(()),
            pending_removals: Mutex::new(Vec::new()),
        })
    }

    /// Open a throwaway store that leaves nothing on disk.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            update_lock: Mutex::new(()),
            pending_removals: Mutex::new(Vec::new()),
        })
    }

    /// URIs are compared case-insensitively by convention of the upstream
    /// servers, so the lowered form is the sole key.
    fn normalize(source_id: &str) -> String {
        source_id.to_lowercase()
    }

    fn decode(bytes: &[u8]) -> Result<SourceMetadata> {
        serde_json::from_slice(bytes)
            .map_err(|e| AppError::store(format!("corrupt metadata record: {e}")))
    }

    fn encode(meta: &SourceMetadata) -> Result<Vec<u8>> {
        serde_json::to_vec(meta).map_err(|e| AppError::store(format!("encode metadata: {e}")))
    }

    fn read(&self, key: &str) -> Result<SourceMetadata> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Self::decode(&bytes),
            None => Ok(SourceMetadata::default()),
        }
    }

    fn write(&self, key: &str, meta: &SourceMetadata) -> Result<()> {
        self.db.insert(key.as_bytes(), Self::encode(meta)?)?;
        Ok(())
    }

    /// Fetch the stored metadata, or the default record if unknown.
    pub fn get(&self, source_id: &str) -> Result<SourceMetadata> {
        self.read(&Self::normalize(source_id))
    }

    /// Whether this source has ever been recorded.
    pub fn contains(&self, source_id: &str) -> Result<bool> {
        Ok(self.db.contains_key(Self::normalize(source_id).as_bytes())?)
    }

    /// Replace the stored record wholesale.
    pub fn put(&self, source_id: &str, meta: &SourceMetadata) -> Result<()> {
        self.write(&Self::normalize(source_id), meta)
    }

    /// Compare-and-store: write `candidate` only if its fingerprint differs
    /// from the stored one. Returns whether a write happened.
    ///
    /// This is the single primitive for change detection; it couples the
    /// comparison and the write into one step so concurrent fetches of the
    /// same source cannot lose updates.
    pub fn update_if_changed(&self, source_id: &str, candidate: &SourceMetadata) -> Result<bool> {
        let key = Self::normalize(source_id);
        let _guard = self.update_lock.lock().expect("metadata update lock poisoned");
        let current = self.read(&key)?;
        if current.fingerprint == candidate.fingerprint {
            return Ok(false);
        }
        self.write(&key, candidate)?;
        Ok(true)
    }

    /// Fingerprint-only variant of [`update_if_changed`]: keeps every other
    /// stored field as it was.
    ///
    /// [`update_if_changed`]: Self::update_if_changed
    pub fn update_fingerprint_if_changed(&self, source_id: &str, fingerprint: &str) -> Result<bool> {
        let key = Self::normalize(source_id);
        let _guard = self.update_lock.lock().expect("metadata update lock poisoned");
        let mut current = self.read(&key)?;
        if current.fingerprint == fingerprint {
            return Ok(false);
        }
        current.fingerprint = fingerprint.to_string();
        self.write(&key, &current)?;
        Ok(true)
    }

    /// Fold a sink correlation id into the stored record.
    ///
    /// Runs under the update lock and replaces the whole record, so the
    /// replace/delete discipline of the store is preserved.
    pub fn record_correlation(&self, source_id: &str, correlation_id: &str) -> Result<()> {
        let key = Self::normalize(source_id);
        let _guard = self.update_lock.lock().expect("metadata update lock poisoned");
        let mut current = self.read(&key)?;
        current.correlation_id = correlation_id.to_string();
        self.write(&key, &current)
    }

    /// Tombstone one entry; takes effect at the next `save()`.
    pub fn remove(&self, source_id: &str) {
        self.pending_removals
            .lock()
            .expect("removal list lock poisoned")
            .push(Self::normalize(source_id));
    }

    /// Tombstone several entries; take effect at the next `save()`.
    pub fn remove_all<I, S>(&self, source_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pending = self
            .pending_removals
            .lock()
            .expect("removal list lock poisoned");
        for id in source_ids {
            pending.push(Self::normalize(id.as_ref()));
        }
    }

    /// Durably commit all pending mutations.
    ///
    /// Applies tombstones as one batch, then flushes the tree. Safe to call
    /// repeatedly; everything written before the call is durable after it
    /// returns.
    pub fn save(&self) -> Result<()> {
        let drained: Vec<String> = {
            let mut pending = self
                .pending_removals
                .lock()
                .expect("removal list lock poisoned");
            pending.drain(..).collect()
        };
        if !drained.is_empty() {
            let mut batch = sled::Batch::default();
            for key in drained {
                batch.remove(key.as_bytes());
            }
            self.db.apply_batch(batch)?;
        }
        self.db.flush()?;
        Ok(())
    }

    /// Number of recorded sources.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// All recorded source ids, in key order.
    pub fn source_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(self.db.len());
        for entry in self.db.iter() {
            let (key, _) = entry?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }
}

impl Drop for MetadataStore {
    fn drop(&mut self) {
        // Committed writes must not be torn by process exit.
        let _ = self.db.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(fingerprint: &str) -> SourceMetadata {
        SourceMetadata {
            fingerprint: fingerprint.to_string(),
            validator: "\"etag-1\"".to_string(),
            ..SourceMetadata::default()
        }
    }

    #[test]
    fn test_get_unknown_returns_default() {
        let store = MetadataStore::temporary().unwrap();
        let meta = store.get("https://example.com/a").unwrap();
        assert_eq!(meta, SourceMetadata::default());
        assert!(!store.contains("https://example.com/a").unwrap());
    }

    #[test]
    fn test_put_and_get_roundtrip() {
        let store = MetadataStore::temporary().unwrap();
        let meta = sample("abc123");
        store.put("https://example.com/a", &meta).unwrap();
        assert_eq!(store.get("https://example.com/a").unwrap(), meta);
        assert!(store.contains("https://example.com/a").unwrap());
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let store = MetadataStore::temporary().unwrap();
        store.put("https://Example.COM/Path", &sample("abc")).unwrap();
        assert_eq!(store.get("https://example.com/path").unwrap().fingerprint, "abc");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_if_changed_writes_once() {
        let store = MetadataStore::temporary().unwrap();
        let candidate = sample("fp-1");

        assert!(store.update_if_changed("https://example.com", &candidate).unwrap());
        let before = store.get("https://example.com").unwrap();

        // Same fingerprint again: no write, stored record untouched.
        let mut same = sample("fp-1");
        same.validator = "\"etag-2\"".to_string();
        assert!(!store.update_if_changed("https://example.com", &same).unwrap());
        assert_eq!(store.get("https://example.com").unwrap(), before);

        // Different fingerprint: replaced wholesale.
        assert!(store.update_if_changed("https://example.com", &sample("fp-2")).unwrap());
        assert_eq!(store.get("https://example.com").unwrap().fingerprint, "fp-2");
    }

    #[test]
    fn test_update_fingerprint_preserves_other_fields() {
        let store = MetadataStore::temporary().unwrap();
        let mut meta = sample("fp-1");
        meta.correlation_id = "corr-9".to_string();
        store.put("https://example.com", &meta).unwrap();

        assert!(store.update_fingerprint_if_changed("https://example.com", "fp-2").unwrap());
        let stored = store.get("https://example.com").unwrap();
        assert_eq!(stored.fingerprint, "fp-2");
        assert_eq!(stored.correlation_id, "corr-9");
        assert_eq!(stored.validator, "\"etag-1\"");
    }

    #[test]
    fn test_record_correlation_is_whole_record_replace() {
        let store = MetadataStore::temporary().unwrap();
        store.put("https://example.com", &sample("fp-1")).unwrap();
        store.record_correlation("https://example.com", "msg-42").unwrap();
        let stored = store.get("https://example.com").unwrap();
        assert_eq!(stored.correlation_id, "msg-42");
        assert_eq!(stored.fingerprint, "fp-1");
    }

    #[test]
    fn test_removals_apply_only_at_save() {
        let store = MetadataStore::temporary().unwrap();
        store.put("https://example.com/a", &sample("a")).unwrap();
        store.put("https://example.com/b", &sample("b")).unwrap();

        store.remove("https://example.com/a");
        // Tombstone pending: reads still see the record.
        assert!(store.contains("https://example.com/a").unwrap());

        store.save().unwrap();
        assert!(!store.contains("https://example.com/a").unwrap());
        assert!(store.contains("https://example.com/b").unwrap());
    }

    #[test]
    fn test_remove_all_and_repeated_save() {
        let store = MetadataStore::temporary().unwrap();
        for i in 0..4 {
            store.put(&format!("https://example.com/{i}"), &sample("x")).unwrap();
        }
        store.remove_all(["https://example.com/0", "https://example.com/2"]);
        store.save().unwrap();
        store.save().unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_source_ids_ordered() {
        let store = MetadataStore::temporary().unwrap();
        store.put("https://b.example.com", &sample("b")).unwrap();
        store.put("https://a.example.com", &sample("a")).unwrap();
        store.put("https://c.example.com", &sample("c")).unwrap();
        assert_eq!(
            store.source_ids().unwrap(),
            vec![
                "https://a.example.com",
                "https://b.example.com",
                "https://c.example.com",
            ]
        );
    }

    #[test]
    fn test_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = MetadataStore::open(tmp.path()).unwrap();
            store.put("https://example.com", &sample("fp-1")).unwrap();
            store.save().unwrap();
        }
        let store = MetadataStore::open(tmp.path()).unwrap();
        assert_eq!(store.get("https://example.com").unwrap().fingerprint, "fp-1");
    }
}
