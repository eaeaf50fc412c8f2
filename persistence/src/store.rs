//! Lazy per-key cache over the session data directory

use crate::codec::CodecRegistry;
use crate::error::Result;
use crate::error::SessionError;
use crate::types::Format;
use crate::types::SessionValue;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A resident value together with the format it is persisted in
#[derive(Debug, Clone)]
struct Entry {
    value: SessionValue,
    format: Format,
}

impl Entry {
    fn new(value: SessionValue) -> Self {
        let format = value.format();
        Self { value, format }
    }
}

/// Values keyed by name, materialized from `<data_dir>/<key>.<ext>` on first access
#[derive(Debug)]
pub struct DataStore {
    data_dir: PathBuf,
    codecs: Arc<CodecRegistry>,
    entries: HashMap<String, Entry>,
}

impl DataStore {
    pub fn new(data_dir: impl Into<PathBuf>, codecs: Arc<CodecRegistry>) -> Self {
        Self {
            data_dir: data_dir.into(),
            codecs,
            entries: HashMap::new(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_for(&self, key: &str, format: Format) -> PathBuf {
        self.data_dir.join(format!("{key}.{}", format.extension()))
    }

    /// Return the value for `key`, loading it from disk on a cache miss.
    /// A key with neither a cached value nor a backing file yields `None`.
    pub fn get(&mut self, key: &str) -> Result<Option<&SessionValue>> {
        validate_key(key)?;
        if !self.entries.contains_key(key) {
            match self.materialize(key)? {
                Some(entry) => {
                    self.entries.insert(key.to_string(), entry);
                }
                None => return Ok(None),
            }
        }
        Ok(self.entries.get(key).map(|entry| &entry.value))
    }

    /// Like [`DataStore::get`], falling back to `default` without caching it
    pub fn get_or(&mut self, key: &str, default: SessionValue) -> Result<SessionValue> {
        Ok(self.get(key)?.cloned().unwrap_or(default))
    }

    /// Strict lookup: a missing key is an error
    pub fn require(&mut self, key: &str) -> Result<&SessionValue> {
        self.get(key)?.ok_or_else(|| SessionError::KeyNotFound {
            key: key.to_string(),
        })
    }

    pub fn contains(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Cache `value` under `key`; with `autosync` it is written to disk first
    pub fn set(&mut self, key: &str, value: SessionValue, autosync: bool) -> Result<()> {
        validate_key(key)?;
        let entry = Entry::new(value);
        if autosync {
            self.persist(key, &entry)?;
        }
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    /// Return the value for `key`, storing `factory()` first if it is absent
    pub fn setdefault<F>(&mut self, key: &str, factory: F, autosync: bool) -> Result<&SessionValue>
    where
        F: FnOnce() -> SessionValue,
    {
        if self.get(key)?.is_none() {
            self.set(key, factory(), autosync)?;
        }
        self.require(key)
    }

    /// Drop `key` from the cache and remove its files in every format
    pub fn delete(&mut self, key: &str) -> Result<Option<SessionValue>> {
        validate_key(key)?;
        let removed = self.entries.remove(key).map(|entry| entry.value);
        for format in Format::ALL {
            self.remove_file(&self.file_for(key, format))?;
        }
        Ok(removed)
    }

    /// Persist every resident value
    pub fn dump(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|source| {
            SessionError::io("creating data directory", &self.data_dir, source)
        })?;
        for (key, entry) in &self.entries {
            self.persist(key, entry)?;
        }
        Ok(())
    }

    /// Forget every resident value; the next access reloads from disk
    pub fn clear_cache(&mut self) {
        self.entries.clear();
    }

    /// Keys currently held in memory
    pub fn resident_keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn materialize(&self, key: &str) -> Result<Option<Entry>> {
        for format in Format::ALL {
            let path = self.file_for(key, format);
            if path.is_file() {
                debug!("Materializing '{}' from {:?}", key, path);
                let value = self.codecs.codec(format)?.load(&path)?;
                return Ok(Some(Entry { value, format }));
            }
        }
        Ok(None)
    }

    fn persist(&self, key: &str, entry: &Entry) -> Result<()> {
        let path = self.file_for(key, entry.format);
        self.codecs.codec(entry.format)?.save(&entry.value, &path)?;

        // A key lives in exactly one format on disk
        for format in Format::ALL {
            if format != entry.format {
                self.remove_file(&self.file_for(key, format))?;
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::io("removing data file", path, source)),
        }
    }
}

/// Keys become file names, so they must not escape the data directory
fn validate_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SessionError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}
