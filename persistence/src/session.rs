//! A named session: lazily loaded data, scene, settings and undo/redo history

use crate::VERSION;
use crate::codec::CodecRegistry;
use crate::codec::read_json;
use crate::codec::write_json;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::error::SessionError;
use crate::history::History;
use crate::history::HistoryRecord;
use crate::layout::SessionLayout;
use crate::layout::remove_dir_quietly;
use crate::snapshot::DirectorySnapshotter;
use crate::store::DataStore;
use crate::types::Scene;
use crate::types::SessionValue;
use crate::types::Settings;
use crate::types::Tolerance;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Working-set state of one named session
///
/// Sessions are handed out by [`crate::SessionRegistry`], which guarantees a
/// single live instance per name.
#[derive(Debug)]
pub struct Session {
    name: String,
    timestamp: DateTime<Utc>,
    layout: SessionLayout,
    store: DataStore,
    history: History,
    snapshotter: DirectorySnapshotter,
    scene: Scene,
    settings: Settings,
    tolerance: Tolerance,
}

impl Session {
    /// Create the on-disk layout for `name` and resume whatever state it holds
    pub(crate) fn open(name: String, config: SessionConfig) -> Result<Self> {
        let layout = SessionLayout::new(&config.basedir, &name);
        if config.delete_existing {
            info!("Deleting existing session directory {:?}", layout.session_dir());
            layout.delete_dirs()?;
        }
        layout.create_dirs()?;

        let mut history = History::load(&layout.history_file())?.unwrap_or_default();
        if let Some(depth) = config.depth {
            for record in history.set_depth(depth)? {
                remove_dir_quietly(&layout.record_dir(&record.id));
            }
        }
        // Loading may repair or trim; snapshots are pruned against this copy
        history.save(&layout.history_file())?;

        let scene = match config.scene {
            Some(scene) => scene,
            None => load_optional(&layout.scene_file())?.unwrap_or_default(),
        };
        let settings = match config.settings {
            Some(settings) => settings,
            None => load_optional(&layout.settings_file())?.unwrap_or_default(),
        };
        let tolerance = load_optional(&layout.tolerance_file())?.unwrap_or_default();

        let codecs = config
            .codecs
            .unwrap_or_else(|| Arc::new(CodecRegistry::default()));

        let session = Self {
            timestamp: Utc::now(),
            store: DataStore::new(layout.data_dir(), codecs),
            snapshotter: DirectorySnapshotter::new(layout.temp_dir()),
            name,
            layout,
            history,
            scene,
            settings,
            tolerance,
        };
        session.prune_snapshots();
        session.clear_temp();

        info!(
            "Opened session '{}' at {:?} ({} records)",
            session.name,
            session.layout.session_dir(),
            session.history.len()
        );
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creation time of this in-memory instance
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn session_dir(&self) -> &Path {
        self.layout.session_dir()
    }

    pub const fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    /// Recorded `(id, label)` pairs, oldest first
    pub fn history(&self) -> &[HistoryRecord] {
        self.history.records()
    }

    /// Index into [`Session::history`] of the live state, `-1` before the first record
    pub fn current(&self) -> i64 {
        self.history.cursor()
    }

    pub const fn depth(&self) -> usize {
        self.history.depth()
    }

    pub const fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn set_scene(&mut self, scene: Scene) {
        self.scene = scene;
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    pub const fn tolerance(&self) -> &Tolerance {
        &self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: Tolerance) {
        self.tolerance = tolerance;
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Value for `key`, loading it from the data directory on first access
    pub fn get(&mut self, key: &str) -> Result<Option<&SessionValue>> {
        self.store.get(key)
    }

    /// Value for `key`, or `default` when it is neither cached nor on disk
    pub fn get_or(&mut self, key: &str, default: impl Into<SessionValue>) -> Result<SessionValue> {
        self.store.get_or(key, default.into())
    }

    /// Strict lookup; fails with [`SessionError::KeyNotFound`]
    pub fn require(&mut self, key: &str) -> Result<&SessionValue> {
        self.store.require(key)
    }

    /// Deserialize a generic value into `T`; geometry values yield `None`
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.store.get(key)? {
            Some(value) => value.deserialize().transpose(),
            None => Ok(None),
        }
    }

    pub fn contains(&mut self, key: &str) -> Result<bool> {
        self.store.contains(key)
    }

    /// Store `value` under `key`, persisting it right away when autosync is on
    pub fn set(&mut self, key: &str, value: impl Into<SessionValue>) -> Result<()> {
        self.store.set(key, value.into(), self.settings.autosync)
    }

    /// Serialize `value` and store it as a generic value
    pub fn set_as<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.set(key, SessionValue::from_serializable(value)?)
    }

    /// Value for `key`, storing `factory()` first when absent
    pub fn setdefault<F, V>(&mut self, key: &str, factory: F) -> Result<&SessionValue>
    where
        F: FnOnce() -> V,
        V: Into<SessionValue>,
    {
        let autosync = self.settings.autosync;
        self.store.setdefault(key, || factory().into(), autosync)
    }

    pub fn delete(&mut self, key: &str) -> Result<Option<SessionValue>> {
        self.store.delete(key)
    }

    /// Read a JSON file outside the session, optionally picking its member
    /// `name`. A missing member yields `default`.
    pub fn get_from_file(
        path: &Path,
        name: Option<&str>,
        default: Option<Value>,
    ) -> Result<Option<Value>> {
        let data: Value = read_json(path)?;
        Ok(match name {
            Some(name) => data.get(name).cloned().or(default),
            None => Some(data),
        })
    }

    /// Store the value [`Session::get_from_file`] finds under `key` and
    /// return it. Nothing is stored when neither the member nor a default exists.
    pub fn set_from_file(
        &mut self,
        key: &str,
        path: &Path,
        name: Option<&str>,
        default: Option<Value>,
    ) -> Result<Option<Value>> {
        let value = Self::get_from_file(path, name, default)?;
        if let Some(value) = &value {
            debug!("Setting '{}' from {:?}", key, path);
            self.set(key, value.clone())?;
        }
        Ok(value)
    }

    // =========================================================================
    // Complete state
    // =========================================================================

    /// Persist data, scene, settings, tolerance, version and history
    pub fn dump(&self) -> Result<()> {
        self.store.dump()?;
        write_json(&self.scene, &self.layout.scene_file())?;
        write_json(&self.settings, &self.layout.settings_file())?;
        write_json(&self.tolerance, &self.layout.tolerance_file())?;
        write_json(VERSION, &self.layout.version_file())?;
        self.history.save(&self.layout.history_file())?;
        debug!("Dumped session '{}'", self.name);
        Ok(())
    }

    /// Discard in-memory state and reload everything from the session directory
    pub fn load(&mut self) -> Result<()> {
        self.reload_live_state()?;
        if let Some(history) = History::load(&self.layout.history_file())? {
            self.history = history;
        }
        self.prune_snapshots();
        Ok(())
    }

    fn reload_live_state(&mut self) -> Result<()> {
        self.store.clear_cache();
        if let Some(scene) = load_optional(&self.layout.scene_file())? {
            self.scene = scene;
        }
        if let Some(settings) = load_optional(&self.layout.settings_file())? {
            self.settings = settings;
        }
        if let Some(tolerance) = load_optional(&self.layout.tolerance_file())? {
            self.tolerance = tolerance;
        }
        Ok(())
    }

    /// Remove the session directory; the in-memory state is kept
    pub fn delete_dirs(&self) -> Result<()> {
        self.layout.delete_dirs()
    }

    pub fn create_dirs(&self) -> Result<()> {
        self.layout.create_dirs()
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Snapshot the full live state as a new history entry labelled `label`
    pub fn record(&mut self, label: &str) -> Result<()> {
        self.dump()?;

        let layout = &self.layout;
        let id = self
            .history
            .new_record_id(Utc::now(), |id| layout.record_dir(id).exists());
        let folder = layout.record_dir(&id);
        self.snapshotter
            .capture(&layout.data_dir(), &layout.aux_files(), &folder)?;

        let discarded = self.history.record(HistoryRecord::new(id.clone(), label));
        for record in &discarded {
            debug!("Discarding snapshot {} ({})", record.id, record.label);
            remove_dir_quietly(&self.layout.record_dir(&record.id));
        }
        self.history.save(&self.layout.history_file())?;

        info!(
            "Recorded '{}' as {} ({}/{})",
            label,
            id,
            self.history.len(),
            self.history.depth()
        );
        Ok(())
    }

    /// Move one step back in history. Returns `false` when there is nothing to
    /// undo or the target snapshot is missing; live state is then unchanged.
    pub fn undo(&mut self) -> Result<bool> {
        match self.history.current() {
            None => {
                info!("Nothing to undo!");
                Ok(false)
            }
            Some(0) => {
                info!("Nothing more to undo!");
                Ok(false)
            }
            Some(index) => self.move_to(index - 1),
        }
    }

    /// Move one step forward in history. Returns `false` at the newest entry
    /// or when the target snapshot is missing.
    pub fn redo(&mut self) -> Result<bool> {
        match self.history.next() {
            None => {
                info!("Nothing more to redo!");
                Ok(false)
            }
            Some(index) => self.move_to(index),
        }
    }

    fn move_to(&mut self, index: usize) -> Result<bool> {
        let Some(record) = self.history.get(index).cloned() else {
            return Ok(false);
        };
        info!("Loading: {} ({})", record.label, record.id);

        let folder = self.layout.record_dir(&record.id);
        match self.snapshotter.restore(
            &folder,
            &self.layout.data_dir(),
            &self.layout.aux_files(),
        ) {
            Ok(()) => {}
            Err(SessionError::SnapshotMissing { path }) => {
                warn!("Cannot load '{}': snapshot missing at {:?}", record.label, path);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.history.set_current(index);
        self.reload_live_state()?;
        self.history.save(&self.layout.history_file())?;
        Ok(true)
    }

    /// Forget every history entry and delete its snapshot
    pub fn clear_history(&mut self) -> Result<()> {
        for record in self.history.clear() {
            remove_dir_quietly(&self.layout.record_dir(&record.id));
        }
        self.history.save(&self.layout.history_file())?;
        info!("Cleared history of session '{}'", self.name);
        Ok(())
    }

    /// Change the maximum history length, evicting the oldest entries now
    pub fn set_depth(&mut self, depth: usize) -> Result<()> {
        for record in self.history.set_depth(depth)? {
            remove_dir_quietly(&self.layout.record_dir(&record.id));
        }
        self.history.save(&self.layout.history_file())
    }

    /// Called when the session leaves its registry
    pub(crate) fn close(&self) {
        if self.settings.autosave
            && let Err(e) = self.dump()
        {
            warn!("Autosave of session '{}' failed: {}", self.name, e);
        }
    }

    /// Delete snapshot directories no history entry refers to
    fn prune_snapshots(&self) {
        let records_dir = self.layout.records_dir();
        let Ok(entries) = fs::read_dir(&records_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let referenced = file_name
                .to_str()
                .is_some_and(|id| self.history.contains_id(id));
            if !referenced {
                debug!("Pruning orphan snapshot {:?}", entry.path());
                remove_dir_quietly(&entry.path());
            }
        }
    }

    /// Remove staging leftovers of an interrupted restore
    fn clear_temp(&self) {
        let Ok(entries) = fs::read_dir(self.layout.temp_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                remove_dir_quietly(&path);
            } else if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.store.resident_keys().collect();
        keys.sort_unstable();
        writeln!(f, "Data: {keys:?}")?;
        writeln!(f, "Tolerance: {:?}", self.tolerance)?;
        writeln!(f, "Settings: {:?}", self.settings)?;
        writeln!(f, "Scene: {}", self.scene.as_value())?;
        write!(f, "History: {:?}", self.history.records())
    }
}

fn load_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if path.is_file() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}
