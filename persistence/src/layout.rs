//! On-disk layout of a session directory

use crate::error::Result;
use crate::error::SessionError;
use crate::types::Format;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::warn;

pub const SESSION_DIR_SUFFIX: &str = "session";
pub const DATA_DIR: &str = "data";
pub const TEMP_DIR: &str = "__temp";
pub const RECORDS_DIR: &str = "__records";
pub const HISTORY_FILE: &str = "_history.json";
pub const SCENE_FILE: &str = "_scene.json";
pub const SETTINGS_FILE: &str = "_settings.json";
pub const TOLERANCE_FILE: &str = "_tolerance.json";
pub const VERSION_FILE: &str = "_version.json";

/// Files captured next to the data directory in every snapshot
pub const AUX_FILES: [&str; 4] = [SCENE_FILE, SETTINGS_FILE, TOLERANCE_FILE, VERSION_FILE];

/// Paths of one session rooted at `<basedir>/<name>.session/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(basedir: &Path, name: &str) -> Self {
        Self {
            root: basedir.join(format!("{name}.{SESSION_DIR_SUFFIX}")),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    pub fn record_dir(&self, record_id: &str) -> PathBuf {
        self.records_dir().join(record_id)
    }

    pub fn history_file(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn scene_file(&self) -> PathBuf {
        self.root.join(SCENE_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn tolerance_file(&self) -> PathBuf {
        self.root.join(TOLERANCE_FILE)
    }

    pub fn version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    pub fn aux_files(&self) -> Vec<PathBuf> {
        AUX_FILES.iter().map(|name| self.root.join(name)).collect()
    }

    pub fn data_file(&self, key: &str, format: Format) -> PathBuf {
        self.data_dir().join(format!("{key}.{}", format.extension()))
    }

    /// Create every directory of the layout
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.temp_dir(),
            self.records_dir(),
            self.data_dir(),
        ] {
            fs::create_dir_all(&dir)
                .map_err(|source| SessionError::io("creating session directory", &dir, source))?;
        }
        Ok(())
    }

    /// Remove the whole session directory
    pub fn delete_dirs(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::io(
                "removing session directory",
                &self.root,
                source,
            )),
        }
    }
}

/// Best-effort recursive removal; failures are logged
pub(crate) fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove {:?}: {}", path, e);
    }
}

/// Find the name of the first `<name>.session` directory inside `basedir`
pub fn find_session_name(basedir: &Path) -> Option<String> {
    let entries = fs::read_dir(basedir).ok()?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let file_name = file_name.to_str()?;
            let name = file_name.strip_suffix(&format!(".{SESSION_DIR_SUFFIX}"))?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect();
    names.sort();
    names.into_iter().next()
}
