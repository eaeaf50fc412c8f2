//! Session construction options

use crate::codec::CodecRegistry;
use crate::error::Result;
use crate::error::SessionError;
use crate::types::Scene;
use crate::types::Settings;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for opening a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session name; required unless the registry derives one
    pub name: Option<String>,
    /// Directory holding `<name>.session/` (defaults to the working directory)
    pub basedir: PathBuf,
    /// Maximum history length (defaults to 53)
    pub depth: Option<usize>,
    /// Wipe any existing session directory before creating the layout
    pub delete_existing: bool,
    /// Initial scene; loaded from disk or defaulted when absent
    pub scene: Option<Scene>,
    /// Initial settings; loaded from disk or defaulted when absent
    pub settings: Option<Settings>,
    /// Codec set used for data values (defaults to JSON, STEP and OBJ)
    pub codecs: Option<Arc<CodecRegistry>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let basedir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        Self {
            name: None,
            basedir,
            depth: None,
            delete_existing: false,
            scene: None,
            settings: None,
            codecs: None,
        }
    }
}

impl SessionConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self::default().with_name(name)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = basedir.into();
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn delete_existing(mut self, delete_existing: bool) -> Self {
        self.delete_existing = delete_existing;
        self
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = Some(codecs);
        self
    }

    /// Parse a TOML document with optional `[session]` and `[settings]` tables
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(input)?;
        Ok(file.into_config(None))
    }

    /// Like [`SessionConfig::from_toml_str`]; a relative `basedir` is
    /// resolved against the directory containing `path`
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let input = fs::read_to_string(path)
            .map_err(|source| SessionError::io("reading config file", path, source))?;
        let file: FileConfig = toml::from_str(&input)?;
        Ok(file.into_config(path.parent()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    session: SessionSection,
    settings: Option<Settings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SessionSection {
    name: Option<String>,
    basedir: Option<PathBuf>,
    depth: Option<usize>,
    delete_existing: bool,
}

impl FileConfig {
    fn into_config(self, relative_to: Option<&Path>) -> SessionConfig {
        let mut config = SessionConfig::default();
        let SessionSection {
            name,
            basedir,
            depth,
            delete_existing,
        } = self.session;

        config.name = name;
        if let Some(basedir) = basedir {
            config.basedir = match relative_to {
                Some(root) if basedir.is_relative() => root.join(basedir),
                _ => basedir,
            };
        }
        config.depth = depth;
        config.delete_existing = delete_existing;
        config.settings = self.settings;
        config
    }
}
