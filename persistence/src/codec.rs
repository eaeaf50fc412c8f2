//! Pluggable load/save strategies, one per value format

use crate::error::Result;
use crate::error::SessionError;
use crate::types::Format;
use crate::types::GeometryBlob;
use crate::types::SessionValue;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// Load/save strategy for a single on-disk format
pub trait Codec: Send + Sync {
    /// Format handled by this codec
    fn format(&self) -> Format;

    /// Load a value from `path`
    fn load(&self, path: &Path) -> Result<SessionValue>;

    /// Save `value` to `path`
    fn save(&self, value: &SessionValue, path: &Path) -> Result<()>;
}

/// Generic structured data codec
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> Format {
        Format::Json
    }

    fn load(&self, path: &Path) -> Result<SessionValue> {
        read_json(path).map(SessionValue::Generic)
    }

    fn save(&self, value: &SessionValue, path: &Path) -> Result<()> {
        match value {
            SessionValue::Generic(value) => write_json(value, path),
            other => Err(SessionError::unsupported(
                Format::Json.extension(),
                mismatch_reason(other),
            )),
        }
    }
}

/// Solid geometry codec, delegating to the blob's own STEP routines
#[derive(Debug, Default, Clone, Copy)]
pub struct StepCodec;

impl Codec for StepCodec {
    fn format(&self) -> Format {
        Format::Step
    }

    fn load(&self, path: &Path) -> Result<SessionValue> {
        GeometryBlob::from_step(path).map(SessionValue::Geometry)
    }

    fn save(&self, value: &SessionValue, path: &Path) -> Result<()> {
        match value {
            SessionValue::Geometry(blob) => blob.to_step(path),
            other => Err(SessionError::unsupported(
                Format::Step.extension(),
                mismatch_reason(other),
            )),
        }
    }
}

/// Legacy mesh codec; every operation fails
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjCodec;

impl Codec for ObjCodec {
    fn format(&self) -> Format {
        Format::Obj
    }

    fn load(&self, _path: &Path) -> Result<SessionValue> {
        Err(SessionError::unsupported(
            Format::Obj.extension(),
            "loading is not implemented",
        ))
    }

    fn save(&self, _value: &SessionValue, _path: &Path) -> Result<()> {
        Err(SessionError::unsupported(
            Format::Obj.extension(),
            "saving is not implemented",
        ))
    }
}

fn mismatch_reason(value: &SessionValue) -> &'static str {
    match value {
        SessionValue::Generic(_) => "generic values are stored as JSON",
        SessionValue::Geometry(_) => "geometry values are stored as STEP",
        SessionValue::Mesh(_) => "mesh values have no working codec",
    }
}

/// Codecs keyed by the format tag stored alongside each value
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<Format, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// An empty registry; every lookup fails until codecs are registered
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register `codec` for its format, replacing any previous one
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.format(), codec);
    }

    pub fn codec(&self, format: Format) -> Result<&dyn Codec> {
        self.codecs
            .get(&format)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| SessionError::unsupported(format.extension(), "no codec is registered"))
    }

    /// Load the value at `path`, choosing the codec by file extension
    pub fn load(&self, path: &Path) -> Result<SessionValue> {
        let format = Format::from_path(path)?;
        debug!("Loading {} value from {:?}", format, path);
        self.codec(format)?.load(path)
    }

    /// Save `value` to `path` with the codec for the value's own format
    pub fn save(&self, value: &SessionValue, path: &Path) -> Result<()> {
        let format = value.format();
        debug!("Saving {} value to {:?}", format, path);
        self.codec(format)?.save(value, path)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(StepCodec));
        registry.register(Arc::new(ObjCodec));
        registry
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formats: Vec<_> = self.codecs.keys().map(|format| format.extension()).collect();
        formats.sort_unstable();
        f.debug_struct("CodecRegistry")
            .field("formats", &formats)
            .finish()
    }
}

/// Read a JSON document into `T`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file =
        File::open(path).map_err(|source| SessionError::io("opening JSON file", path, source))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write `value` as JSON, replacing `path` only once the write succeeded
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    // Write to temporary file first
    let temp = NamedTempFile::new_in(dir)
        .map_err(|source| SessionError::io("creating temporary file", dir, source))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer
            .flush()
            .map_err(|source| SessionError::io("writing JSON file", path, source))?;
    }

    // Atomic rename
    temp.persist(path)
        .map_err(|err| SessionError::io("replacing JSON file", path, err.error))?;
    Ok(())
}
