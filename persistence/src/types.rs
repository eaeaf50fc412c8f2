//! Core value types held by a session

use crate::error::Result;
use crate::error::SessionError;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// On-disk format of a stored value, resolved once when the value is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Generic structured data
    Json,
    /// Solid geometry exchange file
    Step,
    /// Legacy mesh format, recognized but not supported
    Obj,
}

impl Format {
    /// Lookup order used when materializing a key from the data directory
    pub const ALL: [Format; 3] = [Format::Json, Format::Step, Format::Obj];

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Step => "stp",
            Self::Obj => "obj",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(extension))
    }

    /// Resolve the format of a file from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Self::from_extension(extension)
            .ok_or_else(|| SessionError::unsupported(extension, "no codec is registered"))
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ".{}", self.extension())
    }
}

/// Opaque solid geometry carried as STEP text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryBlob {
    step: String,
}

impl GeometryBlob {
    pub fn from_step_text(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }

    pub fn step_text(&self) -> &str {
        &self.step
    }

    /// Read a geometry blob from a STEP file
    pub fn from_step(path: &Path) -> Result<Self> {
        let step = fs::read_to_string(path)
            .map_err(|source| SessionError::io("reading STEP file", path, source))?;
        Ok(Self { step })
    }

    /// Write this geometry blob to a STEP file
    pub fn to_step(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.step)
            .map_err(|source| SessionError::io("writing STEP file", path, source))
    }
}

/// Legacy OBJ mesh payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshBlob {
    pub obj: String,
}

/// A value stored under a session key
#[derive(Debug, Clone, PartialEq)]
pub enum SessionValue {
    Generic(Value),
    Geometry(GeometryBlob),
    Mesh(MeshBlob),
}

impl SessionValue {
    /// Serialize any value into the generic kind
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Generic(serde_json::to_value(value)?))
    }

    pub const fn format(&self) -> Format {
        match self {
            Self::Generic(_) => Format::Json,
            Self::Geometry(_) => Format::Step,
            Self::Mesh(_) => Format::Obj,
        }
    }

    pub const fn as_generic(&self) -> Option<&Value> {
        match self {
            Self::Generic(value) => Some(value),
            _ => None,
        }
    }

    pub const fn as_geometry(&self) -> Option<&GeometryBlob> {
        match self {
            Self::Geometry(blob) => Some(blob),
            _ => None,
        }
    }

    /// Deserialize a generic value into a concrete type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Option<Result<T>> {
        self.as_generic()
            .map(|value| T::deserialize(value).map_err(SessionError::from))
    }
}

impl From<Value> for SessionValue {
    fn from(value: Value) -> Self {
        Self::Generic(value)
    }
}

impl From<GeometryBlob> for SessionValue {
    fn from(blob: GeometryBlob) -> Self {
        Self::Geometry(blob)
    }
}

impl From<MeshBlob> for SessionValue {
    fn from(mesh: MeshBlob) -> Self {
        Self::Mesh(mesh)
    }
}

/// Opaque scene description, persisted as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scene(Value);

impl Scene {
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self(Value::Object(Map::new()))
    }
}

/// Per-session behavior switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Dump the full state when the session leaves its registry
    pub autosave: bool,
    /// Persist every `set` to the data directory immediately
    pub autosync: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autosave: false,
            autosync: true,
        }
    }
}

/// Geometric tolerances in effect for the session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub absolute: f64,
    pub relative: f64,
    pub angular: f64,
    pub approximation: f64,
    pub precision: u32,
    pub lineardeflection: f64,
    pub angulardeflection: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: 1e-9,
            relative: 1e-6,
            angular: 1e-6,
            approximation: 1e-3,
            precision: 3,
            lineardeflection: 1e-3,
            angulardeflection: 1e-1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(Format::from_extension("json"), Some(Format::Json));
        assert_eq!(Format::from_extension("STP"), Some(Format::Step));
        assert_eq!(Format::from_extension("obj"), Some(Format::Obj));
        assert_eq!(Format::from_extension("yaml"), None);
    }

    #[test]
    fn test_format_from_path_rejects_unknown() {
        let err = Format::from_path(Path::new("data/thing.yaml")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedFormat { ref extension, .. } if extension == "yaml"
        ));
    }

    #[test]
    fn test_value_format_follows_kind() {
        assert_eq!(SessionValue::from(json!(1)).format(), Format::Json);
        assert_eq!(
            SessionValue::from(GeometryBlob::from_step_text("ISO-10303-21;")).format(),
            Format::Step
        );
        assert_eq!(
            SessionValue::from(MeshBlob { obj: String::new() }).format(),
            Format::Obj
        );
    }

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: Settings = serde_json::from_value(json!({"autosave": true})).unwrap();
        assert!(settings.autosave);
        assert!(settings.autosync);
    }
}
