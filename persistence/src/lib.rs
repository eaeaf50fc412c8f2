//! Named, lazily materialized session state with snapshot based undo/redo
//!
//! A [`Session`] keeps per-key values in a data directory and loads them on
//! first access. Calling [`Session::record`] snapshots the whole persisted
//! state (data, scene, settings, tolerance, version) into a history entry;
//! [`Session::undo`] and [`Session::redo`] move between those entries.
//! Sessions are obtained from a [`SessionRegistry`], which keeps a single
//! live instance per name.

pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod layout;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use codec::Codec;
pub use codec::CodecRegistry;
pub use config::SessionConfig;
pub use error::Result;
pub use error::SessionError;
pub use history::DEFAULT_DEPTH;
pub use history::History;
pub use history::HistoryRecord;
pub use layout::SessionLayout;
pub use registry::RegistryMode;
pub use registry::SessionHandle;
pub use registry::SessionRegistry;
pub use session::Session;
pub use snapshot::DirectorySnapshotter;
pub use store::DataStore;
pub use types::Format;
pub use types::GeometryBlob;
pub use types::MeshBlob;
pub use types::Scene;
pub use types::SessionValue;
pub use types::Settings;
pub use types::Tolerance;

/// Version marker written to every session directory
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
