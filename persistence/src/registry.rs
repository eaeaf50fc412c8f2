//! Registry enforcing one live session instance per name
//!
//! Registries are plain values owned by the caller. [`SessionRegistry::global`]
//! provides a lazily created process-wide one for code that needs it.

use crate::config::SessionConfig;
use crate::error::Result;
use crate::error::SessionError;
use crate::layout::find_session_name;
use crate::session::Session;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;
use std::sync::PoisonError;
use tracing::debug;
use tracing::info;

static GLOBAL_REGISTRY: OnceLock<Mutex<SessionRegistry>> = OnceLock::new();

/// Shared handle to a live session
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Lock the session. A panic while holding the lock does not make the
    /// session unusable.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether both handles refer to the same session instance
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// How names map onto live sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistryMode {
    /// One session per distinct name; a name is mandatory
    #[default]
    PerName,
    /// At most one session overall; the name may be derived from `basedir`
    Single,
}

/// Owner of all live sessions
#[derive(Debug, Default)]
pub struct SessionRegistry {
    mode: RegistryMode,
    sessions: HashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(mode: RegistryMode) -> Self {
        Self {
            mode,
            sessions: HashMap::new(),
        }
    }

    /// Process-wide per-name registry
    pub fn global() -> MutexGuard<'static, SessionRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Mutex::new(SessionRegistry::new(RegistryMode::PerName)))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn mode(&self) -> RegistryMode {
        self.mode
    }

    /// Return the live session for the configured name, creating it first if
    /// needed. An existing session is returned unchanged; the rest of
    /// `config` is then ignored.
    pub fn open(&mut self, config: SessionConfig) -> Result<SessionHandle> {
        let requested = config.name.clone().filter(|name| !name.is_empty());

        let name = match self.mode {
            RegistryMode::PerName => {
                requested.ok_or_else(|| SessionError::Identity("A session name is required.".into()))?
            }
            RegistryMode::Single => {
                if let Some((live, handle)) = self.sessions.iter().next() {
                    return match requested {
                        Some(name) if name != *live => Err(SessionError::Identity(format!(
                            "Session '{live}' is already active; cannot open '{name}'"
                        ))),
                        _ => Ok(handle.clone()),
                    };
                }
                match requested {
                    Some(name) => name,
                    None => derive_name(&config.basedir)?,
                }
            }
        };

        if let Some(handle) = self.sessions.get(&name) {
            debug!("Reusing live session '{}'", name);
            return Ok(handle.clone());
        }

        validate_name(&name)?;
        let handle = SessionHandle::new(Session::open(name.clone(), config)?);
        self.sessions.insert(name, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<SessionHandle> {
        self.sessions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Names of all live sessions, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop the session called `name` from the registry, autosaving it if
    /// its settings ask for that. Outstanding handles stay usable.
    pub fn remove(&mut self, name: &str) -> Option<SessionHandle> {
        let handle = self.sessions.remove(name)?;
        handle.lock().close();
        info!("Removed session '{}' from registry", name);
        Some(handle)
    }

    /// Remove every session
    pub fn reset(&mut self) {
        for name in self.names() {
            self.remove(&name);
        }
    }
}

/// Name of an existing session directory in `basedir`, else `basedir`'s own name
fn derive_name(basedir: &Path) -> Result<String> {
    if let Some(name) = find_session_name(basedir) {
        return Ok(name);
    }
    // `.` and `..` have no file name of their own
    let resolved = fs::canonicalize(basedir)
        .or_else(|_| std::path::absolute(basedir))
        .map_err(|source| SessionError::io("resolving base directory", basedir, source))?;
    resolved
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            SessionError::Identity(format!(
                "Cannot derive a session name from {}",
                basedir.display()
            ))
        })
}

/// Names become directory names
fn validate_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(SessionError::Identity(format!(
            "Invalid session name: {name:?}"
        )));
    }
    Ok(())
}
