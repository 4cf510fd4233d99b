use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::SessionError;

use super::token::{RefreshCredential, Session};

const SESSION_FILE: &str = "session.json";
const CREDENTIAL_FILE: &str = "refresh_credential.json";
const FILE_VERSION: u32 = 1;

/// Durable storage for the session artifact and the refresh credential.
///
/// The two are stored separately: the credential outlives individual access
/// tokens and is never read by request code.
pub trait SessionStore: Send + Sync {
    fn load_session(&self) -> Result<Option<Session>, SessionError>;
    fn save_session(&self, session: &Session) -> Result<(), SessionError>;
    fn clear_session(&self) -> Result<(), SessionError>;

    fn load_credential(&self) -> Result<Option<RefreshCredential>, SessionError>;
    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), SessionError>;
    fn clear_credential(&self) -> Result<(), SessionError>;
}

/// Configuration for file-backed session storage.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub base_dir: PathBuf,
}

impl SessionStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_tenure_dir()
    }
}

/// File-backed store writing one JSON document per artifact.
///
/// Writes go through a temp file and a rename, and files are `0600` on unix.
///
/// # Example
/// ```no_run
/// use tenure::auth::{FileSessionStore, RefreshCredential, SessionStore, SessionStoreConfig};
///
/// let store = FileSessionStore::new(SessionStoreConfig::new("/tmp/tenure".into()));
/// store.save_credential(&RefreshCredential::new("refresh"))?;
/// # Ok::<(), tenure::error::SessionError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    base_dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_tenure_dir(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, SessionError> {
        let path = self.base_dir.join(name);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let file: StoredFile<T> = serde_json::from_str(&raw)?;
        if file.version != FILE_VERSION {
            return Err(SessionError::Serialization(format!(
                "unsupported file version {} at {}",
                file.version,
                path.display()
            )));
        }
        Ok(Some(file.value))
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), SessionError> {
        let file = StoredFile {
            version: FILE_VERSION,
            saved_at: Utc::now(),
            value,
        };
        let serialized = serde_json::to_vec_pretty(&file)?;
        atomic_write(&self.base_dir.join(name), &serialized)
    }

    fn remove(&self, name: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.base_dir.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load_session(&self) -> Result<Option<Session>, SessionError> {
        self.read(SESSION_FILE)
    }

    fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        self.write(SESSION_FILE, session)
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.remove(SESSION_FILE)
    }

    fn load_credential(&self) -> Result<Option<RefreshCredential>, SessionError> {
        self.read(CREDENTIAL_FILE)
    }

    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), SessionError> {
        self.write(CREDENTIAL_FILE, credential)
    }

    fn clear_credential(&self) -> Result<(), SessionError> {
        self.remove(CREDENTIAL_FILE)
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    session: Option<Session>,
    credential: Option<RefreshCredential>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> Result<T, SessionError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| SessionError::Io("session store lock poisoned".to_string()))?;
        Ok(f(&mut inner))
    }
}

impl SessionStore for MemorySessionStore {
    fn load_session(&self) -> Result<Option<Session>, SessionError> {
        self.with_inner(|inner| inner.session.clone())
    }

    fn save_session(&self, session: &Session) -> Result<(), SessionError> {
        self.with_inner(|inner| inner.session = Some(session.clone()))
    }

    fn clear_session(&self) -> Result<(), SessionError> {
        self.with_inner(|inner| inner.session = None)
    }

    fn load_credential(&self) -> Result<Option<RefreshCredential>, SessionError> {
        self.with_inner(|inner| inner.credential.clone())
    }

    fn save_credential(&self, credential: &RefreshCredential) -> Result<(), SessionError> {
        self.with_inner(|inner| inner.credential = Some(credential.clone()))
    }

    fn clear_credential(&self) -> Result<(), SessionError> {
        self.with_inner(|inner| inner.credential = None)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFile<T> {
    version: u32,
    saved_at: DateTime<Utc>,
    value: T,
}

fn default_tenure_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".tenure"))
        .unwrap_or_else(|| PathBuf::from(".tenure"))
}

/// Replace `path` with `data` through a sibling temp file, so a crash never
/// leaves a half-written session behind. Temp files are created `0600`.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SessionError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| SessionError::Io(err.error.to_string()))?;
    Ok(())
}
