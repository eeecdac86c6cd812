use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use harvest_engine::{record_filename, AtomicFileWriter, Credentials, PersistError};
use harvest_logging::harvest_info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0:?} is not a usable session name")]
    InvalidName(String),
    #[error("no session {name:?} in {path:?}; run `feed-harvest login` first")]
    Missing { name: String, path: PathBuf },
    #[error("could not read session file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session file {path:?} is corrupt: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("could not encode session: {0}")]
    Encode(String),
    #[error("could not write session file: {0}")]
    Persist(#[from] PersistError),
    #[error("could not restrict session file permissions: {0}")]
    Permissions(#[source] io::Error),
}

/// Credentials and API location remembered by `login`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub created_utc: DateTime<Utc>,
}

impl StoredSession {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            created_utc: Utc::now(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSession")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("created_utc", &self.created_utc)
            .finish()
    }
}

/// Named sessions, one RON file each, under one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> Result<PathBuf, SessionError> {
        Ok(self.dir.join(file_name(name)?))
    }

    pub fn load(&self, name: &str) -> Result<StoredSession, SessionError> {
        let path = self.path(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SessionError::Missing {
                    name: name.to_string(),
                    path,
                });
            }
            Err(source) => return Err(SessionError::Read { path, source }),
        };
        ron::from_str(&content).map_err(|err| SessionError::Parse {
            path,
            message: err.to_string(),
        })
    }

    /// Like [`SessionStore::load`], but a missing session is `None`.
    pub fn load_optional(&self, name: &str) -> Result<Option<StoredSession>, SessionError> {
        match self.load(name) {
            Ok(session) => Ok(Some(session)),
            Err(SessionError::Missing { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn save(&self, name: &str, session: &StoredSession) -> Result<PathBuf, SessionError> {
        let file_name = file_name(name)?;
        let pretty = ron::ser::PrettyConfig::new();
        let content = ron::ser::to_string_pretty(session, pretty)
            .map_err(|err| SessionError::Encode(err.to_string()))?;

        let writer = AtomicFileWriter::new(self.dir.clone());
        let path = writer.write(&file_name, content.as_bytes())?;
        restrict_to_owner(&path)?;
        harvest_info!("Stored session {:?} in {:?}", name, path);
        Ok(path)
    }
}

fn file_name(name: &str) -> Result<String, SessionError> {
    record_filename(name)
        .map(|stem| format!("{stem}.ron"))
        .ok_or_else(|| SessionError::InvalidName(name.to_string()))
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(SessionError::Permissions)
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<(), SessionError> {
    Ok(())
}
