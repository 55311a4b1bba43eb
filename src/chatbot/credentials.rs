//! File-backed credential store (`<auth_dir>/creds.json`).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

const CREDS_FILE: &str = "creds.json";

#[derive(Debug)]
pub enum CredentialError {
    Io { path: PathBuf, source: std::io::Error },
    Json { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "credential file '{}': {}", path.display(), source)
            }
            Self::Json { path, source } => {
                write!(f, "malformed credential file '{}': {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for CredentialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
        }
    }
}

pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stored credentials, or `None` if nothing has been saved yet.
    pub fn load<C: DeserializeOwned>(&self) -> Result<Option<C>, CredentialError> {
        let path = self.path();
        if !path.exists() {
            info!("No stored credentials in {}", self.dir.display());
            return Ok(None);
        }

        let json = std::fs::read_to_string(&path)
            .map_err(|e| CredentialError::Io { path: path.clone(), source: e })?;
        let creds = serde_json::from_str(&json)
            .map_err(|e| CredentialError::Json { path: path.clone(), source: e })?;

        info!("Loaded credentials from {}", path.display());
        Ok(Some(creds))
    }

    /// Write credentials atomically (temp file + rename).
    pub fn save<C: Serialize>(&self, creds: &C) -> Result<(), CredentialError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CredentialError::Io { path: self.dir.clone(), source: e })?;

        let path = self.path();
        let json = serde_json::to_string_pretty(creds)
            .map_err(|e| CredentialError::Json { path: path.clone(), source: e })?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| CredentialError::Io { path: tmp.clone(), source: e })?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| CredentialError::Io { path: path.clone(), source: e })?;

        debug!("Saved credentials to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Creds {
        token: String,
        offset: i32,
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("auth"));
        let loaded: Option<Creds> = store.load().unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_creates_dir_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("auth"));

        store.save(&Creds { token: "t".into(), offset: 1 }).unwrap();
        store.save(&Creds { token: "t".into(), offset: 42 }).unwrap();

        let loaded: Creds = store.load().unwrap().unwrap();
        assert_eq!(loaded, Creds { token: "t".into(), offset: 42 });
        assert!(!dir.path().join("auth/creds.json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CREDS_FILE), "{ nope").unwrap();
        let store = CredentialStore::new(dir.path());

        let err = store.load::<Creds>().unwrap_err();
        assert!(matches!(err, CredentialError::Json { .. }));
    }
}
