use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use {async_trait::async_trait, tracing::debug};

use crate::{error::StoreError, types::Credential};

/// Durable home of one credential.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the persisted credential. `NotFound` means the interactive
    /// OAuth flow has never been run for this account.
    async fn load(&self) -> Result<Credential, StoreError>;

    /// Persist the full credential atomically; a concurrent `load` sees the
    /// previous or the new value, never a mix.
    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// One JSON document per credential on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credential, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_credential(&path))
            .await
            .map_err(|e| StoreError::Read {
                location: self.location(),
                source: io::Error::other(e),
            })?
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        let path = self.path.clone();
        let credential = credential.clone();
        tokio::task::spawn_blocking(move || write_credential(&path, &credential))
            .await
            .map_err(|e| StoreError::Write {
                location: self.location(),
                source: io::Error::other(e),
            })?
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Blocking read of a credential file.
pub fn read_credential(path: &Path) -> Result<Credential, StoreError> {
    let location = path.display().to_string();
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(location));
        },
        Err(source) => return Err(StoreError::Read { location, source }),
    };
    serde_json::from_str(&data).map_err(|source| StoreError::Parse { location, source })
}

/// Blocking atomic write: temp file in the same directory, fsync, rename.
pub fn write_credential(path: &Path, credential: &Credential) -> Result<(), StoreError> {
    let location = path.display().to_string();
    let write_err = |source| StoreError::Write {
        location: location.clone(),
        source,
    };

    let data = serde_json::to_vec_pretty(credential).map_err(|e| write_err(io::Error::other(e)))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&data).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    // Set file permissions to 0600 on Unix before the file becomes visible.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!(path = %location, "saved credential");
    Ok(())
}

/// In-process store for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            slot: Mutex::new(credential),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent saves fail with a write error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Replace the stored credential without going through `save`.
    pub fn put(&self, credential: Credential) {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(credential);
    }

    pub fn get(&self) -> Option<Credential> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Credential, StoreError> {
        self.get()
            .ok_or_else(|| StoreError::NotFound(self.location()))
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                location: self.location(),
                source: io::Error::other("writes disabled"),
            });
        }
        self.put(credential.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".into()
    }
}
