//! Local file backend for state storage
//!
//! Each identifier owns two files in the storage directory: `<id>.tfstate`
//! holding the state blob and `<id>.lock` holding the lock descriptor while
//! the state is locked.
//!
//! The lock file is only ever created through a hard link from a fully
//! written temp file. Linking fails when the target already exists, which
//! makes acquisition a single create-if-absent step and guarantees readers
//! never observe a partially written descriptor.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateId;

/// Times a lock acquisition is attempted when the existing lock file
/// disappears between the failed create and the read
const LOCK_ATTEMPTS: usize = 3;

/// Local directory backend
pub struct LocalBackend {
    /// Directory holding state and lock files
    dir: PathBuf,
    /// Whether `init` may create the directory
    create_dirs: bool,
}

impl LocalBackend {
    /// Default storage directory
    pub const DEFAULT_DIR: &'static str = "state";

    /// Create a new LocalBackend using the default directory
    pub fn new() -> Self {
        Self::with_dir(PathBuf::from(Self::DEFAULT_DIR))
    }

    /// Create a new LocalBackend storing files under `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            create_dirs: true,
        }
    }

    /// Create a LocalBackend from configuration
    pub fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let dir = config
            .get_string("path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_DIR));

        if dir.as_os_str().is_empty() {
            return Err(BackendError::configuration("Attribute 'path' is empty"));
        }

        Ok(Self {
            dir,
            create_dirs: config.get_bool_or("create_dirs", true)?,
        })
    }

    /// Get the storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unique sibling path for staging a write
    fn temp_path(&self, id: &StateId) -> PathBuf {
        self.dir
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4().simple()))
    }

    /// Write `content` to a fresh temp file and flush it to disk
    fn write_temp(&self, id: &StateId, content: &[u8]) -> BackendResult<PathBuf> {
        let temp_path = self.temp_path(id);

        let result = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .and_then(|mut file| {
                file.write_all(content)?;
                file.sync_all()
            });

        match result {
            Ok(()) => Ok(temp_path),
            Err(e) => {
                warn!("Can't write temp file {}: {}", temp_path.display(), e);
                remove_temp(&temp_path);
                Err(BackendError::Io(format!(
                    "Failed to write {}: {}",
                    temp_path.display(),
                    e
                )))
            }
        }
    }

    /// Atomically create the lock file if it does not exist yet
    ///
    /// Returns `false` when another lock file is already in place.
    fn create_lock_file(&self, id: &StateId, lock: &LockInfo) -> BackendResult<bool> {
        let lock_path = id.lock_path(&self.dir);
        let temp_path = self.write_temp(id, &lock.encode()?)?;

        let result = fs::hard_link(&temp_path, &lock_path);
        remove_temp(&temp_path);

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => {
                warn!("Can't write lock file {}: {}", lock_path.display(), e);
                Err(BackendError::Io(format!(
                    "Failed to write lock file {}: {}",
                    lock_path.display(),
                    e
                )))
            }
        }
    }

    /// Read the lock file, returning `None` if it does not exist
    fn read_lock_file(&self, id: &StateId) -> BackendResult<Option<LockInfo>> {
        read_lock_at(&id.lock_path(&self.dir))
    }

    /// Remove the lock if it is held under `lock_id`
    ///
    /// The lock file is moved to a staging name before it is deleted, and the
    /// ID is checked again on the staged copy. A lock re-acquired by another
    /// holder after the first check is put back instead of being deleted.
    fn release(&self, id: &StateId, lock_id: &str) -> BackendResult<()> {
        let lock_path = id.lock_path(&self.dir);

        let Some(current) = self.read_lock_file(id)? else {
            info!("Lock file {} is already gone, nothing to do", lock_path.display());
            return Ok(());
        };

        if current.id != lock_id {
            warn!(
                "State {} is locked with id {}, refusing unlock with id {}",
                id, current.id, lock_id
            );
            return Err(BackendError::conflict(&current, lock_id));
        }

        let staged_path = self.temp_path(id);
        match fs::rename(&lock_path, &staged_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Lock file {} removed concurrently", lock_path.display());
                return Ok(());
            }
            Err(e) => {
                warn!("Can't delete lock file {}: {}", lock_path.display(), e);
                return Err(BackendError::Io(format!(
                    "Failed to remove lock file {}: {}",
                    lock_path.display(),
                    e
                )));
            }
        }

        let staged = match read_lock_at(&staged_path) {
            Ok(Some(staged)) => staged,
            Ok(None) => return Ok(()),
            Err(e) => {
                restore_lock(&staged_path, &lock_path);
                return Err(e);
            }
        };

        if staged.id != lock_id {
            warn!(
                "Lock on state {} changed to id {} during unlock with id {}, restoring it",
                id, staged.id, lock_id
            );
            restore_lock(&staged_path, &lock_path);
            return Err(BackendError::conflict(&staged, lock_id));
        }

        remove_temp(&staged_path);
        info!("Released lock {} on state {}", lock_id, id);
        Ok(())
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and decode a lock file, returning `None` if it does not exist
fn read_lock_at(path: &Path) -> BackendResult<Option<LockInfo>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            warn!("Can't read lock file {}: {}", path.display(), e);
            return Err(BackendError::Io(format!(
                "Failed to read lock file {}: {}",
                path.display(),
                e
            )));
        }
    };

    let lock = LockInfo::parse(&content).map_err(|e| {
        warn!("Lock file {} is not a valid descriptor: {}", path.display(), e);
        BackendError::MalformedInput(format!(
            "Failed to parse lock file {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(Some(lock))
}

/// Put a staged lock file back in place unless a new lock already took it
fn restore_lock(staged_path: &Path, lock_path: &Path) {
    match fs::hard_link(staged_path, lock_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            warn!(
                "Lock file {} was re-created before {} could be restored",
                lock_path.display(),
                staged_path.display()
            );
        }
        Err(e) => {
            warn!(
                "Can't restore lock file {} from {}: {}",
                lock_path.display(),
                staged_path.display(),
                e
            );
            return;
        }
    }
    remove_temp(staged_path);
}

/// Best-effort removal of a staging file
fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        warn!("Can't remove temp file {}: {}", path.display(), e);
    }
}

#[async_trait]
impl StateBackend for LocalBackend {
    async fn get(&self, id: &StateId) -> BackendResult<Vec<u8>> {
        let state_path = id.state_path(&self.dir);

        match fs::read(&state_path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("State file {} not found", state_path.display());
                Err(BackendError::NotFound(id.to_string()))
            }
            Err(e) => {
                warn!("Can't read state file {}: {}", state_path.display(), e);
                Err(BackendError::Io(format!(
                    "Failed to read state file {}: {}",
                    state_path.display(),
                    e
                )))
            }
        }
    }

    async fn update(&self, id: &StateId, state: &[u8]) -> BackendResult<()> {
        let state_path = id.state_path(&self.dir);
        let temp_path = self.write_temp(id, state)?;

        if let Err(e) = fs::rename(&temp_path, &state_path) {
            warn!("Can't write state file {}: {}", state_path.display(), e);
            remove_temp(&temp_path);
            return Err(BackendError::Io(format!(
                "Failed to write state file {}: {}",
                state_path.display(),
                e
            )));
        }

        debug!("Wrote {} bytes to {}", state.len(), state_path.display());
        Ok(())
    }

    async fn purge(&self, id: &StateId) -> BackendResult<()> {
        let state_path = id.state_path(&self.dir);

        match fs::remove_file(&state_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("State file {} not found, nothing to purge", state_path.display());
                Ok(())
            }
            Err(e) => {
                warn!("Can't delete state file {}: {}", state_path.display(), e);
                Err(BackendError::Io(format!(
                    "Failed to remove state file {}: {}",
                    state_path.display(),
                    e
                )))
            }
        }
    }

    async fn lock(&self, id: &StateId, descriptor: &[u8]) -> BackendResult<LockInfo> {
        let mut requested = LockInfo::decode(descriptor)?;
        if requested.path.is_empty() {
            requested.path = id.state_path(&self.dir).display().to_string();
        }

        for _ in 0..LOCK_ATTEMPTS {
            if self.create_lock_file(id, &requested)? {
                info!("Acquired lock {} on state {}", requested.id, id);
                return Ok(requested);
            }

            match self.read_lock_file(id)? {
                Some(current) if current.same_holder(&requested) => {
                    debug!("Lock {} on state {} re-confirmed", current.id, id);
                    return Ok(current);
                }
                Some(current) => {
                    warn!(
                        "State {} is locked with id {}, refusing lock with id {}",
                        id, current.id, requested.id
                    );
                    return Err(BackendError::conflict(&current, requested.id));
                }
                None => debug!("Lock on state {} released during acquisition, retrying", id),
            }
        }

        Err(BackendError::Io(format!(
            "Lock file {} kept changing during acquisition",
            id.lock_path(&self.dir).display()
        )))
    }

    async fn unlock(&self, id: &StateId, descriptor: &[u8]) -> BackendResult<()> {
        let requested = LockInfo::decode(descriptor)?;
        self.release(id, &requested.id)
    }

    async fn read_lock(&self, id: &StateId) -> BackendResult<Option<LockInfo>> {
        self.read_lock_file(id)
    }

    async fn force_unlock(&self, id: &StateId, lock_id: &str) -> BackendResult<()> {
        self.release(id, lock_id)
    }

    async fn list_states(&self) -> BackendResult<Vec<StateId>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackendError::Io(format!(
                    "Failed to list {}: {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BackendError::Io(format!("Failed to list {}: {}", self.dir.display(), e))
            })?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(StateId::from_state_file_name)
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn init(&self) -> BackendResult<()> {
        if self.dir.is_dir() {
            return Ok(());
        }

        if !self.create_dirs {
            return Err(BackendError::configuration(format!(
                "Storage directory {} does not exist",
                self.dir.display()
            )));
        }

        fs::create_dir_all(&self.dir).map_err(|e| {
            BackendError::Io(format!(
                "Failed to create storage directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;
        info!("Created storage directory {}", self.dir.display());
        Ok(())
    }
}
