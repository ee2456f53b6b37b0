//! State identifiers and the file names derived from them

use std::fmt;
use std::path::{Path, PathBuf};

use crate::backend::{BackendError, BackendResult};

/// Identifier naming one logical state object
///
/// The identifier is used verbatim as a file stem, so anything that could
/// escape the storage directory is rejected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(String);

impl StateId {
    /// Extension of state blob files
    pub const STATE_EXTENSION: &'static str = "tfstate";
    /// Extension of lock descriptor files
    pub const LOCK_EXTENSION: &'static str = "lock";

    /// Validate and wrap an identifier
    pub fn new(id: impl Into<String>) -> BackendResult<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(BackendError::InvalidId("identifier is empty".to_string()));
        }
        if id == "." || id == ".." {
            return Err(BackendError::InvalidId(format!(
                "'{}' is a relative path component",
                id
            )));
        }
        if let Some(c) = id.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
            return Err(BackendError::InvalidId(format!(
                "'{}' contains forbidden character {:?}",
                id.escape_debug(),
                c
            )));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the state blob for this identifier under `dir`
    pub fn state_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.0, Self::STATE_EXTENSION))
    }

    /// Path of the lock descriptor for this identifier under `dir`
    pub fn lock_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.0, Self::LOCK_EXTENSION))
    }

    /// Recover an identifier from a state blob file name
    ///
    /// Returns `None` for anything that is not a `<id>.tfstate` file.
    pub fn from_state_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(Self::STATE_EXTENSION)?.strip_suffix('.')?;
        Self::new(stem).ok()
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for StateId {
    type Error = BackendError;

    fn try_from(value: &str) -> BackendResult<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for StateId {
    type Error = BackendError;

    fn try_from(value: String) -> BackendResult<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_id_accepts_plain_names() {
        for id in ["prod", "network-us-east-1", "team_a.vpc", "..hidden"] {
            assert_eq!(StateId::new(id).unwrap().as_str(), id);
        }
    }

    #[test]
    fn test_state_id_rejects_path_escapes() {
        for id in ["", ".", "..", "../etc", "a/b", "a\\b", "nul\0byte"] {
            let result = StateId::new(id);
            assert!(
                matches!(result, Err(BackendError::InvalidId(_))),
                "expected {:?} to be rejected",
                id
            );
        }
    }

    #[test]
    fn test_derived_paths() {
        let id = StateId::new("prod").unwrap();
        let dir = Path::new("/var/lib/statehouse");

        assert_eq!(
            id.state_path(dir),
            PathBuf::from("/var/lib/statehouse/prod.tfstate")
        );
        assert_eq!(
            id.lock_path(dir),
            PathBuf::from("/var/lib/statehouse/prod.lock")
        );
    }

    #[test]
    fn test_from_state_file_name() {
        assert_eq!(
            StateId::from_state_file_name("prod.tfstate"),
            Some(StateId::new("prod").unwrap())
        );
        assert_eq!(
            StateId::from_state_file_name("a.b.tfstate"),
            Some(StateId::new("a.b").unwrap())
        );
        assert_eq!(StateId::from_state_file_name("prod.lock"), None);
        assert_eq!(StateId::from_state_file_name(".tfstate"), None);
        assert_eq!(StateId::from_state_file_name("tfstate"), None);
    }
}
