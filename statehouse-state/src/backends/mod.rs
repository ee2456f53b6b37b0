//! Backend implementations for state storage

mod local;

pub use local::LocalBackend;

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};

/// Create a backend from configuration
///
/// This function dispatches to the appropriate backend implementation
/// based on the backend_type in the configuration.
pub fn create_backend(config: &BackendConfig) -> BackendResult<Box<dyn StateBackend>> {
    match config.backend_type.as_str() {
        "local" => {
            let backend = LocalBackend::from_config(config)?;
            Ok(Box::new(backend))
        }
        other => Err(BackendError::unsupported_backend(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateId;
    use tempfile::tempdir;

    #[test]
    fn test_unsupported_backend() {
        let result = create_backend(&BackendConfig::new("s3"));

        if let Err(BackendError::UnsupportedBackend(name)) = result {
            assert_eq!(name, "s3");
        } else {
            panic!("Expected UnsupportedBackend error");
        }
    }

    #[tokio::test]
    async fn test_create_local_backend() {
        let dir = tempdir().unwrap();
        let storage = dir.path().join("state");
        let config =
            BackendConfig::new("local").with_attribute("path", storage.display().to_string());

        let backend = create_backend(&config).unwrap();
        backend.init().await.unwrap();

        let id = StateId::new("prod").unwrap();
        backend.update(&id, b"state").await.unwrap();
        assert_eq!(backend.get(&id).await.unwrap(), b"state");
        assert!(storage.join("prod.tfstate").exists());
    }
}
