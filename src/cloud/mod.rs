//! Object storage for persisted indexes.
//!
//! A saved index is three artifacts; under cloud configuration each one is
//! stored as an object named `prefix/path/artifact`.

pub mod gcs;
pub mod local;

use std::path::Path;

use crate::config::{CloudConfig, CloudProvider};
use crate::error::Result;

pub use gcs::GcsStore;
pub use local::LocalStore;

/// Minimal blob store interface
pub trait ObjectStore {
    fn put(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// `Ok(None)` when the object does not exist
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Connect to the store a cloud configuration names
pub fn open(config: &CloudConfig, credentials: Option<&Path>) -> Result<Box<dyn ObjectStore>> {
    match config.provider {
        CloudProvider::Gcs => Ok(Box::new(GcsStore::connect(&config.container, credentials)?)),
        CloudProvider::Local => Ok(Box::new(LocalStore::new(&config.container))),
    }
}

/// Object name for one artifact of the index saved at `path`
pub fn object_key(prefix: Option<&str>, path: &str, artifact: &str) -> String {
    [prefix.unwrap_or(""), path, artifact]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key() {
        assert_eq!(object_key(Some("indexes/"), "/prod", "config"), "indexes/prod/config");
        assert_eq!(object_key(None, "idx", "embeddings"), "idx/embeddings");
        assert_eq!(object_key(Some(""), "", "documents"), "documents");
    }

    #[test]
    fn test_open_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = CloudConfig {
            provider: CloudProvider::Local,
            container: dir.path().to_string_lossy().to_string(),
            prefix: None,
        };
        let store = open(&config, None).unwrap();
        store.put("a/b", b"hello".to_vec()).unwrap();
        assert!(store.exists("a/b").unwrap());
        assert!(!store.exists("a/c").unwrap());
    }
}
