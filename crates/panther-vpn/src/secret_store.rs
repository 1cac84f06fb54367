//! Secret Storage
//!
//! Small persistence boundary for the device identity: string keys mapped
//! to byte blobs, with replace-on-set semantics. The platform keychain sits
//! behind this trait in a shipping client; tests and headless use get the
//! in-memory and file backends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::debug;

/// Stored entry name for the device private key
pub const PRIVATE_KEY_ENTRY: &str = "pv.wg.device.privateKey";

/// Stored entry name for the cached device public key
pub const PUBLIC_KEY_ENTRY: &str = "pv.wg.device.publicKey";

/// Stored entry name for the install identifier
pub const INSTALL_ID_ENTRY: &str = "pv.device.installId";

/// Secret store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecretStoreError {
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed blob storage for identity material.
///
/// `set` replaces any existing value. `delete` on a missing key succeeds.
pub trait SecretStore: Send + Sync {
    /// Read a stored value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Store a value, replacing any existing one
    fn set(&self, key: &str, value: &[u8]) -> Result<(), SecretStoreError>;

    /// Remove a value if present
    fn delete(&self, key: &str) -> Result<(), SecretStoreError>;
}

/// In-memory secret store
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Unavailable("lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Unavailable("lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Unavailable("lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed secret store, one file per entry under a caller-supplied
/// directory. Writes go to a temp file first, then rename into place.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SecretStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| SecretStoreError::Unavailable(e.to_string()))?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        match std::fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecretStoreError::Unavailable(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), SecretStoreError> {
        let path = self.entry_path(key);
        let tmp = self.dir.join(format!("{key}.tmp"));

        std::fs::write(&tmp, value).map_err(|e| SecretStoreError::Unavailable(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| SecretStoreError::Unavailable(e.to_string()))?;
        }

        std::fs::rename(&tmp, &path)
            .map_err(|e| SecretStoreError::Unavailable(e.to_string()))?;

        debug!("Stored secret entry: {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SecretStoreError> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SecretStoreError::Unavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_set_get_delete() {
        let store = MemorySecretStore::new();

        assert!(store.get(PRIVATE_KEY_ENTRY).unwrap().is_none());

        store.set(PRIVATE_KEY_ENTRY, b"secret").unwrap();
        assert_eq!(store.get(PRIVATE_KEY_ENTRY).unwrap().unwrap(), b"secret");

        store.set(PRIVATE_KEY_ENTRY, b"replaced").unwrap();
        assert_eq!(store.get(PRIVATE_KEY_ENTRY).unwrap().unwrap(), b"replaced");

        store.delete(PRIVATE_KEY_ENTRY).unwrap();
        assert!(store.get(PRIVATE_KEY_ENTRY).unwrap().is_none());
    }

    #[test]
    fn test_memory_delete_missing_is_ok() {
        let store = MemorySecretStore::new();
        assert!(store.delete("no.such.entry").is_ok());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path()).unwrap();

        store.set(INSTALL_ID_ENTRY, b"abc-123").unwrap();
        assert_eq!(store.get(INSTALL_ID_ENTRY).unwrap().unwrap(), b"abc-123");

        store.delete(INSTALL_ID_ENTRY).unwrap();
        assert!(store.get(INSTALL_ID_ENTRY).unwrap().is_none());
    }

    #[test]
    fn test_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileSecretStore::new(dir.path()).unwrap();
            store.set(PUBLIC_KEY_ENTRY, b"cached-key").unwrap();
        }

        let reopened = FileSecretStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get(PUBLIC_KEY_ENTRY).unwrap().unwrap(),
            b"cached-key"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions_restrictive() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path()).unwrap();
        store.set(PRIVATE_KEY_ENTRY, b"secret").unwrap();

        let meta = std::fs::metadata(dir.path().join(PRIVATE_KEY_ENTRY)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
