use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::crypto::{self, Sealed};
use super::StoreError;
use crate::config::{Config, CredentialBackend};

/// Durable key-value storage for secrets that must survive a restart.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a value; a missing entry is `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a value; deleting a missing entry succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Open the store selected by the configuration.
pub fn open_store(config: &Config) -> Arc<dyn CredentialStore> {
    debug!(backend = %config.credential_backend, "Opening credential store");
    match config.credential_backend {
        CredentialBackend::Keyring => Arc::new(KeyringStore::new(&config.keyring_service)),
        CredentialBackend::File => Arc::new(FileStore::new(
            config.credentials_path.clone(),
            config.store_passphrase.clone(),
        )),
        CredentialBackend::Memory => Arc::new(MemoryStore::default()),
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Entries live in the OS keychain under a fixed service name.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// Run a keychain operation off the async executor; platform keychains
    /// may block on IPC.
    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &key)?;
            op(entry)
        })
        .await?;
        Ok(result?)
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let value = value.to_string();
        self.with_entry(key, move |entry| entry.set_password(&value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }
}

// ============================================================================
// File in the cache directory
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    value: StoredValue,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoredValue {
    Plain {
        value: String,
    },
    Sealed {
        salt: Vec<u8>,
        nonce: Vec<u8>,
        ciphertext: Vec<u8>,
    },
}

/// JSON file store for platforms without a usable keychain.
///
/// With a passphrase every value is sealed before it touches disk.
/// Without one values are written as plain text, readable only by the owner
/// on unix.
pub struct FileStore {
    path: PathBuf,
    passphrase: Option<String>,
    // Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf, passphrase: Option<String>) -> Self {
        Self {
            path,
            passphrase,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the entry was last written, if present
    pub async fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_file()?.entries.get(key).map(|e| e.updated_at))
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(StoreFile::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_file(&self, file: &StoreFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(file)?;

        // Write next to the target and rename so a crash never leaves half a file
        let tmp = self.tmp_path();
        let result = write_private(&tmp, contents.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    fn encode(&self, value: &str) -> Result<StoredValue, StoreError> {
        match self.passphrase {
            Some(ref passphrase) => {
                let sealed = crypto::seal(passphrase, value)?;
                Ok(StoredValue::Sealed {
                    salt: sealed.salt,
                    nonce: sealed.nonce,
                    ciphertext: sealed.ciphertext,
                })
            }
            None => Ok(StoredValue::Plain {
                value: value.to_string(),
            }),
        }
    }

    fn decode(&self, value: &StoredValue) -> Result<String, StoreError> {
        match value {
            StoredValue::Plain { value } => Ok(value.clone()),
            StoredValue::Sealed {
                salt,
                nonce,
                ciphertext,
            } => {
                let passphrase = self.passphrase.as_deref().ok_or(StoreError::Locked)?;
                crypto::open(
                    passphrase,
                    &Sealed {
                        salt: salt.clone(),
                        nonce: nonce.clone(),
                        ciphertext: ciphertext.clone(),
                    },
                )
            }
        }
    }
}

/// Open a file for writing that only the owner can read, before any byte of
/// the secret reaches it.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; a leftover file keeps its old bits
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::File::create(path)
}

fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = open_private(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[async_trait]
impl CredentialStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        match self.read_file()?.entries.get(key) {
            Some(entry) => Ok(Some(self.decode(&entry.value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        file.entries.insert(
            key.to_string(),
            StoredEntry {
                updated_at: Utc::now(),
                value: self.encode(value)?,
            },
        );
        self.write_file(&file)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file()?;
        if file.entries.remove(key).is_some() {
            self.write_file(&file)?;
        }
        Ok(())
    }
}

// ============================================================================
// Process memory
// ============================================================================

/// Store that forgets everything when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_get_set_delete() {
        let store = MemoryStore::default();
        assert_eq!(store.get("my-jwt").await.unwrap(), None);

        store.set("my-jwt", "tok-1").await.unwrap();
        assert_eq!(store.get("my-jwt").await.unwrap().as_deref(), Some("tok-1"));
        assert_eq!(store.len().await, 1);

        store.delete("my-jwt").await.unwrap();
        store.delete("my-jwt").await.unwrap(); // Missing entry is not an error
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_file_store_plain_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("credentials.json");

        let store = FileStore::new(path.clone(), None);
        assert_eq!(store.get("my-jwt").await.unwrap(), None);
        store.set("my-jwt", "tok-1").await.unwrap();
        assert!(store.updated_at("my-jwt").await.unwrap().is_some());

        let reopened = FileStore::new(path.clone(), None);
        assert_eq!(reopened.get("my-jwt").await.unwrap().as_deref(), Some("tok-1"));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(r#""kind": "plain""#));
    }

    #[tokio::test]
    async fn test_file_store_sealed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileStore::new(path.clone(), Some("passphrase".to_string()));
        store.set("my-jwt", "tok-secret").await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("tok-secret"));
        assert!(contents.contains(r#""kind": "sealed""#));
        assert_eq!(store.get("my-jwt").await.unwrap().as_deref(), Some("tok-secret"));

        // Without the passphrase the entry cannot be read
        let locked = FileStore::new(path.clone(), None);
        assert!(matches!(locked.get("my-jwt").await, Err(StoreError::Locked)));

        // Deleting still works without the passphrase
        locked.delete("my-jwt").await.unwrap();
        assert_eq!(store.get("my-jwt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_delete_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never-written.json");
        let store = FileStore::new(path.clone(), None);

        store.delete("my-jwt").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStore::new(path, None);
        assert!(matches!(store.get("my-jwt").await, Err(StoreError::Format(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::new(path.clone(), None);
        store.set("my-jwt", "tok-1").await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_temp_file_is_owner_only_before_first_byte() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("credentials.json"), None);
        let tmp = store.tmp_path();

        // Fresh file is created owner-only, not with the umask default
        let file = open_private(&tmp).unwrap();
        let mode = file.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(file.metadata().unwrap().len(), 0);
        drop(file);

        // A leftover world-readable temp file is tightened before reuse
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();
        std::fs::write(&tmp, "stale").unwrap();
        let file = open_private(&tmp).unwrap();
        let mode = file.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(file.metadata().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_file_store_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileStore::new(path.clone(), None);

        store.set("my-jwt", "tok-1").await.unwrap();
        assert!(!store.tmp_path().exists());

        // Rename onto a non-empty directory fails; the temp copy is removed
        let blocked = dir.path().join("blocked.json");
        std::fs::create_dir_all(blocked.join("inner")).unwrap();
        let store = FileStore::new(blocked.clone(), None);
        let result = store.write_file(&StoreFile::default());
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(!store.tmp_path().exists());
        assert!(blocked.is_dir());
    }

    #[tokio::test]
    async fn test_keyring_store_missing_entry() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        let store = KeyringStore::new("unipass-test");

        assert_eq!(store.get("my-jwt").await.unwrap(), None);
        store.delete("my-jwt").await.unwrap();
        store.set("my-jwt", "tok-1").await.unwrap();
    }
}
