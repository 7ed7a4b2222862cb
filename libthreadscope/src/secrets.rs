//! Encrypted credential storage for Threadscope
//!
//! All credentials live in a single sealed file: a JSON object of
//! `name -> value` encrypted with AES-256-GCM under a 32-byte key that is
//! kept in a separate file. The whole blob is rewritten on every update.
//!
//! # File Format
//!
//! - Key file: 32 raw bytes, permissions 600, parent directory 700 (Unix)
//! - Blob: `TSC1 || nonce (12 bytes) || ciphertext + tag`, permissions 600
//!
//! # Example
//!
//! ```no_run
//! use libthreadscope::secrets::{generate_key, Credentials, SecretStore, THREADS_TOKEN};
//! use secrecy::ExposeSecret;
//! use std::path::Path;
//!
//! # fn example() -> libthreadscope::Result<()> {
//! let key_path = Path::new("/tmp/threadscope/crypto.key");
//! let blob_path = Path::new("/tmp/threadscope/credentials.enc");
//!
//! generate_key(key_path, false)?;
//! let store = SecretStore::open(key_path, blob_path)?;
//!
//! let mut credentials = Credentials::new();
//! credentials.insert(THREADS_TOKEN, "THAA...");
//! store.seal_and_store(&credentials)?;
//!
//! let token = store.credential(THREADS_TOKEN)?;
//! assert!(token.expose_secret().starts_with("THAA"));
//! # Ok(())
//! # }
//! ```

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, Zeroizing};

use crate::config::StorageConfig;
use crate::error::{CredentialError, Result};

/// Size of the encryption key in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Header of every sealed blob, also bound as associated data
const MAGIC: &[u8; 4] = b"TSC1";

/// Threads API bearer token (string)
pub const THREADS_TOKEN: &str = "threads_token";
/// Target spreadsheet id (string)
pub const SPREADSHEET_ID: &str = "spreadsheet_id";
/// Google service account key (JSON object)
pub const GOOGLE_CREDENTIALS: &str = "google_credentials";

/// Names every complete setup is expected to contain
pub const REQUIRED_CREDENTIALS: [&str; 3] = [THREADS_TOKEN, SPREADSHEET_ID, GOOGLE_CREDENTIALS];

/// Decrypted credential mapping
///
/// Every string value (nested ones included) is zeroed when the mapping is
/// dropped, so keep instances short-lived and scoped to the code that needs them.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    entries: BTreeMap<String, Value>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapping from a JSON object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                entries: map.into_iter().collect(),
            }),
            other => Err(CredentialError::InvalidValue {
                name: "<root>".to_string(),
                reason: format!("expected a JSON object, found {}", json_kind(&other)),
            }
            .into()),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(mut previous) = self.entries.insert(name.into(), value.into()) {
            scrub(&mut previous);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for Credentials {
    fn drop(&mut self) {
        for value in self.entries.values_mut() {
            scrub(value);
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

fn scrub(value: &mut Value) {
    match value {
        Value::String(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(scrub),
        Value::Object(map) => map.values_mut().for_each(scrub),
        _ => {}
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed view of the `google_credentials` entry
#[derive(Debug)]
pub struct GoogleServiceAccount {
    pub account_type: String,
    pub project_id: String,
    pub private_key_id: String,
    pub private_key: SecretString,
    pub client_email: String,
}

impl GoogleServiceAccount {
    /// Fields a service account key must carry
    pub const REQUIRED_FIELDS: [&'static str; 5] = [
        "type",
        "project_id",
        "private_key_id",
        "private_key",
        "client_email",
    ];

    /// Validate and extract a service account from its JSON form
    ///
    /// Accepts either the object itself or a string holding the JSON text.
    pub fn from_value(value: &Value) -> Result<Self> {
        let parsed;
        let object = match value {
            Value::Object(map) => map,
            Value::String(text) => {
                parsed = serde_json::from_str::<Value>(text).map_err(|e| invalid_google(e))?;
                parsed
                    .as_object()
                    .ok_or_else(|| invalid_google("service account JSON is not an object"))?
            }
            other => {
                return Err(invalid_google(format!(
                    "expected an object, found {}",
                    json_kind(other)
                )))
            }
        };

        let field = |name: &str| -> Result<String> {
            match object.get(name).and_then(Value::as_str) {
                Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
                _ => Err(invalid_google(format!("missing required field '{}'", name))),
            }
        };

        Ok(Self {
            account_type: field("type")?,
            project_id: field("project_id")?,
            private_key_id: field("private_key_id")?,
            private_key: SecretString::from(field("private_key")?),
            client_email: field("client_email")?,
        })
    }
}

fn invalid_google(reason: impl std::fmt::Display) -> crate::error::ThreadscopeError {
    CredentialError::InvalidValue {
        name: GOOGLE_CREDENTIALS.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Validate that a path is not a symlink
///
/// Credential material must be read from regular files so a swapped link
/// cannot redirect reads or writes elsewhere.
pub fn validate_not_symlink(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        CredentialError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read metadata for '{}': {}", path.display(), e),
        ))
    })?;

    if metadata.is_symlink() {
        return Err(CredentialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "Security: credential file '{}' is a symbolic link. \
                Credential files must be regular files.",
                path.display()
            ),
        ))
        .into());
    }

    Ok(())
}

/// Generate a new encryption key and write it to `path`
///
/// Refuses to replace an existing key unless `force` is set, since losing
/// the key makes the sealed blob permanently unreadable.
///
/// Returns the key fingerprint.
pub fn generate_key(path: &Path, force: bool) -> Result<String> {
    if path.exists() && !force {
        return Err(CredentialError::KeyExists(path.display().to_string()).into());
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(key.as_mut());

    write_private(path, key.as_slice())?;
    let fingerprint = fingerprint(&key);

    tracing::info!(
        "Generated encryption key at {:?} (fingerprint {})",
        path,
        fingerprint
    );
    Ok(fingerprint)
}

/// Short, non-reversible identifier of a key for display
pub fn fingerprint(key: &[u8; KEY_SIZE]) -> String {
    let digest = Sha256::digest(key);
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Write `data` atomically with owner-only permissions
///
/// The parent directory is created (and restricted to 700) if needed; the
/// content goes to a temp file in the same directory which is then renamed
/// over the destination.
fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if !parent.exists() {
        std::fs::create_dir_all(&parent).map_err(CredentialError::Io)?;
        restrict_permissions(&parent, 0o700)?;
    }

    let mut temp = tempfile::NamedTempFile::new_in(&parent).map_err(CredentialError::Io)?;
    restrict_permissions(temp.path(), 0o600)?;
    temp.write_all(data).map_err(CredentialError::Io)?;
    temp.as_file().sync_all().map_err(CredentialError::Io)?;
    temp.persist(path)
        .map_err(|e| CredentialError::Io(e.error))?;

    restrict_permissions(path, 0o600)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(CredentialError::Io)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Sealed credential store backed by a key file and a blob file
///
/// The store never caches plaintext: every read decrypts the blob again and
/// hands back a value whose memory is zeroed on drop.
pub struct SecretStore {
    key: Zeroizing<[u8; KEY_SIZE]>,
    blob_path: PathBuf,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("key", &"[REDACTED]")
            .field("blob_path", &self.blob_path)
            .finish()
    }
}

impl SecretStore {
    /// Open a store with the key at `key_path` guarding the blob at `blob_path`
    ///
    /// # Errors
    ///
    /// - `CredentialError::KeyNotFound` if the key file does not exist
    /// - `CredentialError::InvalidKey` if it is not exactly 32 bytes
    pub fn open(key_path: &Path, blob_path: &Path) -> Result<Self> {
        if !key_path.exists() {
            tracing::error!("Encryption key file not found: {:?}", key_path);
            return Err(CredentialError::KeyNotFound(key_path.display().to_string()).into());
        }
        validate_not_symlink(key_path)?;

        let raw = Zeroizing::new(std::fs::read(key_path).map_err(CredentialError::Io)?);
        if raw.len() != KEY_SIZE {
            return Err(CredentialError::InvalidKey(format!(
                "expected {} bytes in {}, found {}",
                KEY_SIZE,
                key_path.display(),
                raw.len()
            ))
            .into());
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&raw);

        tracing::debug!("Secret store opened (blob: {:?})", blob_path);
        Ok(Self {
            key,
            blob_path: blob_path.to_path_buf(),
        })
    }

    /// Open the store at the locations named by the storage configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(&config.key_path(), &config.credentials_path())
    }

    pub fn blob_path(&self) -> &Path {
        &self.blob_path
    }

    /// Whether a sealed blob has been written yet
    pub fn blob_exists(&self) -> bool {
        self.blob_path.exists()
    }

    pub fn key_fingerprint(&self) -> String {
        fingerprint(&self.key)
    }

    /// Encrypt `credentials` and replace the sealed blob
    pub fn seal_and_store(&self, credentials: &Credentials) -> Result<()> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(credentials).map_err(CredentialError::Serialization)?,
        );
        let sealed = self.seal(&plaintext)?;

        write_private(&self.blob_path, &sealed)?;

        tracing::info!(
            "Sealed {} credential(s) to {:?}",
            credentials.len(),
            self.blob_path
        );
        Ok(())
    }

    /// Decrypt and parse the whole mapping
    ///
    /// # Errors
    ///
    /// - `CredentialError::BlobNotFound` if nothing has been sealed yet
    /// - `CredentialError::Decryption` if the blob was tampered with,
    ///   truncated, or sealed under a different key
    pub fn unseal_all(&self) -> Result<Credentials> {
        if !self.blob_path.exists() {
            tracing::error!("Credentials file not found: {:?}", self.blob_path);
            return Err(
                CredentialError::BlobNotFound(self.blob_path.display().to_string()).into(),
            );
        }
        validate_not_symlink(&self.blob_path)?;

        let sealed = std::fs::read(&self.blob_path).map_err(CredentialError::Io)?;
        let plaintext = self.open_sealed(&sealed)?;

        let credentials: Credentials = serde_json::from_slice(&plaintext).map_err(|e| {
            CredentialError::Decryption(format!("decrypted data is not a credential map: {}", e))
        })?;

        tracing::debug!("Unsealed {} credential(s)", credentials.len());
        Ok(credentials)
    }

    /// Fetch a single credential by name
    ///
    /// String values are returned as-is; object values as compact JSON text.
    pub fn credential(&self, name: &str) -> Result<SecretString> {
        let credentials = self.unseal_all()?;
        let value = credentials.get(name).ok_or_else(|| {
            tracing::error!("Credential '{}' is not in the sealed store", name);
            CredentialError::NotFound(name.to_string())
        })?;

        let text = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).map_err(CredentialError::Serialization)?,
        };
        Ok(SecretString::from(text))
    }

    /// Fetch and validate the Google service account
    pub fn google_credentials(&self) -> Result<GoogleServiceAccount> {
        let credentials = self.unseal_all()?;
        let value = credentials
            .get(GOOGLE_CREDENTIALS)
            .ok_or_else(|| CredentialError::NotFound(GOOGLE_CREDENTIALS.to_string()))?;
        GoogleServiceAccount::from_value(value)
    }

    /// Names present in the sealed blob (values are never returned)
    pub fn stored_names(&self) -> Result<Vec<String>> {
        let credentials = self.unseal_all()?;
        Ok(credentials.names().map(str::to_string).collect())
    }

    /// Set one credential, keeping the others
    ///
    /// A missing blob starts from an empty mapping; the whole blob is rewritten.
    pub fn upsert(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let mut credentials = if self.blob_exists() {
            self.unseal_all()?
        } else {
            Credentials::new()
        };
        credentials.insert(name, value);
        self.seal_and_store(&credentials)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: MAGIC,
                },
            )
            .map_err(|e| CredentialError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(MAGIC.len() + NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(MAGIC);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open_sealed(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let header = MAGIC.len() + NONCE_SIZE;
        if sealed.len() <= header || &sealed[..MAGIC.len()] != MAGIC {
            tracing::error!("Invalid encryption key or corrupted data");
            return Err(CredentialError::Decryption(
                "credentials file is truncated or not a sealed blob".to_string(),
            )
            .into());
        }

        let nonce = Nonce::from_slice(&sealed[MAGIC.len()..header]);
        let plaintext = self
            .cipher()
            .decrypt(
                nonce,
                Payload {
                    msg: &sealed[header..],
                    aad: MAGIC,
                },
            )
            .map_err(|_| {
                tracing::error!("Invalid encryption key or corrupted data");
                CredentialError::Decryption("authentication tag mismatch".to_string())
            })?;

        Ok(Zeroizing::new(plaintext))
    }
}
