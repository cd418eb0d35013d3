//! Blob store trait.
//!
//! Large payloads (search results, transcripts, answer drafts) never go into
//! event payloads. They are stored here and referenced by [`BlobKey`].

use crate::Result;
use crate::models::BlobKey;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

/// Trait for content-keyed blob stores.
pub trait BlobStore: Send + Sync {
    /// Stores `value` under a key derived from `name` and the content.
    ///
    /// Storing identical content twice returns the same key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Backend`] if the write fails.
    fn put(&self, name: &str, value: &[u8]) -> Result<BlobKey>;

    /// Fetches the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for unknown keys and
    /// [`crate::Error::Backend`] if the read fails.
    fn get(&self, key: &BlobKey) -> Result<Vec<u8>>;
}

/// Derives the content key for a blob: `<name>/<sha256 hex>`.
#[must_use]
pub fn content_key(name: &str, value: &[u8]) -> BlobKey {
    let mut hasher = Sha256::new();
    hasher.update(value);
    BlobKey::new(format!("{name}/{}", hex::encode(hasher.finalize())))
}

/// Serializes `value` as JSON and stores it.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidInput`] if serialization fails, or the
/// store's own error.
pub fn put_json<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    name: &str,
    value: &T,
) -> Result<BlobKey> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| crate::Error::InvalidInput(format!("unserializable blob '{name}': {e}")))?;
    store.put(name, &bytes)
}

/// Fetches a blob and deserializes it from JSON.
///
/// # Errors
///
/// Returns the store's error, or [`crate::Error::Backend`] if the stored
/// bytes are not valid JSON for `T`.
pub fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &BlobKey) -> Result<T> {
    let bytes = store.get(key)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| crate::Error::backend("decode_blob", format!("{key}: {e}")))
}

/// Stores UTF-8 text.
///
/// # Errors
///
/// Returns the store's error.
pub fn put_text(store: &dyn BlobStore, name: &str, text: &str) -> Result<BlobKey> {
    store.put(name, text.as_bytes())
}

/// Fetches UTF-8 text.
///
/// # Errors
///
/// Returns the store's error, or [`crate::Error::Backend`] for invalid UTF-8.
pub fn get_text(store: &dyn BlobStore, key: &BlobKey) -> Result<String> {
    String::from_utf8(store.get(key)?)
        .map_err(|e| crate::Error::backend("decode_blob", format!("{key}: {e}")))
}
