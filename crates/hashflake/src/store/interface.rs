use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;

use crate::{script::AtomicScript, state::FieldMap, store::StoreError};

/// The type of value held at a key, as reported by [`HashStore::key_type`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Nothing is stored at the key.
    None,
    /// A field/value hash.
    Hash,
    /// Any other value type, by its backend name (`string`, `list`, ..).
    Other(String),
}

impl KeyType {
    /// Maps a Redis-style `TYPE` reply to a [`KeyType`].
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "none" => Self::None,
            "hash" => Self::Hash,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Hash => "hash",
            Self::Other(name) => name,
        }
    }
}

/// The remote key/hash store every coordinator synchronizes through.
///
/// Implementations must make each individual call atomic with respect to the
/// key it touches, and [`HashStore::run_atomic`] atomic for the whole routine.
/// Leases (`try_lease`/`release_lease`) live in the same keyspace as records.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Reads every field of the hash at `key`, or `None` if nothing is stored.
    async fn get_fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError>;

    /// Writes or overwrites the given fields of the hash at `key`.
    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// Atomically adds `delta` to an integer field and returns the new value.
    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// Writes `fields` to the hash at `key` only if every `(field, expected)`
    /// pair still matches; `None` expects the field to be absent.
    ///
    /// Returns `false`, having written nothing, on any mismatch.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[(&str, Option<String>)],
        fields: &[(&str, String)],
    ) -> Result<bool, StoreError>;

    /// Reports what kind of value is stored at `key`.
    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError>;

    /// Runs `script` against `key` as one indivisible operation and returns
    /// its reply as a flat list of strings.
    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<String>, StoreError>;

    /// Sets `key` to `token` for `lease` if nothing live is stored there.
    ///
    /// Returns `true` if the lease was taken.
    async fn try_lease(&self, key: &str, token: &str, lease: Duration) -> Result<bool, StoreError>;

    /// Deletes `key` if it still holds `token`.
    ///
    /// Returns `false` if the lease had already expired or changed hands.
    async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl<T: HashStore + ?Sized> HashStore for Arc<T> {
    async fn get_fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        (**self).get_fields(key).await
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        (**self).set_fields(key, fields).await
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        (**self).increment_field(key, field, delta).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[(&str, Option<String>)],
        fields: &[(&str, String)],
    ) -> Result<bool, StoreError> {
        (**self).compare_and_set(key, expected, fields).await
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError> {
        (**self).key_type(key).await
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<String>, StoreError> {
        (**self).run_atomic(script, key, args).await
    }

    async fn try_lease(&self, key: &str, token: &str, lease: Duration) -> Result<bool, StoreError> {
        (**self).try_lease(key, token, lease).await
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        (**self).release_lease(key, token).await
    }
}
