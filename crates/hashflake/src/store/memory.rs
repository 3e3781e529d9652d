use core::time::Duration;
use std::{collections::HashMap, sync::Arc, time::Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    error::Error,
    script::{self, ATTACHED, AtomicScript, CREATED, ScriptKind},
    state::{FieldMap, StateRecord, field},
    store::{HashStore, KeyType, StoreError},
};

/// An in-process [`HashStore`].
///
/// Clones share one keyspace, so several coordinators built on clones of the
/// same store behave like separate processes talking to one server. Every
/// call, including [`HashStore::run_atomic`], runs under a single mutex and
/// is therefore atomic.
///
/// Atomic scripts are executed natively by [`ScriptKind`]; their source text
/// is ignored.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    unavailable: bool,
    failing_writes: u32,
}

enum Entry {
    Hash(FieldMap),
    Text {
        value: String,
        expires_at: Option<Instant>,
    },
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a plain string value at `key`, replacing whatever was there.
    pub fn insert_text(&self, key: &str, value: &str) {
        self.inner.lock().entries.insert(
            key.to_owned(),
            Entry::Text {
                value: value.to_owned(),
                expires_at: None,
            },
        );
    }

    /// Returns a copy of the hash at `key`, bypassing fault injection.
    pub fn peek(&self, key: &str) -> Option<FieldMap> {
        match self.inner.lock().entries.get(key) {
            Some(Entry::Hash(map)) => Some(map.clone()),
            _ => None,
        }
    }

    /// While set, every data operation fails with [`StoreError::Backend`].
    /// Leases keep working.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// Makes the next `count` mutating data operations fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.lock().failing_writes = count;
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
        found: "string".to_owned(),
    }
}

fn abort(err: &Error) -> StoreError {
    StoreError::Script(script::encode_error(err))
}

fn flatten(map: &FieldMap) -> Vec<String> {
    map.iter()
        .flat_map(|(name, value)| [name.clone(), value.clone()])
        .collect()
}

impl Inner {
    fn evict_expired(&mut self, key: &str) {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry::Text { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.entries.remove(key);
        }
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Backend("store unavailable".to_owned()));
        }
        Ok(())
    }

    fn check_write(&mut self) -> Result<(), StoreError> {
        self.check_read()?;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Backend("injected write failure".to_owned()));
        }
        Ok(())
    }

    fn existing_hash(&mut self, key: &str) -> Result<Option<&mut FieldMap>, StoreError> {
        self.evict_expired(key);
        match self.entries.get_mut(key) {
            None => Ok(None),
            Some(Entry::Hash(map)) => Ok(Some(map)),
            Some(Entry::Text { .. }) => Err(wrong_type(key)),
        }
    }

    fn hash_entry(&mut self, key: &str) -> Result<&mut FieldMap, StoreError> {
        self.evict_expired(key);
        match self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Hash(FieldMap::new()))
        {
            Entry::Hash(map) => Ok(map),
            Entry::Text { .. } => Err(wrong_type(key)),
        }
    }

    fn bootstrap(&mut self, key: &str, args: &[String]) -> Result<Vec<String>, StoreError> {
        if args.len() % 2 != 0 {
            return Err(StoreError::Script(
                "bootstrap expects field/value pairs".to_owned(),
            ));
        }
        let map = self.hash_entry(key)?;
        let complete = !map.is_empty() && args.chunks_exact(2).all(|pair| map.contains_key(&pair[0]));
        let status = if complete {
            ATTACHED
        } else {
            for pair in args.chunks_exact(2) {
                map.insert(pair[0].clone(), pair[1].clone());
            }
            CREATED
        };

        let mut reply = vec![status.to_owned()];
        reply.extend(flatten(map));
        Ok(reply)
    }

    fn generate(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        let Some(map) = self.existing_hash(key)? else {
            return Err(abort(&Error::CorruptRecord {
                key: key.to_owned(),
                reason: format!("missing field {}", field::TIMESTAMP),
            }));
        };
        let record = StateRecord::from_fields(key, map).map_err(|e| abort(&e))?;
        record.assemble().map_err(|e| abort(&e))?;
        let update = record.next().map_err(|e| abort(&e))?;

        let reply = flatten(map);
        for (name, value) in update.fields() {
            map.insert(name.to_owned(), value);
        }
        Ok(reply)
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn get_fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_read()?;
        Ok(inner.existing_hash(key)?.map(|map| map.clone()))
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        let map = inner.hash_entry(key)?;
        for (name, value) in fields {
            map.insert((*name).to_owned(), value.clone());
        }
        Ok(())
    }

    async fn increment_field(&self, key: &str, name: &str, delta: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        let map = inner.hash_entry(key)?;
        let current = match map.get(name) {
            Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotAnInteger {
                key: key.to_owned(),
                field: name.to_owned(),
            })?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend("increment would overflow".to_owned()))?;
        map.insert(name.to_owned(), next.to_string());
        Ok(next)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[(&str, Option<String>)],
        fields: &[(&str, String)],
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        let unchanged = {
            let current = inner.existing_hash(key)?;
            expected.iter().all(|(name, value)| {
                current.as_deref().and_then(|map| map.get(*name)) == value.as_ref()
            })
        };
        if !unchanged {
            return Ok(false);
        }

        let map = inner.hash_entry(key)?;
        for (name, value) in fields {
            map.insert((*name).to_owned(), value.clone());
        }
        Ok(true)
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_read()?;
        inner.evict_expired(key);
        Ok(match inner.entries.get(key) {
            None => KeyType::None,
            Some(Entry::Hash(_)) => KeyType::Hash,
            Some(Entry::Text { .. }) => KeyType::Other("string".to_owned()),
        })
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_write()?;
        match script.kind() {
            ScriptKind::Bootstrap => inner.bootstrap(key, args),
            ScriptKind::Generate => inner.generate(key),
        }
    }

    async fn try_lease(&self, key: &str, token: &str, lease: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        inner.evict_expired(key);
        if inner.entries.contains_key(key) {
            return Ok(false);
        }
        inner.entries.insert(
            key.to_owned(),
            Entry::Text {
                value: token.to_owned(),
                expires_at: Some(Instant::now() + lease),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        inner.evict_expired(key);
        let owned = matches!(
            inner.entries.get(key),
            Some(Entry::Text { value, expires_at: Some(_) }) if value == token
        );
        if owned {
            inner.entries.remove(key);
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BitLayout, Scripts};

    fn record() -> StateRecord {
        StateRecord::initial(&BitLayout::new(51, 10, 2).with_start_millis(0), 3, 42)
    }

    #[tokio::test]
    async fn hash_round_trip_and_types() {
        let store = MemoryStore::new();
        assert_eq!(store.key_type("ids").await.unwrap(), KeyType::None);
        assert_eq!(store.get_fields("ids").await.unwrap(), None);

        store.set_fields("ids", &record().to_fields()).await.unwrap();
        assert_eq!(store.key_type("ids").await.unwrap(), KeyType::Hash);
        let fields = store.get_fields("ids").await.unwrap().unwrap();
        assert_eq!(StateRecord::from_fields("ids", &fields).unwrap(), record());

        store.insert_text("other", "x");
        assert_eq!(
            store.key_type("other").await.unwrap(),
            KeyType::Other("string".to_owned())
        );
        assert!(matches!(
            store.get_fields("other").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn increment_creates_and_validates() {
        let store = MemoryStore::new();
        assert_eq!(store.increment_field("h", "n", 2).await.unwrap(), 2);
        assert_eq!(store.increment_field("h", "n", 3).await.unwrap(), 5);
        store
            .set_fields("h", &[("s", "abc".to_owned())])
            .await
            .unwrap();
        assert!(matches!(
            store.increment_field("h", "s", 1).await,
            Err(StoreError::NotAnInteger { .. })
        ));
    }

    #[tokio::test]
    async fn compare_and_set_writes_only_on_match() {
        let store = MemoryStore::new();
        let create: [(&str, Option<String>); 1] = [("Seq", None)];
        assert!(
            store
                .compare_and_set("h", &create, &[("Seq", "0".to_owned())])
                .await
                .unwrap()
        );
        // The field exists now, so a second create loses.
        assert!(
            !store
                .compare_and_set("h", &create, &[("Seq", "9".to_owned())])
                .await
                .unwrap()
        );

        let stale = [("Seq", Some("5".to_owned()))];
        assert!(
            !store
                .compare_and_set("h", &stale, &[("Seq", "6".to_owned())])
                .await
                .unwrap()
        );
        let current = [("Seq", Some("0".to_owned()))];
        assert!(
            store
                .compare_and_set("h", &current, &[("Seq", "1".to_owned())])
                .await
                .unwrap()
        );
        assert_eq!(store.peek("h").unwrap()["Seq"], "1");

        store.insert_text("s", "x");
        assert!(matches!(
            store.compare_and_set("s", &create, &[]).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn leases_are_exclusive_until_released_or_expired() {
        let store = MemoryStore::new();
        let lease = Duration::from_millis(30);
        assert!(store.try_lease("lock", "a", lease).await.unwrap());
        assert!(!store.try_lease("lock", "b", lease).await.unwrap());
        assert!(!store.release_lease("lock", "b").await.unwrap());
        assert!(store.release_lease("lock", "a").await.unwrap());
        assert!(store.try_lease("lock", "b", lease).await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.release_lease("lock", "b").await.unwrap());
        assert!(store.try_lease("lock", "c", lease).await.unwrap());
    }

    #[tokio::test]
    async fn bootstrap_routine_creates_once() {
        let store = MemoryStore::new();
        let scripts = Scripts::bundled();
        let reply = store
            .run_atomic(scripts.bootstrap(), "ids", &record().to_flat())
            .await
            .unwrap();
        assert_eq!(reply[0], CREATED);
        assert_eq!(StateRecord::from_flat("ids", &reply[1..]).unwrap(), record());

        let other = StateRecord {
            machine_id: 9,
            ..record()
        };
        let reply = store
            .run_atomic(scripts.bootstrap(), "ids", &other.to_flat())
            .await
            .unwrap();
        assert_eq!(reply[0], ATTACHED);
        assert_eq!(StateRecord::from_flat("ids", &reply[1..]).unwrap(), record());
    }

    #[tokio::test]
    async fn generate_routine_returns_pre_advance_record() {
        let store = MemoryStore::new();
        let scripts = Scripts::bundled();
        store.set_fields("ids", &record().to_fields()).await.unwrap();

        let reply = store
            .run_atomic(scripts.generate(), "ids", &[])
            .await
            .unwrap();
        assert_eq!(StateRecord::from_flat("ids", &reply).unwrap().seq, 0);
        let stored = StateRecord::from_fields("ids", &store.peek("ids").unwrap()).unwrap();
        assert_eq!(stored.seq, 1);
    }

    #[tokio::test]
    async fn generate_routine_aborts_without_writing() {
        let store = MemoryStore::new();
        let scripts = Scripts::bundled();
        let bad = StateRecord {
            seq: 4,
            ..record()
        };
        store.set_fields("ids", &bad.to_fields()).await.unwrap();

        let err = store
            .run_atomic(scripts.generate(), "ids", &[])
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Script("SEQUENCE_OUT_OF_RANGE 4 3".to_owned()));
        let stored = StateRecord::from_fields("ids", &store.peek("ids").unwrap()).unwrap();
        assert_eq!(stored, bad);

        let err = store
            .run_atomic(scripts.generate(), "missing", &[])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::Script("CORRUPT_RECORD missing field Timestamp".to_owned())
        );
    }

    #[tokio::test]
    async fn fault_injection() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        assert!(matches!(
            store.set_fields("h", &[("a", "1".to_owned())]).await,
            Err(StoreError::Backend(_))
        ));
        store.set_fields("h", &[("a", "1".to_owned())]).await.unwrap();

        store.set_unavailable(true);
        assert!(store.get_fields("h").await.is_err());
        assert!(store.try_lease("lock", "t", Duration::from_secs(1)).await.unwrap());
        store.set_unavailable(false);
        assert!(store.get_fields("h").await.unwrap().is_some());
    }
}
