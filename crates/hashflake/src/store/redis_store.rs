use core::time::Duration;
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, ErrorKind, RedisError, Script, aio::ConnectionManager};

use crate::{
    script::{AtomicScript, ScriptKind},
    state::FieldMap,
    store::{HashStore, KeyType, StoreError},
};

#[cfg(test)]
mod tests;

const RELEASE_LEASE_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

// ARGV: count of expectations, then (field, present, value) triples, then
// the field/value pairs to write.
const COMPARE_AND_SET_LUA: &str = r"
local expected = tonumber(ARGV[1])
local i = 2
for _ = 1, expected do
  local current = redis.call('HGET', KEYS[1], ARGV[i])
  if ARGV[i + 1] == '1' then
    if current ~= ARGV[i + 2] then
      return 0
    end
  elseif current then
    return 0
  end
  i = i + 3
end
if i <= #ARGV then
  redis.call('HSET', KEYS[1], unpack(ARGV, i))
end
return 1
";

/// A [`HashStore`] backed by a Redis server.
///
/// Uses a [`ConnectionManager`], which reconnects on its own and is cheap to
/// clone; each call clones it rather than holding a lock.
///
/// Atomic routines are hashed once per [`ScriptKind`] and then run by
/// `EVALSHA`, falling back to `EVAL` when the server has not cached them.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    release: Script,
    compare_and_set: Script,
    script_cache: Arc<Mutex<HashMap<ScriptKind, (Arc<str>, Arc<Script>)>>>,
}

impl RedisStore {
    /// Connects to the server at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        Ok(Self::from_manager(conn))
    }

    /// Wraps an existing connection manager.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_LEASE_LUA),
            compare_and_set: Script::new(COMPARE_AND_SET_LUA),
            script_cache: Arc::default(),
        }
    }

    fn prepared(&self, script: &AtomicScript) -> Arc<Script> {
        let mut cache = self.script_cache.lock();
        match cache.get(&script.kind()) {
            Some((source, redis_script))
                if Arc::ptr_eq(source, script.shared_source()) || **source == *script.source() =>
            {
                Arc::clone(redis_script)
            }
            _ => {
                let redis_script = Arc::new(Script::new(script.source()));
                cache.insert(
                    script.kind(),
                    (Arc::clone(script.shared_source()), Arc::clone(&redis_script)),
                );
                redis_script
            }
        }
    }
}

fn backend(err: RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

// Tagged aborts from our scripts arrive as extension errors: the tag is the
// error code and the rest is the detail.
fn script_error(err: RedisError) -> StoreError {
    if err.kind() == ErrorKind::ExtensionError {
        if let Some(code) = err.code() {
            let detail = err.detail().unwrap_or_default();
            return StoreError::Script(format!("{code} {detail}"));
        }
    }
    backend(err)
}

#[async_trait]
impl HashStore for RedisStore {
    async fn get_fields(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: FieldMap = conn.hgetall(key).await.map_err(backend)?;
        Ok((!fields.is_empty()).then_some(fields))
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let () = conn.hset_multiple(key, fields).await.map_err(backend)?;
        Ok(())
    }

    async fn increment_field(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, delta).await.map_err(backend)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: &[(&str, Option<String>)],
        fields: &[(&str, String)],
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.compare_and_set.key(key);
        invocation.arg(expected.len());
        for (name, value) in expected {
            match value {
                Some(value) => invocation.arg(*name).arg("1").arg(value),
                None => invocation.arg(*name).arg("0").arg(""),
            };
        }
        for (name, value) in fields {
            invocation.arg(*name).arg(value);
        }
        let written: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(written == 1)
    }

    async fn key_type(&self, key: &str) -> Result<KeyType, StoreError> {
        let mut conn = self.conn.clone();
        let name: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(KeyType::from_type_name(&name))
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .prepared(script)
            .key(key)
            .arg(args)
            .invoke_async(&mut conn)
            .await
            .map_err(script_error)?;
        Ok(reply)
    }

    async fn try_lease(&self, key: &str, token: &str, lease: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let millis = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(deleted == 1)
    }
}
