// crates/store/src/redis_registry.rs
//! [`JobRegistry`] over a shared Redis instance.
//!
//! The cleanup batch is a Lua script: Redis runs a script to completion
//! before serving any other command, so the existence check, completion
//! check, deletes and publishes form one unit across every process sharing
//! the instance. The last publish names the closed job channel on
//! [`KeyLayout::control_channel`], which [`crate::RedisFeed`] turns into a
//! local channel close.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use evalhub_core::{
    BatchOutcome, ChannelMessage, CleanupBatch, JobId, JobRegistry, KeyLayout, RegistryError,
    COMPLETE_FIELD,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};

use crate::registry_error;

const MISSING: i64 = -1;
const INCOMPLETE: i64 = -2;

// KEYS[1] meta, KEYS[2] pointer set, KEYS[3..] pointer snapshot.
// ARGV[1] completion field, ARGV[2] channel, ARGV[3] payload,
// ARGV[4] control channel.
static CLEANUP_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
local flag = redis.call('HGET', KEYS[1], ARGV[1])
if not flag then
    return -2
end
flag = string.lower(flag:match('^%s*(.-)%s*$'))
if flag ~= '1' and flag ~= 'true' then
    return -2
end
local deleted = 0
for _, key in ipairs(redis.call('SMEMBERS', KEYS[2])) do
    deleted = deleted + redis.call('DEL', key)
end
for i = 3, #KEYS do
    deleted = deleted + redis.call('DEL', KEYS[i])
end
deleted = deleted + redis.call('DEL', KEYS[1], KEYS[2])
redis.call('PUBLISH', ARGV[2], ARGV[3])
redis.call('PUBLISH', ARGV[4], ARGV[2])
return deleted
",
    )
});

#[derive(Clone)]
pub struct RedisRegistry {
    client: Client,
    conn: ConnectionManager,
    layout: KeyLayout,
}

impl RedisRegistry {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str, layout: KeyLayout) -> Result<Self, RegistryError> {
        let client = Client::open(url).map_err(registry_error)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(registry_error)?;
        info!(url, "connected to redis registry");
        Ok(Self {
            client,
            conn,
            layout,
        })
    }

    /// Client for opening dedicated connections such as pub/sub.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn outcome(code: i64) -> BatchOutcome {
        match code {
            MISSING => BatchOutcome::Missing,
            INCOMPLETE => BatchOutcome::Incomplete,
            deleted => BatchOutcome::Applied {
                deleted: usize::try_from(deleted).unwrap_or(0),
            },
        }
    }
}

#[async_trait]
impl JobRegistry for RedisRegistry {
    fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    async fn exists(&self, job: &JobId) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn
            .exists(self.layout.meta_key(job))
            .await
            .map_err(registry_error)?;
        Ok(exists)
    }

    async fn get_completed(&self, job: &JobId) -> Result<bool, RegistryError> {
        let mut conn = self.conn.clone();
        let flag: Option<String> = conn
            .hget(self.layout.meta_key(job), COMPLETE_FIELD)
            .await
            .map_err(registry_error)?;
        Ok(flag
            .map(|f| {
                let f = f.trim();
                f == "1" || f.eq_ignore_ascii_case("true")
            })
            .unwrap_or(false))
    }

    async fn get_pointers(&self, job: &JobId) -> Result<BTreeSet<String>, RegistryError> {
        let mut conn = self.conn.clone();
        let pointers_key = self.layout.pointers_key(job);
        let mut pointers: BTreeSet<String> = conn
            .smembers(&pointers_key)
            .await
            .map_err(registry_error)?;
        pointers.insert(self.layout.meta_key(job));
        pointers.insert(pointers_key);
        Ok(pointers)
    }

    async fn delete_all(&self, keys: &BTreeSet<String>) -> Result<usize, RegistryError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let (deleted,): (usize,) = redis::pipe()
            .atomic()
            .del(keys)
            .query_async(&mut conn)
            .await
            .map_err(registry_error)?;
        Ok(deleted)
    }

    async fn publish(&self, message: &ChannelMessage) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn
            .publish(&message.channel, &message.payload)
            .await
            .map_err(registry_error)?;
        debug!(channel = %message.channel, receivers, "published");
        Ok(())
    }

    async fn execute(&self, batch: &CleanupBatch) -> Result<BatchOutcome, RegistryError> {
        let mut conn = self.conn.clone();
        let meta_key = self.layout.meta_key(&batch.job);
        let pointers_key = self.layout.pointers_key(&batch.job);

        let mut invocation = CLEANUP_SCRIPT.prepare_invoke();
        invocation.key(&meta_key).key(&pointers_key);
        for key in batch
            .keys
            .iter()
            .filter(|k| **k != meta_key && **k != pointers_key)
        {
            invocation.key(key);
        }
        invocation
            .arg(COMPLETE_FIELD)
            .arg(&batch.notice.channel)
            .arg(&batch.notice.payload)
            .arg(self.layout.control_channel());

        let code: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(registry_error)?;
        Ok(Self::outcome(code))
    }

    async fn register(&self, job: &JobId) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let meta_key = self.layout.meta_key(job);
        let _: () = redis::pipe()
            .atomic()
            .hset_nx(&meta_key, COMPLETE_FIELD, "0")
            .ignore()
            .sadd(self.layout.pointers_key(job), &meta_key)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(registry_error)?;
        Ok(())
    }

    async fn add_pointer(&self, job: &JobId, key: &str) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .sadd(self.layout.pointers_key(job), key)
            .await
            .map_err(registry_error)?;
        Ok(())
    }

    async fn mark_completed(&self, job: &JobId) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: usize = conn
            .hset(self.layout.meta_key(job), COMPLETE_FIELD, "1")
            .await
            .map_err(registry_error)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(registry_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_codes_map_to_outcomes() {
        assert_eq!(RedisRegistry::outcome(-1), BatchOutcome::Missing);
        assert_eq!(RedisRegistry::outcome(-2), BatchOutcome::Incomplete);
        assert_eq!(RedisRegistry::outcome(0), BatchOutcome::Applied { deleted: 0 });
        assert_eq!(RedisRegistry::outcome(4), BatchOutcome::Applied { deleted: 4 });
    }

    #[test]
    fn test_cleanup_script_has_stable_hash() {
        // The hash is what EVALSHA sends; it must not depend on invocation data.
        assert_eq!(CLEANUP_SCRIPT.get_hash().len(), 40);
    }
}
