// crates/core/src/registry/memory.rs
//! Single-process registry backend.
//!
//! Keys live in one map behind a `std::sync::Mutex`; every operation,
//! including the cleanup batch, runs inside a single critical section the way
//! a single-threaded store executes a transaction. Publications go straight
//! to the attached [`ChannelBridge`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{BatchOutcome, CleanupBatch, JobRegistry};
use crate::bridge::ChannelBridge;
use crate::error::RegistryError;
use crate::job::{parse_flag, JobId, KeyLayout, COMPLETE_FIELD};
use crate::message::ChannelMessage;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

pub struct MemoryRegistry {
    layout: KeyLayout,
    keys: Mutex<HashMap<String, Value>>,
    bridge: ChannelBridge,
}

impl MemoryRegistry {
    pub fn new(bridge: ChannelBridge) -> Self {
        Self::with_layout(KeyLayout::default(), bridge)
    }

    pub fn with_layout(layout: KeyLayout, bridge: ChannelBridge) -> Self {
        Self {
            layout,
            keys: Mutex::new(HashMap::new()),
            bridge,
        }
    }

    pub fn bridge(&self) -> &ChannelBridge {
        &self.bridge
    }

    /// Store a plain string value, as a producer writing job data would.
    pub fn set(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.lock()?
            .insert(key.to_string(), Value::Str(value.to_string()));
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> Result<bool, RegistryError> {
        Ok(self.lock()?.contains_key(key))
    }

    pub fn key_count(&self) -> Result<usize, RegistryError> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>, RegistryError> {
        self.keys
            .lock()
            .map_err(|e| RegistryError::Unavailable(format!("registry lock poisoned: {e}")))
    }

    fn completed_in(keys: &HashMap<String, Value>, meta_key: &str) -> Result<bool, RegistryError> {
        match keys.get(meta_key) {
            None => Ok(false),
            Some(Value::Hash(fields)) => Ok(parse_flag(fields.get(COMPLETE_FIELD).map(String::as_str))),
            Some(_) => Err(RegistryError::WrongType {
                key: meta_key.to_string(),
                message: "expected a hash".into(),
            }),
        }
    }

    fn pointers_in(
        &self,
        keys: &HashMap<String, Value>,
        job: &JobId,
    ) -> Result<BTreeSet<String>, RegistryError> {
        let pointers_key = self.layout.pointers_key(job);
        let mut pointers = match keys.get(&pointers_key) {
            None => BTreeSet::new(),
            Some(Value::Set(members)) => members.clone(),
            Some(_) => {
                return Err(RegistryError::WrongType {
                    key: pointers_key,
                    message: "expected a set".into(),
                })
            }
        };
        pointers.insert(self.layout.meta_key(job));
        pointers.insert(pointers_key);
        Ok(pointers)
    }
}

#[async_trait]
impl JobRegistry for MemoryRegistry {
    fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    async fn exists(&self, job: &JobId) -> Result<bool, RegistryError> {
        Ok(self.lock()?.contains_key(&self.layout.meta_key(job)))
    }

    async fn get_completed(&self, job: &JobId) -> Result<bool, RegistryError> {
        let keys = self.lock()?;
        Self::completed_in(&keys, &self.layout.meta_key(job))
    }

    async fn get_pointers(&self, job: &JobId) -> Result<BTreeSet<String>, RegistryError> {
        let keys = self.lock()?;
        self.pointers_in(&keys, job)
    }

    async fn delete_all(&self, targets: &BTreeSet<String>) -> Result<usize, RegistryError> {
        let mut keys = self.lock()?;
        Ok(targets.iter().filter(|k| keys.remove(*k).is_some()).count())
    }

    async fn publish(&self, message: &ChannelMessage) -> Result<(), RegistryError> {
        self.bridge.publish(message.clone());
        Ok(())
    }

    async fn execute(&self, batch: &CleanupBatch) -> Result<BatchOutcome, RegistryError> {
        let mut keys = self.lock()?;
        let meta_key = self.layout.meta_key(&batch.job);
        if !keys.contains_key(&meta_key) {
            return Ok(BatchOutcome::Missing);
        }
        if !Self::completed_in(&keys, &meta_key)? {
            return Ok(BatchOutcome::Incomplete);
        }

        let mut targets = self.pointers_in(&keys, &batch.job)?;
        targets.extend(batch.keys.iter().cloned());
        let deleted = targets.iter().filter(|k| keys.remove(*k).is_some()).count();

        // Still inside the critical section: nobody can observe the keys
        // between the delete and the publish, or publish after the close.
        self.bridge.publish(batch.notice.clone());
        self.bridge.close(&batch.notice.channel);
        Ok(BatchOutcome::Applied { deleted })
    }

    async fn register(&self, job: &JobId) -> Result<(), RegistryError> {
        let mut keys = self.lock()?;
        let meta_key = self.layout.meta_key(job);
        keys.entry(meta_key.clone()).or_insert_with(|| {
            Value::Hash(HashMap::from([(COMPLETE_FIELD.to_string(), "0".to_string())]))
        });
        let pointers_key = self.layout.pointers_key(job);
        match keys
            .entry(pointers_key.clone())
            .or_insert_with(|| Value::Set(BTreeSet::new()))
        {
            Value::Set(members) => {
                members.insert(meta_key);
                Ok(())
            }
            _ => Err(RegistryError::WrongType {
                key: pointers_key,
                message: "expected a set".into(),
            }),
        }
    }

    async fn add_pointer(&self, job: &JobId, key: &str) -> Result<(), RegistryError> {
        let mut keys = self.lock()?;
        let pointers_key = self.layout.pointers_key(job);
        match keys
            .entry(pointers_key.clone())
            .or_insert_with(|| Value::Set(BTreeSet::new()))
        {
            Value::Set(members) => {
                members.insert(key.to_string());
                Ok(())
            }
            _ => Err(RegistryError::WrongType {
                key: pointers_key,
                message: "expected a set".into(),
            }),
        }
    }

    async fn mark_completed(&self, job: &JobId) -> Result<(), RegistryError> {
        let mut keys = self.lock()?;
        let meta_key = self.layout.meta_key(job);
        match keys
            .entry(meta_key.clone())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(fields) => {
                fields.insert(COMPLETE_FIELD.to_string(), "1".to_string());
                Ok(())
            }
            _ => Err(RegistryError::WrongType {
                key: meta_key,
                message: "expected a hash".into(),
            }),
        }
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Notice;
    use pretty_assertions::assert_eq;

    fn registry() -> MemoryRegistry {
        MemoryRegistry::new(ChannelBridge::new())
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let reg = registry();
        let job = JobId::new("eval-1");

        assert!(!reg.exists(&job).await.unwrap());
        assert!(!reg.get_completed(&job).await.unwrap());

        reg.register(&job).await.unwrap();
        assert!(reg.exists(&job).await.unwrap());
        assert!(!reg.get_completed(&job).await.unwrap());

        reg.mark_completed(&job).await.unwrap();
        assert!(reg.get_completed(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_pointers_include_own_keys() {
        let reg = registry();
        let job = JobId::new("eval-42");
        reg.register(&job).await.unwrap();
        reg.add_pointer(&job, "eval-42:result").await.unwrap();

        let pointers: Vec<String> = reg.get_pointers(&job).await.unwrap().into_iter().collect();
        assert_eq!(
            pointers,
            vec![
                "eval-42:meta".to_string(),
                "eval-42:pointers".to_string(),
                "eval-42:result".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_all_counts_existing() {
        let reg = registry();
        reg.set("a", "1").unwrap();
        reg.set("b", "2").unwrap();
        let targets = BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()]);
        assert_eq!(reg.delete_all(&targets).await.unwrap(), 2);
        assert_eq!(reg.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_execute_guards_incomplete_job() {
        let reg = registry();
        let job = JobId::new("eval-7");
        reg.register(&job).await.unwrap();

        let batch = CleanupBatch {
            job: job.clone(),
            keys: reg.get_pointers(&job).await.unwrap(),
            notice: ChannelMessage::new("eval-7", Notice::removed(&job).to_payload()),
        };
        assert_eq!(reg.execute(&batch).await.unwrap(), BatchOutcome::Incomplete);
        assert!(reg.exists(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_deletes_late_pointers_and_publishes() {
        let reg = registry();
        let job = JobId::new("eval-8");
        reg.register(&job).await.unwrap();
        reg.mark_completed(&job).await.unwrap();
        let keys = reg.get_pointers(&job).await.unwrap();

        // Appended after the snapshot was taken.
        reg.set("eval-8:late", "x").unwrap();
        reg.add_pointer(&job, "eval-8:late").await.unwrap();

        let mut sub = reg.bridge().subscribe("eval-8");
        let batch = CleanupBatch {
            job: job.clone(),
            keys,
            notice: ChannelMessage::new("eval-8", Notice::removed(&job).to_payload()),
        };
        assert_eq!(reg.execute(&batch).await.unwrap(), BatchOutcome::Applied { deleted: 3 });
        assert_eq!(reg.key_count().unwrap(), 0);
        assert!(sub.next().await.unwrap().is_termination());
        assert!(sub.next().await.is_none());

        assert_eq!(reg.execute(&batch).await.unwrap(), BatchOutcome::Missing);
    }

    #[tokio::test]
    async fn test_published_removal_notice_does_not_close_running_job() {
        let reg = registry();
        let job = JobId::new("eval-run");
        reg.register(&job).await.unwrap();
        let mut sub = reg.bridge().subscribe("eval-run");

        let forged = ChannelMessage::new("eval-run", Notice::removed(&job).to_payload());
        reg.publish(&forged).await.unwrap();
        reg.publish(&ChannelMessage::new("eval-run", "60% complete"))
            .await
            .unwrap();

        assert!(sub.next().await.unwrap().is_termination());
        assert_eq!(sub.next().await.unwrap().payload, "60% complete");
        assert_eq!(reg.bridge().channel_count(), 1);
        assert!(reg.exists(&job).await.unwrap());
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let reg = std::sync::Arc::new(registry());
        let holder = reg.clone();
        let _ = std::thread::spawn(move || {
            let _keys = holder.keys.lock().unwrap();
            panic!("panic while holding the registry lock");
        })
        .join();

        assert!(matches!(reg.contains_key("a"), Err(RegistryError::Unavailable(_))));
        assert!(matches!(reg.key_count(), Err(RegistryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let reg = registry();
        reg.set("eval-9:meta", "not a hash").unwrap();
        let err = reg.get_completed(&JobId::new("eval-9")).await.unwrap_err();
        assert!(matches!(err, RegistryError::WrongType { .. }));
    }
}
