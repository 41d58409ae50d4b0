use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tower_sessions_core::{
    session::{Id, Record},
    session_store, SessionStore,
};
use tracing::error;

use super::{note_store_failure, KeyValueStore, StoreError};
use crate::utilities::Utilities;

/// tower-sessions store that keeps each session record in the external
/// key-value store, expiring together with the session.
#[derive(Clone)]
pub struct KvSessionStore {
    kv_storage: Arc<dyn KeyValueStore>,
}

impl KvSessionStore {
    pub fn new(kv_storage: Arc<dyn KeyValueStore>) -> Self {
        Self { kv_storage }
    }
}

impl Debug for KvSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvSessionStore").finish_non_exhaustive()
    }
}

fn record_key(session_id: &Id) -> String {
    Utilities::session_record_key(&session_id.to_string())
}

fn remaining_ttl(expiry_date: OffsetDateTime) -> Option<Duration> {
    let remaining = expiry_date - OffsetDateTime::now_utc();
    if remaining.is_positive() {
        Duration::try_from(remaining).ok()
    } else {
        None
    }
}

fn backend_error(err: StoreError) -> session_store::Error {
    error!("session store failure: {}", err);
    note_store_failure();
    session_store::Error::Backend(err.to_string())
}

impl KvSessionStore {
    async fn put_record(&self, record: &Record) -> session_store::Result<()> {
        let key = record_key(&record.id);
        let Some(ttl) = remaining_ttl(record.expiry_date) else {
            return self
                .kv_storage
                .delete(&key)
                .await
                .map_err(backend_error);
        };
        let serialized_record = serde_json::to_string(record)
            .map_err(|err| session_store::Error::Encode(err.to_string()))?;
        self.kv_storage
            .set(&key, &serialized_record, ttl)
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        while self
            .kv_storage
            .get(&record_key(&record.id))
            .await
            .map_err(backend_error)?
            .is_some()
        {
            record.id = Id::default();
        }

        self.put_record(record).await
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.put_record(record).await
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let Some(raw) = self
            .kv_storage
            .get(&record_key(session_id))
            .await
            .map_err(backend_error)?
        else {
            return Ok(None);
        };

        let record: Record = serde_json::from_str(&raw)
            .map_err(|err| session_store::Error::Decode(err.to_string()))?;

        if is_active(record.expiry_date) {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.kv_storage
            .delete(&record_key(session_id))
            .await
            .map_err(backend_error)
    }
}

fn is_active(expiry_date: OffsetDateTime) -> bool {
    expiry_date > OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use time::Duration;

    use super::*;
    use crate::session_storage::in_memory::MemoryKvStore;

    fn store() -> (KvSessionStore, MemoryKvStore) {
        let kv = MemoryKvStore::new();
        (KvSessionStore::new(Arc::new(kv.clone())), kv)
    }

    fn record(expiry: Duration) -> Record {
        Record {
            id: Id::default(),
            data: HashMap::new(),
            expiry_date: OffsetDateTime::now_utc() + expiry,
        }
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let (store, _) = store();
        let mut record = record(Duration::minutes(30));
        record
            .data
            .insert("csrf_token".to_string(), serde_json::json!("abc"));

        store.create(&mut record).await.unwrap();
        let loaded = store.load(&record.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, record.id);
        assert_eq!(loaded.data, record.data);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (store, kv) = store();
        let mut record = record(Duration::minutes(30));
        store.create(&mut record).await.unwrap();

        record
            .data
            .insert("marker".to_string(), serde_json::json!(true));
        store.save(&record).await.unwrap();

        let loaded = store.load(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.data.get("marker"), Some(&serde_json::json!(true)));
        assert_eq!(kv.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, _) = store();
        let mut record = record(Duration::minutes(30));
        store.create(&mut record).await.unwrap();

        assert!(store.delete(&record.id).await.is_ok());
        assert!(store.load(&record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_record_is_not_stored() {
        let (store, kv) = store();
        let record = record(Duration::minutes(-1));

        store.save(&record).await.unwrap();

        assert!(store.load(&record.id).await.unwrap().is_none());
        assert_eq!(kv.len().await, 0);
    }

    #[tokio::test]
    async fn test_create_id_collision() {
        let (store, _) = store();
        let expiry_date = OffsetDateTime::now_utc() + Duration::minutes(30);
        let mut record1 = Record {
            id: Default::default(),
            data: Default::default(),
            expiry_date,
        };
        let mut record2 = Record {
            id: Default::default(),
            data: Default::default(),
            expiry_date,
        };
        store.create(&mut record1).await.unwrap();
        record2.id = record1.id;
        store.create(&mut record2).await.unwrap();
        assert_ne!(record1.id, record2.id);
    }
}
