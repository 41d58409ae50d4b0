//! External session store contract.
//!
//! Everything the gateway remembers about a browser client lives behind
//! [`KeyValueStore`]: the tower-sessions record, the authorized-client record
//! and, through the session record, the CSRF token. The gateway process itself
//! holds no per-session state.

use async_trait::async_trait;
use custom_error::custom_error;
use std::cell::Cell;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

pub mod in_memory;
pub mod kv_session_store;
#[cfg(feature = "redis")]
pub mod redis;

custom_error! {
    pub StoreError
        Backend{message: String} = "session store backend failed: {message}",
        Serialization{source: serde_json::Error} = "could not serialize session store value: {source}",
}

tokio::task_local! {
    static STORE_FAILED: Cell<bool>;
}

/// Runs `future` and reports whether a session store call inside it failed.
pub async fn track_store_failures<F: Future>(future: F) -> (F::Output, bool) {
    STORE_FAILED
        .scope(Cell::new(false), async move {
            let output = future.await;
            (output, STORE_FAILED.with(Cell::get))
        })
        .await
}

/// Marks the surrounding [`track_store_failures`] scope as failed, if any.
pub(crate) fn note_store_failure() {
    let _ = STORE_FAILED.try_with(|failed| failed.set(true));
}

/// A key-value store with per-key expiry.
///
/// `set` is an unconditional upsert. The `compare_and_*` operations are atomic
/// with respect to every other operation on the same key.
#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Replaces the value only if the current value equals `expected`.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Resets the expiry of an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Deletes the key only if the current value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;
}
