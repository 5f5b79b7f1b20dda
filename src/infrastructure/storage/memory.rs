//! In-memory session provider
//!
//! A key/value store with transactional sessions: writes made inside a
//! transaction are staged on the session and become visible to other
//! sessions only after commit. Outside a transaction writes apply directly.
//! The provider counts boundary calls and can inject one-shot failures,
//! which makes it the test double for the transaction manager.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::domain::error::{SessionError, SessionResult};
use crate::domain::session::{Session, SessionProvider};

#[derive(Default)]
struct Counters {
    sessions: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

#[derive(Default)]
struct Faults {
    begin: AtomicBool,
    commit: AtomicBool,
    rollback: AtomicBool,
}

#[derive(Default)]
struct Shared {
    data: DashMap<String, String>,
    counters: Counters,
    faults: Faults,
    closed: AtomicBool,
}

fn injected(flag: &AtomicBool, operation: &str) -> SessionResult<()> {
    if flag.swap(false, Ordering::SeqCst) {
        return Err(SessionError::Other(format!("injected {} failure", operation)));
    }
    Ok(())
}

/// In-memory provider for development and testing
#[derive(Clone, Default)]
pub struct InMemorySessionProvider {
    shared: Arc<Shared>,
}

impl InMemorySessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions handed out so far.
    pub fn sessions_opened(&self) -> usize {
        self.shared.counters.sessions.load(Ordering::SeqCst)
    }

    /// Begin calls, including failed ones.
    pub fn begins(&self) -> usize {
        self.shared.counters.begins.load(Ordering::SeqCst)
    }

    /// Commit calls, including failed ones.
    pub fn commits(&self) -> usize {
        self.shared.counters.commits.load(Ordering::SeqCst)
    }

    /// Rollback calls, including failed ones.
    pub fn rollbacks(&self) -> usize {
        self.shared.counters.rollbacks.load(Ordering::SeqCst)
    }

    pub fn fail_next_begin(&self) {
        self.shared.faults.begin.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_commit(&self) {
        self.shared.faults.commit.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_rollback(&self) {
        self.shared.faults.rollback.store(true, Ordering::SeqCst);
    }

    /// Committed value for `key`.
    pub fn committed(&self, key: &str) -> Option<String> {
        self.shared.data.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }
}

#[async_trait]
impl SessionProvider for InMemorySessionProvider {
    type Session = InMemorySession;

    async fn open_session(&self) -> SessionResult<Arc<InMemorySession>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.shared.counters.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySession {
            shared: self.shared.clone(),
            staged: Mutex::new(None),
        }))
    }

    async fn close(&self) -> SessionResult<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Session over the in-memory store.
///
/// `staged` is `Some` while a transaction is open; a `None` value in the
/// staged map marks a deletion.
pub struct InMemorySession {
    shared: Arc<Shared>,
    staged: Mutex<Option<HashMap<String, Option<String>>>>,
}

impl InMemorySession {
    fn staged(&self) -> MutexGuard<'_, Option<HashMap<String, Option<String>>>> {
        self.staged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn in_transaction(&self) -> bool {
        self.staged().is_some()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.staged().as_mut() {
            Some(staged) => {
                staged.insert(key, Some(value));
            }
            None => {
                self.shared.data.insert(key, value);
            }
        }
    }

    /// Read through staged writes, then the committed store.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(staged) = self.staged().as_ref() {
            if let Some(entry) = staged.get(key) {
                return entry.clone();
            }
        }
        self.shared.data.get(key).map(|v| v.value().clone())
    }

    /// Remove `key`. Returns whether it was visible before the call.
    pub fn delete(&self, key: &str) -> bool {
        let existed = self.get(key).is_some();
        match self.staged().as_mut() {
            Some(staged) => {
                staged.insert(key.to_string(), None);
            }
            None => {
                self.shared.data.remove(key);
            }
        }
        existed
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn begin(&self) -> SessionResult<()> {
        self.shared.counters.begins.fetch_add(1, Ordering::SeqCst);
        injected(&self.shared.faults.begin, "begin")?;

        let mut staged = self.staged();
        if staged.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        *staged = Some(HashMap::new());
        Ok(())
    }

    async fn commit(&self) -> SessionResult<()> {
        self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        let writes = self.staged().take().ok_or(SessionError::NotActive)?;
        // a failed commit discards the transaction
        injected(&self.shared.faults.commit, "commit")?;

        debug!(writes = writes.len(), "Applying staged writes");
        for (key, value) in writes {
            match value {
                Some(value) => {
                    self.shared.data.insert(key, value);
                }
                None => {
                    self.shared.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&self) -> SessionResult<()> {
        self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        let writes = self.staged().take().ok_or(SessionError::NotActive)?;
        injected(&self.shared.faults.rollback, "rollback")?;

        debug!(writes = writes.len(), "Discarding staged writes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_staged_writes_visible_only_after_commit() {
        let provider = InMemorySessionProvider::new();
        let writer = provider.open_session().await.unwrap();
        let reader = provider.open_session().await.unwrap();

        writer.begin().await.unwrap();
        writer.put("balance", "100");
        assert_eq!(writer.get("balance").as_deref(), Some("100"));
        assert!(reader.get("balance").is_none());

        writer.commit().await.unwrap();
        assert_eq!(reader.get("balance").as_deref(), Some("100"));
        assert_eq!(provider.commits(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_deletes() {
        let provider = InMemorySessionProvider::new();
        let session = provider.open_session().await.unwrap();
        session.put("kept", "yes");

        session.begin().await.unwrap();
        session.put("dropped", "no");
        assert!(session.delete("kept"));
        assert!(session.get("kept").is_none());
        session.rollback().await.unwrap();

        assert_eq!(provider.committed("kept").as_deref(), Some("yes"));
        assert!(provider.committed("dropped").is_none());
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_boundary_misuse() {
        let provider = InMemorySessionProvider::new();
        let session = provider.open_session().await.unwrap();

        assert!(matches!(session.commit().await, Err(SessionError::NotActive)));
        assert!(matches!(session.rollback().await, Err(SessionError::NotActive)));
        session.begin().await.unwrap();
        assert!(matches!(session.begin().await, Err(SessionError::AlreadyActive)));
    }

    #[tokio::test]
    async fn test_injected_failures_are_one_shot() {
        let provider = InMemorySessionProvider::new();
        let session = provider.open_session().await.unwrap();

        provider.fail_next_begin();
        assert!(session.begin().await.is_err());
        session.begin().await.unwrap();
        assert_eq!(provider.begins(), 2);
    }

    #[tokio::test]
    async fn test_closed_provider_refuses_sessions() {
        let provider = InMemorySessionProvider::new();
        provider.close().await.unwrap();
        assert!(matches!(
            provider.open_session().await,
            Err(SessionError::Closed)
        ));
    }
}
