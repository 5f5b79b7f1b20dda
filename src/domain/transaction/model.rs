//! Transaction frame entity

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::error::TransactionError;

/// Lifecycle state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameState {
    /// Chain in progress
    Active = 0,
    /// Outermost call committed
    Committed = 1,
    /// Outermost call rolled back
    RolledBack = 2,
    /// Begin, commit or rollback itself failed
    Failed = 3,
}

impl FrameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Committed,
            2 => Self::RolledBack,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared state of one nested-transaction chain.
///
/// Created once by the outermost call and shared by `Arc` with every nested
/// call of the chain. The session is fixed for the frame's lifetime; only the
/// depth counter, the deferred-rollback counter and the state move.
///
/// The counters are atomics so the frame can cross `.await` points on a
/// multi-threaded runtime. They are not a synchronisation mechanism: a frame
/// belongs to one sequential call chain.
pub struct TransactionFrame<S> {
    id: Uuid,
    session: Arc<S>,
    depth: AtomicUsize,
    deferred_rollbacks: AtomicUsize,
    state: AtomicU8,
    started_at: DateTime<Utc>,
}

impl<S> TransactionFrame<S> {
    /// New frame at depth 1.
    pub fn new(session: Arc<S>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session,
            depth: AtomicUsize::new(1),
            deferred_rollbacks: AtomicUsize::new(0),
            state: AtomicU8::new(FrameState::Active as u8),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> &Arc<S> {
        &self.session
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> FrameState {
        FrameState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == FrameState::Active
    }

    /// Inner rollback intents that were deferred to the outermost call.
    pub fn deferred_rollbacks(&self) -> usize {
        self.deferred_rollbacks.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    pub fn ensure_active(&self) -> Result<(), TransactionError> {
        match self.state() {
            FrameState::Active => Ok(()),
            state => Err(TransactionError::FrameClosed {
                frame: self.id,
                state,
            }),
        }
    }

    /// Join the chain one level deeper. Returns the new depth.
    pub(crate) fn join(&self) -> Result<usize, TransactionError> {
        self.ensure_active()?;
        Ok(self.depth.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Leave one nested level. Returns the new depth.
    pub(crate) fn leave(&self) -> usize {
        let previous = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1).max(1)))
            .unwrap_or(1);
        previous.saturating_sub(1).max(1)
    }

    /// Leave one nested level while recording a rollback intent.
    pub(crate) fn defer_rollback(&self) -> usize {
        self.deferred_rollbacks.fetch_add(1, Ordering::SeqCst);
        self.leave()
    }

    pub(crate) fn finish(&self, state: FrameState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl<S> fmt::Debug for TransactionFrame<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFrame")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .field("state", &self.state())
            .field("deferred_rollbacks", &self.deferred_rollbacks())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_frame_starts_at_depth_one() {
        let frame = TransactionFrame::new(Arc::new(()));
        assert_eq!(frame.depth(), 1);
        assert_eq!(frame.state(), FrameState::Active);
        assert_eq!(frame.deferred_rollbacks(), 0);
    }

    #[test]
    fn test_join_and_leave() {
        let frame = TransactionFrame::new(Arc::new(()));
        assert_eq!(frame.join().unwrap(), 2);
        assert_eq!(frame.join().unwrap(), 3);
        assert_eq!(frame.leave(), 2);
        assert_eq!(frame.defer_rollback(), 1);
        assert_eq!(frame.deferred_rollbacks(), 1);
        // never drops below one while reachable
        assert_eq!(frame.leave(), 1);
    }

    #[test]
    fn test_terminal_frame_rejects_join() {
        let frame = TransactionFrame::new(Arc::new(()));
        frame.finish(FrameState::Committed);

        match frame.join() {
            Err(TransactionError::FrameClosed { state, .. }) => {
                assert_eq!(state, FrameState::Committed)
            }
            other => panic!("expected FrameClosed, got {:?}", other),
        }
        assert!(FrameState::RolledBack.is_terminal());
        assert_eq!(FrameState::RolledBack.to_string(), "rolled back");
    }
}
