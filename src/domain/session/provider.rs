//! Session and session provider interfaces

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::SessionResult;

/// A unit-of-work session with flat Begin/Commit/Rollback primitives.
///
/// The session has no notion of nested transactions; nesting is handled by
/// the transaction manager. Read/write operations are specific to each
/// implementation and are used directly by units of work.
#[async_trait]
pub trait Session: Send + Sync {
    async fn begin(&self) -> SessionResult<()>;
    async fn commit(&self) -> SessionResult<()>;
    async fn rollback(&self) -> SessionResult<()>;
}

/// Source of sessions, injected into the transaction manager.
#[async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Open a session for a new call chain.
    async fn open_session(&self) -> SessionResult<Arc<Self::Session>>;

    /// Release the provider's resources. Sessions opened afterwards fail.
    async fn close(&self) -> SessionResult<()>;
}
