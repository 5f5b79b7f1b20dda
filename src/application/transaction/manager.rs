//! Nested transaction manager
//!
//! Lets arbitrarily deep call chains share one session transaction. The
//! first call of a chain opens a session, begins and, at its own exit,
//! commits or rolls back. Every nested call joins the same frame through
//! the context it was handed and only moves the depth counter. Whether a
//! call may commit or roll back is decided by who created the frame, never
//! by the current depth.
//!
//! # Caller contract
//!
//! A unit of work must propagate every failure returned by a nested
//! `run_nested` call. A nested failure does not roll the session back; it
//! only records a deferred rollback intent and leaves the physical rollback
//! to the outermost call. If the outermost unit of work then succeeds, the
//! [`SwallowedFailurePolicy`] decides what happens at the boundary.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Instrument};

use crate::domain::error::{BoxError, SessionResult, TransactionError};
use crate::domain::session::{Session, SessionProvider};
use crate::domain::transaction::{FrameState, TransactionFrame};
use crate::infrastructure::logging;
use crate::shared::context::{Context, ContextKey};

const LEVEL_KEY: &str = "transaction.frame";

fn level_key<S>() -> ContextKey<Level<S>> {
    ContextKey::new(LEVEL_KEY)
}

/// What the outermost call does when it succeeds after a nested failure was
/// swallowed by an intermediate unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwallowedFailurePolicy {
    /// Roll back and report `TransactionError::SwallowedFailure`
    #[default]
    Reject,
    /// Log a warning and commit anyway
    Allow,
}

/// One call's participation in a chain. Stored in the context the call
/// derives, so the rollback procedure knows whose level it is unwinding.
struct Level<S> {
    frame: Arc<TransactionFrame<S>>,
    outermost: bool,
    left: AtomicBool,
}

impl<S> Level<S> {
    /// Mark the level as left. Only the first caller gets `true`.
    fn leave(&self) -> bool {
        !self.left.swap(true, Ordering::SeqCst)
    }
}

/// Leaves the level on drop when no exit path did, e.g. a cancelled future.
///
/// A nested level is unwound as a failure. An abandoned outermost level
/// retires the frame as failed; the session's open transaction is discarded
/// with the last session handle.
struct LevelGuard<S> {
    level: Arc<Level<S>>,
}

impl<S> Drop for LevelGuard<S> {
    fn drop(&mut self) {
        if !self.level.leave() {
            return;
        }
        let frame = &self.level.frame;
        if self.level.outermost {
            if frame.is_active() {
                frame.finish(FrameState::Failed);
                warn!(frame = %frame.id(), "Outermost call abandoned before commit or rollback");
            }
        } else {
            let depth = frame.defer_rollback();
            warn!(frame = %frame.id(), depth, "Nested call abandoned, rollback deferred");
        }
    }
}

/// Result of joining or starting a chain.
///
/// Holds the call's level open. Dropping it before the level was finished
/// unwinds the level as described on the guard.
pub struct Entered<S> {
    /// Derived context carrying the frame
    pub context: Context,
    pub frame: Arc<TransactionFrame<S>>,
    /// The frame was created by this call
    pub outermost: bool,
    guard: LevelGuard<S>,
}

/// Result of the rollback procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// No frame in the context; nothing to do
    NoTransaction,
    /// Nested level left; the session is untouched
    Deferred { depth: usize },
    /// The session was rolled back
    RolledBack,
}

/// Nested transaction manager.
///
/// Cheap to clone; clones share the provider. Units of work that nest further
/// calls capture a clone.
pub struct TransactionManager<P: SessionProvider> {
    inner: Arc<TransactionManagerInner<P>>,
}

struct TransactionManagerInner<P> {
    provider: P,
    policy: SwallowedFailurePolicy,
}

impl<P: SessionProvider> Clone for TransactionManager<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: SessionProvider> TransactionManager<P> {
    pub fn new(provider: P, policy: SwallowedFailurePolicy) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner { provider, policy }),
        }
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    pub fn policy(&self) -> SwallowedFailurePolicy {
        self.inner.policy
    }

    /// Frame carried by `ctx`, if any.
    pub fn frame(&self, ctx: &Context) -> Option<Arc<TransactionFrame<P::Session>>> {
        ctx.value(level_key::<P::Session>())
            .map(|level| level.frame.clone())
    }

    /// Session bound to the chain in `ctx`, or a fresh autocommit session
    /// when no transaction is active.
    pub async fn session(&self, ctx: &Context) -> Result<Arc<P::Session>, TransactionError> {
        match self.frame(ctx) {
            Some(frame) if frame.is_active() => Ok(frame.session().clone()),
            _ => self
                .inner
                .provider
                .open_session()
                .await
                .map_err(TransactionError::SessionUnavailable),
        }
    }

    /// Join the frame in `ctx`, or create one at depth 1 with a new session.
    ///
    /// Does not begin the session; `run_nested` does that for the outermost
    /// call.
    pub async fn enter(&self, ctx: &Context) -> Result<Entered<P::Session>, TransactionError> {
        let key = level_key::<P::Session>();

        let (frame, outermost) = match ctx.value(key) {
            Some(parent) => {
                let depth = parent.frame.join()?;
                debug!(frame = %parent.frame.id(), depth, "Joined transaction");
                (parent.frame.clone(), false)
            }
            None => {
                let session = self
                    .inner
                    .provider
                    .open_session()
                    .await
                    .map_err(TransactionError::SessionUnavailable)?;
                (Arc::new(TransactionFrame::new(session)), true)
            }
        };

        let level = Arc::new(Level {
            frame: frame.clone(),
            outermost,
            left: AtomicBool::new(false),
        });
        Ok(Entered {
            context: ctx.with_value(key, level.clone()),
            frame,
            outermost,
            guard: LevelGuard { level },
        })
    }

    /// Rollback procedure for the level that derived `ctx`.
    ///
    /// Only the call that created the frame touches the session. A nested
    /// level steps the depth down once and records a deferred rollback.
    pub async fn rollback(&self, ctx: &Context) -> Result<RollbackOutcome, TransactionError> {
        let Some(level) = ctx.value(level_key::<P::Session>()) else {
            return Ok(RollbackOutcome::NoTransaction);
        };
        let frame = &level.frame;

        if !level.outermost {
            let depth = if level.leave() {
                let depth = frame.defer_rollback();
                debug!(frame = %frame.id(), depth, "Rollback deferred to outermost call");
                depth
            } else {
                frame.depth()
            };
            frame.ensure_active()?;
            return Ok(RollbackOutcome::Deferred { depth });
        }

        frame.ensure_active()?;
        level.leave();
        self.abort(frame, None).await?;
        Ok(RollbackOutcome::RolledBack)
    }

    /// Run `unit_of_work` inside the chain's transaction.
    ///
    /// The unit of work receives the derived context (pass it to nested
    /// calls) and the shared session. Its error is returned unchanged after
    /// the rollback procedure ran; manager failures are converted into `E`.
    /// If the terminal rollback itself fails, `RollbackFailed` is returned
    /// instead and carries the unit of work's error as `original`.
    ///
    /// Dropping the returned future before it completes unwinds the call's
    /// level like a failure.
    pub async fn run_nested<T, E, F, Fut>(&self, ctx: &Context, unit_of_work: F) -> Result<T, E>
    where
        F: FnOnce(Context, Arc<P::Session>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError> + std::error::Error + Send + Sync + 'static,
    {
        let entered = self.enter(ctx).await?;
        let frame = entered.frame.clone();

        if entered.outermost {
            if let Err(err) = frame.session().begin().await {
                frame.finish(FrameState::Failed);
                error!(frame = %frame.id(), error = %err, "Failed to begin transaction");
                return Err(TransactionError::BeginFailed(err).into());
            }
            debug!(frame = %frame.id(), "Transaction started");
        }

        let parent = logging::span(ctx);
        let span = tracing::debug_span!(
            parent: &parent,
            "unit_of_work",
            frame = %frame.id(),
            depth = frame.depth()
        );
        let outcome = unit_of_work(entered.context.clone(), frame.session().clone())
            .instrument(span)
            .await;

        match outcome {
            Ok(value) => {
                self.complete(&entered.guard.level).await?;
                Ok(value)
            }
            Err(err) => match self.rollback(&entered.context).await {
                Ok(_) => Err(err),
                Err(TransactionError::RollbackFailed { source, .. }) => {
                    Err(TransactionError::RollbackFailed {
                        source,
                        original: Some(Box::new(err)),
                    }
                    .into())
                }
                Err(other) => {
                    warn!(frame = %frame.id(), error = %other, "Rollback skipped");
                    Err(err)
                }
            },
        }
    }

    /// Success exit of one call. Only the frame's creator commits; a nested
    /// level steps the depth down.
    async fn complete(&self, level: &Level<P::Session>) -> Result<(), TransactionError> {
        let frame = &level.frame;

        if !level.outermost {
            if level.leave() {
                let depth = frame.leave();
                debug!(frame = %frame.id(), depth, "Left nested transaction");
            }
            return frame.ensure_active();
        }

        frame.ensure_active()?;
        level.leave();

        let pending = frame.depth().saturating_sub(1);
        if pending > 0 {
            error!(
                frame = %frame.id(),
                pending,
                "Outermost call finished with nested calls still open, rolling back"
            );
            let reason = TransactionError::PendingNested {
                frame: frame.id(),
                pending,
            };
            return self.abort(frame, Some(reason)).await;
        }

        let deferred = frame.deferred_rollbacks();
        if deferred > 0 {
            match self.inner.policy {
                SwallowedFailurePolicy::Reject => {
                    error!(
                        frame = %frame.id(),
                        deferred,
                        "Nested failure swallowed before commit, rolling back"
                    );
                    let reason = TransactionError::SwallowedFailure {
                        frame: frame.id(),
                        deferred,
                    };
                    return self.abort(frame, Some(reason)).await;
                }
                SwallowedFailurePolicy::Allow => {
                    warn!(
                        frame = %frame.id(),
                        deferred,
                        "Committing despite swallowed nested failure"
                    );
                }
            }
        }

        match frame.session().commit().await {
            Ok(()) => {
                frame.finish(FrameState::Committed);
                info!(
                    frame = %frame.id(),
                    elapsed_ms = frame.elapsed_ms(),
                    "Transaction committed"
                );
                Ok(())
            }
            Err(err) => {
                frame.finish(FrameState::Failed);
                error!(frame = %frame.id(), error = %err, "Commit failed");
                Err(TransactionError::CommitFailed(err))
            }
        }
    }

    /// Physical rollback of the frame's session. `reason` is returned as the
    /// error once the rollback succeeded, or kept as `original` if it failed.
    async fn abort(
        &self,
        frame: &TransactionFrame<P::Session>,
        reason: Option<TransactionError>,
    ) -> Result<(), TransactionError> {
        match frame.session().rollback().await {
            Ok(()) => {
                frame.finish(FrameState::RolledBack);
                info!(
                    frame = %frame.id(),
                    elapsed_ms = frame.elapsed_ms(),
                    "Transaction rolled back"
                );
                reason.map_or(Ok(()), Err)
            }
            Err(source) => {
                frame.finish(FrameState::Failed);
                error!(frame = %frame.id(), error = %source, "Rollback failed");
                Err(TransactionError::RollbackFailed {
                    source,
                    original: reason.map(|reason| Box::new(reason) as BoxError),
                })
            }
        }
    }

    /// Close the provider.
    pub async fn close(&self) -> SessionResult<()> {
        self.inner.provider.close().await
    }
}

impl<P: SessionProvider> std::fmt::Debug for TransactionManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("policy", &self.inner.policy)
            .finish()
    }
}
