//! SeaORM implementation of SessionProvider

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, ExecResult,
    QueryResult, Statement, TransactionTrait, Value,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{init_database, DatabaseConfig};
use crate::domain::error::{SessionError, SessionResult};
use crate::domain::session::{Session, SessionProvider};

/// Session provider backed by one SeaORM connection pool.
///
/// ```ignore
/// let provider = SeaOrmSessionProvider::connect(&DatabaseConfig::sqlite("./app.db")).await?;
/// let manager = TransactionManager::new(provider, SwallowedFailurePolicy::Reject);
/// ```
pub struct SeaOrmSessionProvider {
    db: DatabaseConnection,
    closed: AtomicBool,
}

impl SeaOrmSessionProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbErr> {
        Ok(Self::new(init_database(config).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl SessionProvider for SeaOrmSessionProvider {
    type Session = SeaOrmSession;

    async fn open_session(&self) -> SessionResult<Arc<SeaOrmSession>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        Ok(Arc::new(SeaOrmSession::new(self.db.clone())))
    }

    async fn close(&self) -> SessionResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.db.clone().close().await?;
        info!("Database connection closed");
        Ok(())
    }
}

/// Unit-of-work session over a SeaORM connection.
///
/// Holds at most one open `DatabaseTransaction`. Statements run inside it
/// while it is open and directly on the connection otherwise.
pub struct SeaOrmSession {
    db: DatabaseConnection,
    txn: Mutex<Option<DatabaseTransaction>>,
}

impl SeaOrmSession {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            txn: Mutex::new(None),
        }
    }

    pub fn backend(&self) -> DbBackend {
        self.db.get_database_backend()
    }

    /// Build a statement for this session's backend.
    pub fn statement<I>(&self, sql: &str, values: I) -> Statement
    where
        I: IntoIterator<Item = Value>,
    {
        Statement::from_sql_and_values(self.backend(), sql, values)
    }

    pub async fn in_transaction(&self) -> bool {
        self.txn.lock().await.is_some()
    }

    pub async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let txn = self.txn.lock().await;
        match txn.as_ref() {
            Some(txn) => txn.execute(stmt).await,
            None => self.db.execute(stmt).await,
        }
    }

    pub async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let txn = self.txn.lock().await;
        match txn.as_ref() {
            Some(txn) => txn.execute_unprepared(sql).await,
            None => self.db.execute_unprepared(sql).await,
        }
    }

    pub async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let txn = self.txn.lock().await;
        match txn.as_ref() {
            Some(txn) => txn.query_one(stmt).await,
            None => self.db.query_one(stmt).await,
        }
    }

    pub async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let txn = self.txn.lock().await;
        match txn.as_ref() {
            Some(txn) => txn.query_all(stmt).await,
            None => self.db.query_all(stmt).await,
        }
    }
}

#[async_trait]
impl Session for SeaOrmSession {
    async fn begin(&self) -> SessionResult<()> {
        let mut txn = self.txn.lock().await;
        if txn.is_some() {
            return Err(SessionError::AlreadyActive);
        }
        *txn = Some(self.db.begin().await?);
        debug!("Database transaction opened");
        Ok(())
    }

    async fn commit(&self) -> SessionResult<()> {
        let txn = self.txn.lock().await.take().ok_or(SessionError::NotActive)?;
        txn.commit().await?;
        debug!("Database transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> SessionResult<()> {
        let txn = self.txn.lock().await.take().ok_or(SessionError::NotActive)?;
        txn.rollback().await?;
        debug!("Database transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transaction::{SwallowedFailurePolicy, TransactionManager};
    use crate::domain::error::AppError;
    use crate::shared::context::Context;

    async fn setup() -> SeaOrmSessionProvider {
        let provider = SeaOrmSessionProvider::connect(&DatabaseConfig::sqlite_memory())
            .await
            .unwrap();
        provider
            .connection()
            .execute_unprepared(
                "CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, balance INTEGER NOT NULL)",
            )
            .await
            .unwrap();
        provider
    }

    async fn count_accounts(session: &SeaOrmSession) -> i64 {
        let row = session
            .query_one(session.statement("SELECT COUNT(*) AS n FROM accounts", Vec::<Value>::new()))
            .await
            .unwrap()
            .unwrap();
        row.try_get::<i64>("", "n").unwrap()
    }

    async fn insert_account(session: &SeaOrmSession, owner: &str, balance: i64) -> Result<(), DbErr> {
        session
            .execute(session.statement(
                "INSERT INTO accounts (owner, balance) VALUES (?, ?)",
                [Value::from(owner), Value::from(balance)],
            ))
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_session_commit_and_rollback() {
        let provider = setup().await;
        let session = provider.open_session().await.unwrap();

        session.begin().await.unwrap();
        assert!(session.in_transaction().await);
        insert_account(&session, "alice", 10).await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(count_accounts(&session).await, 0);

        session.begin().await.unwrap();
        insert_account(&session, "bob", 20).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(count_accounts(&session).await, 1);
        assert!(!session.in_transaction().await);
    }

    #[tokio::test]
    async fn test_session_boundary_misuse() {
        let provider = setup().await;
        let session = provider.open_session().await.unwrap();

        assert!(matches!(session.commit().await, Err(SessionError::NotActive)));
        session.begin().await.unwrap();
        assert!(matches!(session.begin().await, Err(SessionError::AlreadyActive)));
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_nested_chain_commits_once() {
        let manager = TransactionManager::new(setup().await, SwallowedFailurePolicy::Reject);

        let result: Result<i64, AppError> = manager
            .run_nested(&Context::background(), |ctx, session| {
                let manager = manager.clone();
                async move {
                    insert_account(&session, "alice", 100).await?;
                    manager
                        .run_nested(&ctx, |_ctx, inner| async move {
                            insert_account(&inner, "bob", 50).await?;
                            Ok::<_, AppError>(())
                        })
                        .await?;
                    // uncommitted writes of the inner call are visible here
                    Ok(count_accounts(&session).await)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        let session = manager.session(&Context::background()).await.unwrap();
        assert!(!session.in_transaction().await);
        let rows = session
            .query_all(session.statement(
                "SELECT owner FROM accounts ORDER BY owner",
                Vec::<Value>::new(),
            ))
            .await
            .unwrap();
        let owners: Vec<String> = rows
            .iter()
            .map(|row| row.try_get::<String>("", "owner").unwrap())
            .collect();
        assert_eq!(owners, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_inner_failure_rolls_back_whole_chain() {
        let manager = TransactionManager::new(setup().await, SwallowedFailurePolicy::Reject);

        let result: Result<(), AppError> = manager
            .run_nested(&Context::background(), |ctx, session| {
                let manager = manager.clone();
                async move {
                    insert_account(&session, "alice", 100).await?;
                    manager
                        .run_nested(&ctx, |_ctx, inner| async move {
                            insert_account(&inner, "bob", -5).await?;
                            Err::<(), _>(AppError::Validation("negative balance".into()))
                        })
                        .await
                }
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        let session = manager.session(&Context::background()).await.unwrap();
        assert_eq!(count_accounts(&session).await, 0);
    }

    #[tokio::test]
    async fn test_closed_provider_refuses_sessions() {
        let provider = setup().await;
        provider.close().await.unwrap();
        provider.close().await.unwrap();
        assert!(matches!(
            provider.open_session().await,
            Err(SessionError::Closed)
        ));
    }
}
