//! # nested-tx
//!
//! Nested transactions over a database session.
//!
//! Any number of nested calls share one transaction: only the outermost call
//! begins and commits or rolls back, inner calls join through the call-chain
//! context.
//!
//! ## Architecture
//!
//! The project follows Clean Architecture principles:
//!
//! - **domain**: Errors, the session contracts and the transaction frame
//! - **application**: The nested transaction manager
//! - **infrastructure**: SeaORM and in-memory sessions, logging
//! - **shared**: The call-chain context
//! - **config**: TOML configuration

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod shared;

pub use config::{default_config_path, AppConfig};

pub use application::{RollbackOutcome, SwallowedFailurePolicy, TransactionManager};
pub use domain::{AppError, AppResult, Session, SessionError, SessionProvider, TransactionError};
pub use shared::{Context, ContextKey};

// Re-export database types for easy access
pub use infrastructure::{init_database, DatabaseConfig, SeaOrmSession, SeaOrmSessionProvider};
