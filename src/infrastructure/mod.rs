//! Infrastructure layer - external concerns

pub mod database;
pub mod logging;
pub mod storage;

pub use database::{init_database, DatabaseConfig, SeaOrmSession, SeaOrmSessionProvider};
pub use logging::{init_tracing, DailyFileWriter, LoggingError};
pub use storage::{InMemorySession, InMemorySessionProvider};
