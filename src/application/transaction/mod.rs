//! Nested transaction use case

pub mod manager;

pub use manager::{Entered, RollbackOutcome, SwallowedFailurePolicy, TransactionManager};
