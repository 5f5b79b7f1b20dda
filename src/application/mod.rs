pub mod transaction;

// Re-export key types for convenience
pub use transaction::{Entered, RollbackOutcome, SwallowedFailurePolicy, TransactionManager};
