pub mod error;
pub mod session;
pub mod transaction;

// Re-export commonly used types
pub use error::{AppError, AppResult, BoxError, SessionError, SessionResult, TransactionError};
pub use session::{Session, SessionProvider};
pub use transaction::{FrameState, TransactionFrame};
