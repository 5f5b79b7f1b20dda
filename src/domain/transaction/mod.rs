//! Nested transaction aggregate
//!
//! The frame shared by every call of one nested-transaction chain.

pub mod model;

pub use model::{FrameState, TransactionFrame};
