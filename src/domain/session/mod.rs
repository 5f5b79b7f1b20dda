//! Session abstraction
//!
//! Contains the transactional session handle and the provider that hands
//! sessions out to new call chains.

pub mod provider;

pub use provider::{Session, SessionProvider};
