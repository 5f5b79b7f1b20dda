//! In-memory session provider

mod memory;

pub use memory::{InMemorySession, InMemorySessionProvider};
