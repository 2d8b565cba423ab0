//! In-memory collaborators.
//!
//! Useful for tests, simulations and single-process demos. Nothing here
//! talks to a real service.

pub mod client;
pub mod directory;

pub use client::MemoryChannelClient;
pub use directory::MemoryDirectory;
