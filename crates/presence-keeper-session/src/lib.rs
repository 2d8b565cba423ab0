//! Attempt serialization and the presence maintainer.
//!
//! Provides:
//! - `AttemptSerializer` - Per-scope guard against overlapping attempts
//! - `PresenceMaintainer` - Health checks, reactive repair and backoff
//! - In-memory collaborators (feature: memory)

pub mod maintainer;
pub mod serializer;

#[cfg(feature = "memory")]
pub mod memory;

pub use maintainer::{Outcome, Phase, PresenceMaintainer, Trigger};
pub use serializer::{AttemptGuard, AttemptSerializer, AttemptState};

#[cfg(feature = "memory")]
pub use memory::{MemoryChannelClient, MemoryDirectory};
