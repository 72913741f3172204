//! Conversation history management.
//!
//! | Concern | Module |
//! |---------|--------|
//! | Scoring entries on insert | [`importance`] |
//! | Recency + importance trimming, stats | [`manager`] |
//! | Shrinking UI-tree payloads before a request | [`compress`] |
//! | Goal / phase / progress record and its summary | [`snapshot`] |
//! | Character-based token estimate | [`token`] |

pub mod compress;
pub mod importance;
pub mod manager;
pub mod snapshot;
pub mod token;

pub use manager::{ContextManager, ContextStats};
pub use snapshot::{ContextSnapshot, SnapshotUpdate};
