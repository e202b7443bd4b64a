//! Durable key-value storage for user-scoped state.
//!
//! Everything the app persists between sessions (favorites, profile,
//! owned recipes, reviews) goes through the `DurableStore` trait so
//! quota and I/O failures are handled in one place. Two backends are
//! provided:
//!
//! - `MemoryStore`: process-local, used in tests and ephemeral embeds
//! - `FileStore`: one JSON file per key under a data directory
//!
//! A write is only visible to *other* contexts through the change
//! notification layer (see the `signal` module); the writer's own
//! context must emit a same-tab signal itself.

pub mod adapter;
pub mod keys;

pub use adapter::{DurableStore, FileStore, MemoryStore, StoreError};
