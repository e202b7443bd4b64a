//! Client-side data synchronization core for a recipe catalogue UI.
//!
//! The crate keeps independently mounted UI fragments (and independent
//! tabs) consistent without a server round-trip per render:
//!
//! - [`store`]: durable key-value storage behind one adapter, so quota
//!   and corruption failures are handled in a single place
//! - [`signal`]: a two-channel publish/subscribe bus - same-tab named
//!   signals plus cross-tab storage change events
//! - [`query`]: a keyed, TTL-based, stale-while-revalidate cache for
//!   asynchronous fetch results, with per-key fetch de-duplication
//! - [`mirror`]: derived favorites/stats/profile views over the store,
//!   re-reading on every signal
//! - [`api`]: the result-envelope contract with the network client
//!
//! Data flow: a consumer asks the [`query::QueryCache`] for a key; on
//! miss or staleness the supplied fetch function runs and the result is
//! cached. Mutations in [`mirror`] write the durable store and then
//! emit a payload-free signal; every mounted mirror re-reads and
//! re-renders. Signals deliberately carry no data, so nothing can go
//! stale between a signal and the store contents.
//!
//! No global state: the cache, bus, and store are explicit instances
//! owned by the composition root and passed to consumers, which keeps
//! tests isolated.

pub mod api;
pub mod mirror;
pub mod query;
pub mod signal;
pub mod store;

pub use api::{ApiResponse, Pagination};
pub use mirror::{
    FavoriteRecord, Favorites, FavoritesReader, OwnedRecipe, ProfileStore, ProfileUpdate,
    Review, ReviewInput, StateMirror, Stats, UserProfile, UserStats,
};
pub use query::{KeyPattern, QueryCache, QueryOptions, QueryState};
pub use signal::{Signal, SignalBus, StorageEvent, Subscription};
pub use store::{DurableStore, FileStore, MemoryStore, StoreError};
