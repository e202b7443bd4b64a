//! Derived views over the durable store.
//!
//! The mirror exposes synchronous reads and mutation APIs for the
//! user-scoped state (favorites, owned recipes, reviews, profile) and
//! keeps every mounted consumer consistent through the signal bus:
//! a mutation is read-modify-write on the store followed by a same-tab
//! signal; other tabs arrive through storage events.
//!
//! Stats are recomputed from their source sequences on every call and
//! never cached, so they cannot drift.

pub mod favorites;
pub mod profile;
pub mod stats;

pub use favorites::{FavoriteRecord, Favorites, FavoritesReader};
pub use profile::{ProfileStore, ProfileUpdate, UserProfile};
pub use stats::{OwnedRecipe, Review, ReviewInput, Stats, UserStats};

use std::sync::Arc;

use crate::signal::SignalBus;
use crate::store::DurableStore;

/// Convenience facade bundling the per-concern mirrors over one store
/// and one bus.
pub struct StateMirror {
    pub favorites: Favorites,
    pub profile: ProfileStore,
    pub stats: Stats,
}

impl StateMirror {
    pub fn new(store: Arc<dyn DurableStore>, bus: SignalBus) -> Self {
        Self {
            favorites: Favorites::new(Arc::clone(&store), bus.clone()),
            profile: ProfileStore::new(Arc::clone(&store)),
            stats: Stats::new(store, bus),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
