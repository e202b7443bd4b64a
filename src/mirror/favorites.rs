use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::signal::{Signal, SignalBus, Subscription};
use crate::store::{keys, DurableStore};

/// A favorited recipe. Only the id is required; older persisted data
/// stored bare id strings and is normalized to this shape on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: String,
}

/// Both persisted forms of a favorites element.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredFavorite {
    Bare(String),
    Record(FavoriteRecord),
}

/// Read and normalize the favorites sequence. Storage failures and
/// malformed JSON both degrade to an empty list; a corrupt value is
/// left in place until the next successful write replaces it.
fn read_favorites(store: &dyn DurableStore) -> Vec<FavoriteRecord> {
    let raw = match store.read(keys::FAVORITES) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!(error = %e, "failed to read favorites");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Vec<StoredFavorite>>(&raw) {
        Ok(stored) => stored
            .into_iter()
            .map(|f| match f {
                StoredFavorite::Bare(id) => FavoriteRecord { id },
                StoredFavorite::Record(record) => record,
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "malformed favorites value, treating as empty");
            Vec::new()
        }
    }
}

/// Favorites mutation API over the durable store.
///
/// A toggle is read-modify-write followed by a same-tab signal. Two
/// toggles racing before either write completes can lose an update;
/// last write wins, within a tab and across tabs alike.
pub struct Favorites {
    store: Arc<dyn DurableStore>,
    bus: SignalBus,
}

impl Favorites {
    pub fn new(store: Arc<dyn DurableStore>, bus: SignalBus) -> Self {
        Self { store, bus }
    }

    /// The current favorites sequence, normalized.
    pub fn get(&self) -> Vec<FavoriteRecord> {
        read_favorites(self.store.as_ref())
    }

    pub fn is_favorited(&self, id: &str) -> bool {
        self.get().iter().any(|f| f.id == id)
    }

    /// Add `id` to the favorites if absent, remove it if present.
    /// Returns the new membership. The sequence never holds duplicate
    /// ids after a toggle.
    pub fn toggle(&self, id: &str) -> Result<bool> {
        let mut favorites = self.get();
        let was_favorited = favorites.iter().any(|f| f.id == id);
        if was_favorited {
            favorites.retain(|f| f.id != id);
        } else {
            favorites.push(FavoriteRecord { id: id.to_string() });
        }

        let contents =
            serde_json::to_string(&favorites).context("Failed to encode favorites")?;
        self.store
            .write(keys::FAVORITES, &contents)
            .context("Failed to write favorites")?;
        debug!(id, favorited = !was_favorited, "favorite toggled");

        // The favorites count feeds the stats view as well
        self.bus.emit(Signal::FavoritesChanged);
        self.bus.emit(Signal::StatsChanged);
        Ok(!was_favorited)
    }

    /// Remove the favorites key entirely.
    pub fn clear(&self) -> Result<()> {
        self.store
            .remove(keys::FAVORITES)
            .context("Failed to clear favorites")?;
        self.bus.emit(Signal::FavoritesChanged);
        self.bus.emit(Signal::StatsChanged);
        Ok(())
    }
}

/// Read-hook variant of the favorites view.
///
/// Re-derives its list whenever either signal channel fires, so a
/// favorite toggled in another UI fragment or another tab shows up
/// without an explicit refresh. The `generation` counter lets a UI
/// layer adapt this into its own reactivity primitive. Subscriptions
/// end when the reader is dropped.
pub struct FavoritesReader {
    current: Arc<Mutex<Vec<FavoriteRecord>>>,
    generation: Arc<AtomicU64>,
    _same_tab: Subscription,
    _cross_tab: Subscription,
}

impl FavoritesReader {
    pub fn new(store: Arc<dyn DurableStore>, bus: &SignalBus) -> Self {
        let current = Arc::new(Mutex::new(read_favorites(store.as_ref())));
        let generation = Arc::new(AtomicU64::new(0));

        let reload: Arc<dyn Fn() + Send + Sync> = {
            let store = Arc::clone(&store);
            let current = Arc::clone(&current);
            let generation = Arc::clone(&generation);
            Arc::new(move || {
                let fresh = read_favorites(store.as_ref());
                match current.lock() {
                    Ok(mut guard) => *guard = fresh,
                    Err(poisoned) => *poisoned.into_inner() = fresh,
                }
                generation.fetch_add(1, Ordering::SeqCst);
            })
        };

        let same_tab = {
            let reload = Arc::clone(&reload);
            bus.subscribe(Signal::FavoritesChanged, move || reload())
        };
        let cross_tab = {
            let reload = Arc::clone(&reload);
            bus.subscribe_storage(move |event| {
                if event.key == keys::FAVORITES {
                    reload();
                }
            })
        };

        Self {
            current,
            generation,
            _same_tab: same_tab,
            _cross_tab: cross_tab,
        }
    }

    /// Snapshot of the list as of the last signal.
    pub fn current(&self) -> Vec<FavoriteRecord> {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_favorited(&self, id: &str) -> bool {
        self.current().iter().any(|f| f.id == id)
    }

    /// Bumps on every re-derivation; compare against a remembered value
    /// to decide whether to re-render.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
