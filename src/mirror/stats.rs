use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::signal::{Signal, SignalBus};
use crate::store::{keys, DurableStore};

/// Counts derived from the three persisted sequences. Never persisted
/// itself - always recomputed so it cannot drift from its sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_recipes: usize,
    pub total_favorites: usize,
    pub total_reviews: usize,
}

/// A recipe the user created, as recorded for stats purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedRecipe {
    pub id: String,
    pub name: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// A review the user wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub recipe_id: String,
    #[serde(default)]
    pub recipe_name: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

/// Input for [`Stats::add_review`]. When `id` is absent one is
/// generated as `review_<epoch-millis>`.
#[derive(Debug, Clone, Default)]
pub struct ReviewInput {
    pub id: Option<String>,
    pub recipe_id: String,
    pub recipe_name: Option<String>,
    pub rating: u8,
    pub comment: String,
}

/// Stats sources and mutation API over the durable store.
///
/// Every successful mutation emits `StatsChanged` so mounted stat
/// views re-read their sources.
pub struct Stats {
    store: Arc<dyn DurableStore>,
    bus: SignalBus,
}

impl Stats {
    pub fn new(store: Arc<dyn DurableStore>, bus: SignalBus) -> Self {
        Self { store, bus }
    }

    /// Recount the three source sequences. Repeated calls with no
    /// intervening writes return identical values; the cost is
    /// re-parsing each sequence on every call.
    pub fn user_stats(&self) -> UserStats {
        UserStats {
            total_recipes: self.count_sequence(keys::USER_RECIPES),
            total_favorites: self.count_sequence(keys::FAVORITES),
            total_reviews: self.count_sequence(keys::USER_REVIEWS),
        }
    }

    pub fn owned_recipes(&self) -> Vec<OwnedRecipe> {
        self.read_sequence(keys::USER_RECIPES)
    }

    /// Record a recipe the user created.
    pub fn add_owned_recipe(&self, id: &str, name: &str, category: &str) -> Result<()> {
        let mut recipes = self.owned_recipes();
        recipes.push(OwnedRecipe {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            created_at: Utc::now(),
        });
        self.write_sequence(keys::USER_RECIPES, &recipes)?;
        debug!(id, "owned recipe recorded");
        self.bus.emit(Signal::StatsChanged);
        Ok(())
    }

    /// Drop a recipe from the owned list. Removing an unknown id is a
    /// no-op write.
    pub fn remove_owned_recipe(&self, id: &str) -> Result<()> {
        let mut recipes = self.owned_recipes();
        recipes.retain(|r| r.id != id);
        self.write_sequence(keys::USER_RECIPES, &recipes)?;
        debug!(id, "owned recipe removed");
        self.bus.emit(Signal::StatsChanged);
        Ok(())
    }

    pub fn reviews(&self) -> Vec<Review> {
        self.read_sequence(keys::USER_REVIEWS)
    }

    /// Record a review, generating an id when the input carries none.
    pub fn add_review(&self, input: ReviewInput) -> Result<Review> {
        let review = Review {
            id: input
                .id
                .unwrap_or_else(|| format!("review_{}", Utc::now().timestamp_millis())),
            recipe_id: input.recipe_id,
            recipe_name: input.recipe_name.unwrap_or_default(),
            rating: input.rating,
            comment: input.comment,
            created_at: Utc::now(),
        };
        let mut reviews = self.reviews();
        reviews.push(review.clone());
        self.write_sequence(keys::USER_REVIEWS, &reviews)?;
        debug!(id = %review.id, "review recorded");
        self.bus.emit(Signal::StatsChanged);
        Ok(review)
    }

    /// Remove the owned-recipe and review sequences. Favorites are
    /// cleared through the favorites API, not here.
    pub fn clear_all(&self) -> Result<()> {
        self.store
            .remove(keys::USER_RECIPES)
            .context("Failed to clear owned recipes")?;
        self.store
            .remove(keys::USER_REVIEWS)
            .context("Failed to clear reviews")?;
        self.bus.emit(Signal::StatsChanged);
        Ok(())
    }

    /// Element count of a persisted JSON array; anything unreadable or
    /// malformed counts as zero.
    fn count_sequence(&self, key: &str) -> usize {
        let raw = match self.store.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!(key, error = %e, "failed to read stats source");
                return 0;
            }
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => value.as_array().map(|a| a.len()).unwrap_or(0),
            Err(e) => {
                warn!(key, error = %e, "malformed stats source, counting as zero");
                0
            }
        }
    }

    fn read_sequence<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.store.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "failed to read sequence");
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                warn!(key, error = %e, "malformed sequence, treating as empty");
                Vec::new()
            }
        }
    }

    fn write_sequence<T: Serialize>(&self, key: &str, items: &[T]) -> Result<()> {
        let contents = serde_json::to_string(items).context("Failed to encode sequence")?;
        self.store
            .write(key, &contents)
            .with_context(|| format!("Failed to write {}", key))?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
