//! Durable key constants.
//!
//! These names are stable across versions - persisted data written under
//! them must stay readable by future releases.

/// JSON array of favorite records. Older builds wrote bare id strings;
/// both forms are accepted on read.
pub const FAVORITES: &str = "favorites";

/// Plain string, generated once per profile and immutable afterwards.
pub const USER_IDENTIFIER: &str = "user_identifier";

/// JSON object holding the user profile.
pub const USER_PROFILE: &str = "user_profile";

/// JSON array of recipes the user created.
pub const USER_RECIPES: &str = "user_recipes";

/// JSON array of reviews the user wrote.
pub const USER_REVIEWS: &str = "user_reviews";
