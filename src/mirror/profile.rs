use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{keys, DurableStore};

/// Username shown until the user picks one.
const DEFAULT_USERNAME: &str = "Pengguna";

/// Length of the random suffix in a generated user identifier.
const IDENTIFIER_SUFFIX_LEN: usize = 9;

/// Locally stored user profile.
///
/// Field names follow the persisted camelCase JSON written by the web
/// front end. `user_id` is attached from the immutable identifier on
/// every save; `updated_at` is re-stamped on every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub bio: String,
    /// Data-URI encoded image, or none.
    #[serde(default)]
    pub avatar: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial profile update; unset fields keep their current value.
/// `avatar` is doubly optional so it can be explicitly cleared.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub bio: Option<String>,
    pub avatar: Option<Option<String>>,
}

/// Profile and identifier access over the durable store.
pub struct ProfileStore {
    store: Arc<dyn DurableStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// The per-profile identifier, generated once and immutable after.
    ///
    /// Format: `user_<epoch-millis>_<9-char-random-base36>`. Treated as
    /// opaque by every caller. If the store cannot persist it, the
    /// generated value is still returned so the session keeps working.
    pub fn user_identifier(&self) -> String {
        match self.store.read(keys::USER_IDENTIFIER) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to read user identifier"),
        }

        let id = format!(
            "user_{}_{}",
            Utc::now().timestamp_millis(),
            random_base36(IDENTIFIER_SUFFIX_LEN)
        );
        if let Err(e) = self.store.write(keys::USER_IDENTIFIER, &id) {
            warn!(error = %e, "failed to persist user identifier");
        }
        id
    }

    /// The stored profile, or a default-valued one on first read or
    /// when the stored value is malformed.
    pub fn get(&self) -> UserProfile {
        match self.store.read(keys::USER_PROFILE) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(error = %e, "malformed user profile, using defaults");
                    self.default_profile()
                }
            },
            Ok(None) => self.default_profile(),
            Err(e) => {
                warn!(error = %e, "failed to read user profile");
                self.default_profile()
            }
        }
    }

    /// Merge `update` over the current profile and persist. The result
    /// always carries the immutable identifier and a fresh `updated_at`.
    pub fn save(&self, update: ProfileUpdate) -> Result<UserProfile> {
        let mut profile = self.get();
        if let Some(username) = update.username {
            profile.username = username;
        }
        if let Some(email) = update.email {
            profile.email = email;
        }
        if let Some(phone) = update.phone {
            profile.phone = phone;
        }
        if let Some(location) = update.location {
            profile.location = location;
        }
        if let Some(bio) = update.bio {
            profile.bio = bio;
        }
        if let Some(avatar) = update.avatar {
            profile.avatar = avatar;
        }
        self.persist(profile)
    }

    /// Set the username, trimmed; an empty result falls back to the
    /// default display name.
    pub fn update_username(&self, username: &str) -> Result<UserProfile> {
        let trimmed = username.trim();
        let username = if trimmed.is_empty() {
            DEFAULT_USERNAME.to_string()
        } else {
            trimmed.to_string()
        };
        self.save(ProfileUpdate {
            username: Some(username),
            ..ProfileUpdate::default()
        })
    }

    pub fn update_email(&self, email: &str) -> Result<UserProfile> {
        self.save(ProfileUpdate {
            email: Some(email.trim().to_string()),
            ..ProfileUpdate::default()
        })
    }

    pub fn update_phone(&self, phone: &str) -> Result<UserProfile> {
        self.save(ProfileUpdate {
            phone: Some(phone.trim().to_string()),
            ..ProfileUpdate::default()
        })
    }

    pub fn update_location(&self, location: &str) -> Result<UserProfile> {
        self.save(ProfileUpdate {
            location: Some(location.trim().to_string()),
            ..ProfileUpdate::default()
        })
    }

    pub fn update_bio(&self, bio: &str) -> Result<UserProfile> {
        self.save(ProfileUpdate {
            bio: Some(bio.trim().to_string()),
            ..ProfileUpdate::default()
        })
    }

    /// Replace or clear the avatar data-URI.
    pub fn update_avatar(&self, avatar: Option<String>) -> Result<UserProfile> {
        self.save(ProfileUpdate {
            avatar: Some(avatar),
            ..ProfileUpdate::default()
        })
    }

    /// Remove the stored profile. The identifier is untouched; the next
    /// read returns a default profile carrying the same identifier.
    pub fn clear(&self) -> Result<()> {
        self.store
            .remove(keys::USER_PROFILE)
            .context("Failed to clear user profile")?;
        Ok(())
    }

    fn default_profile(&self) -> UserProfile {
        UserProfile {
            username: DEFAULT_USERNAME.to_string(),
            email: String::new(),
            phone: String::new(),
            location: String::new(),
            bio: String::new(),
            avatar: None,
            user_id: self.user_identifier(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn persist(&self, mut profile: UserProfile) -> Result<UserProfile> {
        profile.user_id = self.user_identifier();
        profile.updated_at = Some(Utc::now());
        let contents =
            serde_json::to_string(&profile).context("Failed to encode user profile")?;
        self.store
            .write(keys::USER_PROFILE, &contents)
            .context("Failed to write user profile")?;
        Ok(profile)
    }
}

fn random_base36(len: usize) -> String {
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
