//! Wire types for the hosted backend (auth users, sessions and table rows).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tuni_core::{CommentId, DestinationId, Email, ProfileId, Rating, UserId};

/// Table holding one profile per auth user.
pub const PROFILES_TABLE: &str = "user_profiles";
/// Table holding one rating per (user, destination).
pub const RATINGS_TABLE: &str = "ratings";
/// Table holding destination comments.
pub const COMMENTS_TABLE: &str = "comments";

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

/// An authenticated backend user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    /// Auth user id.
    pub id: UserId,
    /// Sign-in email (absent for phone-only accounts).
    #[serde(default)]
    pub email: Option<Email>,
    /// Free-form metadata supplied at sign-up (`username`, `name`).
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl AuthUser {
    /// Display name from metadata, falling back to the email local part.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        ["username", "name"]
            .iter()
            .find_map(|key| {
                self.user_metadata
                    .get(key)
                    .and_then(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
            })
            .or_else(|| self.email.as_ref().map(|e| e.local_part().to_owned()))
    }
}

/// Token material for the signed-in user.
///
/// Implements `Debug` manually to redact the tokens.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    /// Bearer token for API calls.
    pub access_token: String,
    /// Token used to obtain a new access token.
    pub refresh_token: String,
    /// Expiry as a unix timestamp (seconds).
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// The user this session belongs to.
    pub user: AuthUser,
}

impl AuthSession {
    /// Id of the session's user.
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.user.id
    }

    /// Email of the session's user.
    #[must_use]
    pub const fn email(&self) -> Option<&Email> {
        self.user.email.as_ref()
    }

    /// Whether the access token has expired at `now` (unix seconds).
    ///
    /// Sessions without an expiry never expire locally.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

/// Result of a sign-up call.
///
/// Projects that require email confirmation return the user without a session.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    /// The created user.
    pub user: AuthUser,
    /// Session, when the account is usable immediately.
    pub session: Option<AuthSession>,
}

/// Why the session changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    /// Session restored from storage at startup.
    InitialSession,
    /// A user signed in.
    SignedIn,
    /// The user signed out (or the session was revoked).
    SignedOut,
    /// The access token was refreshed.
    TokenRefreshed,
    /// User attributes (e.g. password) changed.
    UserUpdated,
}

/// Notification on the backend's session-change stream.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    /// What happened.
    pub kind: AuthEventKind,
    /// The session after the change (`None` when signed out).
    pub session: Option<AuthSession>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────────────────────────────────────

/// A row of `user_profiles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    /// Row id.
    pub id: ProfileId,
    /// Owning auth user (unique).
    pub auth_id: UserId,
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    /// Free-form preferences blob (`favorites`, ...).
    #[serde(default = "empty_object")]
    pub preferences: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `user_profiles`.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub auth_id: UserId,
    pub name: String,
    pub preferences: serde_json::Value,
}

impl NewProfile {
    /// Profile with empty preferences.
    #[must_use]
    pub fn new(auth_id: UserId, name: impl Into<String>) -> Self {
        Self {
            auth_id,
            name: name.into(),
            preferences: empty_object(),
        }
    }
}

/// Partial update for `user_profiles`; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileUpdate {
    /// Whether the update changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.age.is_none()
            && self.occupation.is_none()
            && self.nationality.is_none()
            && self.bio.is_none()
            && self.preferences.is_none()
    }

    /// Apply the set fields to `row`.
    pub fn apply_to(&self, row: &mut ProfileRow) {
        if let Some(name) = &self.name {
            row.name.clone_from(name);
        }
        if let Some(age) = self.age {
            row.age = Some(age);
        }
        if let Some(occupation) = &self.occupation {
            row.occupation = Some(occupation.clone());
        }
        if let Some(nationality) = &self.nationality {
            row.nationality = Some(nationality.clone());
        }
        if let Some(bio) = &self.bio {
            row.bio = Some(bio.clone());
        }
        if let Some(preferences) = &self.preferences {
            row.preferences = preferences.clone();
        }
        if let Some(updated_at) = self.updated_at {
            row.updated_at = updated_at;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reviews
// ─────────────────────────────────────────────────────────────────────────────

/// A row of `ratings`, unique on `(user_id, destination_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRow {
    pub user_id: UserId,
    pub destination_id: DestinationId,
    pub rating: Rating,
    pub updated_at: DateTime<Utc>,
}

/// A row of `comments`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: CommentId,
    pub user_id: UserId,
    pub destination_id: DestinationId,
    pub body: String,
    pub author_label: String,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `comments`.
#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub user_id: UserId,
    pub destination_id: DestinationId,
    pub body: String,
    pub author_label: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Realtime
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of row change reported by the realtime feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change on a subscribed table.
///
/// Carries the full new (and old) record so subscribers can update in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub kind: ChangeKind,
    pub record: Option<serde_json::Value>,
    pub old_record: Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(metadata: serde_json::Value) -> AuthUser {
        AuthUser {
            id: UserId::random(),
            email: Some(Email::parse("alice@b.com").unwrap()),
            user_metadata: metadata,
        }
    }

    #[test]
    fn test_display_name_prefers_metadata() {
        assert_eq!(
            user(json!({"username": "ali"})).display_name().as_deref(),
            Some("ali")
        );
        assert_eq!(
            user(json!({"name": "Alice B"})).display_name().as_deref(),
            Some("Alice B")
        );
        assert_eq!(
            user(json!({"username": "  "})).display_name().as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "very-secret-access".to_string(),
            refresh_token: "very-secret-refresh".to_string(),
            expires_at: Some(100),
            user: user(json!({})),
        };
        let debug = format!("{session:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("very-secret"));
        assert!(session.is_expired_at(100));
        assert!(!session.is_expired_at(99));
    }

    #[test]
    fn test_profile_row_parses_postgrest_json() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "6f1c2b1e-2d7a-4d8e-9a55-1f0e3a8c1b11",
            "auth_id": "0b4c1f2a-8a3e-4a7b-b6b5-2f5d9e0c7a22",
            "name": "alice",
            "bio": null,
            "created_at": "2024-05-01T10:00:00+00:00",
            "updated_at": "2024-05-01T10:00:00+00:00"
        }))
        .unwrap();
        assert_eq!(row.name, "alice");
        assert_eq!(row.preferences, json!({}));
        assert!(row.age.is_none());
    }

    #[test]
    fn test_profile_update_skips_unset_fields() {
        let update = ProfileUpdate {
            bio: Some("Loves the medina".to_string()),
            ..ProfileUpdate::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"bio": "Loves the medina"})
        );
        assert!(!update.is_empty());
        assert!(ProfileUpdate::default().is_empty());
    }
}
