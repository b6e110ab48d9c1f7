//! Interaction state container: ratings and comments on destinations.
//!
//! Every mutation is gated on authentication. A signed-out call changes
//! nothing, returns [`Gated::SignInRequired`] and emits one
//! [`Prompt::SignInRequired`] for the front end to surface.
//!
//! With a backend, mutations are optimistic: local state changes first, the
//! request follows, and a failed request restores the previous state. Server
//! rows then replace the optimistic entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, instrument, warn};

use tuni_core::{CommentId, DestinationId, Rating, RatingError, UserId};

use crate::backend::{Backend, CommentRow, NewComment, RatingRow};
use crate::error::{PersistenceError, add_breadcrumb};
use crate::session::SessionStore;

/// Maximum comment length in characters.
pub const MAX_COMMENT_LENGTH: usize = 1000;

/// Author label of comments made without a display name.
const SELF_LABEL: &str = "You";

/// Errors from rating or comment operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error(transparent)]
    InvalidRating(#[from] RatingError),

    #[error("comment cannot be empty")]
    EmptyComment,

    #[error("comment must be at most {max} characters")]
    CommentTooLong { max: usize },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl InteractionError {
    /// Message safe to show the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Persistence(PersistenceError::NotFound(_)) => "Comment not found".to_string(),
            Self::Persistence(PersistenceError::NotSignedIn) => {
                "Please sign in to continue".to_string()
            }
            Self::Persistence(_) => "Could not save, please try again".to_string(),
            other => other.to_string(),
        }
    }
}

/// Outcome of a gated mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Gated<T> {
    /// The mutation ran.
    Done(T),
    /// Nobody is signed in; nothing changed.
    SignInRequired,
}

impl<T> Gated<T> {
    /// Whether the mutation was refused for lack of a session.
    pub const fn is_sign_in_required(&self) -> bool {
        matches!(self, Self::SignInRequired)
    }
}

/// Signal for the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Ask the user to sign in.
    SignInRequired,
}

/// A comment on a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub destination_id: DestinationId,
    pub text: String,
    pub author_label: String,
    /// Author; only they may delete the comment.
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            destination_id: row.destination_id,
            text: row.body,
            author_label: row.author_label,
            author_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

/// Snapshot of the interaction container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionState {
    /// User the ratings belong to.
    pub owner: Option<UserId>,
    /// The owner's rating per destination.
    pub ratings: BTreeMap<DestinationId, Rating>,
    /// Comments held, newest first.
    pub comments: Vec<Comment>,
}

/// Ratings and comments.
pub struct InteractionStore {
    backend: Option<Arc<dyn Backend>>,
    session: Arc<SessionStore>,
    state: watch::Sender<InteractionState>,
    prompts: broadcast::Sender<Prompt>,
}

impl InteractionStore {
    /// Store persisting through `backend`, or purely in memory when `None`.
    #[must_use]
    pub fn new(backend: Option<Arc<dyn Backend>>, session: Arc<SessionStore>) -> Self {
        let (state, _) = watch::channel(InteractionState::default());
        let (prompts, _) = broadcast::channel(16);
        Self {
            backend,
            session,
            state,
            prompts,
        }
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> InteractionState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<InteractionState> {
        self.state.subscribe()
    }

    /// Sign-in prompts emitted by gated calls.
    #[must_use]
    pub fn prompts(&self) -> broadcast::Receiver<Prompt> {
        self.prompts.subscribe()
    }

    /// The signed-in user, or emit a sign-in prompt.
    ///
    /// Ratings held for a previous user are dropped.
    fn gate(&self) -> Option<UserId> {
        let Some(user_id) = self.session.user_id() else {
            debug!("Interaction refused: not signed in");
            let _ = self.prompts.send(Prompt::SignInRequired);
            return None;
        };
        self.state.send_if_modified(|state| {
            if state.owner == Some(user_id) {
                return false;
            }
            state.owner = Some(user_id);
            state.ratings.clear();
            true
        });
        Some(user_id)
    }

    /// Rate `destination` 1 to 5, replacing any earlier rating.
    ///
    /// # Errors
    ///
    /// Returns `InteractionError::InvalidRating` for values outside 1..=5 and
    /// `InteractionError::Persistence` if the backend rejects the write (the
    /// previous rating is restored).
    #[instrument(skip(self))]
    pub async fn add_rating(
        &self,
        destination: &DestinationId,
        value: i64,
    ) -> Result<Gated<Rating>, InteractionError> {
        let Some(user_id) = self.gate() else {
            return Ok(Gated::SignInRequired);
        };
        let rating = Rating::new(value)?;

        let mut previous = None;
        self.state.send_modify(|state| {
            previous = state.ratings.insert(destination.clone(), rating);
        });

        if let Some(backend) = &self.backend {
            let row = RatingRow {
                user_id,
                destination_id: destination.clone(),
                rating,
                updated_at: Utc::now(),
            };
            match backend.upsert_rating(&row).await {
                Ok(saved) => {
                    self.state.send_modify(|state| {
                        state.ratings.insert(destination.clone(), saved.rating);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Rating rejected; restoring previous value");
                    self.state.send_modify(|state| {
                        // Only undo our own write
                        if state.ratings.get(destination) == Some(&rating) {
                            match previous {
                                Some(prev) => state.ratings.insert(destination.clone(), prev),
                                None => state.ratings.remove(destination),
                            };
                        }
                    });
                    return Err(PersistenceError::from(e).into());
                }
            }
        }

        add_breadcrumb(
            "interaction",
            "Rated destination",
            Some(&[("destination", destination.as_str())]),
        );
        Ok(Gated::Done(rating))
    }

    /// The signed-in user's rating of `destination`.
    #[must_use]
    pub fn get_rating(&self, destination: &DestinationId) -> Option<u8> {
        let user_id = self.session.user_id()?;
        let state = self.state.borrow();
        if state.owner != Some(user_id) {
            return None;
        }
        state.ratings.get(destination).map(|r| r.value())
    }

    /// Comment on `destination`.
    ///
    /// # Errors
    ///
    /// Returns `InteractionError::EmptyComment` or
    /// `InteractionError::CommentTooLong` for unusable text, and
    /// `InteractionError::Persistence` if the backend rejects the insert (the
    /// optimistic comment is withdrawn).
    #[instrument(skip(self, text))]
    pub async fn add_comment(
        &self,
        destination: &DestinationId,
        text: &str,
    ) -> Result<Gated<Comment>, InteractionError> {
        let Some(user_id) = self.gate() else {
            return Ok(Gated::SignInRequired);
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(InteractionError::EmptyComment);
        }
        if text.chars().count() > MAX_COMMENT_LENGTH {
            return Err(InteractionError::CommentTooLong {
                max: MAX_COMMENT_LENGTH,
            });
        }

        let author_label = self
            .session
            .user()
            .and_then(|u| u.display_name())
            .unwrap_or_else(|| SELF_LABEL.to_string());
        let optimistic = Comment {
            id: CommentId::random(),
            destination_id: destination.clone(),
            text: text.to_owned(),
            author_label: author_label.clone(),
            author_id: user_id,
            created_at: Utc::now(),
        };
        self.state.send_modify(|state| state.comments.insert(0, optimistic.clone()));

        let Some(backend) = &self.backend else {
            return Ok(Gated::Done(optimistic));
        };

        let insert = NewComment {
            user_id,
            destination_id: destination.clone(),
            body: text.to_owned(),
            author_label,
        };
        match backend.insert_comment(&insert).await {
            Ok(row) => {
                let saved = Comment::from(row);
                self.state.send_modify(|state| {
                    if let Some(slot) = state.comments.iter_mut().find(|c| c.id == optimistic.id) {
                        *slot = saved.clone();
                    }
                });
                add_breadcrumb(
                    "interaction",
                    "Commented on destination",
                    Some(&[("destination", destination.as_str())]),
                );
                Ok(Gated::Done(saved))
            }
            Err(e) => {
                warn!(error = %e, "Comment rejected; withdrawing it");
                self.state
                    .send_modify(|state| state.comments.retain(|c| c.id != optimistic.id));
                Err(PersistenceError::from(e).into())
            }
        }
    }

    /// Delete one of the signed-in user's comments.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::NotFound` (wrapped) if no comment with this
    /// id is held or it belongs to someone else, and
    /// `InteractionError::Persistence` if the backend rejects the delete (the
    /// comment is restored).
    #[instrument(skip(self))]
    pub async fn remove_comment(&self, comment_id: CommentId) -> Result<Gated<()>, InteractionError> {
        let Some(user_id) = self.gate() else {
            return Ok(Gated::SignInRequired);
        };

        let mut removed = None;
        self.state.send_if_modified(|state| {
            let Some(index) = state
                .comments
                .iter()
                .position(|c| c.id == comment_id && c.author_id == user_id)
            else {
                return false;
            };
            removed = Some((index, state.comments.remove(index)));
            true
        });
        let Some((index, comment)) = removed else {
            return Err(PersistenceError::NotFound(format!("comment {comment_id}")).into());
        };

        if let Some(backend) = &self.backend {
            match backend.delete_comment(comment_id, user_id).await {
                Ok(true) => {}
                Ok(false) => debug!(%comment_id, "Comment already gone on the server"),
                Err(e) => {
                    warn!(error = %e, "Delete rejected; restoring comment");
                    self.state.send_modify(|state| {
                        let at = index.min(state.comments.len());
                        state.comments.insert(at, comment);
                    });
                    return Err(PersistenceError::from(e).into());
                }
            }
        }

        Ok(Gated::Done(()))
    }

    /// Comments held for `destination`, newest first.
    #[must_use]
    pub fn get_user_comments(&self, destination: &DestinationId) -> Vec<Comment> {
        self.state
            .borrow()
            .comments
            .iter()
            .filter(|c| &c.destination_id == destination)
            .cloned()
            .collect()
    }

    /// Load `destination`'s comments and the signed-in user's rating from the
    /// backend. Without a backend this does nothing.
    ///
    /// # Errors
    ///
    /// Returns `InteractionError::Persistence` if a backend call fails.
    #[instrument(skip(self))]
    pub async fn load_destination(&self, destination: &DestinationId) -> Result<(), InteractionError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };

        let comments: Vec<Comment> = backend
            .list_comments(destination)
            .await
            .map_err(PersistenceError::from)?
            .into_iter()
            .map(Comment::from)
            .collect();

        let user_id = self.session.user_id();
        let rating = match user_id {
            Some(user_id) => backend
                .fetch_rating(user_id, destination)
                .await
                .map_err(PersistenceError::from)?
                .map(|row| row.rating),
            None => None,
        };

        self.state.send_modify(|state| {
            state.comments.retain(|c| &c.destination_id != destination);
            state.comments.extend(comments);
            state.comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));

            if state.owner != user_id {
                state.owner = user_id;
                state.ratings.clear();
            }
            match rating {
                Some(rating) => state.ratings.insert(destination.clone(), rating),
                None => state.ratings.remove(destination),
            };
        });
        Ok(())
    }
}

impl std::fmt::Debug for InteractionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("InteractionStore")
            .field("persistent", &self.backend.is_some())
            .field("ratings", &state.ratings.len())
            .field("comments", &state.comments.len())
            .finish_non_exhaustive()
    }
}
