//! Integration tests for ratings, comments and sign-in gating.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tuni_core::DestinationId;
use tuni_guide::backend::Backend;
use tuni_guide::interactions::{Gated, InteractionState, InteractionStore, Prompt};
use tuni_guide::session::SessionStore;
use tuni_integration_tests::TestGuide;

async fn signed_in_guide() -> TestGuide {
    let guide = TestGuide::new().await;
    guide
        .state
        .session()
        .signup("a@b.com", "pw123456", "alice")
        .await
        .unwrap();
    guide
}

// =============================================================================
// Ratings
// =============================================================================

#[tokio::test]
async fn test_rating_twice_keeps_one_row_with_latest_value() {
    let guide = signed_in_guide().await;
    let interactions = guide.state.interactions();
    let carthage = DestinationId::new("carthage");

    interactions.add_rating(&carthage, 5).await.unwrap();
    interactions.add_rating(&carthage, 3).await.unwrap();

    assert_eq!(interactions.get_rating(&carthage), Some(3));
    let user_id = guide.state.session().user_id().unwrap();
    let rows = guide.backend.ratings_of(user_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].rating.value(), 3);
}

#[tokio::test]
async fn test_rating_is_reloaded_from_backend() {
    let guide = signed_in_guide().await;
    let medina = DestinationId::new("medina-tunis");
    guide.state.interactions().add_rating(&medina, 4).await.unwrap();

    // A second device signed in to the same backend
    let backend: Arc<dyn Backend> = Arc::clone(&guide.backend) as Arc<dyn Backend>;
    let session = Arc::new(SessionStore::new(Arc::clone(&backend), "http://x/reset").await);
    assert!(session.is_authenticated());
    let fresh = InteractionStore::new(Some(backend), session);
    assert_eq!(fresh.get_rating(&medina), None);

    fresh.load_destination(&medina).await.unwrap();
    assert_eq!(fresh.get_rating(&medina), Some(4));
}

// =============================================================================
// Comments
// =============================================================================

#[tokio::test]
async fn test_comment_lifecycle() {
    let guide = signed_in_guide().await;
    let interactions = guide.state.interactions();
    let souk = DestinationId::new("souk-el-attarine");

    let Gated::Done(comment) = interactions.add_comment(&souk, "Smells wonderful").await.unwrap()
    else {
        panic!("expected the comment to post");
    };
    assert_eq!(comment.text, "Smells wonderful");

    interactions.load_destination(&souk).await.unwrap();
    let comments = interactions.get_user_comments(&souk);
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id, comment.id);

    interactions.remove_comment(comment.id).await.unwrap();
    interactions.load_destination(&souk).await.unwrap();
    assert!(interactions.get_user_comments(&souk).is_empty());
}

// =============================================================================
// Gating
// =============================================================================

#[tokio::test]
async fn test_signed_out_mutations_change_nothing_and_prompt_once_each() {
    let guide = TestGuide::new().await;
    let interactions = guide.state.interactions();
    let mut prompts = interactions.prompts();
    let carthage = DestinationId::new("carthage");

    let rating = interactions.add_rating(&carthage, 5).await.unwrap();
    assert!(rating.is_sign_in_required());
    assert_eq!(prompts.try_recv().unwrap(), Prompt::SignInRequired);
    assert!(prompts.try_recv().is_err());

    let comment = interactions.add_comment(&carthage, "Ruins!").await.unwrap();
    assert!(comment.is_sign_in_required());
    assert_eq!(prompts.try_recv().unwrap(), Prompt::SignInRequired);

    assert_eq!(interactions.snapshot(), InteractionState::default());
    assert_eq!(guide.backend.profile_count(), 0);
}

#[tokio::test]
async fn test_signing_out_hides_previous_ratings() {
    let guide = signed_in_guide().await;
    let carthage = DestinationId::new("carthage");
    guide.state.interactions().add_rating(&carthage, 5).await.unwrap();

    guide.state.session().logout().await;
    assert_eq!(guide.state.interactions().get_rating(&carthage), None);
}
