//! Integration tests for favorites kept in profile preferences.

#![allow(clippy::unwrap_used)]

use tuni_core::DestinationId;
use tuni_guide::backend::ProfileUpdate;
use tuni_guide::error::PersistenceError;
use tuni_integration_tests::TestGuide;

#[tokio::test]
async fn test_toggle_twice_restores_membership() {
    let guide = TestGuide::new().await;
    let favorites = guide.state.favorites();
    let sidi = DestinationId::new("sidi-bou-said");

    assert!(favorites.toggle_favorite(&sidi));
    assert!(favorites.is_favorite(&sidi));
    assert!(!favorites.toggle_favorite(&sidi));
    assert!(!favorites.is_favorite(&sidi));
}

#[tokio::test]
async fn test_favorites_follow_the_account_across_sign_ins() {
    let guide = TestGuide::new().await;
    let session = guide.state.session();
    session.signup("a@b.com", "pw123456", "alice").await.unwrap();
    guide.state.load_profile().await.unwrap();

    guide.state.favorites().toggle_favorite(&DestinationId::new("carthage"));
    guide.state.favorites().toggle_favorite(&DestinationId::new("dar-el-jeld"));
    guide
        .state
        .favorites()
        .sync_to_profile(guide.state.profiles())
        .await
        .unwrap();

    session.logout().await;
    session.login("a@b.com", "pw123456").await.unwrap();
    guide.state.favorites().toggle_favorite(&DestinationId::new("carthage"));
    guide.state.load_profile().await.unwrap();

    assert_eq!(
        guide.state.favorites().favorites(),
        vec![DestinationId::new("carthage"), DestinationId::new("dar-el-jeld")]
    );
}

#[tokio::test]
async fn test_sync_keeps_other_preferences() {
    let guide = TestGuide::new().await;
    guide
        .state
        .session()
        .signup("a@b.com", "pw123456", "alice")
        .await
        .unwrap();
    guide
        .state
        .profiles()
        .update(ProfileUpdate {
            preferences: Some(serde_json::json!({"units": "metric"})),
            bio: Some("Here for the food".to_string()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap();

    guide.state.favorites().toggle_favorite(&DestinationId::new("el-ali"));
    let row = guide
        .state
        .favorites()
        .sync_to_profile(guide.state.profiles())
        .await
        .unwrap();

    assert_eq!(row.preferences["units"], "metric");
    assert_eq!(row.preferences["favorites"], serde_json::json!(["el-ali"]));
    assert_eq!(row.bio.as_deref(), Some("Here for the food"));
}

#[tokio::test]
async fn test_signed_out_sync_is_refused() {
    let guide = TestGuide::new().await;
    guide.state.favorites().toggle_favorite(&DestinationId::new("carthage"));

    let result = guide
        .state
        .favorites()
        .sync_to_profile(guide.state.profiles())
        .await;
    assert!(matches!(result, Err(PersistenceError::NotSignedIn)));
    assert!(guide.state.favorites().is_favorite(&DestinationId::new("carthage")));
}
