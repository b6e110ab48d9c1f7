//! Integration tests for sign-up, sign-in and profile creation.

#![allow(clippy::unwrap_used)]

use tuni_core::Email;
use tuni_guide::routes::{Navigation, Route, navigate, post_login_target};
use tuni_guide::session::AuthError;
use tuni_integration_tests::TestGuide;

// =============================================================================
// Sign-up and sign-in
// =============================================================================

#[tokio::test]
async fn test_signup_then_login_creates_one_profile() {
    let guide = TestGuide::new().await;
    let session = guide.state.session();

    session.signup("a@b.com", "pw123456", "alice").await.unwrap();
    let profile = guide.state.load_profile().await.unwrap().unwrap();
    assert_eq!(profile.name, "alice");

    session.logout().await;
    assert!(!session.is_authenticated());

    session.login("a@b.com", "pw123456").await.unwrap();
    assert!(session.is_authenticated());
    assert!(session.snapshot().session.is_some());
    assert_eq!(session.user_id(), Some(profile.auth_id));
    assert_eq!(guide.backend.profile_count(), 1);
}

#[tokio::test]
async fn test_duplicate_signup_is_rejected() {
    let guide = TestGuide::new().await;
    let session = guide.state.session();

    session.signup("a@b.com", "pw123456", "alice").await.unwrap();
    session.logout().await;

    let err = session.signup("a@b.com", "different1", "alice2").await.unwrap_err();
    assert!(matches!(err, AuthError::UserAlreadyExists));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_wrong_password_leaves_user_signed_out() {
    let guide = TestGuide::new().await;
    let session = guide.state.session();
    session.signup("a@b.com", "pw123456", "alice").await.unwrap();
    session.logout().await;

    let err = session.login("a@b.com", "nope-nope").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert!(!session.is_authenticated());
    assert_eq!(err.user_message(), "Invalid credentials");
}

#[tokio::test]
async fn test_confirmed_account_gets_profile_on_first_login() {
    let guide = TestGuide::new().await;
    guide.backend.set_require_confirmation(true);
    let session = guide.state.session();

    session.signup("a@b.com", "pw123456", "alice").await.unwrap();
    assert!(!session.is_authenticated());
    assert_eq!(guide.backend.profile_count(), 0);

    guide.backend.confirm_email(&Email::parse("a@b.com").unwrap());
    session.login("a@b.com", "pw123456").await.unwrap();

    let profile = guide.state.load_profile().await.unwrap().unwrap();
    assert_eq!(profile.name, "alice");
}

// =============================================================================
// Passwords
// =============================================================================

#[tokio::test]
async fn test_update_password_changes_credentials() {
    let guide = TestGuide::new().await;
    let session = guide.state.session();
    session.signup("a@b.com", "pw123456", "alice").await.unwrap();

    session.update_password("new-secret-9").await.unwrap();
    let email = Email::parse("a@b.com").unwrap();
    assert!(guide.backend.password_matches(&email, "new-secret-9"));

    session.logout().await;
    assert!(session.login("a@b.com", "pw123456").await.is_err());
    session.login("a@b.com", "new-secret-9").await.unwrap();
}

#[tokio::test]
async fn test_reset_password_for_unknown_email_succeeds_quietly() {
    let guide = TestGuide::new().await;
    guide.state.session().reset_password("ghost@b.com").await.unwrap();
}

// =============================================================================
// Gated routes
// =============================================================================

#[tokio::test]
async fn test_login_returns_to_gated_route() {
    let guide = TestGuide::new().await;
    let session = guide.state.session();
    session.signup("a@b.com", "pw123456", "alice").await.unwrap();
    session.logout().await;

    let Navigation::Redirect(login) = navigate("/profile/edit", session.is_authenticated()) else {
        panic!("expected a redirect to login");
    };
    assert!(login.starts_with("/login?"));

    session.login("a@b.com", "pw123456").await.unwrap();
    let target = post_login_target(login.split_once('?').unwrap().1);
    assert_eq!(
        navigate(&target, session.is_authenticated()),
        Navigation::Show(Route::EditProfile)
    );
}
