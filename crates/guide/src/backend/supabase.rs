//! Hosted backend client: GoTrue auth under `/auth/v1`, PostgREST tables
//! under `/rest/v1` and the realtime socket under `/realtime/v1`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, instrument, warn};
use url::Url;

use tuni_core::{CommentId, DestinationId, Email, UserId};

use super::realtime::RealtimeFeed;
use super::types::{
    AuthEvent, AuthEventKind, AuthSession, AuthUser, COMMENTS_TABLE, ChangeEvent, CommentRow,
    NewComment, NewProfile, PROFILES_TABLE, ProfileRow, ProfileUpdate, RATINGS_TABLE, RatingRow,
    SignUpOutcome,
};
use super::{Backend, BackendError};
use crate::config::{BackendConfig, anon_key};
use crate::storage::KeyValueStore;

/// Storage key of the persisted session.
pub const SESSION_STORAGE_KEY: &str = "tuni-auth-session";

/// Refresh this many seconds before the access token expires.
const EXPIRY_MARGIN_SECS: i64 = 30;

const AUTH_EVENT_CAPACITY: usize = 32;

/// Token endpoint response (sign-in, refresh, and sign-up without confirmation).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: i64) -> AuthSession {
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_at
                .or_else(|| self.expires_in.map(|secs| now + secs)),
            user: self.user,
        }
    }
}

/// Sign-up returns a session, or only the user when email confirmation is on.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(AuthUser),
}

/// Error body shapes of GoTrue and PostgREST.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn code(&self) -> Option<String> {
        self.error_code
            .clone()
            .or_else(|| match &self.code {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                _ => None,
            })
            .or_else(|| self.error.clone())
    }

    fn message(&self) -> Option<String> {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error_description.clone())
    }
}

/// Map an error response to a [`BackendError`].
fn classify_error(status: u16, retry_after: Option<u64>, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed.code().unwrap_or_default();
    let message = parsed
        .message()
        .unwrap_or_else(|| if body.is_empty() { "Unknown error".to_string() } else { body.to_string() });

    match (status, code.as_str()) {
        (_, "invalid_credentials" | "invalid_grant") => BackendError::InvalidCredentials,
        (_, "user_already_exists" | "email_exists" | "23505") | (409, _) => {
            BackendError::Conflict(message)
        }
        (_, "PGRST116") | (404, _) => BackendError::NotFound(message),
        (429, _) => BackendError::RateLimited(retry_after.unwrap_or(60)),
        (401 | 403, _) => BackendError::Unauthorized,
        _ => BackendError::Api { status, message },
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `ws(s)://<host>/realtime/v1/websocket?apikey=...&vsn=1.0.0`
fn realtime_socket_url(base: &Url, key: &str) -> Result<Url, BackendError> {
    let mut url = base.clone();
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| BackendError::Realtime(format!("cannot derive socket URL from {base}")))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

/// HTTP client for the hosted backend.
///
/// Owns the current session: it is restored from storage on connect,
/// refreshed before expiry, persisted on every change and announced on
/// [`Backend::auth_events`].
#[derive(Clone)]
pub struct SupabaseClient {
    inner: Arc<SupabaseClientInner>,
}

struct SupabaseClientInner {
    client: reqwest::Client,
    base_url: Url,
    anon_key: String,
    session: RwLock<Option<AuthSession>>,
    /// Held while a refresh is in flight; refresh tokens are single-use.
    refresh_lock: Mutex<()>,
    storage: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseClient {
    /// Build the client and restore the persisted session.
    ///
    /// An expired stored session is refreshed. If the backend rejects the
    /// refresh token the stored session is discarded; if the backend cannot
    /// be reached it is kept and the refresh is retried on the next call.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(
        config: &BackendConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, BackendError> {
        let key = anon_key(config).to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&key).map_err(|e| BackendError::Api {
                status: 0,
                message: format!("Invalid API key format: {e}"),
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        let this = Self {
            inner: Arc::new(SupabaseClientInner {
                client,
                base_url: config.url.clone(),
                anon_key: key,
                session: RwLock::new(None),
                refresh_lock: Mutex::new(()),
                storage,
                events,
            }),
        };

        this.restore_session().await;
        Ok(this)
    }

    async fn restore_session(&self) {
        let stored = match self
            .inner
            .storage
            .get_json::<AuthSession>(SESSION_STORAGE_KEY)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored session");
                None
            }
        };

        let Some(session) = stored else {
            return;
        };

        if session.is_expired_at(now_unix() + EXPIRY_MARGIN_SECS) {
            match self.refresh(&session.refresh_token).await {
                Ok(fresh) => {
                    debug!(user_id = %fresh.user_id(), "Refreshed stored session");
                    self.set_session(Some(fresh), AuthEventKind::InitialSession)
                        .await;
                }
                Err(e) if e.is_transient() => {
                    warn!(error = %e, "Stored session not refreshed yet, keeping it");
                    self.set_session(Some(session), AuthEventKind::InitialSession)
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "Stored session could not be refreshed");
                    self.set_session(None, AuthEventKind::SignedOut).await;
                }
            }
        } else {
            debug!(user_id = %session.user_id(), "Restored stored session");
            self.set_session(Some(session), AuthEventKind::InitialSession)
                .await;
        }
    }

    /// Replace the held session, persist it and announce the change.
    async fn set_session(&self, session: Option<AuthSession>, kind: AuthEventKind) {
        (*self.inner.session.write().await).clone_from(&session);

        let storage = &self.inner.storage;
        let persisted = match &session {
            Some(s) => storage.set_json(SESSION_STORAGE_KEY, s).await,
            None => storage.remove(SESSION_STORAGE_KEY).await,
        };
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist session");
        }

        // No receivers is fine
        let _ = self.inner.events.send(AuthEvent { kind, session });
    }

    /// Session with a usable access token, refreshing it when close to expiry.
    ///
    /// Only a rejected refresh token ends the session. Transient failures
    /// keep it and are returned to the caller.
    async fn live_session(&self) -> Result<Option<AuthSession>, BackendError> {
        let Some(session) = self.inner.session.read().await.clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(now_unix() + EXPIRY_MARGIN_SECS) {
            return Ok(Some(session));
        }

        let _refreshing = self.inner.refresh_lock.lock().await;

        // Another caller may have refreshed or signed out while we waited
        let Some(session) = self.inner.session.read().await.clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(now_unix() + EXPIRY_MARGIN_SECS) {
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.set_session(Some(fresh.clone()), AuthEventKind::TokenRefreshed)
                    .await;
                Ok(Some(fresh))
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Token refresh failed, keeping session");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Refresh token rejected, signing out");
                self.set_session(None, AuthEventKind::SignedOut).await;
                Ok(None)
            }
        }
    }

    /// Bearer token for table calls: the user's token, or the anon key.
    async fn bearer(&self) -> Result<String, BackendError> {
        Ok(self
            .live_session()
            .await?
            .map_or_else(|| self.inner.anon_key.clone(), |s| s.access_token))
    }

    async fn require_session(&self) -> Result<AuthSession, BackendError> {
        self.live_session().await?.ok_or(BackendError::NotSignedIn)
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}{path}",
            self.inner.base_url.as_str().trim_end_matches('/')
        )
    }

    fn rest(&self, table: &str) -> String {
        self.endpoint(&format!("/rest/v1/{table}"))
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/auth/v1/token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let token: TokenResponse = Self::handle_response(response).await?;
        Ok(token.into_session(now_unix()))
    }

    /// Handle API response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        if response.status().is_success() {
            let bytes = response.bytes().await?;
            return Ok(serde_json::from_slice(&bytes)?);
        }
        Err(Self::parse_error(response).await)
    }

    /// Accept any success status, ignoring the body.
    async fn handle_empty(response: reqwest::Response) -> Result<(), BackendError> {
        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::parse_error(response).await)
    }

    async fn parse_error(response: reqwest::Response) -> BackendError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let body = response.text().await.unwrap_or_default();
        classify_error(status, retry_after, &body)
    }

    /// `GET /rest/v1/<table>?<filters>`
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> Result<Vec<T>, BackendError> {
        let response = self
            .inner
            .client
            .get(self.rest(table))
            .bearer_auth(self.bearer().await?)
            .query(&[("select", "*")])
            .query(filters)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// First row of a `return=representation` write.
    fn single<T>(rows: Vec<T>, table: &str) -> Result<T, BackendError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::NotFound(format!("no row returned from {table}")))
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    async fn current_session(&self) -> Option<AuthSession> {
        self.inner.session.read().await.clone()
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_up(
        &self,
        email: &Email,
        password: &str,
        username: &str,
    ) -> Result<SignUpOutcome, BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/auth/v1/signup"))
            .json(&json!({
                "email": email.as_str(),
                "password": password,
                "data": { "username": username },
            }))
            .send()
            .await?;

        match Self::handle_response::<SignUpResponse>(response).await? {
            SignUpResponse::Session(token) => {
                let session = token.into_session(now_unix());
                let user = session.user.clone();
                self.set_session(Some(session.clone()), AuthEventKind::SignedIn)
                    .await;
                Ok(SignUpOutcome {
                    user,
                    session: Some(session),
                })
            }
            SignUpResponse::User(user) => {
                debug!(user_id = %user.id, "Sign-up awaiting email confirmation");
                Ok(SignUpOutcome {
                    user,
                    session: None,
                })
            }
        }
    }

    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_in_with_password(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<AuthSession, BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/auth/v1/token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email.as_str(), "password": password }))
            .send()
            .await?;

        let session = Self::handle_response::<TokenResponse>(response)
            .await?
            .into_session(now_unix());
        self.set_session(Some(session.clone()), AuthEventKind::SignedIn)
            .await;
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), BackendError> {
        let token = self.inner.session.read().await.clone().map(|s| s.access_token);

        // Local state is cleared whatever the server says
        let result = match token {
            Some(token) => {
                let response = self
                    .inner
                    .client
                    .post(self.endpoint("/auth/v1/logout"))
                    .bearer_auth(token)
                    .send()
                    .await;
                match response {
                    Ok(response) => Self::handle_empty(response).await,
                    Err(e) => Err(e.into()),
                }
            }
            None => Ok(()),
        };

        self.set_session(None, AuthEventKind::SignedOut).await;
        result
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn reset_password_for_email(
        &self,
        email: &Email,
        redirect_to: &str,
    ) -> Result<(), BackendError> {
        let response = self
            .inner
            .client
            .post(self.endpoint("/auth/v1/recover"))
            .query(&[("redirect_to", redirect_to)])
            .json(&json!({ "email": email.as_str() }))
            .send()
            .await?;
        Self::handle_empty(response).await
    }

    #[instrument(skip_all)]
    async fn update_password(&self, new_password: &str) -> Result<AuthUser, BackendError> {
        let session = self.require_session().await?;
        let response = self
            .inner
            .client
            .put(self.endpoint("/auth/v1/user"))
            .bearer_auth(&session.access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await?;

        let user: AuthUser = Self::handle_response(response).await?;
        let updated = AuthSession {
            user: user.clone(),
            ..session
        };
        self.set_session(Some(updated), AuthEventKind::UserUpdated)
            .await;
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn fetch_profile(&self, auth_id: UserId) -> Result<Option<ProfileRow>, BackendError> {
        let rows = self
            .select::<ProfileRow>(PROFILES_TABLE, &[("auth_id", format!("eq.{auth_id}"))])
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, profile), fields(auth_id = %profile.auth_id))]
    async fn insert_profile(&self, profile: &NewProfile) -> Result<ProfileRow, BackendError> {
        let response = self
            .inner
            .client
            .post(self.rest(PROFILES_TABLE))
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "return=representation")
            .json(profile)
            .send()
            .await?;
        Self::single(Self::handle_response(response).await?, PROFILES_TABLE)
    }

    #[instrument(skip(self, update))]
    async fn update_profile(
        &self,
        auth_id: UserId,
        update: &ProfileUpdate,
    ) -> Result<ProfileRow, BackendError> {
        let response = self
            .inner
            .client
            .patch(self.rest(PROFILES_TABLE))
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "return=representation")
            .query(&[("auth_id", format!("eq.{auth_id}"))])
            .json(update)
            .send()
            .await?;
        Self::single(Self::handle_response(response).await?, PROFILES_TABLE)
    }

    #[instrument(skip(self))]
    async fn fetch_rating(
        &self,
        user_id: UserId,
        destination: &DestinationId,
    ) -> Result<Option<RatingRow>, BackendError> {
        let rows = self
            .select::<RatingRow>(
                RATINGS_TABLE,
                &[
                    ("user_id", format!("eq.{user_id}")),
                    ("destination_id", format!("eq.{destination}")),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, rating), fields(destination = %rating.destination_id, value = %rating.rating))]
    async fn upsert_rating(&self, rating: &RatingRow) -> Result<RatingRow, BackendError> {
        let response = self
            .inner
            .client
            .post(self.rest(RATINGS_TABLE))
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .query(&[("on_conflict", "user_id,destination_id")])
            .json(rating)
            .send()
            .await?;
        Self::single(Self::handle_response(response).await?, RATINGS_TABLE)
    }

    #[instrument(skip(self))]
    async fn list_comments(
        &self,
        destination: &DestinationId,
    ) -> Result<Vec<CommentRow>, BackendError> {
        self.select(
            COMMENTS_TABLE,
            &[
                ("destination_id", format!("eq.{destination}")),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    #[instrument(skip(self, comment), fields(destination = %comment.destination_id))]
    async fn insert_comment(&self, comment: &NewComment) -> Result<CommentRow, BackendError> {
        let response = self
            .inner
            .client
            .post(self.rest(COMMENTS_TABLE))
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "return=representation")
            .json(comment)
            .send()
            .await?;
        Self::single(Self::handle_response(response).await?, COMMENTS_TABLE)
    }

    #[instrument(skip(self))]
    async fn delete_comment(&self, id: CommentId, author: UserId) -> Result<bool, BackendError> {
        let response = self
            .inner
            .client
            .delete(self.rest(COMMENTS_TABLE))
            .bearer_auth(self.bearer().await?)
            .header("Prefer", "return=representation")
            .query(&[
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{author}")),
            ])
            .send()
            .await?;
        let removed: Vec<CommentRow> = Self::handle_response(response).await?;
        Ok(!removed.is_empty())
    }

    #[instrument(skip(self))]
    async fn subscribe(
        &self,
        table: &str,
        filter: Option<&str>,
    ) -> Result<mpsc::Receiver<ChangeEvent>, BackendError> {
        let url = realtime_socket_url(&self.inner.base_url, &self.inner.anon_key)?;
        let access_token = self.live_session().await?.map(|s| s.access_token);
        RealtimeFeed::new(url, access_token)
            .subscribe(table, filter)
            .await
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}
