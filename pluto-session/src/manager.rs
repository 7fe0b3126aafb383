//! Session Manager - the client's single authenticated session
//!
//! Construct one at the composition root and share it as `Arc<SessionManager>`.
//! Every mutation goes through here; consumers only read.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use pluto_core::{PlutoConfig, PlutoResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{AuthApi, HttpAuthApi};
use crate::error::{ApiError, SessionError, SessionResult};
use crate::policy::{policy_for, FailClosed, InvalidationPolicy};
use crate::storage::{open_store, KeyValueStore, TOKEN_KEY, USER_KEY};
use crate::types::{
    LoginRequest, PasswordResetConfirm, PasswordResetRequest, QuotaInfo, RegisterRequest,
    SessionState, TokenResponse, UserRecord,
};

const LOGIN_FAILED: &str = "Login failed";
const REGISTRATION_FAILED: &str = "Registration failed";
const PASSWORD_RESET_FAILED: &str = "Password reset failed";

#[derive(Debug, Default)]
struct Session {
    token: Option<String>,
    user: Option<UserRecord>,
    /// Set once the server has confirmed `user` for `token` in this process
    verified: bool,
    /// Unknown for a token restored from storage
    expires_at: Option<DateTime<Utc>>,
}

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn KeyValueStore>,
    policy: Box<dyn InvalidationPolicy>,
    session: RwLock<Session>,
}

impl SessionManager {
    /// Create a manager and restore any session persisted in `store`
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn KeyValueStore>) -> Self {
        let session = restore(store.as_ref());

        Self {
            api,
            store,
            policy: Box::new(FailClosed),
            session: RwLock::new(session),
        }
    }

    /// Replace the invalidation policy (default `FailClosed`)
    pub fn with_policy(mut self, policy: Box<dyn InvalidationPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// HTTP client, storage backend and policy as described by `config`
    pub fn from_config(config: &PlutoConfig) -> PlutoResult<Self> {
        let api = Arc::new(HttpAuthApi::new(&config.api)?);
        let store = open_store(config)?;

        Ok(Self::new(api, store).with_policy(policy_for(config.session.invalidation)))
    }

    pub async fn login(&self, email: &str, password: &str) -> SessionResult<UserRecord> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        info!(email = %email, "Logging in");

        match self.api.login(&request).await {
            Ok(response) => Ok(self.establish(response)),
            Err(failure) => {
                warn!(email = %email, error = %failure, "Login rejected");
                Err(SessionError::authentication(
                    failure.detail().unwrap_or(LOGIN_FAILED),
                ))
            }
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        organization_name: Option<&str>,
    ) -> SessionResult<UserRecord> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            organization_name: organization_name.map(str::to_string),
        };

        info!(email = %email, "Registering account");

        match self.api.register(&request).await {
            Ok(response) => Ok(self.establish(response)),
            Err(failure) => {
                warn!(email = %email, error = %failure, "Registration rejected");
                Err(SessionError::registration(
                    failure.detail().unwrap_or(REGISTRATION_FAILED),
                ))
            }
        }
    }

    /// Ask the server who the current token belongs to.
    ///
    /// Never fails: without a token this returns `None` immediately, and a
    /// failed lookup is handed to the invalidation policy before returning `None`.
    pub async fn fetch_current_user(&self) -> Option<UserRecord> {
        let token = self.token()?;

        match self.api.current_user(&token).await {
            Ok(user) => {
                let mut session = self.session.write();
                if session.token.as_deref() != Some(token.as_str()) {
                    debug!("Discarding /auth/me response for a replaced token");
                    return session.user.clone();
                }
                session.user = Some(user.clone());
                session.verified = true;
                self.persist_token(&token);
                self.persist(USER_KEY, &user);
                debug!(user_id = %user.id, "Current user verified");
                Some(user)
            }
            Err(failure) => {
                self.handle_verification_failure("fetch_current_user", &token, &failure);
                None
            }
        }
    }

    /// Best-effort quota lookup; failures never touch the session
    pub async fn get_quota_info(&self) -> Option<QuotaInfo> {
        let token = self.token()?;

        match self.api.quota(&token).await {
            Ok(quota) => Some(quota),
            Err(failure) => {
                debug!(error = %failure, "Quota lookup failed");
                None
            }
        }
    }

    /// Exchange the current token for a new one. A single attempt, no retries.
    pub async fn refresh(&self) -> bool {
        let Some(token) = self.token() else {
            debug!("Refresh skipped, no token");
            return false;
        };

        match self.api.refresh(&token).await {
            Ok(response) => {
                let mut session = self.session.write();
                if session.token.as_deref() != Some(token.as_str()) {
                    debug!("Discarding refresh response for a replaced token");
                    return session.token.is_some() && session.user.is_some();
                }
                self.adopt(&mut session, response);
                info!("Session token refreshed");
                true
            }
            Err(failure) => {
                self.handle_verification_failure("refresh", &token, &failure);
                false
            }
        }
    }

    /// Refresh only when the token expires within `window`.
    ///
    /// Returns whether a usable token remains afterwards.
    pub async fn refresh_if_expiring(&self, window: Duration) -> bool {
        if self.token().is_none() {
            return false;
        }
        if self.is_token_expiring(window) {
            return self.refresh().await;
        }
        true
    }

    /// Clear the in-memory session and purge persisted state. Idempotent.
    pub fn logout(&self) {
        let mut session = self.session.write();
        if self.clear(&mut session) {
            info!("Logged out");
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> SessionResult<String> {
        let request = PasswordResetRequest {
            email: email.to_string(),
        };

        match self.api.request_password_reset(&request).await {
            Ok(response) => Ok(response.message),
            Err(failure) => {
                warn!(email = %email, error = %failure, "Password reset request failed");
                Err(SessionError::password_reset(
                    failure.detail().unwrap_or(PASSWORD_RESET_FAILED),
                ))
            }
        }
    }

    pub async fn confirm_password_reset(
        &self,
        reset_token: &str,
        new_password: &str,
    ) -> SessionResult<String> {
        let request = PasswordResetConfirm {
            token: reset_token.to_string(),
            new_password: new_password.to_string(),
        };

        match self.api.confirm_password_reset(&request).await {
            Ok(response) => Ok(response.message),
            Err(failure) => {
                warn!(error = %failure, "Password reset confirmation failed");
                Err(SessionError::password_reset(
                    failure.detail().unwrap_or(PASSWORD_RESET_FAILED),
                ))
            }
        }
    }

    /// True iff both a token and a user are held in memory
    pub fn is_authenticated(&self) -> bool {
        let session = self.session.read();
        session.token.is_some() && session.user.is_some()
    }

    /// `{"Authorization": "Bearer <token>"}`, or empty without a token
    pub fn get_auth_header(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(token) = self.session.read().token.as_deref() {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }
        headers
    }

    /// Attach the bearer header to a request bound for any gateway endpoint
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.session.read().user.clone()
    }

    pub fn state(&self) -> SessionState {
        let session = self.session.read();
        match (&session.token, session.verified) {
            (None, _) => SessionState::Unauthenticated,
            (Some(_), true) => SessionState::Verified,
            (Some(_), false) => SessionState::Unverified,
        }
    }

    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.session.read().expires_at
    }

    /// Whether the token's known expiry falls within `window` from now.
    /// A token of unknown lifetime is never reported as expiring.
    pub fn is_token_expiring(&self, window: Duration) -> bool {
        let session = self.session.read();
        match (&session.token, session.expires_at) {
            (Some(_), Some(expires_at)) => expires_at - Utc::now() <= window,
            _ => false,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    fn token(&self) -> Option<String> {
        self.session.read().token.clone()
    }

    fn establish(&self, response: TokenResponse) -> UserRecord {
        let mut session = self.session.write();
        self.adopt(&mut session, response)
    }

    /// Adopt the token and user from a login/register/refresh response.
    /// Storage is written under the same guard as memory so a concurrent
    /// `logout` cannot interleave.
    fn adopt(&self, session: &mut Session, response: TokenResponse) -> UserRecord {
        // Out of range lifetimes are treated as unknown
        let expires_at = (response.expires_in > 0)
            .then(|| Duration::try_seconds(response.expires_in))
            .flatten()
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));

        session.token = Some(response.access_token.clone());
        session.user = Some(response.user.clone());
        session.verified = true;
        session.expires_at = expires_at;

        self.persist_token(&response.access_token);
        self.persist(USER_KEY, &response.user);

        info!(user_id = %response.user.id, role = %response.user.role, "Session established");
        response.user
    }

    fn persist_token(&self, token: &str) {
        if let Err(e) = self.store.set(TOKEN_KEY, token) {
            warn!(error = %e, "Failed to persist session token");
        }
    }

    fn persist(&self, key: &str, user: &UserRecord) {
        let result = serde_json::to_string(user)
            .map_err(SessionError::from)
            .and_then(|json| self.store.set(key, &json).map_err(SessionError::from));
        if let Err(e) = result {
            warn!(key = key, error = %e, "Failed to persist user");
        }
    }

    fn handle_verification_failure(&self, operation: &str, token: &str, failure: &ApiError) {
        if !self.policy.should_invalidate(failure) {
            warn!(
                operation = operation,
                policy = self.policy.name(),
                error = %failure,
                "Session kept despite verification failure"
            );
            return;
        }

        let mut session = self.session.write();
        if session.token.as_deref() != Some(token) {
            debug!(operation = operation, "Ignoring failure for a replaced token");
            return;
        }

        warn!(
            operation = operation,
            policy = self.policy.name(),
            error = %failure,
            "Session invalidated"
        );
        self.clear(&mut session);
    }

    /// Reset memory and purge both keys. Returns whether a token was held.
    fn clear(&self, session: &mut Session) -> bool {
        let had_token = session.token.is_some();
        *session = Session::default();

        for key in [TOKEN_KEY, USER_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(key = key, error = %e, "Failed to purge persisted session");
            }
        }
        had_token
    }
}

/// Read the persisted session. Anything unreadable is dropped rather than
/// failing startup.
fn restore(store: &dyn KeyValueStore) -> Session {
    let token = match store.get(TOKEN_KEY) {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            warn!(error = %e, "Failed to read persisted token");
            None
        }
    };

    let raw_user = match store.get(USER_KEY) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "Failed to read persisted user");
            None
        }
    };

    let Some(token) = token else {
        if raw_user.is_some() {
            debug!("Dropping persisted user without a token");
            if let Err(e) = store.remove(USER_KEY) {
                warn!(error = %e, "Failed to remove orphaned user");
            }
        }
        return Session::default();
    };

    let user = raw_user.and_then(|raw| match serde_json::from_str::<UserRecord>(&raw) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable persisted user");
            None
        }
    });

    info!(has_user = user.is_some(), "Restored persisted session");

    Session {
        token: Some(token),
        user,
        verified: false,
        expires_at: None,
    }
}
