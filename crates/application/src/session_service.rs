use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use milagro_core::{AppError, AppResult};
use milagro_domain::{
    EmailAddress, SessionOrigin, SessionUser, StoredSession, bootstrap_admin_id,
    validate_login_input,
};

use crate::{AuthProvider, ProfileRepository, SessionStore};

/// Lifetime of a locally issued bootstrap session.
pub const BOOTSTRAP_SESSION_TTL_SECONDS: i64 = 3600;

/// Configured emergency superadmin credential.
///
/// Only a digest of the password is kept in memory.
#[derive(Clone)]
pub struct BootstrapCredential {
    email: EmailAddress,
    password_digest: [u8; 32],
}

impl BootstrapCredential {
    /// Builds a credential from configured values.
    pub fn new(email: &str, password: &str) -> AppResult<Self> {
        let email = validate_login_input(email, password)?;
        Ok(Self {
            email,
            password_digest: digest(password),
        })
    }

    /// Returns the configured email.
    #[must_use]
    pub fn email(&self) -> &EmailAddress {
        &self.email
    }

    fn matches(&self, email: &EmailAddress, password: &str) -> bool {
        &self.email == email && digest(password) == self.password_digest
    }

    /// Issues the access token of a bootstrap session: `nonce.verifier`.
    fn issue_token(&self, expires_at: DateTime<Utc>) -> AppResult<String> {
        let nonce = generate_session_token()?;
        let verifier = self.verifier(nonce.as_str(), expires_at);
        Ok(format!("{nonce}.{verifier}"))
    }

    /// Checks that a stored bootstrap session was issued for this credential.
    ///
    /// The verifier binds the nonce, the expiry and the email to the password
    /// digest, so a rotated password or an edited expiry invalidates it.
    fn verifies(&self, session: &StoredSession, now: DateTime<Utc>) -> bool {
        if self.email != session.email
            || session.expires_at > now + Duration::seconds(BOOTSTRAP_SESSION_TTL_SECONDS)
        {
            return false;
        }

        session
            .access_token
            .split_once('.')
            .is_some_and(|(nonce, verifier)| {
                !nonce.is_empty() && self.verifier(nonce, session.expires_at) == verifier
            })
    }

    fn verifier(&self, nonce: &str, expires_at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(expires_at.timestamp().to_be_bytes());
        hasher.update(self.email.as_str().as_bytes());
        hasher.update(self.password_digest);
        to_hex(&hasher.finalize())
    }
}

impl Debug for BootstrapCredential {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BootstrapCredential")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Application service for sign-in and the current session.
#[derive(Clone)]
pub struct SessionService {
    auth: Arc<dyn AuthProvider>,
    profiles: Arc<dyn ProfileRepository>,
    sessions: Arc<dyn SessionStore>,
    bootstrap: Option<BootstrapCredential>,
}

impl SessionService {
    /// Creates a new session service.
    #[must_use]
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        profiles: Arc<dyn ProfileRepository>,
        sessions: Arc<dyn SessionStore>,
        bootstrap: Option<BootstrapCredential>,
    ) -> Self {
        Self {
            auth,
            profiles,
            sessions,
            bootstrap,
        }
    }

    /// Signs in and persists the resulting session.
    pub async fn login(&self, email: &str, password: &str) -> AppResult<SessionUser> {
        let email = validate_login_input(email, password)?;
        let now = Utc::now();

        if let Some(credential) = self
            .bootstrap
            .as_ref()
            .filter(|credential| credential.matches(&email, password))
        {
            let expires_at = now + Duration::seconds(BOOTSTRAP_SESSION_TTL_SECONDS);
            let session = StoredSession {
                origin: SessionOrigin::Bootstrap,
                access_token: credential.issue_token(expires_at)?,
                refresh_token: None,
                expires_at,
                user_id: bootstrap_admin_id(),
                email: email.clone(),
            };
            self.sessions.save(&session).await?;
            info!(email = %email, "bootstrap superadmin signed in");
            return Ok(SessionUser::bootstrap(email, now));
        }

        let auth_session = self.auth.sign_in_with_password(&email, password).await?;
        let Some(mut profile) = self.profiles.find_profile(&auth_session.user.id).await? else {
            self.sign_out_quietly(&auth_session.access_token).await;
            return Err(AppError::Unauthorized(
                "no admin profile exists for this account".to_owned(),
            ));
        };

        if !profile.is_active() {
            self.sign_out_quietly(&auth_session.access_token).await;
            return Err(AppError::Forbidden(format!(
                "admin '{}' is inactive",
                profile.id
            )));
        }

        self.sessions
            .save(&StoredSession {
                origin: SessionOrigin::Provider,
                access_token: auth_session.access_token,
                refresh_token: auth_session.refresh_token,
                expires_at: auth_session.expires_at,
                user_id: profile.id.clone(),
                email: auth_session.user.email,
            })
            .await?;

        if let Err(error) = self.profiles.touch_last_login(&profile.id, now).await {
            warn!(admin_id = %profile.id, error = %error, "failed to record last login");
        }
        profile.last_login_at = Some(now);

        info!(admin_id = %profile.id, "admin signed in");
        Ok(SessionUser {
            profile,
            origin: SessionOrigin::Provider,
        })
    }

    /// Resolves the admin behind the stored session.
    pub async fn current_user(&self) -> AppResult<SessionUser> {
        let Some(session) = self.sessions.load().await? else {
            return Err(AppError::Unauthorized("no active session".to_owned()));
        };

        let now = Utc::now();
        if session.is_expired_at(now) {
            self.sessions.clear().await?;
            return Err(AppError::Unauthorized("session expired".to_owned()));
        }

        match session.origin {
            SessionOrigin::Bootstrap => {
                let Some(credential) = self.bootstrap.as_ref() else {
                    self.sessions.clear().await?;
                    return Err(AppError::Unauthorized(
                        "bootstrap access is no longer configured".to_owned(),
                    ));
                };
                if !credential.verifies(&session, now) {
                    warn!(email = %session.email, "rejecting unverifiable bootstrap session");
                    self.sessions.clear().await?;
                    return Err(AppError::Unauthorized(
                        "bootstrap session is not valid for the configured credential".to_owned(),
                    ));
                }

                Ok(SessionUser::bootstrap(session.email, now))
            }
            SessionOrigin::Provider => {
                let Some(user) = self.auth.current_user(&session.access_token).await? else {
                    self.sessions.clear().await?;
                    return Err(AppError::Unauthorized("session was revoked".to_owned()));
                };

                let profile = self
                    .profiles
                    .find_profile(&user.id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("profile '{}' does not exist", user.id)))?;

                Ok(SessionUser {
                    profile,
                    origin: SessionOrigin::Provider,
                })
            }
        }
    }

    /// Clears the stored session and revokes provider-issued tokens.
    pub async fn logout(&self) -> AppResult<()> {
        let session = self.sessions.load().await?;
        self.sessions.clear().await?;

        match session {
            Some(session) if session.origin == SessionOrigin::Provider => {
                self.auth.sign_out(&session.access_token).await
            }
            _ => Ok(()),
        }
    }

    async fn sign_out_quietly(&self, access_token: &str) {
        if let Err(error) = self.auth.sign_out(access_token).await {
            warn!(error = %error, "failed to revoke provider session");
        }
    }
}

fn generate_session_token() -> AppResult<String> {
    let mut bytes = [0_u8; 32];
    getrandom::fill(&mut bytes)
        .map_err(|error| AppError::Internal(format!("failed to generate session token: {error}")))?;

    Ok(to_hex(&bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut output, byte| {
            let _ = write!(output, "{byte:02x}");
            output
        })
}
