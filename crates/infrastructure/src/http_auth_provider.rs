use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use milagro_application::{AuthProvider, AuthSession, AuthUser, CreateAuthUser};
use milagro_core::{AppError, AppResult};
use milagro_domain::{AdminId, EmailAddress};

use crate::remote_endpoint::{RemoteEndpoint, decode, send};

/// Auth provider speaking the hosted backend's GoTrue-compatible HTTP API.
///
/// Admin calls use the service key. Session calls act on the user's bearer
/// token.
#[derive(Clone)]
pub struct HttpAuthProvider {
    endpoint: RemoteEndpoint,
}

impl HttpAuthProvider {
    /// Creates a provider on top of a configured endpoint.
    #[must_use]
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    email: Option<String>,
}

impl TryFrom<UserPayload> for AuthUser {
    type Error = AppError;

    fn try_from(payload: UserPayload) -> Result<Self, Self::Error> {
        let email = payload.email.ok_or_else(|| {
            AppError::Internal(format!("auth user '{}' has no email", payload.id))
        })?;

        Ok(Self {
            id: AdminId::new(payload.id)?,
            email: EmailAddress::new(email)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserPayload,
}

impl SessionPayload {
    fn into_session(self, now: DateTime<Utc>) -> AppResult<AuthSession> {
        let expires_at = self
            .expires_at
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .or_else(|| {
                self.expires_in
                    .map(|seconds| now + Duration::seconds(seconds))
            })
            .unwrap_or(now);

        Ok(AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: AuthUser::try_from(self.user)?,
        })
    }
}

fn create_user_body(input: &CreateAuthUser) -> serde_json::Value {
    json!({
        "email": input.email.as_str(),
        "password": input.password,
        "email_confirm": true,
        "user_metadata": {
            "name": input.name,
            "role": input.role.as_str(),
            "department": input.department,
            "phone": input.phone,
        },
    })
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn create_user(&self, input: CreateAuthUser) -> AppResult<AuthUser> {
        let url = self.endpoint.url(["auth", "v1", "admin", "users"]);
        let request = self
            .endpoint
            .service_request(Method::POST, url)
            .json(&create_user_body(&input));

        let response = send(request, "create auth user").await.map_err(|error| match error {
            // The provider reports taken emails as 422.
            AppError::Validation(message) if message.contains("already been registered") => {
                AppError::Conflict(message)
            }
            other => other,
        })?;
        let payload: UserPayload = decode(response, "create auth user").await?;
        AuthUser::try_from(payload)
    }

    async fn delete_user(&self, id: &AdminId) -> AppResult<()> {
        let url = self.endpoint.url(["auth", "v1", "admin", "users", id.as_str()]);
        send(
            self.endpoint.service_request(Method::DELETE, url),
            "delete auth user",
        )
        .await?;
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &str,
    ) -> AppResult<AuthSession> {
        let mut url = self.endpoint.url(["auth", "v1", "token"]);
        url.query_pairs_mut().append_pair("grant_type", "password");
        let request = self
            .endpoint
            .service_request(Method::POST, url)
            .json(&json!({ "email": email.as_str(), "password": password }));

        let response = send(request, "password sign-in").await.map_err(|error| match error {
            // Bad credentials come back as 400 invalid_grant.
            AppError::Validation(message) => AppError::Unauthorized(message),
            other => other,
        })?;
        let payload: SessionPayload = decode(response, "password sign-in").await?;
        payload.into_session(Utc::now())
    }

    async fn current_user(&self, access_token: &str) -> AppResult<Option<AuthUser>> {
        let url = self.endpoint.url(["auth", "v1", "user"]);
        let request = self.endpoint.user_request(Method::GET, url, access_token);

        let response = match send(request, "resolve auth user").await {
            Ok(response) => response,
            Err(AppError::Unauthorized(_) | AppError::Forbidden(_) | AppError::NotFound(_)) => {
                return Ok(None);
            }
            Err(error) => return Err(error),
        };
        let payload: UserPayload = decode(response, "resolve auth user").await?;
        AuthUser::try_from(payload).map(Some)
    }

    async fn sign_out(&self, access_token: &str) -> AppResult<()> {
        let url = self.endpoint.url(["auth", "v1", "logout"]);
        let request = self.endpoint.user_request(Method::POST, url, access_token);

        match send(request, "sign out").await {
            Ok(_) => Ok(()),
            // An already revoked token is signed out.
            Err(AppError::Unauthorized(_) | AppError::NotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }
}
