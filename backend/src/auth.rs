//! Caller identity extraction.
//!
//! Session management is fully delegated to the hosted provider: this layer
//! only verifies the presented bearer token against the provider's auth
//! endpoint and reads back the identity. Moderation routes additionally
//! require the caller's profile role to be a moderator role.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    Json,
};
use newsdesk_shared::{AuthorRole, ProfileRow};

use crate::{
    handlers::ErrorResponse,
    state::AppState,
    store::{eq, select},
};

/// Verified caller identity.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub token: String,
}

/// A session whose profile carries a moderator role.
#[derive(Debug, Clone)]
pub struct Moderator {
    pub session: Session,
    pub role: AuthorRole,
}

#[async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Err(auth_error(StatusCode::UNAUTHORIZED, "Sign in required"));
        };

        match state.store.authed_user(&token).await {
            Ok(Some(user)) => Ok(Session {
                user_id: user.id,
                token,
            }),
            Ok(None) => Err(auth_error(StatusCode::UNAUTHORIZED, "Sign in required")),
            Err(err) => {
                tracing::error!("auth verification failed: {err:#}");
                Err(auth_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong",
                ))
            },
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Moderator {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;

        let profile = state
            .store
            .select_one::<ProfileRow>(
                "profiles",
                &[
                    eq("id", &session.user_id),
                    select("id,display_name,avatar_url,role"),
                ],
            )
            .await;
        let role = match profile {
            Ok(Some(profile)) => AuthorRole::from_raw(profile.role.as_deref()),
            Ok(None) => AuthorRole::Unknown,
            Err(err) => {
                tracing::error!("moderator profile lookup failed: {err:#}");
                return Err(auth_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong",
                ));
            },
        };

        if !role.is_moderator() {
            return Err(auth_error(
                StatusCode::FORBIDDEN,
                "Moderator access required",
            ));
        }

        Ok(Moderator { session, role })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn auth_error(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
            code: status.as_u16(),
        }),
    )
}
