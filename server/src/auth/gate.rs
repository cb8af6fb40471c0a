//! Admission check for realtime connections and REST requests.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use jsonwebtoken::errors::ErrorKind;
use serde::{Deserialize, Serialize};

use crate::auth::jwt;
use crate::db::{users, DbPool};
use crate::error::{AuthFailure, ChatError};
use crate::state::AppState;

/// Who a connection belongs to. Fixed for the lifetime of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i64,
    pub username: String,
}

/// Verifies bearer credentials and resolves them to a stored user.
#[derive(Clone)]
pub struct AuthGate {
    secret: Vec<u8>,
    db: DbPool,
}

impl AuthGate {
    pub fn new(secret: Vec<u8>, db: DbPool) -> Self {
        Self { secret, db }
    }

    /// Verify `token` and look the user up. Nothing is registered here;
    /// the caller admits the connection only on `Ok`.
    pub async fn admit(&self, token: Option<&str>) -> Result<UserIdentity, ChatError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ChatError::Auth(AuthFailure::Missing))?;

        let claims = jwt::validate_access_token(&self.secret, token).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => ChatError::Auth(AuthFailure::Expired),
                _ => ChatError::Auth(AuthFailure::Invalid),
            }
        })?;

        // The stored username wins over the one carried in the token.
        let user = users::find_user_by_id(&self.db, claims.user_id)
            .await?
            .ok_or(ChatError::Auth(AuthFailure::UnknownUser))?;

        Ok(UserIdentity {
            id: user.id,
            username: user.username,
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header. A header with any
/// other scheme is an invalid credential, not a missing one.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ChatError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(Some)
        .ok_or(ChatError::Auth(AuthFailure::Invalid))
}

/// REST handlers take a `UserIdentity` argument to require a signed-in user.
/// Rejections carry the same failure kinds the socket close codes report.
impl FromRequestParts<AppState> for UserIdentity {
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        state.auth.admit(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Ok(None));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Ok(Some("abc.def")));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(
            bearer_token(&headers),
            Err(ChatError::Auth(AuthFailure::Invalid))
        );
    }
}
