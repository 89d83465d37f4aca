use std::{fmt, str::FromStr};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Owner,
    Tenant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Owner => "owner",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "owner" => Ok(Self::Owner),
            "tenant" => Ok(Self::Tenant),
            other => Err(AppError::BadRequest(format!("Unknown role '{other}'."))),
        }
    }
}

/// The verified caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, role: Role) -> AppResult<()> {
        if self.role == role {
            return Ok(());
        }
        Err(AppError::Forbidden(format!(
            "Forbidden: this action requires the '{role}' role."
        )))
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
}

pub fn issue_token(state: &AppState, user_id: Uuid, role: Role) -> AppResult<String> {
    let secret = jwt_secret(state)?;
    let issued_at = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        iat: issued_at.timestamp(),
        exp: (issued_at + Duration::hours(state.config.jwt_ttl_hours.max(1))).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|error| AppError::Internal(format!("Could not sign token: {error}")))
}

pub fn require_user(state: &AppState, headers: &HeaderMap) -> AppResult<AuthUser> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing token.".to_string()))?;
    let secret = jwt_secret(state)?;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Rejected bearer token");
        AppError::Unauthorized("Unauthorized: invalid token.".to_string())
    })?;

    let id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Unauthorized("Unauthorized: invalid token.".to_string()))?;
    Ok(AuthUser {
        id,
        role: data.claims.role,
    })
}

pub fn require_role(state: &AppState, headers: &HeaderMap, role: Role) -> AppResult<AuthUser> {
    let user = require_user(state, headers)?;
    user.require_role(role)?;
    Ok(user)
}

fn jwt_secret(state: &AppState) -> AppResult<&str> {
    state
        .config
        .jwt_secret
        .as_deref()
        .ok_or_else(|| AppError::Dependency("JWT_SECRET is not configured.".to_string()))
}

/// Accepts `Authorization: Bearer <token>` as well as a bare token.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    if raw.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => raw,
    };
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{header::AUTHORIZATION, HeaderMap, HeaderValue};
    use uuid::Uuid;

    use super::{bearer_token, issue_token, require_role, require_user, Role};
    use crate::{config::AppConfig, error::AppError, state::AppState};

    fn state_with_secret(secret: Option<&str>) -> AppState {
        let mut config = AppConfig::from_env();
        config.jwt_secret = secret.map(ToOwned::to_owned);
        AppState {
            config: Arc::new(config),
            db_pool: None,
        }
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    #[test]
    fn extracts_bearer_and_bare_tokens() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("abc")), Some("abc"));
        assert_eq!(bearer_token(&headers_with("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn issued_tokens_round_trip_identity() {
        let state = state_with_secret(Some("test-secret"));
        let user_id = Uuid::new_v4();
        let token = issue_token(&state, user_id, Role::Owner).expect("token");

        let user = require_user(&state, &headers_with(&format!("Bearer {token}"))).expect("user");
        assert_eq!(user.id, user_id);
        assert_eq!(user.role, Role::Owner);

        let forbidden = require_role(&state, &headers_with(&token), Role::Admin);
        assert!(matches!(forbidden, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let issuer = state_with_secret(Some("secret-a"));
        let verifier = state_with_secret(Some("secret-b"));
        let token = issue_token(&issuer, Uuid::new_v4(), Role::Tenant).expect("token");

        let result = require_user(&verifier, &headers_with(&token));
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[test]
    fn missing_secret_is_a_dependency_error() {
        let state = state_with_secret(None);
        let result = require_user(&state, &headers_with("Bearer abc"));
        assert!(matches!(result, Err(AppError::Dependency(_))));
    }

    #[test]
    fn parses_roles_case_insensitively() {
        assert_eq!("Owner".parse::<Role>().expect("role"), Role::Owner);
        assert!("landlord".parse::<Role>().is_err());
    }
}
