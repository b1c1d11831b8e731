use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jobboard_core::{require_role, Role, User};
use jobboard_storage::NewSession;
use metrics::counter;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::{error, warn};

use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

pub const SESSION_COOKIE: &str = "jobboard_session";
const TOKEN_BYTES: usize = 32;

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only this digest is stored; the raw token lives in the cookie.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extracts the session token from the request's `Cookie` headers.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn cookie_header(value: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue, ProblemResponse> {
    let mut cookie = format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).map_err(|err| {
        error!(stage = "accounts", error = %err, "failed to encode session cookie");
        internal_error("failed to start session")
    })
}

/// `Set-Cookie` value that removes the session cookie.
pub fn expired_cookie(secure: bool) -> Result<HeaderValue, ProblemResponse> {
    cookie_header("", 0, secure)
}

/// Persists a new session for `user` and returns the `Set-Cookie` value.
pub async fn open_session(state: &AppState, user: &User) -> Result<HeaderValue, ProblemResponse> {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let now = state.now();
    let ttl = state.session_ttl();
    let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
        error!(stage = "accounts", user_id = user.id, "session expiry out of range");
        internal_error("failed to start session")
    })?;

    state
        .storage()
        .sessions()
        .insert(&NewSession {
            token_hash: &token_hash,
            user_id: user.id,
            created_at: now,
            expires_at,
        })
        .await
        .map_err(|err| {
            error!(stage = "accounts", user_id = user.id, error = %err, "failed to persist session");
            internal_error("failed to start session")
        })?;

    cookie_header(&token, ttl.num_seconds(), state.secure_cookies())
}

/// Deletes the session referenced by the request cookie, if any.
pub async fn close_session(state: &AppState, headers: &HeaderMap) -> Result<(), ProblemResponse> {
    let Some(token) = session_token(headers) else {
        return Ok(());
    };
    state
        .storage()
        .sessions()
        .delete(&hash_token(&token))
        .await
        .map_err(|err| {
            error!(stage = "accounts", error = %err, "failed to delete session");
            internal_error("failed to end session")
        })?;
    Ok(())
}

async fn resolve_user(state: &AppState, headers: &HeaderMap) -> Result<Option<User>, ProblemResponse> {
    let Some(token) = session_token(headers) else {
        return Ok(None);
    };
    state
        .storage()
        .sessions()
        .find_user(&hash_token(&token), state.now())
        .await
        .map_err(|err| {
            error!(stage = "accounts", error = %err, "failed to resolve session");
            internal_error("failed to resolve session")
        })
}

/// The viewer, when the request carries a valid session.
pub struct MaybeUser(pub Option<User>);

/// An authenticated viewer. Rejects with 401 otherwise.
pub struct CurrentUser(pub User);

/// An authenticated employer. Rejects with 401 or 403 before the body is read.
pub struct Employer(pub User);

/// An authenticated applicant. Rejects with 401 or 403 before the body is read.
pub struct Applicant(pub User);

impl CurrentUser {
    fn require(self, role: Role) -> Result<User, ProblemResponse> {
        require_role(&self.0, role).map_err(|mismatch| {
            counter!("authorization_denied_total", "reason" => "role").increment(1);
            warn!(
                stage = "accounts",
                user_id = self.0.id,
                required = %mismatch.required,
                actual = %mismatch.actual,
                "rejected request for wrong role"
            );
            ProblemResponse::new(
                StatusCode::FORBIDDEN,
                "forbidden_role",
                format!("this page requires the {} role", mismatch.required.label()),
            )
        })?;
        Ok(self.0)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        resolve_user(state, &parts.headers).await.map(MaybeUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match resolve_user(state, &parts.headers).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => {
                counter!("authorization_denied_total", "reason" => "unauthenticated").increment(1);
                Err(ProblemResponse::new(
                    StatusCode::UNAUTHORIZED,
                    "unauthenticated",
                    "log in to access this page",
                ))
            }
        }
    }
}

async fn user_with_role(
    parts: &mut Parts,
    state: &AppState,
    role: Role,
) -> Result<User, ProblemResponse> {
    CurrentUser::from_request_parts(parts, state)
        .await?
        .require(role)
}

#[async_trait]
impl FromRequestParts<AppState> for Employer {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        user_with_role(parts, state, Role::Employer).await.map(Employer)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Applicant {
    type Rejection = ProblemResponse;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        user_with_role(parts, state, Role::Applicant).await.map(Applicant)
    }
}
