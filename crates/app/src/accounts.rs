use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use jobboard_core::forms::{
    FieldErrors, LoginInput, RegistrationInput, INVALID_LOGIN, NON_FIELD_ERRORS, USERNAME_TAKEN,
};
use jobboard_core::{Role, User};
use jobboard_storage::{NewUser, UserCreateOutcome};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::password::{hash_password, verify_password};
use crate::problem::{internal_error, ProblemResponse};
use crate::render::{render_page, templates};
use crate::router::AppState;
use crate::session::{close_session, expired_cookie, open_session, MaybeUser};

const DASHBOARD_PATH: &str = "/dashboard/";

fn role_choices() -> Value {
    Role::ALL
        .iter()
        .map(|role| json!({ "value": role.as_str(), "label": role.label() }))
        .collect()
}

fn render_register(
    state: &AppState,
    status: StatusCode,
    viewer: Option<&User>,
    input: &RegistrationInput,
    errors: &FieldErrors,
) -> Result<Response, ProblemResponse> {
    render_page(
        state,
        status,
        templates::REGISTER,
        viewer,
        json!({
            "form": {
                "username": input.username,
                "email": input.email,
                "role": input.role,
            },
            "errors": errors,
            "roles": role_choices(),
        }),
    )
}

pub async fn register_form(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
) -> Result<Response, ProblemResponse> {
    render_register(
        &state,
        StatusCode::OK,
        viewer.as_ref(),
        &RegistrationInput::default(),
        &FieldErrors::new(),
    )
}

pub async fn register(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    headers: HeaderMap,
    Form(input): Form<RegistrationInput>,
) -> Result<Response, ProblemResponse> {
    let registration = match input.validate() {
        Ok(registration) => registration,
        Err(errors) => {
            return render_register(
                &state,
                StatusCode::UNPROCESSABLE_ENTITY,
                viewer.as_ref(),
                &input,
                &errors,
            )
        }
    };

    let password = registration.password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|err| {
            error!(stage = "accounts", error = %err, "password hashing task failed");
            internal_error("failed to create account")
        })?
        .map_err(|err| {
            error!(stage = "accounts", error = %err, "failed to hash password");
            internal_error("failed to create account")
        })?;

    let outcome = state
        .storage()
        .users()
        .create(&NewUser {
            username: &registration.username,
            email: &registration.email,
            password_hash: &password_hash,
            role: registration.role,
            created_at: state.now(),
        })
        .await
        .map_err(|err| {
            error!(stage = "accounts", error = %err, "failed to create account");
            internal_error("failed to create account")
        })?;

    let user = match outcome {
        UserCreateOutcome::Created(user) => user,
        UserCreateOutcome::DuplicateUsername => {
            return render_register(
                &state,
                StatusCode::UNPROCESSABLE_ENTITY,
                viewer.as_ref(),
                &input,
                &FieldErrors::single("username", USERNAME_TAKEN),
            )
        }
    };

    counter!("accounts_registered_total", "role" => user.role.as_str()).increment(1);
    info!(
        stage = "accounts",
        user_id = user.id,
        role = %user.role,
        "account registered"
    );

    close_session(&state, &headers).await?;
    let cookie = open_session(&state, &user).await?;
    Ok(redirect_with_cookie(DASHBOARD_PATH, cookie))
}

#[derive(Debug, Default, Deserialize)]
pub struct NextQuery {
    #[serde(default)]
    next: Option<String>,
}

/// Accepts only same-site absolute paths as post-login targets.
fn safe_next(raw: Option<&str>) -> Option<&str> {
    raw.filter(|next| next.starts_with('/') && !next.starts_with("//") && !next.contains('\\'))
}

fn render_login(
    state: &AppState,
    status: StatusCode,
    viewer: Option<&User>,
    username: &str,
    next: Option<&str>,
    errors: &FieldErrors,
) -> Result<Response, ProblemResponse> {
    render_page(
        state,
        status,
        templates::LOGIN,
        viewer,
        json!({
            "form": { "username": username, "next": next },
            "errors": errors,
        }),
    )
}

pub async fn login_form(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<NextQuery>,
) -> Result<Response, ProblemResponse> {
    render_login(
        &state,
        StatusCode::OK,
        viewer.as_ref(),
        "",
        safe_next(query.next.as_deref()),
        &FieldErrors::new(),
    )
}

pub async fn login(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    headers: HeaderMap,
    Form(input): Form<LoginInput>,
) -> Result<Response, ProblemResponse> {
    let next = safe_next(input.next.as_deref());
    let (username, password) = match input.validate() {
        Ok(credentials) => credentials,
        Err(errors) => {
            return render_login(
                &state,
                StatusCode::UNPROCESSABLE_ENTITY,
                viewer.as_ref(),
                input.username.trim(),
                next,
                &errors,
            )
        }
    };

    let credentials = state
        .storage()
        .users()
        .find_credentials(username)
        .await
        .map_err(|err| {
            error!(stage = "accounts", error = %err, "failed to load credentials");
            internal_error("failed to log in")
        })?;

    let authenticated = match credentials {
        Some(credentials) => {
            let password = password.to_string();
            let stored_hash = credentials.password_hash;
            let verified =
                tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
                    .await
                    .map_err(|err| {
                        error!(stage = "accounts", error = %err, "password check task failed");
                        internal_error("failed to log in")
                    })?
                    .map_err(|err| {
                        error!(
                            stage = "accounts",
                            user_id = credentials.user.id,
                            error = %err,
                            "stored password hash is unusable"
                        );
                        internal_error("failed to log in")
                    })?;
            verified.then_some(credentials.user)
        }
        None => None,
    };

    let Some(user) = authenticated else {
        counter!("logins_total", "result" => "failure").increment(1);
        warn!(stage = "accounts", %username, "rejected login");
        return render_login(
            &state,
            StatusCode::UNPROCESSABLE_ENTITY,
            viewer.as_ref(),
            username,
            next,
            &FieldErrors::single(NON_FIELD_ERRORS, INVALID_LOGIN),
        );
    };

    close_session(&state, &headers).await?;
    match state.storage().sessions().purge_expired(state.now()).await {
        Ok(0) => {}
        Ok(purged) => info!(stage = "accounts", purged, "purged expired sessions"),
        Err(err) => warn!(stage = "accounts", error = %err, "failed to purge expired sessions"),
    }
    let cookie = open_session(&state, &user).await?;

    counter!("logins_total", "result" => "success").increment(1);
    info!(stage = "accounts", user_id = user.id, "user logged in");
    Ok(redirect_with_cookie(next.unwrap_or(DASHBOARD_PATH), cookie))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ProblemResponse> {
    close_session(&state, &headers).await?;
    let cookie = expired_cookie(state.secure_cookies())?;
    Ok(redirect_with_cookie("/", cookie))
}

fn redirect_with_cookie(location: &str, cookie: HeaderValue) -> Response {
    let mut response = Redirect::to(location).into_response();
    response.headers_mut().append(header::SET_COOKIE, cookie);
    response
}
