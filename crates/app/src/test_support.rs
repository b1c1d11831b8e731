use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use jobboard_core::{ApplicantVisibility, Role};
use jobboard_storage::Database;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::render::JsonRenderer;
use crate::router::{app_router, AppState, StateOptions};
use crate::session::SESSION_COOKIE;
use crate::telemetry;
use crate::uploads::ResumeStore;

pub const TEST_PASSWORD: &str = "s3cret-pass";
pub const MAX_RESUME_BYTES: usize = 64 * 1024;
const MULTIPART_BOUNDARY: &str = "jobboard-test-boundary";

/// Application wired to a throwaway SQLite file and media directory.
pub struct TestApp {
    pub state: AppState,
    pub database: Database,
    _dir: Arc<TempDir>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_visibility(ApplicantVisibility::AnyEmployer).await
    }

    pub async fn with_visibility(applicant_visibility: ApplicantVisibility) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("app.db").display());
        let database = Database::connect(&url).await.expect("connect");
        database.run_migrations().await.expect("migrations");
        database.initialize_roles().await.expect("roles");

        let metrics = telemetry::init_metrics().expect("metrics");
        let state = AppState::new(
            metrics,
            database.clone(),
            Arc::new(JsonRenderer),
            ResumeStore::new(dir.path().join("media")),
            StateOptions {
                session_ttl: Duration::days(14),
                secure_cookies: false,
                max_resume_bytes: MAX_RESUME_BYTES,
                applicant_visibility,
            },
        )
        .with_clock(ticking_clock(base_time()));

        Self {
            state,
            database,
            _dir: Arc::new(dir),
        }
    }

    /// Same database and media, with the clock pinned to `now`.
    pub fn with_fixed_now(&self, now: DateTime<Utc>) -> Self {
        Self {
            state: self.state.clone().with_clock(Arc::new(move || now)),
            database: self.database.clone(),
            _dir: Arc::clone(&self._dir),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        app_router(self.state.clone())
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Registers an account through the form and returns its session cookie.
    pub async fn register(&self, username: &str, role: Role) -> String {
        let email = format!("{username}@example.com");
        let response = self
            .send(form_request(
                Method::POST,
                "/register/",
                None,
                &[
                    ("username", username),
                    ("email", &email),
                    ("password1", TEST_PASSWORD),
                    ("password2", TEST_PASSWORD),
                    ("role", role.as_str()),
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "register {username}");
        session_cookie(&response).expect("session cookie")
    }

    /// Posts a job as the employer behind `cookie` and returns its id.
    pub async fn post_job(&self, cookie: &str, title: &str, company: &str, location: &str) -> i64 {
        let response = self
            .send(form_request(
                Method::POST,
                "/post-job/",
                Some(cookie),
                &[
                    ("title", title),
                    ("company_name", company),
                    ("location", location),
                    ("description", "Build and run things."),
                ],
            ))
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "post {title}");

        let jobs = self.database.jobs().search(None).await.expect("jobs");
        jobs.into_iter()
            .find(|job| job.title == title)
            .map(|job| job.id)
            .expect("posted job")
    }

    pub async fn application_count(&self) -> i64 {
        sqlx_count(&self.database, "SELECT COUNT(*) FROM applications").await
    }

    pub async fn job_count(&self) -> i64 {
        sqlx_count(&self.database, "SELECT COUNT(*) FROM jobs").await
    }

    pub fn media_root(&self) -> std::path::PathBuf {
        self.state.resumes().root().to_path_buf()
    }
}

async fn sqlx_count(database: &Database, query: &str) -> i64 {
    sqlx::query_scalar(query)
        .fetch_one(database.pool())
        .await
        .expect("count")
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid time")
}

// Every reading advances one second, so records created in sequence get
// distinct, ordered timestamps.
fn ticking_clock(base: DateTime<Utc>) -> Arc<dyn Fn() -> DateTime<Utc> + Send + Sync> {
    let ticks = AtomicI64::new(0);
    Arc::new(move || base + Duration::seconds(ticks.fetch_add(1, Ordering::SeqCst)))
}

fn with_cookie(builder: axum::http::request::Builder, cookie: Option<&str>) -> axum::http::request::Builder {
    match cookie {
        Some(cookie) => builder.header(header::COOKIE, cookie),
        None => builder,
    }
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    with_cookie(Request::builder().method(Method::GET).uri(uri), cookie)
        .body(Body::empty())
        .expect("request")
}

pub fn form_request(
    method: Method,
    uri: &str,
    cookie: Option<&str>,
    fields: &[(&str, &str)],
) -> Request<Body> {
    let body = serde_urlencoded::to_string(fields).expect("encode form");
    with_cookie(Request::builder().method(method).uri(uri), cookie)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("request")
}

/// Builds a `multipart/form-data` POST with an optional cover letter and
/// an optional `(file name, content)` resume part.
pub fn multipart_request(
    uri: &str,
    cookie: Option<&str>,
    cover_letter: Option<&str>,
    resume: Option<(&str, &[u8])>,
) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(text) = cover_letter {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"cover_letter\"\r\n\r\n{text}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content)) = resume {
        body.extend_from_slice(
            format!(
                "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"resume\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    with_cookie(Request::builder().method(Method::POST).uri(uri), cookie)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

/// Returns the `name=value` pair of a session cookie set by `response`.
pub fn session_cookie(response: &Response) -> Option<String> {
    let prefix = format!("{SESSION_COOKIE}=");
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|raw| raw.split(';').next())
        .find(|pair| pair.starts_with(&prefix) && pair.len() > prefix.len())
        .map(str::to_string)
}

pub async fn body_text(response: Response) -> String {
    let collected = response.into_body().collect().await.expect("body");
    String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json body")
}
