use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Duration, Utc};
use jobboard_core::ApplicantVisibility;
use jobboard_storage::Database;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;

use crate::problem::ProblemResponse;
use crate::render::{render_page, templates, Renderer};
use crate::session::MaybeUser;
use crate::uploads::ResumeStore;
use crate::{accounts, apply, dashboard, jobs, telemetry};

/// Room for multipart boundaries and the cover letter on top of the resume cap.
const MULTIPART_OVERHEAD_BYTES: usize = 256 * 1024;

/// Knobs that shape request handling, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub session_ttl: Duration,
    pub secure_cookies: bool,
    pub max_resume_bytes: usize,
    pub applicant_visibility: ApplicantVisibility,
}

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    renderer: Arc<dyn Renderer>,
    resumes: ResumeStore,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    options: Arc<StateOptions>,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        renderer: Arc<dyn Renderer>,
        resumes: ResumeStore,
        options: StateOptions,
    ) -> Self {
        Self {
            metrics,
            storage,
            renderer,
            resumes,
            clock: Arc::new(Utc::now),
            options: Arc::new(options),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    pub fn resumes(&self) -> &ResumeStore {
        &self.resumes
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn session_ttl(&self) -> Duration {
        self.options.session_ttl
    }

    pub fn secure_cookies(&self) -> bool {
        self.options.secure_cookies
    }

    pub fn max_resume_bytes(&self) -> usize {
        self.options.max_resume_bytes
    }

    pub fn applicant_visibility(&self) -> ApplicantVisibility {
        self.options.applicant_visibility
    }
}

pub fn app_router(state: AppState) -> Router {
    let upload_limit = state
        .max_resume_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/", get(home))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route(
            "/register/",
            get(accounts::register_form).post(accounts::register),
        )
        .route("/login/", get(accounts::login_form).post(accounts::login))
        .route("/logout/", get(accounts::logout).post(accounts::logout))
        .route("/dashboard/", get(dashboard::dashboard))
        .route("/post-job/", get(jobs::post_job_form).post(jobs::post_job))
        .route("/jobs/", get(jobs::job_list))
        .route("/jobs/:id/", get(jobs::job_detail))
        .route(
            "/jobs/:id/apply/",
            get(apply::apply_form)
                .post(apply::apply_submit)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_state(state)
}

async fn home(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
) -> Result<Response, ProblemResponse> {
    render_page(
        &state,
        StatusCode::OK,
        templates::HOME,
        viewer.as_ref(),
        json!({}),
    )
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
