use axum::{extract::State, http::StatusCode, response::Response};
use jobboard_core::Role;
use serde_json::json;
use tracing::error;

use crate::problem::{internal_error, ProblemResponse};
use crate::render::{render_page, templates};
use crate::router::AppState;
use crate::session::CurrentUser;

/// Employers see their own postings; applicants see their applications.
pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Response, ProblemResponse> {
    match user.role {
        Role::Employer => {
            let jobs = state
                .storage()
                .jobs()
                .list_by_owner(user.id)
                .await
                .map_err(|err| {
                    error!(stage = "dashboard", user_id = user.id, error = %err, "failed to list jobs");
                    internal_error("failed to load dashboard")
                })?;
            render_page(
                &state,
                StatusCode::OK,
                templates::EMPLOYER_DASHBOARD,
                Some(&user),
                json!({ "jobs": jobs }),
            )
        }
        Role::Applicant => {
            let applications = state
                .storage()
                .applications()
                .list_for_applicant(user.id)
                .await
                .map_err(|err| {
                    error!(stage = "dashboard", user_id = user.id, error = %err, "failed to list applications");
                    internal_error("failed to load dashboard")
                })?;
            render_page(
                &state,
                StatusCode::OK,
                templates::APPLICANT_DASHBOARD,
                Some(&user),
                json!({ "applications": applications }),
            )
        }
    }
}
