use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use jobboard_core::forms::{FieldErrors, JobInput};
use jobboard_core::{Job, SearchQuery, User};
use jobboard_storage::NewJob;
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::problem::{internal_error, not_found, ProblemResponse};
use crate::render::{render_page, templates};
use crate::router::AppState;
use crate::session::{Employer, MaybeUser};

fn render_post_job(
    state: &AppState,
    status: StatusCode,
    viewer: &User,
    input: &JobInput,
    errors: &FieldErrors,
) -> Result<Response, ProblemResponse> {
    render_page(
        state,
        status,
        templates::POST_JOB,
        Some(viewer),
        json!({ "form": input, "errors": errors }),
    )
}

pub async fn post_job_form(
    State(state): State<AppState>,
    Employer(user): Employer,
) -> Result<Response, ProblemResponse> {
    render_post_job(
        &state,
        StatusCode::OK,
        &user,
        &JobInput::default(),
        &FieldErrors::new(),
    )
}

pub async fn post_job(
    State(state): State<AppState>,
    Employer(user): Employer,
    Form(input): Form<JobInput>,
) -> Result<Response, ProblemResponse> {
    let fields = match input.validate() {
        Ok(fields) => fields,
        Err(errors) => {
            return render_post_job(
                &state,
                StatusCode::UNPROCESSABLE_ENTITY,
                &user,
                &input,
                &errors,
            )
        }
    };

    let job = state
        .storage()
        .jobs()
        .insert(&NewJob {
            title: &fields.title,
            company_name: &fields.company_name,
            location: &fields.location,
            description: &fields.description,
            posted_by: user.id,
            created_at: state.now(),
        })
        .await
        .map_err(|err| {
            error!(stage = "jobs", user_id = user.id, error = %err, "failed to create job");
            internal_error("failed to create job")
        })?;

    counter!("jobs_posted_total").increment(1);
    info!(stage = "jobs", job_id = job.id, user_id = user.id, "job posted");
    Ok(Redirect::to("/dashboard/").into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    q: Option<String>,
}

pub async fn job_list(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Query(query): Query<JobListQuery>,
) -> Result<Response, ProblemResponse> {
    let search = SearchQuery::parse(query.q.as_deref());
    let jobs = state
        .storage()
        .jobs()
        .search(search.as_ref())
        .await
        .map_err(|err| {
            error!(stage = "jobs", error = %err, "failed to search jobs");
            internal_error("failed to list jobs")
        })?;

    render_page(
        &state,
        StatusCode::OK,
        templates::JOB_LIST,
        viewer.as_ref(),
        json!({
            "jobs": jobs,
            "q": search.as_ref().map_or("", SearchQuery::as_str),
        }),
    )
}

/// Parses a job id path segment and loads the job, mapping a malformed or
/// unknown id to 404.
pub(crate) async fn load_job(state: &AppState, raw_id: &str) -> Result<Job, ProblemResponse> {
    let Ok(id) = raw_id.parse::<i64>() else {
        return Err(not_found("no such job"));
    };
    state
        .storage()
        .jobs()
        .fetch(id)
        .await
        .map_err(|err| {
            error!(stage = "jobs", job_id = id, error = %err, "failed to load job");
            internal_error("failed to load job")
        })?
        .ok_or_else(|| not_found("no such job"))
}

pub async fn job_detail(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(raw_id): Path<String>,
) -> Result<Response, ProblemResponse> {
    let job = load_job(&state, &raw_id).await?;

    let applicants = if state.applicant_visibility().allows(viewer.as_ref(), &job) {
        let listed = state
            .storage()
            .applications()
            .list_for_job(job.id)
            .await
            .map_err(|err| {
                error!(stage = "jobs", job_id = job.id, error = %err, "failed to list applicants");
                internal_error("failed to load job")
            })?;
        Some(listed)
    } else {
        None
    };
    let is_applicant = viewer.as_ref().is_some_and(User::is_applicant);

    render_page(
        &state,
        StatusCode::OK,
        templates::JOB_DETAIL,
        viewer.as_ref(),
        json!({
            "job": job,
            "is_applicant": is_applicant,
            "applicants": applicants,
        }),
    )
}
