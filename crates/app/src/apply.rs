use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use jobboard_core::forms::{ApplicationInput, FieldErrors, ResumeUpload};
use jobboard_core::{Job, User};
use jobboard_storage::{ApplicationInsertOutcome, NewApplication};
use metrics::counter;
use serde_json::json;
use tracing::{error, info, warn};

use crate::jobs::load_job;
use crate::problem::{internal_error, ProblemResponse};
use crate::render::{render_page, templates};
use crate::router::AppState;
use crate::session::Applicant;

pub const ALREADY_APPLIED: &str = "You have already applied to this job.";

fn render_already_applied(
    state: &AppState,
    status: StatusCode,
    viewer: &User,
    job: &Job,
) -> Result<Response, ProblemResponse> {
    render_page(
        state,
        status,
        templates::APPLY_JOB,
        Some(viewer),
        json!({ "job": job, "error": ALREADY_APPLIED }),
    )
}

fn render_apply_form(
    state: &AppState,
    status: StatusCode,
    viewer: &User,
    job: &Job,
    cover_letter: &str,
    errors: &FieldErrors,
) -> Result<Response, ProblemResponse> {
    render_page(
        state,
        status,
        templates::APPLY_JOB,
        Some(viewer),
        json!({
            "job": job,
            "form": { "cover_letter": cover_letter },
            "errors": errors,
        }),
    )
}

async fn has_applied(state: &AppState, job: &Job, user: &User) -> Result<bool, ProblemResponse> {
    state
        .storage()
        .applications()
        .exists(job.id, user.id)
        .await
        .map_err(|err| {
            error!(stage = "apply", job_id = job.id, user_id = user.id, error = %err, "failed to check application");
            internal_error("failed to load application")
        })
}

pub async fn apply_form(
    State(state): State<AppState>,
    Applicant(user): Applicant,
    Path(raw_id): Path<String>,
) -> Result<Response, ProblemResponse> {
    let job = load_job(&state, &raw_id).await?;

    if has_applied(&state, &job, &user).await? {
        return render_already_applied(&state, StatusCode::OK, &user, &job);
    }
    render_apply_form(&state, StatusCode::OK, &user, &job, "", &FieldErrors::new())
}

pub async fn apply_submit(
    State(state): State<AppState>,
    Applicant(user): Applicant,
    Path(raw_id): Path<String>,
    multipart: Multipart,
) -> Result<Response, ProblemResponse> {
    let job = load_job(&state, &raw_id).await?;

    if has_applied(&state, &job, &user).await? {
        counter!("applications_submitted_total", "result" => "duplicate").increment(1);
        return render_already_applied(&state, StatusCode::CONFLICT, &user, &job);
    }

    let input = read_application(multipart).await?;
    let cover_letter = input.cover_letter.clone();
    let submission = match input.validate(state.max_resume_bytes()) {
        Ok(submission) => submission,
        Err(errors) => {
            return render_apply_form(
                &state,
                StatusCode::UNPROCESSABLE_ENTITY,
                &user,
                &job,
                &cover_letter,
                &errors,
            )
        }
    };

    let resume_path = state
        .resumes()
        .save(&submission.resume.file_name, &submission.resume.content)
        .await
        .map_err(|err| {
            error!(stage = "apply", job_id = job.id, user_id = user.id, error = %err, "failed to store resume");
            internal_error("failed to store resume")
        })?;

    let outcome = state
        .storage()
        .applications()
        .insert(&NewApplication {
            job_id: job.id,
            applicant_id: user.id,
            resume: &resume_path,
            cover_letter: &submission.cover_letter,
            applied_at: state.now(),
        })
        .await;

    match outcome {
        Ok(ApplicationInsertOutcome::Inserted(application)) => {
            counter!("applications_submitted_total", "result" => "created").increment(1);
            info!(
                stage = "apply",
                application_id = application.id,
                job_id = job.id,
                user_id = user.id,
                "application submitted"
            );
            Ok(Redirect::to("/dashboard/").into_response())
        }
        Ok(ApplicationInsertOutcome::Duplicate) => {
            discard_resume(&state, &resume_path).await;
            counter!("applications_submitted_total", "result" => "duplicate").increment(1);
            render_already_applied(&state, StatusCode::CONFLICT, &user, &job)
        }
        Err(err) => {
            discard_resume(&state, &resume_path).await;
            error!(stage = "apply", job_id = job.id, user_id = user.id, error = %err, "failed to record application");
            Err(internal_error("failed to record application"))
        }
    }
}

async fn discard_resume(state: &AppState, relative: &str) {
    if let Err(err) = state.resumes().discard(relative).await {
        warn!(stage = "apply", path = relative, error = %err, "failed to remove orphaned resume");
    }
}

/// Collects the `resume` and `cover_letter` parts. Unknown parts are skipped.
async fn read_application(mut multipart: Multipart) -> Result<ApplicationInput, ProblemResponse> {
    let mut input = ApplicationInput::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_problem)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "resume" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content = field.bytes().await.map_err(multipart_problem)?;
                input.resume = Some(ResumeUpload {
                    file_name,
                    content: content.to_vec(),
                });
            }
            "cover_letter" => {
                input.cover_letter = field.text().await.map_err(multipart_problem)?;
            }
            _ => {}
        }
    }
    Ok(input)
}

fn multipart_problem(err: MultipartError) -> ProblemResponse {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ProblemResponse::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "the upload exceeds the allowed size",
        )
    } else {
        ProblemResponse::new(StatusCode::BAD_REQUEST, "invalid_multipart", err.body_text())
    }
}
