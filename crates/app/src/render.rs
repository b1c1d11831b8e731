use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use jobboard_core::User;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::problem::{internal_error, ProblemResponse};
use crate::router::AppState;

pub mod templates {
    pub const HOME: &str = "jobs/home.html";
    pub const REGISTER: &str = "jobs/register.html";
    pub const LOGIN: &str = "jobs/login.html";
    pub const EMPLOYER_DASHBOARD: &str = "jobs/employer_dashboard.html";
    pub const APPLICANT_DASHBOARD: &str = "jobs/applicant_dashboard.html";
    pub const POST_JOB: &str = "jobs/post_job.html";
    pub const JOB_LIST: &str = "jobs/job_list.html";
    pub const JOB_DETAIL: &str = "jobs/job_detail.html";
    pub const APPLY_JOB: &str = "jobs/apply_job.html";
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to serialize page context: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Turns a template name and JSON context into a response body.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &Value) -> Result<String, RenderError>;

    fn content_type(&self) -> &'static str;
}

/// Emits a bare HTML document that carries the context as embedded JSON
/// for a client-side template layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRenderer;

impl Renderer for HtmlRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String, RenderError> {
        let payload = escape_script_json(&serde_json::to_string(context)?);
        let name = escape_html(template);
        Ok(format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{name}</title>\n</head>\n<body data-template=\"{name}\">\n<script type=\"application/json\" id=\"page-context\">{payload}</script>\n</body>\n</html>\n"
        ))
    }

    fn content_type(&self) -> &'static str {
        "text/html; charset=utf-8"
    }
}

/// Returns `{"template": ..., "context": ...}` documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String, RenderError> {
        Ok(serde_json::to_string(&json!({
            "template": template,
            "context": context,
        }))?)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Renders `template` with `context`, adding the viewer under `user`.
pub fn render_page(
    state: &AppState,
    status: StatusCode,
    template: &'static str,
    viewer: Option<&User>,
    mut context: Value,
) -> Result<Response, ProblemResponse> {
    if let Value::Object(map) = &mut context {
        let user = serde_json::to_value(viewer).map_err(|err| {
            error!(stage = "render", template, error = %err, "failed to serialize viewer");
            internal_error("failed to render page")
        })?;
        map.insert("user".to_string(), user);
    }

    let renderer = state.renderer();
    let body = renderer.render(template, &context).map_err(|err| {
        error!(stage = "render", template, error = %err, "failed to render page");
        internal_error("failed to render page")
    })?;

    Ok((status, [(header::CONTENT_TYPE, renderer.content_type())], body).into_response())
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

// JSON inside <script> must not contain a literal `</script>` or `<!--`.
fn escape_script_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
}
