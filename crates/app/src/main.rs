mod accounts;
mod apply;
mod dashboard;
mod jobs;
mod password;
mod problem;
mod render;
mod router;
mod session;
mod telemetry;
mod uploads;

#[cfg(test)]
mod test_support;

use std::{net::SocketAddr, sync::Arc};

use jobboard_core::ApplicantVisibility;
use jobboard_storage::Database;
use jobboard_util::{load_env_file, AppConfig, ApplicantVisibilitySetting, RendererKind};
use tracing::{info, warn};

use crate::render::{HtmlRenderer, JsonRenderer, Renderer};
use crate::router::StateOptions;
use crate::uploads::ResumeStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;
    storage.initialize_roles().await?;
    match storage.sessions().purge_expired(chrono::Utc::now()).await {
        Ok(0) => {}
        Ok(purged) => info!(stage = "app", purged, "purged expired sessions"),
        Err(err) => warn!(stage = "app", error = %err, "failed to purge expired sessions"),
    }

    let renderer: Arc<dyn Renderer> = match config.renderer {
        RendererKind::Html => Arc::new(HtmlRenderer),
        RendererKind::Json => Arc::new(JsonRenderer),
    };
    let applicant_visibility = match config.applicant_visibility {
        ApplicantVisibilitySetting::AnyEmployer => ApplicantVisibility::AnyEmployer,
        ApplicantVisibilitySetting::Owner => ApplicantVisibility::OwnerOnly,
    };
    let options = StateOptions {
        session_ttl: chrono::Duration::from_std(config.session_ttl)?,
        secure_cookies: config.environment.is_production(),
        max_resume_bytes: config.max_resume_bytes,
        applicant_visibility,
    };

    let state = router::AppState::new(
        metrics,
        storage,
        renderer,
        ResumeStore::new(&config.media_root),
        options,
    );

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        media_root = %state.resumes().root().display(),
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
