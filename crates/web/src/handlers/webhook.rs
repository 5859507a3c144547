use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_insight_core::models::WorkflowRunEvent;
use ci_insight_github::webhook::GitHubEvent;
use ci_insight_pipeline::{Outcome, PipelineError, process_workflow_run};

use crate::AppState;

/// Loose view of a delivery, used only to log where it came from.
#[derive(serde::Deserialize)]
struct EventSource {
    repository: Option<SourceRepository>,
    sender: Option<SourceUser>,
}

#[derive(serde::Deserialize)]
struct SourceRepository {
    id: u64,
    full_name: Option<String>,
}

#[derive(serde::Deserialize)]
struct SourceUser {
    login: String,
}

/// Processes `workflow_run` deliveries inline and answers once the outcome is known.
///
/// Only a missing credential is reported to GitHub as a client error. Every other failure is
/// logged and acknowledged with 200 so the delivery is not redelivered.
pub async fn webhook(State(state): State<AppState>, event: GitHubEvent) -> Response {
    // Log the event source
    match event.payload::<EventSource>() {
        Ok(EventSource { repository: Some(repository), .. }) => match repository.full_name {
            Some(full_name) => tracing::info!(
                "Received webhook event {:?} from repository {}",
                event.kind,
                full_name
            ),
            None => tracing::info!(
                "Received webhook event {:?} from repository ID {}",
                event.kind,
                repository.id
            ),
        },
        Ok(EventSource { sender: Some(sender), .. }) => {
            tracing::info!("Received webhook event {:?} from @{}", event.kind, sender.login)
        }
        _ => tracing::info!("Received webhook event {:?} from unknown source", event.kind),
    }

    if event.kind != "workflow_run" {
        return (StatusCode::OK, "Event ignored").into_response();
    }
    let payload = match event.payload::<WorkflowRunEvent>() {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Received workflow_run event with invalid payload: {e}");
            return (StatusCode::OK, "Invalid workflow run").into_response();
        }
    };

    match process_workflow_run(&state.pipeline, &payload).await {
        Ok(Outcome::Ignored) => (StatusCode::OK, "Event ignored").into_response(),
        Ok(Outcome::Stored(record)) => {
            tracing::info!("Analysis {} stored for {}", record.id, record.repo_full_name);
            (StatusCode::OK, "Analysis stored").into_response()
        }
        Err(e @ PipelineError::MissingCredential(_)) => {
            tracing::warn!("Rejecting workflow run {}: {e}", payload.workflow_run.id);
            (StatusCode::BAD_REQUEST, "No GitHub credential available").into_response()
        }
        Err(e @ PipelineError::NoFailedJob(_)) => {
            tracing::info!("{e}");
            (StatusCode::OK, "No failed job").into_response()
        }
        Err(e) => {
            tracing::error!("Failed to analyze workflow run {}: {e}", payload.workflow_run.id);
            (StatusCode::OK, "Analysis failed").into_response()
        }
    }
}
