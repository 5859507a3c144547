use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ci_insight_auth::CurrentUser;
use ci_insight_core::{AppError, models::AnalysisRecord};
use ci_insight_pipeline::PipelineContext;

/// Every stored analysis for a repository, oldest first.
pub async fn list_analyses(
    Path(repo_id): Path<u64>,
    State(pipeline): State<Arc<PipelineContext>>,
    current_user: CurrentUser,
) -> Result<Json<Vec<AnalysisRecord>>, AppError> {
    if !current_user.can_view_repo(repo_id) {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    }
    let records = pipeline.store.query_by_repo(repo_id).await?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn requires_login() {
        let app = TestApp::new(None, Some("ghp_test")).await;
        let response = app.get("/api/repos/42/analyses", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
