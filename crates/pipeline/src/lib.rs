use std::sync::Arc;

use ci_insight_analysis::{AnalysisError, Analyzer, truncate_log};
use ci_insight_core::models::{
    AnalysisRecord, AnalysisStatus, Conclusion, NewAnalysisRecord, RepoRef, WorkflowRunEvent,
};
use ci_insight_db::AnalysisStore;
use ci_insight_github::{GitHub, credentials::CredentialResolver};

/// Collaborators used to process a webhook delivery.
#[derive(Clone)]
pub struct PipelineContext {
    pub github: Arc<GitHub>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub analyzer: Arc<dyn Analyzer>,
    pub store: Arc<dyn AnalysisStore>,
}

/// Why processing stopped before a record was stored. Nothing is retried.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no credential available for {0}")]
    MissingCredential(RepoRef),
    #[error("workflow run {0} has no failed job")]
    NoFailedJob(u64),
    #[error("upstream request failed: {0:#}")]
    Upstream(anyhow::Error),
    #[error("failed to parse analysis: {0}")]
    AnalysisParse(AnalysisError),
    #[error("failed to store analysis: {0:#}")]
    Store(anyhow::Error),
}

impl From<AnalysisError> for PipelineError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::Request(e) => Self::Upstream(e.into()),
            err @ (AnalysisError::Empty | AnalysisError::Parse(_)) => Self::AnalysisParse(err),
        }
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// Not a completed, failed workflow run.
    Ignored,
    Stored(AnalysisRecord),
}

/// A completed workflow run that concluded with a failure.
#[derive(Debug, Clone)]
pub struct FailedRun {
    pub repo_id: u64,
    pub repo_full_name: String,
    pub repo: RepoRef,
    pub run_id: u64,
    pub installation_id: Option<u64>,
}

impl FailedRun {
    pub fn from_event(event: &WorkflowRunEvent) -> Option<Self> {
        if event.action != "completed"
            || event.workflow_run.conclusion != Some(Conclusion::Failure)
        {
            return None;
        }
        let Some(repo) = RepoRef::from_full_name(&event.repository.full_name) else {
            tracing::warn!("Invalid repository name {:?}", event.repository.full_name);
            return None;
        };
        Some(Self {
            repo_id: event.repository.id,
            repo_full_name: event.repository.full_name.clone(),
            repo,
            run_id: event.workflow_run.id,
            installation_id: event.installation.map(|i| i.id),
        })
    }
}

/// Analyze the first failed job of a failed workflow run and store the result.
///
/// Stages run strictly in sequence: credential, job lookup, log download, completion, store.
/// The first failing stage ends processing for the event.
pub async fn process_workflow_run(
    ctx: &PipelineContext,
    event: &WorkflowRunEvent,
) -> Result<Outcome, PipelineError> {
    let Some(run) = FailedRun::from_event(event) else {
        tracing::debug!(
            "Ignoring workflow run {} ({} / {:?})",
            event.workflow_run.id,
            event.action,
            event.workflow_run.conclusion
        );
        return Ok(Outcome::Ignored);
    };
    tracing::info!("Processing failed workflow run {} for {}", run.run_id, run.repo);

    let token = ctx
        .credentials
        .resolve(&run.repo, run.installation_id)
        .await
        .map_err(PipelineError::Upstream)?
        .ok_or_else(|| PipelineError::MissingCredential(run.repo.clone()))?;

    let job = ctx
        .github
        .find_failed_job(&run.repo, run.run_id, &token)
        .await
        .map_err(PipelineError::Upstream)?
        .ok_or(PipelineError::NoFailedJob(run.run_id))?;
    tracing::info!("Workflow run {}: analyzing failed job {} ({})", run.run_id, job.id, job.name);

    let log =
        ctx.github.fetch_job_log(&run.repo, job.id, &token).await.map_err(PipelineError::Upstream)?;
    let log = truncate_log(&log);

    let analysis = ctx.analyzer.analyze(log).await?;

    let record = ctx
        .store
        .append(NewAnalysisRecord {
            repo_id: run.repo_id,
            repo_full_name: run.repo_full_name,
            github_run_id: run.run_id,
            status: AnalysisStatus::Failed,
            conclusion: analysis.conclusion,
            suggestion: analysis.suggestion,
            raw_log: log.to_string(),
        })
        .await
        .map_err(PipelineError::Store)?;
    tracing::info!("Stored analysis {} for workflow run {}", record.id, run.run_id);
    Ok(Outcome::Stored(record))
}
