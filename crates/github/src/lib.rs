pub mod credentials;
pub mod webhook;

use anyhow::{Context, Result, bail};
use ci_insight_core::{
    config::{GitHubConfig, HttpConfig},
    models::{Conclusion, Job, JobList, MAX_LOG_CHARS, RepoRef},
};
use reqwest::{
    Client, RequestBuilder, Response,
    header::{ACCEPT, AUTHORIZATION, LOCATION},
    redirect::Policy,
};
use url::Url;

use crate::credentials::Token;

const USER_AGENT: &str = concat!("ci-insight/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const JOBS_PER_PAGE: u32 = 100;

/// Log bytes read before the rest of the body is dropped. A character is at most four bytes.
pub const MAX_LOG_BYTES: usize = 4 * MAX_LOG_CHARS;

/// Client for the workflow endpoints of the GitHub REST API.
#[derive(Clone)]
pub struct GitHub {
    /// Never follows redirects, so the log download location can be captured.
    api: Client,
    /// Plain client for the pre-signed log storage URL.
    storage: Client,
    api_url: Url,
}

impl GitHub {
    pub fn new(config: &GitHubConfig, http: &HttpConfig) -> Result<Self> {
        let api = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(Policy::none())
            .timeout(http.timeout())
            .build()
            .context("Failed to create GitHub API client")?;
        let storage = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(http.timeout())
            .build()
            .context("Failed to create log storage client")?;
        let mut api_url = Url::parse(&config.api_url)
            .with_context(|| format!("Invalid GitHub API URL {}", config.api_url))?;
        // Keep path prefixes such as /api/v3 when joining endpoint paths.
        if !api_url.path().ends_with('/') {
            api_url.set_path(&format!("{}/", api_url.path()));
        }
        Ok(Self { api, storage, api_url })
    }

    fn authorized(&self, url: Url, token: &Token) -> RequestBuilder {
        self.api
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", token.expose()))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Walk the run's job listing and return the first job that concluded with a failure.
    ///
    /// The listing URL is always built from the configured API URL, never taken from the event.
    pub async fn find_failed_job(
        &self,
        repo: &RepoRef,
        run_id: u64,
        token: &Token,
    ) -> Result<Option<Job>> {
        let base = self
            .api_url
            .join(&format!("repos/{}/{}/actions/runs/{}/jobs", repo.owner, repo.repo, run_id))
            .context("Failed to build jobs URL")?;
        let mut page = 1u32;
        let mut seen = 0u64;
        loop {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("per_page", &JOBS_PER_PAGE.to_string())
                .append_pair("page", &page.to_string());
            let list: JobList = self
                .authorized(url, token)
                .send()
                .await
                .context("Failed to fetch jobs")?
                .error_for_status()
                .context("Failed to fetch jobs")?
                .json()
                .await
                .context("Failed to parse jobs")?;
            let count = list.jobs.len() as u64;
            tracing::debug!("Fetched {} jobs (page {}, total {})", count, page, list.total_count);
            if let Some(job) = first_failed_job(list.jobs) {
                return Ok(Some(job));
            }
            seen += count;
            if count == 0 || seen >= list.total_count {
                return Ok(None);
            }
            page += 1;
        }
    }

    /// Download the raw log of a job.
    ///
    /// GitHub answers with a redirect to a short-lived storage URL, which is fetched without
    /// credentials.
    pub async fn fetch_job_log(
        &self,
        repo: &RepoRef,
        job_id: u64,
        token: &Token,
    ) -> Result<String> {
        let url = self
            .api_url
            .join(&format!("repos/{}/{}/actions/jobs/{}/logs", repo.owner, repo.repo, job_id))
            .context("Failed to build log URL")?;
        let response = self
            .authorized(url, token)
            .send()
            .await
            .with_context(|| format!("Failed to request log for job {job_id}"))?;
        let status = response.status();
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .with_context(|| format!("Log redirect for job {job_id} has no Location"))?;
            let target = response.url().join(location).context("Invalid log location")?;
            tracing::debug!("Job {} log redirected to {}", job_id, target.host_str().unwrap_or(""));
            let response = self
                .storage
                .get(target)
                .send()
                .await
                .with_context(|| format!("Failed to download log for job {job_id}"))?
                .error_for_status()
                .with_context(|| format!("Failed to download log for job {job_id}"))?;
            read_log(response).await
        } else if status.is_success() {
            tracing::debug!("Job {} log served without redirect", job_id);
            read_log(response).await
        } else {
            bail!("Failed to request log for job {job_id}: {status}")
        }
    }
}

/// Read at most `MAX_LOG_BYTES` of a log body.
async fn read_log(mut response: Response) -> Result<String> {
    let mut log = Vec::new();
    while let Some(chunk) = response.chunk().await.context("Failed to read log body")? {
        let take = chunk.len().min(MAX_LOG_BYTES - log.len());
        log.extend_from_slice(&chunk[..take]);
        if log.len() == MAX_LOG_BYTES {
            tracing::debug!("Log reached {} bytes, dropping the rest", MAX_LOG_BYTES);
            break;
        }
    }
    Ok(String::from_utf8_lossy(&log).into_owned())
}

/// First job in listing order with a failure conclusion.
pub fn first_failed_job(jobs: Vec<Job>) -> Option<Job> {
    jobs.into_iter().find(|job| job.conclusion == Some(Conclusion::Failure))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{header, header_exists, method, path, query_param},
    };

    use super::*;

    fn client(server: &MockServer) -> GitHub {
        let config: GitHubConfig =
            serde_json::from_value(json!({ "api_url": server.uri() })).unwrap();
        GitHub::new(&config, &HttpConfig::default()).unwrap()
    }

    fn job(id: u64, conclusion: Option<&str>) -> serde_json::Value {
        json!({ "id": id, "name": format!("job-{id}"), "conclusion": conclusion })
    }

    fn repo() -> RepoRef { RepoRef { owner: "octo".into(), repo: "repo".into() } }

    #[test]
    fn selects_first_failure_in_listing_order() {
        let jobs: Vec<Job> = serde_json::from_value(json!([
            job(1, Some("success")),
            job(2, None),
            job(3, Some("failure")),
            job(4, Some("failure")),
        ]))
        .unwrap();
        assert_eq!(first_failed_job(jobs).map(|j| j.id), Some(3));
        let jobs: Vec<Job> =
            serde_json::from_value(json!([job(1, Some("success")), job(2, Some("cancelled"))]))
                .unwrap();
        assert!(first_failed_job(jobs).is_none());
    }

    #[tokio::test]
    async fn finds_failed_job_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/runs/9/jobs"))
            .and(header("authorization", "Bearer ghs_test"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 3,
                "jobs": [
                    job(10, Some("success")),
                    job(11, Some("failure")),
                    job(12, Some("failure")),
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let found =
            client(&server).find_failed_job(&repo(), 9, &Token::new("ghs_test")).await.unwrap();
        assert_eq!(found.map(|j| j.id), Some(11));
    }

    #[tokio::test]
    async fn jobs_url_keeps_api_path_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/repos/octo/repo/actions/runs/9/jobs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "total_count": 1, "jobs": [job(5, Some("failure"))] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config: GitHubConfig =
            serde_json::from_value(json!({ "api_url": format!("{}/api/v3", server.uri()) }))
                .unwrap();
        let github = GitHub::new(&config, &HttpConfig::default()).unwrap();
        let found = github.find_failed_job(&repo(), 9, &Token::new("t")).await.unwrap();
        assert_eq!(found.map(|j| j.id), Some(5));
    }

    #[tokio::test]
    async fn follows_job_pages_until_total_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/runs/9/jobs"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 2,
                "jobs": [job(1, Some("success"))],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/runs/9/jobs"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_count": 2,
                "jobs": [job(2, Some("skipped"))],
            })))
            .mount(&server)
            .await;

        let found = client(&server).find_failed_job(&repo(), 9, &Token::new("t")).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn job_listing_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/runs/9/jobs"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        assert!(client(&server).find_failed_job(&repo(), 9, &Token::new("t")).await.is_err());
    }

    #[tokio::test]
    async fn log_redirect_is_fetched_without_credentials() {
        let server = MockServer::start().await;
        let storage_url = format!("{}/storage/job-11.txt?sig=abc", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/jobs/11/logs"))
            .and(header("authorization", "Bearer ghs_test"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", storage_url.as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/job-11.txt"))
            .and(query_param("sig", "abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("##[error]Process completed with exit code 1."),
            )
            .expect(1)
            .mount(&server)
            .await;

        let log =
            client(&server).fetch_job_log(&repo(), 11, &Token::new("ghs_test")).await.unwrap();
        assert_eq!(log, "##[error]Process completed with exit code 1.");

        let requests = server.received_requests().await.unwrap();
        let storage_request =
            requests.iter().find(|r| r.url.path() == "/storage/job-11.txt").unwrap();
        assert!(!storage_request.headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn log_served_directly_is_used() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/jobs/11/logs"))
            .and(header("authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain log body"))
            .expect(1)
            .mount(&server)
            .await;
        let log = client(&server).fetch_job_log(&repo(), 11, &Token::new("t")).await.unwrap();
        assert_eq!(log, "plain log body");
    }

    #[tokio::test]
    async fn large_log_is_read_up_to_byte_limit() {
        let server = MockServer::start().await;
        let storage_url = format!("{}/storage/big.txt", server.uri());
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/jobs/11/logs"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", storage_url.as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/storage/big.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(MAX_LOG_BYTES * 3)))
            .mount(&server)
            .await;

        let log = client(&server).fetch_job_log(&repo(), 11, &Token::new("t")).await.unwrap();
        assert_eq!(log.len(), MAX_LOG_BYTES);
        assert!(log.chars().count() >= MAX_LOG_CHARS);
    }

    #[tokio::test]
    async fn log_redirect_without_location_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/jobs/11/logs"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&server)
            .await;
        assert!(client(&server).fetch_job_log(&repo(), 11, &Token::new("t")).await.is_err());
    }

    #[tokio::test]
    async fn log_not_found_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octo/repo/actions/jobs/11/logs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        assert!(client(&server).fetch_job_log(&repo(), 11, &Token::new("t")).await.is_err());
    }
}
