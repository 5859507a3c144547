use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ci_insight_core::{config::GitHubAppConfig, models::RepoRef};
use http::StatusCode;
use moka::future::Cache;
use octocrab::{Octocrab, models::InstallationId};
use secrecy::ExposeSecret;

// Installation tokens are valid for an hour.
const INSTALLATION_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);

/// Bearer token for the GitHub API. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    pub fn expose(&self) -> &str { &self.0 }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("Token(***)") }
}

/// Resolves the credential used to read workflow data for a repository.
///
/// `Ok(None)` means no credential exists for the repository, which callers treat as a
/// configuration problem rather than an upstream failure.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, repo: &RepoRef, installation_id: Option<u64>)
    -> Result<Option<Token>>;
}

/// A single explicitly configured token, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<Token>,
}

impl StaticCredentials {
    pub fn new(token: Option<Token>) -> Self { Self { token } }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(
        &self,
        _repo: &RepoRef,
        _installation_id: Option<u64>,
    ) -> Result<Option<Token>> {
        Ok(self.token.clone())
    }
}

/// Per-installation tokens minted for a GitHub App.
pub struct AppCredentials {
    app_client: Octocrab,
    tokens: Cache<u64, Token>,
}

impl AppCredentials {
    /// `api_url` is used for installation lookups and token requests.
    pub fn new(config: &GitHubAppConfig, api_url: &str) -> Result<Self> {
        let app_client = Octocrab::builder()
            .base_uri(api_url)
            .with_context(|| format!("Invalid GitHub API URL {api_url}"))?
            .app(
                config.id.into(),
                jsonwebtoken::EncodingKey::from_rsa_pem(config.private_key.as_bytes())
                    .context("Invalid GitHub App private key")?,
            )
            .build()
            .context("Failed to create GitHub App client")?;
        let tokens = Cache::builder().time_to_live(INSTALLATION_TOKEN_TTL).build();
        Ok(Self { app_client, tokens })
    }

    async fn installation_id(
        &self,
        repo: &RepoRef,
        hint: Option<u64>,
    ) -> Result<Option<InstallationId>> {
        if let Some(id) = hint {
            return Ok(Some(InstallationId(id)));
        }
        match self.app_client.apps().get_repository_installation(&repo.owner, &repo.repo).await {
            Ok(installation) => Ok(Some(installation.id)),
            Err(octocrab::Error::GitHub { source, .. })
                if source.status_code == StatusCode::NOT_FOUND =>
            {
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to look up installation for {repo}")),
        }
    }
}

#[async_trait]
impl CredentialResolver for AppCredentials {
    async fn resolve(&self, repo: &RepoRef, installation_id: Option<u64>) -> Result<Option<Token>> {
        let Some(installation_id) = self.installation_id(repo, installation_id).await? else {
            tracing::warn!("GitHub App is not installed on {}", repo);
            return Ok(None);
        };
        if let Some(token) = self.tokens.get(&installation_id.0).await {
            return Ok(Some(token));
        }
        let (_, secret) = self
            .app_client
            .installation_and_token(installation_id)
            .await
            .with_context(|| format!("Failed to create token for installation {installation_id}"))?;
        let token = Token::new(secret.expose_secret());
        self.tokens.insert(installation_id.0, token.clone()).await;
        tracing::debug!("Created token for installation {} ({})", installation_id, repo);
        Ok(Some(token))
    }
}
