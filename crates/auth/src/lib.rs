use anyhow::{Context, anyhow, bail};
use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts, Query, State},
    http::{StatusCode, header::ACCEPT, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ci_insight_core::{AppError, config::GitHubConfig};
use octocrab::{
    Octocrab,
    models::{Author, Repository},
};
use rand::{TryRngCore, rngs::OsRng};
use time::{Duration, UtcDateTime};
use tower_sessions::Session;

pub const GITHUB_OAUTH_STATE: &str = "github_oauth_state";
pub const CURRENT_USER: &str = "current_user";
pub const RETURN_TO: &str = "return_to";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredOAuth {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: Option<UtcDateTime>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<UtcDateTime>,
}

impl From<StoredOAuth> for octocrab::auth::OAuth {
    fn from(value: StoredOAuth) -> Self {
        octocrab::auth::OAuth {
            access_token: value.access_token.into(),
            token_type: value.token_type,
            scope: Vec::new(),
            expires_in: None,
            refresh_token: None,
            refresh_token_expires_in: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Profile {
    pub id: u64,
    pub login: String,
}

impl From<Author> for Profile {
    fn from(author: Author) -> Self { Self { id: author.id.into_inner(), login: author.login } }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CurrentUserRepo {
    pub id: u64,
    pub full_name: String,
}

impl From<Repository> for CurrentUserRepo {
    fn from(repo: Repository) -> Self {
        let full_name = repo.full_name.unwrap_or_else(|| match &repo.owner {
            Some(owner) => format!("{}/{}", owner.login, repo.name),
            None => repo.name.clone(),
        });
        Self { id: repo.id.into_inner(), full_name }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CurrentUser {
    /// `None` for the development login.
    pub oauth: Option<StoredOAuth>,
    pub profile: Profile,
    #[serde(default)]
    pub repos: Vec<CurrentUserRepo>,
    #[serde(default)]
    pub super_admin: bool,
}

impl CurrentUser {
    /// Local user for `dev_mode` deployments without an OAuth app.
    pub fn dev_user() -> Self {
        Self {
            oauth: None,
            profile: Profile { id: u64::MAX, login: "devuser".to_string() },
            repos: vec![],
            super_admin: true,
        }
    }

    pub fn can_view_repo(&self, repo_id: u64) -> bool {
        self.super_admin || self.repos.iter().any(|r| r.id == repo_id)
    }
}

pub fn generate_nonce() -> anyhow::Result<String> {
    let mut bytes = [0u8; 16];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[derive(serde::Deserialize)]
pub struct OAuthQuery {
    pub code: String,
    pub state: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OAuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_in: Option<i64>,
}

impl From<OAuthResponse> for StoredOAuth {
    fn from(value: OAuthResponse) -> Self {
        StoredOAuth {
            access_token: value.access_token,
            token_type: value.token_type,
            expires_at: value.expires_in.map(|s| UtcDateTime::now() + Duration::seconds(s)),
            refresh_token: value.refresh_token,
            refresh_token_expires_at: value
                .refresh_token_expires_in
                .map(|s| UtcDateTime::now() + Duration::seconds(s)),
        }
    }
}

#[derive(serde::Serialize)]
struct FetchAccessToken<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
}

#[derive(serde::Serialize)]
struct RefreshAccessToken<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    refresh_token: &'a str,
}

/// OAuth callback: verify the state nonce, exchange the code and remember the user.
pub async fn oauth(
    session: Session,
    Query(OAuthQuery { code, state: oauth_state }): Query<OAuthQuery>,
    State(config): State<GitHubConfig>,
) -> Result<Response, AppError> {
    let existing_state = session.get::<String>(GITHUB_OAUTH_STATE).await?;
    let Some(existing_state) = existing_state else {
        tracing::warn!("No state found in session");
        return Ok((StatusCode::BAD_REQUEST, "No state found").into_response());
    };
    if existing_state != oauth_state {
        tracing::warn!("State mismatch: expected {}, got {}", existing_state, oauth_state);
        return Ok((StatusCode::BAD_REQUEST, "State mismatch").into_response());
    }
    session.remove_value(GITHUB_OAUTH_STATE).await?;

    let current_user = fetch_access_token(&config, &code).await?;
    session.insert(CURRENT_USER, current_user).await?;

    let return_to = session.remove::<String>(RETURN_TO).await?;
    Ok(Redirect::to(return_to.as_deref().unwrap_or("/")).into_response())
}

fn oauth_client() -> anyhow::Result<Octocrab> {
    Octocrab::builder()
        .base_uri("https://github.com")
        .context("Failed to create base URI")?
        .add_header(ACCEPT, "application/json".to_string())
        .build()
        .context("Failed to create OAuth client")
}

async fn fetch_access_token(config: &GitHubConfig, code: &str) -> Result<CurrentUser, AppError> {
    let Some(oauth_config) = &config.oauth else {
        tracing::warn!("No GitHub OAuth config found");
        return Err(AppError::Internal(anyhow!("No GitHub OAuth config")));
    };
    let oauth: OAuthResponse = oauth_client()?
        .post(
            "/login/oauth/access_token",
            Some(&FetchAccessToken {
                client_id: &oauth_config.client_id,
                client_secret: &oauth_config.client_secret,
                code,
            }),
        )
        .await?;
    let oauth = StoredOAuth::from(oauth);
    let client = Octocrab::builder().oauth(oauth.clone().into()).build()?;
    let profile = client.current().user().await.context("Failed to fetch current user")?;
    let repos = client
        .all_pages(
            client
                .current()
                .list_repos_for_authenticated_user()
                .per_page(100)
                .send()
                .await
                .context("Failed to fetch current user repositories")?,
        )
        .await
        .context("Failed to fetch current user repositories")?
        .into_iter()
        .map(CurrentUserRepo::from)
        .collect::<Vec<_>>();
    tracing::info!("Logged in as @{} ({} repos)", profile.login, repos.len());
    let super_admin = config.super_admin_ids.contains(&profile.id.into_inner());
    Ok(CurrentUser { oauth: Some(oauth), profile: profile.into(), repos, super_admin })
}

async fn refresh_access_token(
    config: &GitHubConfig,
    refresh_token: &str,
    prev_auth: &CurrentUser,
) -> Result<CurrentUser, anyhow::Error> {
    let Some(oauth_config) = &config.oauth else {
        tracing::warn!("No GitHub OAuth config found");
        bail!("No GitHub OAuth config found");
    };
    let oauth: OAuthResponse = oauth_client()?
        .post(
            "/login/oauth/access_token",
            Some(&RefreshAccessToken {
                client_id: &oauth_config.client_id,
                client_secret: &oauth_config.client_secret,
                grant_type: "refresh_token",
                refresh_token,
            }),
        )
        .await?;
    let oauth = StoredOAuth::from(oauth);
    let client = Octocrab::builder().oauth(oauth.clone().into()).build()?;
    let profile = client.current().user().await.context("Failed to fetch current user")?;
    tracing::info!("Refreshed token for @{}", profile.login);
    Ok(CurrentUser {
        oauth: Some(oauth),
        profile: profile.into(),
        repos: prev_auth.repos.clone(),
        super_admin: prev_auth.super_admin,
    })
}

impl<S> FromRequestParts<S> for CurrentUser
where
    GitHubConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        <CurrentUser as OptionalFromRequestParts<S>>::from_request_parts(parts, state)
            .await?
            .ok_or((StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    GitHubConfig: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let config = GitHubConfig::from_ref(state);
        let Some(user) = session.get::<CurrentUser>(CURRENT_USER).await.ok().flatten() else {
            return Ok(None);
        };
        let Some(oauth) = user.oauth.clone() else {
            return Ok(Some(user));
        };
        if let Some(expires_at) = oauth.expires_at
            && (UtcDateTime::now() + Duration::seconds(30)) > expires_at
        {
            // Access token expired, attempt to refresh
            if let Err(e) = session.remove_value(CURRENT_USER).await {
                tracing::error!("Failed to remove user from session: {}", e);
            };
            let Some(refresh_token) = &oauth.refresh_token else {
                return Ok(None);
            };
            if let Some(refresh_token_expires_at) = oauth.refresh_token_expires_at
                && UtcDateTime::now() >= refresh_token_expires_at
            {
                // Refresh token expired
                return Ok(None);
            }
            let current_user = match refresh_access_token(&config, refresh_token, &user).await {
                Ok(current_user) => current_user,
                Err(e) => {
                    tracing::error!("Failed to refresh access token: {:?}", e);
                    return Ok(None);
                }
            };
            if let Err(e) = session.insert(CURRENT_USER, current_user.clone()).await {
                tracing::error!("Failed to insert user into session: {}", e);
            }
            return Ok(Some(current_user));
        }
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(repo_ids: &[u64], super_admin: bool) -> CurrentUser {
        CurrentUser {
            oauth: None,
            profile: Profile { id: 1, login: "octocat".into() },
            repos: repo_ids
                .iter()
                .map(|&id| CurrentUserRepo { id, full_name: format!("octo/repo-{id}") })
                .collect(),
            super_admin,
        }
    }

    #[test]
    fn repo_visibility() {
        assert!(user(&[1, 2], false).can_view_repo(2));
        assert!(!user(&[1, 2], false).can_view_repo(3));
        assert!(user(&[], true).can_view_repo(3));
        assert!(CurrentUser::dev_user().can_view_repo(42));
    }

    #[test]
    fn nonces_are_unique_and_url_safe() {
        let a = generate_nonce().unwrap();
        let b = generate_nonce().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 22);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn stored_oauth_computes_expiry() {
        let stored = StoredOAuth::from(OAuthResponse {
            access_token: "gho_x".into(),
            token_type: "bearer".into(),
            expires_in: Some(3600),
            refresh_token: Some("ghr_y".into()),
            refresh_token_expires_in: None,
        });
        let expires_at = stored.expires_at.unwrap();
        assert!(expires_at > UtcDateTime::now() + Duration::minutes(59));
        assert!(stored.refresh_token_expires_at.is_none());
        let json = serde_json::to_string(&stored).unwrap();
        let back: StoredOAuth = serde_json::from_str(&json).unwrap();
        assert_eq!(back.refresh_token.as_deref(), Some("ghr_y"));
    }
}
