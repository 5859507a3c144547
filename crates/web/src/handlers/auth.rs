use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::REFERER},
    response::{IntoResponse, Redirect, Response},
};
use ci_insight_auth::{CURRENT_USER, CurrentUser, GITHUB_OAUTH_STATE, RETURN_TO, generate_nonce};
use ci_insight_core::{AppError, config::Config};
use maud::{DOCTYPE, html};
use tower_sessions::Session;

#[derive(serde::Deserialize)]
pub struct LoginQuery {
    pub return_to: Option<String>,
}

pub async fn login(
    session: Session,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
    State(config): State<Arc<Config>>,
    current_user: Option<CurrentUser>,
) -> Result<Response, AppError> {
    if current_user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let Some(oauth_config) = &config.github.oauth else {
        // Dev mode override
        if config.server.dev_mode {
            session.insert(CURRENT_USER, CurrentUser::dev_user()).await?;
            return Ok(Redirect::to("/").into_response());
        }
        tracing::warn!("No GitHub OAuth config found");
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, "No GitHub OAuth config").into_response());
    };
    let oauth_state = generate_nonce()?;
    session.insert(GITHUB_OAUTH_STATE, oauth_state.clone()).await?;
    if let Some(return_to) = calc_return_to(&headers, query) {
        session.insert(RETURN_TO, return_to).await?;
    }
    let mut redirect_url = url::Url::parse("https://github.com/login/oauth/authorize")?;
    {
        let mut query = redirect_url.query_pairs_mut();
        query.append_pair("client_id", &oauth_config.client_id);
        query.append_pair("redirect_uri", &oauth_config.redirect_uri);
        query.append_pair("state", &oauth_state);
    }
    let rendered = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { "Logging in... • CI Insight" }
                meta http-equiv="refresh" content=(format!("0;URL={redirect_url}"));
            }
            body {
                p { "Logging in..." }
            }
        }
    };
    Ok(rendered.into_response())
}

pub async fn logout(
    session: Session,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Result<Response, AppError> {
    session.flush().await?;
    if let Some(return_to) = calc_return_to(&headers, query) {
        return Ok(Redirect::to(&return_to).into_response());
    }
    Ok(Redirect::to("/").into_response())
}

fn calc_return_to(headers: &HeaderMap, LoginQuery { return_to }: LoginQuery) -> Option<String> {
    let mut return_to = return_to.or_else(|| {
        if headers.get("sec-fetch-site").and_then(|h| h.to_str().ok()) == Some("same-origin") {
            headers
                .get(REFERER)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| url::Url::parse(s).ok())
                .map(|u| match u.query() {
                    Some(query) => format!("{}?{}", u.path(), query),
                    None => u.path().to_string(),
                })
        } else {
            None
        }
    });
    // Only local paths, never another origin.
    return_to.take_if(|s| s.starts_with('/') && !s.starts_with("//"))
}
