use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use ci_insight_auth::CurrentUser;
use ci_insight_core::{AppError, models::AnalysisRecord};
use ci_insight_pipeline::PipelineContext;
use maud::{DOCTYPE, Markup, html};
use time::{format_description::well_known::Rfc3339, macros::format_description};

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; max-width: 60rem; margin: 2rem auto; padding: 0 1rem; }
header { display: flex; justify-content: space-between; align-items: center; }
article { border: 1px solid #ccc; border-radius: 6px; padding: 0 1rem; margin: 1rem 0; }
details pre { max-height: 30rem; overflow: auto; background: #f6f8fa; padding: 0.5rem; }
.muted { color: #666; }
"#;

fn page(title: &str, current_user: Option<&CurrentUser>, content: Markup) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) " • CI Insight" }
                style { (STYLE) }
            }
            body {
                header {
                    h1 { a href="/" { "CI Insight" } }
                    @if let Some(user) = current_user {
                        form method="post" action="/logout" {
                            span.muted { "@" (user.profile.login) " " }
                            button type="submit" { "Log out" }
                        }
                    } @else {
                        a href="/login" { "Log in with GitHub" }
                    }
                }
                main { (content) }
            }
        }
    }
}

pub async fn index(current_user: Option<CurrentUser>) -> Markup {
    let content = match &current_user {
        None => html! {
            p { "Log in to see failure analyses for your repositories." }
        },
        Some(user) if user.repos.is_empty() => html! {
            p.muted {
                @if user.super_admin {
                    "Open /repos/{id} to view the analyses of any repository."
                } @else {
                    "No repositories."
                }
            }
        },
        Some(user) => html! {
            ul {
                @for repo in &user.repos {
                    li { a href={ "/repos/" (repo.id) } { (repo.full_name) } }
                }
            }
        },
    };
    page("Repositories", current_user.as_ref(), content)
}

pub async fn repo(
    Path(repo_id): Path<u64>,
    State(pipeline): State<Arc<PipelineContext>>,
    current_user: CurrentUser,
) -> Result<Markup, AppError> {
    if !current_user.can_view_repo(repo_id) {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    }
    let mut records = pipeline.store.query_by_repo(repo_id).await?;
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    let title = records
        .first()
        .map(|r| r.repo_full_name.clone())
        .or_else(|| {
            current_user.repos.iter().find(|r| r.id == repo_id).map(|r| r.full_name.clone())
        })
        .unwrap_or_else(|| format!("Repository {repo_id}"));
    let content = html! {
        h2 { (title) }
        @if records.is_empty() {
            p.muted { "No failed workflow runs analyzed yet." }
        }
        @for record in &records {
            (analysis(record))
        }
    };
    Ok(page(&title, Some(&current_user), content))
}

fn analysis(record: &AnalysisRecord) -> Markup {
    let created_at = record
        .created_at
        .format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))
        .unwrap_or_default();
    let datetime = record.created_at.format(&Rfc3339).unwrap_or_default();
    html! {
        article {
            p.muted {
                "Run " (record.github_run_id) " • " (record.status) " • "
                time datetime=(datetime) { (created_at) }
            }
            h3 { "Conclusion" }
            p { (record.conclusion) }
            h3 { "Suggestion" }
            p { (record.suggestion) }
            details {
                summary { "Log" }
                pre { (record.raw_log) }
            }
        }
    }
}
