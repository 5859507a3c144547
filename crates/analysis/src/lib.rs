pub mod risk;

use std::time::Duration;

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
pub use ci_insight_core::models::MAX_LOG_CHARS;
use ci_insight_core::{
    config::{HttpConfig, OpenAiConfig},
    models::AnalysisResult,
};


#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("completion request failed: {0}")]
    Request(#[from] OpenAIError),
    #[error("completion contained no text")]
    Empty,
    #[error("malformed analysis: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Turns a failed job's log into a root cause and a suggested fix.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, log: &str) -> Result<AnalysisResult, AnalysisError>;
}

/// First `MAX_LOG_CHARS` characters of `log`.
pub fn truncate_log(log: &str) -> &str {
    match log.char_indices().nth(MAX_LOG_CHARS) {
        Some((end, _)) => &log[..end],
        None => log,
    }
}

pub fn build_prompt(log: &str) -> String {
    format!(
        r#"You are an expert CI/CD engineer. A GitHub Actions job failed.
Read the job log below, identify the root cause of the failure and propose a concrete fix.

Respond with a single JSON object and nothing else, in exactly this format:
{{"conclusion": "<root cause in one or two sentences>", "suggestion": "<suggested fix>"}}

Log:
{}
"#,
        truncate_log(log)
    )
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches("json"),
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Decode the model output strictly as `{"conclusion": ..., "suggestion": ...}`.
pub fn parse_analysis(text: &str) -> Result<AnalysisResult, AnalysisError> {
    Ok(serde_json::from_str(strip_code_fence(text))?)
}

/// Chat completion backed analyzer for OpenAI-compatible APIs.
pub struct OpenAiAnalyzer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAnalyzer {
    pub fn new(config: &OpenAiConfig, http: &HttpConfig) -> Result<Self> {
        let openai =
            OpenAIConfig::new().with_api_key(&config.api_key).with_api_base(&config.api_base);
        let http_client = reqwest::Client::builder()
            .timeout(http.timeout())
            .build()
            .context("Failed to create OpenAI HTTP client")?;
        let client =
            Client::with_config(openai).with_http_client(http_client).with_backoff(no_retry());
        Ok(Self { client, model: config.model.clone() })
    }
}

// Failed analyses are dropped, never retried.
fn no_retry() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new().with_max_elapsed_time(Some(Duration::ZERO)).build()
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, log: &str) -> Result<AnalysisResult, AnalysisError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(build_prompt(log))
                .build()?
                .into()])
            .build()?;
        let response = self.client.chat().create(request).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AnalysisError::Empty)?;
        tracing::debug!("Completion from {}: {} chars", response.model, text.len());
        parse_analysis(&text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string_contains, header, method, path},
    };

    use super::*;

    #[test]
    fn parses_plain_and_fenced_json() {
        let expected = AnalysisResult { conclusion: "X".into(), suggestion: "Y".into() };
        for text in [
            r#"{"conclusion":"X","suggestion":"Y"}"#,
            "```json\n{\"conclusion\":\"X\",\"suggestion\":\"Y\"}\n```",
            "```\n{\"conclusion\":\"X\",\"suggestion\":\"Y\"}\n```",
            "  ```json{\"conclusion\":\"X\",\"suggestion\":\"Y\"}```  ",
            "{\"conclusion\":\"X\",\"suggestion\":\"Y\",\"confidence\":0.9}",
        ] {
            assert_eq!(parse_analysis(text).unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn rejects_malformed_output() {
        for text in [
            "The build failed because of a missing dependency.",
            r#"{"conclusion":"X"}"#,
            r#"{"conclusion":"X","suggestion":3}"#,
            "```json\n{\"conclusion\":\"X\",\n```",
            "",
        ] {
            assert!(matches!(parse_analysis(text), Err(AnalysisError::Parse(_))), "{text}");
        }
    }

    #[test]
    fn truncates_to_character_limit() {
        let log = "a".repeat(50_000);
        assert_eq!(truncate_log(&log).len(), MAX_LOG_CHARS);
        let short = "short log";
        assert_eq!(truncate_log(short), short);
        // Multi-byte characters count once.
        let wide = "é".repeat(MAX_LOG_CHARS + 5);
        let truncated = truncate_log(&wide);
        assert_eq!(truncated.chars().count(), MAX_LOG_CHARS);
        assert_eq!(truncated.len(), MAX_LOG_CHARS * 2);
    }

    #[test]
    fn prompt_embeds_truncated_log() {
        let log = format!("{}{}", "x".repeat(MAX_LOG_CHARS), "TAIL");
        let prompt = build_prompt(&log);
        assert!(prompt.contains(&"x".repeat(MAX_LOG_CHARS)));
        assert!(!prompt.contains("TAIL"));
        assert!(prompt.contains(r#""conclusion""#));
    }

    fn analyzer(server: &MockServer) -> OpenAiAnalyzer {
        let config = OpenAiConfig {
            api_key: "sk-test".into(),
            api_base: server.uri(),
            model: "gpt-4o-mini".into(),
        };
        OpenAiAnalyzer::new(&config, &HttpConfig::default()).unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop",
            }],
        })
    }

    #[tokio::test]
    async fn requests_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_string_contains("cargo test failed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                "```json\n{\"conclusion\":\"A test failed\",\"suggestion\":\"Fix the test\"}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let result = analyzer(&server).analyze("error: cargo test failed").await.unwrap();
        assert_eq!(result, AnalysisResult {
            conclusion: "A test failed".into(),
            suggestion: "Fix the test".into(),
        });
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("   ")))
            .mount(&server)
            .await;
        assert!(matches!(analyzer(&server).analyze("log").await, Err(AnalysisError::Empty)));
    }

    #[tokio::test]
    async fn api_error_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "boom", "type": "server_error", "param": null, "code": null }
            })))
            .expect(1)
            .mount(&server)
            .await;
        assert!(matches!(analyzer(&server).analyze("log").await, Err(AnalysisError::Request(_))));
    }
}
