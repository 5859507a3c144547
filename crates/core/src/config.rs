use std::{fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";
pub const CONFIG_PATH_ENV: &str = "CI_INSIGHT_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    /// Persistent analysis storage. Records are kept in memory when absent.
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    pub github: GitHubConfig,
    pub openai: OpenAiConfig,
}

impl Config {
    /// Load the configuration from `CI_INSIGHT_CONFIG`, falling back to `config.yml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::from_path(path)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = BufReader::new(
            File::open(path)
                .with_context(|| format!("Failed to open config file {}", path.display()))?,
        );
        serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default)]
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DbConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self { Self { timeout_secs: default_timeout_secs() } }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

fn default_timeout_secs() -> u64 { 60 }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
    /// Explicit token used for every repository. Only consulted when no app is configured.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub app: Option<GitHubAppConfig>,
    #[serde(default)]
    pub oauth: Option<GitHubOAuthConfig>,
    /// Webhook secret for deployments without a GitHub App.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub super_admin_ids: Vec<u64>,
}

impl GitHubConfig {
    pub fn webhook_secret(&self) -> Option<&str> {
        self.app
            .as_ref()
            .map(|app| app.webhook_secret.as_str())
            .or(self.webhook_secret.as_deref())
            .filter(|s| !s.is_empty())
    }
}

fn default_github_api_url() -> String { "https://api.github.com".to_string() }

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubAppConfig {
    pub id: u64,
    pub webhook_secret: String,
    pub private_key: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitHubOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_api_base")]
    pub api_base: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
}

fn default_openai_api_base() -> String { "https://api.openai.com/v1".to_string() }

fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
