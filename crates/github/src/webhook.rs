use std::{fmt::Display, sync::Arc};

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_insight_core::config::Config;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;

pub const EVENT_HEADER: &str = "X-GitHub-Event";
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("X-Hub-Signature-256 missing")]
    Missing,
    #[error("X-Hub-Signature-256 sha256= prefix missing")]
    Prefix,
    #[error("X-Hub-Signature-256 malformed")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

/// Check a `sha256=<hex>` signature header against the HMAC-SHA256 of `body`.
pub fn verify_signature(
    secret: &[u8],
    header: Option<&str>,
    body: &[u8],
) -> Result<(), SignatureError> {
    let signature_sha256 = header
        .ok_or(SignatureError::Missing)?
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Prefix)?;
    let signature = hex::decode(signature_sha256).map_err(|_| SignatureError::Malformed)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&signature).map_err(|_| SignatureError::Mismatch)
}

/// Compute the `X-Hub-Signature-256` header value for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify and extract a GitHub webhook delivery.
///
/// The body is only handed out after its signature has been checked against the configured
/// webhook secret. Without a secret, deliveries are rejected unless `server.dev_mode` is set.
#[derive(Clone)]
#[must_use]
pub struct GitHubEvent {
    pub kind: String,
    pub delivery: Option<String>,
    pub body: Bytes,
}

impl GitHubEvent {
    pub fn payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

impl<S> FromRequest<S> for GitHubEvent
where
    Arc<Config>: FromRef<S>,
    S: Send + Sync + Clone,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::error!("{m}");
            (StatusCode::BAD_REQUEST, m.to_string()).into_response()
        }
        let kind = req
            .headers()
            .get(EVENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| err("X-GitHub-Event header missing"))?
            .to_string();
        let delivery =
            req.headers().get(DELIVERY_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
        let signature =
            req.headers().get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
        let config = <Arc<Config>>::from_ref(state);
        let body = Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
        match config.github.webhook_secret() {
            Some(secret) => {
                verify_signature(secret.as_bytes(), signature.as_deref(), &body).map_err(err)?
            }
            None if config.server.dev_mode => {
                tracing::debug!("Accepting unverified delivery in dev mode");
            }
            None => return Err(err("No webhook secret configured, rejecting delivery")),
        }
        Ok(GitHubEvent { kind, delivery, body })
    }
}
