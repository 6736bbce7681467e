//! OKX REST Client
//!
//! Signed HTTP client for the OKX v5 API. Private endpoints are
//! authenticated with the HMAC-SHA256 scheme (timestamp + method + path +
//! body, base64-encoded) using credentials supplied through environment
//! variables. The sandbox flag routes orders to OKX's simulated-trading
//! environment via the `x-simulated-trading` header.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

use crate::ports::exchange::ExchangeError;

type HmacSha256 = Hmac<Sha256>;

/// Missing or unusable exchange credentials; fatal at startup
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Missing environment variable {0}")]
    MissingEnv(&'static str),
}

#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl OkxCredentials {
    /// Load credentials from `OKX_API_KEY` / `OKX_SECRET_KEY` /
    /// `OKX_PASSPHRASE`
    pub fn from_env() -> Result<Self, CredentialError> {
        let read = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or(CredentialError::MissingEnv(name))
        };
        Ok(Self {
            api_key: read("OKX_API_KEY")?,
            secret_key: read("OKX_SECRET_KEY")?,
            passphrase: read("OKX_PASSPHRASE")?,
        })
    }
}

impl std::fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("OkxCredentials").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub rest_url: String,
    pub timeout: Duration,
    /// Route requests to the simulated-trading environment
    pub sandbox: bool,
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://www.okx.com".to_string(),
            timeout: Duration::from_secs(10),
            sandbox: false,
        }
    }
}

/// Standard OKX v5 response envelope
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct OkxEnvelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Vec<T>,
}

#[derive(Clone)]
pub struct OkxClient {
    config: OkxConfig,
    credentials: OkxCredentials,
    http: Client,
}

impl OkxClient {
    pub fn new(config: OkxConfig, credentials: OkxCredentials) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExchangeError::Network(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            config,
            credentials,
            http,
        })
    }

    pub fn is_sandbox(&self) -> bool {
        self.config.sandbox
    }

    /// Unauthenticated GET; `path` includes the query string
    pub async fn get_public<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ExchangeError> {
        let url = format!("{}{}", self.config.rest_url, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::decode(response).await
    }

    /// Authenticated GET
    pub async fn get_private<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ExchangeError> {
        self.request_private(Method::GET, path, None).await
    }

    /// Authenticated POST with a JSON body
    pub async fn post_private<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<T>, ExchangeError> {
        self.request_private(Method::POST, path, Some(body.to_string()))
            .await
    }

    async fn request_private<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<Vec<T>, ExchangeError> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let body_str = body.as_deref().unwrap_or("");
        let signature = sign(
            &self.credentials.secret_key,
            &timestamp,
            method.as_str(),
            path,
            body_str,
        );

        let url = format!("{}{}", self.config.rest_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .header("OK-ACCESS-KEY", &self.credentials.api_key)
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", timestamp)
            .header("OK-ACCESS-PASSPHRASE", &self.credentials.passphrase)
            .header("Content-Type", "application/json");

        if self.config.sandbox {
            req = req.header("x-simulated-trading", "1");
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        let response = req.send().await.map_err(map_reqwest_error)?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Vec<T>, ExchangeError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ExchangeError::Network(format!("server error {}", status)));
        }

        let envelope: OkxEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ExchangeError::Malformed(e.to_string()))?;

        if envelope.code != "0" {
            return Err(ExchangeError::Api {
                code: envelope.code,
                message: envelope.msg,
            });
        }
        Ok(envelope.data)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout
    } else {
        ExchangeError::Network(e.to_string())
    }
}

/// OKX request signature: base64(HMAC-SHA256(secret, ts + method + path + body))
fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
    let payload = format!("{}{}{}{}", timestamp, method, path, body);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
