//! GitHub REST contents API backend.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ContentsBackend, PutRequest, RemoteEntry, Result};
use crate::conflict::classify_write_rejection;
use crate::error::GatewayError;
use crate::location::DocumentLocation;
use crate::token::{Credential, VersionToken};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const JSON_MEDIA_TYPE: &str = "application/vnd.github.v3+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.v3.raw";

/// Contents response for a single file.
#[derive(Deserialize)]
struct ContentsEnvelope {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    branch: &'a str,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutResponseContent,
}

#[derive(Deserialize)]
struct PutResponseContent {
    sha: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Backend for `GET`/`PUT /repos/{owner}/{repo}/contents/{path}`.
#[derive(Clone)]
pub struct GitHubContents {
    client: Client,
    api_url: String,
}

impl GitHubContents {
    /// Create a backend for the given API base URL (e.g. `https://api.github.com`).
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("docpush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self::with_client(client, api_url))
    }

    pub fn with_client(client: Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn contents_url(&self, location: &DocumentLocation) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url,
            urlencoding::encode(location.owner()),
            urlencoding::encode(location.repo()),
            encode_path(location.path())
        )
    }

    fn get(&self, location: &DocumentLocation, git_ref: &str, accept: &str) -> RequestBuilder {
        self.client
            .get(self.contents_url(location))
            .query(&[("ref", git_ref)])
            .header(ACCEPT, accept)
    }
}

#[async_trait]
impl ContentsBackend for GitHubContents {
    async fn fetch_entry(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        credential: Option<&Credential>,
    ) -> Result<RemoteEntry> {
        tracing::debug!("GET contents {} at {}", location.path(), git_ref);

        let request = authorize(self.get(location, git_ref, JSON_MEDIA_TYPE), credential);
        let response = request.send().await?;
        let response = check_read_status(response, location, git_ref).await?;

        let body: serde_json::Value = response.json().await?;
        if body.is_array() {
            return Err(GatewayError::MalformedResponse(format!(
                "{} is a directory, not a file",
                location.path()
            )));
        }
        let envelope: ContentsEnvelope = serde_json::from_value(body)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let content = match (envelope.content, envelope.encoding.as_deref()) {
            (Some(content), Some("base64") | None) if !content.is_empty() => {
                Some(decode_base64_content(&content)?)
            }
            (Some(content), Some("base64") | None) => Some(content),
            // Large files come back with encoding "none" and no inline content.
            _ => None,
        };

        Ok(RemoteEntry {
            sha: VersionToken::new(envelope.sha),
            content,
        })
    }

    async fn fetch_raw(
        &self,
        location: &DocumentLocation,
        git_ref: &str,
        credential: &Credential,
    ) -> Result<String> {
        tracing::debug!("GET raw {} at {}", location.path(), git_ref);

        let request = authorize(self.get(location, git_ref, RAW_MEDIA_TYPE), Some(credential));
        let response = request.send().await?;
        let response = check_read_status(response, location, git_ref).await?;

        let bytes = response.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| {
            GatewayError::MalformedResponse(format!(
                "{} is not valid UTF-8 text",
                location.path()
            ))
        })
    }

    async fn put_entry(
        &self,
        location: &DocumentLocation,
        request: PutRequest<'_>,
        credential: &Credential,
    ) -> Result<VersionToken> {
        tracing::debug!(
            "PUT contents {} on {} (sha: {})",
            location.path(),
            location.branch(),
            request.sha.map(VersionToken::as_str).unwrap_or("none")
        );

        let body = PutBody {
            message: request.message,
            content: STANDARD.encode(request.content.as_bytes()),
            sha: request.sha.map(VersionToken::as_str),
            branch: location.branch(),
        };

        let response = self
            .client
            .put(self.contents_url(location))
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .header(AUTHORIZATION, format!("token {}", credential.expose()))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            if status == StatusCode::NOT_FOUND {
                return Err(GatewayError::NotFound {
                    location: location.to_string(),
                });
            }
            return Err(classify_write_rejection(Some(status.as_u16()), message));
        }

        let written: PutResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        Ok(VersionToken::new(written.content.sha))
    }
}

fn authorize(request: RequestBuilder, credential: Option<&Credential>) -> RequestBuilder {
    match credential {
        Some(credential) => request.header(AUTHORIZATION, format!("token {}", credential.expose())),
        None => request,
    }
}

/// Map non-2xx read responses onto gateway errors.
async fn check_read_status(
    response: Response,
    location: &DocumentLocation,
    git_ref: &str,
) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(response).await;
    Err(match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound {
            location: format!(
                "{}/{}:{}@{}",
                location.owner(),
                location.repo(),
                location.path(),
                git_ref
            ),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized(message),
        _ => GatewayError::Rejected {
            status: Some(status.as_u16()),
            message,
        },
    })
}

/// Server `message` field, else the raw body, else the status line.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ApiErrorBody>(&text) {
        Ok(body) => body.message,
        Err(_) if !text.trim().is_empty() => text.trim().to_string(),
        Err(_) => status.to_string(),
    }
}

/// Percent-encode each path segment, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode a base64 content envelope into text.
///
/// The API wraps base64 at 60 columns, so whitespace is dropped first. The
/// bytes are validated as UTF-8 as a whole so multi-byte characters split
/// across lines decode correctly.
fn decode_base64_content(content: &str) -> Result<String> {
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| GatewayError::MalformedResponse(format!("invalid base64 content: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|_| GatewayError::MalformedResponse("content is not valid UTF-8 text".to_string()))
}
