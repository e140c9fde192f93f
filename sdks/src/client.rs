// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP Remote Client
//!
//! [`RemoteClient`] implementation for the agent-hosting service's REST API.
//! Implements the trait as an Anti-Corruption Layer: HTTP statuses and
//! transport failures are translated into [`RemoteError`] variants here and
//! nowhere else.
//!
//! # API Endpoints
//!
//! - `GET /v1/agents?name=..&tag=k:v` - List agents
//! - `POST /v1/agents` - Create agent
//! - `GET|PATCH|DELETE /v1/agents/{id}` - Read, patch, delete agent
//! - `POST /v1/agents/{id}/rename` - Reassign name and tags
//! - `GET|PUT /v1/agents/{id}/snapshot` - Last-applied snapshot (raw bytes)
//! - `GET|POST|DELETE /v1/agents/{id}/messages` - Conversation history
//! - `POST /v1/agents/{id}/messages/compact` - Summarize history
//! - `GET /v1/shared` - List shared resources
//! - `PUT|DELETE /v1/shared/{kind}/{name}` - Upsert, delete shared resource
//!
//! # Retries
//!
//! Idempotent requests (`GET`, `PUT`, `PATCH`, `DELETE`) are retried with
//! exponential backoff on connection failures, timeouts, `429` and `5xx`.
//! Patches carry absolute values, so replaying one is harmless. `POST`
//! requests may already have taken effect when a timeout or `5xx` comes back,
//! so they are only retried on connect errors and `429`, where the server is
//! known not to have acted. Whatever is still failing afterwards surfaces as
//! [`RemoteError::Transient`] or [`RemoteError::Timeout`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use flotilla_core::domain::agent::{AgentDraft, AgentId, LiveAgent, LiveSharedResource};
use flotilla_core::domain::fleet::{ResourceKind, SharedResourceSpec};
use flotilla_core::domain::merge::Patch;
use flotilla_core::domain::message::{AgentMessage, CompactionSummary, MessageReply, MessageSink};
use flotilla_core::domain::remote::{RemoteClient, RemoteError};
use flotilla_core::domain::selector::Selector;
use flotilla_core::infrastructure::config::ClientConfig;

use crate::types::{
    ApiErrorBody, CreateAgentRequest, RenameAgentRequest, SendMessageRequest,
    UpsertSharedResourceRequest, API_PREFIX, STREAM_DONE,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

pub struct HttpRemoteClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid service URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Service URL cannot carry a path: {}", base_url);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut client = Self::new(&config.base_url)?
            .with_timeout(config.request_timeout())
            .with_retry(config.retry_attempts, config.retry_backoff());
        client.api_key = config.api_key.clone();
        Ok(client)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_backoff = backoff;
        self
    }

    /// Build `base/v1/<segments>` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(API_PREFIX).extend(segments);
        }
        url
    }

    fn agent_url(&self, id: &AgentId, rest: &[&str]) -> Url {
        let mut segments = vec!["agents", id.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send with retries, returning the first non-retryable response.
    async fn execute(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, RemoteError> {
        let mut attempt = 0;
        loop {
            let request = self.authorize(build()).build().map_err(transport_error)?;
            let idempotent = is_idempotent(request.method());
            let result = self.client.execute(request).await;
            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status(), idempotent),
                Err(e) => e.is_connect() || (idempotent && (e.is_timeout() || e.is_request())),
            };

            if !retryable || attempt >= self.retry_attempts {
                return result.map_err(transport_error);
            }

            attempt += 1;
            let delay = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
            match &result {
                Ok(response) => debug!(
                    "Retrying after HTTP {} ({}/{}) in {:?}",
                    response.status(),
                    attempt,
                    self.retry_attempts,
                    delay
                ),
                Err(e) => debug!(
                    "Retrying after transport error ({}/{}) in {:?}: {}",
                    attempt, self.retry_attempts, delay, e
                ),
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Send and require a success status.
    async fn call(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.execute(build).await?;
        check_status(response).await
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = self.call(build).await?;
        decode(response).await
    }

    async fn stream_reply(
        &self,
        response: Response,
        sink: &MessageSink,
    ) -> Result<MessageReply, RemoteError> {
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut messages = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport_error)?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if let Some(message) = parse_event_line(&String::from_utf8_lossy(&line))? {
                    sink(&message);
                    messages.push(message);
                }
            }
        }
        if let Some(message) = parse_event_line(&String::from_utf8_lossy(&buffer))? {
            sink(&message);
            messages.push(message);
        }

        Ok(MessageReply { messages })
    }
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn is_retryable_status(status: StatusCode, idempotent: bool) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || (idempotent && status.is_server_error())
}

fn transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(err.to_string())
    } else if err.is_decode() {
        RemoteError::Protocol(err.to_string())
    } else {
        RemoteError::Transient(err.to_string())
    }
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                body.to_string()
            }
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => RemoteError::Timeout(message),
        s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
            RemoteError::Transient(message)
        }
        _ => RemoteError::Rejected(message),
    }
}

async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let err = status_error(status, &body);
    warn!("Request failed with HTTP {}: {}", status, err);
    Err(err)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// One line of a `text/event-stream` body. Only `data:` lines carry
/// messages.
fn parse_event_line(line: &str) -> Result<Option<AgentMessage>, RemoteError> {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() || data == STREAM_DONE {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(data)?))
}

/// `None` for 404, the error otherwise.
fn not_found_as_none<T>(result: Result<T, RemoteError>) -> Result<Option<T>, RemoteError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(RemoteError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn get_agent_by_name(&self, name: &str) -> Result<Option<LiveAgent>, RemoteError> {
        let mut url = self.url(&["agents"]);
        url.query_pairs_mut().append_pair("name", name);
        let agents: Vec<LiveAgent> = self.call_json(|| self.client.get(url.clone())).await?;
        Ok(agents.into_iter().find(|a| a.name == name))
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<LiveAgent>, RemoteError> {
        let url = self.agent_url(id, &[]);
        not_found_as_none(self.call_json(|| self.client.get(url.clone())).await)
    }

    async fn list_agents(&self, selector: &Selector) -> Result<Vec<LiveAgent>, RemoteError> {
        let mut url = self.url(&["agents"]);
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in selector.tags() {
                query.append_pair("tag", &format!("{}:{}", key, value));
            }
        }
        let agents: Vec<LiveAgent> = self.call_json(|| self.client.get(url.clone())).await?;
        // Name globs are evaluated locally.
        Ok(agents.into_iter().filter(|a| selector.matches(a)).collect())
    }

    async fn create_agent(&self, draft: &AgentDraft) -> Result<LiveAgent, RemoteError> {
        let url = self.url(&["agents"]);
        let body = CreateAgentRequest {
            name: draft.name.clone(),
            fields: draft.fields.clone(),
        };
        self.call_json(|| self.client.post(url.clone()).json(&body)).await
    }

    async fn update_agent(&self, id: &AgentId, patch: &Patch) -> Result<LiveAgent, RemoteError> {
        let url = self.agent_url(id, &[]);
        self.call_json(|| self.client.patch(url.clone()).json(patch)).await
    }

    async fn delete_agent(&self, id: &AgentId) -> Result<(), RemoteError> {
        let url = self.agent_url(id, &[]);
        self.call(|| self.client.delete(url.clone())).await?;
        Ok(())
    }

    async fn rename_agent(
        &self,
        id: &AgentId,
        new_name: &str,
        new_tags: &BTreeMap<String, String>,
    ) -> Result<LiveAgent, RemoteError> {
        let url = self.agent_url(id, &["rename"]);
        let body = RenameAgentRequest {
            name: new_name.to_string(),
            tags: new_tags.clone(),
        };
        self.call_json(|| self.client.post(url.clone()).json(&body)).await
    }

    async fn list_shared_resources(&self) -> Result<Vec<LiveSharedResource>, RemoteError> {
        let url = self.url(&["shared"]);
        self.call_json(|| self.client.get(url.clone())).await
    }

    async fn create_or_update_shared_resource(
        &self,
        spec: &SharedResourceSpec,
        fingerprint: &str,
    ) -> Result<LiveSharedResource, RemoteError> {
        let url = self.url(&["shared", spec.kind().as_str(), spec.name()]);
        let body = UpsertSharedResourceRequest {
            definition: spec.clone(),
            fingerprint: fingerprint.to_string(),
        };
        self.call_json(|| self.client.put(url.clone()).json(&body)).await
    }

    async fn delete_shared_resource(&self, kind: ResourceKind, name: &str) -> Result<(), RemoteError> {
        let url = self.url(&["shared", kind.as_str(), name]);
        self.call(|| self.client.delete(url.clone())).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        id: &AgentId,
        content: &str,
        sink: Option<&MessageSink>,
    ) -> Result<MessageReply, RemoteError> {
        let url = self.agent_url(id, &["messages"]);
        let body = SendMessageRequest {
            content: content.to_string(),
            stream: sink.is_some(),
        };

        match sink {
            Some(sink) => {
                let response = self
                    .call(|| {
                        self.client
                            .post(url.clone())
                            .header(ACCEPT, "text/event-stream")
                            .json(&body)
                    })
                    .await?;
                self.stream_reply(response, sink).await
            }
            None => {
                self.call_json(|| self.client.post(url.clone()).json(&body))
                    .await
            }
        }
    }

    async fn list_messages(&self, id: &AgentId, limit: usize) -> Result<Vec<AgentMessage>, RemoteError> {
        let mut url = self.agent_url(id, &["messages"]);
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        self.call_json(|| self.client.get(url.clone())).await
    }

    async fn reset_messages(&self, id: &AgentId) -> Result<(), RemoteError> {
        let url = self.agent_url(id, &["messages"]);
        self.call(|| self.client.delete(url.clone())).await?;
        Ok(())
    }

    async fn compact_messages(&self, id: &AgentId) -> Result<CompactionSummary, RemoteError> {
        let url = self.agent_url(id, &["messages", "compact"]);
        self.call_json(|| self.client.post(url.clone())).await
    }

    async fn get_last_applied_snapshot(&self, id: &AgentId) -> Result<Option<Vec<u8>>, RemoteError> {
        let url = self.agent_url(id, &["snapshot"]);
        let Some(response) = not_found_as_none(self.call(|| self.client.get(url.clone())).await)?
        else {
            return Ok(None);
        };
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(Some(bytes.to_vec()))
    }

    async fn set_last_applied_snapshot(&self, id: &AgentId, blob: &[u8]) -> Result<(), RemoteError> {
        let url = self.agent_url(id, &["snapshot"]);
        self.call(|| {
            self.client
                .put(url.clone())
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(blob.to_vec())
        })
        .await?;
        Ok(())
    }
}
