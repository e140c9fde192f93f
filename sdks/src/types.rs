// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Types
//!
//! Request and response bodies of the hosting service API that have no
//! domain counterpart. Agents, shared resources and messages travel as the
//! domain types themselves.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Wire format of the HTTP remote client

use flotilla_core::domain::fleet::SharedResourceSpec;
use flotilla_core::domain::merge::FieldMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const API_PREFIX: &str = "v1";

/// Marks the end of a message event stream.
pub const STREAM_DONE: &str = "[DONE]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub fields: FieldMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameAgentRequest {
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertSharedResourceRequest {
    pub definition: SharedResourceSpec,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub stream: bool,
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default, alias = "error")]
    pub message: String,
}
