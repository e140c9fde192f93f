// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! flotilla SDK
//!
//! HTTP client for the agent-hosting service, implementing the engine's
//! remote client interface.

pub mod client;
pub mod types;

pub use client::HttpRemoteClient;
