// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Fleet model, live-side entities and the pure algorithms over them.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types, invariants and the remote capability contract

pub mod agent;
pub mod canary;
pub mod error;
pub mod fleet;
pub mod merge;
pub mod message;
pub mod remote;
pub mod report;
pub mod selector;
