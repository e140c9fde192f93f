// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Declarative fleet reconciliation for hosted agents.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, reconciliation use cases and infrastructure adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

