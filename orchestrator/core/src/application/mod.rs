// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! Use cases composed from the domain algorithms and the remote client.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Apply, canary, messaging, reporting and export workflows

pub mod canary;
pub mod coalescer;
pub mod dispatcher;
pub mod export;
pub mod index;
pub mod memory_report;
pub mod messaging;
pub mod reconciler;

pub use canary::{CanaryManager, PromotionReport};
pub use dispatcher::FanoutDispatcher;
pub use export::ExportService;
pub use memory_report::{MemoryAnalyzer, MemoryReportService, SelfAnalysisAnalyzer};
pub use messaging::MessagingService;
pub use reconciler::{ApplyMode, ApplyOptions, ReconcilerService, StandardReconciler};
