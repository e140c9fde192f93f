// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fan-out Dispatcher
//!
//! Runs one operation per entity with bounded width and collects a result
//! for every entity. A failure never stops its siblings.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Bounded concurrent execution with per-entity outcomes
//!
//! Width is enforced with a semaphore; each entity runs in its own task.
//! When the overall deadline elapses, entities that have not finished are
//! reported as timed out and their tasks are left to complete in the
//! background. After cancellation, entities that have not yet acquired a
//! permit are reported as cancelled.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::remote::RemoteError;
use crate::domain::report::{DispatchError, DispatchResult};

pub const DEFAULT_FANOUT_WIDTH: usize = 8;

#[derive(Debug, Clone)]
pub struct FanoutDispatcher {
    width: usize,
    deadline: Option<Duration>,
}

impl Default for FanoutDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_FANOUT_WIDTH)
    }
}

impl FanoutDispatcher {
    pub fn new(width: usize) -> Self {
        Self {
            width: width.max(1),
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Run `operation` once per `(name, entity)` pair.
    ///
    /// Names must be unique; the result map is keyed by them.
    pub async fn dispatch<E, T, F, Fut>(
        &self,
        entities: Vec<(String, E)>,
        operation: F,
        cancel: &CancellationToken,
    ) -> DispatchResult<T>
    where
        E: Send + 'static,
        T: Send + 'static,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RemoteError>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.width));
        let operation = Arc::new(operation);
        let deadline = self.deadline.map(|d| Instant::now() + d);

        let mut handles = Vec::with_capacity(entities.len());
        for (name, entity) in entities {
            let semaphore = semaphore.clone();
            let operation = operation.clone();
            let cancel = cancel.clone();
            let entity_name = name.clone();

            let handle = tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    debug!("Skipping {} after cancellation", entity_name);
                    return Err(DispatchError::Cancelled);
                };
                operation(entity).await.map_err(DispatchError::from)
            });
            handles.push((name, handle));
        }

        let mut results = BTreeMap::new();
        for (name, handle) in handles {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("{} did not finish before the deadline", name);
                        results.insert(name, Err(DispatchError::Timeout));
                        continue;
                    }
                },
                None => handle.await,
            };

            let result = joined.unwrap_or_else(|e| Err(DispatchError::Worker(e.to_string())));
            results.insert(name, result);
        }

        results
    }
}
