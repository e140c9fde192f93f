// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::canary::CanaryStateError;
use crate::domain::fleet::ValidationError;
use crate::domain::remote::RemoteError;

/// Invocation-scoped failures. Entity-scoped failures never become one of
/// these; they are recorded in the report instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FleetError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    CanaryState(#[from] CanaryStateError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl FleetError {
    /// CLI exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            FleetError::Validation(_) | FleetError::CanaryState(_) => 1,
            FleetError::Remote(_) => 3,
            FleetError::Cancelled => 2,
        }
    }
}
