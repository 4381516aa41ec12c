// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackPilotError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid spec: {0}")]
    Validation(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Template rendering failed: {0}")]
    Render(String),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Poller registration failed: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StackPilotError {
    /// Validation errors are never retried by re-submitting the same spec.
    pub fn is_validation(&self) -> bool {
        matches!(self, StackPilotError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, StackPilotError>;
