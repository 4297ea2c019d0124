// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for stardb-starter.

use thiserror::Error;

/// Starter errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Engine process execution failed.
    #[error("Runner error: {0}")]
    Runner(#[from] crate::runner::RunnerError),

    /// The HTTP control plane failed.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// A request to another starter failed.
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    /// A peer with this id is already registered.
    #[error("Peer '{0}' is already registered")]
    DuplicateId(String),

    /// The root context was cancelled before the operation finished.
    #[error("Cancelled")]
    Cancelled,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the starter [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
