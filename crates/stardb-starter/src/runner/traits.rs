// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface the supervisor uses to launch and
//! control one engine process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use stardb_starter_protocol::ServerRole;
use thiserror::Error;

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// The engine executable was not found.
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    /// The process or container failed to start.
    #[error("Failed to start {role}: {message}")]
    StartFailed {
        /// Role that was being launched.
        role: ServerRole,
        /// Underlying failure description.
        message: String,
    },

    /// A docker CLI invocation failed.
    #[error("Docker command failed: {0}")]
    Docker(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Exit status of an engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Raw exit code (-1 when the process died to a signal).
    pub code: i32,
    /// True when the process terminated of its own accord with code 0.
    pub clean: bool,
}

/// Everything a runner needs to launch one engine process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Role of the process.
    pub role: ServerRole,
    /// Engine executable. The container runner ignores this; the image
    /// entrypoint is the engine.
    pub program: PathBuf,
    /// Engine arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Working directory; also holds the engine log file.
    pub work_dir: PathBuf,
    /// Port the process will listen on.
    pub port: u16,
}

/// Trait for engine process runners.
///
/// Runners are pure execution engines; which roles run where, and when
/// to restart, is the supervisor's business.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runner type identifier (e.g. "native", "docker").
    fn runner_type(&self) -> &'static str;

    /// Launches a process. Returns only once the process id (or the
    /// container id) is known.
    async fn start(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>>;
}

/// Handle for one launched engine process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    /// PID of the launched process; 0 when running in a container.
    fn process_id(&self) -> u32;

    /// Container id; empty when running natively.
    fn container_id(&self) -> &str;

    /// Blocks until the process terminates.
    ///
    /// May be called again after [`terminate`](Self::terminate) and then
    /// reports the final status without blocking indefinitely.
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Requests a graceful stop; after `grace` has elapsed the process
    /// is killed.
    async fn terminate(&mut self, grace: Duration) -> Result<()>;
}
