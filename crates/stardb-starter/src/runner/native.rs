// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native (direct exec) runner.
//!
//! Launches the engine as a child process of the starter. Stdout and
//! stderr are appended to the role's `engine.log` rather than piped:
//! a dropped pipe would deliver SIGPIPE to a chatty engine, and the log
//! must survive the starter anyway.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::traits::{ExitStatus, LaunchSpec, ProcessHandle, ProcessRunner, Result, RunnerError};
use crate::engine::ENGINE_LOG_FILE;

/// Runs engines as native child processes.
pub struct NativeRunner {
    debugger: Option<String>,
}

impl NativeRunner {
    /// Creates a native runner. A non-empty `debugger` path is prepended
    /// to every engine command line (e.g. rr).
    pub fn new(debugger: &str) -> Self {
        NativeRunner {
            debugger: if debugger.is_empty() {
                None
            } else {
                Some(debugger.to_string())
            },
        }
    }
}

#[async_trait]
impl ProcessRunner for NativeRunner {
    fn runner_type(&self) -> &'static str {
        "native"
    }

    async fn start(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        tokio::fs::create_dir_all(&spec.work_dir).await?;

        let log_path = spec.work_dir.join(ENGINE_LOG_FILE);
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let mut cmd = match &self.debugger {
            Some(debugger) => {
                let mut cmd = Command::new(debugger);
                cmd.arg(&spec.program);
                cmd
            }
            None => Command::new(&spec.program),
        };
        cmd.args(&spec.args)
            .envs(&spec.env)
            .current_dir(&spec.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file));

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::ExecutableNotFound(spec.program.display().to_string())
            } else {
                RunnerError::StartFailed {
                    role: spec.role,
                    message: e.to_string(),
                }
            }
        })?;

        let pid = child.id().unwrap_or(0);
        info!(role = %spec.role, pid, port = spec.port, "Launched engine process");

        Ok(Box::new(NativeHandle { child, pid }))
    }
}

/// Handle for a natively launched engine process.
#[derive(Debug)]
struct NativeHandle {
    child: Child,
    pid: u32,
}

#[async_trait]
impl ProcessHandle for NativeHandle {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn container_id(&self) -> &str {
        ""
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await?;
        Ok(ExitStatus {
            code: status.code().unwrap_or(-1),
            clean: status.success(),
        })
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        debug!(pid = self.pid, "Sending SIGTERM");
        if let Err(e) = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM) {
            // Already gone is fine.
            debug!(pid = self.pid, error = %e, "SIGTERM not delivered");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                warn!(pid = self.pid, grace_secs = grace.as_secs(), "Grace expired, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stardb_starter_protocol::ServerRole;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn shell_spec(dir: &TempDir, script: &str) -> LaunchSpec {
        LaunchSpec {
            role: ServerRole::Agent,
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
            work_dir: dir.path().join("agent4001"),
            port: 4001,
        }
    }

    #[tokio::test]
    async fn clean_exit_is_reported() {
        let dir = TempDir::new().unwrap();
        let runner = NativeRunner::new("");
        let mut handle = runner.start(shell_spec(&dir, "exit 0")).await.unwrap();
        assert!(handle.process_id() > 0);
        assert_eq!(handle.container_id(), "");

        let status = handle.wait().await.unwrap();
        assert!(status.clean);
        assert_eq!(status.code, 0);
    }

    #[tokio::test]
    async fn abnormal_exit_carries_the_code() {
        let dir = TempDir::new().unwrap();
        let runner = NativeRunner::new("");
        let mut handle = runner.start(shell_spec(&dir, "exit 7")).await.unwrap();
        let status = handle.wait().await.unwrap();
        assert!(!status.clean);
        assert_eq!(status.code, 7);
    }

    #[tokio::test]
    async fn output_goes_to_the_engine_log() {
        let dir = TempDir::new().unwrap();
        let runner = NativeRunner::new("");
        let mut handle = runner
            .start(shell_spec(&dir, "echo one; echo two >&2"))
            .await
            .unwrap();
        handle.wait().await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("agent4001").join(ENGINE_LOG_FILE))
            .unwrap();
        assert!(log.contains("one"));
        assert!(log.contains("two"));
    }

    #[tokio::test]
    async fn terminate_stops_a_sleeping_process() {
        let dir = TempDir::new().unwrap();
        let runner = NativeRunner::new("");
        let mut handle = runner.start(shell_spec(&dir, "sleep 60")).await.unwrap();

        handle.terminate(Duration::from_secs(5)).await.unwrap();
        let status = handle.wait().await.unwrap();
        assert!(!status.clean);
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let dir = TempDir::new().unwrap();
        let runner = NativeRunner::new("");
        let mut spec = shell_spec(&dir, "exit 0");
        spec.program = PathBuf::from("/nonexistent/stardbd");
        let err = runner.start(spec).await.unwrap_err();
        assert!(matches!(err, RunnerError::ExecutableNotFound(_)));
    }
}
