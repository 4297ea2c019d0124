// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Simulates engine execution without spawning processes. Launched
//! handles stay "running" until the test injects an exit status or the
//! supervisor terminates them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use stardb_starter_protocol::ServerRole;
use tokio::sync::mpsc;

use super::traits::{ExitStatus, LaunchSpec, ProcessHandle, ProcessRunner, Result, RunnerError};

/// Mock runner for tests.
pub struct MockRunner {
    started: Arc<Mutex<Vec<LaunchSpec>>>,
    senders: Arc<Mutex<HashMap<ServerRole, mpsc::UnboundedSender<ExitStatus>>>>,
    terminated: Arc<Mutex<Vec<ServerRole>>>,
    next_pid: AtomicU32,
    containerized: bool,
    fail_to_start: bool,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Creates a mock runner whose instances stay running until told
    /// otherwise.
    pub fn new() -> Self {
        MockRunner {
            started: Arc::new(Mutex::new(Vec::new())),
            senders: Arc::new(Mutex::new(HashMap::new())),
            terminated: Arc::new(Mutex::new(Vec::new())),
            next_pid: AtomicU32::new(1000),
            containerized: false,
            fail_to_start: false,
        }
    }

    /// Creates a mock runner that reports container ids instead of pids.
    pub fn containerized() -> Self {
        MockRunner {
            containerized: true,
            ..Self::new()
        }
    }

    /// Creates a mock runner whose every start attempt fails.
    pub fn failing() -> Self {
        MockRunner {
            fail_to_start: true,
            ..Self::new()
        }
    }

    /// Every launch spec seen so far, in order.
    pub fn started(&self) -> Vec<LaunchSpec> {
        self.started.lock().unwrap().clone()
    }

    /// Number of launches seen for one role.
    pub fn launch_count(&self, role: ServerRole) -> usize {
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.role == role)
            .count()
    }

    /// Roles whose handles have been terminated by the supervisor.
    pub fn terminated_roles(&self) -> Vec<ServerRole> {
        self.terminated.lock().unwrap().clone()
    }

    /// Makes the most recently launched instance of `role` exit with the
    /// given status. Returns false when no such instance is waiting.
    pub fn exit(&self, role: ServerRole, status: ExitStatus) -> bool {
        let senders = self.senders.lock().unwrap();
        match senders.get(&role) {
            Some(tx) => tx.send(status).is_ok(),
            None => false,
        }
    }

    /// Waits until at least `n` launches happened (bounded to a few
    /// seconds, then panics).
    pub async fn wait_for_launches(&self, n: usize) {
        for _ in 0..500 {
            if self.started.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {n} launches, saw {}",
            self.started.lock().unwrap().len()
        );
    }
}

#[async_trait]
impl ProcessRunner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        if self.fail_to_start {
            return Err(RunnerError::StartFailed {
                role: spec.role,
                message: "mock start failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let role = spec.role;
        self.senders.lock().unwrap().insert(role, tx);
        self.started.lock().unwrap().push(spec);

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let (pid, container_id) = if self.containerized {
            (0, format!("mock-container-{pid}"))
        } else {
            (pid, String::new())
        };

        Ok(Box::new(MockHandle {
            role,
            pid,
            container_id,
            rx,
            stopped: false,
            terminated: self.terminated.clone(),
        }))
    }
}

#[derive(Debug)]
struct MockHandle {
    role: ServerRole,
    pid: u32,
    container_id: String,
    rx: mpsc::UnboundedReceiver<ExitStatus>,
    stopped: bool,
    terminated: Arc<Mutex<Vec<ServerRole>>>,
}

#[async_trait]
impl ProcessHandle for MockHandle {
    fn process_id(&self) -> u32 {
        self.pid
    }

    fn container_id(&self) -> &str {
        &self.container_id
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        if self.stopped {
            return Ok(ExitStatus {
                code: 0,
                clean: true,
            });
        }
        match self.rx.recv().await {
            Some(status) => Ok(status),
            None => Ok(ExitStatus {
                code: 0,
                clean: true,
            }),
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<()> {
        self.stopped = true;
        self.terminated.lock().unwrap().push(self.role);
        Ok(())
    }
}
