// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-role process lifecycle.
//!
//! One [`RoleSupervisor`] task runs per enabled engine role. It keeps
//! exactly one live process for its role: launch, wait, restart with
//! bounded backoff on abnormal exit, drain on cancellation. What the
//! supervisor knows about its process (pid, container id) is published
//! to a shared table for the `/process` endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use stardb_starter_protocol::ServerRole;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{EngineRequest, EngineStrategy};
use crate::runner::ProcessRunner;

/// Exponential backoff between restart attempts.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for the delay.
    pub max: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// The delay following `prev` (or the initial delay).
    pub fn next(&self, prev: Option<Duration>) -> Duration {
        match prev {
            None => self.first,
            Some(d) => {
                let next = (d.as_secs_f64() * self.factor).min(self.max.as_secs_f64());
                Duration::from_secs_f64(next)
            }
        }
    }
}

/// What the supervisor currently knows about one running engine process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    /// PID; 0 when containerized.
    pub pid: u32,
    /// Container id; empty when native.
    pub container_id: String,
}

/// Shared table of live engine processes, keyed by role.
pub type ProcessTable = Arc<Mutex<HashMap<ServerRole, ProcessInfo>>>;

/// Tuning knobs for the per-role lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Restart backoff.
    pub backoff: Backoff,
    /// A run at least this long resets the backoff.
    pub healthy_reset: Duration,
    /// Grace given to a process on shutdown before it is killed.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        SupervisorOptions {
            backoff: Backoff::default(),
            healthy_reset: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Maintains one live engine process for a single role.
pub struct RoleSupervisor {
    request: EngineRequest,
    runner: Arc<dyn ProcessRunner>,
    strategy: Arc<dyn EngineStrategy>,
    processes: ProcessTable,
    opts: SupervisorOptions,
}

impl RoleSupervisor {
    /// Creates the supervisor for one role.
    pub fn new(
        request: EngineRequest,
        runner: Arc<dyn ProcessRunner>,
        strategy: Arc<dyn EngineStrategy>,
        processes: ProcessTable,
        opts: SupervisorOptions,
    ) -> Self {
        RoleSupervisor {
            request,
            runner,
            strategy,
            processes,
            opts,
        }
    }

    /// Runs the lifecycle loop until the process exits cleanly or the
    /// token is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let role = self.request.role;
        let mut prev_delay: Option<Duration> = None;

        loop {
            if token.is_cancelled() {
                break;
            }

            let spec = self.strategy.launch_spec(&self.request);
            let mut handle = match self.runner.start(spec).await {
                Ok(handle) => handle,
                Err(e) => {
                    error!(role = %role, error = %e, "Failed to start engine, retrying");
                    if !self.sleep_backoff(&mut prev_delay, &token).await {
                        break;
                    }
                    continue;
                }
            };

            self.processes.lock().unwrap().insert(
                role,
                ProcessInfo {
                    pid: handle.process_id(),
                    container_id: handle.container_id().to_string(),
                },
            );
            let started = Instant::now();

            tokio::select! {
                res = handle.wait() => {
                    self.processes.lock().unwrap().remove(&role);
                    match res {
                        Ok(status) if status.clean => {
                            info!(role = %role, "Engine exited cleanly");
                            break;
                        }
                        Ok(status) => {
                            warn!(
                                role = %role,
                                code = status.code,
                                uptime_secs = started.elapsed().as_secs(),
                                "Engine exited unexpectedly, restarting"
                            );
                        }
                        Err(e) => {
                            error!(role = %role, error = %e, "Lost track of engine, restarting");
                        }
                    }
                    if started.elapsed() >= self.opts.healthy_reset {
                        prev_delay = None;
                    }
                    if !self.sleep_backoff(&mut prev_delay, &token).await {
                        break;
                    }
                }
                _ = token.cancelled() => {
                    info!(role = %role, "Draining engine process");
                    if let Err(e) = handle.terminate(self.opts.shutdown_grace).await {
                        warn!(role = %role, error = %e, "Failed to terminate engine");
                    }
                    let _ = handle.wait().await;
                    self.processes.lock().unwrap().remove(&role);
                    break;
                }
            }
        }
    }

    /// Sleeps the next backoff delay; false when cancelled meanwhile.
    async fn sleep_backoff(
        &self,
        prev_delay: &mut Option<Duration>,
        token: &CancellationToken,
    ) -> bool {
        let delay = self.opts.backoff.next(*prev_delay);
        *prev_delay = Some(delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = token.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StardbStrategy;
    use crate::runner::{ExitStatus, MockRunner};
    use std::path::PathBuf;

    fn test_opts() -> SupervisorOptions {
        SupervisorOptions {
            backoff: Backoff {
                first: Duration::from_millis(10),
                max: Duration::from_millis(50),
                factor: 2.0,
            },
            healthy_reset: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    fn request(role: ServerRole) -> EngineRequest {
        EngineRequest {
            role,
            address: "127.0.0.1".to_string(),
            port: 4000 + role.port_offset(),
            work_dir: PathBuf::from("/tmp/sup-test"),
            agency_endpoints: vec![],
        }
    }

    fn supervisor(
        role: ServerRole,
        runner: Arc<MockRunner>,
        processes: ProcessTable,
    ) -> RoleSupervisor {
        let strategy = Arc::new(StardbStrategy::new(PathBuf::from("/usr/sbin/stardbd"), 0));
        RoleSupervisor::new(request(role), runner, strategy, processes, test_opts())
    }

    #[tokio::test]
    async fn abnormal_exit_triggers_restart() {
        let runner = Arc::new(MockRunner::new());
        let processes: ProcessTable = Arc::default();
        let token = CancellationToken::new();

        let sup = supervisor(ServerRole::Agent, runner.clone(), processes.clone());
        let task = tokio::spawn(sup.run(token.clone()));

        runner.wait_for_launches(1).await;
        runner.exit(
            ServerRole::Agent,
            ExitStatus {
                code: 1,
                clean: false,
            },
        );
        runner.wait_for_launches(2).await;

        token.cancel();
        task.await.unwrap();
        assert!(runner.launch_count(ServerRole::Agent) >= 2);
    }

    #[tokio::test]
    async fn clean_exit_stops_the_loop() {
        let runner = Arc::new(MockRunner::new());
        let processes: ProcessTable = Arc::default();
        let token = CancellationToken::new();

        let sup = supervisor(ServerRole::Coordinator, runner.clone(), processes.clone());
        let task = tokio::spawn(sup.run(token.clone()));

        runner.wait_for_launches(1).await;
        runner.exit(
            ServerRole::Coordinator,
            ExitStatus {
                code: 0,
                clean: true,
            },
        );
        task.await.unwrap();

        assert_eq!(runner.launch_count(ServerRole::Coordinator), 1);
        assert!(processes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancellation_terminates_the_process() {
        let runner = Arc::new(MockRunner::new());
        let processes: ProcessTable = Arc::default();
        let token = CancellationToken::new();

        let sup = supervisor(ServerRole::DbServer, runner.clone(), processes.clone());
        let task = tokio::spawn(sup.run(token.clone()));

        runner.wait_for_launches(1).await;
        assert_eq!(
            processes
                .lock()
                .unwrap()
                .get(&ServerRole::DbServer)
                .map(|i| i.pid > 0),
            Some(true)
        );

        token.cancel();
        task.await.unwrap();

        assert_eq!(runner.terminated_roles(), vec![ServerRole::DbServer]);
        assert!(processes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_failures_keep_retrying_until_cancelled() {
        let runner = Arc::new(MockRunner::failing());
        let processes: ProcessTable = Arc::default();
        let token = CancellationToken::new();

        let sup = supervisor(ServerRole::Agent, runner.clone(), processes.clone());
        let task = tokio::spawn(sup.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!task.is_finished());

        token.cancel();
        task.await.unwrap();
        assert!(processes.lock().unwrap().is_empty());
    }

    #[test]
    fn backoff_grows_to_the_cap() {
        let backoff = Backoff {
            first: Duration::from_millis(100),
            max: Duration::from_millis(350),
            factor: 2.0,
        };
        let d1 = backoff.next(None);
        let d2 = backoff.next(Some(d1));
        let d3 = backoff.next(Some(d2));
        let d4 = backoff.next(Some(d3));
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(350));
        assert_eq!(d4, Duration::from_millis(350));
    }
}
