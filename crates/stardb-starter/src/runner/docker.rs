// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker container runner.
//!
//! Launches engine instances via the docker CLI. The role's work
//! directory is bind-mounted at the same path inside the container, so
//! the engine log lands where the control plane expects it. Stopped
//! engine containers are not removed immediately; [`DockerGc`] sweeps
//! them after a configured delay so their logs stay inspectable.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::traits::{ExitStatus, LaunchSpec, ProcessHandle, ProcessRunner, Result, RunnerError};
use crate::config::Config;

/// Label attached to every engine container this starter launches; the
/// garbage collector only ever touches containers carrying it.
pub const CONTAINER_LABEL: &str = "com.stardb.starter";

/// Options for the docker runner, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct DockerOptions {
    /// Endpoint used to reach the docker daemon; empty means the CLI
    /// default.
    pub endpoint: String,
    /// Image to launch engine instances from.
    pub image: String,
    /// User the containers run as; empty keeps the image default.
    pub user: String,
    /// Run containers with --net=host.
    pub net_host: bool,
    /// Run containers with --privileged.
    pub privileged: bool,
}

impl DockerOptions {
    /// Extracts the docker options from the starter configuration.
    pub fn from_config(cfg: &Config) -> Self {
        DockerOptions {
            endpoint: cfg.docker_endpoint.clone(),
            image: cfg.docker_image.clone(),
            user: cfg.docker_user.clone(),
            net_host: cfg.docker_net_host,
            privileged: cfg.docker_privileged,
        }
    }

    /// Global docker CLI arguments (daemon endpoint).
    fn host_args(&self) -> Vec<String> {
        if self.endpoint.is_empty() {
            Vec::new()
        } else {
            vec!["-H".to_string(), self.endpoint.clone()]
        }
    }
}

/// Container name for one engine role.
fn container_name(spec: &LaunchSpec) -> String {
    format!("stardb-{}-{}", spec.role, spec.port)
}

/// Arguments of the `docker run` invocation for one engine instance.
fn run_args(opts: &DockerOptions, spec: &LaunchSpec, name: &str) -> Vec<String> {
    let work_dir = spec.work_dir.display().to_string();
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--label".to_string(),
        format!("{CONTAINER_LABEL}=true"),
        "-v".to_string(),
        format!("{work_dir}:{work_dir}"),
    ];
    if opts.net_host {
        args.push("--net=host".to_string());
    } else {
        args.push("-p".to_string());
        args.push(format!("{port}:{port}", port = spec.port));
    }
    if !opts.user.is_empty() {
        args.push("--user".to_string());
        args.push(opts.user.clone());
    }
    if opts.privileged {
        args.push("--privileged".to_string());
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(opts.image.clone());
    args.extend(spec.args.iter().cloned());
    args
}

async fn docker(host_args: &[String], args: &[String]) -> Result<String> {
    let output = Command::new("docker")
        .args(host_args)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(RunnerError::Docker(format!(
            "docker {} failed: {stderr}",
            args.first().map(String::as_str).unwrap_or("")
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Runs engines as docker containers.
pub struct DockerRunner {
    opts: DockerOptions,
}

impl DockerRunner {
    /// Creates a docker runner with the given options.
    pub fn new(opts: DockerOptions) -> Self {
        DockerRunner { opts }
    }
}

#[async_trait]
impl ProcessRunner for DockerRunner {
    fn runner_type(&self) -> &'static str {
        "docker"
    }

    async fn start(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        tokio::fs::create_dir_all(&spec.work_dir).await?;

        let name = container_name(&spec);
        let host_args = self.opts.host_args();

        // A container by this name may linger from a previous run.
        let _ = docker(
            &host_args,
            &["rm".to_string(), "-f".to_string(), name.clone()],
        )
        .await;

        let args = run_args(&self.opts, &spec, &name);
        let container_id = docker(&host_args, &args).await.map_err(|e| {
            error!(role = %spec.role, error = %e, "Container failed to start");
            RunnerError::StartFailed {
                role: spec.role,
                message: e.to_string(),
            }
        })?;

        info!(
            role = %spec.role,
            container_id = %container_id,
            port = spec.port,
            "Launched engine container"
        );

        Ok(Box::new(DockerHandle {
            container_id,
            host_args,
        }))
    }
}

/// Handle for an engine container.
#[derive(Debug)]
struct DockerHandle {
    container_id: String,
    host_args: Vec<String>,
}

#[async_trait]
impl ProcessHandle for DockerHandle {
    fn process_id(&self) -> u32 {
        0
    }

    fn container_id(&self) -> &str {
        &self.container_id
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let out = docker(
            &self.host_args,
            &["wait".to_string(), self.container_id.clone()],
        )
        .await?;
        let code: i32 = out.parse().unwrap_or(-1);
        Ok(ExitStatus {
            code,
            clean: code == 0,
        })
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        debug!(container_id = %self.container_id, "Stopping container");
        docker(
            &self.host_args,
            &[
                "stop".to_string(),
                "-t".to_string(),
                grace.as_secs().max(1).to_string(),
                self.container_id.clone(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Background worker that removes stopped engine containers after a
/// configured delay.
pub struct DockerGc {
    opts: DockerOptions,
    delay: Duration,
    poll_interval: Duration,
}

impl DockerGc {
    /// Creates a garbage collector sweeping containers that have been
    /// stopped for at least `delay`.
    pub fn new(opts: DockerOptions, delay: Duration) -> Self {
        DockerGc {
            opts,
            delay,
            poll_interval: Duration::from_secs(60),
        }
    }

    /// Runs the sweep loop until the token is cancelled.
    pub async fn run(self, token: CancellationToken) {
        info!(delay_secs = self.delay.as_secs(), "Container GC started");
        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    break;
                }

                _ = tokio::time::sleep(self.poll_interval) => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Container GC sweep failed");
                    }
                }
            }
        }
        info!("Container GC stopped");
    }

    /// One sweep: remove every labelled, exited container older than the
    /// delay.
    async fn sweep(&self) -> Result<()> {
        let host_args = self.opts.host_args();
        let ids = docker(
            &host_args,
            &[
                "ps".to_string(),
                "-a".to_string(),
                "--filter".to_string(),
                format!("label={CONTAINER_LABEL}=true"),
                "--filter".to_string(),
                "status=exited".to_string(),
                "-q".to_string(),
            ],
        )
        .await?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.delay).unwrap_or(chrono::Duration::zero());

        for id in ids.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let finished = docker(
                &host_args,
                &[
                    "inspect".to_string(),
                    "-f".to_string(),
                    "{{.State.FinishedAt}}".to_string(),
                    id.to_string(),
                ],
            )
            .await?;
            let Some(finished_at) = parse_finished_at(&finished) else {
                continue;
            };
            if finished_at > cutoff {
                continue;
            }
            debug!(container_id = %id, "Removing stopped container");
            let _ = docker(&host_args, &["rm".to_string(), id.to_string()]).await;
        }
        Ok(())
    }
}

fn parse_finished_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
