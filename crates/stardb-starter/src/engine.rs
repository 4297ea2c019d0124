// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine command-line construction.
//!
//! The supervisor is generic over how an engine instance is invoked;
//! [`EngineStrategy`] turns peer state into a concrete [`LaunchSpec`].
//! [`StardbStrategy`] is the stardbd integration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use stardb_starter_protocol::{ClusterPeers, ServerRole};

use crate::runner::LaunchSpec;

/// File the engine logs into, inside its role work directory.
pub const ENGINE_LOG_FILE: &str = "engine.log";

/// Everything the strategy needs to know about one engine instance.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    /// Role of the instance.
    pub role: ServerRole,
    /// Address other cluster members use to reach this instance.
    pub address: String,
    /// Port the instance listens on.
    pub port: u16,
    /// Work directory of the instance (`{dataDir}/{role}{port}`).
    pub work_dir: PathBuf,
    /// Agency endpoints of the cluster, one per agent-bearing peer.
    pub agency_endpoints: Vec<String>,
}

/// Builds the launch specification for one engine instance.
pub trait EngineStrategy: Send + Sync {
    /// Turns the request into a runnable command line.
    fn launch_spec(&self, req: &EngineRequest) -> LaunchSpec;
}

/// Command-line integration for the stardbd engine.
pub struct StardbStrategy {
    executable: PathBuf,
    server_threads: u32,
}

impl StardbStrategy {
    /// Creates the stardbd strategy. `server_threads` 0 leaves the
    /// engine default untouched.
    pub fn new(executable: PathBuf, server_threads: u32) -> Self {
        StardbStrategy {
            executable,
            server_threads,
        }
    }
}

impl EngineStrategy for StardbStrategy {
    fn launch_spec(&self, req: &EngineRequest) -> LaunchSpec {
        let mut args = vec![
            "--server.role".to_string(),
            req.role.as_str().to_string(),
            "--server.endpoint".to_string(),
            format!("tcp://0.0.0.0:{}", req.port),
            "--server.my-address".to_string(),
            format!("tcp://{}:{}", req.address, req.port),
            "--database.directory".to_string(),
            req.work_dir.join("data").display().to_string(),
            "--log.file".to_string(),
            req.work_dir.join(ENGINE_LOG_FILE).display().to_string(),
        ];
        for endpoint in &req.agency_endpoints {
            args.push("--agency.endpoint".to_string());
            args.push(endpoint.clone());
        }
        if self.server_threads > 0 {
            args.push("--server.threads".to_string());
            args.push(self.server_threads.to_string());
        }

        LaunchSpec {
            role: req.role,
            program: self.executable.clone(),
            args,
            env: HashMap::new(),
            work_dir: req.work_dir.clone(),
            port: req.port,
        }
    }
}

/// Work directory of one engine instance: `{dataDir}/{role}{port}`.
pub fn work_dir(data_dir: &Path, role: ServerRole, port: u16) -> PathBuf {
    data_dir.join(format!("{role}{port}"))
}

/// Agency endpoints of the cluster: every agent-bearing peer at its
/// agent port.
pub fn agency_endpoints(peers: &ClusterPeers) -> Vec<String> {
    peers
        .peers
        .iter()
        .filter(|p| p.has_agent)
        .map(|p| {
            format!(
                "tcp://{}:{}",
                p.address,
                p.port + p.port_offset + ServerRole::Agent.port_offset()
            )
        })
        .collect()
}
