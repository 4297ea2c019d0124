// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for stardb-starter.
//!
//! All options arrive through the command line (with a few environment
//! fallbacks such as `DATA_DIR` and `DOCKER_IMAGE`); there is no
//! process-global state. [`Config::prepare`] validates the combination
//! and fills in derived values before any task starts.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

/// Startup configuration, one instance per starter process.
#[derive(Debug, Clone, Parser)]
#[command(name = "stardb-starter", about = "Start stardb clusters with ease", version)]
pub struct Config {
    /// Unique identifier of this peer (auto-generated when empty).
    #[arg(long, default_value = "")]
    pub id: String,

    /// Number of agents in the cluster. Must be odd.
    #[arg(long = "agencySize", default_value_t = 3)]
    pub agency_size: usize,

    /// Path of the stardbd engine executable.
    #[arg(long = "stardbd", default_value = "/usr/sbin/stardbd")]
    pub engine_executable: PathBuf,

    /// Port to listen on for other starters to join.
    #[arg(long = "masterPort", default_value_t = 4000)]
    pub master_port: u16,

    /// Path of a debugger wrapper (e.g. rr) to prepend to the engine
    /// command line. Native execution only.
    #[arg(long = "rr", default_value = "")]
    pub debugger_path: String,

    /// Whether a coordinator instance should be started.
    #[arg(long = "startCoordinator", default_value_t = true, action = ArgAction::Set)]
    pub start_coordinator: bool,

    /// Whether a dbserver instance should be started.
    #[arg(long = "startDBserver", default_value_t = true, action = ArgAction::Set)]
    pub start_dbserver: bool,

    /// Directory to store all data in.
    #[arg(long = "dataDir", env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Address under which this starter is reachable. Required for
    /// `--agencySize 1` and when running in a container; otherwise it is
    /// derived from the first hello request.
    #[arg(long = "ownAddress", default_value = "")]
    pub own_address: String,

    /// Join an existing cluster with its leader at this address. When
    /// empty, this starter acts as the bootstrap leader.
    #[arg(long = "join", default_value = "")]
    pub join: String,

    /// Turn on debug logging.
    #[arg(long, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Value passed through to the engine's server.threads option
    /// (0 leaves the engine default in place).
    #[arg(long = "server.threads", default_value_t = 0)]
    pub server_threads: u32,

    /// Time to allow engine processes to stop gracefully before they are
    /// killed.
    #[arg(long = "shutdownGrace", value_parser = parse_duration, default_value = "30s")]
    pub shutdown_grace: Duration,

    /// Endpoint used to reach the docker daemon.
    #[arg(long = "dockerEndpoint", default_value = "unix:///var/run/docker.sock")]
    pub docker_endpoint: String,

    /// Name of the docker image used to launch engine instances. Leave
    /// empty to run native processes instead of containers.
    #[arg(long = "docker", env = "DOCKER_IMAGE", default_value = "")]
    pub docker_image: String,

    /// User the engine containers run as.
    #[arg(long = "dockerUser", default_value = "")]
    pub docker_user: String,

    /// Name of the docker container that is running this starter.
    #[arg(long = "dockerContainer", default_value = "")]
    pub docker_container: String,

    /// Delay before stopped engine containers are garbage collected.
    #[arg(long = "dockerGCDelay", value_parser = parse_duration, default_value = "10m")]
    pub docker_gc_delay: Duration,

    /// Run engine containers with --net=host.
    #[arg(long = "dockerNetHost", action = ArgAction::SetTrue)]
    pub docker_net_host: bool,

    /// Run engine containers with --privileged.
    #[arg(long = "dockerPrivileged", action = ArgAction::SetTrue)]
    pub docker_privileged: bool,

    /// Set when this starter itself runs inside a container.
    #[arg(long = "runningInDocker", env = "RUNNING_IN_DOCKER", default_value_t = false, action = ArgAction::Set, hide = true)]
    pub running_in_docker: bool,

    /// Permit two peers to share the same (address, dataDir) pair.
    /// Not exposed on the command line; embedding code may opt in.
    #[arg(skip)]
    pub allow_same_data_dir: bool,
}

impl Config {
    /// True when this starter acts as the bootstrap leader.
    pub fn is_leader(&self) -> bool {
        self.join.is_empty()
    }

    /// True when engine instances run as containers.
    pub fn uses_docker(&self) -> bool {
        !self.docker_image.is_empty()
    }

    /// Validates the option combination and makes the data directory
    /// absolute. An empty id stays empty here; the service resolves it
    /// against the persisted setup before generating a fresh one.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.data_dir.as_os_str().is_empty() {
            self.data_dir = PathBuf::from(".");
        }
        if self.data_dir.is_relative() {
            let cwd = std::env::current_dir()
                .map_err(|e| ConfigError::DataDir(e.to_string()))?;
            self.data_dir = cwd.join(&self.data_dir);
        }
        Ok(())
    }

    /// Plausibility checks; every failure here aborts startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agency_size == 0 || self.agency_size % 2 == 0 {
            return Err(ConfigError::InvalidAgencySize(self.agency_size));
        }
        if self.agency_size == 1 && self.own_address.is_empty() {
            return Err(ConfigError::OwnAddressRequired);
        }
        if self.uses_docker() && !self.debugger_path.is_empty() {
            return Err(ConfigError::DockerDebuggerConflict);
        }
        if !self.start_coordinator && !self.start_dbserver {
            // With both roles disabled this peer could never report all of
            // its expected servers as started.
            return Err(ConfigError::NoLocalServers);
        }
        Ok(())
    }
}

/// Configuration errors; all of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// agencySize must be a positive odd number.
    #[error("agencySize needs to be a positive, odd number (got {0})")]
    InvalidAgencySize(usize),
    /// agencySize 1 leaves no hello request to derive the own address from.
    #[error("if agencySize is 1, ownAddress must be given")]
    OwnAddressRequired,
    /// A debugger wrapper cannot reach into a container.
    #[error("using --docker together with --rr is not possible")]
    DockerDebuggerConflict,
    /// Disabling both coordinator and dbserver leaves nothing to supervise
    /// besides a possible agent, and /process would never report
    /// servers-started.
    #[error("at least one of startCoordinator and startDBserver must be enabled")]
    NoLocalServers,
    /// The data directory could not be resolved.
    #[error("cannot resolve data directory: {0}")]
    DataDir(String),
}

/// Parses durations of the form `250ms`, `30s`, `10m` or `1h`.
/// A bare number is taken as seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let n: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(format!("invalid duration unit '{unit}' in '{value}'")),
    }
}
