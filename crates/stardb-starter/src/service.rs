// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The root service object.
//!
//! [`Service`] owns the peer registry, the cancellation token, the
//! running trigger and the supervisor handles, and drives the whole
//! starter lifecycle: restore persisted setup, serve the control plane,
//! bootstrap (lead or join), launch supervisors on quorum, drain on
//! cancellation.
//!
//! One `tokio` mutex guards the registry and phase; control-plane
//! handlers hold it for their whole body, which linearizes joins and
//! leaves against each other and against setup persistence.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use stardb_starter_protocol::{ClusterPeers, HelloRequest, ServerRole};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bootstrap::{BootstrapClient, hello_url};
use crate::config::Config;
use crate::engine::{EngineRequest, EngineStrategy, StardbStrategy, agency_endpoints, work_dir};
use crate::error::{Error, Result};
use crate::peers::PeerRegistry;
use crate::runner::{DockerGc, DockerRunner, NativeRunner, ProcessRunner};
use crate::runner::docker::DockerOptions;
use crate::server;
use crate::setup::SetupStore;
use crate::supervisor::{ProcessTable, RoleSupervisor, SupervisorOptions};

/// Lifecycle phase of a starter; moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Peers are still joining; quorum not yet reached.
    Collecting,
    /// Quorum reached; engine processes are supervised.
    Running,
    /// Shutdown initiated; supervisors are draining.
    Terminating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Collecting => "collecting",
            Phase::Running => "running",
            Phase::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Mutable starter state behind the service mutex.
#[derive(Debug)]
pub struct ServiceState {
    /// The cluster registry.
    pub registry: PeerRegistry,
    /// Current lifecycle phase.
    pub phase: Phase,
}

/// The starter service.
pub struct Service {
    pub(crate) cfg: Config,
    pub(crate) id: String,
    pub(crate) version: String,
    pub(crate) build: String,
    pub(crate) token: CancellationToken,
    pub(crate) state: Mutex<ServiceState>,
    pub(crate) processes: ProcessTable,
    pub(crate) trigger: watch::Sender<bool>,
    pub(crate) runner: Arc<dyn ProcessRunner>,
    pub(crate) strategy: Arc<dyn EngineStrategy>,
    pub(crate) setup: SetupStore,
}

impl Service {
    /// Creates a service from prepared configuration, selecting the
    /// runner (native or docker) from it.
    pub fn new(cfg: Config) -> Result<Arc<Self>> {
        let runner: Arc<dyn ProcessRunner> = if cfg.uses_docker() {
            Arc::new(DockerRunner::new(DockerOptions::from_config(&cfg)))
        } else {
            Arc::new(NativeRunner::new(&cfg.debugger_path))
        };
        Self::with_runner(cfg, runner)
    }

    /// Creates a service with an explicit runner; used by tests and
    /// embedding code.
    pub fn with_runner(cfg: Config, runner: Arc<dyn ProcessRunner>) -> Result<Arc<Self>> {
        let setup = SetupStore::new(&cfg.data_dir);
        let restored = setup.load()?;

        let id = resolve_id(&cfg, restored.as_ref());
        let registry = match restored {
            Some(snapshot) => PeerRegistry::from_snapshot(snapshot),
            None => PeerRegistry::new(cfg.agency_size),
        };

        let strategy: Arc<dyn EngineStrategy> = Arc::new(StardbStrategy::new(
            cfg.engine_executable.clone(),
            cfg.server_threads,
        ));
        let (trigger, _) = watch::channel(false);

        Ok(Arc::new(Service {
            id,
            version: env!("CARGO_PKG_VERSION").to_string(),
            build: option_env!("STARDB_STARTER_BUILD").unwrap_or("dev").to_string(),
            token: CancellationToken::new(),
            state: Mutex::new(ServiceState {
                registry,
                phase: Phase::Collecting,
            }),
            processes: ProcessTable::default(),
            trigger,
            runner,
            strategy,
            setup,
            cfg,
        }))
    }

    /// This starter's peer id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The root cancellation token; cancelling it shuts the starter
    /// down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A snapshot of the current registry.
    pub async fn peers(&self) -> ClusterPeers {
        self.state.lock().await.registry.snapshot()
    }

    /// True when this starter is the bootstrap leader.
    pub fn is_leader(&self) -> bool {
        self.cfg.is_leader()
    }

    pub(crate) fn is_net_host(&self) -> bool {
        self.cfg.docker_net_host || !self.cfg.running_in_docker
    }

    /// Advertised base port. Differs from the bound port when this
    /// starter runs containerized behind a port mapping.
    pub(crate) fn announce_port(&self) -> u16 {
        self.cfg.master_port
    }

    /// Bound and advertised control-plane ports, given the registry.
    ///
    /// Once this peer is registered its bound port is the cluster base
    /// port plus its own offset; with host networking the advertised
    /// port equals the bound one.
    pub(crate) fn http_ports_locked(&self, state: &ServiceState) -> (u16, u16) {
        let announce = self.announce_port();
        let mut listen = self.cfg.master_port;
        if announce == self.cfg.master_port
            && let Some(peer) = state.registry.peer_by_id(&self.id)
        {
            listen += peer.port_offset;
        }
        let host = if self.is_net_host() { listen } else { announce };
        (listen, host)
    }

    /// Fires the running trigger once quorum is reached.
    pub(crate) fn trigger_running(&self) {
        let _ = self.trigger.send(true);
    }

    /// Persists the registry; failures are logged, not propagated.
    pub(crate) fn save_setup_locked(&self, state: &ServiceState) {
        if let Err(e) = self.setup.save(&state.registry.snapshot()) {
            error!(error = %e, "Failed to save setup");
        }
    }

    /// Installs this starter as peer 0. No-op unless the registry is
    /// empty.
    pub(crate) fn install_self_locked(&self, state: &mut ServiceState, address: &str) {
        if !state.registry.is_empty() {
            return;
        }
        let (_, host_port) = self.http_ports_locked(state);
        let data_dir = self.cfg.data_dir.display().to_string();
        if let Err(e) = state
            .registry
            .add_peer(&self.id, address, host_port, &data_dir, true)
        {
            error!(error = %e, "Failed to install own peer");
            return;
        }
        info!(id = %self.id, address, "Installed self as bootstrap peer");
        self.save_setup_locked(state);
        if state.registry.is_full() {
            self.trigger_running();
        }
    }

    /// Runs the starter until cancellation (or until every supervised
    /// engine exited on its own).
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        tokio::fs::create_dir_all(&self.cfg.data_dir).await?;

        {
            let state = self.state.lock().await;
            if state.registry.is_full() {
                info!("Restored a complete setup from disk");
                self.trigger_running();
            }
        }

        let server_task;
        if self.is_leader() {
            if !self.cfg.own_address.is_empty() {
                let own_address = self.cfg.own_address.clone();
                let mut state = self.state.lock().await;
                self.install_self_locked(&mut state, &own_address);
            }
            server_task = tokio::spawn(server::serve(self.clone(), self.token.clone()));
            info!(
                agency_size = self.cfg.agency_size,
                "Leading a new cluster, waiting for peers"
            );
        } else {
            // Join first: the control-plane bind port depends on the
            // offset the leader assigns.
            match self.join_cluster().await {
                Ok(()) => {}
                Err(Error::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
            server_task = tokio::spawn(server::serve(self.clone(), self.token.clone()));
        }

        // Wait for quorum.
        let mut trigger_rx = self.trigger.subscribe();
        tokio::select! {
            _ = async {
                while !*trigger_rx.borrow_and_update() {
                    if trigger_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {}
            _ = self.token.cancelled() => {
                self.state.lock().await.phase = Phase::Terminating;
                let _ = server_task.await;
                return Ok(());
            }
        }

        let supervisors = self.start_supervisors().await?;
        self.supervise_until_shutdown(supervisors).await;

        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Control plane failed"),
            Err(e) => warn!(error = %e, "Control plane task panicked"),
        }
        Ok(())
    }

    /// Follower side of the bootstrap: hello until quorum, then adopt
    /// the received registry.
    async fn join_cluster(&self) -> Result<()> {
        let client = BootstrapClient::new()?;
        let request = HelloRequest {
            slave_id: self.id.clone(),
            slave_address: self.cfg.own_address.clone(),
            slave_port: self.announce_port(),
            data_dir: self.cfg.data_dir.display().to_string(),
        };
        let url = hello_url(&self.cfg.join, self.cfg.master_port);
        info!(url = %url, id = %self.id, "Joining cluster");

        let peers = client.join_cluster(url, &request, &self.token).await?;
        {
            let mut state = self.state.lock().await;
            state.registry = PeerRegistry::from_snapshot(peers);
            self.save_setup_locked(&state);
        }
        self.trigger_running();
        Ok(())
    }

    /// Launches one supervisor task per enabled role.
    async fn start_supervisors(self: &Arc<Self>) -> Result<JoinSet<()>> {
        let (snapshot, my_peer) = {
            let mut state = self.state.lock().await;
            state.phase = Phase::Running;
            self.save_setup_locked(&state);
            (
                state.registry.snapshot(),
                state.registry.peer_by_id(&self.id).cloned(),
            )
        };
        let my_peer = my_peer.ok_or_else(|| {
            Error::Other(format!("own peer '{}' missing from the registry", self.id))
        })?;

        let endpoints = agency_endpoints(&snapshot);
        let mut roles: Vec<ServerRole> = Vec::new();
        if my_peer.has_agent {
            roles.push(ServerRole::Agent);
        }
        if self.cfg.start_coordinator {
            roles.push(ServerRole::Coordinator);
        }
        if self.cfg.start_dbserver {
            roles.push(ServerRole::DbServer);
        }

        let opts = SupervisorOptions {
            shutdown_grace: self.cfg.shutdown_grace,
            ..SupervisorOptions::default()
        };

        info!(roles = roles.len(), phase = %Phase::Running, "Quorum reached, launching engines");

        let mut set = JoinSet::new();
        for role in roles {
            let port = self.cfg.master_port + my_peer.port_offset + role.port_offset();
            let request = EngineRequest {
                role,
                address: my_peer.address.clone(),
                port,
                work_dir: work_dir(&self.cfg.data_dir, role, port),
                agency_endpoints: endpoints.clone(),
            };
            let supervisor = RoleSupervisor::new(
                request,
                self.runner.clone(),
                self.strategy.clone(),
                self.processes.clone(),
                opts,
            );
            set.spawn(supervisor.run(self.token.child_token()));
        }

        if self.runner.runner_type() == "docker" {
            let gc = DockerGc::new(
                DockerOptions::from_config(&self.cfg),
                self.cfg.docker_gc_delay,
            );
            tokio::spawn(gc.run(self.token.child_token()));
        }

        Ok(set)
    }

    /// Waits for cancellation (draining supervisors with grace) or for
    /// every supervisor to finish on its own.
    async fn supervise_until_shutdown(&self, mut supervisors: JoinSet<()>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    self.state.lock().await.phase = Phase::Terminating;
                    info!(phase = %Phase::Terminating, "Draining engine processes");
                    let drain = async {
                        while supervisors.join_next().await.is_some() {}
                    };
                    let limit = self.cfg.shutdown_grace + Duration::from_secs(10);
                    if tokio::time::timeout(limit, drain).await.is_err() {
                        warn!("Engines did not stop within grace, aborting supervisors");
                        supervisors.abort_all();
                    }
                    break;
                }
                finished = supervisors.join_next() => {
                    if finished.is_none() {
                        info!("All engine processes ended");
                        self.token.cancel();
                        break;
                    }
                }
            }
        }
    }
}

/// Resolves the peer id: explicit configuration wins, then the peer the
/// persisted setup lists for our data directory, then a fresh one.
fn resolve_id(cfg: &Config, restored: Option<&ClusterPeers>) -> String {
    if !cfg.id.is_empty() {
        return cfg.id.clone();
    }
    let own_dir = cfg.data_dir.display().to_string();
    if let Some(snapshot) = restored
        && let Some(peer) = snapshot.peers.iter().find(|p| p.data_dir == own_dir)
    {
        info!(id = %peer.id, "Adopted peer id from persisted setup");
        return peer.id.clone();
    }
    let raw = uuid::Uuid::new_v4().simple().to_string();
    raw[..8].to_string()
}
