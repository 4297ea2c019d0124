// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire types for the stardb cluster bootstrap protocol.
//!
//! Every starter exposes a small HTTP control plane; this crate holds the
//! JSON bodies exchanged over it, shared between the server side and the
//! follower-side client:
//!
//! | Type | Used by |
//! |------|---------|
//! | [`HelloRequest`] | `POST /hello` (peer join) |
//! | [`ClusterPeers`] | `/hello` response, and the on-disk `setup.json` |
//! | [`GoodbyeRequest`] | `POST /goodbye` (peer leave) |
//! | [`ProcessListResponse`] | `GET /process` |
//! | [`VersionResponse`] | `GET /version` |
//! | [`ErrorResponse`] | every error status |
//!
//! The field names are part of the cluster contract and must not change
//! between releases; peers of different versions may bootstrap together.

#![deny(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Distance between two consecutive port offsets.
///
/// Each peer owns one slot of this many consecutive ports above the
/// cluster base port: the starter control plane (+0), the agent (+1),
/// the coordinator (+2), the dbserver (+3), and one spare.
pub const PORT_OFFSET_STRIDE: u16 = 5;

/// The three engine roles a starter can supervise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    /// Quorum-forming agency member; runs only on the first `AgencySize`
    /// peers in join order.
    Agent,
    /// Client-facing coordinator.
    Coordinator,
    /// Data-bearing dbserver.
    DbServer,
}

impl ServerRole {
    /// Port distance of this role above the peer's base port.
    ///
    /// These values are identical on every peer of a cluster; ports
    /// reported by `/process` embed them.
    pub fn port_offset(self) -> u16 {
        match self {
            ServerRole::Agent => 1,
            ServerRole::Coordinator => 2,
            ServerRole::DbServer => 3,
        }
    }

    /// Stable lowercase name (`agent`, `coordinator`, `dbserver`).
    pub fn as_str(self) -> &'static str {
        match self {
            ServerRole::Agent => "agent",
            ServerRole::Coordinator => "coordinator",
            ServerRole::DbServer => "dbserver",
        }
    }

    /// All roles, in port-offset order.
    pub fn all() -> [ServerRole; 3] {
        [
            ServerRole::Agent,
            ServerRole::Coordinator,
            ServerRole::DbServer,
        ]
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One starter registered in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Unique identifier of the peer within the cluster.
    #[serde(rename = "ID")]
    pub id: String,
    /// Host or IP address under which the peer is reachable.
    #[serde(rename = "Address")]
    pub address: String,
    /// Base control-plane port the peer advertises. The peer's starter
    /// listens at `Port + PortOffset`.
    #[serde(rename = "Port")]
    pub port: u16,
    /// Offset added to the cluster base port to derive this peer's engine
    /// ports. Unique per peer, stable for the lifetime of the entry.
    #[serde(rename = "PortOffset")]
    pub port_offset: u16,
    /// Data directory on the peer's host.
    #[serde(rename = "DataDir")]
    pub data_dir: String,
    /// Whether this peer runs an agent.
    #[serde(rename = "HasAgent")]
    pub has_agent: bool,
}

/// The cluster registry: all known peers in join order plus the fixed
/// agency size.
///
/// This is the `/hello` response body and, verbatim, the schema of the
/// persisted `setup.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPeers {
    /// Peers in join order; index 0 is the bootstrap leader.
    #[serde(rename = "Peers")]
    pub peers: Vec<Peer>,
    /// Number of agents the cluster runs; odd, fixed at creation.
    #[serde(rename = "AgencySize")]
    pub agency_size: usize,
}

impl ClusterPeers {
    /// True once the registry holds a full agency worth of peers.
    pub fn is_full(&self) -> bool {
        self.agency_size > 0 && self.peers.len() >= self.agency_size
    }
}

/// Body of `POST /hello`: a peer asking to join the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Unique id of the joining peer.
    #[serde(rename = "SlaveID")]
    pub slave_id: String,
    /// Address the peer is reachable at. When empty the leader derives it
    /// from the connection's remote address.
    #[serde(rename = "SlaveAddress", default)]
    pub slave_address: String,
    /// Base port the peer advertises.
    #[serde(rename = "SlavePort")]
    pub slave_port: u16,
    /// Data directory of the joining peer.
    #[serde(rename = "DataDir", default)]
    pub data_dir: String,
}

/// Body of `POST /goodbye`: a peer leaving the cluster for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodbyeRequest {
    /// Id of the peer to remove.
    #[serde(rename = "SlaveID")]
    pub slave_id: String,
}

/// One locally supervised engine process, as reported by `GET /process`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProcess {
    /// Role of the process: `agent`, `coordinator` or `dbserver`.
    #[serde(rename = "type")]
    pub kind: String,
    /// IP address needed to reach the process.
    pub ip: String,
    /// Port the process listens on.
    pub port: u16,
    /// PID of the process; 0 (omitted) when running in a container.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pid: u32,
    /// Container id; empty (omitted) when running natively.
    #[serde(rename = "container-id", default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// Response of `GET /process`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessListResponse {
    /// True once every expected local engine process is running.
    #[serde(rename = "servers-started", default)]
    pub servers_started: bool,
    /// The running engine processes.
    #[serde(default)]
    pub servers: Vec<ServerProcess>,
}

/// Response of `GET /version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionResponse {
    /// Release version of the starter.
    pub version: String,
    /// Build identifier.
    pub build: String,
}

/// JSON body accompanying every non-2xx control-plane status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description of the failure.
    pub error: String,
}

impl ErrorResponse {
    /// Build an error body from any message.
    pub fn new(message: impl Into<String>) -> Self {
        let mut error: String = message.into();
        if error.is_empty() {
            error = "Unknown error".to_string();
        }
        ErrorResponse { error }
    }
}
