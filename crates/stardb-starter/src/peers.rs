// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The in-memory peer registry.
//!
//! The registry holds every known starter in join order; index 0 is the
//! bootstrap leader. Port offsets are handed out as the smallest unused
//! multiple of [`PORT_OFFSET_STRIDE`] and are never renumbered, so a peer
//! keeps its addressing across restarts and rejoins. All mutation goes
//! through the service lock; this type itself is plain data.

use stardb_starter_protocol::{ClusterPeers, PORT_OFFSET_STRIDE, Peer};

use crate::error::{Error, Result};

/// Ordered collection of cluster peers with offset assignment.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    inner: ClusterPeers,
}

impl PeerRegistry {
    /// Creates an empty registry for a cluster of the given agency size.
    pub fn new(agency_size: usize) -> Self {
        PeerRegistry {
            inner: ClusterPeers {
                peers: Vec::new(),
                agency_size,
            },
        }
    }

    /// Restores a registry from a persisted or received snapshot.
    pub fn from_snapshot(snapshot: ClusterPeers) -> Self {
        PeerRegistry { inner: snapshot }
    }

    /// Deep copy of the registry, safe to serialize or send on the wire.
    pub fn snapshot(&self) -> ClusterPeers {
        self.inner.clone()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.inner.peers.len()
    }

    /// True when no peer has registered yet.
    pub fn is_empty(&self) -> bool {
        self.inner.peers.is_empty()
    }

    /// The configured agency size.
    pub fn agency_size(&self) -> usize {
        self.inner.agency_size
    }

    /// True once the registry holds a full agency worth of peers.
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    /// Peers in join order.
    pub fn peers(&self) -> &[Peer] {
        &self.inner.peers
    }

    /// The bootstrap leader, i.e. the first peer in join order.
    pub fn leader(&self) -> Option<&Peer> {
        self.inner.peers.first()
    }

    /// Looks up a peer by id.
    pub fn peer_by_id(&self, id: &str) -> Option<&Peer> {
        self.inner.peers.iter().find(|p| p.id == id)
    }

    /// Appends a new peer with a freshly assigned port offset and
    /// returns a copy of the entry.
    ///
    /// Fails with [`Error::DuplicateId`] when the id is already taken.
    pub fn add_peer(
        &mut self,
        id: &str,
        address: &str,
        port: u16,
        data_dir: &str,
        has_agent: bool,
    ) -> Result<Peer> {
        if self.peer_by_id(id).is_some() {
            return Err(Error::DuplicateId(id.to_string()));
        }
        let peer = Peer {
            id: id.to_string(),
            address: address.to_string(),
            port,
            port_offset: self.free_port_offset(),
            data_dir: data_dir.to_string(),
            has_agent,
        };
        self.inner.peers.push(peer.clone());
        Ok(peer)
    }

    /// Updates address, port and data directory of an existing peer in
    /// place; the port offset is preserved. A miss is a no-op.
    pub fn update_peer(&mut self, id: &str, address: &str, port: u16, data_dir: &str) {
        if let Some(peer) = self.inner.peers.iter_mut().find(|p| p.id == id) {
            peer.address = address.to_string();
            peer.port = port;
            peer.data_dir = data_dir.to_string();
        }
    }

    /// Removes the peer with the given id. Remaining peers keep their
    /// offsets. Returns false when the id is unknown.
    pub fn remove_peer_by_id(&mut self, id: &str) -> bool {
        let before = self.inner.peers.len();
        self.inner.peers.retain(|p| p.id != id);
        self.inner.peers.len() != before
    }

    /// The next port offset to assign: the smallest multiple of the
    /// stride not currently in use.
    pub fn free_port_offset(&self) -> u16 {
        let mut offset = 0;
        loop {
            if !self.inner.peers.iter().any(|p| p.port_offset == offset) {
                return offset;
            }
            offset += PORT_OFFSET_STRIDE;
        }
    }

    /// Finds a peer that already claims the given (address, dataDir) pair
    /// under a different id.
    pub fn same_data_dir_conflict(&self, address: &str, data_dir: &str, id: &str) -> Option<&Peer> {
        self.inner
            .peers
            .iter()
            .find(|p| p.address == address && p.data_dir == data_dir && p.id != id)
    }
}
