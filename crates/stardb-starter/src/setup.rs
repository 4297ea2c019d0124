// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence of the registry snapshot.
//!
//! The registry is written to `{dataDir}/setup.json` after every
//! mutation so a restarted starter can resume with the same peers and
//! port offsets. Writes go to a temp file in the same directory first
//! and are renamed into place, so a crash never leaves a torn file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use stardb_starter_protocol::ClusterPeers;
use tracing::debug;

use crate::error::Result;

/// File name of the persisted registry snapshot inside the data dir.
pub const SETUP_FILE: &str = "setup.json";

/// Reads and writes the registry snapshot under the data directory.
#[derive(Debug, Clone)]
pub struct SetupStore {
    path: PathBuf,
}

impl SetupStore {
    /// Creates a store rooted at the given data directory.
    pub fn new(data_dir: &Path) -> Self {
        SetupStore {
            path: data_dir.join(SETUP_FILE),
        }
    }

    /// Path of the setup file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted snapshot. A missing file is not an error and
    /// yields `None`; a present but unreadable file is.
    pub fn load(&self) -> Result<Option<ClusterPeers>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let peers: ClusterPeers = serde_json::from_slice(&raw)?;
        debug!(path = %self.path.display(), peers = peers.peers.len(), "Loaded setup");
        Ok(Some(peers))
    }

    /// Atomically writes the snapshot: temp file, fsync, rename.
    pub fn save(&self, peers: &ClusterPeers) -> Result<()> {
        let data = serde_json::to_vec_pretty(peers)?;
        let tmp_path = self.path.with_extension("json.tmp");

        let mut file = File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;

        // Make the rename itself durable.
        if let Some(dir) = self.path.parent()
            && let Ok(dir) = File::open(dir)
        {
            let _ = dir.sync_all();
        }

        debug!(path = %self.path.display(), peers = peers.peers.len(), "Saved setup");
        Ok(())
    }
}
