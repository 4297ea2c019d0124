// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! stardb-starter - Cluster Bootstrap Supervisor
//!
//! One starter process runs per host. The starters elect a bootstrap
//! leader, gossip peer identities until the agency is full, assign each
//! peer a stable port offset, and then each starter launches and
//! supervises its local engine processes (agent, coordinator, dbserver),
//! either as native processes or as containers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Other starters                            │
//! │                (hello / goodbye over HTTP+JSON)                  │
//! └──────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     stardb-starter (this crate)                  │
//! │  ┌────────────┐  ┌───────────┐  ┌────────────┐  ┌────────────┐   │
//! │  │  Control   │  │ Bootstrap │  │    Peer    │  │ Supervisor │   │
//! │  │ plane HTTP │  │ protocol  │  │  registry  │  │ (per role) │   │
//! │  └────────────┘  └───────────┘  └─────┬──────┘  └─────┬──────┘   │
//! └───────────────────────────────────────│───────────────│──────────┘
//!                                         │ persist       │ launch
//!                                         ▼               ▼
//!                               ┌──────────────┐  ┌────────────────┐
//!                               │  setup.json  │  │ stardbd (x3)   │
//!                               │ ({dataDir})  │  │ native/docker  │
//!                               └──────────────┘  └────────────────┘
//! ```
//!
//! # Bootstrap state machine
//!
//! ```text
//!  leader:                         follower:
//!  initializing ──self-install──►  connecting ──hello ok──► collecting
//!       │                              │ 307: retarget hello    │
//!       ▼                              ▼                        │
//!  collecting ──registry full──►   running  ◄──quorum reached───┘
//!       │                              │
//!       └────────── cancellation ──────┴──► terminating
//! ```
//!
//! Once quorum is reached the supervisor launches one process per enabled
//! role and restarts it with bounded backoff on abnormal exit. A single
//! cancellation token, cancelled by the first interrupt signal or by
//! `POST /shutdown`, drains everything; a second interrupt forces exit.
//!
//! # Modules
//!
//! - [`config`]: command line options and startup validation
//! - [`error`]: crate error type
//! - [`peers`]: in-memory peer registry and port-offset assignment
//! - [`setup`]: atomic persistence of the registry under the data dir
//! - [`runner`]: process execution backends (native, docker, mock)
//! - [`engine`]: engine command-line construction
//! - [`supervisor`]: per-role process lifecycle with restart backoff
//! - [`bootstrap`]: hello/goodbye client side of the join protocol
//! - [`server`]: the HTTP control plane
//! - [`service`]: the root service object tying it all together

#![deny(missing_docs)]

/// Command line options and startup validation.
pub mod config;

/// Error types for starter operations.
pub mod error;

/// In-memory peer registry and port-offset assignment.
pub mod peers;

/// Atomic persistence of the registry snapshot.
pub mod setup;

/// Process execution backends (native, docker, mock).
pub mod runner;

/// Engine command-line construction.
pub mod engine;

/// Per-role process lifecycle with restart backoff.
pub mod supervisor;

/// Client side of the hello/goodbye bootstrap protocol.
pub mod bootstrap;

/// HTTP control plane.
pub mod server;

/// The root service object.
pub mod service;

pub use config::Config;
pub use error::Error;
pub use service::Service;
