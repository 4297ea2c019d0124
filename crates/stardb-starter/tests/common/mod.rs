// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for starter integration tests.
//!
//! Provides [`TestStarter`], a starter running in-process against the
//! mock runner, plus small HTTP helpers.

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tempfile::TempDir;
use tokio::task::JoinHandle;

use stardb_starter::runner::MockRunner;
use stardb_starter::{Config, Service};

/// One in-process starter under test.
pub struct TestStarter {
    pub service: Arc<Service>,
    pub runner: Arc<MockRunner>,
    pub data_dir: PathBuf,
    pub master_port: u16,
    run_task: JoinHandle<stardb_starter::error::Result<()>>,
    _temp: Option<TempDir>,
}

impl TestStarter {
    /// Spawns a bootstrap leader on `master_port` with its own temp data
    /// dir.
    pub async fn leader(id: &str, agency_size: usize, master_port: u16) -> Self {
        let temp = TempDir::new().unwrap();
        let mut starter = Self::start(
            id,
            agency_size,
            master_port,
            "",
            "127.0.0.1",
            temp.path().to_path_buf(),
        )
        .await;
        starter._temp = Some(temp);
        starter.wait_serving(master_port).await;
        starter
    }

    /// Spawns a leader that has to learn its own address from the first
    /// hello request.
    pub async fn leader_bare(id: &str, agency_size: usize, master_port: u16) -> Self {
        let temp = TempDir::new().unwrap();
        let mut starter = Self::start(
            id,
            agency_size,
            master_port,
            "",
            "",
            temp.path().to_path_buf(),
        )
        .await;
        starter._temp = Some(temp);
        starter.wait_serving(master_port).await;
        starter
    }

    /// Spawns a follower joining the leader on `master_port`.
    ///
    /// The follower only serves its control plane once quorum is
    /// reached; use [`wait_serving`](Self::wait_serving) with its
    /// assigned port.
    pub async fn follower(id: &str, agency_size: usize, master_port: u16) -> Self {
        let temp = TempDir::new().unwrap();
        let join = format!("127.0.0.1:{master_port}");
        let mut starter = Self::start(
            id,
            agency_size,
            master_port,
            &join,
            "",
            temp.path().to_path_buf(),
        )
        .await;
        starter._temp = Some(temp);
        starter
    }

    /// Spawns a starter over an existing data dir (restart scenarios).
    pub async fn restart(
        id: &str,
        agency_size: usize,
        master_port: u16,
        join: &str,
        own_address: &str,
        data_dir: PathBuf,
    ) -> Self {
        Self::start(id, agency_size, master_port, join, own_address, data_dir).await
    }

    async fn start(
        id: &str,
        agency_size: usize,
        master_port: u16,
        join: &str,
        own_address: &str,
        data_dir: PathBuf,
    ) -> Self {
        let mut args = vec![
            "stardb-starter".to_string(),
            "--agencySize".to_string(),
            agency_size.to_string(),
            "--masterPort".to_string(),
            master_port.to_string(),
            "--dataDir".to_string(),
            data_dir.display().to_string(),
        ];
        if !id.is_empty() {
            args.push("--id".to_string());
            args.push(id.to_string());
        }
        if !own_address.is_empty() {
            args.push("--ownAddress".to_string());
            args.push(own_address.to_string());
        }
        if !join.is_empty() {
            args.push("--join".to_string());
            args.push(join.to_string());
        }

        let mut cfg = Config::parse_from(args);
        cfg.prepare().unwrap();
        std::fs::create_dir_all(&cfg.data_dir).unwrap();

        let runner = Arc::new(MockRunner::new());
        let service = Service::with_runner(cfg, runner.clone()).unwrap();
        let run_service = service.clone();
        let run_task = tokio::spawn(async move { run_service.run().await });

        TestStarter {
            service,
            runner,
            data_dir,
            master_port,
            run_task,
            _temp: None,
        }
    }

    /// Control-plane base URL for a given port.
    pub fn url(port: u16, path: &str) -> String {
        format!("http://127.0.0.1:{port}{path}")
    }

    /// Polls `/version` on the given port until it answers.
    pub async fn wait_serving(&self, port: u16) {
        let client = client();
        wait_for(|| {
            let client = client.clone();
            async move {
                client
                    .get(Self::url(port, "/version"))
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false)
            }
        })
        .await;
    }

    /// Cancels the starter and waits for a clean exit.
    pub async fn stop(self) {
        self.service.cancellation_token().cancel();
        self.run_task.await.unwrap().unwrap();
    }

    /// Like [`stop`](Self::stop), but keeps the data directory alive for
    /// a restart over it.
    pub async fn stop_keep_dir(mut self) -> Option<TempDir> {
        let temp = self._temp.take();
        self.stop().await;
        temp
    }
}

/// HTTP client following redirects (the default).
pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// HTTP client that surfaces 307s instead of following them.
pub fn client_no_redirect() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Picks a free TCP port. The next few ports above it should be free as
/// well, which is what a cluster on one host needs.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Polls an async predicate for up to ten seconds.
pub async fn wait_for<F, Fut>(predicate: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if predicate().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 10s");
}
