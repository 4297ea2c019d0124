// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client side of the hello/goodbye bootstrap protocol.
//!
//! A follower posts `/hello` to the leader with exponential backoff
//! until the returned registry is full, following 307 redirects to
//! wherever the actual leader lives. The received registry is the
//! follower's source of truth from then on.

use std::time::Duration;

use stardb_starter_protocol::{ClusterPeers, ErrorResponse, GoodbyeRequest, HelloRequest, Peer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::supervisor::Backoff;

/// Backoff for hello retries towards the leader.
const HELLO_BACKOFF: Backoff = Backoff {
    first: Duration::from_secs(1),
    max: Duration::from_secs(20),
    factor: 1.5,
};

/// Consecutive redirects tolerated before the client slows down.
const MAX_FAST_REDIRECTS: u32 = 8;

/// Base URL of a starter's control plane.
pub fn starter_url(peer: &Peer) -> String {
    format!("http://{}:{}", peer.address, peer.port + peer.port_offset)
}

/// Initial hello URL for a configured join address. A join address
/// without a port gets the cluster base port.
pub fn hello_url(join: &str, master_port: u16) -> String {
    let join = join.trim_start_matches("http://");
    if join.contains(':') {
        format!("http://{join}/hello")
    } else {
        format!("http://{join}:{master_port}/hello")
    }
}

enum HelloOutcome {
    Peers(ClusterPeers),
    Redirect(String),
}

/// HTTP client for the bootstrap protocol.
pub struct BootstrapClient {
    http: reqwest::Client,
}

impl BootstrapClient {
    /// Creates the client. Redirects are handled explicitly, not
    /// followed by the transport.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(BootstrapClient { http })
    }

    /// Posts hello until the cluster registry is full, then returns it.
    pub async fn join_cluster(
        &self,
        initial_url: String,
        request: &HelloRequest,
        token: &CancellationToken,
    ) -> Result<ClusterPeers> {
        let mut url = initial_url;
        let mut prev_delay: Option<Duration> = None;
        let mut fast_redirects: u32 = 0;

        loop {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self.post_hello(&url, request).await {
                Ok(HelloOutcome::Redirect(next)) => {
                    info!(from = %url, to = %next, "Redirected to leader");
                    url = next;
                    fast_redirects += 1;
                    if fast_redirects <= MAX_FAST_REDIRECTS {
                        continue;
                    }
                }
                Ok(HelloOutcome::Peers(peers)) => {
                    fast_redirects = 0;
                    if peers.is_full() {
                        info!(peers = peers.peers.len(), "Cluster quorum reached");
                        return Ok(peers);
                    }
                    debug!(
                        peers = peers.peers.len(),
                        agency_size = peers.agency_size,
                        "Waiting for more peers"
                    );
                    prev_delay = None;
                }
                Err(e) => {
                    fast_redirects = 0;
                    warn!(url = %url, error = %e, "Hello failed, retrying");
                }
            }

            let delay = HELLO_BACKOFF.next(prev_delay);
            prev_delay = Some(delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    async fn post_hello(&self, url: &str, request: &HelloRequest) -> Result<HelloOutcome> {
        let resp = self.http.post(url).json(request).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::TEMPORARY_REDIRECT {
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return match location {
                Some(location) => Ok(HelloOutcome::Redirect(location)),
                None => Err(Error::Other("redirect without Location".to_string())),
            };
        }
        if !status.is_success() {
            let message = resp
                .json::<ErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(Error::Other(message));
        }

        Ok(HelloOutcome::Peers(resp.json::<ClusterPeers>().await?))
    }

    /// Tells the leader this peer is leaving for good.
    pub async fn send_goodbye(&self, leader: &Peer, own_id: &str) -> Result<()> {
        let url = format!("{}/goodbye", starter_url(leader));
        let request = GoodbyeRequest {
            slave_id: own_id.to_string(),
        };
        let resp = self.http.post(&url).json(&request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(Error::Other(format!("goodbye rejected: {message}")));
        }
        info!(leader = %leader.id, "Said goodbye to the leader");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_url_appends_master_port_when_missing() {
        assert_eq!(hello_url("10.0.0.1", 4000), "http://10.0.0.1:4000/hello");
        assert_eq!(hello_url("10.0.0.1:5000", 4000), "http://10.0.0.1:5000/hello");
        assert_eq!(
            hello_url("http://10.0.0.1:5000", 4000),
            "http://10.0.0.1:5000/hello"
        );
    }

    #[test]
    fn starter_url_includes_the_port_offset() {
        let peer = Peer {
            id: "b".to_string(),
            address: "10.0.0.2".to_string(),
            port: 4000,
            port_offset: 5,
            data_dir: "/data/b".to_string(),
            has_agent: true,
        };
        assert_eq!(starter_url(&peer), "http://10.0.0.2:4005");
    }
}
