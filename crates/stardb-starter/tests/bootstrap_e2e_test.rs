// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end bootstrap tests: three starters forming a cluster.

mod common;

use common::{TestStarter, client, client_no_redirect, free_port, wait_for};
use stardb_starter_protocol::{ClusterPeers, PORT_OFFSET_STRIDE, ProcessListResponse};

async fn fetch_peers(port: u16) -> ClusterPeers {
    client()
        .get(TestStarter::url(port, "/hello"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn bootstrap_three(port: u16) -> (TestStarter, TestStarter, TestStarter) {
    let a = TestStarter::leader("A", 3, port).await;

    // Join sequentially so the join order (and hence the offsets) is
    // deterministic.
    let b = TestStarter::follower("B", 3, port).await;
    wait_for(|| async { fetch_peers(port).await.peers.len() == 2 }).await;
    let c = TestStarter::follower("C", 3, port).await;
    wait_for(|| async { fetch_peers(port).await.peers.len() == 3 }).await;

    b.wait_serving(port + PORT_OFFSET_STRIDE).await;
    c.wait_serving(port + 2 * PORT_OFFSET_STRIDE).await;
    (a, b, c)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn three_starters_form_a_cluster() {
    let port = free_port();
    let (a, b, c) = bootstrap_three(port).await;

    let peers = fetch_peers(port).await;
    let ids: Vec<&str> = peers.peers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    let offsets: Vec<u16> = peers.peers.iter().map(|p| p.port_offset).collect();
    assert_eq!(offsets, vec![0, PORT_OFFSET_STRIDE, 2 * PORT_OFFSET_STRIDE]);
    assert!(peers.peers.iter().all(|p| p.has_agent));
    assert!(peers.peers.iter().all(|p| p.address == "127.0.0.1"));

    // Every starter supervises agent + coordinator + dbserver.
    for starter_port in [port, port + PORT_OFFSET_STRIDE, port + 2 * PORT_OFFSET_STRIDE] {
        wait_for(|| async move {
            let resp: ProcessListResponse = client()
                .get(TestStarter::url(starter_port, "/process"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            resp.servers_started && resp.servers.len() == 3
        })
        .await;
    }

    // Each engine was launched with the full agency address list.
    for starter in [&a, &b, &c] {
        let launches = starter.runner.started();
        assert_eq!(launches.len(), 3);
        for launch in &launches {
            let agency_args = launch
                .args
                .iter()
                .filter(|arg| *arg == "--agency.endpoint")
                .count();
            assert_eq!(agency_args, 3);
        }
    }

    c.stop().await;
    b.stop().await;
    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hello_to_a_follower_redirects_to_the_leader() {
    let port = free_port();
    let (a, b, c) = bootstrap_three(port).await;

    let resp = client_no_redirect()
        .get(TestStarter::url(port + PORT_OFFSET_STRIDE, "/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 307);
    let location = resp
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(location, format!("http://127.0.0.1:{port}/hello"));

    c.stop().await;
    b.stop().await;
    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn goodbye_removes_the_peer_and_rewrites_the_setup() {
    let port = free_port();
    let (a, b, c) = bootstrap_three(port).await;

    let resp = client()
        .post(TestStarter::url(port, "/goodbye"))
        .json(&serde_json::json!({"SlaveID": "C"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "BYE");

    let peers = fetch_peers(port).await;
    let ids: Vec<&str> = peers.peers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);

    let persisted: ClusterPeers = serde_json::from_str(
        &std::fs::read_to_string(a.data_dir.join("setup.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(persisted.peers.len(), 2);

    c.stop().await;
    b.stop().await;
    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn a_restarted_follower_keeps_its_offset() {
    let port = free_port();
    let (a, b, c) = bootstrap_three(port).await;

    let b_dir = b.data_dir.clone();
    let _keep_dir = b.stop_keep_dir().await;

    // Restart over the same data dir without an explicit id; the
    // persisted setup identifies the peer.
    let b2 = TestStarter::restart(
        "",
        3,
        port,
        &format!("127.0.0.1:{port}"),
        "",
        b_dir,
    )
    .await;
    b2.wait_serving(port + PORT_OFFSET_STRIDE).await;
    assert_eq!(b2.service.id(), "B");

    let peers = fetch_peers(port).await;
    assert_eq!(peers.peers.len(), 3);
    let b_peer = peers.peers.iter().find(|p| p.id == "B").unwrap();
    assert_eq!(b_peer.port_offset, PORT_OFFSET_STRIDE);

    b2.stop().await;
    c.stop().await;
    a.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn shutdown_with_goodbye_deregisters_from_the_leader() {
    let port = free_port();
    let (a, b, c) = bootstrap_three(port).await;

    let resp = client()
        .post(TestStarter::url(
            port + PORT_OFFSET_STRIDE,
            "/shutdown?mode=goodbye",
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    wait_for(|| async { fetch_peers(port).await.peers.len() == 2 }).await;
    let peers = fetch_peers(port).await;
    assert!(peers.peers.iter().all(|p| p.id != "B"));

    // B's run loop exits cleanly after the goodbye.
    let token = b.service.cancellation_token();
    wait_for(|| async { token.is_cancelled() }).await;

    c.stop().await;
    a.stop().await;
}
