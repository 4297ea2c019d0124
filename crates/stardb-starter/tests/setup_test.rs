// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Setup persistence and restart restoration.

mod common;

use common::{TestStarter, client, free_port, wait_for};
use stardb_starter_protocol::{ClusterPeers, ProcessListResponse};

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

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn setup_file_always_matches_the_registry() {
    let port = free_port();
    let leader = TestStarter::leader("A", 3, port).await;

    // After self-install.
    let on_disk: ClusterPeers = serde_json::from_str(
        &std::fs::read_to_string(leader.data_dir.join("setup.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk, fetch_peers(port).await);

    // After a join.
    let resp = client()
        .post(TestStarter::url(port, "/hello"))
        .json(&serde_json::json!({
            "SlaveID": "B",
            "SlaveAddress": "127.0.0.1",
            "SlavePort": port,
            "DataDir": "/data/b",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let on_disk: ClusterPeers = serde_json::from_str(
        &std::fs::read_to_string(leader.data_dir.join("setup.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk, fetch_peers(port).await);
    assert_eq!(on_disk.peers.len(), 2);

    leader.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_leader_restart_restores_the_cluster_from_disk() {
    let port = free_port();
    let leader = TestStarter::leader("A", 1, port).await;

    wait_for(|| async {
        let resp: ProcessListResponse = client()
            .get(TestStarter::url(port, "/process"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        resp.servers_started
    })
    .await;

    let dir = leader.data_dir.clone();
    let keep = leader.stop_keep_dir().await;

    // No id given: the restarted leader identifies itself through the
    // persisted setup and reaches quorum without any hello.
    let leader2 = TestStarter::restart("", 1, port, "", "127.0.0.1", dir).await;
    leader2.wait_serving(port).await;
    assert_eq!(leader2.service.id(), "A");

    let peers = fetch_peers(port).await;
    assert_eq!(peers.peers.len(), 1);
    assert_eq!(peers.peers[0].id, "A");
    assert_eq!(peers.peers[0].port_offset, 0);

    wait_for(|| async {
        let resp: ProcessListResponse = client()
            .get(TestStarter::url(port, "/process"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        resp.servers_started
    })
    .await;

    leader2.stop().await;
    drop(keep);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn re_hello_with_the_same_id_is_idempotent() {
    let port = free_port();
    let leader = TestStarter::leader("A", 3, port).await;

    let body = serde_json::json!({
        "SlaveID": "B",
        "SlaveAddress": "127.0.0.1",
        "SlavePort": port,
        "DataDir": "/data/b",
    });
    for _ in 0..2 {
        let resp = client()
            .post(TestStarter::url(port, "/hello"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let peers = fetch_peers(port).await;
    assert_eq!(peers.peers.len(), 2);
    let offsets: Vec<u16> = peers.peers.iter().map(|p| p.port_offset).collect();
    assert_eq!(offsets, vec![0, 5]);

    leader.stop().await;
}
