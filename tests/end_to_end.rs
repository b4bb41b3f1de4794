//! Client and storage peer flows against a running controller

mod common;

use common::{start_controller, store_targets, wait_for_peers, LineConn};
use std::time::Duration;

#[tokio::test]
async fn test_store_load_remove_lifecycle() {
    let (addr, cluster) = start_controller(2, 10_000).await;
    let mut peers = vec![
        LineConn::join(addr, 1).await,
        LineConn::join(addr, 2).await,
        LineConn::join(addr, 3).await,
    ];
    wait_for_peers(&cluster, 3).await;

    let mut client = LineConn::connect(addr).await;
    let targets = store_targets(&client.request("STORE report.txt 42").await);
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1]);

    // not visible while the store is in flight
    assert_eq!(client.request("LIST").await, "LIST");
    assert_eq!(
        client.request("LOAD report.txt").await,
        "ERROR_FILE_DOES_NOT_EXIST"
    );

    for id in &targets {
        peers[*id as usize - 1]
            .send("STORE_ACK report.txt")
            .await;
    }
    assert_eq!(client.recv().await, "STORE_COMPLETE");
    assert_eq!(client.recv_within(Duration::from_millis(200)).await, None);

    assert_eq!(client.request("LIST").await, "LIST report.txt");
    assert_eq!(
        client.request("LOAD report.txt").await,
        format!("LOAD_FROM {} 42", targets[0])
    );
    assert_eq!(
        client.request("RELOAD report.txt").await,
        format!("LOAD_FROM {} 42", targets[1])
    );
    assert_eq!(client.request("RELOAD report.txt").await, "ERROR_LOAD");
    assert_eq!(client.request("RELOAD report.txt").await, "ERROR_LOAD");

    // a fresh LOAD starts over
    assert_eq!(
        client.request("LOAD report.txt").await,
        format!("LOAD_FROM {} 42", targets[0])
    );

    client.send("REMOVE report.txt").await;
    for id in &targets {
        let peer = &mut peers[*id as usize - 1];
        assert_eq!(peer.recv().await, "REMOVE report.txt");
        peer.send("REMOVE_ACK report.txt").await;
    }
    assert_eq!(client.recv().await, "REMOVE_COMPLETE");
    assert_eq!(client.request("LIST").await, "LIST");
    assert_eq!(
        client.request("REMOVE report.txt").await,
        "ERROR_FILE_DOES_NOT_EXIST"
    );
}

#[tokio::test]
async fn test_requests_refused_without_enough_peers() {
    let (addr, cluster) = start_controller(2, 10_000).await;
    let _peer = LineConn::join(addr, 7).await;
    wait_for_peers(&cluster, 1).await;

    let mut client = LineConn::connect(addr).await;
    assert_eq!(
        client.request("STORE a.txt 1").await,
        "ERROR_NOT_ENOUGH_DSTORES"
    );
    assert_eq!(client.request("LOAD a.txt").await, "ERROR_NOT_ENOUGH_DSTORES");
    assert_eq!(client.request("LIST").await, "ERROR_NOT_ENOUGH_DSTORES");
}

#[tokio::test]
async fn test_concurrent_store_of_same_name() {
    let (addr, cluster) = start_controller(1, 10_000).await;
    let _peer = LineConn::join(addr, 1).await;
    wait_for_peers(&cluster, 1).await;

    let mut first = LineConn::connect(addr).await;
    let mut second = LineConn::connect(addr).await;
    assert_eq!(first.request("STORE dup.bin 8").await, "STORE_TO 1");
    assert_eq!(
        second.request("STORE dup.bin 8").await,
        "ERROR_FILE_ALREADY_EXISTS"
    );
}

#[tokio::test]
async fn test_malformed_lines_are_ignored() {
    let (addr, cluster) = start_controller(1, 10_000).await;
    let mut peer = LineConn::join(addr, 4).await;
    wait_for_peers(&cluster, 1).await;

    let mut client = LineConn::connect(addr).await;
    client.send("FROBNICATE").await;
    client.send("STORE missing-size").await;
    assert_eq!(client.request("STORE ok.txt 3").await, "STORE_TO 4");

    peer.send("GARBAGE").await;
    peer.send("STORE_ACK ok.txt").await;
    assert_eq!(client.recv().await, "STORE_COMPLETE");
}

#[tokio::test]
async fn test_duplicate_join_is_refused() {
    let (addr, cluster) = start_controller(1, 10_000).await;
    let _first = LineConn::join(addr, 9).await;
    wait_for_peers(&cluster, 1).await;

    let mut second = LineConn::join(addr, 9).await;
    // controller closes the impostor's connection
    assert_eq!(second.recv_within(Duration::from_secs(2)).await, None);
    assert_eq!(cluster.live_peers().await, 1);
}

#[tokio::test]
async fn test_storing_client_released_after_half_close() {
    let (addr, cluster) = start_controller(1, 10_000).await;
    let mut peer = LineConn::join(addr, 1).await;
    wait_for_peers(&cluster, 1).await;

    let mut client = LineConn::connect(addr).await;
    assert_eq!(client.request("STORE kept.txt 3").await, "STORE_TO 1");
    peer.send("STORE_ACK kept.txt").await;
    assert_eq!(client.recv().await, "STORE_COMPLETE");

    client.finish().await;
    assert!(client.closed_within(Duration::from_secs(2)).await);
    assert_eq!(cluster.lock().await.index.list(), vec!["kept.txt"]);
}

#[tokio::test]
async fn test_long_filename_is_answered() {
    let (addr, cluster) = start_controller(1, 10_000).await;
    let _peer = LineConn::join(addr, 1).await;
    wait_for_peers(&cluster, 1).await;

    let mut client = LineConn::connect(addr).await;
    let name = "x".repeat(300);
    assert_eq!(
        client.request(&format!("STORE {} 5", name)).await,
        "STORE_TO 1"
    );
}

#[tokio::test]
async fn test_undecodable_line_keeps_connection() {
    let (addr, cluster) = start_controller(1, 10_000).await;
    let _peer = LineConn::join(addr, 1).await;
    wait_for_peers(&cluster, 1).await;

    let mut client = LineConn::connect(addr).await;
    client.send_raw(b"\xff\xfe\n").await;
    assert_eq!(client.request("LIST").await, "LIST");
}
