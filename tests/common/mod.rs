//! Shared helpers for controller integration tests

#![allow(dead_code)]

use minidfs::common::PeerRequest;
use minidfs::coordinator::cluster::Cluster;
use minidfs::{Config, Controller};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub const REPLY_WAIT: Duration = Duration::from_secs(3);

/// Start a controller on an ephemeral port with rebalancing effectively off.
pub async fn start_controller(replication_factor: usize, timeout_ms: u64) -> (SocketAddr, Arc<Cluster>) {
    let config = Config {
        port: 0,
        bind_host: "127.0.0.1".into(),
        replication_factor,
        timeout_ms,
        rebalance_period_secs: 3600,
        ..Default::default()
    };
    let controller = Controller::bind(&config).await.unwrap();
    let addr = controller.local_addr().unwrap();
    let cluster = controller.cluster();
    tokio::spawn(controller.serve());
    (addr, cluster)
}

/// Poll until the controller sees exactly `expected` live peers.
pub async fn wait_for_peers(cluster: &Cluster, expected: usize) {
    let deadline = tokio::time::Instant::now() + REPLY_WAIT;
    loop {
        if cluster.live_peers().await == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {} live peers, have {}",
            expected,
            cluster.live_peers().await
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Raw line connection, used for clients and scripted peers
pub struct LineConn {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl LineConn {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        }
    }

    /// Connect and announce as storage peer `id`.
    pub async fn join(addr: SocketAddr, id: u32) -> Self {
        let mut conn = Self::connect(addr).await;
        conn.send(&format!("JOIN {}", id)).await;
        conn
    }

    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Half-close: no more requests from this side.
    pub async fn finish(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    /// Did the controller close its side within `wait`?
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        matches!(
            tokio::time::timeout(wait, self.lines.next_line()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }

    pub async fn recv(&mut self) -> String {
        self.recv_within(REPLY_WAIT)
            .await
            .expect("no line before deadline")
    }

    /// Next line, or `None` if nothing arrives within `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<String> {
        match tokio::time::timeout(wait, self.lines.next_line()).await {
            Ok(line) => line.unwrap(),
            Err(_) => None,
        }
    }

    /// Send a request and wait for its reply.
    pub async fn request(&mut self, line: &str) -> String {
        self.send(line).await;
        self.recv().await
    }
}

/// Parse `STORE_TO id...` into peer ids.
pub fn store_targets(reply: &str) -> Vec<u32> {
    let mut tokens = reply.split_whitespace();
    assert_eq!(tokens.next(), Some("STORE_TO"), "unexpected reply {}", reply);
    tokens.map(|t| t.parse().unwrap()).collect()
}

/// Requests an [`AutoPeer`] leaves unanswered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quirk {
    None,
    IgnoreList,
    IgnoreRebalance,
}

/// Storage peer that answers LIST, REBALANCE and REMOVE on its own.
pub struct AutoPeer {
    pub id: u32,
    files: Arc<Mutex<BTreeSet<String>>>,
    out: mpsc::UnboundedSender<String>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl AutoPeer {
    pub async fn join(addr: SocketAddr, id: u32) -> Self {
        Self::join_with(addr, id, Quirk::None).await
    }

    pub async fn join_with(addr: SocketAddr, id: u32, quirk: Quirk) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let files = Arc::new(Mutex::new(BTreeSet::new()));
        let (out, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half
                    .write_all(format!("{}\n", line).as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let reader = {
            let files = files.clone();
            let out = out.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let reply = match line.parse::<PeerRequest>().unwrap() {
                        PeerRequest::List if quirk == Quirk::IgnoreList => continue,
                        PeerRequest::Rebalance(_) if quirk == Quirk::IgnoreRebalance => continue,
                        PeerRequest::List => {
                            let held = files.lock().unwrap();
                            std::iter::once("LIST".to_string())
                                .chain(held.iter().cloned())
                                .collect::<Vec<_>>()
                                .join(" ")
                        }
                        PeerRequest::Remove(filename) => {
                            files.lock().unwrap().remove(&filename);
                            format!("REMOVE_ACK {}", filename)
                        }
                        PeerRequest::Rebalance(instruction) => {
                            let mut held = files.lock().unwrap();
                            for fetch in instruction.fetch {
                                held.insert(fetch.filename);
                            }
                            for filename in instruction.drop {
                                held.remove(&filename);
                            }
                            "REBALANCE_COMPLETE".to_string()
                        }
                    };
                    if out.send(reply).is_err() {
                        break;
                    }
                }
            })
        };

        out.send(format!("JOIN {}", id)).unwrap();
        Self {
            id,
            files,
            out,
            tasks: vec![writer, reader],
        }
    }

    /// Pretend a client uploaded `filename` here.
    pub fn store(&self, filename: &str) {
        self.files.lock().unwrap().insert(filename.to_string());
        self.out.send(format!("STORE_ACK {}", filename)).unwrap();
    }

    /// Put a file on disk without telling the controller.
    pub fn plant(&self, filename: &str) {
        self.files.lock().unwrap().insert(filename.to_string());
    }

    /// Lose a file behind the controller's back.
    pub fn lose(&self, filename: &str) {
        self.files.lock().unwrap().remove(filename);
    }

    pub fn files(&self) -> BTreeSet<String> {
        self.files.lock().unwrap().clone()
    }

    /// Drop the connection.
    pub fn kill(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}
