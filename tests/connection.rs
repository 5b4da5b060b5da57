//! End-to-end scenarios driving a [`weerelay::Relay`] against an in-memory
//! duplex stream standing in for a live relay socket.

#![cfg(feature = "tokio")]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use weerelay::{connection::ConnectionState, RelayConfig, Relay};

const HEADER_LEN: usize = 5;

/// Builds one uncompressed frame: a `str` identifier (or no identifier)
/// followed by raw already-encoded object bytes.
fn frame(identifier: Option<&str>, objects: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    match identifier {
        Some(id) => {
            payload.extend_from_slice(&(id.len() as i32).to_be_bytes());
            payload.extend_from_slice(id.as_bytes());
        }
        None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
    }
    payload.extend_from_slice(objects);

    let total_len = (HEADER_LEN + payload.len()) as i32;
    let mut out = Vec::new();
    out.extend_from_slice(&total_len.to_be_bytes());
    out.push(0); // uncompressed
    out.extend_from_slice(&payload);
    out
}

/// Encodes a `str` object (tag + 4-byte length + bytes).
fn str_object(value: &str) -> Vec<u8> {
    let mut out = b"str".to_vec();
    out.extend_from_slice(&(value.len() as i32).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    out
}

/// A `_pong` event frame carrying the given reply text (`"<hex-id>"` or
/// `"<hex-id> <text>"`).
fn pong_frame(reply: &str) -> Vec<u8> {
    frame(Some("_pong"), &str_object(reply))
}

/// Buffers partial reads from the peer side of the duplex so that two
/// commands written back-to-back by the write queue, and coalesced into
/// one readable chunk, are still split into distinct lines.
struct PeerHalf {
    stream: DuplexStream,
    buffered: Vec<u8>,
}

impl PeerHalf {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buffered: Vec::new(),
        }
    }

    async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buffered.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buffered.drain(..=pos).collect();
                return String::from_utf8(line).unwrap();
            }
            let mut chunk = [0u8; 256];
            let n = self.stream.read(&mut chunk).await.unwrap();
            self.buffered.extend_from_slice(&chunk[..n]);
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

async fn with_relay<F, Fut>(test: F)
where
    F: FnOnce(Relay<DuplexStream>, PeerHalf) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let (client_side, peer) = tokio::io::duplex(4096);
    let relay = Relay::new(client_side, RelayConfig::default());
    test(relay, PeerHalf::new(peer)).await;
}

#[tokio::test]
async fn handshake_with_password() {
    with_relay(|relay, mut peer| async move {
        relay.set_password("s3cret");

        let relay_task = tokio::spawn(async move { relay.init(None).await.map(|_| relay) });

        let init_line = peer.read_line().await;
        assert_eq!(init_line, "init password=s3cret\n");

        let ping_line = peer.read_line().await;
        assert_eq!(ping_line, "ping 1\n");

        peer.write_all(&pong_frame("1")).await;

        let relay = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .expect("init timed out")
            .unwrap()
            .expect("init failed");

        assert_eq!(relay.state(), ConnectionState::Ready);
    })
    .await;
}

#[tokio::test]
async fn ping_with_text() {
    with_relay(|relay, mut peer| async move {
        bring_up(&relay, &mut peer).await;

        let relay_task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.ping(Some("hello"), None).await }
        });

        let ping_line = peer.read_line().await;
        assert_eq!(ping_line, "ping 2 hello\n");
        peer.write_all(&pong_frame("2 hello")).await;

        let echoed = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(echoed, "hello");
    })
    .await;
}

#[tokio::test]
async fn ping_without_text() {
    with_relay(|relay, mut peer| async move {
        bring_up(&relay, &mut peer).await;

        let relay_task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.ping(None, None).await }
        });

        let ping_line = peer.read_line().await;
        assert_eq!(ping_line, "ping 2\n");
        peer.write_all(&pong_frame("2")).await;

        let echoed = tokio::time::timeout(Duration::from_secs(1), relay_task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(echoed, "");
    })
    .await;
}

#[tokio::test]
async fn unsolicited_event_invokes_handler_once() {
    with_relay(|relay, mut peer| async move {
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        relay.register_event_handler("_buffer_opened", move |_message| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        bring_up(&relay, &mut peer).await;

        // One `hda` object with an empty hpath/keys/items, just enough to
        // exercise the event-handler path without asserting on payload
        // shape.
        let mut hda = b"hda".to_vec();
        hda.extend_from_slice(&0i32.to_be_bytes()); // hpath length
        hda.extend_from_slice(&0i32.to_be_bytes()); // keys length
        hda.extend_from_slice(&0u32.to_be_bytes()); // item count

        peer.write_all(&frame(Some("_buffer_opened"), &hda)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    })
    .await;
}

#[tokio::test]
async fn stale_pong_is_not_fatal() {
    with_relay(|relay, mut peer| async move {
        bring_up(&relay, &mut peer).await;

        peer.write_all(&pong_frame("ff")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(relay.state(), ConnectionState::Ready);
    })
    .await;
}

#[tokio::test]
async fn truncated_frame_terminates_the_connection() {
    with_relay(|relay, mut peer| async move {
        bring_up(&relay, &mut peer).await;

        let pending = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.ping(None, None).await })
        };
        let _ = peer.read_line().await;

        // Declares an `arr` of `int` with count 3 but only 8 bytes follow.
        let mut malformed = b"arr".to_vec();
        malformed.extend_from_slice(b"int");
        malformed.extend_from_slice(&3i32.to_be_bytes());
        malformed.extend_from_slice(&[0u8; 8]);

        peer.write_all(&frame(None, &malformed)).await;

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(weerelay::RelayError::Cancelled)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(relay.state(), ConnectionState::Terminated);
    })
    .await;
}

/// Drives the handshake to `Ready` without asserting on its wire traffic,
/// for scenarios that only care about post-handshake behavior.
async fn bring_up(relay: &Relay<DuplexStream>, peer: &mut PeerHalf) {
    let relay_task = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.init(None).await })
    };

    let _init_line = peer.read_line().await;
    let _ping_line = peer.read_line().await;
    peer.write_all(&pong_frame("1")).await;

    tokio::time::timeout(Duration::from_secs(1), relay_task)
        .await
        .expect("init timed out")
        .unwrap()
        .expect("init failed");
}
