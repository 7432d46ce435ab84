//! Integration tests for the Go-Back-N data path.
//!
//! Client and server share an in-process relay; the simulator drops or
//! corrupts inbound segments on both sides with a fixed seed.

mod common;

use std::time::Duration;

use common::{fast_config, lossy, payload, Pair, SERVER_NODE};
use srt_overlay::config::SrtConfig;
use srt_overlay::connection::TransportError;
use srt_overlay::state::ServerState;

const LIMIT: Duration = Duration::from_secs(20);

/// Retry budgets wide enough that a seeded loss run always gets through.
fn patient(mut config: SrtConfig) -> SrtConfig {
    config.syn_max_retry = 20;
    config.fin_max_retry = 20;
    config
}

async fn connected(pair: &Pair) -> (usize, usize) {
    let ssock = pair.server.sock(88).unwrap();
    let csock = pair.client.sock(87).unwrap();
    let (accepted, connected) = tokio::join!(pair.server.accept(ssock), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        pair.client.connect(csock, SERVER_NODE, 88).await
    });
    accepted.expect("accept");
    connected.expect("connect");
    (csock, ssock)
}

/// Send `data`, wait for every ACK, and read it back at the server.
async fn transfer(pair: &Pair, csock: usize, ssock: usize, data: &[u8]) -> Vec<u8> {
    let sending = async {
        pair.client.send(csock, data).await.expect("send");
        pair.client.flush(csock).await.expect("flush");
        assert_eq!(pair.client.pending(csock).unwrap(), 0);
    };
    let (received, ()) = tokio::join!(pair.server.recv(ssock, data.len()), sending);
    received.expect("recv")
}

// ---------------------------------------------------------------------------
// Lossless
// ---------------------------------------------------------------------------

#[tokio::test]
async fn small_message_arrives_intact() {
    let pair = Pair::new(fast_config(), fast_config());
    let (csock, ssock) = connected(&pair).await;

    let got = transfer(&pair, csock, ssock, b"Ping!").await;
    assert_eq!(got, b"Ping!");
}

#[tokio::test]
async fn stream_is_split_into_segments_and_reassembled() {
    let mut config = fast_config();
    config.max_seg_len = 100;
    config.gbn_window = 3;
    let pair = Pair::new(config.clone(), config);
    let (csock, ssock) = connected(&pair).await;

    let data = payload(1_050);
    let got = tokio::time::timeout(LIMIT, transfer(&pair, csock, ssock, &data))
        .await
        .expect("transfer timed out");
    assert_eq!(got, data);

    let stats = pair.server.stats(ssock).await.unwrap();
    assert_eq!(stats.buffered, 0);
    assert_eq!(stats.overflowed, 0);
}

#[tokio::test]
async fn several_sends_read_back_in_pieces() {
    let pair = Pair::new(fast_config(), fast_config());
    let (csock, ssock) = connected(&pair).await;

    pair.client.send(csock, b"hello ").await.unwrap();
    pair.client.send(csock, b"overlay ").await.unwrap();
    pair.client.send(csock, b"world").await.unwrap();
    pair.client.flush(csock).await.unwrap();

    assert_eq!(pair.server.recv(ssock, 6).await.unwrap(), b"hello ");
    assert_eq!(pair.server.recv(ssock, 13).await.unwrap(), b"overlay world");
}

// ---------------------------------------------------------------------------
// Lossy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn window_of_two_survives_ten_percent_loss() {
    let mut config = patient(fast_config());
    config.max_seg_len = 1500;
    config.gbn_window = 2;
    let pair = Pair::new(lossy(config.clone(), 0.10, 11), lossy(config, 0.10, 12));
    let (csock, ssock) = connected(&pair).await;

    let data = payload(3_000);
    let got = tokio::time::timeout(LIMIT, transfer(&pair, csock, ssock, &data))
        .await
        .expect("transfer timed out");
    assert_eq!(got, data);

    assert_eq!(pair.client.pending(csock).unwrap(), 0);
    pair.client.disconnect(csock).await.expect("disconnect");
}

#[tokio::test]
async fn heavy_loss_still_delivers_in_order() {
    let mut config = patient(fast_config());
    config.max_seg_len = 256;
    config.gbn_window = 8;
    let pair = Pair::new(lossy(config.clone(), 0.25, 3), lossy(config, 0.25, 4));
    let (csock, ssock) = connected(&pair).await;

    let data = payload(20_000);
    let got = tokio::time::timeout(LIMIT, transfer(&pair, csock, ssock, &data))
        .await
        .expect("transfer timed out");
    assert_eq!(got, data);
}

// ---------------------------------------------------------------------------
// Receive-side limits and teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oversized_recv_is_rejected() {
    let mut config = fast_config();
    config.receive_buf_size = 1_000;
    let pair = Pair::new(config.clone(), config);
    let (_csock, ssock) = connected(&pair).await;

    assert!(matches!(
        pair.server.recv(ssock, 1_001).await,
        Err(TransportError::BadLength(1_001))
    ));
}

#[tokio::test]
async fn buffered_bytes_survive_the_client_fin() {
    let pair = Pair::new(fast_config(), fast_config());
    let (csock, ssock) = connected(&pair).await;

    pair.client.send(csock, b"last words").await.unwrap();
    pair.client.flush(csock).await.unwrap();
    pair.client.disconnect(csock).await.unwrap();
    assert_eq!(pair.server.state(ssock).unwrap(), ServerState::CloseWait);

    assert_eq!(pair.server.recv(ssock, 4).await.unwrap(), b"last");
    // More than is left can never arrive now.
    assert!(matches!(
        pair.server.recv(ssock, 100).await,
        Err(TransportError::Closed { wanted: 100, buffered: 6 })
    ));
    assert_eq!(pair.server.recv(ssock, 6).await.unwrap(), b" words");
}

#[tokio::test]
async fn recv_blocks_until_data_arrives() {
    let pair = Pair::new(fast_config(), fast_config());
    let (csock, ssock) = connected(&pair).await;

    let late = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        pair.client.send(csock, b"late").await.unwrap();
    };
    let (got, ()) = tokio::join!(pair.server.recv(ssock, 4), late);
    assert_eq!(got.unwrap(), b"late");
}
