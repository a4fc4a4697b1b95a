//! Framing tests over a live transport.
//!
//! The codec's unit tests work on byte buffers; these drive it through
//! `Framed` on an in-memory duplex the way the connection tasks do,
//! covering the asymmetric probe tag and the size cap.

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Framed;

use judge_bridge::codec::{CodecError, PacketCodec, MAX_FRAME_BYTES};

#[tokio::test]
async fn probe_tag_then_frames_in_both_directions() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    client_io.write_all(b"cl01").await.unwrap();
    let mut client = Framed::new(client_io, PacketCodec::client());
    let mut server = Framed::new(server_io, PacketCodec::new());

    client
        .send(r#"{"name":"handshake","id":"j1"}"#.to_string())
        .await
        .unwrap();
    let inbound = server.next().await.unwrap().unwrap();
    assert_eq!(inbound, r#"{"name":"handshake","id":"j1"}"#);
    assert_eq!(server.codec().initial_tag(), Some(*b"cl01"));
    assert!(server.codec().saw_packet());

    // The reply carries no tag; the client codec must not skip one.
    server
        .send(r#"{"name":"handshake-success"}"#.to_string())
        .await
        .unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply, r#"{"name":"handshake-success"}"#);
}

#[tokio::test]
async fn several_frames_queue_up_and_decode_in_order() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    client_io.write_all(b"cl01").await.unwrap();
    let mut client = Framed::new(client_io, PacketCodec::client());
    let mut server = Framed::new(server_io, PacketCodec::new());

    for i in 0..3 {
        client.send(format!(r#"{{"seq":{i}}}"#)).await.unwrap();
    }
    for i in 0..3 {
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame, format!(r#"{{"seq":{i}}}"#));
    }
}

#[tokio::test]
async fn oversized_length_prefix_is_fatal() {
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    client_io.write_all(b"cl01").await.unwrap();
    let oversized = (MAX_FRAME_BYTES as u32) + 1;
    client_io.write_all(&oversized.to_be_bytes()).await.unwrap();

    let mut server = Framed::new(server_io, PacketCodec::new());
    match server.next().await {
        Some(Err(CodecError::FrameTooLarge { size })) => {
            assert_eq!(size, oversized as usize);
        }
        other => panic!("expected a size cap error, got {other:?}"),
    }
}
