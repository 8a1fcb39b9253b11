use std::num::NonZeroU32;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;
use crate::value::Value;

/// Drives the server side of a handshake plus one method-call/method-return
/// exchange over an in-memory duplex pipe, so the framing logic can be
/// exercised without a real bus.
async fn fake_server(mut server: tokio::io::DuplexStream) {
    let mut buf = vec![0u8; 1];
    server.read_exact(&mut buf).await.unwrap(); // leading NUL

    let mut line = Vec::new();
    read_line(&mut server, &mut line).await;
    assert!(String::from_utf8_lossy(&line).starts_with("AUTH EXTERNAL "));

    server.write_all(b"OK 0123456789abcdef\r\n").await.unwrap();

    let mut line = Vec::new();
    read_line(&mut server, &mut line).await;
    assert_eq!(line, b"BEGIN");

    let prefix = read_exact_vec(&mut server, 16).await;
    let body_length = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
    let headers = u32::from_le_bytes(prefix[12..16].try_into().unwrap());
    let rest_len = crate::message::header_and_body_len(headers, body_length).unwrap();
    let rest = read_exact_vec(&mut server, rest_len).await;

    let mut frame = prefix;
    frame.extend_from_slice(&rest);
    let call =
        crate::message::unmarshall_message(&frame, &crate::unmarshal::UnmarshallOptions::default())
            .unwrap();

    let reply = crate::message::Message::method_return(call.serial, NonZeroU32::new(1).unwrap())
        .with_body("s", vec![Value::Str("pong".into())]);
    let bytes = crate::message::marshall_message(&reply).unwrap();
    server.write_all(&bytes).await.unwrap();
}

async fn read_line(stream: &mut tokio::io::DuplexStream, out: &mut Vec<u8>) {
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        if byte[0] == b'\n' {
            if out.last() == Some(&b'\r') {
                out.pop();
            }
            return;
        }
        out.push(byte[0]);
    }
}

async fn read_exact_vec(stream: &mut tokio::io::DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn handshakes_and_round_trips_a_method_call() {
    let (client, server) = tokio::io::duplex(16 * 1024);

    let server_task = tokio::spawn(fake_server(server));

    let mut conn = Connection::from_stream(client, &[Mechanism::External])
        .await
        .unwrap();

    let call = crate::message::Message::method_call("/a", "Ping", NonZeroU32::new(1).unwrap())
        .with_interface("org.example.Echo");
    conn.send_message(&call).await.unwrap();

    let reply = conn.recv_message().await.unwrap();
    assert_eq!(reply.body, vec![Value::Str("pong".into())]);

    server_task.await.unwrap();
}

async fn handshake_only(server: &mut tokio::io::DuplexStream) {
    let mut buf = vec![0u8; 1];
    server.read_exact(&mut buf).await.unwrap();
    let mut line = Vec::new();
    read_line(server, &mut line).await;
    server.write_all(b"OK 0123456789abcdef\r\n").await.unwrap();
    let mut line = Vec::new();
    read_line(server, &mut line).await;
    assert_eq!(line, b"BEGIN");
}

#[tokio::test]
async fn recv_reports_short_read_on_truncated_frame() {
    let (client, mut server) = tokio::io::duplex(16 * 1024);
    let server_task = tokio::spawn(async move {
        handshake_only(&mut server).await;
        let reply = crate::message::Message::method_return(
            NonZeroU32::new(1).unwrap(),
            NonZeroU32::new(1).unwrap(),
        )
        .with_body("s", vec![Value::Str("pong".into())]);
        let bytes = crate::message::marshall_message(&reply).unwrap();
        server.write_all(&bytes[..bytes.len() - 2]).await.unwrap();
        // dropping `server` here closes the pipe mid-frame
    });

    let mut conn = Connection::from_stream(client, &[Mechanism::External])
        .await
        .unwrap();

    let err = conn.recv_message().await.unwrap_err();
    assert!(matches!(err, Error::ShortRead(_)), "expected ShortRead, got {err:?}");

    server_task.await.unwrap();
}

#[tokio::test]
async fn recv_reports_connection_closed_between_frames() {
    let (client, mut server) = tokio::io::duplex(16 * 1024);
    let server_task = tokio::spawn(async move {
        handshake_only(&mut server).await;
        // close with no bytes of a next frame sent at all
    });

    let mut conn = Connection::from_stream(client, &[Mechanism::External])
        .await
        .unwrap();

    let err = conn.recv_message().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed), "expected ConnectionClosed, got {err:?}");

    server_task.await.unwrap();
}
