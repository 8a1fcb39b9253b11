use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::*;

fn serial() -> NonZeroU32 {
    NonZeroU32::new(1).unwrap()
}

#[test]
fn match_key_renders_only_the_fields_that_are_set() {
    let key = MatchKey {
        path: Some("/org/example/Thing".into()),
        interface: None,
        member: Some("Changed".into()),
    };
    assert_eq!(
        key.to_match_rule(),
        "type='signal',path='/org/example/Thing',member='Changed'"
    );
}

#[test]
fn match_key_wildcard_fields_match_anything() {
    let key = MatchKey { path: None, interface: None, member: Some("Changed".into()) };

    let msg = Message::signal("/a", "org.example.Thing", "Changed", serial());
    assert!(key.matches(&msg));

    let other = Message::signal("/a", "org.example.Thing", "Other", serial());
    assert!(!key.matches(&other));
}

#[test]
fn match_key_requires_every_set_field_to_match() {
    let key = MatchKey {
        path: Some("/a".into()),
        interface: Some("org.example.Thing".into()),
        member: Some("Changed".into()),
    };

    let msg = Message::signal("/b", "org.example.Thing", "Changed", serial());
    assert!(!key.matches(&msg));
}

#[test]
fn session_builder_defaults_decode_byte_arrays_as_buffers() {
    let builder = SessionBuilder::new();
    assert!(builder.byte_arrays_as_buffers);
    assert!(!builder.preserve_large_integers);
    assert!(!builder.direct_peer);
}

#[test]
fn session_builder_overrides_are_recorded() {
    let builder = SessionBuilder::new()
        .byte_arrays_as_buffers(false)
        .preserve_large_integers(true)
        .direct_peer(true)
        .bus_address("unix:path=/tmp/test-bus");

    assert!(!builder.byte_arrays_as_buffers);
    assert!(builder.preserve_large_integers);
    assert!(builder.direct_peer);
    assert_eq!(builder.bus_address.as_deref(), Some("unix:path=/tmp/test-bus"));
}

#[test]
fn request_name_reply_decodes_every_broker_code() {
    assert_eq!(RequestNameReply::from_code(1).unwrap(), RequestNameReply::PrimaryOwner);
    assert_eq!(RequestNameReply::from_code(2).unwrap(), RequestNameReply::InQueue);
    assert_eq!(RequestNameReply::from_code(3).unwrap(), RequestNameReply::Exists);
    assert_eq!(RequestNameReply::from_code(4).unwrap(), RequestNameReply::AlreadyOwner);
    assert!(RequestNameReply::from_code(5).is_err());
}

#[test]
fn release_name_reply_decodes_every_broker_code() {
    assert_eq!(ReleaseNameReply::from_code(1).unwrap(), ReleaseNameReply::Released);
    assert_eq!(ReleaseNameReply::from_code(2).unwrap(), ReleaseNameReply::NonExistent);
    assert_eq!(ReleaseNameReply::from_code(3).unwrap(), ReleaseNameReply::NotOwner);
    assert!(ReleaseNameReply::from_code(4).is_err());
}

/// Reads one SASL line (without the trailing CRLF) from `stream`.
async fn read_sasl_line(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return line;
        }
        line.push(byte[0]);
    }
}

/// A minimal fake broker: completes the SASL handshake, then replies
/// `method_return` to every call it receives and tallies `AddMatch` /
/// `RemoveMatch` calls into the shared counters.
async fn fake_broker(
    mut stream: tokio::net::TcpStream,
    add_match_calls: Arc<AtomicUsize>,
    remove_match_calls: Arc<AtomicUsize>,
) {
    let mut nul = [0u8; 1];
    stream.read_exact(&mut nul).await.unwrap();
    let _ = read_sasl_line(&mut stream).await;
    stream.write_all(b"OK 0123456789abcdef\r\n").await.unwrap();
    let begin = read_sasl_line(&mut stream).await;
    assert_eq!(begin, b"BEGIN");

    loop {
        let mut prefix = [0u8; 16];
        if stream.read_exact(&mut prefix).await.is_err() {
            return;
        }
        let body_length = u32::from_le_bytes(prefix[4..8].try_into().unwrap());
        let headers = u32::from_le_bytes(prefix[12..16].try_into().unwrap());
        let rest_len = crate::message::header_and_body_len(headers, body_length).unwrap();
        let mut rest = vec![0u8; rest_len];
        stream.read_exact(&mut rest).await.unwrap();

        let mut frame = prefix.to_vec();
        frame.extend_from_slice(&rest);
        let call =
            crate::message::unmarshall_message(&frame, &crate::unmarshal::UnmarshallOptions::default())
                .unwrap();

        match call.member.as_deref() {
            Some("AddMatch") => {
                add_match_calls.fetch_add(1, AtomicOrdering::SeqCst);
            }
            Some("RemoveMatch") => {
                remove_match_calls.fetch_add(1, AtomicOrdering::SeqCst);
            }
            _ => {}
        }

        let reply = Message::method_return(call.serial, NonZeroU32::new(1).unwrap());
        let bytes = crate::message::marshall_message(&reply).unwrap();
        stream.write_all(&bytes).await.unwrap();
    }
}

#[tokio::test]
async fn add_match_and_remove_match_are_refcounted_across_subscribers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let add_match_calls = Arc::new(AtomicUsize::new(0));
    let remove_match_calls = Arc::new(AtomicUsize::new(0));

    let server_add = add_match_calls.clone();
    let server_remove = remove_match_calls.clone();
    let server_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        fake_broker(stream, server_add, server_remove).await;
    });

    let handle = SessionBuilder::new()
        .direct_peer(true)
        .mechanisms(vec![Mechanism::External])
        .connect(vec![address::Address::Tcp { host: "127.0.0.1".into(), port }])
        .await
        .unwrap();

    let first = handle
        .subscribe(None, None, Some("Changed".into()))
        .await
        .unwrap();
    let second = handle
        .subscribe(None, None, Some("Changed".into()))
        .await
        .unwrap();
    let third = handle
        .subscribe(None, None, Some("Changed".into()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(add_match_calls.load(AtomicOrdering::SeqCst), 1);

    drop(first);
    drop(second);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(remove_match_calls.load(AtomicOrdering::SeqCst), 0);

    drop(third);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(remove_match_calls.load(AtomicOrdering::SeqCst), 1);

    drop(handle);
    let _ = server_task.await;
}
