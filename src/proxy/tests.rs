use std::num::NonZeroU32;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::*;
use crate::sasl::Mechanism;
use crate::session::SessionBuilder;

#[test]
fn join_child_path_handles_the_root_path() {
    assert_eq!(join_child_path("/", "child"), "/child");
}

#[test]
fn join_child_path_appends_under_a_non_root_parent() {
    assert_eq!(join_child_path("/a", "b"), "/a/b");
}

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

const PARENT_NODE_XML: &str = r#"<node><node name="child"/></node>"#;
const CHILD_NODE_XML: &str = r#"
<node>
  <interface name="org.example.Thing">
    <method name="Echo">
      <arg name="input" type="s" direction="in"/>
    </method>
  </interface>
</node>
"#;

/// Replies `Introspect` calls against `/a` with a single-child forwarding
/// node and against `/a/child` with the real interface, then exits.
async fn fake_introspectable_broker(mut stream: tokio::net::TcpStream) {
    let mut nul = [0u8; 1];
    stream.read_exact(&mut nul).await.unwrap();
    let _ = read_sasl_line(&mut stream).await;
    stream.write_all(b"OK 0123456789abcdef\r\n").await.unwrap();
    let begin = read_sasl_line(&mut stream).await;
    assert_eq!(begin, b"BEGIN");

    for _ in 0..2 {
        let mut prefix = [0u8; 16];
        stream.read_exact(&mut prefix).await.unwrap();
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
        assert_eq!(call.member.as_deref(), Some("Introspect"));

        let xml = match call.path.as_deref() {
            Some("/a") => PARENT_NODE_XML,
            Some("/a/child") => CHILD_NODE_XML,
            other => panic!("unexpected introspect path: {other:?}"),
        };

        let reply = Message::method_return(call.serial, NonZeroU32::new(1).unwrap())
            .with_body("s", vec![Value::Str(xml.to_string())]);
        let bytes = crate::message::marshall_message(&reply).unwrap();
        stream.write_all(&bytes).await.unwrap();
    }
}

#[tokio::test]
async fn introspect_interfaces_recurses_through_a_single_child_node() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server_task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        fake_introspectable_broker(stream).await;
    });

    let handle = SessionBuilder::new()
        .direct_peer(true)
        .mechanisms(vec![Mechanism::External])
        .bus_address(format!("tcp:host=127.0.0.1,port={port}"))
        .connect_session_bus()
        .await
        .unwrap();

    let proxy = Proxy::new(handle, "org.example.Service", "/a");
    let interfaces = proxy.introspect_interfaces().await.unwrap();

    assert_eq!(interfaces.len(), 1);
    let child_proxy = interfaces.get("org.example.Thing").unwrap();
    assert_eq!(child_proxy.path(), "/a/child");

    server_task.await.unwrap();
}
