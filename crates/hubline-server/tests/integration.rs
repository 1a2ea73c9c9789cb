//! End-to-end tests over real sockets: WebSocket, long-polling, and SSE.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use hubline_protocol::{
    Argument, Completion, HubMessage, HubProtocol, Invocation, JsonProtocol, MessagePackProtocol,
    NegotiateResponse, StreamItem,
};
use hubline_server::{Hub, HubBuilder, HubContext, HubError, HubOptions, HubServer, ServerConfig};

const TIMEOUT: Duration = Duration::from_secs(5);
const JSON_HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn chat_hub() -> Hub {
    HubBuilder::new("Chat", ())
        .method("Echo", |_, _, (text,): (String,)| async move { Ok(text) })
        .method("Send", |_, ctx: HubContext, (text,): (String,)| async move {
            let _ = ctx.others().send("Receive", &[json!(text)]);
            Ok(())
        })
        .method("JoinGroup", |_, ctx: HubContext, (group,): (String,)| async move {
            ctx.add_to_group(&group)?;
            Ok::<(), HubError>(())
        })
        .method(
            "SendToGroup",
            |_, ctx: HubContext, (group, text): (String, String)| async move {
                Ok(ctx.clients().group(&group).send("Receive", &[json!(text)]))
            },
        )
        .stream("Counter", |_, _, (n,): (u32,)| async move {
            Ok(async_stream::stream! {
                for i in 0..n {
                    yield i;
                }
            })
        })
        .build()
}

/// Boot a server on an auto-assigned port.
async fn boot() -> (SocketAddr, Arc<HubServer>) {
    let server = Arc::new(
        HubServer::new(ServerConfig::default(), HubOptions::default()).with_hub(chat_hub()),
    );
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

/// Open a WebSocket and complete the handshake for `protocol`.
async fn connect(addr: SocketAddr, protocol: &str) -> WsStream {
    let (mut ws, _) = connect_async(format!("ws://{addr}/chat")).await.unwrap();
    let handshake = format!("{{\"protocol\":\"{protocol}\",\"version\":1}}\u{1e}");
    ws.send(Message::text(handshake)).await.unwrap();
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply, b"{}\x1e");
    ws
}

async fn next_frame(ws: &mut WsStream) -> Vec<u8> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return text.as_str().as_bytes().to_vec(),
            Message::Binary(data) => return data.to_vec(),
            _ => {}
        }
    }
}

/// Next non-ping message, decoded with `protocol`.
async fn next_message(ws: &mut WsStream, protocol: &dyn HubProtocol) -> HubMessage {
    loop {
        let frame = next_frame(ws).await;
        for message in protocol.parse_messages(&frame).unwrap() {
            if message != HubMessage::Ping {
                return message;
            }
        }
    }
}

async fn invoke(ws: &mut WsStream, id: &str, target: &str, args: serde_json::Value) {
    let frame = json!({"type": 1, "invocationId": id, "target": target, "arguments": args});
    ws.send(Message::text(format!("{frame}\u{1e}"))).await.unwrap();
}

async fn expect_closed(ws: &mut WsStream) {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close") {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

async fn wait_for_connections(server: &HubServer, expected: usize) {
    timeout(TIMEOUT, async {
        while server.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

fn completion(id: &str, value: serde_json::Value) -> HubMessage {
    HubMessage::Completion(Completion::with_result(id, value))
}

#[tokio::test]
async fn websocket_echo_scenario() {
    let (addr, server) = boot().await;
    let mut ws = connect(addr, "json").await;

    ws.send(Message::text(
        "{\"type\":1,\"invocationId\":\"42\",\"target\":\"Echo\",\"arguments\":[\"hi\"]}\u{1e}",
    ))
    .await
    .unwrap();
    assert_eq!(
        next_frame(&mut ws).await,
        b"{\"type\":3,\"invocationId\":\"42\",\"result\":\"hi\"}\x1e"
    );
    assert_eq!(server.connection_count(), 1);

    server.shutdown().shutdown();
}

#[tokio::test]
async fn negotiate_over_http() {
    let (addr, server) = boot().await;
    let resp: NegotiateResponse = reqwest::Client::new()
        .post(format!("http://{addr}/chat/negotiate"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp.negotiate_version, 0);
    assert_eq!(resp.available_transports.len(), 3);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn unknown_protocol_gets_error_reply() {
    let (addr, server) = boot().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/chat")).await.unwrap();
    ws.send(Message::text("{\"protocol\":\"xml\",\"version\":1}\u{1e}"))
        .await
        .unwrap();
    let reply = next_frame(&mut ws).await;
    let response = hubline_protocol::handshake::parse_response(&reply).unwrap();
    assert!(response.error.is_some());
    expect_closed(&mut ws).await;
    assert_eq!(server.connection_count(), 0);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn unknown_target_drops_only_that_connection() {
    let (addr, server) = boot().await;
    let mut bad = connect(addr, "json").await;
    let mut good = connect(addr, "json").await;
    wait_for_connections(&server, 2).await;

    invoke(&mut bad, "1", "DoesNotExist", json!([])).await;
    expect_closed(&mut bad).await;
    wait_for_connections(&server, 1).await;

    invoke(&mut good, "2", "Echo", json!(["still here"])).await;
    assert_eq!(
        next_message(&mut good, &JsonProtocol).await,
        completion("2", json!("still here"))
    );
    server.shutdown().shutdown();
}

#[tokio::test]
async fn fire_and_forget_gets_no_completion() {
    let (addr, server) = boot().await;
    let mut ws = connect(addr, "json").await;

    ws.send(Message::text(
        "{\"type\":1,\"target\":\"Echo\",\"arguments\":[\"ignored\"]}\u{1e}",
    ))
    .await
    .unwrap();
    invoke(&mut ws, "2", "Echo", json!(["answered"])).await;
    assert_eq!(
        next_message(&mut ws, &JsonProtocol).await,
        completion("2", json!("answered"))
    );
    server.shutdown().shutdown();
}

#[tokio::test]
async fn group_send_reaches_members_only() {
    let (addr, server) = boot().await;
    let mut c1 = connect(addr, "json").await;
    let mut c2 = connect(addr, "json").await;
    let mut c3 = connect(addr, "json").await;

    for ws in [&mut c1, &mut c2] {
        invoke(ws, "j", "JoinGroup", json!(["g"])).await;
        assert_eq!(
            next_message(ws, &JsonProtocol).await,
            HubMessage::Completion(Completion::void("j"))
        );
    }

    invoke(&mut c3, "s", "SendToGroup", json!(["g", "hello"])).await;
    assert_eq!(next_message(&mut c3, &JsonProtocol).await, completion("s", json!(2)));

    let expected = HubMessage::Invocation(Invocation::new(
        "Receive",
        vec![Argument::from(json!("hello"))],
    ));
    assert_eq!(next_message(&mut c1, &JsonProtocol).await, expected);
    assert_eq!(next_message(&mut c2, &JsonProtocol).await, expected);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn send_reaches_everyone_but_the_caller() {
    let (addr, server) = boot().await;
    let mut alice = connect(addr, "json").await;
    let mut bob = connect(addr, "json").await;
    wait_for_connections(&server, 2).await;

    invoke(&mut alice, "1", "Send", json!(["hey"])).await;
    assert_eq!(
        next_message(&mut alice, &JsonProtocol).await,
        HubMessage::Completion(Completion::void("1"))
    );
    assert_eq!(
        next_message(&mut bob, &JsonProtocol).await,
        HubMessage::Invocation(Invocation::new("Receive", vec![Argument::from(json!("hey"))]))
    );
    server.shutdown().shutdown();
}

#[tokio::test]
async fn stream_over_websocket() {
    let (addr, server) = boot().await;
    let mut ws = connect(addr, "json").await;
    ws.send(Message::text(
        "{\"type\":4,\"invocationId\":\"c\",\"target\":\"Counter\",\"arguments\":[2]}\u{1e}",
    ))
    .await
    .unwrap();
    for i in 0..2 {
        assert_eq!(
            next_message(&mut ws, &JsonProtocol).await,
            HubMessage::StreamItem(StreamItem {
                invocation_id: "c".into(),
                item: json!(i),
            })
        );
    }
    assert_eq!(
        next_message(&mut ws, &JsonProtocol).await,
        HubMessage::Completion(Completion::void("c"))
    );
    server.shutdown().shutdown();
}

#[tokio::test]
async fn messagepack_over_binary_frames() {
    let (addr, server) = boot().await;
    let mut ws = connect(addr, "messagepack").await;
    let invocation = Invocation::new("Echo", vec![Argument::from(json!("packed"))]).with_id("m1");
    let frame = MessagePackProtocol
        .write_message(&HubMessage::Invocation(invocation))
        .unwrap();
    ws.send(Message::binary(frame)).await.unwrap();
    assert_eq!(
        next_message(&mut ws, &MessagePackProtocol).await,
        completion("m1", json!("packed"))
    );
    server.shutdown().shutdown();
}

#[tokio::test]
async fn long_polling_session() {
    let (addr, server) = boot().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/chat?id=lp-1");

    let open = client.get(&url).send().await.unwrap();
    assert_eq!(open.status(), 200);
    assert!(open.bytes().await.unwrap().is_empty());

    let posted = client.post(&url).body(JSON_HANDSHAKE).send().await.unwrap();
    assert_eq!(posted.status(), 200);
    let reply = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(&reply[..], b"{}\x1e");

    let invocation = "{\"type\":1,\"invocationId\":\"1\",\"target\":\"Echo\",\"arguments\":[\"poll\"]}\u{1e}";
    let posted = client.post(&url).body(invocation).send().await.unwrap();
    assert_eq!(posted.status(), 200);
    let reply = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(
        JsonProtocol.parse_messages(&reply).unwrap(),
        vec![completion("1", json!("poll"))]
    );

    let orphan = client
        .post(format!("http://{addr}/chat?id=nobody"))
        .body("{\"type\":6}\u{1e}")
        .send()
        .await
        .unwrap();
    assert_eq!(orphan.status(), 404);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn server_sent_events_session() {
    let (addr, server) = boot().await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/chat?id=sse-1");

    let resp = client
        .get(&url)
        .header("accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let mut events = resp.bytes_stream();

    let posted = client.post(&url).body(JSON_HANDSHAKE).send().await.unwrap();
    assert_eq!(posted.status(), 200);

    let mut received = Vec::new();
    while !String::from_utf8_lossy(&received).contains("data: {}") {
        let chunk = timeout(TIMEOUT, events.next())
            .await
            .expect("timeout waiting for event")
            .expect("event stream ended")
            .unwrap();
        received.extend_from_slice(&chunk);
    }
    wait_for_connections(&server, 1).await;
    server.shutdown().shutdown();
}

#[tokio::test]
async fn shutdown_closes_websockets() {
    let (addr, server) = boot().await;
    let mut ws = connect(addr, "json").await;
    wait_for_connections(&server, 1).await;

    server.shutdown().shutdown();
    expect_closed(&mut ws).await;
    wait_for_connections(&server, 0).await;
}
