//! End-to-end gateway tests: real sockets against a bound server.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use parley_auth::SignUpRequest;
use parley_gateway::{build_gateway_app, events::EventRegistry, server::build_state, state::GatewayState};
use parley_store::SqliteStore;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::connect(&dir.path().join("parley.db"))
            .await
            .unwrap(),
    );
    let state = build_state(store, "test-secret", Duration::from_secs(3600)).await;
    let events = Arc::new(EventRegistry::new());
    let app = build_gateway_app(Arc::clone(&state), events);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestServer {
        addr,
        state,
        _dir: dir,
    }
}

async fn sign_up(server: &TestServer, username: &str) -> (i64, String) {
    let session = server
        .state
        .auth
        .sign_up(SignUpRequest {
            username: username.into(),
            name: username.into(),
            password: "pw".into(),
            repassword: "pw".into(),
            avatar: None,
        })
        .await
        .unwrap();
    (session.user.id, session.token)
}

async fn recv_event(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed unexpectedly")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn recv_close_code(ws: &mut WsClient) -> Option<u16> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for close")?;
        match msg {
            Ok(Message::Close(frame)) => return frame.map(|f| f.code.into()),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::text(frame)).await.unwrap();
}

async fn connect_user(addr: SocketAddr, token: &str) -> WsClient {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send_event(&mut ws, "connect", json!({ "token": token })).await;
    let ok = recv_event(&mut ws).await;
    assert_eq!(ok["event"], "connect.ok");
    ws
}

#[tokio::test]
async fn bad_token_is_rejected_before_attach() {
    let server = start_server().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    send_event(&mut ws, "connect", json!({ "token": "garbage" })).await;

    let err = recv_event(&mut ws).await;
    assert_eq!(err["event"], "error");
    assert_eq!(recv_close_code(&mut ws).await, Some(4001));
    assert_eq!(server.state.sessions.count().await, 0);
}

#[tokio::test]
async fn message_reaches_both_parties() {
    let server = start_server().await;
    let (alice_id, alice_token) = sign_up(&server, "alice").await;
    let (bob_id, bob_token) = sign_up(&server, "bob").await;

    let mut alice = connect_user(server.addr, &alice_token).await;
    let mut bob = connect_user(server.addr, &bob_token).await;

    send_event(
        &mut alice,
        "message.send",
        json!({ "receiverId": bob_id, "message": "hello bob" }),
    )
    .await;

    for ws in [&mut alice, &mut bob] {
        let frame = recv_event(ws).await;
        assert_eq!(frame["event"], "message.received");
        assert_eq!(frame["data"]["record"]["kind"], "message");
        assert_eq!(frame["data"]["record"]["body"], "hello bob");
        assert_eq!(frame["data"]["record"]["sender"]["id"], alice_id);
    }
}

#[tokio::test]
async fn call_negotiation_over_live_sockets() {
    let server = start_server().await;
    let (_alice_id, alice_token) = sign_up(&server, "alice").await;
    let (bob_id, bob_token) = sign_up(&server, "bob").await;

    let mut alice = connect_user(server.addr, &alice_token).await;
    let mut bob = connect_user(server.addr, &bob_token).await;

    // request: both get the conversation item, then the ring / the echo
    send_event(&mut alice, "call.request.send", json!({ "receiverId": bob_id })).await;

    let item = recv_event(&mut alice).await;
    assert_eq!(item["event"], "message.received");
    assert_eq!(item["data"]["record"]["kind"], "call");
    let echo = recv_event(&mut alice).await;
    assert_eq!(echo["event"], "call.receive");
    assert_eq!(echo["data"]["type"], "request.data");
    let call_id = echo["data"]["record"]["id"].as_i64().unwrap();

    let item = recv_event(&mut bob).await;
    assert_eq!(item["data"]["record"]["kind"], "call");
    let ring = recv_event(&mut bob).await;
    assert_eq!(ring["data"]["type"], "request");

    // accept by the receiver, carrying the media connection id
    send_event(
        &mut bob,
        "call.request.accept",
        json!({ "callId": call_id, "peerId": "peerXYZ" }),
    )
    .await;
    for ws in [&mut alice, &mut bob] {
        let frame = recv_event(ws).await;
        assert_eq!(frame["event"], "call.answer.receive");
        assert_eq!(frame["data"]["type"], "request.accept");
        assert_eq!(frame["data"]["mediaConnectionId"], "peerXYZ");
    }

    // close by the caller; the counterparty's repeat close is a no-op success
    send_event(&mut alice, "call.close", json!({ "callId": call_id })).await;
    for ws in [&mut alice, &mut bob] {
        let frame = recv_event(ws).await;
        assert_eq!(frame["event"], "call.receive");
        assert_eq!(frame["data"]["type"], "request.close");
    }

    send_event(&mut bob, "call.close", json!({ "callId": call_id })).await;
    let frame = recv_event(&mut bob).await;
    assert_eq!(frame["data"]["type"], "request.close");
}

#[tokio::test]
async fn accept_by_caller_errors_the_caller_only() {
    let server = start_server().await;
    let (_alice_id, alice_token) = sign_up(&server, "alice").await;
    let (bob_id, bob_token) = sign_up(&server, "bob").await;

    let mut alice = connect_user(server.addr, &alice_token).await;
    let mut bob = connect_user(server.addr, &bob_token).await;

    send_event(&mut alice, "call.request.send", json!({ "receiverId": bob_id })).await;
    let _item = recv_event(&mut alice).await;
    let echo = recv_event(&mut alice).await;
    let call_id = echo["data"]["record"]["id"].as_i64().unwrap();

    // the caller tries to accept their own call
    send_event(
        &mut alice,
        "call.request.accept",
        json!({ "callId": call_id, "peerId": "peerXYZ" }),
    )
    .await;
    let err = recv_event(&mut alice).await;
    assert_eq!(err["event"], "call.answer.receive");
    assert_eq!(err["data"]["type"], "request.error");

    // bob saw the ring and nothing since
    let _item = recv_event(&mut bob).await;
    let ring = recv_event(&mut bob).await;
    assert_eq!(ring["data"]["type"], "request");
    send_event(&mut bob, "call.request.refuse", json!({ "callId": call_id })).await;
    let refuse = recv_event(&mut bob).await;
    assert_eq!(refuse["data"]["type"], "request.refuse");
}

#[tokio::test]
async fn request_to_offline_receiver_errors_sender() {
    let server = start_server().await;
    let (_alice_id, alice_token) = sign_up(&server, "alice").await;
    let (bob_id, _bob_token) = sign_up(&server, "bob").await;

    let mut alice = connect_user(server.addr, &alice_token).await;
    send_event(&mut alice, "call.request.send", json!({ "receiverId": bob_id })).await;

    let item = recv_event(&mut alice).await;
    assert_eq!(item["event"], "message.received");
    let err = recv_event(&mut alice).await;
    assert_eq!(err["event"], "call.answer.receive");
    assert_eq!(err["data"]["type"], "request.error");
    assert_eq!(err["data"]["record"]["status"], "pending");
}

#[tokio::test]
async fn reconnect_supersedes_the_old_socket() {
    let server = start_server().await;
    let (alice_id, alice_token) = sign_up(&server, "alice").await;

    let mut first = connect_user(server.addr, &alice_token).await;
    let _second = connect_user(server.addr, &alice_token).await;

    assert_eq!(recv_close_code(&mut first).await, Some(4000));
    assert_eq!(server.state.sessions.count().await, 1);
    assert!(server.state.sessions.lookup(alice_id).await.is_some());
}

#[tokio::test]
async fn peer_socket_registers_and_deregisters() {
    let server = start_server().await;
    let (alice_id, alice_token) = sign_up(&server, "alice").await;

    let (mut peer, _) = connect_async(format!(
        "ws://{}/peer?token={}&id=peer-abc",
        server.addr, alice_token
    ))
    .await
    .unwrap();

    let open = recv_event(&mut peer).await;
    assert_eq!(open["event"], "peer.open");
    assert_eq!(open["data"]["id"], "peer-abc");
    assert_eq!(server.state.peers.identity_of("peer-abc").await, Some(alice_id));
    assert_eq!(
        server.state.peers.peer_id_of(alice_id).await.as_deref(),
        Some("peer-abc")
    );

    drop(peer);
    for _ in 0..40 {
        if server.state.peers.identity_of("peer-abc").await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(server.state.peers.identity_of("peer-abc").await, None);
}

#[tokio::test]
async fn peer_socket_requires_a_token() {
    let server = start_server().await;
    assert!(
        connect_async(format!("ws://{}/peer?token=bad&id=peer-abc", server.addr))
            .await
            .is_err()
    );
}
