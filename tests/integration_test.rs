// Integration tests for the session relay
// Each test starts the relay in-process on an ephemeral port and talks to it over real sockets

use std::net::SocketAddr;
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use session_relay::api;
use session_relay::client::{ClientConfig, ClientState, RelayClient, SessionEventHandler};
use session_relay::relay::protocol::{NewMessage, ParticipantList, UserJoined};
use session_relay::relay::{OneSeatPerRole, Registry, Role, SessionGateway};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

fn start_server(registry: Registry) -> SocketAddr {
    let gateway = Arc::new(SessionGateway::new(registry));
    let (addr, server) = warp::serve(api::routes(gateway)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

async fn open(addr: SocketAddr) -> (WsWrite, WsRead) {
    let (ws_stream, _) = connect_async(format!("ws://{}/session", addr))
        .await
        .expect("Failed to connect to relay");
    ws_stream.split()
}

async fn send(write: &mut WsWrite, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data });
    write
        .send(Message::Text(frame.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Next frame named `event`; other events are skipped
async fn next_event(read: &mut WsRead, event: &str) -> Value {
    let wait = async {
        while let Some(msg) = read.next().await {
            if let Ok(Message::Text(text)) = msg {
                let value: Value = serde_json::from_str(&text).expect("Server sent invalid JSON");
                if value["event"] == event {
                    return value["data"].clone();
                }
            }
        }
        panic!("Connection closed while waiting for {}", event);
    };
    timeout(Duration::from_secs(2), wait)
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {}", event))
}

/// Asserts no frame named `event` arrives within a short window
async fn assert_no_event(read: &mut WsRead, event: &str) {
    let wait = async {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).expect("Server sent invalid JSON");
                if value["event"] == event {
                    return Some(value);
                }
            }
        }
        None
    };
    if let Ok(Some(value)) = timeout(Duration::from_millis(300), wait).await {
        panic!("Unexpected {} frame: {}", event, value);
    }
}

async fn join(addr: SocketAddr, session: &str, user: &str, role: &str) -> (WsWrite, WsRead) {
    let (mut write, mut read) = open(addr).await;
    send(
        &mut write,
        "join-session",
        json!({ "sessionId": session, "userId": user, "role": role }),
    )
    .await;
    next_event(&mut read, "participants").await;
    (write, read)
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_server(Registry::new());

    let resp = reqwest::get(format!("http://{}/session/health", addr))
        .await
        .expect("Health endpoint unreachable");
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "Session Relay");
    assert_eq!(body["rooms"], 0);
}

#[tokio::test]
async fn test_join_visibility() {
    let addr = start_server(Registry::new());

    let (_uw, mut ur) = join(addr, "s1", "u1", "user").await;

    let (mut ew, mut er) = open(addr).await;
    send(
        &mut ew,
        "join-session",
        json!({ "sessionId": "s1", "userId": "e1", "role": "expert" }),
    )
    .await;

    let list = next_event(&mut er, "participants").await;
    let users: Vec<&str> = list["participants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["userId"].as_str().unwrap())
        .collect();
    assert_eq!(users.len(), 2);
    assert!(users.contains(&"u1"));
    assert!(users.contains(&"e1"));

    let joined = next_event(&mut ur, "user-joined").await;
    assert_eq!(joined["userId"], "e1");
    assert_eq!(joined["role"], "expert");
    assert!(joined["connectionId"].is_string());

    assert_no_event(&mut er, "user-joined").await;
    assert_no_event(&mut ur, "participants").await;
}

#[tokio::test]
async fn test_chat_echoes_to_sender_with_same_id() {
    let addr = start_server(Registry::new());

    let (mut uw, mut ur) = join(addr, "s1", "u1", "user").await;
    let (_ew, mut er) = join(addr, "s1", "e1", "expert").await;
    next_event(&mut ur, "user-joined").await;

    send(
        &mut uw,
        "chat-message",
        json!({ "sessionId": "s1", "message": "hello", "senderId": "u1", "senderName": "Ann" }),
    )
    .await;

    let mine = next_event(&mut ur, "new-message").await;
    let theirs = next_event(&mut er, "new-message").await;

    assert_eq!(mine, theirs);
    assert_eq!(mine["message"], "hello");
    assert_eq!(mine["senderId"], "u1");
    assert_eq!(mine["senderName"], "Ann");
    assert!(!mine["id"].as_str().unwrap().is_empty());
    assert!(mine["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_invalid_chat_yields_error_to_sender_only() {
    let addr = start_server(Registry::new());

    let (mut uw, mut ur) = join(addr, "s1", "u1", "user").await;
    let (_ew, mut er) = join(addr, "s1", "e1", "expert").await;

    send(&mut uw, "chat-message", json!({ "sessionId": "s1", "message": "hello" })).await;

    let error = next_event(&mut ur, "error").await;
    assert_eq!(error["code"], "INVALID_PAYLOAD");
    assert_no_event(&mut er, "new-message").await;
    assert_no_event(&mut er, "error").await;
}

#[tokio::test]
async fn test_invalid_typing_is_dropped_silently() {
    let addr = start_server(Registry::new());

    let (mut uw, mut ur) = join(addr, "s1", "u1", "user").await;
    send(&mut uw, "typing", json!({ "sessionId": "s1" })).await;
    send(&mut uw, "not-an-event", json!({})).await;

    assert_no_event(&mut ur, "error").await;
}

#[tokio::test]
async fn test_end_session_notifies_everyone_and_clears_room() {
    let addr = start_server(Registry::new());

    let (mut uw, mut ur) = join(addr, "s1", "u1", "user").await;
    let (_ew, mut er) = join(addr, "s1", "e1", "expert").await;

    send(&mut uw, "end-session", json!({ "sessionId": "s1", "reason": "done" })).await;

    let mine = next_event(&mut ur, "session-ended").await;
    let theirs = next_event(&mut er, "session-ended").await;
    assert_eq!(mine["endedBy"], "u1");
    assert_eq!(mine["reason"], "done");
    assert_eq!(mine, theirs);

    let body: Value = reqwest::get(format!("http://{}/session/s1/participants", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["participants"], json!([]));

    // dissolved channel: later chat from the same connection reaches nobody
    send(&mut uw, "chat-message", json!({ "sessionId": "s1", "message": "late", "senderId": "u1" })).await;
    assert_no_event(&mut er, "new-message").await;
}

#[tokio::test]
async fn test_disconnect_notifies_peer_and_unregisters() {
    let addr = start_server(Registry::new());

    let (_uw, mut ur) = join(addr, "s1", "u1", "user").await;
    let (ew, er) = join(addr, "s1", "e1", "expert").await;
    next_event(&mut ur, "user-joined").await;

    drop(ew);
    drop(er);

    let left = next_event(&mut ur, "user-left").await;
    assert_eq!(left["userId"], "e1");
    assert_eq!(left["role"], "expert");

    let body: Value = reqwest::get(format!("http://{}/session/s1/participants", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let participants = body["participants"].as_array().unwrap();
    assert_eq!(participants.len(), 1);
    assert_eq!(participants[0]["userId"], "u1");
}

#[tokio::test]
async fn test_admission_policy_rejects_second_expert() {
    let addr = start_server(Registry::with_policy(Box::new(OneSeatPerRole)));

    let (_ew, _er) = join(addr, "s1", "e1", "expert").await;

    let (mut sw, mut sr) = open(addr).await;
    send(
        &mut sw,
        "join-session",
        json!({ "sessionId": "s1", "userId": "e2", "role": "expert" }),
    )
    .await;

    let error = next_event(&mut sr, "error").await;
    assert_eq!(error["code"], "ADMISSION_DENIED");
    assert_no_event(&mut sr, "participants").await;
}

// ============================================================================
// RelayClient against a live relay
// ============================================================================

struct Recorder {
    events: mpsc::UnboundedSender<String>,
}

impl SessionEventHandler for Recorder {
    fn on_user_joined(&self, event: &UserJoined) {
        let _ = self.events.send(format!("joined:{}", event.user_id));
    }

    fn on_new_message(&self, event: &NewMessage) {
        let _ = self.events.send(format!("message:{}", event.message));
    }

    fn on_participants(&self, event: &ParticipantList) {
        let _ = self.events.send(format!("participants:{}", event.participants.len()));
    }
}

async fn recorded(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for handler")
        .expect("Recorder dropped")
}

fn client_for(addr: SocketAddr) -> RelayClient {
    RelayClient::new(ClientConfig {
        reconnection: false,
        timeout: Duration::from_secs(2),
        ..ClientConfig::new(format!("ws://{}/session", addr))
    })
}

#[tokio::test]
async fn test_client_join_and_chat() {
    let addr = start_server(Registry::new());
    let client = client_for(addr);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = client.subscribe(Arc::new(Recorder { events: tx }));

    client.join_session("s1", "u1", Role::User).await.unwrap();
    assert_eq!(client.state(), ClientState::Connected);
    assert_eq!(recorded(&mut rx).await, "participants:1");

    let (mut ew, _er) = join(addr, "s1", "e1", "expert").await;
    assert_eq!(recorded(&mut rx).await, "joined:e1");

    send(&mut ew, "chat-message", json!({ "sessionId": "s1", "message": "hi", "senderId": "e1" })).await;
    assert_eq!(recorded(&mut rx).await, "message:hi");

    assert!(client.send_message("s1", "back", "u1", None));
    assert_eq!(recorded(&mut rx).await, "message:back");

    client.disconnect();
    assert_eq!(client.state(), ClientState::Disconnected);
    assert!(!client.send_typing_indicator("s1", "u1", true));
}

#[tokio::test]
async fn test_client_unsubscribe_stops_delivery() {
    let addr = start_server(Registry::new());
    let client = client_for(addr);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = client.subscribe(Arc::new(Recorder { events: tx }));

    client.join_session("s1", "u1", Role::User).await.unwrap();
    assert_eq!(recorded(&mut rx).await, "participants:1");

    subscription.unsubscribe();

    let (_ew, _er) = join(addr, "s1", "e1", "expert").await;
    sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());

    client.disconnect();
}

#[tokio::test]
async fn test_client_leave_notifies_peer() {
    let addr = start_server(Registry::new());
    let client = client_for(addr);

    let (_ew, mut er) = join(addr, "s1", "e1", "expert").await;

    client.join_session("s1", "u1", Role::User).await.unwrap();
    next_event(&mut er, "user-joined").await;

    assert!(client.leave_session("s1"));
    let left = next_event(&mut er, "user-left").await;
    assert_eq!(left["userId"], "u1");
    assert_eq!(left["role"], "user");

    client.disconnect();
}
