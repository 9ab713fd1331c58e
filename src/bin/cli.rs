// Session Relay CLI
// Checks a running relay, joins sessions interactively and runs protocol validation scenarios

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use session_relay::client::{ClientConfig, ClientState, RelayClient, SessionEventHandler};
use session_relay::relay::protocol::{
    ErrorEvent, NewMessage, ParticipantList, SessionEnded, TypingUpdate, UserJoined, UserLeft,
};
use session_relay::relay::Role;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Session Relay CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// List participants of a session
    Participants {
        /// Session ID
        #[arg(short, long)]
        session: String,
    },

    /// Test WebSocket connection
    Connect,

    /// Join a session and chat from the terminal
    Join {
        /// Session ID
        #[arg(short, long)]
        session: String,

        /// User ID
        #[arg(short, long)]
        user: String,

        /// Role: user or expert
        #[arg(short, long, default_value = "user")]
        role: Role,

        /// Display name sent with messages
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Run automated validation scenarios
    Validate {
        /// Run all validation tests
        #[arg(short, long)]
        all: bool,

        /// Test specific scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send raw JSON frames
    Interactive,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Participants { session } => {
            list_participants(&cli.server, session).await;
        }
        Commands::Connect => {
            test_connection(&cli.server).await;
        }
        Commands::Join { session, user, role, name } => {
            join_session(&cli.server, session, user, *role, name.as_deref()).await;
        }
        Commands::Validate { all, scenario } => {
            if *all {
                run_all_validations(&cli.server).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => {
            interactive_mode(&cli.server).await;
        }
    }
}

fn ws_url(server: &str) -> String {
    format!("ws://{}/session", server)
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/session/health", server);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_success() {
                println!("{} Health check passed", "✓".green());

                if let Ok(body) = resp.json::<Value>().await {
                    println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                    println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                    println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                    println!("  Rooms: {}", body["rooms"]);
                    println!("  Connections: {}", body["connections"]);
                }
            } else {
                println!("{} Health check failed: {}", "✗".red(), status);
            }
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            println!("  Make sure the server is running on {}", server);
        }
    }
}

async fn list_participants(server: &str, session: &str) {
    let url = format!("http://{}/session/{}/participants", server, session);
    let client = reqwest::Client::new();

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let Ok(body) = resp.json::<Value>().await else {
                println!("{} Could not parse response", "✗".red());
                return;
            };
            let participants = body["participants"].as_array().cloned().unwrap_or_default();
            if participants.is_empty() {
                println!("{} No participants in session {}", "○".yellow(), session.bold());
                return;
            }

            println!("{} {} participant(s) in {}", "✓".green(), participants.len(), session.bold());
            for p in participants {
                println!(
                    "  {} {} ({}) since {}",
                    "●".green(),
                    p["userId"].as_str().unwrap_or("?").bold(),
                    p["role"].as_str().unwrap_or("?"),
                    p["joinedAt"].as_str().unwrap_or("?")
                );
            }
        }
        Ok(resp) => {
            println!("{} Request failed: {}", "✗".red(), resp.status());
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn test_connection(server: &str) {
    println!("{}", "Testing WebSocket connection...".cyan());

    let url = ws_url(server);

    match connect_async(&url).await {
        Ok((ws_stream, _)) => {
            println!("{} WebSocket connection established", "✓".green());
            println!("  URL: {}", url);
            drop(ws_stream);
            println!("{} Connection closed cleanly", "✓".green());
        }
        Err(e) => {
            println!("{} WebSocket connection failed: {}", "✗".red(), e);
        }
    }
}

// ============================================================================
// Chat session (client wrapper)
// ============================================================================

struct TerminalPrinter {
    user_id: String,
}

impl SessionEventHandler for TerminalPrinter {
    fn on_user_joined(&self, event: &UserJoined) {
        println!("{} {} joined as {}", "→".green(), event.user_id.bold(), event.role);
    }

    fn on_user_left(&self, event: &UserLeft) {
        println!("{} {} ({}) left", "←".yellow(), event.user_id.bold(), event.role);
    }

    fn on_new_message(&self, event: &NewMessage) {
        let sender = event.sender_name.as_deref().unwrap_or(&event.sender_id);
        let sender = if event.sender_id == self.user_id {
            sender.cyan()
        } else {
            sender.magenta()
        };
        println!("[{}] {}: {}", event.timestamp.dimmed(), sender.bold(), event.message);
    }

    fn on_typing(&self, event: &TypingUpdate) {
        if event.is_typing {
            println!("{}", format!("{} is typing...", event.user_id).dimmed());
        }
    }

    fn on_session_ended(&self, event: &SessionEnded) {
        println!(
            "{} Session {} ended by {}{}",
            "■".red(),
            event.session_id.bold(),
            event.ended_by,
            event.reason.as_ref().map(|r| format!(" ({})", r)).unwrap_or_default()
        );
    }

    fn on_error(&self, event: &ErrorEvent) {
        println!("{} {}: {}", "✗".red(), event.code.red(), event.message);
    }

    fn on_participants(&self, event: &ParticipantList) {
        let names: Vec<String> = event
            .participants
            .iter()
            .map(|p| format!("{} ({})", p.user_id, p.role))
            .collect();
        println!("{} In session: {}", "●".green(), names.join(", "));
    }

    fn on_state_change(&self, state: ClientState) {
        match state {
            ClientState::Reconnecting => println!("{}", "Connection lost, reconnecting...".yellow()),
            ClientState::Disconnected => println!("{}", "Disconnected".yellow()),
            _ => {}
        }
    }
}

async fn join_session(server: &str, session: &str, user: &str, role: Role, name: Option<&str>) {
    println!("{}", "Joining session...".cyan());
    println!("  Session ID: {}", session);
    println!("  User ID: {}", user);
    println!("  Role: {}", role);

    let client = RelayClient::new(ClientConfig::new(ws_url(server)));
    let subscription = client.subscribe(Arc::new(TerminalPrinter {
        user_id: user.to_string(),
    }));

    if let Err(e) = client.join_session(session, user, role).await {
        println!("{} Cannot join: {}", "✗".red(), e);
        return;
    }

    println!(
        "Type a message and press Enter. Commands: {}, {}, {}, {}",
        "/typing".cyan(),
        "/end [reason]".cyan(),
        "/leave".cyan(),
        "/quit".cyan()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut rejoin = client.watch_state();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    break;
                };
                let line = line.trim();

                let delivered = match line {
                    "" => continue,
                    "/quit" | "/exit" => break,
                    "/leave" => {
                        let sent = client.leave_session(session);
                        if sent {
                            println!("{} Left session", "✓".green());
                        }
                        sent
                    }
                    "/typing" => client.send_typing_indicator(session, user, true),
                    _ if line.starts_with("/end") => {
                        let reason = line.trim_start_matches("/end").trim();
                        client.end_session(session, (!reason.is_empty()).then_some(reason))
                    }
                    message => client.send_message(session, message, user, name),
                };

                if !delivered {
                    println!("{} Not connected, message dropped", "✗".yellow());
                }
            }
            changed = rejoin.changed() => {
                if changed.is_err() {
                    break;
                }
                if *rejoin.borrow() == ClientState::Connected {
                    // presence is not restored by the server after a reconnect
                    if let Err(e) = client.join_session(session, user, role).await {
                        println!("{} Rejoin failed: {}", "✗".red(), e);
                    }
                }
            }
        }
    }

    subscription.unsubscribe();
    client.disconnect();
    println!("Goodbye!");
}

// ============================================================================
// Validation scenarios (raw protocol)
// ============================================================================

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    println!("  {} - Basic WebSocket connection test", "connection".cyan());
    println!("  {} - Second joiner sees both participants, first sees user-joined", "join-visibility".cyan());
    println!("  {} - Chat is echoed to sender and peer with one id", "chat-echo".cyan());
    println!("  {} - Chat without senderId yields INVALID_PAYLOAD", "invalid-payload".cyan());
    println!("  {} - end-session reaches everyone and clears the room", "end-session".cyan());
    println!("  {} - Dropping a connection notifies the peer", "disconnect".cyan());
    println!("\nExample: relay-cli validate --scenario chat-echo");
}

const SCENARIOS: &[&str] = &[
    "connection",
    "join-visibility",
    "chat-echo",
    "invalid-payload",
    "end-session",
    "disconnect",
];

async fn run_scenario(server: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(50));

    let passed = match scenario {
        "connection" => validate_connection(server).await,
        "join-visibility" => validate_join_visibility(server).await,
        "chat-echo" => validate_chat_echo(server).await,
        "invalid-payload" => validate_invalid_payload(server).await,
        "end-session" => validate_end_session(server).await,
        "disconnect" => validate_disconnect(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    if passed {
        println!("{} Scenario {} passed", "✓".green(), scenario.bold());
    } else {
        println!("{} Scenario {} failed", "✗".red(), scenario.bold());
    }
}

async fn run_all_validations(server: &str) {
    println!("\n{}", "Running all validation scenarios".bold().green());
    println!("{}", "═".repeat(60).green());

    let mut passed = 0;
    for scenario in SCENARIOS {
        println!("\n{} {}", "▶".cyan(), scenario.bold());
        let ok = match *scenario {
            "connection" => validate_connection(server).await,
            "join-visibility" => validate_join_visibility(server).await,
            "chat-echo" => validate_chat_echo(server).await,
            "invalid-payload" => validate_invalid_payload(server).await,
            "end-session" => validate_end_session(server).await,
            _ => validate_disconnect(server).await,
        };
        if ok {
            passed += 1;
        }
        sleep(Duration::from_millis(100)).await;
    }

    println!("\n{}", "═".repeat(60).green());
    let summary = format!("{}/{} scenarios passed", passed, SCENARIOS.len());
    if passed == SCENARIOS.len() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

fn unique_session(prefix: &str) -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{}-{}", prefix, millis)
}

async fn open(server: &str) -> Option<(WsWrite, WsRead)> {
    match connect_async(ws_url(server)).await {
        Ok((ws_stream, _)) => Some(ws_stream.split()),
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            None
        }
    }
}

async fn send(write: &mut WsWrite, event: &str, data: Value) -> bool {
    let frame = json!({ "event": event, "data": data });
    write.send(Message::Text(frame.to_string())).await.is_ok()
}

/// Waits for the next frame named `event`, skipping others
async fn expect_event(read: &mut WsRead, event: &str) -> Option<Value> {
    let deadline = sleep(Duration::from_secs(2));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(value) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if value["event"] == event {
                        return Some(value["data"].clone());
                    }
                }
                Some(Ok(_)) => continue,
                _ => return None,
            },
            _ = &mut deadline => {
                println!("  {} Timeout waiting for {}", "✗".red(), event);
                return None;
            }
        }
    }
}

/// True if no frame named `event` arrives within a short window
async fn expect_silence(read: &mut WsRead, event: &str) -> bool {
    let window = sleep(Duration::from_millis(300));
    tokio::pin!(window);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                        if value["event"] == event {
                            return false;
                        }
                    }
                }
                Some(Ok(_)) => continue,
                _ => return true,
            },
            _ = &mut window => return true,
        }
    }
}

async fn join_pair(server: &str, session: &str) -> Option<((WsWrite, WsRead), (WsWrite, WsRead))> {
    let (mut uw, mut ur) = open(server).await?;
    send(&mut uw, "join-session", json!({ "sessionId": session, "userId": "u1", "role": "user" })).await;
    expect_event(&mut ur, "participants").await?;

    let (mut ew, mut er) = open(server).await?;
    send(&mut ew, "join-session", json!({ "sessionId": session, "userId": "e1", "role": "expert" })).await;
    expect_event(&mut er, "participants").await?;
    expect_event(&mut ur, "user-joined").await?;

    Some(((uw, ur), (ew, er)))
}

async fn validate_connection(server: &str) -> bool {
    match open(server).await {
        Some(_) => {
            println!("  {} WebSocket connection established", "✓".green());
            true
        }
        None => false,
    }
}

async fn validate_join_visibility(server: &str) -> bool {
    let session = unique_session("join");
    let Some((mut uw, mut ur)) = open(server).await else {
        return false;
    };
    send(&mut uw, "join-session", json!({ "sessionId": session, "userId": "u1", "role": "user" })).await;
    if expect_event(&mut ur, "participants").await.is_none() {
        return false;
    }

    let Some((mut ew, mut er)) = open(server).await else {
        return false;
    };
    send(&mut ew, "join-session", json!({ "sessionId": session, "userId": "e1", "role": "expert" })).await;

    let Some(list) = expect_event(&mut er, "participants").await else {
        return false;
    };
    let count = list["participants"].as_array().map(|p| p.len()).unwrap_or(0);
    if count != 2 {
        println!("  {} Expected 2 participants, got {}", "✗".red(), count);
        return false;
    }
    println!("  {} Second joiner sees both participants", "✓".green());

    let Some(joined) = expect_event(&mut ur, "user-joined").await else {
        return false;
    };
    if joined["userId"] != "e1" {
        println!("  {} Unexpected user-joined: {}", "✗".red(), joined);
        return false;
    }
    println!("  {} First joiner notified of e1", "✓".green());

    if !expect_silence(&mut ur, "participants").await {
        println!("  {} First joiner received a duplicate participants push", "✗".red());
        return false;
    }
    true
}

async fn validate_chat_echo(server: &str) -> bool {
    let session = unique_session("chat");
    let Some(((mut uw, mut ur), (_ew, mut er))) = join_pair(server, &session).await else {
        return false;
    };

    send(&mut uw, "chat-message", json!({ "sessionId": session, "message": "hello", "senderId": "u1" })).await;

    let (Some(mine), Some(theirs)) = (
        expect_event(&mut ur, "new-message").await,
        expect_event(&mut er, "new-message").await,
    ) else {
        return false;
    };

    if mine["id"] != theirs["id"] || mine["message"] != "hello" {
        println!("  {} Echo mismatch: {} vs {}", "✗".red(), mine, theirs);
        return false;
    }
    println!("  {} Both participants received message {}", "✓".green(), mine["id"]);
    true
}

async fn validate_invalid_payload(server: &str) -> bool {
    let session = unique_session("invalid");
    let Some(((mut uw, mut ur), (_ew, mut er))) = join_pair(server, &session).await else {
        return false;
    };

    send(&mut uw, "chat-message", json!({ "sessionId": session, "message": "hello" })).await;

    let Some(error) = expect_event(&mut ur, "error").await else {
        return false;
    };
    if error["code"] != "INVALID_PAYLOAD" {
        println!("  {} Unexpected error code: {}", "✗".red(), error["code"]);
        return false;
    }
    println!("  {} Sender received INVALID_PAYLOAD", "✓".green());

    if !expect_silence(&mut er, "new-message").await {
        println!("  {} Peer received a message that should have been rejected", "✗".red());
        return false;
    }
    true
}

async fn validate_end_session(server: &str) -> bool {
    let session = unique_session("end");
    let Some(((mut uw, mut ur), (_ew, mut er))) = join_pair(server, &session).await else {
        return false;
    };

    send(&mut uw, "end-session", json!({ "sessionId": session, "reason": "validation" })).await;

    if expect_event(&mut ur, "session-ended").await.is_none()
        || expect_event(&mut er, "session-ended").await.is_none()
    {
        return false;
    }
    println!("  {} Both participants received session-ended", "✓".green());

    let url = format!("http://{}/session/{}/participants", server, session);
    match reqwest::get(&url).await {
        Ok(resp) => match resp.json::<Value>().await {
            Ok(body) if body["participants"] == json!([]) => {
                println!("  {} Room cleared", "✓".green());
                true
            }
            Ok(body) => {
                println!("  {} Room still populated: {}", "✗".red(), body);
                false
            }
            Err(e) => {
                println!("  {} Could not parse participants: {}", "✗".red(), e);
                false
            }
        },
        Err(e) => {
            println!("  {} Participants endpoint unreachable: {}", "✗".red(), e);
            false
        }
    }
}

async fn validate_disconnect(server: &str) -> bool {
    let session = unique_session("disconnect");
    let Some(((_uw, mut ur), (ew, er))) = join_pair(server, &session).await else {
        return false;
    };

    drop(ew);
    drop(er);

    let Some(left) = expect_event(&mut ur, "user-left").await else {
        return false;
    };
    if left["userId"] != "e1" || left["role"] != "expert" {
        println!("  {} Unexpected user-left: {}", "✗".red(), left);
        return false;
    }
    println!("  {} Peer notified of disconnect", "✓".green());
    true
}

// ============================================================================
// Interactive mode
// ============================================================================

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let Some((mut write, mut read)) = open(server).await else {
        return;
    };
    println!("{} Connected to server", "✓".green());

    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("\n{} {}", "◀".green(), text.bright_white());
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(input)) = lines.next_line().await {
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input == "quit" || input == "exit" {
            println!("Goodbye!");
            break;
        }

        if input == "help" {
            print_interactive_help();
            continue;
        }

        if let Ok(parsed) = serde_json::from_str::<Value>(input) {
            if write.send(Message::Text(parsed.to_string())).await.is_ok() {
                println!("{} Frame sent", "✓".green());
            } else {
                println!("{} Failed to send frame", "✗".red());
                break;
            }
        } else {
            println!("{} Invalid JSON. Type 'help' for examples.", "✗".yellow());
        }
    }

    receive_task.abort();
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON frames directly to the server.\n");

    println!("{}", "Example Frames:".bold());
    println!("\n{}:", "Join".cyan());
    println!(r#"  {{"event":"join-session","data":{{"sessionId":"s1","userId":"u1","role":"user"}}}}"#);

    println!("\n{}:", "Chat".cyan());
    println!(r#"  {{"event":"chat-message","data":{{"sessionId":"s1","message":"hello","senderId":"u1"}}}}"#);

    println!("\n{}:", "Typing".cyan());
    println!(r#"  {{"event":"typing","data":{{"sessionId":"s1","userId":"u1","isTyping":true}}}}"#);

    println!("\n{}:", "Leave".cyan());
    println!(r#"  {{"event":"leave-session","data":{{"sessionId":"s1"}}}}"#);

    println!("\n{}:", "End".cyan());
    println!(r#"  {{"event":"end-session","data":{{"sessionId":"s1","reason":"done"}}}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
