//! Integration tests for the TCP chat server.
//!
//! These tests verify the ChatServer works correctly as a complete system,
//! driving it with real TCP clients: registration, name conflicts, message
//! relay, announcements, and graceful shutdown.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

use std::net::SocketAddr;
use std::time::Duration;

use palabred::config::ServerConfig;
use palabred::registry::{spawn_registry, ChatEvent, RegistryHandle};
use palabred::server::{ChatServer, ServerError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for anything expected to arrive
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding nothing will arrive
const SILENCE_WINDOW: Duration = Duration::from_millis(150);

/// Grace period given to the server on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    registry: RegistryHandle,
    events: broadcast::Receiver<ChatEvent>,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Spawns a server on an ephemeral loopback port.
    async fn spawn() -> Self {
        let config = ServerConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            write_timeout_ms: 1_000,
            shutdown_grace_ms: SHUTDOWN_GRACE.as_millis() as u64,
        };

        let registry = spawn_registry();
        let events = registry.subscribe();
        let cancel_token = CancellationToken::new();

        let server = ChatServer::bind(&config, registry.clone(), cancel_token.clone())
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");

        let task = tokio::spawn(server.run());

        Self {
            addr,
            cancel_token,
            registry,
            events,
            task,
        }
    }

    /// Opens a connection without sending anything.
    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and registers `name`, returning once the join was announced.
    async fn join(&mut self, name: &str) -> TestClient {
        let mut client = self.connect().await;
        client.send(name).await;
        self.wait_for(|event| matches!(event, ChatEvent::Joined { name: n, .. } if n.as_str() == name))
            .await;
        client
    }

    /// Waits for the first event matching `predicate`.
    async fn wait_for<F>(&mut self, predicate: F) -> ChatEvent
    where
        F: Fn(&ChatEvent) -> bool,
    {
        timeout(RECV_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event channel open");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Shuts down the server and waits for `run` to return.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        let result = timeout(SHUTDOWN_GRACE * 5, self.task)
            .await
            .expect("server stops within grace period")
            .expect("server task not panicked");
        assert!(result.is_ok());
    }
}

/// Test client connection with line helpers.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends one line, appending `\n`.
    async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Receives one line, without its `\n`.
    async fn recv(&mut self) -> String {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for line")
            .expect("read line");
        assert!(n > 0, "connection closed while waiting for a line");
        line.strip_suffix('\n').unwrap_or(&line).to_string()
    }

    /// Asserts the server closes the connection.
    async fn expect_closed(&mut self) {
        let mut line = String::new();
        let n = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for close")
            .unwrap_or(0);
        assert_eq!(n, 0, "expected connection close, got {line:?}");
    }

    /// Asserts nothing arrives for a short while.
    async fn expect_silence(&mut self) {
        let mut line = String::new();
        let result = timeout(SILENCE_WINDOW, self.reader.read_line(&mut line)).await;
        assert!(result.is_err(), "expected silence, got {line:?}");
    }
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_join_notice_sent_to_others_not_self() {
    let mut server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;

    assert_eq!(alice.recv().await, "bob s'est connecté.");
    bob.expect_silence().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_name_rejected() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;

    let mut impostor = server.connect().await;
    impostor.send("alice").await;

    assert_eq!(impostor.recv().await, "Le pseudo alice est déjà utilisé !");
    impostor.expect_closed().await;

    // No join or leave notice for a rejected client
    alice.expect_silence().await;
    assert_eq!(server.registry.session_count().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_name_trimmed_before_conflict_check() {
    let mut server = TestServer::spawn().await;
    let _alice = server.join("alice").await;

    let mut impostor = server.connect().await;
    impostor.send("  alice  ").await;

    assert_eq!(impostor.recv().await, "Le pseudo alice est déjà utilisé !");

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_name_closes_silently() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;

    let mut nameless = server.connect().await;
    nameless.send("").await;

    nameless.expect_closed().await;
    alice.expect_silence().await;
    assert_eq!(server.registry.session_count().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_name_reusable_after_quit() {
    let mut server = TestServer::spawn().await;

    let mut alice = server.join("alice").await;
    alice.send("/quit").await;
    alice.expect_closed().await;
    server
        .wait_for(|event| matches!(event, ChatEvent::Left { .. }))
        .await;

    let mut again = server.join("alice").await;
    again.send("back").await;
    assert_eq!(again.recv().await, "Vous : back");

    server.shutdown().await;
}

// ============================================================================
// Relay Tests
// ============================================================================

#[tokio::test]
async fn test_message_echo_and_relay() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob s'est connecté.");

    alice.send("hi").await;

    assert_eq!(alice.recv().await, "Vous : hi");
    assert_eq!(bob.recv().await, "alice : hi");

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_lines_ignored_whitespace_relayed() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob s'est connecté.");

    alice.send("").await;
    alice.send("   ").await;
    alice.send("after").await;

    // The empty line produced nothing; the whitespace line is a message
    assert_eq!(bob.recv().await, "alice :    ");
    assert_eq!(bob.recv().await, "alice : after");
    assert_eq!(alice.recv().await, "Vous :    ");
    assert_eq!(alice.recv().await, "Vous : after");

    server.shutdown().await;
}

#[tokio::test]
async fn test_text_relayed_verbatim() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob s'est connecté.");

    let text = "  élan : /quit? \t";
    alice.send(text).await;

    assert_eq!(bob.recv().await, format!("alice : {text}"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_crlf_terminated_lines() {
    let mut server = TestServer::spawn().await;

    let mut alice = server.connect().await;
    alice.send_raw(b"alice\r\n").await;
    server
        .wait_for(|event| matches!(event, ChatEvent::Joined { name, .. } if name.as_str() == "alice"))
        .await;

    alice.send_raw(b"hello\r\n").await;
    assert_eq!(alice.recv().await, "Vous : hello");

    server.shutdown().await;
}

#[tokio::test]
async fn test_per_sender_order_preserved() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob s'est connecté.");

    for i in 0..25 {
        alice.send(&format!("msg {i}")).await;
    }

    for i in 0..25 {
        assert_eq!(bob.recv().await, format!("alice : msg {i}"));
    }

    server.shutdown().await;
}

// ============================================================================
// Departure Tests
// ============================================================================

#[tokio::test]
async fn test_quit_announces_leave() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;
    let mut bob = server.join("bob").await;
    assert_eq!(alice.recv().await, "bob s'est connecté.");

    bob.send("/quit").await;

    bob.expect_closed().await;
    // The command itself is never broadcast
    assert_eq!(alice.recv().await, "bob s'est déconnecté.");
    alice.expect_silence().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_quit_with_spaces_is_a_message() {
    let mut server = TestServer::spawn().await;
    let mut alice = server.join("alice").await;

    alice.send(" /quit").await;

    assert_eq!(alice.recv().await, "Vous :  /quit");

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_sessions_tracks_clients() {
    let mut server = TestServer::spawn().await;
    let _alice = server.join("alice").await;
    let _bob = server.join("bob").await;

    let sessions = server.registry.list_sessions().await;
    let mut names: Vec<_> = sessions.iter().map(|s| s.name.as_str().to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["alice", "bob"]);
    assert_ne!(sessions[0].id, sessions[1].id);

    server.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = TestServer::spawn().await;
    let addr = server.addr;

    server.shutdown().await;

    let result = TcpStream::connect(addr).await;
    assert!(result.is_err(), "listener should be closed after shutdown");
}

#[tokio::test]
async fn test_shutdown_with_connected_client_is_bounded() {
    let mut server = TestServer::spawn().await;
    let _alice = server.join("alice").await;

    // Client stays connected; run must still return after the grace period
    server.shutdown().await;
}
