//! Shared integration-test harness: an in-process exercise service built from
//! a channel-backed dialer and the in-memory gateway.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};

use breachdrill::clock::ManualClock;
use breachdrill::connection::{Dialer, Link};
use breachdrill::error::TransportError;
use breachdrill::gateway::InMemoryGateway;
use breachdrill::observability::events::EventEmitter;
use breachdrill::session::{
    LogEntry, Mode, Os, Role, Scenario, SessionEnvironment, SessionParams, SessionPolicy,
    SessionRuntime,
};

/// Code validity window used throughout the tests.
pub const CODE_TTL: Duration = Duration::from_secs(300);

/// Server side of one dialed connection.
struct FarEnd {
    url: String,
    to_client: fmpsc::UnboundedSender<Result<String, TransportError>>,
    sent: Arc<Mutex<Vec<String>>>,
}

/// [`Dialer`] whose connections end in the test instead of a socket.
///
/// Connections are numbered in dial order, starting at zero.
#[derive(Default)]
pub struct LoopbackDialer {
    ends: Mutex<Vec<FarEnd>>,
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self, url: &str) -> Result<Link, TransportError> {
        let (to_client, from_server) = fmpsc::unbounded();
        let (to_server, mut from_client) = fmpsc::unbounded::<String>();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&sent);
        tokio::spawn(async move {
            while let Some(frame) = from_client.next().await {
                recorder.lock().unwrap().push(frame);
            }
        });

        self.ends.lock().unwrap().push(FarEnd {
            url: url.to_owned(),
            to_client,
            sent,
        });
        Ok(Link::new(
            to_server.sink_map_err(|e| TransportError::SendFailed(e.to_string())),
            from_server,
        ))
    }
}

impl LoopbackDialer {
    /// Number of connections dialed so far.
    pub fn dialed(&self) -> usize {
        self.ends.lock().unwrap().len()
    }

    /// URL of connection `index`.
    pub fn url(&self, index: usize) -> String {
        self.ends.lock().unwrap()[index].url.clone()
    }

    /// Delivers `frame` to the client on connection `index`.
    pub fn push(&self, index: usize, frame: &str) {
        self.ends.lock().unwrap()[index]
            .to_client
            .unbounded_send(Ok(frame.to_owned()))
            .expect("connection already closed");
    }

    /// Drops connection `index` from the server side.
    pub fn hang_up(&self, index: usize) {
        self.ends.lock().unwrap()[index].to_client.close_channel();
    }

    /// Frames the client wrote on connection `index`.
    pub fn sent(&self, index: usize) -> Vec<String> {
        self.ends.lock().unwrap()[index].sent.lock().unwrap().clone()
    }

    /// Frames written on connection `index` with the given `action` tag.
    pub fn sent_actions(&self, index: usize, action: &str) -> Vec<serde_json::Value> {
        self.sent(index)
            .iter()
            .map(|f| serde_json::from_str::<serde_json::Value>(f).expect("client sent invalid JSON"))
            .filter(|v| v["action"] == action)
            .collect()
    }

    /// Waits until at least `count` frames tagged `action` were written on
    /// connection `index`.
    pub async fn wait_for_actions(
        &self,
        index: usize,
        action: &str,
        count: usize,
    ) -> Vec<serde_json::Value> {
        for _ in 0..1000 {
            let found = self.sent_actions(index, action);
            if found.len() >= count {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("client never sent {count} '{action}' frame(s)");
    }
}

/// One exercise service shared by every session a test creates.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<InMemoryGateway>,
    pub policy: SessionPolicy,
}

impl Harness {
    /// Harness with the default policy and coaching off.
    pub fn new() -> Self {
        Self::with_policy(SessionPolicy {
            coach_enabled: false,
            ..SessionPolicy::default()
        })
    }

    pub fn with_policy(policy: SessionPolicy) -> Self {
        let clock = Arc::new(ManualClock::default());
        let gateway = Arc::new(InMemoryGateway::new(clock.clone(), CODE_TTL));
        Self {
            clock,
            gateway,
            policy,
        }
    }

    /// Starts a session with its own dialer.
    pub fn spawn(&self, params: SessionParams) -> (SessionRuntime, Arc<LoopbackDialer>) {
        let dialer = Arc::new(LoopbackDialer::default());
        let env = SessionEnvironment {
            gateway: self.gateway.clone(),
            dialer: dialer.clone(),
            clock: self.clock.clone(),
            events: Arc::new(EventEmitter::noop()),
            policy: self.policy.clone(),
            ws_base: "ws://drill.test".to_owned(),
            code_ttl: CODE_TTL,
        };
        (SessionRuntime::create(params, env), dialer)
    }
}

pub fn solo(role: Role, scenario: Scenario) -> SessionParams {
    SessionParams {
        participant_id: "guest-0001".to_owned(),
        mode: Mode::SinglePlayer,
        role,
        scenario,
        os: Os::Windows,
    }
}

pub fn two_player(participant: &str, role: Role) -> SessionParams {
    SessionParams {
        participant_id: participant.to_owned(),
        mode: Mode::TwoPlayer,
        role,
        scenario: Scenario::Phishing,
        os: Os::Linux,
    }
}

// ============================================================================
// Frames
// ============================================================================

pub fn match_started(limit_secs: u32) -> String {
    format!(r#"{{"type":"match_started","payload":{{"timeLimitSec":{limit_secs}}}}}"#)
}

pub fn peer_text(role: &str, text: &str) -> String {
    serde_json::json!({
        "type": "opponent_action",
        "payload": {
            "role": role,
            "action": "user_input",
            "payload": { "text": text, "link": text.contains("http") },
        },
    })
    .to_string()
}

pub fn game_result(result: &str, reason: &str) -> String {
    serde_json::json!({
        "type": "game_result",
        "payload": { "result": result, "reason": reason },
    })
    .to_string()
}

/// Texts of every log entry, in order.
pub fn texts(log: &[LogEntry]) -> Vec<&str> {
    log.iter().map(|e| e.text.as_str()).collect()
}

// ============================================================================
// Binary
// ============================================================================

/// Path to a file under `tests/fixtures`.
pub fn fixture_path(name: &str) -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Runs the `breachdrill` binary to completion with a clean environment.
pub fn run_cli(args: &[&str]) -> std::process::Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_breachdrill"))
        .args(args)
        .env_remove("BREACHDRILL_CONFIG")
        .env_remove("BREACHDRILL_API_BASE")
        .env_remove("BREACHDRILL_WS_BASE")
        .env("NO_COLOR", "1")
        .stdin(std::process::Stdio::null())
        .output()
        .expect("failed to run breachdrill")
}

/// Serves every HTTP request on a loopback port with `status` and an empty
/// body. Returns the base URL; the server thread lives until the test exits.
pub fn serve_status(status: &str) -> String {
    use std::io::{BufRead, BufReader, Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let base = format!("http://{}", listener.local_addr().unwrap());
    let response =
        format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut content_length = 0;
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 && line != "\r\n" {
                if let Some((_, value)) = line
                    .split_once(':')
                    .filter(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                line.clear();
            }
            let mut body = vec![0; content_length];
            let _ = reader.read_exact(&mut body);
            let _ = stream.write_all(response.as_bytes());
        }
    });
    base
}
