//! Negotiated cast sessions: offer, parameter munging, answer handling
//! and the connected-but-silent watchdog.

use segno_core::{AtomicFlag, StateCell};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ipc::IpcSink;

/// How long the session waits for a cast client after pushing an offer.
pub const OFFER_WAIT_LIMIT: Duration = Duration::from_secs(10);

/// Poll step while waiting for a client.
pub const OFFER_WAIT_STEP: Duration = Duration::from_millis(200);

/// Stats poll cadence once connected.
const STATS_STEP: Duration = Duration::from_secs(1);

/// Consecutive zero-byte polls before the session is flagged silent.
const SILENT_POLLS: u32 = 5;

/// Encoding parameters forced onto every session description: stereo
/// in both directions, a fixed bitrate ceiling, no discontinuous
/// transmission.
pub const FORCED_PARAMS: [(&str, &str); 4] = [
    ("stereo", "1"),
    ("sprop-stereo", "1"),
    ("maxaveragebitrate", "510000"),
    ("usedtx", "0"),
];

/// Lifecycle of a negotiated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// Offer pushed, no answer yet. An unanswered offer stands.
    Offering,
    Connected,
    /// The answer was rejected; a new offer starts over.
    Failed,
}

impl From<SessionPhase> for u8 {
    fn from(phase: SessionPhase) -> u8 {
        match phase {
            SessionPhase::Idle => 0,
            SessionPhase::Offering => 1,
            SessionPhase::Connected => 2,
            SessionPhase::Failed => 3,
        }
    }
}

impl From<u8> for SessionPhase {
    fn from(raw: u8) -> SessionPhase {
        match raw {
            1 => SessionPhase::Offering,
            2 => SessionPhase::Connected,
            3 => SessionPhase::Failed,
            _ => SessionPhase::Idle,
        }
    }
}

/// Whether a connected session is actually moving audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionHealth {
    Ok,
    /// Connected, but the sink's byte counter has not moved.
    Silent,
}

/// JSON envelope for offers and answers on the signaling channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// Rewrite a session description so every format-parameter line carries
/// [`FORCED_PARAMS`]. Other lines pass through; the result uses CRLF
/// line endings throughout.
pub fn munge_session_description(sdp: &str) -> String {
    let lines: Vec<String> = sdp
        .lines()
        .map(|line| match line.strip_prefix("a=fmtp:") {
            Some(rest) => munge_fmtp(rest),
            None => line.to_string(),
        })
        .collect();
    lines.join("\r\n")
}

fn munge_fmtp(rest: &str) -> String {
    let (payload_type, params) = match rest.split_once(' ') {
        Some((payload_type, params)) => (payload_type, params),
        None => (rest, ""),
    };
    let mut pairs: Vec<(String, String)> = params
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .map(|part| match part.trim().split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (part.trim().to_string(), String::new()),
        })
        .collect();
    for (key, value) in FORCED_PARAMS {
        match pairs.iter_mut().find(|(existing, _)| existing == key) {
            Some(pair) => pair.1 = value.to_string(),
            None => pairs.push((key.to_string(), value.to_string())),
        }
    }
    let joined = pairs
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join(";");
    format!("a=fmtp:{payload_type} {joined}")
}

/// Minimal audio-only description for the offer, already munged.
fn build_offer() -> String {
    let base = "v=0\r\n\
                o=- 0 0 IN IP4 127.0.0.1\r\n\
                s=segno-cast\r\n\
                t=0 0\r\n\
                m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
                a=rtpmap:111 opus/48000/2\r\n\
                a=fmtp:111 minptime=10;useinbandfec=1\r\n\
                a=sendonly";
    munge_session_description(base)
}

struct SessionShared {
    phase: StateCell<SessionPhase>,
    silent: AtomicFlag,
    running: AtomicFlag,
}

/// One negotiated cast session over an [`IpcSink`].
pub struct NegotiatedSession {
    sink: Arc<dyn IpcSink>,
    shared: Arc<SessionShared>,
    offer_thread: Option<JoinHandle<()>>,
    stats_thread: Option<JoinHandle<()>>,
    local_description: String,
    remote_description: Option<String>,
}

impl NegotiatedSession {
    /// Build the munged offer, push it as signaling JSON and wait on a
    /// background thread, bounded, for a client to attach. Without a
    /// client the offer stands and the phase stays
    /// [`SessionPhase::Offering`].
    pub fn offer(sink: Arc<dyn IpcSink>) -> Result<Self> {
        let sdp = build_offer();
        let message = serde_json::to_string(&SignalMessage {
            kind: "offer".into(),
            sdp: sdp.clone(),
        })?;
        sink.push_signaling(&message)?;

        let shared = Arc::new(SessionShared {
            phase: StateCell::new(SessionPhase::Offering),
            silent: AtomicFlag::default(),
            running: AtomicFlag::new(true),
        });
        let thread_sink = Arc::clone(&sink);
        let thread_shared = Arc::clone(&shared);
        let offer_thread = thread::Builder::new()
            .name("segno-cast-offer".into())
            .spawn(move || wait_for_client(thread_sink, thread_shared))?;

        Ok(Self {
            sink,
            shared,
            offer_thread: Some(offer_thread),
            stats_thread: None,
            local_description: sdp,
            remote_description: None,
        })
    }

    /// Apply a remote answer: re-assert the forced encoding parameters
    /// on it, mark the session connected and start the stats watchdog.
    /// A message that is not an answer fails the session.
    pub fn handle_answer(&mut self, message: &str) -> Result<()> {
        let signal: SignalMessage = match serde_json::from_str(message) {
            Ok(signal) => signal,
            Err(err) => {
                self.shared.phase.set(SessionPhase::Failed);
                return Err(err.into());
            }
        };
        if signal.kind != "answer" {
            self.shared.phase.set(SessionPhase::Failed);
            return Err(Error::Signaling("expected an answer"));
        }

        self.remote_description = Some(munge_session_description(&signal.sdp));
        self.shared.phase.set(SessionPhase::Connected);
        info!("cast session connected");

        let thread_sink = Arc::clone(&self.sink);
        let thread_shared = Arc::clone(&self.shared);
        self.stats_thread = Some(
            thread::Builder::new()
                .name("segno-cast-stats".into())
                .spawn(move || stats_watchdog(thread_sink, thread_shared))?,
        );
        Ok(())
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase.get()
    }

    pub fn health(&self) -> SessionHealth {
        if self.shared.silent.get() {
            SessionHealth::Silent
        } else {
            SessionHealth::Ok
        }
    }

    pub fn local_description(&self) -> &str {
        &self.local_description
    }

    pub fn remote_description(&self) -> Option<&str> {
        self.remote_description.as_deref()
    }

    /// Tear the session down. Idempotent.
    pub fn close(&mut self) {
        self.shared.running.set(false);
        if let Some(thread) = self.offer_thread.take() {
            let _ = thread.join();
        }
        if let Some(thread) = self.stats_thread.take() {
            let _ = thread.join();
        }
        self.shared.phase.set(SessionPhase::Idle);
    }
}

impl Drop for NegotiatedSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn wait_for_client(sink: Arc<dyn IpcSink>, shared: Arc<SessionShared>) {
    let steps = (OFFER_WAIT_LIMIT.as_millis() / OFFER_WAIT_STEP.as_millis()) as u32;
    for _ in 0..steps {
        if !shared.running.get() {
            return;
        }
        if sink.client_count() > 0 {
            debug!("cast client attached, offer delivered");
            return;
        }
        thread::sleep(OFFER_WAIT_STEP);
    }
    info!("no cast client attached within the wait limit, offer stands");
}

/// Sleep `total` in small steps so `close` never waits a full period.
/// Returns false once the session is shutting down.
fn sleep_while_running(shared: &SessionShared, total: Duration) -> bool {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < total {
        if !shared.running.get() {
            return false;
        }
        thread::sleep(step);
        slept += step;
    }
    shared.running.get()
}

/// One stats observation; returns the updated consecutive-silence count.
fn observe_bytes(bytes: u64, silent_polls: u32, shared: &SessionShared) -> u32 {
    if bytes > 0 {
        shared.silent.set(false);
        return 0;
    }
    let polls = silent_polls + 1;
    if polls == SILENT_POLLS {
        warn!("cast session connected but silent");
        shared.silent.set(true);
    }
    polls
}

fn stats_watchdog(sink: Arc<dyn IpcSink>, shared: Arc<SessionShared>) {
    let mut silent_polls = 0;
    while shared.running.get() && shared.phase.get() == SessionPhase::Connected {
        if !sleep_while_running(&shared, STATS_STEP) {
            return;
        }
        silent_polls = observe_bytes(sink.bytes_sent(), silent_polls, &shared);
    }
}
