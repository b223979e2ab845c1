//! Streaming speech-to-text client.
//!
//! Holds one persistent WebSocket to the recognizer for the duration of the
//! call. Audio goes out as binary frames; JSON control and token messages
//! ride text frames. A supervisor task owns the socket and multiplexes
//! writes, reads, the keepalive clock and reconnection, so callers get a
//! non-blocking [`SttClient::send_audio`] and an ordered event stream.

pub mod protocol;
pub mod transcript;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioFrame;
use crate::config::SttConfig;
use crate::error::{Result, SessionError};
use crate::session::metrics::CostMetrics;
use protocol::{ClientMessage, ServerMessage};
use transcript::TranscriptAccumulator;

/// Grace window after a graceful stop, for trailing finals.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// WebSocket close code reported for abnormal transport loss.
const ABNORMAL_CLOSE: u16 = 1006;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Recognizer session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SttState {
    /// Not yet connected.
    Idle = 0,
    /// Dial in progress.
    Connecting = 1,
    /// Session open; audio flows.
    Ready = 2,
    /// Transport lost; backoff in progress.
    Reconnecting = 3,
    /// Unrecoverable; no further reconnects.
    Failed = 4,
    /// Closed on purpose.
    Terminated = 5,
}

/// Lock-free cell for the session state.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SttState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> SttState {
        match self.0.load(Ordering::Relaxed) {
            0 => SttState::Idle,
            1 => SttState::Connecting,
            2 => SttState::Ready,
            3 => SttState::Reconnecting,
            4 => SttState::Failed,
            _ => SttState::Terminated,
        }
    }

    fn set(&self, state: SttState) {
        self.0.store(state as u8, Ordering::Relaxed);
    }
}

/// Events emitted by the recognizer client, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Recognizer accepted the session.
    Ready,
    /// Combined in-progress view of the current utterance.
    Interim {
        /// `final_so_far + interim_tail`.
        text: String,
    },
    /// A newly confirmed fragment.
    Partial {
        /// The confirmed fragment.
        delta: String,
    },
    /// A completed utterance, paired with the endpoint signal.
    Final {
        /// Trimmed utterance text.
        text: String,
    },
    /// The caller stopped talking; same payload as the paired `Final`.
    SpeechEnded {
        /// Trimmed utterance text.
        transcript: String,
    },
    /// Graceful close finished.
    Finished,
    /// Transport dropped.
    Disconnected {
        /// WebSocket close code (1006 for abnormal loss).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// Transport restored after `attempts` tries.
    Reconnected {
        /// 1-based attempt number that succeeded.
        attempts: u32,
    },
    /// All reconnect attempts exhausted; client stays disconnected.
    ReconnectFailed,
    /// Fatal recognizer error (authentication, protocol).
    Error {
        /// Description from the recognizer.
        message: String,
    },
}

enum Outbound {
    Audio(Bytes),
    Control(ClientMessage),
    CloseGraceful,
}

/// Streaming recognizer client.
pub struct SttClient {
    config: SttConfig,
    state: Arc<StateCell>,
    writable: Arc<AtomicBool>,
    in_call: Arc<AtomicBool>,
    last_audio_ms: Arc<AtomicU64>,
    epoch: Instant,
    outbound_tx: Option<mpsc::UnboundedSender<Outbound>>,
    cancel: CancellationToken,
    metrics: Arc<CostMetrics>,
}

impl std::fmt::Debug for SttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttClient")
            .field("url", &self.config.url)
            .field("state", &self.state.get())
            .finish()
    }
}

impl SttClient {
    /// Create a client; nothing is dialed until [`connect`](Self::connect).
    pub fn new(config: SttConfig, metrics: Arc<CostMetrics>) -> Self {
        Self {
            config,
            state: Arc::new(StateCell::new(SttState::Idle)),
            writable: Arc::new(AtomicBool::new(false)),
            in_call: Arc::new(AtomicBool::new(false)),
            last_audio_ms: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
            outbound_tx: None,
            cancel: CancellationToken::new(),
            metrics,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SttState {
        self.state.get()
    }

    /// Establish the recognizer session and start the supervisor task.
    ///
    /// Sends the configuration frame and transitions to READY. The returned
    /// receiver carries every [`SttEvent`] for the life of the session.
    ///
    /// # Errors
    ///
    /// [`SessionError::SttConnect`] when the socket cannot be established
    /// and configured within the configured timeout.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<SttEvent>> {
        if self.state.get() != SttState::Idle {
            return Err(SessionError::SttConnect("already connected".into()));
        }
        self.state.set(SttState::Connecting);

        let deadline = Duration::from_millis(self.config.connect_timeout_ms);
        let mut socket = match timeout(deadline, dial(&self.config)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                self.state.set(SttState::Failed);
                return Err(e);
            }
            Err(_) => {
                self.state.set(SttState::Failed);
                return Err(SessionError::SttConnect(format!(
                    "no session within {}ms",
                    self.config.connect_timeout_ms
                )));
            }
        };
        if let Err(e) = send_json(&mut socket, &ClientMessage::configure(&self.config)).await {
            self.state.set(SttState::Failed);
            return Err(e);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound_tx = Some(outbound_tx);
        self.in_call.store(true, Ordering::Relaxed);
        self.writable.store(true, Ordering::Relaxed);
        self.state.set(SttState::Ready);
        // Start the audio-idle clock at connect time.
        self.last_audio_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);

        let supervisor = Supervisor {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            writable: Arc::clone(&self.writable),
            in_call: Arc::clone(&self.in_call),
            last_audio_ms: Arc::clone(&self.last_audio_ms),
            epoch: self.epoch,
            cancel: self.cancel.clone(),
            events_tx,
            accumulator: TranscriptAccumulator::new(),
        };
        tokio::spawn(supervisor.run(socket, outbound_rx));

        info!(url = %self.config.url, "recognizer session established");
        Ok(events_rx)
    }

    /// Forward one raw audio frame. Non-blocking.
    ///
    /// Returns `false` (dropping the frame silently) when the session is not
    /// READY or the transport is not writable.
    pub fn send_audio(&self, frame: &AudioFrame) -> bool {
        if self.state.get() != SttState::Ready || !self.writable.load(Ordering::Relaxed) {
            return false;
        }
        let Some(tx) = &self.outbound_tx else {
            return false;
        };
        if tx.send(Outbound::Audio(frame.payload.clone())).is_err() {
            return false;
        }
        self.last_audio_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        if let Some(ms) = frame.duration_ms() {
            self.metrics.add_stt_audio_ms(ms);
        }
        true
    }

    /// Ask the recognizer to flush any pending partial as final.
    pub fn finalize(&self, trailing_silence_ms: u64) {
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(Outbound::Control(ClientMessage::Finalize {
                trailing_silence_ms,
            }));
        }
    }

    /// Graceful close: close frame, short grace window for trailing finals,
    /// then TERMINATED. Reconnection is disabled from this point.
    pub fn stop(&self) {
        self.in_call.store(false, Ordering::Relaxed);
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(Outbound::CloseGraceful);
        }
    }

    /// Immediate close with no grace window.
    pub fn cancel(&self) {
        self.in_call.store(false, Ordering::Relaxed);
        self.cancel.cancel();
    }
}

async fn dial(config: &SttConfig) -> Result<WsStream> {
    let (socket, _response) = connect_async(config.url.as_str())
        .await
        .map_err(|e| SessionError::SttConnect(format!("dial {} failed: {e}", config.url)))?;
    Ok(socket)
}

async fn send_json(socket: &mut WsStream, message: &ClientMessage) -> Result<()> {
    let json = serde_json::to_string(message)
        .map_err(|e| SessionError::Stt(format!("encode failed: {e}")))?;
    socket
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| SessionError::Stt(format!("write failed: {e}")))
}

enum SocketEnd {
    Cancelled,
    Graceful,
    Fatal(String),
    Closed { code: u16, reason: String },
}

struct Supervisor {
    config: SttConfig,
    state: Arc<StateCell>,
    writable: Arc<AtomicBool>,
    in_call: Arc<AtomicBool>,
    last_audio_ms: Arc<AtomicU64>,
    epoch: Instant,
    cancel: CancellationToken,
    events_tx: mpsc::UnboundedSender<SttEvent>,
    accumulator: TranscriptAccumulator,
}

impl Supervisor {
    async fn run(mut self, first_socket: WsStream, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>) {
        let mut socket = Some(first_socket);
        while let Some(stream) = socket.take() {
            match self.run_socket(stream, &mut outbound_rx).await {
                SocketEnd::Cancelled => {
                    self.state.set(SttState::Terminated);
                }
                SocketEnd::Graceful => {
                    self.emit(SttEvent::Finished);
                    self.state.set(SttState::Terminated);
                }
                SocketEnd::Fatal(message) => {
                    self.emit(SttEvent::Error { message });
                    self.state.set(SttState::Failed);
                }
                SocketEnd::Closed { code, reason } => {
                    self.writable.store(false, Ordering::Relaxed);
                    self.emit(SttEvent::Disconnected {
                        code,
                        reason: reason.clone(),
                    });
                    let eligible = code != 1000
                        && self.in_call.load(Ordering::Relaxed)
                        && self.config.auto_reconnect;
                    if !eligible {
                        self.state.set(SttState::Failed);
                        break;
                    }
                    self.state.set(SttState::Reconnecting);
                    match self.reconnect().await {
                        Some(restored) => socket = Some(restored),
                        None => {
                            if self.cancel.is_cancelled() {
                                self.state.set(SttState::Terminated);
                            } else {
                                self.emit(SttEvent::ReconnectFailed);
                                self.state.set(SttState::Failed);
                            }
                        }
                    }
                }
            }
        }
        debug!("recognizer supervisor finished");
    }

    /// Linear-backoff redial. Buffers are untouched so an in-flight
    /// utterance continues on the restored socket.
    async fn reconnect(&mut self) -> Option<WsStream> {
        for attempt in 1..=self.config.max_reconnect_attempts {
            let delay =
                Duration::from_millis(self.config.reconnect_base_delay_ms * u64::from(attempt));
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = sleep(delay) => {}
            }
            match dial(&self.config).await {
                Ok(mut restored) => {
                    if let Err(e) =
                        send_json(&mut restored, &ClientMessage::configure(&self.config)).await
                    {
                        warn!(attempt, "reconfigure after reconnect failed: {e}");
                        continue;
                    }
                    self.writable.store(true, Ordering::Relaxed);
                    self.state.set(SttState::Ready);
                    self.emit(SttEvent::Reconnected { attempts: attempt });
                    info!(attempt, "recognizer reconnected");
                    return Some(restored);
                }
                Err(e) => {
                    warn!(attempt, "recognizer reconnect failed: {e}");
                }
            }
        }
        None
    }

    async fn run_socket(
        &mut self,
        stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ) -> SocketEnd {
        let (mut sink, mut reader) = stream.split();
        let cancel = self.cancel.clone();
        let keepalive_period = Duration::from_millis(self.config.keepalive_interval_ms);
        let mut keepalive = interval_at(
            (Instant::now() + keepalive_period).into(),
            keepalive_period,
        );
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return SocketEnd::Cancelled;
                }

                outbound = outbound_rx.recv() => match outbound {
                    None => return SocketEnd::Cancelled,
                    Some(Outbound::Audio(payload)) => {
                        if sink.send(WsMessage::Binary(payload.to_vec())).await.is_err() {
                            return SocketEnd::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: "audio write failed".into(),
                            };
                        }
                    }
                    Some(Outbound::Control(message)) => {
                        let json = match serde_json::to_string(&message) {
                            Ok(json) => json,
                            Err(_) => continue,
                        };
                        if sink.send(WsMessage::Text(json)).await.is_err() {
                            return SocketEnd::Closed {
                                code: ABNORMAL_CLOSE,
                                reason: "control write failed".into(),
                            };
                        }
                    }
                    Some(Outbound::CloseGraceful) => {
                        return self.graceful_close(&mut sink, &mut reader).await;
                    }
                },

                _ = keepalive.tick() => {
                    let idle_ms = (self.epoch.elapsed().as_millis() as u64)
                        .saturating_sub(self.last_audio_ms.load(Ordering::Relaxed));
                    if idle_ms < self.config.audio_idle_threshold_ms {
                        continue;
                    }
                    let json = match serde_json::to_string(&ClientMessage::Keepalive) {
                        Ok(json) => json,
                        Err(_) => continue,
                    };
                    debug!(idle_ms, "sending recognizer keepalive");
                    // The transport may close mid-send; that is a
                    // disconnection, not an error to escalate.
                    if sink.send(WsMessage::Text(json)).await.is_err() {
                        return SocketEnd::Closed {
                            code: ABNORMAL_CLOSE,
                            reason: "keepalive write failed".into(),
                        };
                    }
                }

                incoming = reader.next() => match incoming {
                    None => return SocketEnd::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: "connection dropped".into(),
                    },
                    Some(Err(e)) => return SocketEnd::Closed {
                        code: ABNORMAL_CLOSE,
                        reason: format!("read failed: {e}"),
                    },
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(end) = self.handle_server_text(&text, false) {
                            return end;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                            None => (ABNORMAL_CLOSE, String::new()),
                        };
                        return SocketEnd::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Close frame then a bounded read window for trailing finals.
    async fn graceful_close(
        &mut self,
        sink: &mut SplitSink<WsStream, WsMessage>,
        reader: &mut SplitStream<WsStream>,
    ) -> SocketEnd {
        self.writable.store(false, Ordering::Relaxed);
        if let Ok(json) = serde_json::to_string(&ClientMessage::Close) {
            let _ = sink.send(WsMessage::Text(json)).await;
        }
        let _ = sink.send(WsMessage::Close(None)).await;

        let deadline = Instant::now() + STOP_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, reader.next()).await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    if self.handle_server_text(&text, true).is_some() {
                        break;
                    }
                }
                Ok(Some(Ok(WsMessage::Close(_)))) | Ok(None) | Err(_) => break,
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(_))) => break,
            }
        }
        SocketEnd::Graceful
    }

    /// Returns a terminal [`SocketEnd`] only for fatal recognizer errors.
    fn handle_server_text(&mut self, text: &str, closing: bool) -> Option<SocketEnd> {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("unparseable recognizer message: {e}");
                return None;
            }
        };
        match message {
            ServerMessage::Ready => {
                self.emit(SttEvent::Ready);
            }
            ServerMessage::Tokens { tokens } => {
                let outcome = self.accumulator.push_batch(&tokens);
                for delta in outcome.partial_deltas {
                    self.emit(SttEvent::Partial { delta });
                }
                if let Some(text) = outcome.interim {
                    self.emit(SttEvent::Interim { text });
                }
                if let Some(transcript) = outcome.finalized {
                    self.emit(SttEvent::Final {
                        text: transcript.clone(),
                    });
                    self.emit(SttEvent::SpeechEnded { transcript });
                }
            }
            ServerMessage::Error { message, fatal } => {
                if fatal {
                    return Some(SocketEnd::Fatal(message));
                }
                // Expected when a session ends with no speech in it.
                if closing && message.contains("no audio") {
                    debug!("recognizer reported no audio on graceful end");
                } else {
                    warn!("recognizer warning: {message}");
                }
            }
            ServerMessage::Other => {}
        }
        None
    }

    fn emit(&self, event: SttEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cell_round_trips() {
        let cell = StateCell::new(SttState::Idle);
        for state in [
            SttState::Connecting,
            SttState::Ready,
            SttState::Reconnecting,
            SttState::Failed,
            SttState::Terminated,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }

    #[test]
    fn send_audio_false_before_connect() {
        let client = SttClient::new(SttConfig::default(), Arc::new(CostMetrics::default()));
        let frame = AudioFrame::ulaw(vec![0xFFu8; 160]);
        assert!(!client.send_audio(&frame));
    }

    #[tokio::test]
    async fn connect_times_out_against_dead_endpoint() {
        // RFC 5737 TEST-NET address: connection will not complete.
        let config = SttConfig {
            url: "ws://192.0.2.1:9".into(),
            connect_timeout_ms: 200,
            ..SttConfig::default()
        };
        let mut client = SttClient::new(config, Arc::new(CostMetrics::default()));
        let result = client.connect().await;
        assert!(matches!(result, Err(SessionError::SttConnect(_))));
        assert_eq!(client.state(), SttState::Failed);
    }

    #[tokio::test]
    async fn second_connect_rejected() {
        let config = SttConfig {
            url: "ws://192.0.2.1:9".into(),
            connect_timeout_ms: 50,
            ..SttConfig::default()
        };
        let mut client = SttClient::new(config, Arc::new(CostMetrics::default()));
        let _ = client.connect().await;
        // Failed, not Idle: connect is single-shot either way.
        assert!(client.connect().await.is_err());
    }
}
