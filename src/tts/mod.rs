//! Streaming text-to-speech client.
//!
//! One synthesis request is one streaming POST; the response body arrives as
//! chunked audio in the provider's output format. Codec bridging lives
//! entirely inside this client: pass-through µ-law is forwarded as-is, PCM
//! is forwarded (optionally decimated), MP3 is decoded to PCM by a dedicated
//! decoder task. The start-of-utterance fade and the optional downshift are
//! applied here so the session never sees the source codec.
//!
//! Every synthesis carries a fresh request id. Cancellation closes the
//! upstream stream, empties decoder state and emits `Cancelled`; consumers
//! discard any late deltas by request id.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::{AudioCodec, FadeIn, Mp3StreamDecoder, decimate_pcm, downshift_factor};
use crate::config::{TtsConfig, TtsOutputMode};
use crate::error::{Result, SessionError};
use crate::session::metrics::CostMetrics;

/// Telephony link rate targeted by the optional downshift.
const TELEPHONY_RATE: u32 = 8_000;

/// Events emitted by the synthesis client.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsEvent {
    /// A synthesis request was accepted by the backend.
    Started {
        /// Identifier scoping all further events for this synthesis.
        request_id: Uuid,
    },
    /// One ordered chunk of output audio.
    AudioDelta {
        /// The synthesis this chunk belongs to.
        request_id: Uuid,
        /// Bridged audio bytes in the client's output codec.
        delta: Bytes,
    },
    /// Terminal: the synthesis finished (possibly truncated by an error).
    Done {
        /// The synthesis that finished.
        request_id: Uuid,
        /// Total bridged bytes emitted.
        total_bytes: u64,
        /// Playback duration of the emitted audio, when computable.
        duration_ms: Option<u64>,
        /// Mid-stream failure that truncated the response.
        error: Option<String>,
    },
    /// Terminal: the synthesis was cancelled mid-flight.
    Cancelled {
        /// The synthesis that was cancelled.
        request_id: Uuid,
    },
}

impl TtsEvent {
    /// The request this event is scoped to.
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Started { request_id }
            | Self::AudioDelta { request_id, .. }
            | Self::Done { request_id, .. }
            | Self::Cancelled { request_id } => *request_id,
        }
    }
}

/// Streaming synthesis client.
pub struct TtsClient {
    config: TtsConfig,
    voice: Mutex<String>,
    client: reqwest::Client,
    metrics: Arc<CostMetrics>,
    active: Mutex<Option<(Uuid, CancellationToken)>>,
}

impl std::fmt::Debug for TtsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtsClient")
            .field("url", &self.config.url)
            .field("output_mode", &self.config.output_mode)
            .finish()
    }
}

impl TtsClient {
    /// Create a client for the configured synthesizer.
    pub fn new(config: TtsConfig, metrics: Arc<CostMetrics>) -> Self {
        let voice = Mutex::new(config.voice.clone());
        Self {
            config,
            voice,
            client: reqwest::Client::new(),
            metrics,
            active: Mutex::new(None),
        }
    }

    /// One-time setup: format validation before the call begins.
    ///
    /// # Errors
    ///
    /// [`SessionError::Config`] for an unusable voice or format.
    pub fn initialize(&self) -> Result<()> {
        if self.config.url.is_empty() {
            return Err(SessionError::Config("tts.url is empty".into()));
        }
        if lock(&self.voice).is_empty() {
            return Err(SessionError::Config("tts.voice is empty".into()));
        }
        if self.config.output_format.is_empty() {
            return Err(SessionError::Config("tts.output_format is empty".into()));
        }
        info!(
            format = %self.config.output_format,
            mode = ?self.config.output_mode,
            "synthesizer ready"
        );
        Ok(())
    }

    /// Change the active voice for subsequent requests.
    pub fn set_voice(&self, voice: impl Into<String>) {
        *lock(&self.voice) = voice.into();
    }

    /// The codec of the audio this client emits after bridging.
    pub fn output_codec(&self) -> AudioCodec {
        let source_rate = self.config.sample_rate;
        let rate = if self.downshift().is_some() {
            TELEPHONY_RATE
        } else {
            source_rate
        };
        match self.config.output_mode {
            TtsOutputMode::PassThrough => AudioCodec::Ulaw8k,
            TtsOutputMode::Pcm | TtsOutputMode::Mp3 => AudioCodec::Pcm { sample_rate: rate },
        }
    }

    fn downshift(&self) -> Option<u32> {
        if !self.config.resample_downshift
            || self.config.output_mode == TtsOutputMode::PassThrough
        {
            return None;
        }
        downshift_factor(self.config.sample_rate, TELEPHONY_RATE)
    }

    /// Abort the in-flight synthesis, if any.
    ///
    /// The running synthesis task emits the `Cancelled` terminal event.
    pub fn cancel(&self) {
        if let Some((request_id, token)) = lock(&self.active).take() {
            debug!(%request_id, "cancelling synthesis");
            token.cancel();
        }
    }

    /// Synthesize `text`, emitting `Started`, ordered `AudioDelta`s and one
    /// terminal event on `events_tx`. Returns once the terminal event has
    /// been emitted.
    ///
    /// # Errors
    ///
    /// [`SessionError::Tts`] when the request cannot be started; mid-stream
    /// failures terminate via `Done { error: Some(..) }` instead.
    pub async fn synthesize_streaming(
        &self,
        text: &str,
        events_tx: &mpsc::UnboundedSender<TtsEvent>,
    ) -> Result<()> {
        let request_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *lock(&self.active) = Some((request_id, cancel.clone()));

        let voice = lock(&self.voice).clone();
        let mut body = serde_json::json!({
            "text": text,
            "voice": voice,
            "output_format": self.config.output_format,
        });
        if let Some(model) = &self.config.model
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("model".into(), serde_json::json!(model));
        }

        let url = format!("{}/v1/synthesize", self.config.url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = tokio::select! {
            () = cancel.cancelled() => {
                // Cancelled before the backend answered; nothing started.
                return Ok(());
            }
            response = request.send() => response
                .map_err(|e| SessionError::Tts(format!("synthesis request failed: {e}")))?,
        };
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SessionError::Tts(format!(
                "synthesis HTTP {}: {detail}",
                status.as_u16()
            )));
        }

        self.metrics.add_tts_characters(text.chars().count() as u64);
        let _ = events_tx.send(TtsEvent::Started { request_id });

        let outcome = self
            .bridge_stream(request_id, response.bytes_stream(), events_tx, &cancel)
            .await;

        // Clear the active slot unless a newer synthesis replaced it.
        {
            let mut active = lock(&self.active);
            if matches!(*active, Some((id, _)) if id == request_id) {
                *active = None;
            }
        }

        let _ = events_tx.send(match outcome {
            StreamOutcome::Cancelled => TtsEvent::Cancelled { request_id },
            StreamOutcome::Finished { total_bytes, error } => TtsEvent::Done {
                request_id,
                total_bytes,
                duration_ms: self
                    .output_codec()
                    .bytes_per_second()
                    .map(|bps| total_bytes * 1_000 / u64::from(bps)),
                error,
            },
        });
        Ok(())
    }

    async fn bridge_stream(
        &self,
        request_id: Uuid,
        mut body: impl futures_util::Stream<Item = reqwest::Result<Bytes>> + Unpin,
        events_tx: &mpsc::UnboundedSender<TtsEvent>,
        cancel: &CancellationToken,
    ) -> StreamOutcome {
        let fade_codec = match self.config.output_mode {
            TtsOutputMode::PassThrough => AudioCodec::Ulaw8k,
            TtsOutputMode::Pcm | TtsOutputMode::Mp3 => AudioCodec::Pcm {
                sample_rate: self.config.sample_rate,
            },
        };
        let mut fade = FadeIn::new(fade_codec, self.config.fade_in_ms);
        let downshift = self.downshift();
        let mut total_bytes: u64 = 0;
        let mut error: Option<String> = None;

        let mut emit = |chunk: Vec<u8>| {
            let mut chunk = chunk;
            fade.apply(&mut chunk);
            let chunk = match downshift {
                Some(factor) => decimate_pcm(&chunk, factor),
                None => chunk,
            };
            if chunk.is_empty() {
                return;
            }
            total_bytes += chunk.len() as u64;
            let _ = events_tx.send(TtsEvent::AudioDelta {
                request_id,
                delta: Bytes::from(chunk),
            });
        };

        match self.config.output_mode {
            TtsOutputMode::PassThrough | TtsOutputMode::Pcm => loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => return StreamOutcome::Cancelled,
                    chunk = body.next() => chunk,
                };
                match chunk {
                    Some(Ok(chunk)) => emit(chunk.to_vec()),
                    Some(Err(e)) => {
                        warn!(%request_id, "synthesis stream broke: {e}");
                        error = Some(e.to_string());
                        break;
                    }
                    None => break,
                }
            },
            TtsOutputMode::Mp3 => {
                let (mut decoder, mut pcm_rx) = Mp3StreamDecoder::new();
                let mut pcm_open = true;
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            // Dropping the decoder empties its state.
                            return StreamOutcome::Cancelled;
                        }
                        pcm = pcm_rx.recv(), if pcm_open => {
                            match pcm {
                                Some(pcm) => emit(pcm),
                                None => pcm_open = false,
                            }
                        }
                        chunk = body.next() => match chunk {
                            Some(Ok(chunk)) => decoder.feed(&chunk),
                            Some(Err(e)) => {
                                warn!(%request_id, "synthesis stream broke: {e}");
                                error = Some(e.to_string());
                                break;
                            }
                            None => break,
                        },
                    }
                }
                // Flush the decoder tail, still subject to cancellation.
                decoder.finish().await;
                while pcm_open {
                    let pcm = tokio::select! {
                        () = cancel.cancelled() => return StreamOutcome::Cancelled,
                        pcm = pcm_rx.recv() => pcm,
                    };
                    match pcm {
                        Some(pcm) => emit(pcm),
                        None => break,
                    }
                }
            }
        }

        StreamOutcome::Finished { total_bytes, error }
    }
}

enum StreamOutcome {
    Cancelled,
    Finished {
        total_bytes: u64,
        error: Option<String>,
    },
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
