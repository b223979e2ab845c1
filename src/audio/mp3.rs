//! Streaming MP3 → linear PCM decoding for compressed synthesis output.
//!
//! Chunks arriving from the synthesizer are buffered until a minimum frame
//! boundary (4 KB) is reached, then handed to a `symphonia` decode loop
//! running on the blocking pool. Decoded 16-bit PCM leaves through an
//! unbounded channel so the decode thread never blocks event delivery.
//!
//! The decode task is created lazily on the first chunk that crosses the
//! buffer threshold and torn down when the feed side closes, on synthesis
//! end, cancel, or drop alike.

use std::io;
use std::sync::mpsc as std_mpsc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::samples_to_pcm_bytes;

/// Bytes buffered before the first decode, to avoid partial-frame failures.
pub const MIN_DECODE_BUFFER: usize = 4 * 1024;

/// Incremental MP3 decoder for one synthesis response.
///
/// Feed compressed chunks as they arrive; PCM comes out of the receiver
/// returned by [`Mp3StreamDecoder::new`]. Call [`finish`](Self::finish) on
/// `audio.done` to flush, or drop the decoder to abandon it on cancel.
#[derive(Debug)]
pub struct Mp3StreamDecoder {
    pcm_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pending: Vec<u8>,
    feed_tx: Option<std_mpsc::Sender<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl Mp3StreamDecoder {
    /// Create a decoder and the channel its PCM output arrives on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (pcm_tx, pcm_rx) = mpsc::unbounded_channel();
        (
            Self {
                pcm_tx: Some(pcm_tx),
                pending: Vec::with_capacity(MIN_DECODE_BUFFER),
                feed_tx: None,
                task: None,
            },
            pcm_rx,
        )
    }

    /// Push one compressed chunk into the decoder.
    pub fn feed(&mut self, chunk: &[u8]) {
        if let Some(tx) = &self.feed_tx {
            if tx.send(chunk.to_vec()).is_err() {
                warn!("mp3 decode task ended early; dropping chunk");
            }
            return;
        }

        self.pending.extend_from_slice(chunk);
        if self.pending.len() >= MIN_DECODE_BUFFER {
            self.start_task();
        }
    }

    /// Close the feed and wait for the decode loop to flush its tail.
    pub async fn finish(mut self) {
        // A short response may never have crossed the buffer threshold.
        if self.feed_tx.is_none() && !self.pending.is_empty() {
            self.start_task();
        }
        drop(self.feed_tx.take());
        if let Some(task) = self.task.take()
            && task.await.is_err()
        {
            warn!("mp3 decode task panicked during flush");
        }
    }

    fn start_task(&mut self) {
        let (feed_tx, feed_rx) = std_mpsc::channel::<Vec<u8>>();
        let initial = std::mem::take(&mut self.pending);
        let Some(pcm_tx) = self.pcm_tx.take() else {
            return;
        };
        debug!(buffered = initial.len(), "starting mp3 decode task");
        self.task = Some(tokio::task::spawn_blocking(move || {
            decode_loop(initial, feed_rx, pcm_tx);
        }));
        self.feed_tx = Some(feed_tx);
    }
}

impl Drop for Mp3StreamDecoder {
    fn drop(&mut self) {
        // Closing the feed channel ends the blocking loop on its own.
        self.feed_tx.take();
    }
}

/// Blocking `Read` source fed by the decoder's chunk channel.
struct ChunkSource {
    rx: std::sync::Mutex<std_mpsc::Receiver<Vec<u8>>>,
    buf: Vec<u8>,
    pos: usize,
}

impl io::Read for ChunkSource {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.rx.lock().unwrap().recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                // Feed side closed: end of stream.
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl io::Seek for ChunkSource {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "live synthesis stream is not seekable",
        ))
    }
}

impl MediaSource for ChunkSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn decode_loop(
    initial: Vec<u8>,
    feed_rx: std_mpsc::Receiver<Vec<u8>>,
    pcm_tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    let source = ChunkSource {
        rx: std::sync::Mutex::new(feed_rx),
        buf: initial,
        pos: 0,
    };
    let stream = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension("mp3");
    hint.mime_type("audio/mpeg");

    let probed = match symphonia::default::get_probe().format(
        &hint,
        stream,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            warn!("mp3 probe failed: {e}");
            return;
        }
    };
    let mut format = probed.format;

    let Some(track) = format.default_track() else {
        warn!("mp3 stream has no audio track");
        return;
    };
    let track_id = track.id;
    let mut decoder = match symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
    {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!("mp3 decoder init failed: {e}");
            return;
        }
    };

    let mut sample_buf: Option<SampleBuffer<i16>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // Any read failure on a live stream means the feed ended.
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    if pcm_tx.send(samples_to_pcm_bytes(buf.samples())).is_err() {
                        // Consumer gone (cancelled); stop decoding.
                        break;
                    }
                }
            }
            // Skip a malformed frame, keep the stream alive.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping bad mp3 frame: {e}");
            }
            Err(e) => {
                warn!("mp3 decode stopped: {e}");
                break;
            }
        }
    }
}
