//! Start-of-utterance fade-in.
//!
//! Synthesizers tend to open with a codec transient; a linear gain ramp over
//! the first ~200 ms masks it. For µ-law the ramp pulls samples toward the
//! neutral byte by scaling in the linear domain and re-encoding; for PCM the
//! ramp scales signed samples toward zero.

use super::{AudioCodec, linear_to_ulaw, ulaw_to_linear};

/// Linear gain ramp applied to the opening bytes of one synthesis response.
///
/// Gain rises from 0.0 at byte 0 to 1.0 at `total_bytes`; bytes past the ramp
/// pass through untouched. One `FadeIn` instance covers exactly one synthesis.
#[derive(Debug)]
pub struct FadeIn {
    codec: AudioCodec,
    total_bytes: usize,
    consumed: usize,
}

impl FadeIn {
    /// Ramp covering `fade_ms` of audio in the given codec.
    ///
    /// MP3 payloads are faded after decoding, so the codec here is always
    /// µ-law or PCM; an MP3 codec yields a zero-length ramp.
    pub fn new(codec: AudioCodec, fade_ms: u32) -> Self {
        let total_bytes = codec
            .bytes_per_second()
            .map(|bps| (bps as u64 * u64::from(fade_ms) / 1_000) as usize)
            .unwrap_or(0);
        Self {
            codec,
            total_bytes,
            consumed: 0,
        }
    }

    /// Whether the ramp has fully played out.
    pub fn done(&self) -> bool {
        self.consumed >= self.total_bytes
    }

    /// Apply the ramp in place to the next chunk of the response.
    pub fn apply(&mut self, chunk: &mut [u8]) {
        if self.done() || chunk.is_empty() {
            self.consumed = self.consumed.saturating_add(chunk.len());
            return;
        }
        match self.codec {
            AudioCodec::Ulaw8k => self.apply_ulaw(chunk),
            AudioCodec::Pcm { .. } => self.apply_pcm(chunk),
            AudioCodec::Mp3 { .. } => {}
        }
        self.consumed = self.consumed.saturating_add(chunk.len());
    }

    fn gain_at(&self, offset: usize) -> f32 {
        let position = self.consumed + offset;
        if position >= self.total_bytes {
            1.0
        } else {
            position as f32 / self.total_bytes as f32
        }
    }

    fn apply_ulaw(&self, chunk: &mut [u8]) {
        for (i, byte) in chunk.iter_mut().enumerate() {
            let gain = self.gain_at(i);
            if gain >= 1.0 {
                break;
            }
            let linear = f32::from(ulaw_to_linear(*byte)) * gain;
            *byte = linear_to_ulaw(linear as i16);
        }
    }

    fn apply_pcm(&self, chunk: &mut [u8]) {
        let mut i = 0;
        while i + 1 < chunk.len() {
            let gain = self.gain_at(i);
            if gain >= 1.0 {
                break;
            }
            let sample = i16::from_le_bytes([chunk[i], chunk[i + 1]]);
            let scaled = (f32::from(sample) * gain) as i16;
            let bytes = scaled.to_le_bytes();
            chunk[i] = bytes[0];
            chunk[i + 1] = bytes[1];
            i += 2;
        }
    }
}
