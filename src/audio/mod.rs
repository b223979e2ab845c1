//! Audio frames, codecs and G.711 µ-law conversion.
//!
//! Frames are value-passed between session tasks; payloads ride in
//! [`bytes::Bytes`] so clones are cheap. Gaps between utterances are the
//! absence of frames, never silence frames.

mod decimate;
mod fade;
mod mp3;

pub use decimate::{decimate_pcm, downshift_factor};
pub use fade::FadeIn;
pub use mp3::Mp3StreamDecoder;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The neutral µ-law byte: linear zero encodes to `0xFF`.
pub const ULAW_SILENCE: u8 = 0xFF;

/// Declared codec of an audio payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "codec", rename_all = "snake_case")]
pub enum AudioCodec {
    /// G.711 µ-law, 8 kHz, one byte per sample.
    Ulaw8k,
    /// Signed 16-bit little-endian linear PCM.
    Pcm {
        /// Sample rate in Hz.
        sample_rate: u32,
    },
    /// MPEG layer III at the declared decoded sample rate.
    Mp3 {
        /// Decoded sample rate in Hz.
        sample_rate: u32,
    },
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self::Ulaw8k
    }
}

impl AudioCodec {
    /// Payload bytes per second of audio, where the codec has a fixed rate.
    ///
    /// MP3 has no usable byte rate before decoding and returns `None`.
    pub fn bytes_per_second(&self) -> Option<u32> {
        match self {
            Self::Ulaw8k => Some(8_000),
            Self::Pcm { sample_rate } => Some(sample_rate * 2),
            Self::Mp3 { .. } => None,
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Ulaw8k => 8_000,
            Self::Pcm { sample_rate } | Self::Mp3 { sample_rate } => *sample_rate,
        }
    }
}

/// A chunk of encoded audio with its declared codec.
///
/// Ordered within a single utterance; ownership transfers with the frame.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Encoded payload.
    pub payload: Bytes,
    /// Codec of the payload.
    pub codec: AudioCodec,
}

impl AudioFrame {
    /// Create a frame from a payload and codec.
    pub fn new(payload: impl Into<Bytes>, codec: AudioCodec) -> Self {
        Self {
            payload: payload.into(),
            codec,
        }
    }

    /// A 20 ms µ-law telephony frame (160 bytes at 8 kHz).
    pub fn ulaw(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, AudioCodec::Ulaw8k)
    }

    /// Audio duration represented by this frame, in milliseconds.
    ///
    /// `None` for codecs without a fixed byte rate.
    pub fn duration_ms(&self) -> Option<u64> {
        let bps = self.codec.bytes_per_second()?;
        Some(self.payload.len() as u64 * 1_000 / bps as u64)
    }
}

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32_635;

/// Encode one linear PCM sample as a G.711 µ-law byte.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    if pcm > ULAW_CLIP {
        pcm = ULAW_CLIP;
    }
    pcm += ULAW_BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one G.711 µ-law byte to a linear PCM sample.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let b = !byte;
    let sign = b & 0x80;
    let exponent = i32::from((b >> 4) & 0x07);
    let mantissa = i32::from(b & 0x0F);
    let mut sample = ((mantissa << 3) + ULAW_BIAS) << exponent;
    sample -= ULAW_BIAS;
    if sign != 0 {
        (-sample) as i16
    } else {
        sample as i16
    }
}

/// Reinterpret little-endian PCM bytes as i16 samples.
///
/// A trailing odd byte is ignored.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize i16 samples as little-endian PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── µ-law ─────────────────────────────────────────────────

    #[test]
    fn zero_encodes_to_neutral_byte() {
        assert_eq!(linear_to_ulaw(0), ULAW_SILENCE);
    }

    #[test]
    fn neutral_byte_decodes_to_zero() {
        assert_eq!(ulaw_to_linear(ULAW_SILENCE), 0);
    }

    #[test]
    fn round_trip_is_monotone_and_close() {
        for &s in &[-20_000i16, -1_000, -64, 0, 64, 1_000, 20_000] {
            let decoded = ulaw_to_linear(linear_to_ulaw(s));
            // µ-law is lossy; error bound grows with magnitude.
            let err = (i32::from(decoded) - i32::from(s)).abs();
            assert!(err <= 1 + i32::from(s).abs() / 16, "s={s} decoded={decoded}");
        }
    }

    #[test]
    fn extremes_do_not_overflow() {
        let _ = linear_to_ulaw(i16::MIN);
        let _ = linear_to_ulaw(i16::MAX);
        let hi = ulaw_to_linear(linear_to_ulaw(i16::MAX));
        assert!(hi > 30_000);
    }

    #[test]
    fn sign_is_preserved() {
        assert!(ulaw_to_linear(linear_to_ulaw(5_000)) > 0);
        assert!(ulaw_to_linear(linear_to_ulaw(-5_000)) < 0);
    }

    // ── codec accounting ──────────────────────────────────────

    #[test]
    fn ulaw_byte_rate() {
        assert_eq!(AudioCodec::Ulaw8k.bytes_per_second(), Some(8_000));
    }

    #[test]
    fn pcm_byte_rate_doubles_sample_rate() {
        let codec = AudioCodec::Pcm {
            sample_rate: 22_050,
        };
        assert_eq!(codec.bytes_per_second(), Some(44_100));
    }

    #[test]
    fn mp3_has_no_byte_rate() {
        let codec = AudioCodec::Mp3 {
            sample_rate: 22_050,
        };
        assert_eq!(codec.bytes_per_second(), None);
    }

    #[test]
    fn telephony_frame_duration() {
        let frame = AudioFrame::ulaw(vec![ULAW_SILENCE; 160]);
        assert_eq!(frame.duration_ms(), Some(20));
    }

    // ── PCM byte helpers ──────────────────────────────────────

    #[test]
    fn pcm_bytes_round_trip() {
        let samples = vec![0i16, 1, -1, 12_345, -12_345];
        let bytes = samples_to_pcm_bytes(&samples);
        assert_eq!(pcm_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn trailing_odd_byte_ignored() {
        let samples = pcm_bytes_to_samples(&[0x34, 0x12, 0xFF]);
        assert_eq!(samples, vec![0x1234]);
    }

    #[test]
    fn codec_serde_tags_are_snake_case() {
        let json = serde_json::to_string(&AudioCodec::Pcm {
            sample_rate: 24_000,
        })
        .unwrap_or_default();
        assert!(json.contains("\"codec\":\"pcm\""));
        assert!(json.contains("24000"));
    }
}
