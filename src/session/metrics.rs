//! Session cost accounting.
//!
//! Counters are atomic and only ever added to: each component updates the
//! fields it owns (STT audio, LLM tokens, TTS characters) and the session
//! reads one snapshot at disconnect. Pricing turns a snapshot into a
//! per-component breakdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;

/// Rough token estimate for backends that omit usage accounting.
pub fn estimate_tokens(chars: u64) -> u64 {
    chars.div_ceil(4)
}

/// Monotone usage counters for one session.
#[derive(Debug, Default)]
pub struct CostMetrics {
    stt_audio_ms: AtomicU64,
    llm_input_tokens: AtomicU64,
    llm_output_tokens: AtomicU64,
    tts_characters: AtomicU64,
}

impl CostMetrics {
    /// Record audio forwarded to the recognizer.
    pub fn add_stt_audio_ms(&self, ms: u64) {
        self.stt_audio_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Record one completion's token consumption.
    pub fn add_llm_tokens(&self, input: u64, output: u64) {
        self.llm_input_tokens.fetch_add(input, Ordering::Relaxed);
        self.llm_output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    /// Record characters handed to the synthesizer.
    pub fn add_tts_characters(&self, chars: u64) {
        self.tts_characters.fetch_add(chars, Ordering::Relaxed);
    }

    /// Read all counters at once.
    pub fn snapshot(&self, wall_clock: Duration) -> MetricsSnapshot {
        MetricsSnapshot {
            stt_audio_seconds: self.stt_audio_ms.load(Ordering::Relaxed) as f64 / 1_000.0,
            llm_input_tokens: self.llm_input_tokens.load(Ordering::Relaxed),
            llm_output_tokens: self.llm_output_tokens.load(Ordering::Relaxed),
            tts_characters: self.tts_characters.load(Ordering::Relaxed),
            wall_clock_minutes: wall_clock.as_secs_f64() / 60.0,
        }
    }
}

/// Point-in-time view of the session counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds of audio sent to the recognizer.
    pub stt_audio_seconds: f64,
    /// Prompt tokens across all completions.
    pub llm_input_tokens: u64,
    /// Completion tokens across all completions.
    pub llm_output_tokens: u64,
    /// Characters synthesized.
    pub tts_characters: u64,
    /// Minutes since the call was accepted.
    pub wall_clock_minutes: f64,
}

/// Priced usage, per component and total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Recognizer cost in USD.
    pub stt_usd: f64,
    /// Completion cost in USD.
    pub llm_usd: f64,
    /// Synthesis cost in USD.
    pub tts_usd: f64,
    /// Sum of the components.
    pub total_usd: f64,
}

impl CostBreakdown {
    /// Price a snapshot with the configured rates.
    pub fn compute(snapshot: &MetricsSnapshot, pricing: &PricingConfig) -> Self {
        let stt_usd = snapshot.stt_audio_seconds * pricing.stt_per_second;
        let llm_usd = snapshot.llm_input_tokens as f64 * pricing.llm_input_per_1k / 1_000.0
            + snapshot.llm_output_tokens as f64 * pricing.llm_output_per_1k / 1_000.0;
        let tts_usd = snapshot.tts_characters as f64 * pricing.tts_per_char;
        Self {
            stt_usd,
            llm_usd,
            tts_usd,
            total_usd: stt_usd + llm_usd + tts_usd,
        }
    }
}
