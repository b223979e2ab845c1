//! Transcript accumulation across interim and final tokens.
//!
//! Two buffers: `final_so_far` holds confirmed text, `interim_tail` the
//! recognizer's current best guess at the continuation. Interim tokens
//! replace the tail wholesale; final tokens append. When the endpoint
//! marker arrives and the confirmed text is non-empty, the utterance is
//! emitted and both buffers reset for the next one.

use super::protocol::{END_MARKER, FIN_MARKER, WireToken};

/// Result of folding one token batch into the accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Combined `final_so_far + interim_tail`, when either changed.
    pub interim: Option<String>,
    /// Final fragments confirmed by this batch, in order.
    pub partial_deltas: Vec<String>,
    /// A completed utterance, trimmed.
    pub finalized: Option<String>,
}

/// Accumulates one utterance at a time.
///
/// Buffers survive a transport reconnect on purpose: an in-flight utterance
/// continues on the new socket.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    final_so_far: String,
    interim_tail: String,
}

impl TranscriptAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current combined view of the utterance.
    pub fn combined(&self) -> String {
        let mut text = self.final_so_far.clone();
        text.push_str(&self.interim_tail);
        text
    }

    /// Whether any text (confirmed or candidate) is buffered.
    pub fn has_speech(&self) -> bool {
        !self.final_so_far.trim().is_empty() || !self.interim_tail.trim().is_empty()
    }

    /// Fold one ordered token batch into the buffers.
    pub fn push_batch(&mut self, tokens: &[WireToken]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut endpoint = false;
        let mut changed = false;
        let mut batch_interim: Option<String> = None;

        for token in tokens {
            match token.text.as_str() {
                END_MARKER => endpoint = true,
                FIN_MARKER => {}
                _ if token.is_final => {
                    self.final_so_far.push_str(&token.text);
                    // The confirmed text supersedes any stale candidate.
                    self.interim_tail.clear();
                    outcome.partial_deltas.push(token.text.clone());
                    changed = true;
                }
                _ => {
                    batch_interim
                        .get_or_insert_with(String::new)
                        .push_str(&token.text);
                }
            }
        }

        // Interim tokens replace the prior tail rather than extending it.
        if let Some(tail) = batch_interim
            && tail != self.interim_tail
        {
            self.interim_tail = tail;
            changed = true;
        }

        if changed {
            outcome.interim = Some(self.combined());
        }

        if endpoint {
            let utterance = self.final_so_far.trim().to_owned();
            // An endpoint with no confirmed speech (pure silence) is silent.
            self.final_so_far.clear();
            self.interim_tail.clear();
            if !utterance.is_empty() {
                outcome.finalized = Some(utterance);
            }
        }

        outcome
    }

    /// Drop everything; used on terminal teardown, never on reconnect.
    pub fn reset(&mut self) {
        self.final_so_far.clear();
        self.interim_tail.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interim_tokens_replace_tail() {
        let mut acc = TranscriptAccumulator::new();
        let out = acc.push_batch(&[WireToken::interim("wha")]);
        assert_eq!(out.interim.as_deref(), Some("wha"));

        let out = acc.push_batch(&[WireToken::interim("what time")]);
        assert_eq!(out.interim.as_deref(), Some("what time"));
        assert!(out.finalized.is_none());
    }

    #[test]
    fn final_tokens_append() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::fin("what ")]);
        let out = acc.push_batch(&[WireToken::fin("time")]);
        assert_eq!(out.interim.as_deref(), Some("what time"));
        assert_eq!(out.partial_deltas, vec!["time".to_owned()]);
    }

    #[test]
    fn final_plus_interim_combine() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::fin("what ")]);
        let out = acc.push_batch(&[WireToken::interim("ti")]);
        assert_eq!(out.interim.as_deref(), Some("what ti"));
    }

    #[test]
    fn endpoint_finalizes_and_resets() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::fin("what time is it ")]);
        let out = acc.push_batch(&[WireToken::endpoint()]);
        assert_eq!(out.finalized.as_deref(), Some("what time is it"));
        assert!(!acc.has_speech());
        assert_eq!(acc.combined(), "");
    }

    #[test]
    fn endpoint_without_speech_is_silent() {
        let mut acc = TranscriptAccumulator::new();
        let out = acc.push_batch(&[WireToken::endpoint()]);
        assert!(out.finalized.is_none());
        assert!(out.interim.is_none());
    }

    #[test]
    fn endpoint_with_only_interim_is_silent() {
        // Interim-only speech never finalizes; the recognizer would have
        // confirmed it before the endpoint.
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::interim("uh")]);
        let out = acc.push_batch(&[WireToken::endpoint()]);
        assert!(out.finalized.is_none());
        assert!(!acc.has_speech());
    }

    #[test]
    fn final_supersedes_stale_interim() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::interim("what ti")]);
        let out = acc.push_batch(&[WireToken::fin("what time is it")]);
        assert_eq!(out.interim.as_deref(), Some("what time is it"));
    }

    #[test]
    fn fin_marker_discarded() {
        let mut acc = TranscriptAccumulator::new();
        let out = acc.push_batch(&[WireToken::fin(super::FIN_MARKER), WireToken::fin("hello")]);
        assert_eq!(out.interim.as_deref(), Some("hello"));
        assert_eq!(out.partial_deltas, vec!["hello".to_owned()]);
    }

    #[test]
    fn mixed_batch_with_endpoint() {
        let mut acc = TranscriptAccumulator::new();
        let out = acc.push_batch(&[
            WireToken::fin("stop "),
            WireToken::interim("pl"),
            WireToken::endpoint(),
        ]);
        assert_eq!(out.finalized.as_deref(), Some("stop"));
        assert_eq!(out.interim.as_deref(), Some("stop pl"));
    }

    #[test]
    fn unchanged_interim_emits_nothing() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::interim("same")]);
        let out = acc.push_batch(&[WireToken::interim("same")]);
        assert!(out.interim.is_none());
    }

    #[test]
    fn next_utterance_starts_clean() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_batch(&[WireToken::fin("first"), WireToken::endpoint()]);
        let out = acc.push_batch(&[WireToken::fin("second")]);
        assert_eq!(out.interim.as_deref(), Some("second"));
    }
}
