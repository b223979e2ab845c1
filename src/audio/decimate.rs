//! Naive PCM decimation.
//!
//! Takes every Mth sample to downshift a high-rate synthesis stream to the
//! telephony rate. Config-selected, never automatic; callers that need
//! fidelity leave resampling to the edge.

use super::{pcm_bytes_to_samples, samples_to_pcm_bytes};

/// Decimate 16-bit LE PCM bytes by keeping every `factor`th sample.
///
/// A `factor` of 0 or 1 returns the input unchanged. No anti-alias filter is
/// applied; narrowband speech tolerates the aliasing this introduces.
pub fn decimate_pcm(bytes: &[u8], factor: u32) -> Vec<u8> {
    if factor <= 1 {
        return bytes.to_vec();
    }
    let samples = pcm_bytes_to_samples(bytes);
    let kept: Vec<i16> = samples
        .iter()
        .step_by(factor as usize)
        .copied()
        .collect();
    samples_to_pcm_bytes(&kept)
}

/// Integer downshift factor from a source rate to a target rate.
///
/// Returns `None` when the source is not an exact multiple of the target;
/// the caller then forwards audio untouched and lets the edge resample.
pub fn downshift_factor(source_rate: u32, target_rate: u32) -> Option<u32> {
    if target_rate == 0 || source_rate <= target_rate {
        return None;
    }
    (source_rate % target_rate == 0).then(|| source_rate / target_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factor_one_is_identity() {
        let bytes = samples_to_pcm_bytes(&[1, 2, 3, 4]);
        assert_eq!(decimate_pcm(&bytes, 1), bytes);
    }

    #[test]
    fn factor_three_keeps_every_third() {
        let bytes = samples_to_pcm_bytes(&[10, 20, 30, 40, 50, 60, 70]);
        let out = pcm_bytes_to_samples(&decimate_pcm(&bytes, 3));
        assert_eq!(out, vec![10, 40, 70]);
    }

    #[test]
    fn exact_multiple_yields_factor() {
        assert_eq!(downshift_factor(24_000, 8_000), Some(3));
        assert_eq!(downshift_factor(16_000, 8_000), Some(2));
    }

    #[test]
    fn non_multiple_yields_none() {
        assert_eq!(downshift_factor(22_050, 8_000), None);
    }

    #[test]
    fn upshift_yields_none() {
        assert_eq!(downshift_factor(8_000, 24_000), None);
    }
}
