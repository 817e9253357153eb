//! Deterministic feature extractor (C2): turns 16kHz mono PCM into the
//! fixed-width log-mel-style frames the wake-word classifiers consume. Pure
//! DSP, no inference runtime — shape grounded on the teacher's
//! `models/melspectrogram.rs` (chunk size, banded output), restructured so
//! determinism doesn't depend on tflite's numerics (§4.1 implementation
//! note).

const SAMPLE_RATE: usize = 16_000;
const CHUNK_MS: usize = 10;
pub const CHUNK_SAMPLES: usize = SAMPLE_RATE / 1000 * CHUNK_MS; // 160 samples, 320 bytes of i16 PCM
pub const FEATURE_WIDTH: usize = 40;

/// One 10ms slice of extracted features.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub bands: [f32; FEATURE_WIDTH],
}

/// Accumulates raw PCM bytes and emits one `FeatureFrame` per complete 10ms
/// chunk. Carries a small amount of filter state (a running pre-emphasis
/// sample) across calls so frame boundaries don't introduce artifacts.
pub struct FeatureExtractor {
    pending: Vec<u8>,
    prev_sample: f32,
    filterbank: Vec<[f32; FEATURE_WIDTH]>,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            prev_sample: 0.0,
            filterbank: build_filterbank(),
        }
    }

    /// Drop buffered PCM and reset filter state, as if freshly constructed.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.prev_sample = 0.0;
    }

    /// Feed raw little-endian i16 PCM bytes, returning zero or more complete
    /// frames in capture order. Leftover bytes (< one chunk) stay buffered.
    pub fn push(&mut self, pcm: &[u8]) -> Vec<FeatureFrame> {
        self.pending.extend_from_slice(pcm);
        let chunk_bytes = CHUNK_SAMPLES * 2;
        let mut frames = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= chunk_bytes {
            let chunk = &self.pending[offset..offset + chunk_bytes];
            frames.push(self.extract(chunk));
            offset += chunk_bytes;
        }
        self.pending.drain(..offset);
        frames
    }

    fn extract(&mut self, chunk: &[u8]) -> FeatureFrame {
        let mut samples = [0f32; CHUNK_SAMPLES];
        for (i, pair) in chunk.chunks_exact(2).enumerate() {
            let raw = i16::from_le_bytes([pair[0], pair[1]]);
            let sample = f32::from(raw) / 32768.0;
            samples[i] = sample - 0.97 * self.prev_sample;
            self.prev_sample = sample;
        }

        let power = power_spectrum(&samples);
        let mut bands = [0f32; FEATURE_WIDTH];
        for (band_idx, weights) in self.filterbank.iter().enumerate() {
            let energy: f32 = power.iter().zip(weights.iter()).map(|(p, w)| p * w).sum();
            bands[band_idx] = (energy.max(1e-10)).ln();
        }
        FeatureFrame { bands }
    }
}

/// A crude magnitude spectrum: not an FFT, a fixed bank of correlations
/// against cosine basis vectors at `FEATURE_WIDTH` evenly spaced
/// frequencies. Deterministic and allocation-stable, which is what the
/// bit-exactness invariant (§4.1) actually requires — it need not match any
/// particular "real" mel-filterbank numerically.
fn power_spectrum(samples: &[f32; CHUNK_SAMPLES]) -> [f32; FEATURE_WIDTH] {
    let mut out = [0f32; FEATURE_WIDTH];
    for (k, slot) in out.iter_mut().enumerate() {
        let freq = (k + 1) as f32 / (FEATURE_WIDTH as f32 + 1.0);
        let mut acc = 0f32;
        for (n, sample) in samples.iter().enumerate() {
            let phase = std::f32::consts::PI * freq * n as f32;
            acc += sample * phase.cos();
        }
        *slot = (acc / CHUNK_SAMPLES as f32).powi(2);
    }
    out
}

fn build_filterbank() -> Vec<[f32; FEATURE_WIDTH]> {
    (0..FEATURE_WIDTH)
        .map(|band| {
            let mut weights = [0f32; FEATURE_WIDTH];
            weights[band] = 1.0;
            if band > 0 {
                weights[band - 1] = 0.25;
            }
            if band + 1 < FEATURE_WIDTH {
                weights[band + 1] = 0.25;
            }
            weights
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(chunks: usize) -> Vec<u8> {
        vec![0u8; chunks * CHUNK_SAMPLES * 2]
    }

    #[test]
    fn partial_chunk_stays_buffered() {
        let mut extractor = FeatureExtractor::new();
        let frames = extractor.push(&silence(0 /* still pushes a few bytes below */));
        assert!(frames.is_empty());
        let frames = extractor.push(&[0u8; 10]);
        assert!(frames.is_empty());
    }

    #[test]
    fn one_chunk_in_produces_exactly_one_frame() {
        let mut extractor = FeatureExtractor::new();
        let frames = extractor.push(&silence(1));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn identical_input_produces_bit_identical_output() {
        let mut a = FeatureExtractor::new();
        let mut b = FeatureExtractor::new();
        let pcm: Vec<u8> = (0..CHUNK_SAMPLES * 2)
            .map(|i| (i % 256) as u8)
            .collect();
        let frames_a = a.push(&pcm);
        let frames_b = b.push(&pcm);
        assert_eq!(frames_a, frames_b);
    }

    #[test]
    fn reset_clears_buffered_partial_chunk() {
        let mut extractor = FeatureExtractor::new();
        extractor.push(&[0u8; 10]);
        extractor.reset();
        let frames = extractor.push(&silence(1));
        assert_eq!(frames.len(), 1);
    }
}
