//! Noise color generators
//!
//! White noise is a uniform draw per sample. Pink noise filters white noise
//! through Paul Kellet's bank of leaky integrators (about -3 dB/octave).
//! Brown noise is a clamped random walk (about -6 dB/octave).

use rand::Rng;

use crate::engine::AudioBuffer;
use crate::error::{Result, SoundscapeError};
use crate::synth::{frame_count, SoundCategory};

/// Default per-sample step of the brown noise walk
pub const DEFAULT_BROWN_STEP: f32 = 0.02;

/// Generator for the white, pink and brown noise categories
///
/// # Example
/// ```
/// use rand::SeedableRng;
/// use rand_pcg::Pcg32;
/// use soundscape::synth::{NoiseGenerator, SoundCategory};
///
/// let noise = NoiseGenerator::new(48000);
/// let mut rng = Pcg32::seed_from_u64(7);
/// let buffer = noise.generate(SoundCategory::Pink, 1.0, &mut rng).unwrap();
/// assert_eq!(buffer.num_samples(), 48000);
/// assert!(buffer.peak() <= 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseGenerator {
    sample_rate: u32,
    brown_step: f32,
}

impl NoiseGenerator {
    /// Create a generator for the given sample rate
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            brown_step: DEFAULT_BROWN_STEP,
        }
    }

    /// Override the brown noise step size
    pub fn with_brown_step(mut self, step: f32) -> Self {
        self.brown_step = step;
        self
    }

    /// Sample rate of generated buffers
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Generate `duration_secs` of the given noise color
    ///
    /// # Errors
    /// * `UnsupportedCategory` - `color` is not white, pink or brown
    /// * `InvalidDuration` - see [`MAX_DURATION_SECS`](crate::synth::MAX_DURATION_SECS)
    pub fn generate<R: Rng + ?Sized>(
        &self,
        color: SoundCategory,
        duration_secs: f64,
        rng: &mut R,
    ) -> Result<AudioBuffer> {
        let frames = frame_count(duration_secs, self.sample_rate)?;
        let samples = match color {
            SoundCategory::White => white(frames, rng),
            SoundCategory::Pink => pink(frames, rng),
            SoundCategory::Brown => brown(frames, self.brown_step, rng),
            other => {
                return Err(SoundscapeError::UnsupportedCategory {
                    category: other,
                    synthesizer: "noise",
                })
            }
        };
        Ok(AudioBuffer::from_mono(samples, self.sample_rate))
    }
}

/// Uniform sample in [-1, 1]
#[inline]
pub(crate) fn white_sample<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    rng.random_range(-1.0_f32..=1.0)
}

fn white<R: Rng + ?Sized>(frames: usize, rng: &mut R) -> Vec<f32> {
    (0..frames).map(|_| white_sample(rng)).collect()
}

fn pink<R: Rng + ?Sized>(frames: usize, rng: &mut R) -> Vec<f32> {
    // Kellet's "refined" method; state lives only for this pass
    let (mut b0, mut b1, mut b2, mut b3, mut b4, mut b5, mut b6) =
        (0.0_f32, 0.0_f32, 0.0_f32, 0.0_f32, 0.0_f32, 0.0_f32, 0.0_f32);

    (0..frames)
        .map(|_| {
            let w = white_sample(rng);
            b0 = 0.99886 * b0 + w * 0.0555179;
            b1 = 0.99332 * b1 + w * 0.0750759;
            b2 = 0.96900 * b2 + w * 0.1538520;
            b3 = 0.86650 * b3 + w * 0.3104856;
            b4 = 0.55000 * b4 + w * 0.5329522;
            b5 = -0.7616 * b5 - w * 0.0168980;
            let out = (b0 + b1 + b2 + b3 + b4 + b5 + b6 + w * 0.5362) * 0.11;
            b6 = w * 0.115926;
            out.clamp(-1.0, 1.0)
        })
        .collect()
}

fn brown<R: Rng + ?Sized>(frames: usize, step: f32, rng: &mut R) -> Vec<f32> {
    let mut last = 0.0_f32;
    (0..frames)
        .map(|_| {
            last = (last + white_sample(rng) * step).clamp(-1.0, 1.0);
            last
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;
    use test_case::test_case;

    /// Mean squared first difference over mean power
    ///
    /// About 2 for white noise; the more energy sits in low frequencies, the
    /// smaller it gets.
    fn roughness(samples: &[f32]) -> f64 {
        let power: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum::<f64>();
        let diff: f64 = samples
            .windows(2)
            .map(|w| ((w[1] - w[0]) as f64).powi(2))
            .sum::<f64>();
        diff / power
    }

    fn render(color: SoundCategory, seed: u64) -> Vec<f32> {
        let mut rng = Pcg32::seed_from_u64(seed);
        NoiseGenerator::new(48000)
            .generate(color, 2.0, &mut rng)
            .unwrap()
            .samples
            .remove(0)
    }

    #[test_case(SoundCategory::White ; "white")]
    #[test_case(SoundCategory::Pink ; "pink")]
    #[test_case(SoundCategory::Brown ; "brown")]
    fn test_length_and_range(color: SoundCategory) {
        let samples = render(color, 1);
        assert_eq!(samples.len(), 96000);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(samples.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_spectral_tilt_ordering() {
        let white = roughness(&render(SoundCategory::White, 3));
        let pink = roughness(&render(SoundCategory::Pink, 3));
        let brown = roughness(&render(SoundCategory::Brown, 3));

        assert!((white - 2.0).abs() < 0.1, "white roughness {white}");
        assert!(pink < white * 0.8, "pink {pink} vs white {white}");
        assert!(brown < pink * 0.1, "brown {brown} vs pink {pink}");
    }

    #[test]
    fn test_same_seed_same_buffer() {
        assert_eq!(render(SoundCategory::Pink, 9), render(SoundCategory::Pink, 9));
        assert_ne!(render(SoundCategory::White, 9), render(SoundCategory::White, 10));
    }

    #[test]
    fn test_rejects_ambience_category() {
        let mut rng = Pcg32::seed_from_u64(0);
        let err = NoiseGenerator::new(48000)
            .generate(SoundCategory::Rain, 1.0, &mut rng)
            .unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_CATEGORY");
    }

    #[test]
    fn test_brown_walk_stays_bounded() {
        let mut rng = Pcg32::seed_from_u64(5);
        let buffer = NoiseGenerator::new(8000)
            .with_brown_step(0.5)
            .generate(SoundCategory::Brown, 30.0, &mut rng)
            .unwrap();
        assert!(buffer.peak() <= 1.0);
    }
}
