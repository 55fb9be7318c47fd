//! Ambience synthesis
//!
//! Closed-form per-sample generators for the nature and room categories.
//! Each one combines shaped noise, slow envelopes and additive tones; the
//! only entropy is one or more uniform draws per sample, used either as
//! signal or compared against an [`EventThresholds`] gate.

use std::f32::consts::PI;

use rand::Rng;

use crate::config::EventThresholds;
use crate::engine::AudioBuffer;
use crate::error::{Result, SoundscapeError};
use crate::synth::noise::white_sample;
use crate::synth::{frame_count, SoundCategory};

/// Length of one swell in the wave generator
const WAVE_CYCLE_SECS: f32 = 4.0;

/// Nominal rate of the wind amplitude LFO
const WIND_LFO_HZ: f64 = 0.1;

/// Generator for the non-noise categories
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbienceSynthesizer {
    sample_rate: u32,
    thresholds: EventThresholds,
}

impl AmbienceSynthesizer {
    /// Create a synthesizer with default event thresholds
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            thresholds: EventThresholds::default(),
        }
    }

    /// Replace the rare-event thresholds
    pub fn with_thresholds(mut self, thresholds: EventThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn thresholds(&self) -> &EventThresholds {
        &self.thresholds
    }

    /// Generate `duration_secs` of an ambience category
    ///
    /// # Errors
    /// * `UnsupportedCategory` - `category` is a noise color
    /// * `InvalidDuration` - duration out of range
    pub fn generate<R: Rng + ?Sized>(
        &self,
        category: SoundCategory,
        duration_secs: f64,
        rng: &mut R,
    ) -> Result<AudioBuffer> {
        let frames = frame_count(duration_secs, self.sample_rate)?;
        let rate = self.sample_rate as f32;
        let t = |i: usize| i as f32 / rate;
        let th = self.thresholds;

        let samples: Vec<f32> = match category {
            SoundCategory::Rain => fill(frames, |_| {
                // Large draws are squashed, leaving sparse droplet transients
                let w = white_sample(rng);
                w * (-w * w * 10.0).exp()
            }),
            SoundCategory::Wind => {
                let lfo_hz = wind_lfo_hz(frames, self.sample_rate) as f32;
                fill(frames, |i| {
                    let lfo = (2.0 * PI * lfo_hz * t(i)).sin();
                    white_sample(rng) * (0.6 + 0.4 * lfo)
                })
            }
            SoundCategory::Wave => {
                let cycle_len = ((WAVE_CYCLE_SECS * rate) as usize).max(1);
                fill(frames, |i| {
                    let phase = (i % cycle_len) as f32 / cycle_len as f32;
                    let envelope = (phase * PI).sin().powi(2);
                    white_sample(rng) * envelope * 0.5
                })
            }
            SoundCategory::Fire => fill(frames, |_| {
                let w = white_sample(rng);
                w * w
            }),
            SoundCategory::Bird => fill(frames, |i| {
                let t = t(i);
                let freq = 2000.0 + (t * 10.0).sin() * 500.0;
                (2.0 * PI * freq * t).sin() * (-t * 3.0).exp()
            }),
            SoundCategory::Cricket => fill(frames, |i| {
                let t = t(i);
                let gate = if (2.0 * PI * 20.0 * t).sin() > 0.5 { 1.0 } else { 0.0 };
                (2.0 * PI * 4000.0 * t).sin() * gate * (-t * 10.0).exp()
            }),
            SoundCategory::Thunderstorm => fill(frames, |_| {
                let w = white_sample(rng);
                w * w * w * 0.8
            }),
            SoundCategory::Stream => fill(frames, |i| {
                white_sample(rng) * (i as f32 * 0.05).sin() * 0.4
            }),
            SoundCategory::Forest => fill(frames, |i| {
                let t = t(i);
                let leaves = white_sample(rng) * 0.15 * (t * 0.5).sin();
                let chirp_freq = 1800.0 + (t * 3.0).sin() * 400.0;
                let chirp = (2.0 * PI * chirp_freq * t).sin() * (-(t % 2.0) * 5.0).exp() * 0.1;
                let wind = white_sample(rng) * 0.08 * (t * 0.3).sin();
                leaves + chirp + wind
            }),
            SoundCategory::City => fill(frames, |i| {
                let t = t(i);
                let traffic =
                    (2.0 * PI * 60.0 * t).sin() * 0.15 + (2.0 * PI * 90.0 * t).sin() * 0.1;
                let hum = white_sample(rng) * 0.08;
                let horn_gain = if rng.random::<f32>() > th.city_horn { 0.05 } else { 0.0 };
                let horn = (2.0 * PI * 440.0 * t).sin() * horn_gain;
                traffic + hum + horn
            }),
            SoundCategory::Cafe => fill(frames, |i| {
                let t = t(i);
                let mut murmur = 0.0;
                for h in 1..=5 {
                    let partial = 200.0 + h as f32 * 50.0;
                    let phase = rng.random::<f32>() * PI;
                    murmur += (2.0 * PI * partial * t + phase).sin() / h as f32;
                }
                murmur *= 0.08 * (1.0 + (t * 0.5).sin() * 0.3);

                let clink_gain = if rng.random::<f32>() > th.cafe_clink { 0.15 } else { 0.0 };
                let clink = (2.0 * PI * 2000.0 * t).sin() * (-(t % 5.0) * 100.0).exp() * clink_gain;

                let hiss_level = if (t * 0.2).sin() > th.cafe_hiss_gate { 0.1 } else { 0.02 };
                let hiss = white_sample(rng) * hiss_level;

                murmur + clink + hiss
            }),
            noise @ (SoundCategory::White | SoundCategory::Pink | SoundCategory::Brown) => {
                return Err(SoundscapeError::UnsupportedCategory {
                    category: noise,
                    synthesizer: "ambience",
                })
            }
        };

        Ok(AudioBuffer::from_mono(samples, self.sample_rate))
    }
}

/// Wind LFO rate snapped to a whole number of cycles per buffer
fn wind_lfo_hz(frames: usize, sample_rate: u32) -> f64 {
    let duration = frames as f64 / sample_rate as f64;
    let cycles = (WIND_LFO_HZ * duration).round().max(1.0);
    cycles / duration
}

fn fill(frames: usize, mut sample: impl FnMut(usize) -> f32) -> Vec<f32> {
    (0..frames)
        .map(|i| {
            let s = sample(i);
            if s.is_nan() {
                0.0
            } else {
                s.clamp(-1.0, 1.0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;
    use test_case::test_case;

    fn render(synth: &AmbienceSynthesizer, category: SoundCategory, seed: u64) -> Vec<f32> {
        let mut rng = Pcg32::seed_from_u64(seed);
        synth.generate(category, 2.0, &mut rng).unwrap().samples.remove(0)
    }

    #[test_case(SoundCategory::Rain)]
    #[test_case(SoundCategory::Thunderstorm)]
    #[test_case(SoundCategory::Wind)]
    #[test_case(SoundCategory::Wave)]
    #[test_case(SoundCategory::Fire)]
    #[test_case(SoundCategory::Bird)]
    #[test_case(SoundCategory::Cricket)]
    #[test_case(SoundCategory::Forest)]
    #[test_case(SoundCategory::City)]
    #[test_case(SoundCategory::Cafe)]
    #[test_case(SoundCategory::Stream)]
    fn test_length_and_range(category: SoundCategory) {
        let samples = render(&AmbienceSynthesizer::new(16000), category, 11);
        assert_eq!(samples.len(), 32000);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
        assert!(samples.iter().any(|&s| s != 0.0), "{category} is silent");
    }

    #[test_case(SoundCategory::White)]
    #[test_case(SoundCategory::Pink)]
    #[test_case(SoundCategory::Brown)]
    fn test_noise_colors_are_rejected(category: SoundCategory) {
        let mut rng = Pcg32::seed_from_u64(0);
        let err = AmbienceSynthesizer::new(16000)
            .generate(category, 1.0, &mut rng)
            .unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_CATEGORY");
    }

    #[test]
    fn test_tonal_categories_ignore_the_rng() {
        let synth = AmbienceSynthesizer::new(16000);
        assert_eq!(
            render(&synth, SoundCategory::Bird, 1),
            render(&synth, SoundCategory::Bird, 2)
        );
        assert_eq!(
            render(&synth, SoundCategory::Cricket, 1),
            render(&synth, SoundCategory::Cricket, 2)
        );
    }

    #[test]
    fn test_wave_swell_is_silent_at_cycle_edges() {
        let synth = AmbienceSynthesizer::new(1000);
        let mut rng = Pcg32::seed_from_u64(4);
        let samples = synth
            .generate(SoundCategory::Wave, 8.0, &mut rng)
            .unwrap()
            .samples
            .remove(0);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[4000], 0.0);
    }

    #[test]
    fn test_horn_threshold_gates_the_partial() {
        let rate = 8000;
        let always = AmbienceSynthesizer::new(rate).with_thresholds(EventThresholds {
            city_horn: 0.0,
            ..EventThresholds::default()
        });
        let never = AmbienceSynthesizer::new(rate).with_thresholds(EventThresholds {
            city_horn: 2.0,
            ..EventThresholds::default()
        });

        let with_horn = render(&always, SoundCategory::City, 21);
        let without = render(&never, SoundCategory::City, 21);

        // Same draws either way, so the difference is exactly the horn
        let mut fired = 0;
        for (i, (a, b)) in with_horn.iter().zip(&without).enumerate() {
            let diff = a - b;
            if diff != 0.0 {
                fired += 1;
                let t = i as f32 / rate as f32;
                assert_relative_eq!(diff, (2.0 * PI * 440.0 * t).sin() * 0.05, epsilon = 1e-5);
            }
        }
        assert!(fired > 10_000, "horn fired on {fired} samples");
    }

    #[test]
    fn test_wind_lfo_snaps_to_whole_cycles() {
        let hz = wind_lfo_hz(8 * 48000, 48000);
        assert_relative_eq!(hz * 8.0, 1.0);
        let hz = wind_lfo_hz(30 * 48000, 48000);
        assert_relative_eq!(hz * 30.0, 3.0);
    }
}
