//! Seeded synthesis front end
//!
//! `SynthBank` owns the random source and the per-family default durations,
//! and routes each category to the generator that knows it.

use std::sync::{Mutex, PoisonError};

use rand::SeedableRng;
use rand_pcg::Pcg32;

use crate::config::SynthConfig;
use crate::engine::AudioBuffer;
use crate::error::Result;
use crate::synth::{AmbienceSynthesizer, NoiseGenerator, SoundCategory};

/// Notification tone pitch
const TONE_HZ: f32 = 800.0;
/// Notification tone length
const TONE_SECS: f32 = 0.5;
const TONE_START_GAIN: f32 = 0.3;
const TONE_END_GAIN: f32 = 0.01;

/// Category dispatch plus an injectable random source
#[derive(Debug)]
pub struct SynthBank {
    noise: NoiseGenerator,
    ambience: AmbienceSynthesizer,
    noise_duration_secs: f64,
    ambience_duration_secs: f64,
    rng: Mutex<Pcg32>,
}

impl SynthBank {
    /// Build a bank from synthesis settings
    ///
    /// Without a configured seed the generator is seeded from OS entropy.
    pub fn new(sample_rate: u32, config: &SynthConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random::<u64>);
        Self {
            noise: NoiseGenerator::new(sample_rate).with_brown_step(config.brown_step),
            ambience: AmbienceSynthesizer::new(sample_rate).with_thresholds(config.thresholds),
            noise_duration_secs: config.noise_duration_secs,
            ambience_duration_secs: config.ambience_duration_secs,
            rng: Mutex::new(Pcg32::seed_from_u64(seed)),
        }
    }

    /// Sample rate of generated buffers
    pub fn sample_rate(&self) -> u32 {
        self.noise.sample_rate()
    }

    /// Default loop length for a category
    pub fn default_duration(&self, category: SoundCategory) -> f64 {
        if category.is_noise() {
            self.noise_duration_secs
        } else {
            self.ambience_duration_secs
        }
    }

    /// Generate a loop buffer of the category's default length
    pub fn generate(&self, category: SoundCategory) -> Result<AudioBuffer> {
        self.generate_for(category, self.default_duration(category))
    }

    /// Generate a loop buffer of an explicit length
    pub fn generate_for(&self, category: SoundCategory, duration_secs: f64) -> Result<AudioBuffer> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        if category.is_noise() {
            self.noise.generate(category, duration_secs, &mut *rng)
        } else {
            self.ambience.generate(category, duration_secs, &mut *rng)
        }
    }

    /// Short decaying beep used to mark session boundaries
    pub fn notification_tone(&self) -> AudioBuffer {
        let rate = self.sample_rate() as f32;
        let frames = (TONE_SECS * rate) as usize;
        let ratio = TONE_END_GAIN / TONE_START_GAIN;
        let samples = (0..frames)
            .map(|i| {
                let t = i as f32 / rate;
                let gain = TONE_START_GAIN * ratio.powf(t / TONE_SECS);
                (2.0 * std::f32::consts::PI * TONE_HZ * t).sin() * gain
            })
            .collect();
        AudioBuffer::from_mono(samples, self.sample_rate())
    }
}
