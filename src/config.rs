//! Engine configuration
//!
//! Every tunable of the engine lives here: sample rate, ramp windows,
//! synthesis durations and the stochastic event thresholds. All sections
//! carry serde defaults so a config file only needs the keys it changes.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SoundscapeError};

/// Default processing sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default upper bound on live graph nodes
pub const DEFAULT_MAX_NODES: usize = 64;

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate of the audio context in Hz
    pub sample_rate: u32,
    /// Maximum number of nodes the audio graph will hold at once
    pub max_nodes: usize,
    /// Gain automation and analyser settings
    pub mixer: MixerConfig,
    /// Buffer synthesis settings
    pub synth: SynthConfig,
    /// Unlock / timer settings
    pub lifecycle: LifecycleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_nodes: DEFAULT_MAX_NODES,
            mixer: MixerConfig::default(),
            synth: SynthConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse a configuration from a JSON string and validate it
    ///
    /// # Example
    /// ```
    /// use soundscape::config::EngineConfig;
    /// let config = EngineConfig::from_json(r#"{ "sample_rate": 44100 }"#).unwrap();
    /// assert_eq!(config.sample_rate, 44100);
    /// assert_eq!(config.mixer.attack_secs, 0.05);
    /// ```
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000 || self.sample_rate > 192_000 {
            return Err(invalid(format!(
                "sample_rate {} outside 8000..=192000",
                self.sample_rate
            )));
        }
        if self.max_nodes < 4 {
            return Err(invalid(format!(
                "max_nodes {} leaves no room for layers",
                self.max_nodes
            )));
        }
        self.mixer.validate()?;
        self.synth.validate()?;
        Ok(())
    }
}

/// Gain automation windows and analyser settings
///
/// All windows are in seconds on the audio context clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Ramp applied to master volume changes
    pub master_ramp_secs: f64,
    /// Fade-in applied when a layer starts
    pub attack_secs: f64,
    /// Fade-out applied when a layer is removed
    pub release_secs: f64,
    /// Delay after which a removed layer's nodes are stopped and disconnected
    pub teardown_delay_secs: f64,
    /// Ramp applied to per-layer volume changes
    pub volume_ramp_secs: f64,
    /// Fade-out applied to every layer by `stop_all`
    pub stop_all_ramp_secs: f64,
    /// Teardown delay used by `stop_all`
    pub stop_all_teardown_secs: f64,
    /// FFT window of the analysis tap (power of two)
    pub analyser_fft_size: usize,
    /// Magnitude mapped to byte value 0
    pub min_decibels: f32,
    /// Magnitude mapped to byte value 255
    pub max_decibels: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            master_ramp_secs: 0.02,
            attack_secs: 0.05,
            release_secs: 0.05,
            teardown_delay_secs: 0.06,
            volume_ramp_secs: 0.02,
            stop_all_ramp_secs: 0.03,
            stop_all_teardown_secs: 0.04,
            analyser_fft_size: 2048,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

impl MixerConfig {
    fn validate(&self) -> Result<()> {
        let windows = [
            ("master_ramp_secs", self.master_ramp_secs),
            ("attack_secs", self.attack_secs),
            ("release_secs", self.release_secs),
            ("volume_ramp_secs", self.volume_ramp_secs),
            ("stop_all_ramp_secs", self.stop_all_ramp_secs),
        ];
        for (name, secs) in windows {
            if !secs.is_finite() || secs <= 0.0 || secs > 1.0 {
                return Err(invalid(format!("{name} must be in (0, 1] seconds, got {secs}")));
            }
        }
        if self.teardown_delay_secs < self.release_secs {
            return Err(invalid(
                "teardown_delay_secs must not be shorter than release_secs".to_string(),
            ));
        }
        if self.stop_all_teardown_secs < self.stop_all_ramp_secs {
            return Err(invalid(
                "stop_all_teardown_secs must not be shorter than stop_all_ramp_secs".to_string(),
            ));
        }
        if !self.analyser_fft_size.is_power_of_two()
            || !(32..=32768).contains(&self.analyser_fft_size)
        {
            return Err(invalid(format!(
                "analyser_fft_size {} must be a power of two in 32..=32768",
                self.analyser_fft_size
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(invalid("min_decibels must be below max_decibels".to_string()));
        }
        Ok(())
    }
}

/// Procedural synthesis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Loop length of white/pink/brown noise buffers
    pub noise_duration_secs: f64,
    /// Loop length of ambience buffers
    pub ambience_duration_secs: f64,
    /// Fixed RNG seed; `None` seeds from the OS
    pub seed: Option<u64>,
    /// Per-sample step of the brown noise random walk
    pub brown_step: f32,
    /// Rare-event gates used by composite scenes
    pub thresholds: EventThresholds,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            noise_duration_secs: 10.0,
            ambience_duration_secs: 8.0,
            seed: None,
            brown_step: 0.02,
            thresholds: EventThresholds::default(),
        }
    }
}

impl SynthConfig {
    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("noise_duration_secs", self.noise_duration_secs),
            ("ambience_duration_secs", self.ambience_duration_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 || secs > crate::synth::MAX_DURATION_SECS {
                return Err(invalid(format!("{name} out of range: {secs}")));
            }
        }
        if !(self.brown_step > 0.0 && self.brown_step <= 1.0) {
            return Err(invalid(format!(
                "brown_step must be in (0, 1], got {}",
                self.brown_step
            )));
        }
        self.thresholds.validate()
    }
}

/// Per-sample probability gates for rare stochastic events
///
/// Each value is compared against a uniform draw `u` in `[0, 1)` once per
/// sample; the event fires when `u > threshold`. At sample rate `fs` an event
/// therefore fires on average `(1 - threshold) * fs` times per second, so
/// 0.998 at 48kHz means roughly 96 trigger samples per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventThresholds {
    /// Gate for the city horn partial
    pub city_horn: f32,
    /// Gate for the cafe cup "clink"
    pub cafe_clink: f32,
    /// Level of the slow sine above which cafe hiss is loud (not random)
    pub cafe_hiss_gate: f32,
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            city_horn: 0.998,
            cafe_clink: 0.995,
            cafe_hiss_gate: 0.9,
        }
    }
}

impl EventThresholds {
    /// Expected number of triggering samples per second for a threshold
    ///
    /// # Example
    /// ```
    /// use soundscape::config::EventThresholds;
    /// let rate = EventThresholds::events_per_second(0.995, 48000);
    /// assert!((rate - 240.0).abs() < 1e-3);
    /// ```
    pub fn events_per_second(threshold: f32, sample_rate: u32) -> f64 {
        (1.0 - threshold as f64).max(0.0) * sample_rate as f64
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("city_horn", self.city_horn),
            ("cafe_clink", self.cafe_clink),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(invalid(format!("threshold {name} must be in [0, 1), got {value}")));
            }
        }
        if !(-1.0..=1.0).contains(&self.cafe_hiss_gate) {
            return Err(invalid(format!(
                "cafe_hiss_gate must be in [-1, 1], got {}",
                self.cafe_hiss_gate
            )));
        }
        Ok(())
    }
}

/// Lifecycle and timer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Time after an unlock attempt before the context state is checked
    pub unlock_confirm_delay_ms: u64,
    /// Length of the sleep-timer fade to silence
    pub sleep_fade_secs: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            unlock_confirm_delay_ms: 100,
            sleep_fade_secs: 180.0,
        }
    }
}

impl LifecycleConfig {
    /// Unlock confirmation delay as a duration
    pub fn unlock_confirm_delay(&self) -> Duration {
        Duration::from_millis(self.unlock_confirm_delay_ms)
    }

    /// Sleep fade length as a duration
    pub fn sleep_fade(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_fade_secs.max(0.0))
    }
}

fn invalid(reason: String) -> SoundscapeError {
    SoundscapeError::InvalidConfig { reason }
}
