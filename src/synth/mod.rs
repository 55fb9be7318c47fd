//! Procedural buffer synthesis
//!
//! Every sound in the mixer comes from a loopable mono buffer generated here:
//! - `noise`: white, pink and brown noise
//! - `ambience`: parametric nature and room scenes
//! - `bank`: seeded dispatch from category to generator
//!
//! Generators take their random source as an argument so tests can seed it.
//! Buffers are looped by the mixer without a crossfade; the seam is
//! inaudible at the default 8-10 s lengths but can be heard on very short
//! buffers.

pub mod ambience;
pub mod bank;
pub mod category;
pub mod noise;

pub use ambience::AmbienceSynthesizer;
pub use bank::SynthBank;
pub use category::SoundCategory;
pub use noise::NoiseGenerator;

use crate::error::{Result, SoundscapeError};

/// Longest buffer a generator will produce
pub const MAX_DURATION_SECS: f64 = 60.0;

/// Number of frames for `duration_secs` at `sample_rate`
///
/// # Errors
/// * `InvalidDuration` - duration is not finite, not positive, exceeds
///   `MAX_DURATION_SECS`, or rounds to zero frames
pub(crate) fn frame_count(duration_secs: f64, sample_rate: u32) -> Result<usize> {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || duration_secs > MAX_DURATION_SECS {
        return Err(SoundscapeError::InvalidDuration { duration_secs });
    }
    let frames = (duration_secs * sample_rate as f64).round() as usize;
    if frames == 0 {
        return Err(SoundscapeError::InvalidDuration { duration_secs });
    }
    Ok(frames)
}
