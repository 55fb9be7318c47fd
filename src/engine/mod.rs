//! Audio Engine Module
//!
//! Everything between the mixer and the platform:
//! - Audio buffers and WAV I/O
//! - The audio context seam and an in-process implementation
//! - The playback lifecycle state machine and unlock protocol

pub mod buffer;
pub mod context;
pub mod io;
pub mod lifecycle;
pub mod software;

pub use buffer::{db_to_linear, linear_to_db, AudioBuffer, ChannelLayout};
pub use context::{AudioContext, ContextState, ResumeError, SessionCategory};
pub use io::{decode_wav_bytes, encode_wav_bytes, export_wav, import_wav, resample, ExportFormat};
pub use lifecycle::{ContextFactory, EngineState, PlaybackEngine};
pub use software::{AutoplayPolicy, SoftwareContext, GESTURE_ACTIVATION_WINDOW};
