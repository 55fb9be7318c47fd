//! Error handling for Soundscape
//!
//! Most failures in the engine are absorbed internally (deferred, retried or
//! replaced by a fallback). The classification helpers below tell callers
//! which is which.

use thiserror::Error;

use crate::engine::EngineState;
use crate::mixer::NodeId;
use crate::synth::SoundCategory;

/// Result type alias for Soundscape operations
pub type Result<T> = std::result::Result<T, SoundscapeError>;

/// Main error type for Soundscape operations
#[derive(Error, Debug)]
pub enum SoundscapeError {
    // Lifecycle Errors
    #[error("Audio engine not ready (state: {state})")]
    EngineNotReady { state: EngineState },

    #[error("Audio output can only be resumed inside a user gesture")]
    GestureRequired,

    #[error("Audio context has been closed")]
    ContextClosed,

    #[error("Platform audio error: {reason}")]
    Platform { reason: String },

    // Asset Errors
    #[error("Failed to load audio asset {url}: {reason}")]
    AssetLoad {
        url: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid audio data: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    // Graph Errors
    #[error("Failed to construct layer nodes: {reason}")]
    NodeConstruction { reason: String },

    #[error("Unknown audio node: {node}")]
    InvalidNode { node: NodeId },

    // Synthesis Errors
    #[error("Unknown sound category: {name}")]
    UnknownCategory { name: String },

    #[error("Sound category {category} is not handled by the {synthesizer} synthesizer")]
    UnsupportedCategory {
        category: SoundCategory,
        synthesizer: &'static str,
    },

    #[error("Invalid buffer duration: {duration_secs}s")]
    InvalidDuration { duration_secs: f64 },

    // Configuration Errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SoundscapeError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            SoundscapeError::EngineNotReady { .. } => "ENGINE_NOT_READY",
            SoundscapeError::GestureRequired => "GESTURE_REQUIRED",
            SoundscapeError::ContextClosed => "CONTEXT_CLOSED",
            SoundscapeError::Platform { .. } => "PLATFORM_ERROR",
            SoundscapeError::AssetLoad { .. } => "ASSET_LOAD_FAILURE",
            SoundscapeError::InvalidAudio { .. } => "INVALID_AUDIO",
            SoundscapeError::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            SoundscapeError::NodeConstruction { .. } => "NODE_CONSTRUCTION_FAILURE",
            SoundscapeError::InvalidNode { .. } => "INVALID_NODE",
            SoundscapeError::UnknownCategory { .. } => "UNKNOWN_CATEGORY",
            SoundscapeError::UnsupportedCategory { .. } => "UNSUPPORTED_CATEGORY",
            SoundscapeError::InvalidDuration { .. } => "INVALID_DURATION",
            SoundscapeError::InvalidConfig { .. } => "INVALID_CONFIG",
            SoundscapeError::Io(_) => "IO_ERROR",
            SoundscapeError::Wav(_) => "WAV_ERROR",
            SoundscapeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recovered without user involvement
    ///
    /// Recoverable errors leave the engine in a consistent state; the next
    /// reconciliation cycle (or a synthesis fallback) takes care of them.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SoundscapeError::EngineNotReady { .. }
                | SoundscapeError::GestureRequired
                | SoundscapeError::ContextClosed
                | SoundscapeError::AssetLoad { .. }
                | SoundscapeError::InvalidAudio { .. }
                | SoundscapeError::UnsupportedFormat { .. }
                | SoundscapeError::NodeConstruction { .. }
        )
    }

    /// Check if the failed operation should simply be retried once the
    /// engine reports `Running` again
    pub fn is_deferrable(&self) -> bool {
        matches!(
            self,
            SoundscapeError::EngineNotReady { .. }
                | SoundscapeError::GestureRequired
                | SoundscapeError::ContextClosed
        )
    }
}
