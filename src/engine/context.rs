//! Audio context seam
//!
//! The audio context is the platform object that owns the real-time render
//! thread. The engine only talks to it through this trait, so the same
//! lifecycle and mixer code runs against the in-process `SoftwareContext`, a
//! device backend, or a scripted test double.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::SoundscapeError;
use crate::mixer::AudioGraph;

/// State reported by the platform context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Constructed but not permitted to render
    Suspended,
    /// Rendering audio
    Running,
    /// Stopped by the OS (incoming call, audio focus loss)
    Interrupted,
    /// Torn down; cannot be resumed
    Closed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Suspended => write!(f, "suspended"),
            ContextState::Running => write!(f, "running"),
            ContextState::Interrupted => write!(f, "interrupted"),
            ContextState::Closed => write!(f, "closed"),
        }
    }
}

/// Audio session category on platforms that expose one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionCategory {
    /// Mixes with other audio and obeys the hardware mute switch
    Ambient,
    /// Media playback; keeps playing with the mute switch engaged
    Playback,
}

/// Why a platform resume request was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeError {
    /// The request did not originate inside a user gesture
    GestureRequired,
    /// The context was closed
    Closed,
    /// Any other platform refusal
    Platform(String),
}

impl From<ResumeError> for SoundscapeError {
    fn from(err: ResumeError) -> Self {
        match err {
            ResumeError::GestureRequired => SoundscapeError::GestureRequired,
            ResumeError::Closed => SoundscapeError::ContextClosed,
            ResumeError::Platform(reason) => SoundscapeError::Platform { reason },
        }
    }
}

/// A platform audio context that renders one `AudioGraph`
pub trait AudioContext: Send + Sync + 'static {
    /// Current platform state
    fn state(&self) -> ContextState;

    /// Graph rendered by this context
    fn graph(&self) -> &Arc<AudioGraph>;

    /// Request that rendering (re)start
    ///
    /// Platforms that gate output on user activation decide eligibility when
    /// this method is *called*, not when the returned future is polled.
    fn resume(&self) -> impl Future<Output = Result<(), ResumeError>> + Send + '_;

    /// Tear the context down; every node in its graph is lost
    fn close(&self);

    /// Sample rate of the context
    fn sample_rate(&self) -> u32 {
        self.graph().sample_rate()
    }

    /// Context clock in seconds
    fn current_time(&self) -> f64 {
        self.graph().current_time()
    }

    /// Assert the platform audio session category
    ///
    /// Returns `false` where the platform has no such API.
    fn set_session_category(&self, _category: SessionCategory) -> bool {
        false
    }
}
