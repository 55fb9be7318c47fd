//! In-process audio context
//!
//! `SoftwareContext` renders its graph on demand instead of on a device
//! thread. It reproduces the platform behaviors the lifecycle has to cope
//! with: contexts that start suspended until a user gesture, resume calls
//! that take time to settle, OS interruptions and backgrounding. It also
//! drives offline rendering for the CLI.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::EngineConfig;
use crate::engine::context::{AudioContext, ContextState, ResumeError, SessionCategory};
use crate::engine::AudioBuffer;
use crate::mixer::AudioGraph;

/// How long a user gesture keeps resume eligible
pub const GESTURE_ACTIVATION_WINDOW: Duration = Duration::from_secs(5);

/// Whether the context may start output without a user gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayPolicy {
    /// Desktop behavior: the context starts running
    #[default]
    Allowed,
    /// Mobile behavior: starts suspended, resume needs a recent gesture
    RequiresGesture,
}

#[derive(Debug)]
struct PlatformState {
    state: ContextState,
    last_gesture: Option<Instant>,
    session: Option<SessionCategory>,
}

/// Audio context that renders into caller-provided buffers
#[derive(Debug)]
pub struct SoftwareContext {
    graph: Arc<AudioGraph>,
    policy: AutoplayPolicy,
    resume_latency: Duration,
    session_api: bool,
    platform: Mutex<PlatformState>,
    resume_calls: AtomicUsize,
}

impl SoftwareContext {
    /// Create a context with its own empty graph
    pub fn new(sample_rate: u32, max_nodes: usize, policy: AutoplayPolicy) -> Self {
        let state = match policy {
            AutoplayPolicy::Allowed => ContextState::Running,
            AutoplayPolicy::RequiresGesture => ContextState::Suspended,
        };
        Self {
            graph: Arc::new(AudioGraph::new(sample_rate, max_nodes)),
            policy,
            resume_latency: Duration::ZERO,
            session_api: false,
            platform: Mutex::new(PlatformState {
                state,
                last_gesture: None,
                session: None,
            }),
            resume_calls: AtomicUsize::new(0),
        }
    }

    /// Create a context sized from an engine configuration
    pub fn from_config(config: &EngineConfig, policy: AutoplayPolicy) -> Self {
        Self::new(config.sample_rate, config.max_nodes, policy)
    }

    /// Delay before a granted resume takes effect
    pub fn with_resume_latency(mut self, latency: Duration) -> Self {
        self.resume_latency = latency;
        self
    }

    /// Expose an audio-session category API
    pub fn with_session_api(mut self, supported: bool) -> Self {
        self.session_api = supported;
        self
    }

    fn platform(&self) -> MutexGuard<'_, PlatformState> {
        self.platform.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Platform event simulation
    // ========================================================================

    /// Record a user gesture (pointer up, key press, touch end)
    pub fn user_gesture(&self) {
        self.platform().last_gesture = Some(Instant::now());
    }

    /// True if a gesture happened within the activation window
    pub fn has_transient_activation(&self) -> bool {
        self.platform()
            .last_gesture
            .is_some_and(|at| at.elapsed() <= GESTURE_ACTIVATION_WINDOW)
    }

    /// OS audio interruption, such as an incoming call
    pub fn interrupt(&self) {
        let mut platform = self.platform();
        if platform.state == ContextState::Running {
            platform.state = ContextState::Interrupted;
            log::debug!("[PLATFORM] context interrupted");
        }
    }

    /// App moved to the background
    pub fn background(&self) {
        let mut platform = self.platform();
        if platform.state == ContextState::Running {
            platform.state = ContextState::Suspended;
            log::debug!("[PLATFORM] context suspended by backgrounding");
        }
    }

    /// Number of resume requests that reached the platform
    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    /// Session category last asserted, if the API is exposed
    pub fn session_category(&self) -> Option<SessionCategory> {
        self.platform().session
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Pull interleaved output from the graph
    ///
    /// Writes silence without advancing the clock unless the context is running.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        if self.platform().state != ContextState::Running {
            out.fill(0.0);
            return;
        }
        self.graph.render(out, channels);
    }

    /// Render `seconds` of the live mix into a mono buffer
    pub fn render_offline(&self, seconds: f64) -> AudioBuffer {
        let frames = (seconds.max(0.0) * self.graph.sample_rate() as f64).round() as usize;
        let mut samples = vec![0.0; frames];
        self.render(&mut samples, 1);
        AudioBuffer::from_mono(samples, self.graph.sample_rate())
    }

    /// Decide eligibility at call time, the way gesture-gated platforms do
    fn check_resume(&self) -> Result<(), ResumeError> {
        let platform = self.platform();
        match platform.state {
            ContextState::Closed => Err(ResumeError::Closed),
            ContextState::Running => Ok(()),
            ContextState::Suspended | ContextState::Interrupted => {
                let activated = platform
                    .last_gesture
                    .is_some_and(|at| at.elapsed() <= GESTURE_ACTIVATION_WINDOW);
                if self.policy == AutoplayPolicy::RequiresGesture && !activated {
                    Err(ResumeError::GestureRequired)
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl AudioContext for SoftwareContext {
    fn state(&self) -> ContextState {
        self.platform().state
    }

    fn graph(&self) -> &Arc<AudioGraph> {
        &self.graph
    }

    fn resume(&self) -> impl Future<Output = Result<(), ResumeError>> + Send + '_ {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        let eligibility = self.check_resume();
        async move {
            eligibility?;
            if !self.resume_latency.is_zero() {
                tokio::time::sleep(self.resume_latency).await;
            }
            let mut platform = self.platform();
            if platform.state == ContextState::Closed {
                return Err(ResumeError::Closed);
            }
            platform.state = ContextState::Running;
            Ok(())
        }
    }

    fn close(&self) {
        self.platform().state = ContextState::Closed;
        self.graph.clear();
    }

    fn set_session_category(&self, category: SessionCategory) -> bool {
        if !self.session_api {
            return false;
        }
        self.platform().session = Some(category);
        true
    }
}
