//! Playback engine lifecycle
//!
//! `PlaybackEngine` owns the single audio context and everything platform
//! specific about getting it to run:
//! - lazy construction, and reconstruction after a close
//! - deduplicated resume (concurrent callers share one platform call)
//! - the gesture-bound unlock sequence (resume, prime, session category)
//! - foreground recovery after backgrounding or an OS interruption
//! - a `watch` broadcast of [`EngineState`] for the reconciler
//!
//! The engine is shared as `Arc<PlaybackEngine<C>>` and injected into the
//! mixer; nothing here is global.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::config::LifecycleConfig;
use crate::engine::context::{AudioContext, ContextState, ResumeError, SessionCategory};
use crate::error::{Result, SoundscapeError};

/// Lifecycle state as seen by the rest of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineState {
    /// No context has been constructed yet
    #[default]
    Uninitialized,
    /// Context exists but may not render
    Suspended,
    /// Context is rendering; graph mutation is allowed
    Running,
    /// Stopped by the OS; needs a resume, possibly inside a gesture
    Interrupted,
    /// Context torn down; the next use builds a fresh one
    Closed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Suspended => write!(f, "suspended"),
            EngineState::Running => write!(f, "running"),
            EngineState::Interrupted => write!(f, "interrupted"),
            EngineState::Closed => write!(f, "closed"),
        }
    }
}

impl From<ContextState> for EngineState {
    fn from(state: ContextState) -> Self {
        match state {
            ContextState::Suspended => EngineState::Suspended,
            ContextState::Running => EngineState::Running,
            ContextState::Interrupted => EngineState::Interrupted,
            ContextState::Closed => EngineState::Closed,
        }
    }
}

/// Builds a fresh platform context
pub type ContextFactory<C> = Box<dyn Fn() -> Result<C> + Send + Sync>;

struct ContextSlot<C> {
    context: Arc<C>,
    generation: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct UnlockState {
    /// Context reported running after an unlock attempt
    confirmed: bool,
    /// A resume was refused for lack of a gesture
    pending: bool,
}

/// Owner of the audio context and its state machine
pub struct PlaybackEngine<C: AudioContext> {
    config: LifecycleConfig,
    factory: ContextFactory<C>,
    slot: Mutex<Option<ContextSlot<C>>>,
    generation: AtomicU64,
    closed: Mutex<bool>,

    // Resume deduplication
    resume_gate: tokio::sync::Mutex<()>,
    resume_epoch: AtomicU64,
    last_resume: Mutex<Option<std::result::Result<(), ResumeError>>>,

    unlock: Mutex<UnlockState>,
    state_tx: watch::Sender<EngineState>,
}

impl<C: AudioContext> fmt::Debug for PlaybackEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("state", &*self.state_tx.borrow())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("unlock", &*lock(&self.unlock))
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: AudioContext> PlaybackEngine<C> {
    /// Create an engine; no context is built until first use
    ///
    /// # Arguments
    /// * `config` - unlock and fade timings
    /// * `factory` - called to construct each context generation
    pub fn new<F>(config: LifecycleConfig, factory: F) -> Self
    where
        F: Fn() -> Result<C> + Send + Sync + 'static,
    {
        let (state_tx, _) = watch::channel(EngineState::Uninitialized);
        Self {
            config,
            factory: Box::new(factory),
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: Mutex::new(false),
            resume_gate: tokio::sync::Mutex::new(()),
            resume_epoch: AtomicU64::new(0),
            last_resume: Mutex::new(None),
            unlock: Mutex::new(UnlockState::default()),
            state_tx,
        }
    }

    /// Lifecycle settings
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Current state, read from the live context
    pub fn state(&self) -> EngineState {
        let state = match lock(&self.slot).as_ref() {
            Some(slot) => slot.context.state().into(),
            None if *lock(&self.closed) => EngineState::Closed,
            None => EngineState::Uninitialized,
        };
        self.publish(state);
        state
    }

    /// True once the context is rendering
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    /// Generation of the current context; bumps on every reconstruction
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// True until an unlock attempt has been confirmed
    pub fn needs_unlock(&self) -> bool {
        let unlock = lock(&self.unlock);
        unlock.pending || !unlock.confirmed
    }

    /// Re-read the platform state after a platform callback
    ///
    /// Leaving `Running` revokes any earlier unlock confirmation so the next
    /// gesture runs the unlock sequence again.
    pub fn refresh(&self) -> EngineState {
        let state = self.state();
        if state != EngineState::Running {
            lock(&self.unlock).confirmed = false;
        }
        state
    }

    fn publish(&self, state: EngineState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            log::debug!("[LIFECYCLE] {} -> {}", current, state);
            *current = state;
            true
        });
    }

    // ========================================================================
    // Context ownership
    // ========================================================================

    /// The live context, if one has been constructed and not closed
    pub fn current(&self) -> Option<(Arc<C>, u64)> {
        lock(&self.slot)
            .as_ref()
            .filter(|slot| slot.context.state() != ContextState::Closed)
            .map(|slot| (Arc::clone(&slot.context), slot.generation))
    }

    /// The live context, constructing a fresh one if needed
    ///
    /// A context that was closed (explicitly or by the platform) is replaced;
    /// every node it held is gone, so callers compare generations.
    pub fn context(&self) -> Result<(Arc<C>, u64)> {
        let mut slot = lock(&self.slot);
        if let Some(existing) = slot.as_ref() {
            if existing.context.state() != ContextState::Closed {
                return Ok((Arc::clone(&existing.context), existing.generation));
            }
            log::info!("[LIFECYCLE] context closed, reconstructing");
        }

        let context = Arc::new((self.factory)()?);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(ContextSlot {
            context: Arc::clone(&context),
            generation,
        });
        drop(slot);

        *lock(&self.closed) = false;
        lock(&self.unlock).confirmed = false;
        self.publish(context.state().into());
        log::debug!("[LIFECYCLE] context generation {} created", generation);
        Ok((context, generation))
    }

    /// Close the context; the next use constructs a new one
    pub fn close(&self) {
        let taken = lock(&self.slot).take();
        if let Some(slot) = taken {
            slot.context.close();
            log::info!("[LIFECYCLE] context generation {} closed", slot.generation);
        }
        *lock(&self.closed) = true;
        *lock(&self.unlock) = UnlockState::default();
        self.publish(EngineState::Closed);
    }

    // ========================================================================
    // Resume
    // ========================================================================

    /// Ask the platform to start rendering
    ///
    /// Callers that arrive while a resume is in flight wait for it and share
    /// its outcome rather than issuing a second platform call.
    pub async fn resume(&self) -> Result<()> {
        let (context, _) = self.context()?;
        if context.state() == ContextState::Running {
            self.publish(EngineState::Running);
            return Ok(());
        }

        let epoch = self.resume_epoch.load(Ordering::SeqCst);
        let _gate = self.resume_gate.lock().await;

        if self.resume_epoch.load(Ordering::SeqCst) != epoch {
            let shared = lock(&self.last_resume).clone();
            if let Some(outcome) = shared {
                self.state();
                return outcome.map_err(SoundscapeError::from);
            }
        }
        if context.state() == ContextState::Running {
            self.publish(EngineState::Running);
            return Ok(());
        }

        let outcome = context.resume().await;
        *lock(&self.last_resume) = Some(outcome.clone());
        self.resume_epoch.fetch_add(1, Ordering::SeqCst);

        match &outcome {
            Ok(()) => log::debug!("[RESUME] platform resume granted"),
            Err(ResumeError::GestureRequired) => {
                lock(&self.unlock).pending = true;
                log::debug!("[RESUME] refused outside a user gesture; unlock pending");
            }
            Err(err) => log::warn!("[RESUME] platform resume failed: {:?}", err),
        }
        self.state();
        outcome.map_err(SoundscapeError::from)
    }

    /// Return the live context once it is running, resuming if necessary
    ///
    /// # Errors
    /// * `GestureRequired` - resume was refused; unlock is now pending
    /// * `EngineNotReady` - resume returned but the context is not running
    pub async fn ensure_running(&self) -> Result<(Arc<C>, u64)> {
        let (context, generation) = self.context()?;
        if context.state() != ContextState::Running {
            self.resume().await?;
        }
        match context.state() {
            ContextState::Running => Ok((context, generation)),
            ContextState::Closed => Err(SoundscapeError::ContextClosed),
            other => Err(SoundscapeError::EngineNotReady {
                state: other.into(),
            }),
        }
    }

    // ========================================================================
    // Unlock protocol
    // ========================================================================

    /// Run the unlock sequence from inside a user gesture handler
    ///
    /// Returns `true` once the context is confirmed running. Until then every
    /// gesture should call this again.
    pub async fn unlock(&self) -> Result<bool> {
        {
            let unlock = lock(&self.unlock);
            if unlock.confirmed && !unlock.pending && self.is_running() {
                return Ok(true);
            }
        }

        let (context, _) = self.context()?;

        if context.state() != ContextState::Running {
            if let Err(err) = self.resume().await {
                log::debug!("[UNLOCK] resume attempt failed: {}", err);
            }
        }

        if let Err(err) = context.graph().prime() {
            log::warn!("[UNLOCK] failed to prime output: {}", err);
        }

        if context.set_session_category(SessionCategory::Playback) {
            log::debug!("[UNLOCK] audio session set to playback");
        }

        tokio::time::sleep(self.config.unlock_confirm_delay()).await;

        let running = context.state() == ContextState::Running;
        {
            let mut unlock = lock(&self.unlock);
            unlock.confirmed = running;
            unlock.pending = !running;
        }
        self.state();
        if running {
            log::info!("[UNLOCK] audio output unlocked");
        } else {
            log::debug!("[UNLOCK] not confirmed; retrying on next gesture");
        }
        Ok(running)
    }

    /// App returned to the foreground
    ///
    /// Attempts a resume. A refusal for lack of a gesture is expected here
    /// and only marks the unlock as pending.
    pub async fn on_foreground(&self) -> Result<EngineState> {
        if self.refresh() == EngineState::Running {
            return Ok(EngineState::Running);
        }
        match self.resume().await {
            Ok(()) => {}
            Err(err) if err.is_deferrable() => {
                log::debug!("[FOREGROUND] resume deferred to next gesture: {}", err);
            }
            Err(err) => return Err(err),
        }
        Ok(self.refresh())
    }
}
