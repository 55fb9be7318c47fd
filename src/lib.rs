//! Soundscape - Ambient Sound Synthesis and Mixing Engine
//!
//! Soundscape procedurally synthesizes noise colors and nature-like ambience
//! and mixes any number of looping layers into a master output with
//! click-free gain control.
//!
//! # Architecture
//!
//! - `synth`: loop buffers for each [`synth::SoundCategory`]
//! - `mixer`: the node graph, gain automation and [`mixer::MixerController`]
//! - `engine`: the platform context seam and [`engine::PlaybackEngine`],
//!   which owns the context's state machine and the gesture unlock
//! - `reconcile`: converges the mixer toward a declarative desired state
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use soundscape::config::EngineConfig;
//! use soundscape::engine::{AutoplayPolicy, PlaybackEngine, SoftwareContext};
//! use soundscape::mixer::MixerController;
//! use soundscape::reconcile::{DesiredLayer, DesiredState, LayerReconciler};
//! use soundscape::synth::SoundCategory;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let mut config = EngineConfig::default();
//! config.sample_rate = 8000;
//! config.synth.ambience_duration_secs = 1.0;
//!
//! let context_config = config.clone();
//! let engine = Arc::new(PlaybackEngine::new(config.lifecycle.clone(), move || {
//!     Ok(SoftwareContext::from_config(&context_config, AutoplayPolicy::Allowed))
//! }));
//! let mixer = Arc::new(MixerController::from_config(engine, &config));
//! let reconciler = LayerReconciler::new(Arc::clone(&mixer));
//!
//! let scene = DesiredState::new(0.8).with_layer(DesiredLayer::new(SoundCategory::Rain, 0.3));
//! let report = reconciler.reconcile(&scene).await;
//! assert_eq!(report.added.len(), 1);
//! assert_eq!(mixer.layer_count(), 1);
//! # });
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod reconcile;
pub mod synth;

pub use error::{Result, SoundscapeError};
