//! Mixer controller
//!
//! Owns the master bus, the optional analysis tap and the map from layer id
//! to its live source and gain nodes. Every gain change is a short linear
//! ramp from the instantaneous value; nothing is ever stepped.
//!
//! The controller never caches a context. Each operation asks the injected
//! [`PlaybackEngine`] for the live context and compares generations, so a
//! close followed by reconstruction simply empties the layer map and the
//! reconciler re-adds everything.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{EngineConfig, MixerConfig};
use crate::engine::{resample, AudioBuffer, AudioContext, ContextState, PlaybackEngine};
use crate::error::{Result, SoundscapeError};
use crate::mixer::analyser::{AnalyserTap, SpectrumAnalyser};
use crate::mixer::assets::{self, AssetSource};
use crate::mixer::graph::{AudioGraph, LayerNodes, NodeId, Output};
use crate::reconcile::LayerId;
use crate::synth::{SoundCategory, SynthBank};

/// Materialized counterpart of one desired layer
#[derive(Debug, Clone, PartialEq)]
pub struct LiveLayerNode {
    pub id: LayerId,
    pub category: SoundCategory,
    pub source: NodeId,
    pub gain: NodeId,
    /// Target volume, kept while muted so re-enabling can restore it
    pub volume: f32,
    pub enabled: bool,
}

impl LiveLayerNode {
    fn nodes(&self) -> LayerNodes {
        LayerNodes {
            source: self.source,
            gain: self.gain,
        }
    }
}

#[derive(Debug)]
struct MixerState {
    generation: u64,
    master: Option<NodeId>,
    master_target: f32,
    /// Master gain was driven away from `master_target` by a fade
    master_faded: bool,
    analyser: Option<NodeId>,
    analyser_requested: bool,
    layers: HashMap<LayerId, LiveLayerNode>,
    pending: HashSet<LayerId>,
}

impl MixerState {
    fn new() -> Self {
        Self {
            generation: 0,
            master: None,
            master_target: 1.0,
            master_faded: false,
            analyser: None,
            analyser_requested: false,
            layers: HashMap::new(),
            pending: HashSet::new(),
        }
    }

    /// Forget every node handle; they belonged to a context that is gone
    fn reset(&mut self, generation: u64) {
        if !self.layers.is_empty() {
            log::info!(
                "[MIXER] context generation changed, dropping {} stale layers",
                self.layers.len()
            );
        }
        self.layers.clear();
        self.master = None;
        self.analyser = None;
        self.master_faded = false;
        self.generation = generation;
    }
}

/// Removes an id from the in-flight set when `add_layer` finishes
struct PendingGuard<'a> {
    state: &'a Mutex<MixerState>,
    id: LayerId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.state).pending.remove(&self.id);
    }
}

fn lock(state: &Mutex<MixerState>) -> MutexGuard<'_, MixerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Keyed collection of live layers feeding a master gain
pub struct MixerController<C: AudioContext> {
    engine: Arc<PlaybackEngine<C>>,
    synth: SynthBank,
    assets: Option<Arc<dyn AssetSource>>,
    spectrum: Arc<SpectrumAnalyser>,
    config: MixerConfig,
    state: Mutex<MixerState>,
}

impl<C: AudioContext> std::fmt::Debug for MixerController<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerController")
            .field("engine", &self.engine)
            .field("state", &*lock(&self.state))
            .finish_non_exhaustive()
    }
}

impl<C: AudioContext> MixerController<C> {
    /// Create a controller bound to an engine
    pub fn new(engine: Arc<PlaybackEngine<C>>, synth: SynthBank, config: MixerConfig) -> Self {
        let spectrum = Arc::new(SpectrumAnalyser::new(
            config.analyser_fft_size,
            config.min_decibels,
            config.max_decibels,
        ));
        Self {
            engine,
            synth,
            assets: None,
            spectrum,
            config,
            state: Mutex::new(MixerState::new()),
        }
    }

    /// Create a controller and its synth bank from an engine configuration
    pub fn from_config(engine: Arc<PlaybackEngine<C>>, config: &EngineConfig) -> Self {
        let synth = SynthBank::new(config.sample_rate, &config.synth);
        Self::new(engine, synth, config.mixer.clone())
    }

    /// Load layer URLs through `source` instead of always synthesizing
    pub fn with_asset_source(mut self, source: Arc<dyn AssetSource>) -> Self {
        self.assets = Some(source);
        self
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine<C>> {
        &self.engine
    }

    pub fn synth(&self) -> &SynthBank {
        &self.synth
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MixerState> {
        lock(&self.state)
    }

    /// Align cached handles with the engine's live context
    fn sync(&self, state: &mut MixerState) -> Option<Arc<C>> {
        match self.engine.current() {
            Some((context, generation)) => {
                if state.generation != generation {
                    state.reset(generation);
                }
                Some(context)
            }
            None => {
                if state.master.is_some() || !state.layers.is_empty() {
                    let generation = state.generation;
                    state.reset(generation);
                }
                None
            }
        }
    }

    fn ensure_master(&self, state: &mut MixerState, graph: &AudioGraph) -> Result<NodeId> {
        if state.analyser_requested && state.analyser.is_none() {
            let tap = graph.create_analyser(self.config.analyser_fft_size, Output::Destination)?;
            state.analyser = Some(tap);
        }
        if let Some(master) = state.master {
            return Ok(master);
        }
        let output = state.analyser.map_or(Output::Destination, Output::Node);
        let master = graph.create_gain(state.master_target, output)?;
        state.master = Some(master);
        log::debug!("[MIXER] master bus {} created", master);
        Ok(master)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// True if a layer with this id is live
    pub fn has_layer(&self, id: &LayerId) -> bool {
        let mut state = self.lock();
        self.sync(&mut state);
        state.layers.contains_key(id)
    }

    /// True while an `add_layer` for this id is in flight
    pub fn is_pending(&self, id: &LayerId) -> bool {
        self.lock().pending.contains(id)
    }

    /// Snapshot of one live layer
    pub fn layer(&self, id: &LayerId) -> Option<LiveLayerNode> {
        let mut state = self.lock();
        self.sync(&mut state);
        state.layers.get(id).cloned()
    }

    /// Ids of every live layer, sorted
    pub fn layer_ids(&self) -> Vec<LayerId> {
        let mut state = self.lock();
        self.sync(&mut state);
        let mut ids: Vec<LayerId> = state.layers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn layer_count(&self) -> usize {
        let mut state = self.lock();
        self.sync(&mut state);
        state.layers.len()
    }

    /// Instantaneous master gain, possibly mid-ramp
    pub fn master_volume(&self) -> f32 {
        let mut state = self.lock();
        let context = self.sync(&mut state);
        match (context, state.master) {
            (Some(context), Some(master)) => context
                .graph()
                .gain_value(master)
                .unwrap_or(state.master_target),
            _ => state.master_target,
        }
    }

    /// Master volume the mixer is converging to
    pub fn master_target(&self) -> f32 {
        self.lock().master_target
    }

    // ========================================================================
    // Master
    // ========================================================================

    /// Ramp the master gain to `volume`
    ///
    /// Returns false when `volume` is already the target, leaving the graph
    /// untouched. While a fade-out is running a new value is only recorded;
    /// the fade keeps control of the gain and restores the target afterwards.
    pub fn set_master_volume(&self, volume: f32) -> bool {
        let volume = clamp_volume(volume);
        let mut state = self.lock();
        let context = self.sync(&mut state);
        if state.master_target == volume {
            return false;
        }
        state.master_target = volume;
        if state.master_faded {
            log::debug!("[MIXER] master target {:.2} held until the fade ends", volume);
            return true;
        }

        if let (Some(context), Some(master)) = (context, state.master) {
            if let Err(err) = context
                .graph()
                .ramp_gain(master, volume, self.config.master_ramp_secs)
            {
                log::warn!("[MIXER] master ramp failed: {}", err);
            }
        }
        true
    }

    // ========================================================================
    // Layers
    // ========================================================================

    /// Materialize a layer
    ///
    /// Returns `Ok(false)` without touching anything if the id is already
    /// live or being added. Otherwise makes sure the engine is running,
    /// obtains a buffer (external asset, falling back to synthesis) and
    /// builds source → gain → master in one step.
    ///
    /// # Errors
    /// * `GestureRequired` / `EngineNotReady` / `ContextClosed` - the engine
    ///   could not be brought to `Running`; nothing was created
    /// * `NodeConstruction` - the graph refused the nodes; the layer is absent
    pub async fn add_layer(
        &self,
        id: &LayerId,
        category: SoundCategory,
        volume: f32,
        url: Option<&str>,
    ) -> Result<bool> {
        {
            let mut state = self.lock();
            self.sync(&mut state);
            if state.layers.contains_key(id) || state.pending.contains(id) {
                return Ok(false);
            }
            state.pending.insert(id.clone());
        }
        let _pending = PendingGuard {
            state: &self.state,
            id: id.clone(),
        };

        let (context, generation) = self.engine.ensure_running().await.map_err(|err| {
            log::debug!("[MIXER] deferring {}: {}", id, err);
            err
        })?;

        let buffer = self.load_buffer(category, url, context.sample_rate()).await?;

        let mut state = self.lock();
        self.sync(&mut state);
        if self.engine.generation() != generation {
            return Err(SoundscapeError::ContextClosed);
        }
        if context.state() != ContextState::Running {
            return Err(SoundscapeError::EngineNotReady {
                state: context.state().into(),
            });
        }

        let volume = clamp_volume(volume);
        let graph = context.graph();
        let master = self.ensure_master(&mut state, graph)?;
        let nodes = graph.build_layer(Arc::new(buffer), master, volume, self.config.attack_secs)?;

        state.layers.insert(
            id.clone(),
            LiveLayerNode {
                id: id.clone(),
                category,
                source: nodes.source,
                gain: nodes.gain,
                volume,
                enabled: true,
            },
        );
        log::info!("[MIXER] added {} ({}) at volume {:.2}", id, category, volume);
        Ok(true)
    }

    async fn load_buffer(
        &self,
        category: SoundCategory,
        url: Option<&str>,
        sample_rate: u32,
    ) -> Result<AudioBuffer> {
        if let Some(url) = url {
            match self.assets.as_deref() {
                Some(source) => match assets::load_buffer(source, url, sample_rate).await {
                    Ok(buffer) if !buffer.is_empty() => return Ok(buffer),
                    Ok(_) => log::warn!("[MIXER] asset {} is empty, synthesizing {}", url, category),
                    Err(err) => log::warn!("[MIXER] {}; synthesizing {}", err, category),
                },
                None => log::warn!("[MIXER] no asset source for {}, synthesizing {}", url, category),
            }
        }

        let buffer = self.synth.generate(category)?;
        if buffer.sample_rate != sample_rate {
            return Ok(resample(&buffer, sample_rate));
        }
        Ok(buffer)
    }

    /// Fade a layer out and schedule its teardown
    ///
    /// The id leaves the map immediately; the nodes are stopped and
    /// disconnected on the graph clock once the fade has finished. Returns
    /// false if the id was not live.
    pub fn remove_layer(&self, id: &LayerId) -> bool {
        let mut state = self.lock();
        let Some(context) = self.sync(&mut state) else {
            return false;
        };
        let Some(layer) = state.layers.remove(id) else {
            return false;
        };
        context.graph().release_layer(
            layer.nodes(),
            self.config.release_secs,
            self.config.teardown_delay_secs,
        );
        log::info!("[MIXER] removed {} ({})", id, layer.category);
        true
    }

    /// Ramp a layer to a new volume; false if absent or unchanged
    ///
    /// A muted layer only records the new volume.
    pub fn set_layer_volume(&self, id: &LayerId, volume: f32) -> bool {
        let volume = clamp_volume(volume);
        let mut state = self.lock();
        let Some(context) = self.sync(&mut state) else {
            return false;
        };
        let Some(layer) = state.layers.get_mut(id) else {
            return false;
        };
        if layer.volume == volume {
            return false;
        }
        layer.volume = volume;
        if layer.enabled {
            if let Err(err) = context
                .graph()
                .ramp_gain(layer.gain, volume, self.config.volume_ramp_secs)
            {
                log::warn!("[MIXER] volume ramp on {} failed: {}", id, err);
            }
        }
        true
    }

    /// Mute or unmute a layer without tearing it down
    pub fn set_layer_enabled(&self, id: &LayerId, enabled: bool) -> bool {
        let mut state = self.lock();
        let Some(context) = self.sync(&mut state) else {
            return false;
        };
        let Some(layer) = state.layers.get_mut(id) else {
            return false;
        };
        if layer.enabled == enabled {
            return false;
        }
        layer.enabled = enabled;
        let target = if enabled { layer.volume } else { 0.0 };
        if let Err(err) = context
            .graph()
            .ramp_gain(layer.gain, target, self.config.volume_ramp_secs)
        {
            log::warn!("[MIXER] mute ramp on {} failed: {}", id, err);
        }
        true
    }

    /// Fade out and tear down every live layer; returns how many there were
    pub fn stop_all(&self) -> usize {
        let mut state = self.lock();
        let Some(context) = self.sync(&mut state) else {
            return 0;
        };
        let graph = context.graph();
        let count = state.layers.len();
        for (_, layer) in state.layers.drain() {
            graph.release_layer(
                layer.nodes(),
                self.config.stop_all_ramp_secs,
                self.config.stop_all_teardown_secs,
            );
        }
        if count > 0 {
            log::info!("[MIXER] stopped {} layers", count);
        }
        count
    }

    // ========================================================================
    // Analysis tap
    // ========================================================================

    /// Splice the analysis tap in front of the destination
    ///
    /// Idempotent: later calls return a handle to the same node. The tap
    /// stays in the signal path for the rest of the context's life.
    ///
    /// # Errors
    /// * `EngineNotReady` - no running context to build the tap in
    pub fn enable_analyser(&self) -> Result<AnalyserTap> {
        let mut state = self.lock();
        state.analyser_requested = true;
        let context = match self.sync(&mut state) {
            Some(context) if context.state() == ContextState::Running => context,
            Some(context) => {
                return Err(SoundscapeError::EngineNotReady {
                    state: context.state().into(),
                })
            }
            None => {
                return Err(SoundscapeError::EngineNotReady {
                    state: crate::engine::EngineState::Uninitialized,
                })
            }
        };
        let graph = context.graph();

        let node = match state.analyser {
            Some(node) => node,
            None => {
                let node = graph.create_analyser(self.config.analyser_fft_size, Output::Destination)?;
                if let Some(master) = state.master {
                    if let Err(err) = graph.connect(master, Output::Node(node)) {
                        graph.remove(node);
                        return Err(err);
                    }
                }
                state.analyser = Some(node);
                log::debug!("[MIXER] analysis tap {} installed", node);
                node
            }
        };
        Ok(AnalyserTap::new(Arc::clone(graph), node, Arc::clone(&self.spectrum)))
    }

    /// The analysis tap, if one is installed in the live context
    pub fn analyser(&self) -> Option<AnalyserTap> {
        let mut state = self.lock();
        let context = self.sync(&mut state)?;
        let node = state.analyser?;
        Some(AnalyserTap::new(
            Arc::clone(context.graph()),
            node,
            Arc::clone(&self.spectrum),
        ))
    }

    // ========================================================================
    // Timer hooks
    // ========================================================================

    /// Fade the master to silence over `duration`, then stop every layer
    ///
    /// The master gain returns to its target afterwards so the next layer
    /// plays at the configured level. Returns the number of layers stopped.
    pub async fn fade_out_and_stop(&self, duration: Duration) -> usize {
        {
            let mut state = self.lock();
            if let (Some(context), Some(master)) = (self.sync(&mut state), state.master) {
                match context.graph().ramp_gain(master, 0.0, duration.as_secs_f64()) {
                    Ok(()) => state.master_faded = true,
                    Err(err) => log::warn!("[MIXER] fade ramp failed: {}", err),
                }
            }
        }
        log::info!("[MIXER] fading out over {:.1}s", duration.as_secs_f64());
        tokio::time::sleep(duration).await;

        let stopped = self.stop_all();
        tokio::time::sleep(Duration::from_secs_f64(self.config.stop_all_teardown_secs)).await;

        let mut state = self.lock();
        if let (Some(context), Some(master)) = (self.sync(&mut state), state.master) {
            let target = state.master_target;
            if let Err(err) = context
                .graph()
                .ramp_gain(master, target, self.config.master_ramp_secs)
            {
                log::warn!("[MIXER] master restore failed: {}", err);
            }
        }
        state.master_faded = false;
        stopped
    }

    /// Play the session-boundary beep straight to the destination
    ///
    /// The tone bypasses the master gain, so it is audible even while the
    /// mix is faded out.
    pub fn play_notification_tone(&self) -> Result<()> {
        let (context, _) = self.engine.current().ok_or(SoundscapeError::EngineNotReady {
            state: crate::engine::EngineState::Uninitialized,
        })?;
        if context.state() != ContextState::Running {
            return Err(SoundscapeError::EngineNotReady {
                state: context.state().into(),
            });
        }
        let tone = resample(&self.synth.notification_tone(), context.sample_rate());
        context
            .graph()
            .play_one_shot(Arc::new(tone), Output::Destination)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthConfig;
    use crate::engine::{AutoplayPolicy, SoftwareContext};
    use crate::mixer::assets::FileAssetSource;
    use approx::assert_relative_eq;

    fn test_config(max_nodes: usize) -> EngineConfig {
        EngineConfig {
            sample_rate: 8000,
            max_nodes,
            synth: SynthConfig {
                seed: Some(7),
                noise_duration_secs: 1.0,
                ambience_duration_secs: 1.0,
                ..SynthConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn setup_with(
        config: EngineConfig,
        policy: AutoplayPolicy,
        latency: Duration,
    ) -> MixerController<SoftwareContext> {
        let context_config = config.clone();
        let engine = Arc::new(PlaybackEngine::new(config.lifecycle.clone(), move || {
            Ok(SoftwareContext::from_config(&context_config, policy).with_resume_latency(latency))
        }));
        MixerController::from_config(engine, &config)
    }

    fn setup() -> MixerController<SoftwareContext> {
        setup_with(test_config(32), AutoplayPolicy::Allowed, Duration::ZERO)
    }

    fn graph(mixer: &MixerController<SoftwareContext>) -> Arc<AudioGraph> {
        let (context, _) = mixer.engine().current().unwrap();
        Arc::clone(context.graph())
    }

    fn id(name: &str) -> LayerId {
        LayerId::new(name)
    }

    #[tokio::test]
    async fn test_add_layer_builds_chain() {
        let mixer = setup();
        assert!(mixer.add_layer(&id("rain"), SoundCategory::Rain, 0.3, None).await.unwrap());

        let layer = mixer.layer(&id("rain")).unwrap();
        let graph = graph(&mixer);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.gain_value(layer.gain), Some(0.0));

        graph.render_frames(800);
        assert_relative_eq!(graph.gain_value(layer.gain).unwrap(), 0.3);
    }

    #[tokio::test]
    async fn test_add_layer_is_idempotent() {
        let mixer = setup();
        assert!(mixer.add_layer(&id("a"), SoundCategory::Pink, 0.5, None).await.unwrap());
        assert!(!mixer.add_layer(&id("a"), SoundCategory::Pink, 0.5, None).await.unwrap());
        assert_eq!(mixer.layer_count(), 1);
        assert_eq!(graph(&mixer).node_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_add_creates_one_layer() {
        let mixer = setup_with(
            test_config(32),
            AutoplayPolicy::RequiresGesture,
            Duration::from_millis(30),
        );
        let (context, _) = mixer.engine().context().unwrap();
        context.user_gesture();

        let layer = id("wind");
        let (first, second) = tokio::join!(
            mixer.add_layer(&layer, SoundCategory::Wind, 0.2, None),
            mixer.add_layer(&layer, SoundCategory::Wind, 0.2, None)
        );
        assert!(first.unwrap());
        assert!(!second.unwrap());
        assert_eq!(mixer.layer_count(), 1);
        assert_eq!(context.graph().node_count(), 3);
        assert!(!mixer.is_pending(&layer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_while_suspended_changes_nothing() {
        let mixer = setup_with(test_config(32), AutoplayPolicy::RequiresGesture, Duration::ZERO);
        let err = mixer
            .add_layer(&id("rain"), SoundCategory::Rain, 0.3, None)
            .await
            .unwrap_err();

        assert!(err.is_deferrable());
        assert!(!mixer.has_layer(&id("rain")));
        assert!(!mixer.is_pending(&id("rain")));
        assert_eq!(graph(&mixer).node_count(), 0);
        assert_eq!(graph(&mixer).mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_add_then_remove_empties_the_graph() {
        let mixer = setup();
        let layer = id("fire");
        mixer.add_layer(&layer, SoundCategory::Fire, 0.4, None).await.unwrap();
        assert!(mixer.remove_layer(&layer));
        assert!(!mixer.has_layer(&layer));
        assert!(!mixer.remove_layer(&layer));

        let graph = graph(&mixer);
        graph.render_frames(800);
        // Only the master bus is left
        assert_eq!(graph.node_count(), 1);
    }

    #[tokio::test]
    async fn test_master_volume_ramps_without_jumps() {
        let mixer = setup();
        mixer.add_layer(&id("a"), SoundCategory::Brown, 1.0, None).await.unwrap();
        let graph = graph(&mixer);
        graph.render_frames(400);

        assert!(mixer.set_master_volume(0.2));
        let master = mixer.lock().master.unwrap();
        let now = graph.current_time();
        let ramp = mixer.config().master_ramp_secs;
        let step = ramp / 20.0;
        let mut previous = graph.gain_value_at(master, now).unwrap();
        for i in 1..=30 {
            let value = graph.gain_value_at(master, now + i as f64 * step).unwrap();
            assert!((value - previous).abs() <= 0.8 / 20.0 + 1e-4);
            previous = value;
        }
        assert_relative_eq!(previous, 0.2);
    }

    #[tokio::test]
    async fn test_unchanged_volumes_do_not_touch_the_graph() {
        let mixer = setup();
        mixer.add_layer(&id("a"), SoundCategory::Rain, 0.3, None).await.unwrap();
        mixer.set_master_volume(0.8);
        let before = graph(&mixer).mutation_count();

        assert!(!mixer.set_master_volume(0.8));
        assert!(!mixer.set_layer_volume(&id("a"), 0.3));
        assert!(!mixer.set_layer_enabled(&id("a"), true));
        assert!(!mixer.set_layer_volume(&id("missing"), 0.3));
        assert_eq!(graph(&mixer).mutation_count(), before);
    }

    #[tokio::test]
    async fn test_mute_restores_previous_volume() {
        let mixer = setup();
        let layer = id("a");
        mixer.add_layer(&layer, SoundCategory::Stream, 0.6, None).await.unwrap();
        let gain = mixer.layer(&layer).unwrap().gain;
        let graph = graph(&mixer);

        assert!(mixer.set_layer_enabled(&layer, false));
        assert_eq!(graph.gain_target(gain), Some(0.0));

        // Volume changes while muted are remembered, not applied
        assert!(mixer.set_layer_volume(&layer, 0.4));
        assert_eq!(graph.gain_target(gain), Some(0.0));

        assert!(mixer.set_layer_enabled(&layer, true));
        assert_eq!(graph.gain_target(gain), Some(0.4));
    }

    #[tokio::test]
    async fn test_stop_all_tears_everything_down() {
        let mixer = setup();
        for (name, category) in [("a", SoundCategory::Rain), ("b", SoundCategory::City)] {
            mixer.add_layer(&id(name), category, 0.5, None).await.unwrap();
        }
        assert_eq!(mixer.stop_all(), 2);
        assert_eq!(mixer.layer_count(), 0);

        let graph = graph(&mixer);
        graph.render_frames(800);
        assert_eq!(graph.node_count(), 1);
    }

    #[tokio::test]
    async fn test_analyser_is_spliced_once() {
        let mixer = setup();
        mixer.add_layer(&id("a"), SoundCategory::White, 0.5, None).await.unwrap();

        let tap = mixer.enable_analyser().unwrap();
        let again = mixer.enable_analyser().unwrap();
        assert_eq!(tap.node(), again.node());

        let graph = graph(&mixer);
        let master = mixer.lock().master.unwrap();
        assert_eq!(graph.output_of(master), Some(Output::Node(tap.node())));
        assert_eq!(graph.output_of(tap.node()), Some(Output::Destination));

        graph.render_frames(4096);
        assert!(tap.byte_frequency_data().iter().any(|&b| b > 0));
    }

    #[tokio::test]
    async fn test_full_graph_leaves_layer_absent() {
        let mixer = setup_with(test_config(2), AutoplayPolicy::Allowed, Duration::ZERO);
        let err = mixer
            .add_layer(&id("a"), SoundCategory::Rain, 0.5, None)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "NODE_CONSTRUCTION_FAILURE");
        assert!(!mixer.has_layer(&id("a")));
        // The master bus is shared infrastructure, not part of the layer
        assert_eq!(graph(&mixer).node_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_asset_falls_back_to_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let mixer = setup().with_asset_source(Arc::new(FileAssetSource::new(dir.path())));
        let added = mixer
            .add_layer(&id("a"), SoundCategory::Wave, 0.5, Some("ocean.wav"))
            .await
            .unwrap();
        assert!(added);
        assert!(mixer.has_layer(&id("a")));
    }

    #[tokio::test]
    async fn test_close_drops_stale_layers() {
        let mixer = setup();
        mixer.add_layer(&id("a"), SoundCategory::Rain, 0.5, None).await.unwrap();

        mixer.engine().close();
        assert!(!mixer.has_layer(&id("a")));

        assert!(mixer.add_layer(&id("a"), SoundCategory::Rain, 0.5, None).await.unwrap());
        assert_eq!(mixer.engine().generation(), 2);
        assert_eq!(graph(&mixer).node_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fade_out_and_stop() {
        let mixer = setup();
        mixer.set_master_volume(0.7);
        mixer.add_layer(&id("a"), SoundCategory::Rain, 0.5, None).await.unwrap();
        let master = mixer.lock().master.unwrap();
        let graph = graph(&mixer);

        let stopped = mixer.fade_out_and_stop(Duration::from_secs(2)).await;
        assert_eq!(stopped, 1);
        assert_eq!(mixer.layer_count(), 0);
        assert_eq!(graph.gain_target(master), Some(0.7));
        assert_relative_eq!(mixer.master_target(), 0.7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_changes_do_not_interrupt_fade() {
        let mixer = setup();
        mixer.set_master_volume(0.8);
        mixer.add_layer(&id("a"), SoundCategory::Rain, 0.5, None).await.unwrap();
        let master = mixer.lock().master.unwrap();
        let graph = graph(&mixer);

        let fade = mixer.fade_out_and_stop(Duration::from_secs(10));
        let nudge = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            graph.render_frames(5 * 8000);
            assert_relative_eq!(mixer.master_volume(), 0.4, epsilon = 1e-3);

            assert!(!mixer.set_master_volume(0.8));
            assert_eq!(graph.gain_target(master), Some(0.0));

            // A new target is remembered but the fade keeps going
            assert!(mixer.set_master_volume(0.6));
            assert_eq!(graph.gain_target(master), Some(0.0));
            graph.render_frames(800);
            assert!(mixer.master_volume() < 0.4);
        };
        let (stopped, ()) = tokio::join!(fade, nudge);

        assert_eq!(stopped, 1);
        assert_eq!(graph.gain_target(master), Some(0.6));
        assert_relative_eq!(mixer.master_target(), 0.6);
    }

    #[tokio::test]
    async fn test_layer_volume_ramps_without_jumps() {
        let mixer = setup();
        let layer = id("a");
        mixer.add_layer(&layer, SoundCategory::Pink, 0.9, None).await.unwrap();
        let gain = mixer.layer(&layer).unwrap().gain;
        let graph = graph(&mixer);
        graph.render_frames(800);

        assert!(mixer.set_layer_volume(&layer, 0.1));
        let now = graph.current_time();
        let ramp = mixer.config().volume_ramp_secs;
        let step = ramp / 20.0;
        let mut previous = graph.gain_value_at(gain, now).unwrap();
        assert_relative_eq!(previous, 0.9);
        for i in 1..=30 {
            let value = graph.gain_value_at(gain, now + i as f64 * step).unwrap();
            assert!((value - previous).abs() <= 0.8 / 20.0 + 1e-4);
            previous = value;
        }
        assert_relative_eq!(previous, 0.1);
    }

    #[tokio::test]
    async fn test_notification_tone_bypasses_master() {
        let mixer = setup();
        mixer.engine().context().unwrap();
        mixer.set_master_volume(0.0);
        mixer.play_notification_tone().unwrap();

        let graph = graph(&mixer);
        assert_eq!(graph.node_count(), 1);
        let out = graph.render_frames(400);
        assert!(out.iter().any(|s| s.abs() > 0.1));
    }
}
