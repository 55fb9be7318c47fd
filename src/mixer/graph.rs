//! Audio graph and block renderer
//!
//! The graph is the render-side half of the mixer: a set of nodes (looping
//! buffer sources, gains, analysers), each with at most one output, feeding
//! the context destination. The control side mutates it through the methods
//! below; the platform pulls audio out of it with [`AudioGraph::render`].
//!
//! Teardown is scheduled on the graph clock rather than on control-side
//! timers: a released node is stopped and disconnected once the frame
//! counter passes its release point.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::AudioBuffer;
use crate::error::{Result, SoundscapeError};
use crate::mixer::param::AudioParam;

/// Frames rendered per internal block (automation is still per frame)
pub const RENDER_QUANTUM: usize = 128;

/// Opaque handle to a node in an [`AudioGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Where a node sends its signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Output {
    /// Into another node's input
    Node(NodeId),
    /// Straight to the context's output
    Destination,
}

/// Source and gain handles of one materialized layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerNodes {
    pub source: NodeId,
    pub gain: NodeId,
}

#[derive(Debug)]
struct SourceNode {
    buffer: Arc<AudioBuffer>,
    looping: bool,
    cursor: usize,
    stop_at: Option<u64>,
    ended: bool,
    dispose_on_end: bool,
}

impl SourceNode {
    fn new(buffer: Arc<AudioBuffer>, looping: bool, dispose_on_end: bool) -> Self {
        Self {
            buffer,
            looping,
            cursor: 0,
            stop_at: None,
            ended: false,
            dispose_on_end,
        }
    }

    fn render(&mut self, out: &mut [f32], start_frame: u64) {
        if self.ended {
            return;
        }
        let len = self.buffer.num_samples();
        if len == 0 {
            self.ended = true;
            return;
        }

        for (i, slot) in out.iter_mut().enumerate() {
            let frame = start_frame + i as u64;
            if self.stop_at.is_some_and(|at| frame >= at) {
                self.ended = true;
                return;
            }
            if self.cursor >= len {
                if !self.looping {
                    self.ended = true;
                    return;
                }
                self.cursor = 0;
            }
            *slot = self.buffer.mono_sample(self.cursor);
            self.cursor += 1;
        }
    }
}

#[derive(Debug)]
struct AnalyserState {
    history: Vec<f32>,
    write: usize,
}

impl AnalyserState {
    fn new(fft_size: usize) -> Self {
        Self {
            history: vec![0.0; fft_size.max(1)],
            write: 0,
        }
    }

    fn record(&mut self, block: &[f32]) {
        let len = self.history.len();
        for &sample in block {
            self.history[self.write] = sample;
            self.write = (self.write + 1) % len;
        }
    }

    /// Oldest-first copy of the window
    fn snapshot(&self) -> Vec<f32> {
        let mut window = Vec::with_capacity(self.history.len());
        window.extend_from_slice(&self.history[self.write..]);
        window.extend_from_slice(&self.history[..self.write]);
        window
    }
}

#[derive(Debug)]
enum NodeKind {
    Source(SourceNode),
    Gain(AudioParam),
    Analyser(AnalyserState),
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    output: Option<Output>,
}

#[derive(Debug, Default)]
struct GraphInner {
    frame: u64,
    next_id: u64,
    nodes: BTreeMap<NodeId, Node>,
    releases: Vec<(u64, NodeId)>,
    mutations: u64,
    primes: u64,
}

impl GraphInner {
    fn insert(&mut self, kind: NodeKind, output: Option<Output>) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(id, Node { kind, output });
        self.mutations += 1;
        id
    }

    fn remove(&mut self, id: NodeId) -> bool {
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        for node in self.nodes.values_mut() {
            if node.output == Some(Output::Node(id)) {
                node.output = None;
            }
        }
        true
    }

    fn check_target(&self, output: Output) -> Result<()> {
        match output {
            Output::Destination => Ok(()),
            Output::Node(target) => match self.nodes.get(&target) {
                Some(Node {
                    kind: NodeKind::Source(_),
                    ..
                }) => Err(SoundscapeError::NodeConstruction {
                    reason: format!("{target} is a source and has no input"),
                }),
                Some(_) => Ok(()),
                None => Err(SoundscapeError::InvalidNode { node: target }),
            },
        }
    }

    /// Hops from `id` to the end of its chain
    fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(Output::Node(next)) = self.nodes.get(&current).and_then(|n| n.output) {
            depth += 1;
            current = next;
            if depth > self.nodes.len() {
                break;
            }
        }
        depth
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut current = from;
        let mut hops = 0;
        loop {
            if current == target {
                return true;
            }
            match self.nodes.get(&current).and_then(|n| n.output) {
                Some(Output::Node(next)) if hops <= self.nodes.len() => {
                    current = next;
                    hops += 1;
                }
                _ => return false,
            }
        }
    }

    fn run_releases(&mut self) {
        let frame = self.frame;
        let due: Vec<NodeId> = self
            .releases
            .iter()
            .filter(|(at, _)| *at <= frame)
            .map(|(_, id)| *id)
            .collect();
        if due.is_empty() {
            return;
        }
        self.releases.retain(|(at, _)| *at > frame);
        for id in due {
            self.remove(id);
        }
    }

    fn render_block(&mut self, frames: usize, sample_rate: u32) -> Vec<f32> {
        let start = self.frame;
        let rate = sample_rate as f64;

        // Deepest nodes first so every input is complete before its consumer runs
        let mut order: Vec<(usize, NodeId)> =
            self.nodes.keys().map(|&id| (self.depth(id), id)).collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut inputs: HashMap<NodeId, Vec<f32>> = HashMap::new();
        let mut destination = vec![0.0_f32; frames];

        for (_, id) in order {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let mut signal = inputs.remove(&id).unwrap_or_else(|| vec![0.0; frames]);

            match &mut node.kind {
                NodeKind::Source(source) => source.render(&mut signal, start),
                NodeKind::Gain(param) => {
                    param.prune_before(start as f64 / rate);
                    for (i, sample) in signal.iter_mut().enumerate() {
                        *sample *= param.value_at((start + i as u64) as f64 / rate);
                    }
                }
                NodeKind::Analyser(analyser) => analyser.record(&signal),
            }

            match node.output {
                Some(Output::Destination) => mix_into(&mut destination, &signal),
                Some(Output::Node(target)) => match inputs.get_mut(&target) {
                    Some(acc) => mix_into(acc, &signal),
                    None => {
                        inputs.insert(target, signal);
                    }
                },
                None => {}
            }
        }

        self.frame += frames as u64;

        let finished: Vec<NodeId> = self
            .nodes
            .iter()
            .filter_map(|(id, node)| match &node.kind {
                NodeKind::Source(source) if source.ended && source.dispose_on_end => Some(*id),
                _ => None,
            })
            .collect();
        for id in finished {
            self.remove(id);
        }

        destination
    }
}

fn mix_into(acc: &mut [f32], signal: &[f32]) {
    for (a, s) in acc.iter_mut().zip(signal) {
        *a += s;
    }
}

/// Node store and renderer shared by the control side and the render thread
#[derive(Debug)]
pub struct AudioGraph {
    sample_rate: u32,
    max_nodes: usize,
    inner: Mutex<GraphInner>,
}

impl AudioGraph {
    /// Create an empty graph
    pub fn new(sample_rate: u32, max_nodes: usize) -> Self {
        Self {
            sample_rate,
            max_nodes,
            inner: Mutex::new(GraphInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_capacity(&self, inner: &GraphInner, needed: usize) -> Result<()> {
        if inner.nodes.len() + needed > self.max_nodes {
            return Err(SoundscapeError::NodeConstruction {
                reason: format!(
                    "graph is full ({} of {} nodes in use)",
                    inner.nodes.len(),
                    self.max_nodes
                ),
            });
        }
        Ok(())
    }

    fn seconds_to_frames(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    // ========================================================================
    // Clock and inspection
    // ========================================================================

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames rendered so far
    pub fn current_frame(&self) -> u64 {
        self.lock().frame
    }

    /// Graph clock in seconds
    pub fn current_time(&self) -> f64 {
        self.current_frame() as f64 / self.sample_rate as f64
    }

    /// Number of nodes currently in the graph
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// True if `node` is still in the graph
    pub fn contains(&self, node: NodeId) -> bool {
        self.lock().nodes.contains_key(&node)
    }

    /// Output of `node`, if it exists and is connected
    pub fn output_of(&self, node: NodeId) -> Option<Output> {
        self.lock().nodes.get(&node).and_then(|n| n.output)
    }

    /// Count of structural and automation changes made from the control side
    pub fn mutation_count(&self) -> u64 {
        self.lock().mutations
    }

    /// Number of times the output has been primed
    pub fn prime_count(&self) -> u64 {
        self.lock().primes
    }

    /// Instantaneous value of a gain node
    pub fn gain_value(&self, node: NodeId) -> Option<f32> {
        let inner = self.lock();
        let time = inner.frame as f64 / self.sample_rate as f64;
        match inner.nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Gain(param)) => Some(param.value_at(time)),
            _ => None,
        }
    }

    /// Value a gain node settles at once its automation completes
    pub fn gain_target(&self, node: NodeId) -> Option<f32> {
        match self.lock().nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Gain(param)) => Some(param.final_value()),
            _ => None,
        }
    }

    /// Sample a gain node's automation at an arbitrary time
    pub fn gain_value_at(&self, node: NodeId, time: f64) -> Option<f32> {
        match self.lock().nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Gain(param)) => Some(param.value_at(time)),
            _ => None,
        }
    }

    /// Oldest-first copy of an analyser's sample window
    pub fn analyser_window(&self, node: NodeId) -> Option<Vec<f32>> {
        match self.lock().nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Analyser(analyser)) => Some(analyser.snapshot()),
            _ => None,
        }
    }

    // ========================================================================
    // Construction and routing
    // ========================================================================

    /// Create a gain node
    pub fn create_gain(&self, initial: f32, output: Output) -> Result<NodeId> {
        let mut inner = self.lock();
        self.ensure_capacity(&inner, 1)?;
        inner.check_target(output)?;
        Ok(inner.insert(NodeKind::Gain(AudioParam::new(initial)), Some(output)))
    }

    /// Create a pass-through analyser node
    pub fn create_analyser(&self, fft_size: usize, output: Output) -> Result<NodeId> {
        let mut inner = self.lock();
        self.ensure_capacity(&inner, 1)?;
        inner.check_target(output)?;
        Ok(inner.insert(
            NodeKind::Analyser(AnalyserState::new(fft_size)),
            Some(output),
        ))
    }

    /// Route `node` into `output`, replacing its previous connection
    pub fn connect(&self, node: NodeId, output: Output) -> Result<()> {
        let mut inner = self.lock();
        if !inner.nodes.contains_key(&node) {
            return Err(SoundscapeError::InvalidNode { node });
        }
        inner.check_target(output)?;
        if let Output::Node(target) = output {
            if inner.reaches(target, node) {
                return Err(SoundscapeError::NodeConstruction {
                    reason: format!("connecting {node} to {target} would create a cycle"),
                });
            }
        }
        if let Some(entry) = inner.nodes.get_mut(&node) {
            entry.output = Some(output);
        }
        inner.mutations += 1;
        Ok(())
    }

    /// Detach `node` from its output
    pub fn disconnect(&self, node: NodeId) -> Result<()> {
        let mut inner = self.lock();
        let entry = inner
            .nodes
            .get_mut(&node)
            .ok_or(SoundscapeError::InvalidNode { node })?;
        entry.output = None;
        inner.mutations += 1;
        Ok(())
    }

    /// Stop a buffer source at the current frame
    ///
    /// A stopped one-shot has nothing left to play and is removed at once.
    pub fn stop(&self, node: NodeId) -> Result<()> {
        let mut inner = self.lock();
        let frame = inner.frame;
        let dispose = match inner.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(NodeKind::Source(source)) => {
                source.stop_at = Some(source.stop_at.map_or(frame, |at| at.min(frame)));
                source.dispose_on_end
            }
            _ => return Err(SoundscapeError::InvalidNode { node }),
        };
        if dispose {
            inner.remove(node);
        }
        inner.mutations += 1;
        Ok(())
    }

    /// Build and start the source → gain → `bus` chain of one layer
    ///
    /// The gain starts at 0 and ramps to `volume` over `attack_secs`; the
    /// source loops from the start of `buffer`. Either both nodes are created
    /// and connected or neither is.
    pub fn build_layer(
        &self,
        buffer: Arc<AudioBuffer>,
        bus: NodeId,
        volume: f32,
        attack_secs: f64,
    ) -> Result<LayerNodes> {
        let mut inner = self.lock();
        self.ensure_capacity(&inner, 2)?;
        match inner.nodes.get(&bus).map(|n| &n.kind) {
            Some(NodeKind::Gain(_)) | Some(NodeKind::Analyser(_)) => {}
            _ => {
                return Err(SoundscapeError::NodeConstruction {
                    reason: format!("mix bus {bus} is not available"),
                })
            }
        }
        if buffer.is_empty() {
            return Err(SoundscapeError::NodeConstruction {
                reason: "layer buffer is empty".to_string(),
            });
        }

        let now = inner.frame as f64 / self.sample_rate as f64;
        let mut param = AudioParam::new(0.0);
        param.set_value_at_time(0.0, now);
        param.linear_ramp_to_value_at_time(volume, now + attack_secs);

        let gain = inner.insert(NodeKind::Gain(param), Some(Output::Node(bus)));
        let source = inner.insert(
            NodeKind::Source(SourceNode::new(buffer, true, false)),
            Some(Output::Node(gain)),
        );
        Ok(LayerNodes { source, gain })
    }

    /// Ramp a gain node to `target` over `duration_secs`
    pub fn ramp_gain(&self, node: NodeId, target: f32, duration_secs: f64) -> Result<()> {
        let mut inner = self.lock();
        let now = inner.frame as f64 / self.sample_rate as f64;
        match inner.nodes.get_mut(&node).map(|n| &mut n.kind) {
            Some(NodeKind::Gain(param)) => param.ramp_to(target, now, duration_secs),
            _ => return Err(SoundscapeError::InvalidNode { node }),
        }
        inner.mutations += 1;
        Ok(())
    }

    /// Fade a layer out, then stop and remove both of its nodes
    ///
    /// Nodes that are already gone are ignored, so releasing twice is harmless.
    pub fn release_layer(&self, nodes: LayerNodes, fade_secs: f64, teardown_after_secs: f64) {
        let mut inner = self.lock();
        let now = inner.frame as f64 / self.sample_rate as f64;
        let at = inner.frame + self.seconds_to_frames(teardown_after_secs);

        if let Some(NodeKind::Gain(param)) = inner.nodes.get_mut(&nodes.gain).map(|n| &mut n.kind)
        {
            param.ramp_to(0.0, now, fade_secs);
        }
        if let Some(NodeKind::Source(source)) =
            inner.nodes.get_mut(&nodes.source).map(|n| &mut n.kind)
        {
            source.stop_at = Some(source.stop_at.map_or(at, |existing| existing.min(at)));
        }
        for id in [nodes.source, nodes.gain] {
            if inner.nodes.contains_key(&id) && !inner.releases.iter().any(|(_, r)| *r == id) {
                inner.releases.push((at, id));
            }
        }
        inner.mutations += 1;
    }

    /// Play a buffer once into `output`; the node removes itself when done
    pub fn play_one_shot(&self, buffer: Arc<AudioBuffer>, output: Output) -> Result<NodeId> {
        let mut inner = self.lock();
        self.ensure_capacity(&inner, 1)?;
        inner.check_target(output)?;
        Ok(inner.insert(
            NodeKind::Source(SourceNode::new(buffer, false, true)),
            Some(output),
        ))
    }

    /// Push a single silent frame to the destination and stop it at once
    ///
    /// Some platforms only release the output device after audio has been
    /// started from inside a user gesture.
    pub fn prime(&self) -> Result<()> {
        let silence = Arc::new(AudioBuffer::from_mono(vec![0.0], self.sample_rate));
        let node = self.play_one_shot(silence, Output::Destination)?;
        self.stop(node)?;
        self.lock().primes += 1;
        Ok(())
    }

    /// Remove a node immediately; returns false if it was already gone
    pub fn remove(&self, node: NodeId) -> bool {
        let mut inner = self.lock();
        let removed = inner.remove(node);
        if removed {
            inner.mutations += 1;
        }
        removed
    }

    /// Drop every node; used when the owning context closes
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.nodes.clear();
        inner.releases.clear();
        inner.mutations += 1;
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render interleaved output and advance the clock
    ///
    /// The mix is mono; it is copied to every channel of `out`.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let mut inner = self.lock();

        let mut offset = 0;
        while offset < frames {
            let block = (frames - offset).min(RENDER_QUANTUM);
            inner.run_releases();
            let mix = inner.render_block(block, self.sample_rate);
            for (i, sample) in mix.iter().enumerate() {
                let base = (offset + i) * channels;
                out[base..base + channels].fill(*sample);
            }
            offset += block;
        }
        inner.run_releases();
    }

    /// Render `frames` frames of mono output into a new Vec
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        self.render(&mut out, 1);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant(value: f32, len: usize) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::from_mono(vec![value; len], 1000))
    }

    #[test]
    fn test_layer_ramps_in_from_silence() {
        let graph = AudioGraph::new(1000, 16);
        let master = graph.create_gain(1.0, Output::Destination).unwrap();
        let layer = graph.build_layer(constant(1.0, 50), master, 0.5, 0.01).unwrap();

        let out = graph.render_frames(20);
        assert_eq!(out[0], 0.0);
        assert_relative_eq!(out[5], 0.25, epsilon = 1e-5);
        assert_relative_eq!(out[15], 0.5, epsilon = 1e-5);
        assert_relative_eq!(graph.gain_value(layer.gain).unwrap(), 0.5);
    }

    #[test]
    fn test_source_loops() {
        let graph = AudioGraph::new(1000, 16);
        let master = graph.create_gain(1.0, Output::Destination).unwrap();
        let buffer = Arc::new(AudioBuffer::from_mono(vec![0.1, 0.2, 0.3], 1000));
        graph.build_layer(buffer, master, 1.0, 0.0).unwrap();

        let out = graph.render_frames(7);
        assert_relative_eq!(out[3], 0.1);
        assert_relative_eq!(out[4], 0.2);
        assert_relative_eq!(out[6], 0.1);
    }

    #[test]
    fn test_release_removes_nodes_after_teardown() {
        let graph = AudioGraph::new(1000, 16);
        let master = graph.create_gain(1.0, Output::Destination).unwrap();
        let layer = graph.build_layer(constant(1.0, 10), master, 1.0, 0.0).unwrap();
        assert_eq!(graph.node_count(), 3);

        graph.release_layer(layer, 0.01, 0.02);
        graph.release_layer(layer, 0.01, 0.02);
        let out = graph.render_frames(30);

        assert_eq!(graph.node_count(), 1);
        assert!(!graph.contains(layer.source));
        assert!(out[25].abs() < 1e-6);
    }

    #[test]
    fn test_build_layer_is_all_or_nothing() {
        let graph = AudioGraph::new(1000, 2);
        let master = graph.create_gain(1.0, Output::Destination).unwrap();

        let err = graph.build_layer(constant(1.0, 10), master, 1.0, 0.0).unwrap_err();
        assert_eq!(err.error_code(), "NODE_CONSTRUCTION_FAILURE");
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn test_build_layer_requires_bus() {
        let graph = AudioGraph::new(1000, 8);
        let missing = NodeId(99);
        assert!(graph.build_layer(constant(1.0, 10), missing, 1.0, 0.0).is_err());
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_prime_leaves_no_nodes_behind() {
        let graph = AudioGraph::new(1000, 8);
        graph.prime().unwrap();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.prime_count(), 1);
    }

    #[test]
    fn test_one_shot_disposes_itself() {
        let graph = AudioGraph::new(1000, 8);
        let node = graph
            .play_one_shot(constant(0.5, 3), Output::Destination)
            .unwrap();
        let out = graph.render_frames(8);
        assert_relative_eq!(out[2], 0.5);
        assert_eq!(out[3], 0.0);
        assert!(!graph.contains(node));
    }

    #[test]
    fn test_connect_rejects_cycles() {
        let graph = AudioGraph::new(1000, 8);
        let a = graph.create_gain(1.0, Output::Destination).unwrap();
        let b = graph.create_gain(1.0, Output::Node(a)).unwrap();
        assert!(graph.connect(a, Output::Node(b)).is_err());
    }

    #[test]
    fn test_analyser_passes_signal_through() {
        let graph = AudioGraph::new(1000, 8);
        let analyser = graph.create_analyser(4, Output::Destination).unwrap();
        let master = graph.create_gain(1.0, Output::Node(analyser)).unwrap();
        graph.build_layer(constant(0.25, 16), master, 1.0, 0.0).unwrap();

        let out = graph.render_frames(8);
        assert_relative_eq!(out[7], 0.25);
        assert_eq!(graph.analyser_window(analyser).unwrap(), vec![0.25; 4]);
    }

    #[test]
    fn test_stop_unknown_node_errors() {
        let graph = AudioGraph::new(1000, 8);
        assert!(graph.stop(NodeId(7)).is_err());
        assert!(graph.disconnect(NodeId(7)).is_err());
    }

    #[test]
    fn test_render_fills_every_channel() {
        let graph = AudioGraph::new(1000, 8);
        graph
            .play_one_shot(constant(0.5, 4), Output::Destination)
            .unwrap();
        let mut out = vec![0.0; 8];
        graph.render(&mut out, 2);
        assert_eq!(out, vec![0.5; 8]);
        assert_eq!(graph.current_frame(), 4);
    }
}
