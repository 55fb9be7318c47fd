//! Layer mixing
//!
//! Signal flow for every context:
//!
//! ```text
//! source ─► gain ─┐
//! source ─► gain ─┼─► master gain ─► [analyser] ─► destination
//! source ─► gain ─┘
//! ```
//!
//! `AudioGraph` is the render-side node graph, `MixerController` the keyed
//! control surface over it.

pub mod analyser;
pub mod assets;
pub mod controller;
pub mod graph;
pub mod param;

pub use analyser::{AnalyserTap, SpectrumAnalyser};
#[cfg(feature = "remote-assets")]
pub use assets::HttpAssetSource;
pub use assets::{load_buffer, AssetFuture, AssetSource, FileAssetSource};
pub use controller::{LiveLayerNode, MixerController};
pub use graph::{AudioGraph, LayerNodes, NodeId, Output, RENDER_QUANTUM};
pub use param::AudioParam;
