//! Desired-state reconciliation
//!
//! The application owns a declarative [`DesiredState`]: a master volume and an
//! ordered list of layers. [`LayerReconciler`] converges the live mixer toward
//! it by issuing add / volume / remove calls keyed by position. Running it
//! again with the same input changes nothing.
//!
//! Layers that cannot be built yet because the engine is not running are
//! reported as deferred, not as errors. [`LayerReconciler::run`] re-reconciles
//! whenever the desired state or the engine state changes, so deferred layers
//! appear as soon as the engine is unlocked.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::engine::AudioContext;
use crate::error::{Result, SoundscapeError};
use crate::mixer::MixerController;
use crate::synth::SoundCategory;

// ============================================================================
// Desired state
// ============================================================================

/// Stable key of a layer across reconciliation cycles
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the layer at `index` in a desired list
    pub fn from_index(index: usize) -> Self {
        Self(format!("layer-{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_master_volume() -> f32 {
    1.0
}

/// One entry of the desired layer list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredLayer {
    #[serde(alias = "soundType")]
    pub category: SoundCategory,
    pub volume: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// External sample to play instead of the synthesized loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DesiredLayer {
    pub fn new(category: SoundCategory, volume: f32) -> Self {
        Self {
            category,
            volume,
            enabled: true,
            source: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_source(mut self, url: impl Into<String>) -> Self {
        self.source = Some(url.into());
        self
    }
}

/// Everything the application wants to hear
///
/// # Example
/// ```
/// use soundscape::reconcile::DesiredState;
///
/// let scene = DesiredState::from_json(
///     r#"{"masterVolume": 0.8, "layers": [{"soundType": "rain", "volume": 0.3}]}"#,
/// ).unwrap();
/// assert_eq!(scene.layers.len(), 1);
/// assert!(scene.layers[0].enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    #[serde(default = "default_master_volume", alias = "master_volume")]
    pub master_volume: f32,
    #[serde(default)]
    pub layers: Vec<DesiredLayer>,
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            master_volume: default_master_volume(),
            layers: Vec::new(),
        }
    }
}

impl DesiredState {
    pub fn new(master_volume: f32) -> Self {
        Self {
            master_volume,
            layers: Vec::new(),
        }
    }

    pub fn with_layer(mut self, layer: DesiredLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a scene description from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Ids paired with their desired layer, in list order
    pub fn entries(&self) -> impl Iterator<Item = (LayerId, &DesiredLayer)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| (LayerId::from_index(index), layer))
    }
}

// ============================================================================
// Report
// ============================================================================

/// What one reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub master_changed: bool,
    pub added: Vec<LayerId>,
    pub updated: Vec<LayerId>,
    pub removed: Vec<LayerId>,
    /// Waiting for the engine to run
    pub deferred: Vec<LayerId>,
    /// Hard failures; the layer stays absent and is retried next pass
    pub failed: Vec<(LayerId, String)>,
}

impl ReconcileReport {
    /// True if the pass issued no graph changes at all
    pub fn is_noop(&self) -> bool {
        !self.master_changed
            && self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
    }

    /// True if the live graph now matches the desired state
    pub fn is_converged(&self) -> bool {
        self.deferred.is_empty() && self.failed.is_empty()
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Converges a [`MixerController`] toward a [`DesiredState`]
pub struct LayerReconciler<C: AudioContext> {
    mixer: Arc<MixerController<C>>,
}

impl<C: AudioContext> Clone for LayerReconciler<C> {
    fn clone(&self) -> Self {
        Self {
            mixer: Arc::clone(&self.mixer),
        }
    }
}

impl<C: AudioContext> fmt::Debug for LayerReconciler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerReconciler")
            .field("mixer", &self.mixer)
            .finish()
    }
}

impl<C: AudioContext> LayerReconciler<C> {
    pub fn new(mixer: Arc<MixerController<C>>) -> Self {
        Self { mixer }
    }

    pub fn mixer(&self) -> &Arc<MixerController<C>> {
        &self.mixer
    }

    /// Run one pass over `desired`
    ///
    /// Layers are processed strictly in list order; each add is awaited
    /// before the next entry is looked at. Once the engine refuses to run,
    /// the remaining adds are deferred without asking it again.
    pub async fn reconcile(&self, desired: &DesiredState) -> ReconcileReport {
        let mut report = ReconcileReport {
            master_changed: self.mixer.set_master_volume(desired.master_volume),
            ..ReconcileReport::default()
        };
        let mut wanted = HashSet::new();
        let mut engine_blocked = false;

        for (id, layer) in desired.entries() {
            if !layer.enabled {
                if self.mixer.remove_layer(&id) {
                    report.removed.push(id);
                }
                continue;
            }
            wanted.insert(id.clone());

            if let Some(live) = self.mixer.layer(&id) {
                if live.category == layer.category {
                    if self.mixer.set_layer_volume(&id, layer.volume) {
                        report.updated.push(id);
                    }
                    continue;
                }
                log::debug!(
                    "[RECONCILE] {} changed from {} to {}",
                    id,
                    live.category,
                    layer.category
                );
                if self.mixer.remove_layer(&id) {
                    report.removed.push(id.clone());
                }
            }

            if engine_blocked {
                report.deferred.push(id);
                continue;
            }
            match self
                .mixer
                .add_layer(&id, layer.category, layer.volume, layer.source.as_deref())
                .await
            {
                Ok(true) => report.added.push(id),
                Ok(false) => log::debug!("[RECONCILE] {} is already being added", id),
                Err(err) if err.is_deferrable() => {
                    log::debug!("[RECONCILE] deferring {}: {}", id, err);
                    engine_blocked = true;
                    report.deferred.push(id);
                }
                Err(err) => {
                    log::warn!("[RECONCILE] could not add {}: {}", id, err);
                    report.failed.push((id, err.to_string()));
                }
            }
        }

        for id in self.mixer.layer_ids() {
            if !wanted.contains(&id) && self.mixer.remove_layer(&id) {
                report.removed.push(id);
            }
        }

        if !report.is_noop() || !report.is_converged() {
            log::debug!(
                "[RECONCILE] +{} ~{} -{} deferred {} failed {}",
                report.added.len(),
                report.updated.len(),
                report.removed.len(),
                report.deferred.len(),
                report.failed.len()
            );
        }
        report
    }

    /// Reconcile on every desired-state or engine-state change
    ///
    /// Returns once the desired-state sender is dropped.
    pub async fn run(&self, mut desired: watch::Receiver<DesiredState>) -> Result<()> {
        let mut engine_state = self.mixer.engine().subscribe();
        loop {
            let snapshot = desired.borrow_and_update().clone();
            engine_state.borrow_and_update();
            self.reconcile(&snapshot).await;

            tokio::select! {
                changed = desired.changed() => {
                    if changed.is_err() {
                        log::debug!("[RECONCILE] desired state closed, stopping");
                        return Ok(());
                    }
                }
                changed = engine_state.changed() => {
                    if changed.is_err() {
                        return Err(SoundscapeError::Platform {
                            reason: "engine state channel closed".to_string(),
                        });
                    }
                    log::debug!("[RECONCILE] engine is {}", *engine_state.borrow());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ids_follow_position() {
        let scene = DesiredState::new(0.5)
            .with_layer(DesiredLayer::new(SoundCategory::Rain, 0.3))
            .with_layer(DesiredLayer::new(SoundCategory::Wind, 0.2).disabled());
        let ids: Vec<String> = scene.entries().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["layer-0", "layer-1"]);
    }

    #[test]
    fn test_scene_json_accepts_both_spellings() {
        let camel = DesiredState::from_json(
            r#"{"masterVolume": 0.6, "layers": [{"soundType": "coffee-shop", "volume": 0.4, "enabled": false}]}"#,
        )
        .unwrap();
        let snake = DesiredState::from_json(
            r#"{"master_volume": 0.6, "layers": [{"category": "cafe", "volume": 0.4, "enabled": false}]}"#,
        )
        .unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.layers[0].category, SoundCategory::Cafe);
    }

    #[test]
    fn test_scene_defaults() {
        let scene = DesiredState::from_json(r#"{"layers": [{"category": "pink", "volume": 1.0}]}"#).unwrap();
        assert_eq!(scene.master_volume, 1.0);
        assert!(scene.layers[0].enabled);
        assert_eq!(scene.layers[0].source, None);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let err = DesiredState::from_json(r#"{"layers": [{"category": "jungle", "volume": 1.0}]}"#)
            .unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
    }

    #[test]
    fn test_report_flags() {
        let mut report = ReconcileReport::default();
        assert!(report.is_noop());
        assert!(report.is_converged());

        report.deferred.push(LayerId::from_index(0));
        assert!(report.is_noop());
        assert!(!report.is_converged());

        report.added.push(LayerId::new("x"));
        assert!(!report.is_noop());
    }
}
