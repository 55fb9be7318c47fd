//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{export_wav, AutoplayPolicy, ExportFormat, PlaybackEngine, SoftwareContext};
use crate::error::{Result, SoundscapeError};
use crate::mixer::{FileAssetSource, MixerController};
use crate::reconcile::{DesiredState, LayerReconciler};
use crate::synth::{SoundCategory, SynthBank};

/// Load the engine configuration, falling back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            info!("Loading configuration: {}", path.display());
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// List every sound category.
pub fn list_categories(config: &EngineConfig) -> Result<()> {
    println!("{:<14} {:<10} {:>8}", "CATEGORY", "KIND", "LOOP (s)");
    println!("{:-<34}", "");
    for category in SoundCategory::ALL {
        let (kind, secs) = if category.is_noise() {
            ("noise", config.synth.noise_duration_secs)
        } else {
            ("ambience", config.synth.ambience_duration_secs)
        };
        println!("{:<14} {:<10} {:>8.1}", category.as_str(), kind, secs);
    }
    Ok(())
}

/// Synthesize a single category to a WAV file.
pub fn generate(
    config: &EngineConfig,
    category: &str,
    output: &Path,
    duration: Option<f64>,
    seed: Option<u64>,
    sample_rate: Option<u32>,
    bit_depth: u16,
) -> Result<()> {
    let category: SoundCategory = category.parse()?;
    let mut config = config.clone();
    if let Some(rate) = sample_rate {
        config.sample_rate = rate;
    }
    if seed.is_some() {
        config.synth.seed = seed;
    }
    config.validate()?;
    let sample_rate = config.sample_rate;

    let bank = SynthBank::new(sample_rate, &config.synth);
    let duration = duration.unwrap_or_else(|| bank.default_duration(category));
    info!("Generating {} ({:.1}s at {} Hz)", category, duration, sample_rate);

    let buffer = bank.generate_for(category, duration)?;
    export_wav(&buffer, output, ExportFormat::new(sample_rate, bit_depth))?;

    println!("Generated: {}", output.display());
    println!(
        "  {} samples, peak {:.3}, RMS {:.1} dB",
        buffer.num_samples(),
        buffer.peak(),
        buffer.rms_db()
    );
    Ok(())
}

/// Reconcile a scene into a fresh engine and render the mix offline.
pub async fn render(
    config: &EngineConfig,
    scene: &Path,
    output: &Path,
    seconds: f64,
    assets: Option<&Path>,
    analyse: bool,
    bit_depth: u16,
) -> Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(SoundscapeError::InvalidDuration {
            duration_secs: seconds,
        });
    }
    let desired = DesiredState::from_file(scene)?;
    info!(
        "Rendering {} layers from {} ({:.1}s)",
        desired.layers.len(),
        scene.display(),
        seconds
    );

    let context_config = config.clone();
    let engine = Arc::new(PlaybackEngine::new(config.lifecycle.clone(), move || {
        Ok(SoftwareContext::from_config(
            &context_config,
            AutoplayPolicy::Allowed,
        ))
    }));
    let mut mixer = MixerController::from_config(Arc::clone(&engine), config);
    if let Some(root) = assets {
        mixer = mixer.with_asset_source(Arc::new(FileAssetSource::new(root)));
    }
    let reconciler = LayerReconciler::new(Arc::new(mixer));

    let report = reconciler.reconcile(&desired).await;
    for (id, reason) in &report.failed {
        warn!("Layer {} was not built: {}", id, reason);
    }
    let tap = if analyse {
        Some(reconciler.mixer().enable_analyser()?)
    } else {
        None
    };

    let (context, _) = engine.ensure_running().await?;
    let buffer = context.render_offline(seconds);
    export_wav(&buffer, output, ExportFormat::new(buffer.sample_rate, bit_depth))?;

    println!("Rendered: {}", output.display());
    println!(
        "  layers: {} live, {} failed",
        reconciler.mixer().layer_count(),
        report.failed.len()
    );
    println!(
        "  peak {:.3}, RMS {:.1} dB",
        buffer.peak(),
        buffer.rms_db()
    );

    if let Some(tap) = tap {
        let spectrum = tap.float_frequency_data();
        let peak_bin = spectrum
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin)
            .unwrap_or(0);
        println!(
            "  spectral peak: {:.0} Hz ({:.1} dB) over the last {} samples",
            tap.bin_frequency(peak_bin),
            spectrum.get(peak_bin).copied().unwrap_or(f32::NEG_INFINITY),
            tap.fft_size()
        );
    }

    engine.close();
    Ok(())
}
