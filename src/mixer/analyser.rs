//! Spectrum analysis for the master tap
//!
//! Turns the time-domain window captured by an analyser node into magnitude
//! spectra: per-bin decibels, or bytes scaled between a decibel floor and
//! ceiling for visualizers.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::engine::buffer::linear_to_db;
use crate::mixer::graph::{AudioGraph, NodeId};

/// FFT plan and window for one analyser size
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    min_decibels: f32,
    max_decibels: f32,
}

impl std::fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size())
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish()
    }
}

impl SpectrumAnalyser {
    /// Plan an FFT of `fft_size` points with a Blackman window
    pub fn new(fft_size: usize, min_decibels: f32, max_decibels: f32) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft,
            window: blackman(fft_size),
            min_decibels,
            max_decibels,
        }
    }

    /// Points per transform
    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    /// Number of output bins (half the FFT size)
    pub fn frequency_bin_count(&self) -> usize {
        self.window.len() / 2
    }

    /// Magnitude of each bin in dB
    ///
    /// `samples` should hold `fft_size` oldest-first samples; shorter input
    /// is zero-padded at the front.
    pub fn float_frequency_data(&self, samples: &[f32]) -> Vec<f32> {
        let size = self.fft_size();
        let pad = size.saturating_sub(samples.len());
        let tail = &samples[samples.len().saturating_sub(size)..];

        let mut spectrum: Vec<Complex<f32>> = (0..size)
            .map(|i| {
                let sample = if i < pad { 0.0 } else { tail[i - pad] };
                Complex::new(sample * self.window[i], 0.0)
            })
            .collect();
        self.fft.process(&mut spectrum);

        spectrum
            .iter()
            .take(self.frequency_bin_count())
            .map(|c| linear_to_db(c.norm() / size as f32))
            .collect()
    }

    /// Bin magnitudes mapped linearly from `[min_decibels, max_decibels]` to 0..=255
    pub fn byte_frequency_data(&self, samples: &[f32]) -> Vec<u8> {
        let range = (self.max_decibels - self.min_decibels).max(f32::EPSILON);
        self.float_frequency_data(samples)
            .into_iter()
            .map(|db| {
                let scaled = 255.0 * (db - self.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Frequency in Hz at the centre of `bin`
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.fft_size() as f32
    }
}

/// Handle to the analysis tap spliced in front of the destination
///
/// Cheap to clone; every clone reads the same node. The tap stays valid for
/// the lifetime of the context that owns it.
#[derive(Debug, Clone)]
pub struct AnalyserTap {
    graph: Arc<AudioGraph>,
    node: NodeId,
    spectrum: Arc<SpectrumAnalyser>,
}

impl AnalyserTap {
    pub(crate) fn new(graph: Arc<AudioGraph>, node: NodeId, spectrum: Arc<SpectrumAnalyser>) -> Self {
        Self {
            graph,
            node,
            spectrum,
        }
    }

    /// Graph node backing this tap
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// False once the owning context has been closed
    pub fn is_valid(&self) -> bool {
        self.graph.contains(self.node)
    }

    pub fn fft_size(&self) -> usize {
        self.spectrum.fft_size()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.spectrum.frequency_bin_count()
    }

    /// Latest `fft_size` samples of the master signal, oldest first
    pub fn time_domain_data(&self) -> Vec<f32> {
        self.graph
            .analyser_window(self.node)
            .unwrap_or_else(|| vec![0.0; self.fft_size()])
    }

    /// Per-bin magnitude in dB
    pub fn float_frequency_data(&self) -> Vec<f32> {
        self.spectrum.float_frequency_data(&self.time_domain_data())
    }

    /// Per-bin magnitude scaled to 0..=255 for display
    pub fn byte_frequency_data(&self) -> Vec<u8> {
        self.spectrum.byte_frequency_data(&self.time_domain_data())
    }

    /// Centre frequency of a bin at the graph's sample rate
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        self.spectrum.bin_frequency(bin, self.graph.sample_rate())
    }
}

fn blackman(size: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_peak_lands_in_expected_bin() {
        let analyser = SpectrumAnalyser::new(1024, -100.0, -30.0);
        // 1500 Hz at 48 kHz is exactly bin 32 of a 1024-point FFT
        let spectrum = analyser.float_frequency_data(&sine(1500.0, 48000, 1024));
        assert_eq!(spectrum.len(), 512);

        let peak = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
        assert!((analyser.bin_frequency(peak, 48000) - 1500.0).abs() < 1.0);
    }

    #[test]
    fn test_silence_maps_to_zero_bytes() {
        let analyser = SpectrumAnalyser::new(256, -100.0, -30.0);
        let bytes = analyser.byte_frequency_data(&[0.0; 256]);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_loud_tone_saturates_bytes() {
        let analyser = SpectrumAnalyser::new(256, -100.0, -30.0);
        let bytes = analyser.byte_frequency_data(&sine(3000.0, 48000, 256));
        assert_eq!(bytes.iter().copied().max(), Some(255));
    }

    #[test]
    fn test_tap_reads_graph_window() {
        use crate::mixer::graph::Output;

        let graph = Arc::new(AudioGraph::new(48000, 8));
        let node = graph.create_analyser(1024, Output::Destination).unwrap();
        let tone = crate::engine::AudioBuffer::from_mono(sine(1500.0, 48000, 2048), 48000);
        graph.play_one_shot(Arc::new(tone), Output::Node(node)).unwrap();
        graph.render_frames(1024);

        let tap = AnalyserTap::new(
            Arc::clone(&graph),
            node,
            Arc::new(SpectrumAnalyser::new(1024, -100.0, -30.0)),
        );
        assert!(tap.is_valid());
        let bytes = tap.byte_frequency_data();
        assert_eq!(bytes.len(), tap.frequency_bin_count());
        assert_eq!(bytes[32], 255);
        assert!((tap.bin_frequency(32) - 1500.0).abs() < 1.0);
    }

    #[test]
    fn test_short_input_is_padded() {
        let analyser = SpectrumAnalyser::new(64, -100.0, -30.0);
        assert_eq!(analyser.float_frequency_data(&[0.5; 10]).len(), 32);
    }
}
