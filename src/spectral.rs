//! Spectral framing: overlapping Hann-windowed frames to magnitude spectra

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;

/// Forward real-input FFT contract.
///
/// Implementations return `frame.len() / 2 + 1` complex bins; magnitudes are
/// computed by the core. Implementations must be deterministic for identical
/// input so that fingerprints are reproducible across runs.
pub trait FftProvider: Send + Sync {
    fn forward_real(&self, frame: &[f32]) -> Result<Vec<Complex<f32>>, EngineError>;
}

/// Shipped provider backed by `rustfft`, with plans cached per frame size.
pub struct RustFftProvider {
    plans: Mutex<HashMap<usize, Arc<dyn Fft<f32>>>>,
}

impl RustFftProvider {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
        }
    }

    fn plan(&self, len: usize) -> Arc<dyn Fft<f32>> {
        let mut plans = self.plans.lock().expect("fft plan cache poisoned");
        plans
            .entry(len)
            .or_insert_with(|| FftPlanner::new().plan_fft_forward(len))
            .clone()
    }
}

impl Default for RustFftProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FftProvider for RustFftProvider {
    fn forward_real(&self, frame: &[f32]) -> Result<Vec<Complex<f32>>, EngineError> {
        let fft = self.plan(frame.len());
        let mut buffer: Vec<Complex<f32>> =
            frame.iter().map(|&x| Complex::new(x, 0.0)).collect();
        fft.process(&mut buffer);
        buffer.truncate(frame.len() / 2 + 1);
        Ok(buffer)
    }
}

/// Slices PCM into overlapping frames and emits magnitude spectra.
pub struct SpectralFramer {
    frame_size: usize,
    overlap: usize,
    window: Vec<f32>,
    fft: Arc<dyn FftProvider>,
}

impl SpectralFramer {
    pub fn new(frame_size: usize, overlap: usize, fft: Arc<dyn FftProvider>) -> Self {
        Self {
            frame_size,
            overlap,
            window: hann_window(frame_size),
            fft,
        }
    }

    /// Magnitude spectra of every complete frame, one per `overlap` samples.
    ///
    /// Each spectrum holds the first `frame_size / 2` magnitudes. Frames
    /// straddling the end of the signal are dropped, never zero-padded, so
    /// input shorter than one frame yields an empty sequence.
    pub fn spectra(&self, samples: &[f32]) -> Result<Vec<Vec<f32>>, EngineError> {
        let mut spectra = Vec::new();
        if samples.len() < self.frame_size {
            return Ok(spectra);
        }

        let mut windowed = vec![0.0f32; self.frame_size];
        for start in (0..=samples.len() - self.frame_size).step_by(self.overlap) {
            let frame = &samples[start..start + self.frame_size];
            for (dst, (&s, &w)) in windowed.iter_mut().zip(frame.iter().zip(self.window.iter())) {
                *dst = s * w;
            }

            let spectrum = self.fft.forward_real(&windowed)?;
            spectra.push(
                spectrum[..self.frame_size / 2]
                    .iter()
                    .map(|c| c.norm())
                    .collect(),
            );
        }
        Ok(spectra)
    }

    /// Frames a signal of `samples` length would produce.
    pub fn frame_count(&self, samples: usize) -> usize {
        if samples < self.frame_size {
            0
        } else {
            (samples - self.frame_size) / self.overlap + 1
        }
    }
}

/// Hann window of length `n`.
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_short_input_yields_no_frames() {
        let framer = SpectralFramer::new(2048, 64, Arc::new(RustFftProvider::new()));
        let spectra = framer.spectra(&vec![0.0; 2047]).unwrap();
        assert!(spectra.is_empty());
        assert_eq!(framer.frame_count(2047), 0);
    }

    #[test]
    fn test_frame_count_and_spectrum_shape() {
        let framer = SpectralFramer::new(2048, 64, Arc::new(RustFftProvider::new()));
        let samples = sine(440.0, 5512, 2048 + 64 * 3);
        let spectra = framer.spectra(&samples).unwrap();
        assert_eq!(spectra.len(), 4);
        assert_eq!(framer.frame_count(samples.len()), 4);
        assert!(spectra.iter().all(|s| s.len() == 1024));
    }

    #[test]
    fn test_sine_peak_lands_in_expected_bin() {
        let sample_rate = 5512;
        let framer = SpectralFramer::new(2048, 64, Arc::new(RustFftProvider::new()));
        let samples = sine(440.0, sample_rate, 4096);
        let spectra = framer.spectra(&samples).unwrap();

        let spectrum = &spectra[0];
        let peak_bin = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        let expected = (440.0 * 2048.0 / sample_rate as f32).round() as usize;
        assert!(peak_bin.abs_diff(expected) <= 1);
    }

    #[test]
    fn test_spectra_are_deterministic() {
        let framer = SpectralFramer::new(2048, 64, Arc::new(RustFftProvider::new()));
        let samples = sine(523.3, 5512, 8192);
        let a = framer.spectra(&samples).unwrap();
        let b = framer.spectra(&samples).unwrap();
        assert_eq!(a, b);
    }
}
