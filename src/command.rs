//! Fingerprint command: fluent construction and pipeline execution
//!
//! A command ties a source, a configuration, and a stride into an immutable
//! value. Validation happens at build time; execution runs the DSP pipeline
//! (framing, banding, grouping, wavelet encoding, hashing) either fully
//! materialized with a worker pool or as a lazy stream. Every fingerprint
//! is a pure function of its sample window, the configuration, and the
//! permutation table, so images are processed shared-nothing and emitted in
//! monotonic start-offset order.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::audio::{AudioProvider, MemoryAudioProvider, WavFileProvider};
use crate::bands::BandSchedule;
use crate::config::FingerprintConfig;
use crate::error::EngineError;
use crate::fingerprint::{encode_ternary, Fingerprint};
use crate::image::FingerprintImage;
use crate::minhash::PermutationTable;
use crate::spectral::{FftProvider, RustFftProvider, SpectralFramer};
use crate::stride::{Stride, StrideStepper};
use crate::wavelet::encode_top_wavelets;

/// Cooperative cancellation signal, checked between image groupings.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Fluent builder for a [`Fingerprinter`] command.
pub struct FingerprinterBuilder {
    provider: Option<Arc<dyn AudioProvider>>,
    source: String,
    config: FingerprintConfig,
    stride: Option<Stride>,
    start_seconds: f64,
    seconds_to_process: Option<f64>,
    token: CancellationToken,
    fft: Option<Arc<dyn FftProvider>>,
}

impl FingerprinterBuilder {
    fn new() -> Self {
        Self {
            provider: None,
            source: String::new(),
            config: FingerprintConfig::default(),
            stride: None,
            start_seconds: 0.0,
            seconds_to_process: None,
            token: CancellationToken::new(),
            fft: None,
        }
    }

    /// Fingerprint a WAV file.
    pub fn from_file(mut self, path: impl Into<String>) -> Self {
        self.source = path.into();
        self.provider = Some(Arc::new(WavFileProvider));
        self
    }

    /// Fingerprint an in-memory mono buffer.
    pub fn from_samples(mut self, samples: Vec<f32>, sample_rate: u32) -> Self {
        self.provider = Some(Arc::new(MemoryAudioProvider::new(samples, sample_rate)));
        self
    }

    /// Fingerprint any [`AudioProvider`] source.
    pub fn from_provider(mut self, provider: Arc<dyn AudioProvider>, source: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.source = source.into();
        self
    }

    pub fn config(mut self, config: FingerprintConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the configuration's stride for this command.
    pub fn stride(mut self, stride: Stride) -> Self {
        self.stride = Some(stride);
        self
    }

    /// Skip into the source before fingerprinting.
    pub fn start_at(mut self, seconds: f64) -> Self {
        self.start_seconds = seconds;
        self
    }

    /// Bound the amount of audio processed.
    pub fn take_seconds(mut self, seconds: f64) -> Self {
        self.seconds_to_process = Some(seconds);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Replace the FFT implementation.
    pub fn fft_provider(mut self, fft: Arc<dyn FftProvider>) -> Self {
        self.fft = Some(fft);
        self
    }

    /// Validate and freeze the command.
    pub fn build(self) -> Result<Fingerprinter, EngineError> {
        self.config.validate()?;
        let provider = self
            .provider
            .ok_or_else(|| EngineError::InvalidConfig("no audio source given".into()))?;

        let bands = BandSchedule::new(
            self.config.frame_size,
            self.config.sample_rate,
            self.config.min_frequency,
            self.config.max_frequency,
            self.config.cols,
        )?;
        let fft = self.fft.unwrap_or_else(|| Arc::new(RustFftProvider::new()));
        let framer = SpectralFramer::new(self.config.frame_size, self.config.overlap, fft);
        let permutations = PermutationTable::shared(&self.config);
        let stride = self.stride.unwrap_or_else(|| self.config.stride.clone());
        stride.validate()?;

        Ok(Fingerprinter {
            provider,
            source: self.source,
            config: self.config,
            stride,
            start_seconds: self.start_seconds,
            seconds_to_process: self.seconds_to_process,
            token: self.token,
            framer,
            bands,
            permutations,
        })
    }
}

/// An immutable, executable fingerprint command.
///
/// Emitted offsets are relative to the processed window, i.e. `0.0` is
/// `start_seconds` into the source.
pub struct Fingerprinter {
    provider: Arc<dyn AudioProvider>,
    source: String,
    config: FingerprintConfig,
    stride: Stride,
    start_seconds: f64,
    seconds_to_process: Option<f64>,
    token: CancellationToken,
    framer: SpectralFramer,
    bands: BandSchedule,
    permutations: Arc<PermutationTable>,
}

impl Fingerprinter {
    pub fn builder() -> FingerprinterBuilder {
        FingerprinterBuilder::new()
    }

    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run the pipeline and materialize every fingerprint, in start-offset
    /// order. Images are encoded in parallel; ordering is restored before
    /// emission. A cancelled command discards all partial work.
    pub fn execute(&self) -> Result<Vec<Fingerprint>, EngineError> {
        let reduced = self.reduced_frames()?;
        let starts = self.image_starts(reduced.len())?;

        let fingerprints: Vec<Fingerprint> = starts
            .par_iter()
            .map(|&start| {
                if self.token.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                Ok(self.encode_image(&reduced, start))
            })
            .collect::<Result<_, _>>()?;

        debug!(
            source = %self.source,
            frames = reduced.len(),
            fingerprints = fingerprints.len(),
            "fingerprint command completed"
        );
        Ok(fingerprints)
    }

    /// Run the pipeline as a lazy sequence. Framing and banding happen up
    /// front; wavelet encoding and hashing are deferred until each item is
    /// pulled. The stream ends early when the command is cancelled.
    pub fn stream(&self) -> Result<FingerprintStream<'_>, EngineError> {
        let reduced = self.reduced_frames()?;
        let exhausted = reduced.len() < self.config.rows;
        Ok(FingerprintStream {
            command: self,
            stepper: self.stride.stepper(self.config.overlap),
            reduced,
            next_start: 0,
            exhausted,
        })
    }

    /// Decode, frame, and band-reduce the source.
    fn reduced_frames(&self) -> Result<Vec<Vec<f32>>, EngineError> {
        if self.token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let samples = self.provider.read_mono_samples(
            &self.source,
            self.config.sample_rate,
            self.start_seconds,
            self.seconds_to_process,
        )?;
        if self.token.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let spectra = self.framer.spectra(&samples)?;
        Ok(spectra.iter().map(|s| self.bands.reduce(s)).collect())
    }

    /// Image start frames chosen by the stride, with the cancellation
    /// signal checked between groupings.
    fn image_starts(&self, frames: usize) -> Result<Vec<usize>, EngineError> {
        let mut starts = Vec::new();
        let mut stepper = self.stride.stepper(self.config.overlap);
        let mut start = 0usize;
        while start + self.config.rows <= frames {
            if self.token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            starts.push(start);
            start += stepper.next_step();
        }
        Ok(starts)
    }

    fn encode_image(&self, reduced: &[Vec<f32>], start: usize) -> Fingerprint {
        let image = FingerprintImage::group(reduced, start, self.config.rows)
            .expect("image start was bounds-checked against the frame count");
        let cells = encode_top_wavelets(image, self.config.top_wavelets);
        let bits = encode_ternary(&cells);
        let hash_keys = self.permutations.hash_keys(&bits);
        Fingerprint {
            bits,
            hash_keys,
            start_offset_seconds: (start * self.config.overlap) as f64
                / self.config.sample_rate as f64,
        }
    }
}

/// Lazy fingerprint sequence produced by [`Fingerprinter::stream`].
pub struct FingerprintStream<'a> {
    command: &'a Fingerprinter,
    reduced: Vec<Vec<f32>>,
    stepper: StrideStepper,
    next_start: usize,
    exhausted: bool,
}

impl Iterator for FingerprintStream<'_> {
    type Item = Fingerprint;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || self.command.token.is_cancelled() {
            return None;
        }
        let rows = self.command.config.rows;
        if self.next_start + rows > self.reduced.len() {
            self.exhausted = true;
            return None;
        }
        let fingerprint = self.command.encode_image(&self.reduced, self.next_start);
        self.next_start += self.stepper.next_step();
        Some(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::nonzero_cells;

    fn tone(seconds: f64, sample_rate: u32) -> Vec<f32> {
        let len = (seconds * sample_rate as f64) as usize;
        (0..len)
            .map(|i| {
                (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    fn command_for(samples: Vec<f32>) -> Fingerprinter {
        Fingerprinter::builder()
            .from_samples(samples, 5512)
            .build()
            .unwrap()
    }

    #[test]
    fn test_short_input_yields_zero_fingerprints() {
        let fingerprints = command_for(tone(0.5, 5512)).execute().unwrap();
        assert!(fingerprints.is_empty());
    }

    #[test]
    fn test_exact_image_length_yields_one_fingerprint() {
        let config = FingerprintConfig::default();
        let samples = tone(2.0, 5512)
            .into_iter()
            .take(config.rows * config.overlap + config.frame_size)
            .collect::<Vec<_>>();
        let fingerprints = command_for(samples).execute().unwrap();
        assert_eq!(fingerprints.len(), 1);
        assert_eq!(fingerprints[0].start_offset_seconds, 0.0);
    }

    #[test]
    fn test_every_fingerprint_has_top_wavelets_nonzero_cells() {
        let fingerprints = command_for(tone(5.0, 5512)).execute().unwrap();
        assert!(!fingerprints.is_empty());
        for fp in &fingerprints {
            assert_eq!(nonzero_cells(&fp.bits), 200);
            assert_eq!(fp.bits.len(), 1024);
            assert_eq!(fp.hash_keys.len(), 25);
        }
    }

    #[test]
    fn test_offsets_are_monotonic() {
        let fingerprints = command_for(tone(10.0, 5512)).execute().unwrap();
        for pair in fingerprints.windows(2) {
            assert!(pair[0].start_offset_seconds < pair[1].start_offset_seconds);
        }
    }

    #[test]
    fn test_execution_is_deterministic() {
        let samples = tone(5.0, 5512);
        let a = command_for(samples.clone()).execute().unwrap();
        let b = command_for(samples).execute().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stream_matches_execute() {
        let samples = tone(5.0, 5512);
        let command = command_for(samples);
        let streamed: Vec<_> = command.stream().unwrap().collect();
        let executed = command.execute().unwrap();
        assert_eq!(streamed, executed);
    }

    #[test]
    fn test_silence_still_produces_fingerprints() {
        let fingerprints = command_for(vec![0.0; 5512 * 3]).execute().unwrap();
        assert!(!fingerprints.is_empty());
        for fp in &fingerprints {
            assert_eq!(nonzero_cells(&fp.bits), 200);
        }
    }

    #[test]
    fn test_cancelled_command_discards_all_work() {
        let token = CancellationToken::new();
        token.cancel();
        let result = Fingerprinter::builder()
            .from_samples(tone(10.0, 5512), 5512)
            .cancellation(token)
            .build()
            .unwrap()
            .execute();
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Fingerprinter::builder()
            .from_samples(tone(1.0, 5512), 5512)
            .config(FingerprintConfig {
                top_wavelets: 0,
                ..FingerprintConfig::default()
            })
            .build();
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_requires_a_source() {
        let result = Fingerprinter::builder().build();
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_query_window_offsets_are_window_relative() {
        let command = Fingerprinter::builder()
            .from_samples(tone(10.0, 5512), 5512)
            .start_at(2.0)
            .take_seconds(4.0)
            .build()
            .unwrap();
        let fingerprints = command.execute().unwrap();
        assert!(!fingerprints.is_empty());
        assert_eq!(fingerprints[0].start_offset_seconds, 0.0);
        let last = fingerprints.last().unwrap().start_offset_seconds;
        assert!(last < 4.0);
    }
}
