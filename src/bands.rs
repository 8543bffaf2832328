//! Logarithmic frequency banding of magnitude spectra

use crate::error::EngineError;

/// Fixed schedule collapsing FFT bins into logarithmically spaced bands.
///
/// Cutoff frequencies follow a geometric series between `min_frequency` and
/// `max_frequency`; each cutoff maps to the nearest FFT bin. Bands never
/// overlap and together cover the retained range; bins outside it are
/// discarded.
#[derive(Debug, Clone)]
pub struct BandSchedule {
    ranges: Vec<(usize, usize)>,
}

impl BandSchedule {
    pub fn new(
        frame_size: usize,
        sample_rate: u32,
        min_frequency: f32,
        max_frequency: f32,
        bands: usize,
    ) -> Result<Self, EngineError> {
        let spectrum_len = frame_size / 2;
        let bin_for = |freq: f32| -> usize {
            let bin = (freq * frame_size as f32 / sample_rate as f32).round() as usize;
            bin.min(spectrum_len)
        };

        let ratio = max_frequency / min_frequency;
        let mut edges = Vec::with_capacity(bands + 1);
        for i in 0..=bands {
            let freq = min_frequency * ratio.powf(i as f32 / bands as f32);
            edges.push(bin_for(freq));
        }
        // Neighboring cutoffs can collapse onto the same bin at the low end
        // of the series; widen so every band keeps at least one bin.
        for i in 1..edges.len() {
            if edges[i] <= edges[i - 1] {
                edges[i] = edges[i - 1] + 1;
            }
        }
        if *edges.last().unwrap() > spectrum_len {
            return Err(EngineError::InvalidConfig(format!(
                "{} bands cannot fit between {} Hz and {} Hz at frame size {}",
                bands, min_frequency, max_frequency, frame_size
            )));
        }

        let ranges = edges.windows(2).map(|w| (w[0], w[1])).collect();
        Ok(Self { ranges })
    }

    /// Number of bands in the schedule.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Half-open bin range `[lo, hi)` of one band.
    pub fn range(&self, band: usize) -> (usize, usize) {
        self.ranges[band]
    }

    /// Collapse one spectrum into band values: sum of magnitudes across the
    /// band divided by band width.
    pub fn reduce(&self, spectrum: &[f32]) -> Vec<f32> {
        self.ranges
            .iter()
            .map(|&(lo, hi)| {
                let sum: f32 = spectrum[lo..hi].iter().sum();
                sum / (hi - lo) as f32
            })
            .collect()
    }
}
