//! Audio input providers
//!
//! The engine consumes mono PCM at its canonical sample rate; decoding and
//! resampling stay behind the [`AudioProvider`] contract so any decoder can
//! be plugged in. The shipped providers cover WAV files (`hound`) and
//! in-memory sample buffers, both resampled with `rubato`.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::error::EngineError;

/// Contract for audio input.
///
/// Implementations return samples at exactly the requested rate, beginning
/// `start_seconds` into the source and covering at most `length_seconds`
/// (the remainder of the source when `None`).
pub trait AudioProvider: Send + Sync {
    fn read_mono_samples(
        &self,
        source: &str,
        sample_rate: u32,
        start_seconds: f64,
        length_seconds: Option<f64>,
    ) -> Result<Vec<f32>, EngineError>;
}

/// WAV file provider: decode, mix down to mono, resample, slice.
pub struct WavFileProvider;

impl AudioProvider for WavFileProvider {
    fn read_mono_samples(
        &self,
        source: &str,
        sample_rate: u32,
        start_seconds: f64,
        length_seconds: Option<f64>,
    ) -> Result<Vec<f32>, EngineError> {
        let mut reader = hound::WavReader::open(source)?;
        let spec = reader.spec();
        let channels = spec.channels as usize;
        if channels == 0 {
            return Err(EngineError::Provider(format!("{source}: zero channels")));
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let mono: Vec<f32> = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        let resampled = resample(&mono, spec.sample_rate, sample_rate)?;
        Ok(slice_window(resampled, sample_rate, start_seconds, length_seconds))
    }
}

/// Provider over an in-memory mono buffer; the source string is ignored.
pub struct MemoryAudioProvider {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl MemoryAudioProvider {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }
}

impl AudioProvider for MemoryAudioProvider {
    fn read_mono_samples(
        &self,
        _source: &str,
        sample_rate: u32,
        start_seconds: f64,
        length_seconds: Option<f64>,
    ) -> Result<Vec<f32>, EngineError> {
        let resampled = resample(&self.samples, self.sample_rate, sample_rate)?;
        Ok(slice_window(resampled, sample_rate, start_seconds, length_seconds))
    }
}

/// Resample a mono signal with a windowed-sinc filter.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, EngineError> {
    if from_rate == to_rate {
        return Ok(input.to_vec());
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    const CHUNK: usize = 1024;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK, 1)?;

    let mut output = Vec::with_capacity((input.len() as f64 * ratio) as usize + CHUNK);
    let mut pos = 0;
    while pos < input.len() {
        let end = (pos + CHUNK).min(input.len());
        let mut chunk = input[pos..end].to_vec();
        // The final chunk is padded with silence; the surplus output is
        // trimmed below.
        chunk.resize(CHUNK, 0.0);
        let frames = resampler.process(&[chunk], None)?;
        output.extend_from_slice(&frames[0]);
        pos = end;
    }

    let expected = (input.len() as f64 * ratio).round() as usize;
    output.truncate(expected);
    Ok(output)
}

fn slice_window(
    samples: Vec<f32>,
    sample_rate: u32,
    start_seconds: f64,
    length_seconds: Option<f64>,
) -> Vec<f32> {
    let start = (start_seconds * sample_rate as f64).round() as usize;
    if start >= samples.len() {
        return Vec::new();
    }
    let end = match length_seconds {
        Some(length) => {
            (start + (length * sample_rate as f64).round() as usize).min(samples.len())
        }
        None => samples.len(),
    };
    samples[start..end].to_vec()
}
