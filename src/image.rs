//! Grouping reduced frames into fingerprint images

use ndarray::Array2;

/// A `rows x cols` matrix of reduced frames stacked in time: one row per
/// frame, one column per frequency band.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintImage {
    pub data: Array2<f32>,
}

impl FingerprintImage {
    /// Stack exactly `rows` consecutive reduced frames into one image.
    ///
    /// Returns `None` when fewer than `rows` frames are available from
    /// `start`; partial groups are never emitted.
    pub fn group(frames: &[Vec<f32>], start: usize, rows: usize) -> Option<Self> {
        if start + rows > frames.len() {
            return None;
        }
        let cols = frames[start].len();
        let mut data = Array2::zeros((rows, cols));
        for (r, frame) in frames[start..start + rows].iter().enumerate() {
            for (c, &value) in frame.iter().enumerate() {
                data[[r, c]] = value;
            }
        }
        Some(Self { data })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(count: usize, cols: usize) -> Vec<Vec<f32>> {
        (0..count).map(|i| vec![i as f32; cols]).collect()
    }

    #[test]
    fn test_group_stacks_frames_in_time_order() {
        let frames = frames(8, 4);
        let image = FingerprintImage::group(&frames, 2, 4).unwrap();
        assert_eq!(image.rows(), 4);
        assert_eq!(image.cols(), 4);
        for r in 0..4 {
            assert_eq!(image.data[[r, 0]], (r + 2) as f32);
        }
    }

    #[test]
    fn test_partial_groups_are_dropped() {
        let frames = frames(8, 4);
        assert!(FingerprintImage::group(&frames, 5, 4).is_none());
        assert!(FingerprintImage::group(&frames, 4, 4).is_some());
    }
}
