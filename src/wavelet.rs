//! 2-D Haar decomposition and top-wavelet encoding

use ndarray::Array2;
use std::cmp::Ordering;

use crate::image::FingerprintImage;

/// Standard 2-D Haar decomposition, in place: every row is fully
/// transformed, then every column. Each step keeps averages in the low half
/// and differences in the high half, with no level-dependent gain.
pub fn haar_2d(data: &mut Array2<f32>) {
    let (rows, cols) = data.dim();

    let mut buf = vec![0.0f32; rows.max(cols)];
    for r in 0..rows {
        for c in 0..cols {
            buf[c] = data[[r, c]];
        }
        haar_1d(&mut buf[..cols]);
        for c in 0..cols {
            data[[r, c]] = buf[c];
        }
    }
    for c in 0..cols {
        for r in 0..rows {
            buf[r] = data[[r, c]];
        }
        haar_1d(&mut buf[..rows]);
        for r in 0..rows {
            data[[r, c]] = buf[r];
        }
    }
}

/// Full 1-D Haar transform: repeatedly split the low band until one
/// coefficient remains. Length must be a power of two.
fn haar_1d(values: &mut [f32]) {
    let mut len = values.len();
    let mut tmp = vec![0.0f32; len];
    while len > 1 {
        let half = len / 2;
        for i in 0..half {
            tmp[i] = (values[2 * i] + values[2 * i + 1]) / 2.0;
            tmp[half + i] = (values[2 * i] - values[2 * i + 1]) / 2.0;
        }
        values[..len].copy_from_slice(&tmp[..len]);
        len = half;
    }
}

/// Decompose an image and keep the `top` largest-magnitude coefficients as
/// their signs, zeroing the rest.
///
/// Coefficients tied in magnitude at the cut boundary are kept in
/// row-major-index order, which makes the output deterministic for any
/// input, including the uniformly zero image. Retained coefficients map to
/// `+1` when non-negative and `-1` otherwise.
pub fn encode_top_wavelets(image: FingerprintImage, top: usize) -> Vec<i8> {
    let mut data = image.data;
    haar_2d(&mut data);

    let flat: Vec<f32> = data.iter().copied().collect();
    let mut order: Vec<usize> = (0..flat.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        flat[b]
            .abs()
            .partial_cmp(&flat[a].abs())
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut cells = vec![0i8; flat.len()];
    for &index in order.iter().take(top) {
        cells[index] = if flat[index] >= 0.0 { 1 } else { -1 };
    }
    cells
}
