//! Windower - Sequence Windows
//!
//! - Training: mọi overlapping window độ dài L từ stream theo thứ tự thời gian.
//! - Inference: pad (lặp lại vector cuối) hoặc truncate (giữ L vector mới nhất).

use ndarray::{s, Array2, ArrayView2, Axis};

use crate::error::{EngineError, Result};

/// Build every overlapping window of length `sequence_length`.
///
/// Yields exactly `N - L + 1` windows. Requires `N >= L + 1` so that at
/// least one window plus one held-out point exists.
pub fn build_training_windows(
    vectors: ArrayView2<f32>,
    sequence_length: usize,
) -> Result<Vec<Array2<f32>>> {
    if sequence_length == 0 {
        return Err(EngineError::InvalidParameter(
            "sequence_length must be > 0".to_string(),
        ));
    }

    let n = vectors.nrows();
    if n < sequence_length + 1 {
        return Err(EngineError::InsufficientData(format!(
            "need at least {} vectors for sequence length {}, got {}",
            sequence_length + 1,
            sequence_length,
            n
        )));
    }

    Ok(vectors
        .windows((sequence_length, vectors.ncols()))
        .into_iter()
        .map(|w| w.to_owned())
        .collect())
}

/// Pad or truncate a live history to exactly `sequence_length` rows.
pub fn prepare_inference_window(
    history: ArrayView2<f32>,
    sequence_length: usize,
) -> Result<Array2<f32>> {
    if sequence_length == 0 {
        return Err(EngineError::InvalidParameter(
            "sequence_length must be > 0".to_string(),
        ));
    }

    let n = history.nrows();
    if n == 0 {
        return Err(EngineError::InsufficientData(
            "inference history is empty".to_string(),
        ));
    }

    if n >= sequence_length {
        // Tail truncation: earliest vectors are dropped
        return Ok(history.slice(s![n - sequence_length.., ..]).to_owned());
    }

    let mut window = Array2::zeros((sequence_length, history.ncols()));
    window.slice_mut(s![..n, ..]).assign(&history);
    let last = history.row(n - 1);
    for mut row in window.axis_iter_mut(Axis(0)).skip(n) {
        row.assign(&last);
    }

    Ok(window)
}

/// Stack JSON-style rows into an (N, F) matrix, rejecting ragged input.
pub fn stack_rows(rows: &[Vec<f32>]) -> Result<Array2<f32>> {
    let width = rows.first().map(|r| r.len()).unwrap_or(0);
    if let Some((i, bad)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(EngineError::shape(
            format!("{} features in every vector", width),
            format!("{} features in vector {}", bad.len(), i),
        ));
    }

    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| EngineError::InvalidInput(format!("failed to stack vectors: {}", e)))
}
