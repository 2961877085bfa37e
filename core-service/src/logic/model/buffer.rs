//! Sequence Buffer - Rolling history of live Summary Vectors
//!
//! Giữ tối đa 2·L vector gần nhất; window cho scorer lấy L vector cuối.
//! Buffer thuộc về caller (không còn global state).

use std::collections::VecDeque;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::inference::{score, AnomalyVerdict};
use super::package::ModelPackage;
use crate::error::{EngineError, Result};

/// Rolling buffer sized from the model's sequence length
#[derive(Debug, Clone)]
pub struct SequenceBuffer {
    sequence_length: usize,
    feature_count: usize,
    vectors: VecDeque<Vec<f32>>,
}

/// Buffer status information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStatus {
    pub current_size: usize,
    pub required_size: usize,
    pub is_ready: bool,
    pub fill_percent: f32,
}

impl SequenceBuffer {
    pub fn new(sequence_length: usize, feature_count: usize) -> Self {
        Self {
            sequence_length,
            feature_count,
            vectors: VecDeque::with_capacity(sequence_length * 2 + 1),
        }
    }

    /// Buffer matching a package's config
    pub fn for_package(package: &ModelPackage) -> Self {
        let config = package.config();
        Self::new(config.sequence_length, config.input_dim)
    }

    pub fn capacity(&self) -> usize {
        self.sequence_length * 2
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn has_enough_data(&self) -> bool {
        self.vectors.len() >= self.sequence_length
    }

    pub fn clear(&mut self) {
        self.vectors.clear();
    }

    /// Append one vector, evicting the oldest beyond capacity
    pub fn push(&mut self, features: Vec<f32>) -> Result<()> {
        if features.len() != self.feature_count {
            return Err(EngineError::shape(
                format!("{} features", self.feature_count),
                format!("{} features", features.len()),
            ));
        }

        self.vectors.push_back(features);
        while self.vectors.len() > self.capacity() {
            self.vectors.pop_front();
        }
        Ok(())
    }

    /// Latest L vectors as (L, F), or None until the buffer is ready
    pub fn window(&self) -> Option<Array2<f32>> {
        if !self.has_enough_data() {
            return None;
        }
        let start = self.vectors.len() - self.sequence_length;
        let flat: Vec<f32> = self.vectors.iter().skip(start).flatten().copied().collect();
        Array2::from_shape_vec((self.sequence_length, self.feature_count), flat).ok()
    }

    pub fn status(&self) -> BufferStatus {
        let size = self.vectors.len();
        BufferStatus {
            current_size: size,
            required_size: self.sequence_length,
            is_ready: self.has_enough_data(),
            fill_percent: if self.sequence_length > 0 {
                (size as f32 / self.sequence_length as f32 * 100.0).min(100.0)
            } else {
                0.0
            },
        }
    }

    /// Push features and score once the buffer holds a full window
    pub fn push_and_score(&mut self, package: &ModelPackage, features: Vec<f32>) -> Result<Option<AnomalyVerdict>> {
        self.push(features)?;
        match self.window() {
            Some(window) => score(package, window.view()).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_operations() {
        let mut buffer = SequenceBuffer::new(5, 3);
        assert!(buffer.is_empty());
        assert!(!buffer.has_enough_data());
        assert!(buffer.window().is_none());

        for i in 0..12 {
            buffer.push(vec![i as f32; 3]).unwrap();
        }

        assert_eq!(buffer.len(), 10);
        let window = buffer.window().unwrap();
        assert_eq!(window.dim(), (5, 3));
        assert_eq!(window[[0, 0]], 7.0);
        assert_eq!(window[[4, 2]], 11.0);
    }

    #[test]
    fn test_buffer_status() {
        let mut buffer = SequenceBuffer::new(4, 2);
        buffer.push(vec![0.0; 2]).unwrap();
        buffer.push(vec![0.0; 2]).unwrap();
        let status = buffer.status();
        assert_eq!(status.current_size, 2);
        assert!(!status.is_ready);
        assert_eq!(status.fill_percent, 50.0);
    }

    #[test]
    fn test_buffer_rejects_wrong_width() {
        let mut buffer = SequenceBuffer::new(5, 15);
        assert!(buffer.push(vec![1.0; 14]).is_err());
        assert!(buffer.is_empty());
    }
}
