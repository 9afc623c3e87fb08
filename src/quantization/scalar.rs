//! Per-dimension scalar quantization with a configurable bit width.
//!
//! Supports the full `bits ∈ [1, 32]` range spec §4.2 requires, packing
//! sub-byte codes the way the product quantizer packs its sub-space indices.

use crate::config::QuantizerConfig;
use crate::error::{Error, ErrorKind, Result};

use super::{pack_codes, unpack_codes, Quantizer};

/// Per-dimension linear quantizer: `min`, `scale`, and `max_level =
/// 2^bits - 1` per dimension (spec §3 QuantizationParams entity).
#[derive(Debug, Clone)]
pub struct ScalarQuantizer {
    config: QuantizerConfig,
    dimension: usize,
    min_vals: Vec<f32>,
    scales: Vec<f32>,
    max_level: u32,
    trained: bool,
}

impl ScalarQuantizer {
    /// Creates an untrained quantizer for the given dimension.
    #[must_use]
    pub fn new(config: QuantizerConfig, dimension: usize) -> Self {
        let max_level = (1u64 << config.bits.min(31)) as u32 - 1;
        Self {
            config,
            dimension,
            min_vals: Vec::new(),
            scales: Vec::new(),
            max_level,
            trained: false,
        }
    }

    fn require_trained(&self) -> Result<()> {
        if self.trained {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::NotTrained, "quantizer", "scalar"))
        }
    }

    fn require_dimension(&self, got: usize) -> Result<()> {
        if got == self.dimension {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::DimensionMismatch {
                    expected: self.dimension,
                    actual: got,
                },
                "quantizer",
                "scalar",
            ))
        }
    }
}

impl Quantizer for ScalarQuantizer {
    fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.is_empty() {
            return Err(Error::new(
                ErrorKind::TrainingFailed("no training vectors supplied".into()),
                "quantizer",
                "train",
            ));
        }
        for v in vectors {
            self.require_dimension(v.len())?;
        }

        let mut min_vals = vec![f32::MAX; self.dimension];
        let mut max_vals = vec![f32::MIN; self.dimension];
        for v in vectors {
            for (i, &x) in v.iter().enumerate() {
                min_vals[i] = min_vals[i].min(x);
                max_vals[i] = max_vals[i].max(x);
            }
        }

        let scales: Vec<f32> = min_vals
            .iter()
            .zip(max_vals.iter())
            .map(|(&min, &max)| {
                let range = max - min;
                if range.abs() < 1e-10 {
                    1.0
                } else {
                    range / self.max_level as f32
                }
            })
            .collect();

        self.min_vals = min_vals;
        self.scales = scales;
        self.trained = true;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn compress(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.require_trained()?;
        self.require_dimension(vector.len())?;

        let codes: Vec<u32> = vector
            .iter()
            .zip(self.min_vals.iter())
            .zip(self.scales.iter())
            .map(|((&v, &min), &scale)| {
                let max = min + scale * self.max_level as f32;
                let clamped = v.clamp(min, max);
                let level = ((clamped - min) / scale + 0.5).floor();
                level.clamp(0.0, self.max_level as f32) as u32
            })
            .collect();

        Ok(pack_codes(&codes, self.config.bits))
    }

    fn decompress(&self, code: &[u8]) -> Result<Vec<f32>> {
        self.require_trained()?;
        let codes = unpack_codes(code, self.config.bits, self.dimension);
        Ok(codes
            .iter()
            .zip(self.min_vals.iter())
            .zip(self.scales.iter())
            .map(|((&level, &min), &scale)| min + scale * level as f32)
            .collect())
    }

    fn distance(&self, code_a: &[u8], code_b: &[u8]) -> Result<f32> {
        self.require_trained()?;
        let a = unpack_codes(code_a, self.config.bits, self.dimension);
        let b = unpack_codes(code_b, self.config.bits, self.dimension);
        let sum: f32 = a
            .iter()
            .zip(b.iter())
            .zip(self.scales.iter())
            .map(|((&ca, &cb), &scale)| {
                let d = scale * (ca as f32 - cb as f32);
                d * d
            })
            .sum();
        Ok(sum.sqrt())
    }

    fn distance_to_query(&self, code: &[u8], query: &[f32]) -> Result<f32> {
        self.require_trained()?;
        self.require_dimension(query.len())?;
        let reconstructed = self.decompress(code)?;
        let sum: f32 = reconstructed
            .iter()
            .zip(query.iter())
            .map(|(&r, &q)| (r - q) * (r - q))
            .sum();
        Ok(sum.sqrt())
    }

    fn compression_ratio(&self) -> f32 {
        let raw_bytes = 4.0 * self.dimension as f32;
        let packed_bytes = (self.dimension * self.config.bits as usize).div_ceil(8) as f32;
        if packed_bytes == 0.0 {
            0.0
        } else {
            raw_bytes / packed_bytes
        }
    }

    fn memory_usage(&self) -> usize {
        (self.min_vals.len() + self.scales.len()) * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantizerKind;

    fn config(bits: u32) -> QuantizerConfig {
        QuantizerConfig {
            kind: QuantizerKind::Scalar,
            bits,
            ..QuantizerConfig::default()
        }
    }

    #[test]
    fn compression_ratio_halves_as_bit_width_halves() {
        let mut q8 = ScalarQuantizer::new(config(8), 4);
        q8.train(&[vec![0.0; 4], vec![1.0; 4]]).unwrap();
        assert!((q8.compression_ratio() - 4.0).abs() < 1e-6);

        let mut q4 = ScalarQuantizer::new(config(4), 4);
        q4.train(&[vec![0.0; 4], vec![1.0; 4]]).unwrap();
        assert!((q4.compression_ratio() - 8.0).abs() < 1e-6);
    }

    #[test]
    fn compress_then_decompress_is_within_one_scale_unit() {
        let mut q = ScalarQuantizer::new(config(8), 3);
        let data = vec![vec![0.0, 0.0, 0.0], vec![10.0, 10.0, 10.0]];
        q.train(&data).unwrap();

        let original = vec![3.3, 7.1, 9.9];
        let code = q.compress(&original).unwrap();
        let back = q.decompress(&code).unwrap();
        let scale = 10.0 / 255.0;
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() <= scale + 1e-4);
        }
    }

    #[test]
    fn compress_before_training_fails() {
        let q = ScalarQuantizer::new(config(8), 3);
        assert!(matches!(
            q.compress(&[0.0, 0.0, 0.0]).unwrap_err().kind,
            ErrorKind::NotTrained
        ));
    }

    #[test]
    fn zero_range_dimension_maps_to_midpoint() {
        let mut q = ScalarQuantizer::new(config(8), 1);
        q.train(&[vec![5.0], vec![5.0], vec![5.0]]).unwrap();
        let code = q.compress(&[5.0]).unwrap();
        let back = q.decompress(&code).unwrap();
        assert!((back[0] - 5.0).abs() < 1e-6);
    }
}
