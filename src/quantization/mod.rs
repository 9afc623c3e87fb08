//! Vector quantization: [`Quantizer`] trait plus Product and Scalar variants.
//!
//! A capability trait over a configurable bit width, per spec §4.2, with a
//! sum-type factory (`QuantizerKind`) the way spec §9 sanctions ("a sum type
//! over variants is equally acceptable and easier to optimize").

pub mod cache;
pub mod product;
pub mod scalar;

use crate::config::{QuantizerConfig, QuantizerKind};
use crate::error::Result;

pub use product::ProductQuantizer;
pub use scalar::ScalarQuantizer;

/// A trained (or trainable) vector quantizer.
///
/// Compression/decompression is pure: `decompress(compress(v))` reconstructs
/// `v` within a quantization-determined bound per dimension, and neither
/// operation mutates quantizer state (spec §3 Invariants).
pub trait Quantizer: std::fmt::Debug + Send + Sync {
    /// This quantizer's configuration.
    fn config(&self) -> &QuantizerConfig;

    /// Trains the quantizer on a batch of same-dimension vectors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::TrainingFailed`] if the batch is
    /// insufficient or k-means fails to converge usefully.
    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<()>;

    /// Returns `true` once [`Quantizer::train`] has succeeded.
    fn is_trained(&self) -> bool;

    /// Compresses a raw vector into its packed byte representation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::NotTrained`] if untrained, or
    /// [`crate::error::ErrorKind::DimensionMismatch`] on a dimension
    /// mismatch.
    fn compress(&self, vector: &[f32]) -> Result<Vec<u8>>;

    /// Reconstructs an approximate float32 vector from compressed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ErrorKind::DecompressionFailed`] if `code`'s
    /// length does not match this quantizer's code width.
    fn decompress(&self, code: &[u8]) -> Result<Vec<f32>>;

    /// Symmetric distance between two compressed codes.
    ///
    /// # Errors
    ///
    /// Returns an error if either code has an invalid length.
    fn distance(&self, code_a: &[u8], code_b: &[u8]) -> Result<f32>;

    /// Asymmetric distance between a compressed code and a raw query.
    ///
    /// # Errors
    ///
    /// Returns an error if `code` has an invalid length or `query`'s
    /// dimension does not match.
    fn distance_to_query(&self, code: &[u8], query: &[f32]) -> Result<f32>;

    /// Ratio of raw (`4 * dimension` bytes) to compressed size.
    fn compression_ratio(&self) -> f32;

    /// Approximate heap memory used by trained quantizer state, in bytes.
    fn memory_usage(&self) -> usize;
}

/// Packs `codes`, each `bits` wide (`bits <= 32`), little-endian bit order,
/// into a minimal byte array. Shared by the scalar and product quantizers,
/// both of which pack small integer codes per spec §4.2/§3.
#[must_use]
pub(crate) fn pack_codes(codes: &[u32], bits: u32) -> Vec<u8> {
    let total_bits = codes.len() * bits as usize;
    let mut out = vec![0u8; total_bits.div_ceil(8)];
    let mut bit_pos = 0usize;
    for &code in codes {
        for b in 0..bits {
            if (code >> b) & 1 == 1 {
                let byte = bit_pos / 8;
                let offset = bit_pos % 8;
                out[byte] |= 1 << offset;
            }
            bit_pos += 1;
        }
    }
    out
}

/// Reverse of [`pack_codes`]: unpacks `count` codes, each `bits` wide, from
/// `bytes`.
#[must_use]
pub(crate) fn unpack_codes(bytes: &[u8], bits: u32, count: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(count);
    let mut bit_pos = 0usize;
    for _ in 0..count {
        let mut code: u32 = 0;
        for b in 0..bits {
            let byte = bit_pos / 8;
            let offset = bit_pos % 8;
            if byte < bytes.len() && (bytes[byte] >> offset) & 1 == 1 {
                code |= 1 << b;
            }
            bit_pos += 1;
        }
        out.push(code);
    }
    out
}

/// Builds a fresh, untrained [`Quantizer`] for the given configuration.
#[must_use]
pub fn build(config: QuantizerConfig, dimension: usize) -> Box<dyn Quantizer> {
    match config.kind {
        QuantizerKind::Product => Box::new(ProductQuantizer::new(config, dimension)),
        QuantizerKind::Scalar => Box::new(ScalarQuantizer::new(config, dimension)),
    }
}

/// Minimum training-buffer size before a quantizer may be trained (spec
/// §4.4 step 2): `max(1000, codebooks * 256)` for PQ, `max(100, D * 10)`
/// for scalar.
#[must_use]
pub fn training_threshold(config: &QuantizerConfig, dimension: usize) -> usize {
    match config.kind {
        QuantizerKind::Product => (config.codebooks * 256).max(1000),
        QuantizerKind::Scalar => (dimension * 10).max(100),
    }
}

/// Decides how to react to a quantizer training failure (spec §4.2/§7).
///
/// Above the quantizer, a policy may retry with reduced complexity (halve
/// codebooks, halve bits, shrink the training ratio, shrink the cache) or
/// fall back to uncompressed storage.
#[derive(Debug, Clone, Copy)]
pub enum RecoveryAction {
    /// Retry training with a reduced-complexity configuration.
    RetryReduced(QuantizerConfig),
    /// Give up on quantization; store vectors raw from now on.
    FallBackToRaw,
}

/// Policy wrapping a quantizer config, deciding how to react to
/// [`crate::error::ErrorKind::TrainingFailed`].
#[derive(Debug, Clone)]
pub struct QuantizerRecoveryPolicy {
    /// How many reduced-complexity retries remain.
    max_retries: u32,
    attempts: u32,
}

impl QuantizerRecoveryPolicy {
    /// Creates a policy allowing up to `max_retries` complexity reductions
    /// before falling back to raw storage.
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempts: 0,
        }
    }

    /// Decides the next action given the config that just failed to train.
    pub fn next_action(&mut self, failed: &QuantizerConfig) -> RecoveryAction {
        if self.attempts >= self.max_retries {
            return RecoveryAction::FallBackToRaw;
        }
        self.attempts += 1;

        let mut reduced = failed.clone();
        reduced.codebooks = (reduced.codebooks / 2).max(1);
        reduced.bits = (reduced.bits / 2).max(1);
        reduced.train_ratio = (reduced.train_ratio / 2.0).max(0.01);
        reduced.cache_size = reduced.cache_size / 2;
        RecoveryAction::RetryReduced(reduced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantizerConfig;

    #[test]
    fn training_threshold_uses_floor_for_scalar() {
        let config = QuantizerConfig {
            kind: QuantizerKind::Scalar,
            ..QuantizerConfig::default()
        };
        assert_eq!(training_threshold(&config, 4), 100);
        assert_eq!(training_threshold(&config, 50), 500);
    }

    #[test]
    fn training_threshold_uses_floor_for_product() {
        let config = QuantizerConfig {
            kind: QuantizerKind::Product,
            codebooks: 2,
            ..QuantizerConfig::default()
        };
        assert_eq!(training_threshold(&config, 4), 1000);
    }

    #[test]
    fn recovery_policy_falls_back_after_max_retries() {
        let config = QuantizerConfig::default();
        let mut policy = QuantizerRecoveryPolicy::new(1);
        assert!(matches!(
            policy.next_action(&config),
            RecoveryAction::RetryReduced(_)
        ));
        assert!(matches!(
            policy.next_action(&config),
            RecoveryAction::FallBackToRaw
        ));
    }

    #[test]
    fn pack_and_unpack_round_trip_sub_byte_codes() {
        let codes = vec![1u32, 2, 3, 0, 7, 7];
        let packed = pack_codes(&codes, 3);
        assert_eq!(packed.len(), (codes.len() * 3).div_ceil(8));
        let unpacked = unpack_codes(&packed, 3, codes.len());
        assert_eq!(unpacked, codes);
    }

    #[test]
    fn pack_codes_matches_compression_ratio_expectation() {
        // dim=4, bits=8 -> 4 bytes; bits=4 -> 2 bytes (ratio 8.0 vs raw 16 bytes).
        let codes = vec![1u32, 2, 3, 4];
        assert_eq!(pack_codes(&codes, 8).len(), 4);
        assert_eq!(pack_codes(&codes, 4).len(), 2);
    }
}
