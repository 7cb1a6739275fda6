//! Rotary Position Embeddings (RoPE).
//!
//! RoPE encodes position information by rotating query and key vectors
//! in the complex plane. This allows the model to understand relative
//! positions between tokens.
//!
//! Angles are computed from explicit per-row positions rather than a
//! shared offset, since rows of a batch may sit at different positions.
//!
//! # Reference
//!
//! [RoFormer: Enhanced Transformer with Rotary Position Embedding](https://arxiv.org/abs/2104.09864)

use crate::error::{ArborError, Result};
use candle_core::{DType, Device, Tensor};

/// Rotary Position Embedding implementation.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    /// Inverse frequencies: [1, half_dim].
    inv_freq: Tensor,
    /// Head dimension.
    head_dim: usize,
}

impl RotaryEmbedding {
    /// Create a new rotary embedding.
    ///
    /// # Arguments
    ///
    /// * `head_dim` - Dimension of each attention head, must be even
    /// * `theta` - Base frequency (maximum wavelength, 10000.0 for Gemma)
    /// * `device` - Device for tensors
    pub fn new(head_dim: usize, theta: f64, device: &Device) -> Result<Self> {
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(ArborError::InvalidConfig(format!(
                "rotary embedding needs an even head_dim, got {head_dim}"
            )));
        }
        // 1 / (theta^(2i/d)) for i in [0, d/2)
        let half_dim = head_dim / 2;
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| 1.0 / theta.powf(2.0 * i as f64 / head_dim as f64) as f32)
            .collect();
        let inv_freq = Tensor::from_slice(&inv_freq, (1, half_dim), device)?;

        Ok(Self { inv_freq, head_dim })
    }

    /// Apply rotary embeddings to query and key tensors.
    ///
    /// # Arguments
    ///
    /// * `query` - Query tensor [batch, num_heads, seq_len, head_dim]
    /// * `key` - Key tensor [batch, num_kv_heads, seq_len, head_dim]
    /// * `positions` - Integer positions [batch, seq_len]
    pub fn apply(&self, query: &Tensor, key: &Tensor, positions: &Tensor) -> Result<(Tensor, Tensor)> {
        let (cos, sin) = self.angles(positions)?;
        let query_rot = self.rotate_half(query, &cos, &sin)?;
        let key_rot = self.rotate_half(key, &cos, &sin)?;
        Ok((query_rot, key_rot))
    }

    /// cos/sin of every position: [batch, 1, seq_len, half_dim] each.
    fn angles(&self, positions: &Tensor) -> Result<(Tensor, Tensor)> {
        let (batch, seq_len) = positions.dims2()?;
        let half_dim = self.head_dim / 2;

        // [batch * seq_len, 1] @ [1, half_dim]
        let positions = positions
            .to_dtype(DType::F32)?
            .reshape((batch * seq_len, 1))?;
        let freqs = positions.matmul(&self.inv_freq)?;
        let freqs = freqs.reshape((batch, 1, seq_len, half_dim))?;

        Ok((freqs.cos()?, freqs.sin()?))
    }

    /// Rotate tensor using cos/sin embeddings.
    fn rotate_half(&self, x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let half_dim = self.head_dim / 2;
        let x = x.to_dtype(DType::F32)?;

        // Split into first and second halves
        let x1 = x.narrow(3, 0, half_dim)?;
        let x2 = x.narrow(3, half_dim, half_dim)?;

        // [x1, x2] -> [x1*cos - x2*sin, x2*cos + x1*sin]
        let out1 = (x1.broadcast_mul(cos)? - x2.broadcast_mul(sin)?)?;
        let out2 = (x2.broadcast_mul(cos)? + x1.broadcast_mul(sin)?)?;

        Ok(Tensor::cat(&[out1, out2], 3)?)
    }

    /// Get the head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(rows: &[u32]) -> Tensor {
        Tensor::from_slice(rows, (rows.len(), 1), &Device::Cpu).unwrap()
    }

    #[test]
    fn rope_creation() {
        let rope = RotaryEmbedding::new(64, 10000.0, &Device::Cpu).unwrap();
        assert_eq!(rope.head_dim(), 64);
        assert_eq!(rope.inv_freq.dims(), &[1, 32]);
    }

    #[test]
    fn rope_rejects_odd_head_dim() {
        assert!(RotaryEmbedding::new(7, 10000.0, &Device::Cpu).is_err());
    }

    #[test]
    fn rope_gqa_shapes() {
        let rope = RotaryEmbedding::new(64, 10000.0, &Device::Cpu).unwrap();

        // GQA: 8 query heads, 2 KV heads, batch of 2 at different positions
        let query = Tensor::randn(0.0f32, 1.0, &[2, 8, 1, 64], &Device::Cpu).unwrap();
        let key = Tensor::randn(0.0f32, 1.0, &[2, 2, 1, 64], &Device::Cpu).unwrap();

        let (q_rot, k_rot) = rope.apply(&query, &key, &positions(&[0, 100])).unwrap();

        assert_eq!(q_rot.dims(), &[2, 8, 1, 64]);
        assert_eq!(k_rot.dims(), &[2, 2, 1, 64]);
    }

    #[test]
    fn rope_position_zero_is_identity() {
        let rope = RotaryEmbedding::new(8, 10000.0, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, &[1, 2, 1, 8], &Device::Cpu).unwrap();

        let (rotated, _) = rope.apply(&x, &x, &positions(&[0])).unwrap();
        let diff: f32 = (rotated - &x)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn rope_preserves_norm() {
        let rope = RotaryEmbedding::new(16, 10000.0, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, &[1, 1, 1, 16], &Device::Cpu).unwrap();

        let (rotated, _) = rope.apply(&x, &x, &positions(&[37])).unwrap();
        let norm = |t: &Tensor| -> f32 { t.sqr().unwrap().sum_all().unwrap().to_scalar().unwrap() };
        assert!((norm(&rotated) - norm(&x)).abs() < 1e-3);
    }
}
