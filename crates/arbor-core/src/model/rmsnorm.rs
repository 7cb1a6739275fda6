//! Root Mean Square Layer Normalization.
//!
//! RMSNorm is a simpler alternative to LayerNorm that only
//! normalizes by the root mean square, without centering.
//!
//! # Formula
//!
//! `RMSNorm(x) = x * weight / sqrt(mean(x^2) + eps)`
//!
//! Gemma checkpoints store the scale centred on zero, so the effective
//! weight is `1 + scale` ([`RmsNorm::unit_offset`]).
//!
//! # Reference
//!
//! [Root Mean Square Layer Normalization](https://arxiv.org/abs/1910.07467)

use crate::error::{ArborError, Result};
use candle_core::{DType, Device, Tensor};

/// RMS Layer Normalization.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    /// Effective scale, offset already applied.
    weight: Tensor,
    /// Small constant for numerical stability.
    eps: f64,
    /// Hidden dimension.
    hidden_size: usize,
}

impl RmsNorm {
    /// Create a new RMSNorm layer with given weight.
    pub fn new(weight: Tensor, eps: f64) -> Result<Self> {
        let hidden_size = weight.dims1()?;
        Ok(Self {
            weight,
            eps,
            hidden_size,
        })
    }

    /// Create an RMSNorm whose effective weight is `1 + scale`.
    pub fn unit_offset(scale: &Tensor, eps: f64) -> Result<Self> {
        let weight = (scale.to_dtype(DType::F32)? + 1.0)?;
        Self::new(weight, eps)
    }

    /// Create a new RMSNorm layer with ones (for testing).
    pub fn ones(hidden_size: usize, eps: f64, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(hidden_size, DType::F32, device)?;
        Ok(Self {
            weight,
            eps,
            hidden_size,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [..., hidden_size]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let hidden = x.dim(candle_core::D::Minus1)?;
        if hidden != self.hidden_size {
            return Err(ArborError::InvalidInput(format!(
                "rmsnorm expects last dim {}, got {hidden}",
                self.hidden_size
            )));
        }

        let mean_sq = x.sqr()?.mean_keepdim(candle_core::D::Minus1)?;
        let rsqrt = (mean_sq + self.eps)?.sqrt()?.recip()?;

        let normalized = x.broadcast_mul(&rsqrt)?;
        Ok(normalized.broadcast_mul(&self.weight)?)
    }

    /// Get the hidden size.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Get epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Get the effective weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_rmsnorm(hidden_size: usize) -> RmsNorm {
        RmsNorm::ones(hidden_size, 1e-6, &Device::Cpu).unwrap()
    }

    #[test]
    fn rmsnorm_forward_3d() {
        let norm = create_test_rmsnorm(64);

        // [batch, seq, hidden]
        let x = Tensor::randn(0.0f32, 1.0, &[2, 16, 64], &Device::Cpu).unwrap();
        let output = norm.forward(&x).unwrap();

        assert_eq!(output.dims(), x.dims());
    }

    #[test]
    fn rmsnorm_normalized_magnitude() {
        let norm = create_test_rmsnorm(64);

        let x = (Tensor::ones(&[1, 64], DType::F32, &Device::Cpu).unwrap() * 2.0).unwrap();
        let output = norm.forward(&x).unwrap();

        // RMS of constant 2.0 is 2.0, so every output is 1.0
        let output_vec: Vec<f32> = output.flatten_all().unwrap().to_vec1().unwrap();
        for val in output_vec {
            assert!((val - 1.0).abs() < 1e-4, "Expected ~1.0, got {}", val);
        }
    }

    #[test]
    fn unit_offset_zero_scale_is_identity_weight() {
        let scale = Tensor::zeros(8, DType::F32, &Device::Cpu).unwrap();
        let norm = RmsNorm::unit_offset(&scale, 1e-6).unwrap();

        let weight: Vec<f32> = norm.weight().to_vec1().unwrap();
        assert_eq!(weight, vec![1.0; 8]);
        assert_eq!(norm.hidden_size(), 8);
    }

    #[test]
    fn rmsnorm_rejects_wrong_width() {
        let norm = create_test_rmsnorm(64);
        let x = Tensor::ones(&[1, 32], DType::F32, &Device::Cpu).unwrap();
        assert!(norm.forward(&x).is_err());
    }
}
