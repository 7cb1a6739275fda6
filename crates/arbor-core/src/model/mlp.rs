//! GELU-gated feed-forward block (GeGLU).
//!
//! # Formula
//!
//! `GeGLU(x) = (gelu(x @ gate_proj) * (x @ up_proj)) @ down_proj`
//!
//! # Reference
//!
//! [GLU Variants Improve Transformer](https://arxiv.org/abs/2002.05202)

use crate::error::{ArborError, Result};
use candle_core::{DType, Device, Tensor};

/// Gated feed-forward block with a GELU gate.
#[derive(Debug, Clone)]
pub struct GatedMlp {
    /// Gate projection: [intermediate, hidden]
    gate_proj: Tensor,
    /// Up projection: [intermediate, hidden]
    up_proj: Tensor,
    /// Down projection: [hidden, intermediate]
    down_proj: Tensor,
    /// Hidden dimension.
    hidden_size: usize,
    /// Intermediate dimension.
    intermediate_size: usize,
}

impl GatedMlp {
    /// Create a block from projection weights in `[out_features, in_features]` layout.
    pub fn new(gate_proj: Tensor, up_proj: Tensor, down_proj: Tensor) -> Result<Self> {
        let (intermediate_size, hidden_size) = gate_proj.dims2()?;
        let expected_down = [hidden_size, intermediate_size];
        if up_proj.dims() != gate_proj.dims() || down_proj.dims() != expected_down.as_slice() {
            return Err(ArborError::InvalidConfig(format!(
                "mlp projections disagree: gate {:?}, up {:?}, down {:?}",
                gate_proj.dims(),
                up_proj.dims(),
                down_proj.dims()
            )));
        }

        Ok(Self {
            gate_proj,
            up_proj,
            down_proj,
            hidden_size,
            intermediate_size,
        })
    }

    /// Create with zeros (for testing specific behaviors).
    pub fn zeros(hidden_size: usize, intermediate_size: usize, device: &Device) -> Result<Self> {
        let gate_proj = Tensor::zeros(&[intermediate_size, hidden_size], DType::F32, device)?;
        let up_proj = Tensor::zeros(&[intermediate_size, hidden_size], DType::F32, device)?;
        let down_proj = Tensor::zeros(&[hidden_size, intermediate_size], DType::F32, device)?;
        Self::new(gate_proj, up_proj, down_proj)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, seq, hidden_size]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq, hidden) = x.dims3()?;
        let x_2d = x.reshape((batch * seq, hidden))?;

        let gate = x_2d.matmul(&self.gate_proj.t()?)?.gelu()?;
        let up = x_2d.matmul(&self.up_proj.t()?)?;
        let output = (gate * up)?.matmul(&self.down_proj.t()?)?;

        Ok(output.reshape((batch, seq, self.hidden_size))?)
    }

    /// Get the hidden size.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Get the intermediate size.
    pub fn intermediate_size(&self) -> usize {
        self.intermediate_size
    }
}
