//! The compute engine contract.
//!
//! This module provides:
//! - [`ComputeEngine`] - Trait for anything that can run one decode step
//! - [`StepInput`] / [`StepOutput`] - What crosses the boundary each step
//! - [`StepMasks`] - Per-attention-type visibility over cache slots

use crate::cache::CacheShape;
use crate::error::EngineError;
use crate::model::AttentionType;
use candle_core::Tensor;
use std::sync::Arc;

/// Visibility of cache slots for the current step.
///
/// Each mask is u8 [batch, 1, capacity], 1 where the slot may be attended.
#[derive(Debug, Clone)]
pub struct StepMasks {
    /// Causal visibility, used by global layers.
    pub causal: Tensor,
    /// Causal visibility intersected with the sliding band, when any layer
    /// slides.
    pub sliding: Option<Tensor>,
}

impl StepMasks {
    /// Mask for a layer of the given attention type.
    ///
    /// Falls back to the causal mask when no sliding mask was built.
    pub fn for_attention(&self, attention_type: AttentionType) -> &Tensor {
        match (attention_type, &self.sliding) {
            (AttentionType::LocalSliding, Some(sliding)) => sliding,
            _ => &self.causal,
        }
    }
}

/// Everything an engine needs for one step.
///
/// The cache values are moved in; the caller only uses what comes back in
/// [`StepOutput::cache`].
#[derive(Debug)]
pub struct StepInput<'a> {
    /// Current token per row: u32 [batch, 1].
    pub tokens: Tensor,
    /// Current position per row: u32 [batch, 1].
    pub positions: Tensor,
    /// Cache buffers in [`CacheShape`] order.
    pub cache: Vec<Tensor>,
    /// Structure of `cache`.
    pub shape: &'a CacheShape,
    /// Slot visibility.
    pub masks: &'a StepMasks,
    /// Step counter.
    pub step: usize,
}

/// Result of one step.
#[derive(Debug)]
pub struct StepOutput {
    /// Next-token scores: [batch, vocab].
    pub logits: Tensor,
    /// Greedy next token per row.
    pub next_tokens: Vec<u32>,
    /// Updated cache buffers, same order and dims as the input.
    pub cache: Vec<Tensor>,
}

/// Runs one autoregressive step of a sequence model.
///
/// Implementations must return cache buffers with the same count and
/// dimensions as they received, or the step fails with a shape error.
pub trait ComputeEngine: Send + Sync {
    /// Run one step.
    fn step(&self, input: StepInput<'_>) -> Result<StepOutput, EngineError>;
}

impl<E: ComputeEngine + ?Sized> ComputeEngine for &E {
    fn step(&self, input: StepInput<'_>) -> Result<StepOutput, EngineError> {
        (**self).step(input)
    }
}

impl<E: ComputeEngine + ?Sized> ComputeEngine for Arc<E> {
    fn step(&self, input: StepInput<'_>) -> Result<StepOutput, EngineError> {
        (**self).step(input)
    }
}

impl<E: ComputeEngine + ?Sized> ComputeEngine for Box<E> {
    fn step(&self, input: StepInput<'_>) -> Result<StepOutput, EngineError> {
        (**self).step(input)
    }
}

/// Index of the largest logit in each row of a [batch, vocab] tensor.
pub fn greedy(logits: &Tensor) -> Result<Vec<u32>, EngineError> {
    Ok(logits.argmax(candle_core::D::Minus1)?.to_vec1::<u32>()?)
}
