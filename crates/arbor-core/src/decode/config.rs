//! Decode loop configuration.

use crate::cache::CacheConfig;
use crate::model::{ModelConfig, SpecialTokens};
use candle_core::{DType, Device};

/// What the decode loop needs to know about the model and vocabulary.
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Number of layers, one cache branch each.
    pub num_layers: usize,
    /// KV heads per layer.
    pub num_kv_heads: usize,
    /// Head dimension.
    pub head_dim: usize,
    /// Slots per cache buffer.
    pub cache_capacity: usize,
    /// Sliding window length; `None` when no layer slides.
    pub sliding_window: Option<usize>,
    /// Special token ids.
    pub special: SpecialTokens,
    /// Device for cache buffers and step inputs.
    pub device: Device,
    /// Cache element type.
    pub dtype: DType,
}

impl DecodeConfig {
    /// Derive from a model configuration.
    ///
    /// The cache capacity defaults to `model.max_cache_length`.
    pub fn from_model(model: &ModelConfig, special: SpecialTokens, device: Device) -> Self {
        let sliding_window = if model.has_sliding_layers() {
            model.sliding_window
        } else {
            None
        };
        Self {
            num_layers: model.num_hidden_layers,
            num_kv_heads: model.num_key_value_heads,
            head_dim: model.head_dim(),
            cache_capacity: model.max_cache_length,
            sliding_window,
            special,
            device,
            dtype: DType::F32,
        }
    }

    /// Override the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Override the cache element type.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Cache layout for a batch of `batch_size` rows.
    pub fn cache_config(&self, batch_size: usize) -> CacheConfig {
        CacheConfig {
            num_layers: self.num_layers,
            capacity: self.cache_capacity,
            batch_size,
            num_kv_heads: self.num_kv_heads,
            head_dim: self.head_dim,
            dtype: self.dtype,
        }
    }
}
