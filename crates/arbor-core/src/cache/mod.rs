//! Rotating per-layer KV cache stored as a [`StateTree`].
//!
//! Each layer `layer_{i}` owns three leaves:
//!
//! - `keys` and `values`: fixed-capacity buffers of shape
//!   (batch, capacity, kv_heads, head_dim), zero initialised
//! - `cursor`: scalar i64, the next logical write position
//!
//! Writes land at `cursor mod capacity` and wrap around to the start of the
//! buffer, so a cache never grows. The cursor keeps counting past the
//! capacity; readers that need linear positions derive them from it.
//!
//! # Example
//!
//! ```rust
//! use arbor_core::cache::{write_slot, CacheConfig, RotatingCache};
//! use candle_core::{DType, Device, Tensor};
//!
//! let config = CacheConfig {
//!     num_layers: 2,
//!     capacity: 16,
//!     batch_size: 1,
//!     num_kv_heads: 2,
//!     head_dim: 8,
//!     dtype: DType::F32,
//! };
//! let mut cache = RotatingCache::new(&config, &Device::Cpu).unwrap();
//!
//! let k = Tensor::ones((1, 1, 2, 8), DType::F32, &Device::Cpu).unwrap();
//! let update = write_slot(cache.layer(0).unwrap(), &k, &k, 1).unwrap();
//! cache.store(0, update).unwrap();
//!
//! assert_eq!(cache.cursor(0).unwrap(), 1);
//! assert_eq!(cache.cursor(1).unwrap(), 0);
//! ```

mod shape;
mod slot;

pub use shape::CacheShape;
pub use slot::{read_cursor, write_slot, SlotPlan, SlotUpdate};

use crate::error::{ArborError, Result};
use crate::tree::StateTree;
use candle_core::{DType, Device, Tensor};
use std::sync::Arc;

/// Leaf name of the keys buffer.
pub const KEYS: &str = "keys";
/// Leaf name of the values buffer.
pub const VALUES: &str = "values";
/// Leaf name of the write cursor.
pub const CURSOR: &str = "cursor";

/// Branch name of layer `layer`.
pub fn layer_name(layer: usize) -> String {
    format!("layer_{layer}")
}

/// Rotating cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of layers.
    pub num_layers: usize,
    /// Slots per buffer.
    pub capacity: usize,
    /// Sequences in the batch.
    pub batch_size: usize,
    /// Number of KV heads.
    pub num_kv_heads: usize,
    /// Head dimension.
    pub head_dim: usize,
    /// Buffer element type.
    pub dtype: DType,
}

impl CacheConfig {
    /// Dimensions of one keys or values buffer.
    pub fn buffer_dims(&self) -> (usize, usize, usize, usize) {
        (
            self.batch_size,
            self.capacity,
            self.num_kv_heads,
            self.head_dim,
        )
    }

    /// Check that every dimension is positive.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("num_layers", self.num_layers),
            ("capacity", self.capacity),
            ("batch_size", self.batch_size),
            ("num_kv_heads", self.num_kv_heads),
            ("head_dim", self.head_dim),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(ArborError::InvalidConfig(format!(
                    "cache {name} must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Fixed-capacity KV cache for one generation.
#[derive(Debug, Clone)]
pub struct RotatingCache {
    config: CacheConfig,
    data: StateTree<Tensor>,
    shape: Arc<CacheShape>,
}

impl RotatingCache {
    /// Allocate a zeroed cache with all cursors at 0.
    pub fn new(config: &CacheConfig, device: &Device) -> Result<Self> {
        config.validate()?;

        let mut data = StateTree::new_branch();
        for layer in 0..config.num_layers {
            let name = layer_name(layer);
            let keys = Tensor::zeros(config.buffer_dims(), config.dtype, device)?;
            let values = Tensor::zeros(config.buffer_dims(), config.dtype, device)?;
            data.set([name.as_str(), KEYS], keys)?;
            data.set([name.as_str(), VALUES], values)?;
            data.set([name.as_str(), CURSOR], Tensor::new(0i64, device)?)?;
        }

        let shape = Arc::new(CacheShape::of(&data));
        tracing::debug!(
            num_layers = config.num_layers,
            capacity = config.capacity,
            batch_size = config.batch_size,
            "allocated rotating cache"
        );

        Ok(Self {
            config: config.clone(),
            data,
            shape,
        })
    }

    /// Rebuild a cache from a flat value list in [`CacheShape`] order.
    pub fn from_values(config: CacheConfig, shape: Arc<CacheShape>, values: Vec<Tensor>) -> Result<Self> {
        let data = shape.rebuild(values)?;
        Ok(Self {
            config,
            data,
            shape,
        })
    }

    /// Subtree of layer `layer`.
    pub fn layer(&self, layer: usize) -> Result<&StateTree<Tensor>> {
        Ok(self.data.subtree([layer_name(layer)])?)
    }

    /// Mutable subtree of layer `layer`.
    pub fn layer_mut(&mut self, layer: usize) -> Result<&mut StateTree<Tensor>> {
        Ok(self.data.subtree_mut([layer_name(layer)])?)
    }

    /// Store the result of a [`write_slot`] into layer `layer`.
    pub fn store(&mut self, layer: usize, update: SlotUpdate) -> Result<()> {
        update.store(self.layer_mut(layer)?)
    }

    /// Current cursor of layer `layer`.
    pub fn cursor(&self, layer: usize) -> Result<usize> {
        read_cursor(self.data.get([layer_name(layer).as_str(), CURSOR])?)
    }

    /// The session shape.
    pub fn shape(&self) -> &CacheShape {
        &self.shape
    }

    /// Shared handle to the session shape.
    pub fn shape_handle(&self) -> Arc<CacheShape> {
        Arc::clone(&self.shape)
    }

    /// Configuration the cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The underlying tree.
    pub fn data(&self) -> &StateTree<Tensor> {
        &self.data
    }

    /// Flatten into buffers in [`CacheShape`] order.
    pub fn into_values(self) -> Vec<Tensor> {
        self.data.into_values()
    }

    /// Device the buffers live on.
    pub fn device(&self) -> Result<Device> {
        let (_, first) = self
            .data
            .ordered_leaves()
            .next()
            .ok_or_else(|| ArborError::InvalidConfig("cache has no layers".into()))?;
        Ok(first.device().clone())
    }
}
