//! # Arbor Core
//!
//! Bookkeeping substrate for autoregressive decoding.
//!
//! This crate provides:
//! - **State trees**: named, hierarchical containers with flatten/rebuild
//! - **Rotating KV cache** of fixed capacity, one tree branch per layer
//! - **Decode state machine** that threads tokens, done flags and cache
//!   through a pluggable compute engine
//! - **Reference engine**: a small Gemma-style decoder on candle

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod decode;
pub mod engine;
pub mod error;
pub mod model;
pub mod tree;

pub use error::{ArborError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheShape, RotatingCache};
    pub use crate::decode::{DecodeConfig, DecodePhase, DecodeStateMachine, GenerationState, Sampler};
    pub use crate::engine::{ComputeEngine, ReferenceEngine, StepInput, StepOutput};
    pub use crate::error::{ArborError, Result};
    pub use crate::model::{ModelConfig, SpecialTokens, Tokenizer, Vocabulary};
    pub use crate::tree::{Path, StateTree};
}
