//! # Arbor
//!
//! Batched greedy text generation over a rotating KV cache.
//!
//! Arbor wires a vocabulary, a compute engine and the decode state machine
//! from `arbor-core` behind an async builder:
//! - **Batched decoding**: many prompts advance together, one token per step
//! - **Fixed memory**: the KV cache never grows past its capacity
//! - **Pluggable engines**: anything implementing `ComputeEngine`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use arbor::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let generator = Generator::builder()
//!         .config_path("gemma-2-2b/config.json")
//!         .tokenizer_dir("gemma-2-2b")
//!         .build()
//!         .await?;
//!
//!     let results = generator
//!         .generate(["The capital of France is"])
//!         .max_tokens(32)
//!         .execute()
//!         .await?;
//!
//!     println!("{}", results[0].text);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use arbor_core::*;

mod generator;

pub use generator::{
    GenerateRequest, GenerateResult, GenerationStats, Generator, GeneratorBuilder, GeneratorConfig,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::generator::{
        GenerateRequest, GenerateResult, GenerationStats, Generator, GeneratorBuilder,
        GeneratorConfig,
    };
    pub use crate::{
        cache::{CacheConfig, RotatingCache},
        decode::{DecodeConfig, DecodePhase, DecodeStateMachine, GenerationState, Sampler},
        engine::{ComputeEngine, ReferenceEngine},
        error::{ArborError, Result},
        model::{ModelConfig, SpecialTokens, Tokenizer, Vocabulary},
        tree::{Path, StateTree},
    };

    // Re-export useful external types
    pub use anyhow;
    pub use tokio;
    pub use tracing;
}
