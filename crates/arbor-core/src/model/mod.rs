//! Model building blocks.
//!
//! Provides the pieces the reference compute engine is assembled from:
//! - Model configuration and known variants
//! - Vocabulary contract and HuggingFace tokenizer
//! - RMSNorm, rotary embeddings, gated MLP and the decoder block

mod config;
mod layer;
mod mlp;
mod rmsnorm;
mod rope;
mod tokenizer;

pub use config::{AttentionType, ModelConfig, ModelVariant, QueryNorm};
pub use layer::{Attention, AttentionParams, DecoderLayer, LOGITS_MASK};
pub(crate) use layer::random_layer_parameters;
pub use mlp::GatedMlp;
pub use rmsnorm::RmsNorm;
pub use rope::RotaryEmbedding;
pub use tokenizer::{SpecialTokens, Tokenizer, Vocabulary};
