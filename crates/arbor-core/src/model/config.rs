//! Model configuration.

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};

/// Known model variants, recognised by their layer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Gemma 2B (18 layers).
    Gemma2b,
    /// Gemma 7B (28 layers).
    Gemma7b,
    /// Gemma 2 2B (26 layers).
    Gemma2_2b,
    /// Gemma 2 9B (42 layers).
    Gemma2_9b,
    /// Gemma 2 27B (46 layers).
    Gemma2_27b,
}

impl ModelVariant {
    /// Detect the variant from the number of decoder layers.
    pub fn from_num_layers(num_layers: usize) -> Option<Self> {
        match num_layers {
            18 => Some(Self::Gemma2b),
            28 => Some(Self::Gemma7b),
            26 => Some(Self::Gemma2_2b),
            42 => Some(Self::Gemma2_9b),
            46 => Some(Self::Gemma2_27b),
            _ => None,
        }
    }
}

/// Attention span of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionType {
    /// Attend to every cached position.
    Global,
    /// Attend only to the last `sliding_window` positions.
    LocalSliding,
}

/// How queries are scaled before the attention logits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryNorm {
    /// `1 / sqrt(head_dim)`.
    #[default]
    OneOverSqrtHeadDim,
    /// `hidden_size / num_heads`.
    HiddenDivHeads,
    /// `1 / sqrt(hidden_size / num_heads)`.
    OneOverSqrtHiddenDivHeads,
}

/// Configuration for a decoder-only transformer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden dimension.
    pub hidden_size: usize,
    /// Intermediate dimension (FFN).
    pub intermediate_size: usize,
    /// Number of attention heads.
    pub num_attention_heads: usize,
    /// Number of KV heads (for GQA).
    pub num_key_value_heads: usize,
    /// Number of layers.
    pub num_hidden_layers: usize,
    /// Maximum sequence length.
    pub max_position_embeddings: usize,
    /// RMS norm epsilon.
    pub rms_norm_eps: f64,
    /// Rope theta.
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    /// Head dimension (derived when 0).
    #[serde(default)]
    pub head_dim: usize,
    /// Slots in the rotating KV cache.
    #[serde(default = "default_max_cache_length")]
    pub max_cache_length: usize,
    /// Per-layer attention types, cycled over the layers.
    #[serde(default)]
    pub attention_types: Vec<AttentionType>,
    /// Window of local-sliding layers.
    #[serde(default)]
    pub sliding_window: Option<usize>,
    /// Soft cap on attention logits.
    #[serde(default)]
    pub attn_logit_softcapping: Option<f64>,
    /// Soft cap on output logits.
    #[serde(default)]
    pub final_logit_softcapping: Option<f64>,
    /// Query scaling rule.
    #[serde(default)]
    pub query_pre_attention_norm: QueryNorm,
    /// Model architecture type.
    #[serde(default)]
    pub model_type: String,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_max_cache_length() -> usize {
    1024
}

impl ModelConfig {
    /// Gemma 2 2B.
    pub fn gemma2_2b() -> Self {
        Self {
            vocab_size: 256_128,
            hidden_size: 2304,
            intermediate_size: 9216,
            num_attention_heads: 8,
            num_key_value_heads: 4,
            num_hidden_layers: 26,
            max_position_embeddings: 8192,
            rms_norm_eps: 1e-6,
            rope_theta: default_rope_theta(),
            head_dim: 256,
            max_cache_length: default_max_cache_length(),
            attention_types: vec![AttentionType::LocalSliding, AttentionType::Global],
            sliding_window: Some(4096),
            attn_logit_softcapping: Some(50.0),
            final_logit_softcapping: Some(30.0),
            query_pre_attention_norm: QueryNorm::OneOverSqrtHeadDim,
            model_type: "gemma2".to_string(),
        }
    }

    /// Calculate head dimension.
    pub fn head_dim(&self) -> usize {
        if self.head_dim > 0 {
            self.head_dim
        } else {
            self.hidden_size / self.num_attention_heads.max(1)
        }
    }

    /// Get GQA ratio.
    pub fn gqa_ratio(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads.max(1)
    }

    /// Variant implied by the layer count, if known.
    pub fn variant(&self) -> Option<ModelVariant> {
        ModelVariant::from_num_layers(self.num_hidden_layers)
    }

    /// Attention type of `layer`.
    ///
    /// An explicit list is cycled over the layers. Without one, layers
    /// alternate local-sliding / global when a window is configured, and are
    /// all global otherwise.
    pub fn attention_type(&self, layer: usize) -> AttentionType {
        if !self.attention_types.is_empty() {
            return self.attention_types[layer % self.attention_types.len()];
        }
        match self.sliding_window {
            Some(_) if layer % 2 == 0 => AttentionType::LocalSliding,
            _ => AttentionType::Global,
        }
    }

    /// Whether any layer uses a sliding window.
    pub fn has_sliding_layers(&self) -> bool {
        (0..self.num_hidden_layers).any(|l| self.attention_type(l) == AttentionType::LocalSliding)
    }

    /// Multiplier applied to queries before the attention logits.
    pub fn query_pre_attention_scalar(&self) -> f64 {
        let per_head = (self.hidden_size / self.num_attention_heads.max(1)) as f64;
        match self.query_pre_attention_norm {
            QueryNorm::OneOverSqrtHeadDim => 1.0 / (self.head_dim() as f64).sqrt(),
            QueryNorm::HiddenDivHeads => per_head,
            QueryNorm::OneOverSqrtHiddenDivHeads => 1.0 / per_head.sqrt(),
        }
    }

    /// Check the configuration for inconsistent dimensions.
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("intermediate_size", self.intermediate_size),
            ("num_attention_heads", self.num_attention_heads),
            ("num_key_value_heads", self.num_key_value_heads),
            ("num_hidden_layers", self.num_hidden_layers),
            ("max_cache_length", self.max_cache_length),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(ArborError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.num_attention_heads % self.num_key_value_heads != 0 {
            return Err(ArborError::InvalidConfig(format!(
                "num_attention_heads {} not divisible by num_key_value_heads {}",
                self.num_attention_heads, self.num_key_value_heads
            )));
        }
        let head_dim = self.head_dim();
        if head_dim == 0 || head_dim % 2 != 0 {
            return Err(ArborError::InvalidConfig(format!(
                "head_dim {head_dim} must be positive and even"
            )));
        }
        if self.has_sliding_layers() && self.sliding_window.unwrap_or(0) == 0 {
            return Err(ArborError::InvalidConfig(
                "local sliding layers need a positive sliding_window".into(),
            ));
        }
        Ok(())
    }

    /// Load from JSON file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::gemma2_2b()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemma2_preset() {
        let config = ModelConfig::gemma2_2b();
        assert_eq!(config.variant(), Some(ModelVariant::Gemma2_2b));
        assert_eq!(config.gqa_ratio(), 2);
        assert_eq!(config.attention_type(0), AttentionType::LocalSliding);
        assert_eq!(config.attention_type(1), AttentionType::Global);
        assert_eq!(config.attention_type(25), AttentionType::Global);
        assert!((config.query_pre_attention_scalar() - 1.0 / 16.0).abs() < 1e-12);
        config.validate().unwrap();
    }

    #[test]
    fn variant_from_layers() {
        assert_eq!(ModelVariant::from_num_layers(18), Some(ModelVariant::Gemma2b));
        assert_eq!(ModelVariant::from_num_layers(46), Some(ModelVariant::Gemma2_27b));
        assert_eq!(ModelVariant::from_num_layers(3), None);
    }

    #[test]
    fn implicit_pattern_without_window_is_global() {
        let mut config = ModelConfig::gemma2_2b();
        config.attention_types.clear();
        config.sliding_window = None;
        assert!(!config.has_sliding_layers());

        config.sliding_window = Some(8);
        assert_eq!(config.attention_type(2), AttentionType::LocalSliding);
        assert_eq!(config.attention_type(3), AttentionType::Global);
    }

    #[test]
    fn query_scalars() {
        let mut config = ModelConfig::gemma2_2b();
        config.query_pre_attention_norm = QueryNorm::HiddenDivHeads;
        assert_eq!(config.query_pre_attention_scalar(), 288.0);

        config.query_pre_attention_norm = QueryNorm::OneOverSqrtHiddenDivHeads;
        assert!((config.query_pre_attention_scalar() - 1.0 / 288f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn validate_rejects_bad_heads() {
        let mut config = ModelConfig::gemma2_2b();
        config.num_key_value_heads = 3;
        assert!(matches!(config.validate(), Err(ArborError::InvalidConfig(_))));
    }

    #[test]
    fn validate_requires_window_for_sliding_layers() {
        let mut config = ModelConfig::gemma2_2b();
        config.sliding_window = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{
            "vocab_size": 32,
            "hidden_size": 16,
            "intermediate_size": 32,
            "num_attention_heads": 2,
            "num_key_value_heads": 1,
            "num_hidden_layers": 2,
            "max_position_embeddings": 64,
            "rms_norm_eps": 1e-6,
            "attention_types": ["global", "local_sliding"],
            "sliding_window": 4
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.head_dim(), 8);
        assert_eq!(config.max_cache_length, 1024);
        assert_eq!(config.rope_theta, 10_000.0);
        assert_eq!(config.attention_type(1), AttentionType::LocalSliding);
        assert_eq!(config.query_pre_attention_norm, QueryNorm::OneOverSqrtHeadDim);
        config.validate().unwrap();
    }
}
