//! CPU reference compute engine.
//!
//! A small Gemma-style decoder assembled from a parameter [`StateTree`]. It
//! is not optimized for performance but is useful for correctness testing
//! and for exercising the decode loop end to end.

use super::backend::{greedy, ComputeEngine, StepInput, StepOutput};
use crate::cache::layer_name;
use crate::error::{ArborError, EngineError, Result};
use crate::model::{random_layer_parameters, AttentionParams, DecoderLayer, ModelConfig, RmsNorm, RotaryEmbedding};
use crate::tree::StateTree;
use candle_core::{DType, Device, Tensor};

/// Reference decoder-only transformer.
///
/// Parameters use HF-style paths: `model/embed_tokens/weight`,
/// `model/layers/{i}/...` (see [`DecoderLayer::from_parameters`]) and
/// `model/norm/weight`. The output projection is tied to the embedding.
///
/// # Example
///
/// ```rust,ignore
/// use arbor_core::engine::ReferenceEngine;
/// use arbor_core::model::ModelConfig;
///
/// let engine = ReferenceEngine::random(config, &Device::Cpu)?;
/// let output = engine.step(input)?;
/// ```
#[derive(Debug, Clone)]
pub struct ReferenceEngine {
    config: ModelConfig,
    /// Token embedding: [vocab, hidden].
    embed_tokens: Tensor,
    layers: Vec<DecoderLayer>,
    final_norm: RmsNorm,
    rope: RotaryEmbedding,
    params: AttentionParams,
}

impl ReferenceEngine {
    /// Build an engine from a parameter tree, checking it against `config`.
    pub fn from_parameters(config: ModelConfig, params: &StateTree<Tensor>, device: &Device) -> Result<Self> {
        config.validate()?;

        let embed_tokens = params
            .get(["model", "embed_tokens", "weight"])?
            .to_dtype(DType::F32)?;
        let expected = [config.vocab_size, config.hidden_size];
        if embed_tokens.dims() != expected.as_slice() {
            return Err(ArborError::InvalidConfig(format!(
                "embedding has dims {:?}, expected {:?}",
                embed_tokens.dims(),
                expected
            )));
        }

        let layer_tree = params.subtree(["model", "layers"])?;
        let found = layer_tree.children().map_or(0, |c| c.len());
        if found != config.num_hidden_layers {
            return Err(ArborError::InvalidConfig(format!(
                "parameters hold {found} layers, config expects {}",
                config.num_hidden_layers
            )));
        }
        let layers = (0..config.num_hidden_layers)
            .map(|i| DecoderLayer::from_parameters(layer_tree.subtree([i.to_string()])?, &config, i))
            .collect::<Result<Vec<_>>>()?;

        let final_norm = RmsNorm::unit_offset(params.get(["model", "norm", "weight"])?, config.rms_norm_eps)?;
        let rope = RotaryEmbedding::new(config.head_dim(), config.rope_theta, device)?;
        let attention_params = AttentionParams::from_config(&config);

        tracing::debug!(
            num_layers = layers.len(),
            hidden_size = config.hidden_size,
            "built reference engine"
        );

        Ok(Self {
            config,
            embed_tokens,
            layers,
            final_norm,
            rope,
            params: attention_params,
        })
    }

    /// Engine with random weights (for testing).
    pub fn random(config: ModelConfig, device: &Device) -> Result<Self> {
        let params = Self::random_parameters(&config, device)?;
        Self::from_parameters(config, &params, device)
    }

    /// Random parameter tree matching `config`.
    pub fn random_parameters(config: &ModelConfig, device: &Device) -> Result<StateTree<Tensor>> {
        config.validate()?;

        let mut params = StateTree::new_branch();
        params.set(
            ["model", "embed_tokens", "weight"],
            Tensor::randn(0.0f32, 1.0, &[config.vocab_size, config.hidden_size], device)?,
        )?;
        params.set(
            ["model", "norm", "weight"],
            Tensor::zeros(config.hidden_size, DType::F32, device)?,
        )?;
        for layer in 0..config.num_hidden_layers {
            let index = layer.to_string();
            for (path, value) in random_layer_parameters(config, device)?.into_leaves() {
                let full = ["model", "layers", index.as_str()]
                    .into_iter()
                    .map(str::to_owned)
                    .chain(path);
                params.set(full, value)?;
            }
        }
        Ok(params)
    }

    /// Model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn forward(&self, input: StepInput<'_>) -> Result<StepOutput> {
        let StepInput {
            tokens,
            positions,
            cache,
            shape,
            masks,
            step,
        } = input;

        let mut cache = shape.rebuild(cache)?;
        let (batch, seq_len) = tokens.dims2()?;
        let hidden = self.config.hidden_size;

        let ids = tokens.flatten_all()?;
        let x = self
            .embed_tokens
            .index_select(&ids, 0)?
            .reshape((batch, seq_len, hidden))?;
        let mut x = (x * (hidden as f64).sqrt())?;

        for layer in &self.layers {
            let name = layer_name(layer.layer_idx());
            let layer_cache = cache.subtree_mut([name.as_str()])?;
            let mask = masks.for_attention(layer.attention_type());
            let (out, update) = layer.forward(&x, &self.rope, &positions, layer_cache, mask, &self.params)?;
            update.store(layer_cache)?;
            x = out;
        }

        let x = self.final_norm.forward(&x)?;
        let last = x.narrow(1, seq_len - 1, 1)?.squeeze(1)?;
        let logits = last.matmul(&self.embed_tokens.t()?)?;
        let logits = match self.config.final_logit_softcapping {
            Some(cap) if cap > 0.0 => ((logits / cap)?.tanh()? * cap)?,
            _ => logits,
        };
        let next_tokens = greedy(&logits)?;

        tracing::trace!(step, ?next_tokens, "reference step");

        Ok(StepOutput {
            logits,
            next_tokens,
            cache: cache.into_values(),
        })
    }
}

impl ComputeEngine for ReferenceEngine {
    fn step(&self, input: StepInput<'_>) -> std::result::Result<StepOutput, EngineError> {
        Ok(self.forward(input)?)
    }
}
