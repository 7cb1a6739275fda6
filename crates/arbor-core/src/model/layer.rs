//! Transformer decoder block over a rotating KV cache.
//!
//! A single block combines:
//! - Pre-attention RMSNorm
//! - Grouped Query Attention reading the whole rotating cache
//! - Optional post-attention RMSNorm
//! - Pre-feed-forward RMSNorm, GELU-gated MLP, optional post-feed-forward RMSNorm

use super::{AttentionType, GatedMlp, ModelConfig, RmsNorm, RotaryEmbedding};
use crate::cache::{write_slot, SlotUpdate};
use crate::error::{ArborError, Result};
use crate::tree::StateTree;
use candle_core::{DType, Device, Tensor};

/// Value written over masked attention logits before the softmax.
pub const LOGITS_MASK: f32 = -2.381_976_3e38;

/// Self-attention module for transformer layers.
#[derive(Debug, Clone)]
pub struct Attention {
    /// Query projection: [num_heads * head_dim, hidden_size]
    q_proj: Tensor,
    /// Key projection: [num_kv_heads * head_dim, hidden_size]
    k_proj: Tensor,
    /// Value projection: [num_kv_heads * head_dim, hidden_size]
    v_proj: Tensor,
    /// Output projection: [hidden_size, num_heads * head_dim]
    o_proj: Tensor,
    /// Number of attention heads.
    num_heads: usize,
    /// Number of key-value heads (for GQA).
    num_kv_heads: usize,
    /// Head dimension.
    head_dim: usize,
    /// Hidden size.
    hidden_size: usize,
}

impl Attention {
    /// Create attention with provided weights.
    pub fn new(
        q_proj: Tensor,
        k_proj: Tensor,
        v_proj: Tensor,
        o_proj: Tensor,
        num_heads: usize,
        num_kv_heads: usize,
        head_dim: usize,
    ) -> Result<Self> {
        let (q_out, hidden_size) = q_proj.dims2()?;
        let kv_out = num_kv_heads * head_dim;
        let consistent = q_out == num_heads * head_dim
            && k_proj.dims() == [kv_out, hidden_size].as_slice()
            && v_proj.dims() == [kv_out, hidden_size].as_slice()
            && o_proj.dims() == [hidden_size, q_out].as_slice();
        if !consistent {
            return Err(ArborError::InvalidConfig(format!(
                "attention projections disagree with {num_heads} heads / {num_kv_heads} kv heads of dim {head_dim}: \
                 q {:?}, k {:?}, v {:?}, o {:?}",
                q_proj.dims(),
                k_proj.dims(),
                v_proj.dims(),
                o_proj.dims()
            )));
        }

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads,
            num_kv_heads,
            head_dim,
            hidden_size,
        })
    }

    /// Forward pass computing Q, K, V projections.
    ///
    /// Returns (query, key, value) tensors reshaped for attention:
    /// - query: [batch, num_heads, seq_len, head_dim]
    /// - key: [batch, num_kv_heads, seq_len, head_dim]
    /// - value: [batch, num_kv_heads, seq_len, head_dim]
    pub fn project(&self, x: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let (batch, seq_len, _) = x.dims3()?;
        let x_2d = x.reshape((batch * seq_len, self.hidden_size))?;

        let q = x_2d.matmul(&self.q_proj.t()?)?;
        let k = x_2d.matmul(&self.k_proj.t()?)?;
        let v = x_2d.matmul(&self.v_proj.t()?)?;

        // [batch, seq, heads, head_dim] -> [batch, heads, seq, head_dim]
        let q = q
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?;
        let k = k
            .reshape((batch, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;
        let v = v
            .reshape((batch, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;

        Ok((q, k, v))
    }

    /// Apply output projection after attention.
    ///
    /// Input: [batch, num_heads, seq_len, head_dim]
    /// Output: [batch, seq_len, hidden_size]
    pub fn output(&self, attn_output: &Tensor) -> Result<Tensor> {
        let (batch, _, seq_len, _) = attn_output.dims4()?;

        let x = attn_output
            .transpose(1, 2)?
            .reshape((batch * seq_len, self.num_heads * self.head_dim))?;
        let out = x.matmul(&self.o_proj.t()?)?;

        Ok(out.reshape((batch, seq_len, self.hidden_size))?)
    }

    /// Get the number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Get the number of KV heads.
    pub fn num_kv_heads(&self) -> usize {
        self.num_kv_heads
    }

    /// Get the head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}

/// Per-model attention knobs shared by every layer.
#[derive(Debug, Clone, Copy)]
pub struct AttentionParams {
    /// Multiplier applied to queries.
    pub query_scale: f64,
    /// Soft cap on attention logits, if any.
    pub logit_softcap: Option<f64>,
}

impl AttentionParams {
    /// Knobs from a model config.
    pub fn from_config(config: &ModelConfig) -> Self {
        Self {
            query_scale: config.query_pre_attention_scalar(),
            logit_softcap: config.attn_logit_softcapping,
        }
    }
}

/// A single transformer decoder layer.
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    /// Pre-attention layer norm.
    input_layernorm: RmsNorm,
    /// Self-attention.
    attention: Attention,
    /// Norm on the attention output.
    post_attention_layernorm: Option<RmsNorm>,
    /// Pre-MLP layer norm.
    pre_feedforward_layernorm: RmsNorm,
    /// Norm on the MLP output.
    post_feedforward_layernorm: Option<RmsNorm>,
    /// MLP.
    mlp: GatedMlp,
    /// Attention span.
    attention_type: AttentionType,
    /// Layer index.
    layer_idx: usize,
}

impl DecoderLayer {
    /// Build layer `layer_idx` from its parameter subtree.
    ///
    /// Expects HF-style names relative to the layer: `input_layernorm/weight`,
    /// `self_attn/{q,k,v,o}_proj/weight`, `pre_feedforward_layernorm/weight`,
    /// `mlp/{gate,up,down}_proj/weight`, and optionally
    /// `post_attention_layernorm/weight` and `post_feedforward_layernorm/weight`.
    /// Norm weights are stored centred on zero.
    pub fn from_parameters(params: &StateTree<Tensor>, config: &ModelConfig, layer_idx: usize) -> Result<Self> {
        let eps = config.rms_norm_eps;
        let norm = |name: &str| -> Result<RmsNorm> {
            RmsNorm::unit_offset(params.get([name, "weight"])?, eps)
        };
        let optional_norm = |name: &str| -> Result<Option<RmsNorm>> {
            match params.get([name, "weight"]) {
                Ok(scale) => Ok(Some(RmsNorm::unit_offset(scale, eps)?)),
                Err(crate::error::LookupError::Missing { .. }) => Ok(None),
                Err(e) => Err(e.into()),
            }
        };
        let weight = |group: &str, name: &str| -> Result<Tensor> {
            Ok(params.get([group, name, "weight"])?.to_dtype(DType::F32)?)
        };

        let attention = Attention::new(
            weight("self_attn", "q_proj")?,
            weight("self_attn", "k_proj")?,
            weight("self_attn", "v_proj")?,
            weight("self_attn", "o_proj")?,
            config.num_attention_heads,
            config.num_key_value_heads,
            config.head_dim(),
        )?;
        let mlp = GatedMlp::new(
            weight("mlp", "gate_proj")?,
            weight("mlp", "up_proj")?,
            weight("mlp", "down_proj")?,
        )?;

        Ok(Self {
            input_layernorm: norm("input_layernorm")?,
            attention,
            post_attention_layernorm: optional_norm("post_attention_layernorm")?,
            pre_feedforward_layernorm: norm("pre_feedforward_layernorm")?,
            post_feedforward_layernorm: optional_norm("post_feedforward_layernorm")?,
            mlp,
            attention_type: config.attention_type(layer_idx),
            layer_idx,
        })
    }

    /// Forward pass for one decode step, writing the new keys and values
    /// into the layer's rotating cache.
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - Input tensor [batch, seq_len, hidden_size]
    /// * `rope` - Rotary position embeddings
    /// * `positions` - Positions of the new tokens [batch, seq_len]
    /// * `cache` - This layer's cache subtree (`keys`, `values`, `cursor`)
    /// * `mask` - Visibility over cache slots [batch, seq_len, capacity], u8
    /// * `params` - Query scaling and logit soft cap
    ///
    /// # Returns
    ///
    /// Output hidden states [batch, seq_len, hidden_size] and the cache update.
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        rope: &RotaryEmbedding,
        positions: &Tensor,
        cache: &StateTree<Tensor>,
        mask: &Tensor,
        params: &AttentionParams,
    ) -> Result<(Tensor, SlotUpdate)> {
        let seq_len = hidden_states.dim(1)?;

        let normed = self.input_layernorm.forward(hidden_states)?;
        let (q, k, v) = self.attention.project(&normed)?;
        let (q, k) = rope.apply(&q, &k, positions)?;
        let q = (q * params.query_scale)?;

        // Cache buffers are [batch, slot, kv_heads, head_dim].
        let update = write_slot(
            cache,
            &k.transpose(1, 2)?.contiguous()?,
            &v.transpose(1, 2)?.contiguous()?,
            seq_len,
        )?;
        let full_k = update.keys.to_dtype(DType::F32)?.transpose(1, 2)?.contiguous()?;
        let full_v = update.values.to_dtype(DType::F32)?.transpose(1, 2)?.contiguous()?;

        let attn_output = self.compute_attention(&q, &full_k, &full_v, mask, params)?;
        let mut attn_output = self.attention.output(&attn_output)?;
        if let Some(norm) = &self.post_attention_layernorm {
            attn_output = norm.forward(&attn_output)?;
        }
        let hidden_states = (hidden_states + attn_output)?;

        let normed = self.pre_feedforward_layernorm.forward(&hidden_states)?;
        let mut mlp_output = self.mlp.forward(&normed)?;
        if let Some(norm) = &self.post_feedforward_layernorm {
            mlp_output = norm.forward(&mlp_output)?;
        }
        let output = (hidden_states + mlp_output)?;

        Ok((output, update))
    }

    /// Scaled dot-product attention over every cache slot.
    fn compute_attention(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: &Tensor,
        params: &AttentionParams,
    ) -> Result<Tensor> {
        let repeat = self.attention.num_heads() / self.attention.num_kv_heads();
        let k = repeat_kv(k, repeat)?;
        let v = repeat_kv(v, repeat)?;

        // [batch, heads, seq, capacity]
        let scores = q.contiguous()?.matmul(&k.transpose(2, 3)?.contiguous()?)?;
        let scores = match params.logit_softcap {
            Some(cap) if cap > 0.0 => ((scores / cap)?.tanh()? * cap)?,
            _ => scores,
        };

        let visible = mask.unsqueeze(1)?.broadcast_as(scores.shape())?;
        let fill = Tensor::full(LOGITS_MASK, scores.shape(), scores.device())?;
        let scores = visible.where_cond(&scores, &fill)?;

        let attn_weights = candle_nn::ops::softmax(&scores, candle_core::D::Minus1)?;
        Ok(attn_weights.matmul(&v)?)
    }

    /// Get the layer index.
    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }

    /// Attention span of this layer.
    pub fn attention_type(&self) -> AttentionType {
        self.attention_type
    }

    /// Get the attention module.
    pub fn attention(&self) -> &Attention {
        &self.attention
    }
}

/// Repeat KV heads for GQA.
fn repeat_kv(x: &Tensor, repeat: usize) -> Result<Tensor> {
    if repeat == 1 {
        return Ok(x.clone());
    }
    let (batch, num_kv_heads, seq_len, head_dim) = x.dims4()?;

    // [batch, kv_heads, seq, head_dim] -> [batch, kv_heads, repeat, seq, head_dim]
    let x = x
        .unsqueeze(2)?
        .expand(&[batch, num_kv_heads, repeat, seq_len, head_dim])?;
    Ok(x.reshape((batch, num_kv_heads * repeat, seq_len, head_dim))?)
}

/// Random parameters of one layer, HF-style names relative to the layer.
pub(crate) fn random_layer_parameters(config: &ModelConfig, device: &Device) -> Result<StateTree<Tensor>> {
    let hidden = config.hidden_size;
    let q_out = config.num_attention_heads * config.head_dim();
    let kv_out = config.num_key_value_heads * config.head_dim();
    let inter = config.intermediate_size;

    let mut params = StateTree::new_branch();
    for (group, name, dims) in [
        ("self_attn", "q_proj", [q_out, hidden]),
        ("self_attn", "k_proj", [kv_out, hidden]),
        ("self_attn", "v_proj", [kv_out, hidden]),
        ("self_attn", "o_proj", [hidden, q_out]),
        ("mlp", "gate_proj", [inter, hidden]),
        ("mlp", "up_proj", [inter, hidden]),
        ("mlp", "down_proj", [hidden, inter]),
    ] {
        params.set([group, name, "weight"], Tensor::randn(0.0f32, 0.02, &dims, device)?)?;
    }
    for norm in [
        "input_layernorm",
        "post_attention_layernorm",
        "pre_feedforward_layernorm",
        "post_feedforward_layernorm",
    ] {
        params.set([norm, "weight"], Tensor::zeros(hidden, DType::F32, device)?)?;
    }
    Ok(params)
}
