//! High-level batched generator.

use anyhow::{Context, Result};
use arbor_core::{
    decode::{DecodeConfig, DecodeStateMachine, DEFAULT_MAX_GENERATED_TOKENS},
    engine::{ComputeEngine, ReferenceEngine},
    model::{ModelConfig, Tokenizer, Vocabulary},
};
use candle_core::Device;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

type SharedMachine = DecodeStateMachine<Arc<dyn ComputeEngine>>;

/// Configuration for the generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Path to a JSON model configuration.
    pub config_path: Option<PathBuf>,
    /// Directory holding `tokenizer.json`.
    pub tokenizer_dir: Option<PathBuf>,
    /// Default number of generated tokens per prompt.
    pub max_generated_tokens: usize,
    /// Cache capacity override; the model's `max_cache_length` otherwise.
    pub cache_capacity: Option<usize>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            tokenizer_dir: None,
            max_generated_tokens: DEFAULT_MAX_GENERATED_TOKENS,
            cache_capacity: None,
        }
    }
}

/// Builder for creating a [`Generator`].
pub struct GeneratorBuilder {
    config: GeneratorConfig,
    model_config: Option<ModelConfig>,
    engine: Option<Arc<dyn ComputeEngine>>,
    vocabulary: Option<Arc<dyn Vocabulary>>,
    device: Device,
}

impl GeneratorBuilder {
    /// Create a new generator builder.
    pub fn new() -> Self {
        Self {
            config: GeneratorConfig::default(),
            model_config: None,
            engine: None,
            vocabulary: None,
            device: Device::Cpu,
        }
    }

    /// Set model configuration directly.
    pub fn model_config(mut self, config: ModelConfig) -> Self {
        self.model_config = Some(config);
        self
    }

    /// Load the model configuration from a JSON file.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    /// Load the tokenizer from a model directory.
    pub fn tokenizer_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tokenizer_dir = Some(path.into());
        self
    }

    /// Use an existing vocabulary.
    pub fn vocabulary(mut self, vocabulary: impl Vocabulary + 'static) -> Self {
        self.vocabulary = Some(Arc::new(vocabulary));
        self
    }

    /// Use an existing compute engine instead of a random reference engine.
    ///
    /// The reference engine needs `model_config` or `config_path`.
    pub fn engine(mut self, engine: impl ComputeEngine + 'static) -> Self {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Set the default number of generated tokens.
    pub fn max_generated_tokens(mut self, n: usize) -> Self {
        self.config.max_generated_tokens = n;
        self
    }

    /// Override the cache capacity.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = Some(capacity);
        self
    }

    /// Set the device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Build the generator.
    pub async fn build(self) -> Result<Generator> {
        let model_config = match (self.model_config, &self.config.config_path) {
            (Some(config), _) => Some(config),
            (None, Some(path)) => Some(
                ModelConfig::from_file(path)
                    .with_context(|| format!("loading model config from {}", path.display()))?,
            ),
            (None, None) => None,
        };
        if let Some(config) = &model_config {
            config.validate()?;
        }

        let vocabulary: Arc<dyn Vocabulary> = match (self.vocabulary, &self.config.tokenizer_dir) {
            (Some(vocabulary), _) => vocabulary,
            (None, Some(dir)) => Arc::new(
                Tokenizer::from_dir(dir)
                    .with_context(|| format!("loading tokenizer from {}", dir.display()))?,
            ),
            (None, None) => anyhow::bail!("no vocabulary: set tokenizer_dir or vocabulary"),
        };

        let (engine, model_config): (Arc<dyn ComputeEngine>, ModelConfig) =
            match (self.engine, model_config) {
                (Some(engine), Some(config)) => (engine, config),
                (Some(engine), None) => {
                    tracing::warn!("no model config given, assuming the Gemma 2 2B layout for the cache");
                    (engine, ModelConfig::default())
                }
                (None, Some(config)) => {
                    tracing::info!(
                        variant = ?config.variant(),
                        num_layers = config.num_hidden_layers,
                        "no engine given, using reference engine with random weights"
                    );
                    let engine_config = config.clone();
                    let device = self.device.clone();
                    let engine = tokio::task::spawn_blocking(move || {
                        ReferenceEngine::random(engine_config, &device)
                    })
                    .await??;
                    (Arc::new(engine), config)
                }
                (None, None) => anyhow::bail!(
                    "a model config is required for the reference engine: set model_config or config_path"
                ),
            };

        let mut decode_config =
            DecodeConfig::from_model(&model_config, vocabulary.special_tokens(), self.device);
        if let Some(capacity) = self.config.cache_capacity {
            decode_config = decode_config.with_cache_capacity(capacity);
        }

        Ok(Generator {
            config: self.config,
            model_config,
            machine: Arc::new(DecodeStateMachine::new(engine, decode_config)),
            vocabulary,
            stats: Arc::new(Mutex::new(GenerationStats::default())),
        })
    }
}

impl Default for GeneratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Batched text generator.
pub struct Generator {
    config: GeneratorConfig,
    model_config: ModelConfig,
    machine: Arc<SharedMachine>,
    vocabulary: Arc<dyn Vocabulary>,
    stats: Arc<Mutex<GenerationStats>>,
}

impl Generator {
    /// Create a new generator builder.
    pub fn builder() -> GeneratorBuilder {
        GeneratorBuilder::new()
    }

    /// Get generator configuration.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Get model configuration.
    pub fn model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    /// Get decode configuration.
    pub fn decode_config(&self) -> &DecodeConfig {
        self.machine.config()
    }

    /// Generate continuations for a batch of prompts.
    pub fn generate<I, S>(&self, prompts: I) -> GenerateRequest<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GenerateRequest {
            generator: self,
            prompts: prompts.into_iter().map(Into::into).collect(),
            max_tokens: self.config.max_generated_tokens,
        }
    }

    /// Cumulative statistics over all finished generations.
    pub fn stats(&self) -> GenerationStats {
        self.stats.lock().clone()
    }
}

/// A generation request.
pub struct GenerateRequest<'a> {
    generator: &'a Generator,
    prompts: Vec<String>,
    max_tokens: usize,
}

impl<'a> GenerateRequest<'a> {
    /// Set maximum tokens to generate.
    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    /// Execute the generation on a blocking worker thread.
    ///
    /// Returns one result per prompt, in prompt order.
    pub async fn execute(self) -> Result<Vec<GenerateResult>> {
        let machine = Arc::clone(&self.generator.machine);
        let vocabulary = Arc::clone(&self.generator.vocabulary);
        let prompts = self.prompts;
        let max_tokens = self.max_tokens;

        let (results, steps) =
            tokio::task::spawn_blocking(move || run_batch(&machine, vocabulary.as_ref(), &prompts, max_tokens))
                .await??;

        let mut stats = self.generator.stats.lock();
        stats.generations += 1;
        stats.sequences += results.len() as u64;
        stats.steps += steps as u64;
        stats.generated_tokens += results.iter().map(|r| r.num_generated_tokens as u64).sum::<u64>();

        Ok(results)
    }
}

fn run_batch(
    machine: &SharedMachine,
    vocabulary: &dyn Vocabulary,
    prompts: &[String],
    max_tokens: usize,
) -> Result<(Vec<GenerateResult>, usize)> {
    let ids = prompts
        .iter()
        .map(|prompt| vocabulary.encode(prompt))
        .collect::<arbor_core::Result<Vec<_>>>()?;

    let state = machine.initialize(&ids, max_tokens)?;
    let state = machine.run(state)?;

    let results = machine
        .continuations(&state)
        .into_iter()
        .zip(&ids)
        .zip(state.done())
        .map(|((tokens, prompt), &finished)| {
            Ok(GenerateResult {
                text: vocabulary.decode(&tokens)?,
                num_prompt_tokens: prompt.len(),
                num_generated_tokens: tokens.len(),
                tokens,
                finished,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((results, state.step()))
}

/// Result of text generation for one prompt.
#[derive(Debug, Clone)]
pub struct GenerateResult {
    /// Generated text.
    pub text: String,
    /// Generated token IDs.
    pub tokens: Vec<u32>,
    /// Number of prompt tokens.
    pub num_prompt_tokens: usize,
    /// Number of generated tokens.
    pub num_generated_tokens: usize,
    /// Whether the sequence ended with an end-of-sequence token.
    pub finished: bool,
}

/// Cumulative generation statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationStats {
    /// Completed `execute` calls.
    pub generations: u64,
    /// Sequences generated.
    pub sequences: u64,
    /// Decode steps taken.
    pub steps: u64,
    /// Tokens generated.
    pub generated_tokens: u64,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("config", &self.config)
            .field("model_config", &self.model_config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::engine::{StepInput, StepOutput};
    use arbor_core::error::EngineError;
    use arbor_core::model::AttentionType;
    use arbor_core::ArborError;
    use candle_core::{DType, Tensor};

    /// Lowercase letters are ids 4..30; 0..4 are pad, eos, bos, unknown.
    struct Letters;

    impl Vocabulary for Letters {
        fn encode(&self, text: &str) -> arbor_core::Result<Vec<u32>> {
            text.chars()
                .map(|c| match c {
                    'a'..='z' => Ok(c as u32 - 'a' as u32 + 4),
                    _ => Err(ArborError::Tokenizer(format!("no id for {c:?}"))),
                })
                .collect()
        }

        fn decode(&self, ids: &[u32]) -> arbor_core::Result<String> {
            Ok(ids
                .iter()
                .filter(|&&id| id >= 4)
                .filter_map(|&id| char::from_u32(id - 4 + 'a' as u32))
                .collect())
        }

        fn bos_id(&self) -> u32 {
            2
        }
        fn eos_id(&self) -> u32 {
            1
        }
        fn unknown_id(&self) -> u32 {
            3
        }
        fn pad_id(&self) -> u32 {
            0
        }
    }

    /// Predicts the letter after the fed one and EOS after 'z'.
    struct NextLetter;

    impl ComputeEngine for NextLetter {
        fn step(&self, input: StepInput<'_>) -> std::result::Result<StepOutput, EngineError> {
            let fed: Vec<u32> = input.tokens.flatten_all()?.to_vec1()?;
            let next_tokens = fed
                .iter()
                .map(|&t| match t {
                    29 => 1,
                    t if t >= 4 => t + 1,
                    _ => 4,
                })
                .collect::<Vec<_>>();
            Ok(StepOutput {
                logits: Tensor::zeros((fed.len(), 30), DType::F32, &Device::Cpu)?,
                next_tokens,
                cache: input.cache,
            })
        }
    }

    fn create_test_model() -> ModelConfig {
        ModelConfig {
            vocab_size: 30,
            hidden_size: 16,
            intermediate_size: 32,
            num_attention_heads: 2,
            num_key_value_heads: 1,
            num_hidden_layers: 2,
            max_position_embeddings: 64,
            rms_norm_eps: 1e-6,
            rope_theta: 10_000.0,
            head_dim: 8,
            max_cache_length: 32,
            attention_types: vec![AttentionType::LocalSliding, AttentionType::Global],
            sliding_window: Some(16),
            attn_logit_softcapping: Some(50.0),
            final_logit_softcapping: Some(30.0),
            query_pre_attention_norm: Default::default(),
            model_type: "test".to_string(),
        }
    }

    async fn create_test_generator() -> Generator {
        Generator::builder()
            .model_config(create_test_model())
            .vocabulary(Letters)
            .engine(NextLetter)
            .max_generated_tokens(8)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.max_generated_tokens, 512);
        assert!(config.cache_capacity.is_none());
    }

    #[tokio::test]
    async fn generates_per_prompt() {
        let generator = create_test_generator().await;
        let results = generator.generate(["abc", "x"]).execute().await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "defghijk");
        assert_eq!(results[0].num_prompt_tokens, 3);
        assert!(!results[0].finished);
        assert_eq!(results[1].text, "yz");
        assert_eq!(results[1].num_generated_tokens, 2);
        assert!(results[1].finished);
    }

    #[tokio::test]
    async fn max_tokens_per_request() {
        let generator = create_test_generator().await;
        let results = generator.generate(["m"]).max_tokens(3).execute().await.unwrap();
        assert_eq!(results[0].text, "nop");
        assert_eq!(results[0].tokens, vec![17, 18, 19]);
    }

    #[tokio::test]
    async fn stats_accumulate() {
        let generator = create_test_generator().await;
        generator.generate(["ab"]).max_tokens(2).execute().await.unwrap();
        generator.generate(["a", "b"]).max_tokens(1).execute().await.unwrap();

        let stats = generator.stats();
        assert_eq!(stats.generations, 2);
        assert_eq!(stats.sequences, 3);
        assert_eq!(stats.steps, 4 + 2);
        assert_eq!(stats.generated_tokens, 2 + 1 + 1);
    }

    #[tokio::test]
    async fn empty_batch_is_error() {
        let generator = create_test_generator().await;
        let prompts: Vec<String> = Vec::new();
        assert!(generator.generate(prompts).execute().await.is_err());
    }

    #[tokio::test]
    async fn missing_vocabulary_is_error() {
        let err = Generator::builder()
            .model_config(create_test_model())
            .engine(NextLetter)
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no vocabulary"));
    }

    #[tokio::test]
    async fn reference_engine_needs_model_config() {
        let err = Generator::builder()
            .vocabulary(Letters)
            .build()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model config is required"));
    }

    #[tokio::test]
    async fn custom_engine_without_model_config_uses_default_layout() {
        let generator = Generator::builder()
            .vocabulary(Letters)
            .engine(NextLetter)
            .cache_capacity(16)
            .build()
            .await
            .unwrap();
        assert_eq!(
            generator.decode_config().num_layers,
            ModelConfig::default().num_hidden_layers
        );
    }

    #[tokio::test]
    async fn reference_engine_by_default() {
        let generator = Generator::builder()
            .model_config(create_test_model())
            .vocabulary(Letters)
            .cache_capacity(16)
            .build()
            .await
            .unwrap();
        assert_eq!(generator.decode_config().cache_capacity, 16);

        let results = generator.generate(["hello"]).max_tokens(4).execute().await.unwrap();
        assert!(results[0].num_generated_tokens <= 4);
    }
}
