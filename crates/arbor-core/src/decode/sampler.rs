//! Text in, text out.

use super::config::DecodeConfig;
use super::machine::DecodeStateMachine;
use crate::engine::ComputeEngine;
use crate::error::Result;
use crate::model::{ModelConfig, Vocabulary};
use candle_core::Device;

/// Default cap on generated tokens per prompt.
pub const DEFAULT_MAX_GENERATED_TOKENS: usize = 512;

/// Couples a [`DecodeStateMachine`] with a [`Vocabulary`].
#[derive(Debug)]
pub struct Sampler<E, V> {
    machine: DecodeStateMachine<E>,
    vocab: V,
    max_generated_tokens: usize,
}

impl<E: ComputeEngine, V: Vocabulary> Sampler<E, V> {
    /// Create a sampler whose special ids come from `vocab`.
    pub fn new(engine: E, vocab: V, model: &ModelConfig, device: Device) -> Self {
        let config = DecodeConfig::from_model(model, vocab.special_tokens(), device);
        Self::from_machine(DecodeStateMachine::new(engine, config), vocab)
    }

    /// Wrap an existing machine.
    pub fn from_machine(machine: DecodeStateMachine<E>, vocab: V) -> Self {
        Self {
            machine,
            vocab,
            max_generated_tokens: DEFAULT_MAX_GENERATED_TOKENS,
        }
    }

    /// Set the default number of generated tokens.
    pub fn with_max_generated_tokens(mut self, max_generated_tokens: usize) -> Self {
        self.max_generated_tokens = max_generated_tokens;
        self
    }

    /// Default number of generated tokens.
    pub fn max_generated_tokens(&self) -> usize {
        self.max_generated_tokens
    }

    /// The decode machine.
    pub fn machine(&self) -> &DecodeStateMachine<E> {
        &self.machine
    }

    /// The vocabulary.
    pub fn vocab(&self) -> &V {
        &self.vocab
    }

    /// Continue every prompt by up to [`max_generated_tokens`](Self::max_generated_tokens).
    pub fn sample<S: AsRef<str>>(&self, prompts: &[S]) -> Result<Vec<String>> {
        self.sample_max_tokens(prompts, self.max_generated_tokens)
    }

    /// Continue every prompt by up to `max_tokens` tokens.
    ///
    /// Returns one string per prompt holding only the generated text.
    pub fn sample_max_tokens<S: AsRef<str>>(&self, prompts: &[S], max_tokens: usize) -> Result<Vec<String>> {
        let ids = prompts
            .iter()
            .map(|prompt| self.vocab.encode(prompt.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let state = self.machine.initialize(&ids, max_tokens)?;
        let state = self.machine.run(state)?;

        self.machine
            .continuations(&state)
            .iter()
            .map(|row| self.vocab.decode(row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{StepInput, StepOutput};
    use crate::error::{ArborError, EngineError};
    use candle_core::{DType, Tensor};

    /// Lowercase letters are ids 4..30; 0..4 are pad, eos, bos, unknown.
    struct Letters;

    impl Vocabulary for Letters {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            text.chars()
                .map(|c| match c {
                    'a'..='z' => Ok(c as u32 - 'a' as u32 + 4),
                    _ => Err(ArborError::Tokenizer(format!("no id for {c:?}"))),
                })
                .collect()
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
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

    /// Echoes the fed token shifted by one letter, ending with EOS after 'e'.
    struct NextLetter;

    impl ComputeEngine for NextLetter {
        fn step(&self, input: StepInput<'_>) -> std::result::Result<StepOutput, EngineError> {
            let fed: Vec<u32> = input.tokens.flatten_all()?.to_vec1()?;
            let next_tokens = fed
                .iter()
                .map(|&t| match t {
                    8 => 1,
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

    fn create_test_sampler() -> Sampler<NextLetter, Letters> {
        let mut model = ModelConfig::gemma2_2b();
        model.num_hidden_layers = 1;
        model.num_key_value_heads = 1;
        model.head_dim = 2;
        model.max_cache_length = 8;
        Sampler::new(NextLetter, Letters, &model, Device::Cpu)
    }

    #[test]
    fn default_budget() {
        assert_eq!(create_test_sampler().max_generated_tokens(), 512);
    }

    #[test]
    fn continues_until_eos() {
        let sampler = create_test_sampler();
        let out = sampler.sample(&["ab", "c"]).unwrap();
        assert_eq!(out, vec!["cde".to_string(), "de".to_string()]);
    }

    #[test]
    fn max_tokens_truncates() {
        let sampler = create_test_sampler().with_max_generated_tokens(1);
        let out = sampler.sample(&["a"]).unwrap();
        assert_eq!(out, vec!["b".to_string()]);
    }

    #[test]
    fn encode_failure_propagates() {
        let sampler = create_test_sampler();
        let err = sampler.sample_max_tokens(&["A"], 4).unwrap_err();
        assert!(matches!(err, ArborError::Tokenizer(_)));
    }
}
