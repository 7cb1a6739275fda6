//! The autoregressive decode state machine.

use super::config::DecodeConfig;
use super::mask::SlotVisibility;
use super::state::{DecodePhase, GenerationState};
use crate::cache::RotatingCache;
use crate::engine::{ComputeEngine, StepInput};
use crate::error::{ArborError, Result, ShapeError};
use candle_core::Tensor;
use std::ops::ControlFlow;

/// Drives a [`ComputeEngine`] one token at a time over a batch of prompts.
///
/// ```rust,ignore
/// let machine = DecodeStateMachine::new(engine, config);
/// let state = machine.initialize(&[vec![17, 42]], 32)?;
/// let state = machine.run(state)?;
/// let rows = machine.decode(&state);
/// ```
#[derive(Debug, Clone)]
pub struct DecodeStateMachine<E> {
    engine: E,
    config: DecodeConfig,
}

impl<E: ComputeEngine> DecodeStateMachine<E> {
    /// Create a machine around `engine`.
    pub fn new(engine: E, config: DecodeConfig) -> Self {
        Self { engine, config }
    }

    /// The compute engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The decode configuration.
    pub fn config(&self) -> &DecodeConfig {
        &self.config
    }

    /// Lay out the token buffer and allocate a fresh cache.
    ///
    /// Each row is `[bos, prompt..., pad...]` with room for
    /// `max_new_tokens` plus one trailing column.
    pub fn initialize(&self, prompts: &[Vec<u32>], max_new_tokens: usize) -> Result<GenerationState> {
        if prompts.is_empty() {
            return Err(ArborError::InvalidInput("prompt batch is empty".into()));
        }

        let batch_size = prompts.len();
        let input_lengths: Vec<usize> = prompts.iter().map(Vec::len).collect();
        let max_input = input_lengths.iter().copied().max().unwrap_or(0);
        let total_length = max_input + max_new_tokens + 2;

        let special = self.config.special;
        let mut tokens = vec![special.pad; batch_size * total_length];
        for (row, prompt) in prompts.iter().enumerate() {
            let start = row * total_length;
            tokens[start] = special.bos;
            tokens[start + 1..start + 1 + prompt.len()].copy_from_slice(prompt);
        }

        let cache = RotatingCache::new(&self.config.cache_config(batch_size), &self.config.device)?;

        let all_done = total_length - 2 == 0;
        let phase = if all_done {
            DecodePhase::Finished
        } else {
            DecodePhase::Initializing
        };

        tracing::debug!(batch_size, total_length, max_new_tokens, "initialized generation");

        Ok(GenerationState {
            tokens,
            batch_size,
            total_length,
            input_lengths,
            step: 0,
            done: vec![false; batch_size],
            all_done,
            phase,
            cache,
        })
    }

    /// Advance every row by one column.
    ///
    /// Prompt tokens are fed through unchanged; the engine's prediction is
    /// only written into padding of rows that are still running. Stepping a
    /// finished generation returns it untouched.
    pub fn step(&self, state: GenerationState) -> Result<GenerationState> {
        if state.phase == DecodePhase::Finished {
            tracing::warn!(step = state.step, "step on finished generation ignored");
            return Ok(state);
        }

        let position = state.position(state.step)?;

        let GenerationState {
            mut tokens,
            batch_size,
            total_length,
            input_lengths,
            step,
            mut done,
            cache,
            ..
        } = state;

        let device = &self.config.device;
        let current: Vec<u32> = (0..batch_size)
            .map(|row| tokens[row * total_length + step])
            .collect();
        let token_input = Tensor::from_vec(current, (batch_size, 1), device)?;
        let positions = Tensor::from_vec(vec![position; batch_size], (batch_size, 1), device)?;

        let masks = SlotVisibility {
            step,
            capacity: self.config.cache_capacity,
            window: self.config.sliding_window,
        }
        .to_masks(batch_size, device)?;

        let cache_config = cache.config().clone();
        let shape = cache.shape_handle();
        let output = self.engine.step(StepInput {
            tokens: token_input,
            positions,
            cache: cache.into_values(),
            shape: &shape,
            masks: &masks,
            step,
        })?;

        if output.next_tokens.len() != batch_size {
            return Err(ShapeError::LengthMismatch {
                expected: batch_size,
                actual: output.next_tokens.len(),
            }
            .into());
        }
        let cache = RotatingCache::from_values(cache_config, shape, output.cache)?;

        let special = self.config.special;
        let next = step + 1;
        for (row, &predicted) in output.next_tokens.iter().enumerate() {
            let slot = &mut tokens[row * total_length + next];
            if !done[row] && *slot == special.pad {
                *slot = predicted;
            }
            done[row] |= *slot == special.eos;
        }

        let step = next;
        let all_done = done.iter().all(|&d| d) || step >= total_length - 2;
        let phase = if all_done {
            DecodePhase::Finished
        } else {
            DecodePhase::Stepping
        };

        Ok(GenerationState {
            tokens,
            batch_size,
            total_length,
            input_lengths,
            step,
            done,
            all_done,
            phase,
            cache,
        })
    }

    /// Step until the generation finishes.
    pub fn run(&self, state: GenerationState) -> Result<GenerationState> {
        self.run_with(state, |_| ControlFlow::Continue(()))
    }

    /// Step until the generation finishes or `observer` breaks.
    ///
    /// The observer sees the state after every completed step.
    pub fn run_with<F>(&self, mut state: GenerationState, mut observer: F) -> Result<GenerationState>
    where
        F: FnMut(&GenerationState) -> ControlFlow<()>,
    {
        while !state.all_done {
            state = self.step(state)?;
            tracing::debug!(
                step = state.step,
                done = state.done.iter().filter(|&&d| d).count(),
                "decode step"
            );
            if observer(&state).is_break() {
                tracing::debug!(step = state.step, "generation stopped by observer");
                return Ok(state);
            }
        }

        tracing::info!(
            steps = state.step,
            batch_size = state.batch_size,
            "generation finished"
        );
        Ok(state)
    }

    /// Raw token rows, BOS and padding included.
    pub fn decode(&self, state: &GenerationState) -> Vec<Vec<u32>> {
        state.sequences()
    }

    /// Generated tokens of each row: after the prompt, up to the first
    /// end-of-sequence or padding id.
    pub fn continuations(&self, state: &GenerationState) -> Vec<Vec<u32>> {
        let special = self.config.special;
        (0..state.batch_size)
            .filter_map(|row| {
                let tokens = state.row(row)?;
                let start = (1 + state.input_lengths[row]).min(tokens.len());
                Some(
                    tokens[start..]
                        .iter()
                        .copied()
                        .take_while(|&t| t != special.eos && t != special.pad)
                        .collect(),
                )
            })
            .collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::engine::StepOutput;
    use crate::error::EngineError;
    use crate::model::SpecialTokens;
    use candle_core::{DType, Device};
    use proptest::prelude::*;

    const PAD: u32 = 0;
    const EOS: u32 = 1;

    /// Always predicts the same token.
    struct Constant(u32);

    impl ComputeEngine for Constant {
        fn step(&self, input: StepInput<'_>) -> std::result::Result<StepOutput, EngineError> {
            let (batch, _) = input.tokens.dims2()?;
            Ok(StepOutput {
                logits: Tensor::zeros((batch, 4), DType::F32, &Device::Cpu)?,
                next_tokens: vec![self.0; batch],
                cache: input.cache,
            })
        }
    }

    fn create_test_machine(prediction: u32) -> DecodeStateMachine<Constant> {
        DecodeStateMachine::new(
            Constant(prediction),
            DecodeConfig {
                num_layers: 1,
                num_kv_heads: 1,
                head_dim: 2,
                cache_capacity: 4,
                sliding_window: Some(2),
                special: SpecialTokens {
                    bos: 2,
                    eos: EOS,
                    unknown: 3,
                    pad: PAD,
                },
                device: Device::Cpu,
                dtype: DType::F32,
            },
        )
    }

    prop_compose! {
        /// A prompt of ordinary ids with EOS at index 0 or 1.
        fn arb_eos_prompt()(
            mut ids in prop::collection::vec(4u32..32, 2..6),
            eos_at in 0usize..2,
        ) -> Vec<u32> {
            ids[eos_at] = EOS;
            ids
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Invariant: rows whose prompt holds EOS at index 0 or 1 finish by
        /// step 2, and done flags never clear
        #[test]
        fn invariant_eos_prompts_finish_early(
            prompts in prop::collection::vec(arb_eos_prompt(), 1..4),
            max_new_tokens in 0usize..8,
            prediction in 0u32..32,
        ) {
            let machine = create_test_machine(prediction);
            let mut state = machine.initialize(&prompts, max_new_tokens).unwrap();
            let mut previous = state.done().to_vec();
            let mut was_done = state.all_done();

            for _ in 0..100 {
                state = machine.step(state).unwrap();

                for (before, now) in previous.iter().zip(state.done()) {
                    prop_assert!(!before || *now);
                }
                prop_assert!(!was_done || state.all_done());

                previous = state.done().to_vec();
                was_done = state.all_done();
            }

            prop_assert!(state.all_done());
            prop_assert!(state.step() <= 2);
            prop_assert_eq!(state.phase(), DecodePhase::Finished);
        }

        /// Invariant: a generation never takes more steps than its budget
        #[test]
        fn invariant_budget_bounds_steps(
            prompts in prop::collection::vec(prop::collection::vec(4u32..32, 0..5), 1..4),
            max_new_tokens in 0usize..8,
            prediction in 4u32..32,
        ) {
            let machine = create_test_machine(prediction);
            let state = machine.initialize(&prompts, max_new_tokens).unwrap();
            let budget = state.max_steps();
            let state = machine.run(state).unwrap();

            prop_assert_eq!(state.step(), budget);
            prop_assert!(state.all_done());
        }
    }
}
