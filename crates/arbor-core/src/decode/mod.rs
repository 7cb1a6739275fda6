//! Autoregressive decoding.
//!
//! A generation moves through three phases:
//!
//! ```text
//! Initializing --step--> Stepping --step--> ... --> Finished
//! ```
//!
//! [`DecodeStateMachine::initialize`] lays out a `[batch, total_length]`
//! token buffer (`bos`, prompt, padding) and a fresh [`RotatingCache`].
//! Each [`step`](DecodeStateMachine::step) feeds column `step` of every row
//! to the compute engine and writes the prediction into column `step + 1`
//! unless the prompt already occupies it. A row is done once that column
//! holds the end-of-sequence id; the generation is finished when every row
//! is done or the step budget is spent.
//!
//! [`RotatingCache`]: crate::cache::RotatingCache

mod config;
mod machine;
mod mask;
mod sampler;
mod state;

pub use config::DecodeConfig;
pub use machine::DecodeStateMachine;
pub use mask::SlotVisibility;
pub use sampler::{Sampler, DEFAULT_MAX_GENERATED_TOKENS};
pub use state::{DecodePhase, GenerationState};
