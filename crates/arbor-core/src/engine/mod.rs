//! Compute engines.
//!
//! The decode loop talks to a model only through [`ComputeEngine`]: one call
//! per step, cache buffers moved in and handed back.
//! - [`ReferenceEngine`] - CPU reference decoder for testing and examples

mod backend;
mod reference;

pub use backend::{greedy, ComputeEngine, StepInput, StepMasks, StepOutput};
pub use reference::ReferenceEngine;
