//! Slot visibility masks for one decode step.

use crate::engine::StepMasks;
use crate::error::Result;
use candle_core::{Device, Tensor};

/// Which cache slots the current step may attend to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotVisibility {
    /// Step being decoded.
    pub step: usize,
    /// Slots per cache buffer.
    pub capacity: usize,
    /// Sliding window length, if any layer slides.
    pub window: Option<usize>,
}

impl SlotVisibility {
    /// Causal visibility: every slot already written, including this step's.
    pub fn causal(&self) -> Vec<u8> {
        (0..self.capacity).map(|slot| u8::from(slot <= self.step)).collect()
    }

    /// Causal visibility restricted to the last `window` steps.
    ///
    /// The band is computed on raw slot indices. Once the cursor wraps past
    /// the capacity, slots are no longer in step order and the band does not
    /// follow them, so sliding layers should be used with a capacity at
    /// least as long as the generation.
    pub fn sliding(&self, window: usize) -> Vec<u8> {
        (0..self.capacity)
            .map(|slot| u8::from(slot <= self.step && self.step - slot < window))
            .collect()
    }

    /// Build u8 [batch, 1, capacity] masks on `device`.
    ///
    /// Every row shares the same step, so rows are identical.
    pub fn to_masks(&self, batch_size: usize, device: &Device) -> Result<StepMasks> {
        let causal = broadcast_rows(self.causal(), batch_size, device)?;
        let sliding = match self.window {
            Some(window) => Some(broadcast_rows(self.sliding(window), batch_size, device)?),
            None => None,
        };
        Ok(StepMasks { causal, sliding })
    }
}

fn broadcast_rows(row: Vec<u8>, batch_size: usize, device: &Device) -> Result<Tensor> {
    let capacity = row.len();
    Ok(Tensor::from_vec(row, (1, 1, capacity), device)?
        .broadcast_as((batch_size, 1, capacity))?
        .contiguous()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_visibility(step: usize, window: Option<usize>) -> SlotVisibility {
        SlotVisibility {
            step,
            capacity: 6,
            window,
        }
    }

    #[test]
    fn causal_opens_one_slot_per_step() {
        assert_eq!(create_test_visibility(0, None).causal(), vec![1, 0, 0, 0, 0, 0]);
        assert_eq!(create_test_visibility(2, None).causal(), vec![1, 1, 1, 0, 0, 0]);
        assert_eq!(create_test_visibility(9, None).causal(), vec![1; 6]);
    }

    #[test]
    fn sliding_band_trails_the_step() {
        let visibility = create_test_visibility(4, Some(2));
        assert_eq!(visibility.sliding(2), vec![0, 0, 0, 1, 1, 0]);
    }

    #[test]
    fn sliding_band_does_not_follow_wraparound() {
        // Step 7 was written to slot 1, but the band only looks at slots 6 and 7.
        let visibility = create_test_visibility(7, Some(2));
        assert_eq!(visibility.sliding(2), vec![0; 6]);
    }

    #[test]
    fn masks_have_batch_rows() {
        let masks = create_test_visibility(1, Some(1))
            .to_masks(3, &Device::Cpu)
            .unwrap();

        assert_eq!(masks.causal.dims(), &[3, 1, 6]);
        let sliding: Vec<u8> = masks.sliding.unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(&sliding[6..12], &[0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn no_window_no_sliding_mask() {
        let masks = create_test_visibility(0, None).to_masks(1, &Device::Cpu).unwrap();
        assert!(masks.sliding.is_none());
    }
}
