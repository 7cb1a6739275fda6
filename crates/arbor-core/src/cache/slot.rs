//! Slot arithmetic and buffer writes for the rotating cache.

use super::{CURSOR, KEYS, VALUES};
use crate::error::{ArborError, Result, ShapeError};
use crate::tree::{Path, StateTree};
use candle_core::{Device, Tensor};

/// Where a write of `len` steps lands in a buffer of `capacity` slots.
///
/// The write starts at `offset = cursor mod capacity`. The first `head_len`
/// steps go to `offset..offset + head_len`; the rest wrap to the start of
/// the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPlan {
    /// Cursor before the write.
    pub cursor: usize,
    /// Storage offset of the first written step.
    pub offset: usize,
    /// Number of steps written.
    pub len: usize,
    /// Steps written before reaching the end of the buffer.
    pub head_len: usize,
    /// Cursor after the write.
    pub next_cursor: usize,
}

impl SlotPlan {
    /// Plan a write of `write_len` steps at `cursor`.
    pub fn new(cursor: usize, write_len: usize, capacity: usize) -> std::result::Result<Self, ShapeError> {
        if capacity == 0 || write_len > capacity {
            return Err(ShapeError::WriteTooLong {
                write_len,
                capacity,
            });
        }
        let offset = cursor % capacity;
        let head_len = write_len.min(capacity - offset);
        Ok(Self {
            cursor,
            offset,
            len: write_len,
            head_len,
            next_cursor: cursor + write_len,
        })
    }

    /// Whether part of the write wraps to the start of the buffer.
    pub fn wraps(&self) -> bool {
        self.head_len < self.len
    }

    /// Steps written at the start of the buffer after wrapping.
    pub fn wrapped_len(&self) -> usize {
        self.len - self.head_len
    }
}

/// New buffers for one layer after a [`write_slot`].
#[derive(Debug, Clone)]
pub struct SlotUpdate {
    /// Updated keys buffer.
    pub keys: Tensor,
    /// Updated values buffer.
    pub values: Tensor,
    /// Advanced cursor (scalar i64).
    pub cursor: Tensor,
    /// The plan the write followed.
    pub plan: SlotPlan,
}

impl SlotUpdate {
    /// Replace the `keys`, `values` and `cursor` leaves of a layer subtree.
    pub fn store(self, layer_tree: &mut StateTree<Tensor>) -> Result<()> {
        layer_tree.set([KEYS], self.keys)?;
        layer_tree.set([VALUES], self.values)?;
        layer_tree.set([CURSOR], self.cursor)?;
        Ok(())
    }
}

/// Write `write_len` steps of `new_keys` / `new_values` into a layer.
///
/// `layer_tree` is the subtree of one layer, holding `keys` and `values`
/// buffers of shape (batch, capacity, kv_heads, head_dim) and a scalar
/// `cursor`. The new slices are (batch, write_len, kv_heads, head_dim). The
/// inputs are left untouched; the returned buffers are fresh tensors.
pub fn write_slot(
    layer_tree: &StateTree<Tensor>,
    new_keys: &Tensor,
    new_values: &Tensor,
    write_len: usize,
) -> Result<SlotUpdate> {
    let keys = layer_tree.get([KEYS])?;
    let values = layer_tree.get([VALUES])?;
    let cursor = read_cursor(layer_tree.get([CURSOR])?)?;

    let capacity = keys.dim(1)?;
    let plan = SlotPlan::new(cursor, write_len, capacity)?;

    let keys = scatter(keys, new_keys, &plan, KEYS)?;
    let values = scatter(values, new_values, &plan, VALUES)?;
    let cursor = cursor_tensor(plan.next_cursor, keys.device())?;

    Ok(SlotUpdate {
        keys,
        values,
        cursor,
        plan,
    })
}

/// Read a scalar cursor tensor.
pub fn read_cursor(cursor: &Tensor) -> Result<usize> {
    let value = cursor.to_scalar::<i64>()?;
    usize::try_from(value).map_err(|_| ArborError::InvalidInput(format!("negative cursor {value}")))
}

/// Scalar i64 cursor tensor.
pub(crate) fn cursor_tensor(value: usize, device: &Device) -> Result<Tensor> {
    let value = i64::try_from(value)
        .map_err(|_| ArborError::InvalidInput(format!("cursor {value} out of range")))?;
    Ok(Tensor::new(value, device)?)
}

fn scatter(buffer: &Tensor, update: &Tensor, plan: &SlotPlan, leaf: &str) -> Result<Tensor> {
    let (batch, _, kv_heads, head_dim) = buffer.dims4()?;
    let expected = vec![batch, plan.len, kv_heads, head_dim];
    if update.dims() != expected.as_slice() {
        return Err(ShapeError::DimensionMismatch {
            path: Path::from([leaf]),
            expected,
            actual: update.dims().to_vec(),
        }
        .into());
    }
    if plan.len == 0 {
        return Ok(buffer.clone());
    }

    let update = update.to_dtype(buffer.dtype())?;
    let head = update.narrow(1, 0, plan.head_len)?;
    let mut out = buffer.slice_scatter(&head, 1, plan.offset)?;
    if plan.wraps() {
        let tail = update.narrow(1, plan.head_len, plan.wrapped_len())?;
        out = out.slice_scatter(&tail, 1, 0)?;
    }
    Ok(out.contiguous()?)
}
