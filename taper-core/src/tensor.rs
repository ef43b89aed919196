use crate::device::DeviceId;
use crate::shape::Shape;

/// A contiguous, row-major buffer of `f32` values together with the [`Shape`]
/// describing its layout.
///
/// Tensors are allocated by a [`Device`](crate::device::Device) and stamped
/// with that device's id for the rest of their lifetime; kernels refuse
/// operands carrying a foreign stamp. The buffer has exactly one owner at any
/// time: passing a `Tensor` by value transfers ownership, which is the Rust
/// rendering of the move-only buffer protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    device: DeviceId,
    data: Vec<f32>,
}

impl Tensor {
    /// Assembles a tensor from raw parts. Devices are the only producers of
    /// tensors, so this stays crate-internal; `data.len()` must already equal
    /// `shape.size()`.
    pub(crate) fn from_parts(shape: Shape, device: DeviceId, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.size(), data.len());
        Tensor {
            shape,
            device,
            data,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Identity of the device that owns this tensor's buffer.
    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only view of the underlying buffer in row-major order, batch
    /// samples stored back to back.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Copies the buffer out as a `Vec<f32>`.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }
}
