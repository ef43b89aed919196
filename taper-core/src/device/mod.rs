//! Device abstraction: tensor allocation plus the kernel entry points the
//! function layer dispatches to. The graph depends on this contract only,
//! never on a concrete backend.

use crate::error::TaperError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod naive;

pub use naive::Naive;

/// Identity of a device instance. Tensors are stamped with the id of the
/// device that allocated them; kernels compare stamps and fail with
/// [`TaperError::DeviceMismatch`] on a foreign tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

impl DeviceId {
    pub(crate) fn fresh() -> Self {
        DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Kernel dispatch contract between the graph/function layer and a backend.
///
/// All tensor math in the engine funnels through these entry points. Every
/// kernel verifies that its operands were allocated by `self` before touching
/// their buffers. Elementwise binary kernels implement full broadcasting over
/// both explicit dimensions and batch.
pub trait Device {
    fn id(&self) -> DeviceId;
    fn name(&self) -> &'static str;

    // --- allocation ---

    /// Allocates a zero-filled tensor of `shape`.
    fn new_tensor(&self, shape: &Shape) -> Tensor;

    /// Allocates a tensor of `shape` with every element set to `k`.
    fn new_tensor_filled(&self, shape: &Shape, k: f32) -> Tensor;

    /// Wraps `data` as a tensor of `shape`; the length must match
    /// `shape.size()` exactly.
    fn new_tensor_by_vec(&self, shape: &Shape, data: Vec<f32>) -> Result<Tensor, TaperError>;

    // --- elementwise, tensor-tensor (broadcasting) ---

    fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError>;
    fn subtract(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError>;
    fn multiply(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError>;
    fn divide(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError>;

    // --- elementwise, tensor-constant ---

    fn add_const(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;
    /// `k - x`
    fn subtract_const_l(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;
    /// `x - k`
    fn subtract_const_r(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;
    fn multiply_const(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;
    /// `k / x`
    fn divide_const_l(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;
    /// `x / k`
    fn divide_const_r(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;
    fn negate(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    /// 1 where `x > k`, 0 elsewhere.
    fn gt_const(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError>;

    // --- linear algebra / structure ---

    fn matmul(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError>;
    fn transpose(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn concat(&self, xs: &[&Tensor], axis: usize) -> Result<Tensor, TaperError>;
    /// Sub-range `[lo, hi)` of `x` along `axis`.
    fn slice(&self, x: &Tensor, axis: usize, lo: usize, hi: usize) -> Result<Tensor, TaperError>;
    fn pick(&self, x: &Tensor, axis: usize, ids: &[usize]) -> Result<Tensor, TaperError>;
    /// Scatter-add of `gy` back through a pick: the adjoint of [`Device::pick`].
    fn pick_backward(
        &self,
        gy: &Tensor,
        axis: usize,
        ids: &[usize],
        x_shape: &Shape,
    ) -> Result<Tensor, TaperError>;
    /// Repeats `x` (whose `axis` dimension must be 1) `size` times along `axis`.
    fn broadcast(&self, x: &Tensor, axis: usize, size: usize) -> Result<Tensor, TaperError>;

    // --- reductions ---

    fn sum(&self, x: &Tensor, axis: usize) -> Result<Tensor, TaperError>;
    fn batch_sum(&self, x: &Tensor) -> Result<Tensor, TaperError>;

    // --- elementwise math ---

    fn exp(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn ln(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn sqrt(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn tanh(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn sigmoid(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn relu(&self, x: &Tensor) -> Result<Tensor, TaperError>;
    fn softmax(&self, x: &Tensor, axis: usize) -> Result<Tensor, TaperError>;
    fn log_softmax(&self, x: &Tensor, axis: usize) -> Result<Tensor, TaperError>;

    // --- sampling ---

    /// Each element is 1 with probability `p`, else 0. `p` must lie in [0, 1].
    fn random_bernoulli(&self, shape: &Shape, p: f32) -> Result<Tensor, TaperError>;
    /// Uniform samples from [lower, upper); requires `lower < upper`.
    fn random_uniform(&self, shape: &Shape, lower: f32, upper: f32)
        -> Result<Tensor, TaperError>;
    /// Normal samples with the given mean and standard deviation (`sd >= 0`).
    fn random_normal(&self, shape: &Shape, mean: f32, sd: f32) -> Result<Tensor, TaperError>;

    // --- gradient accumulation ---

    /// Adds `src` into `dst` in place. Where `dst` has a dimension (or batch)
    /// of 1 and `src` is larger, contributions along that extent are summed
    /// into the single slot; where `src` has the 1, its value is broadcast
    /// into every `dst` slot. This is the one mutating kernel and backs every
    /// gradient accumulation in the engine: it adds, never overwrites.
    fn accumulate(&self, dst: &mut Tensor, src: &Tensor) -> Result<(), TaperError>;
}
