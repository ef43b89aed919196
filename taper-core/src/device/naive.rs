//! Reference CPU backend. Every kernel is a plain coordinate-mapping loop
//! over row-major buffers; correctness over speed.

use crate::device::{Device, DeviceId};
use crate::error::TaperError;
use crate::shape::{Shape, MAX_RANK};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use std::cell::RefCell;

/// The reference CPU device.
///
/// Owns a seedable RNG for the sampling kernels; `with_seed` gives
/// deterministic streams for tests. The RNG sits behind a `RefCell` because
/// sampling kernels take `&self` like every other kernel; the engine runs a
/// single logical thread per graph, so no lock is involved.
pub struct Naive {
    id: DeviceId,
    rng: RefCell<StdRng>,
}

impl Naive {
    pub fn new() -> Self {
        Naive {
            id: DeviceId::fresh(),
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Naive {
            id: DeviceId::fresh(),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn check_tensor(&self, x: &Tensor, operation: &str) -> Result<(), TaperError> {
        if x.device_id() != self.id {
            return Err(TaperError::DeviceMismatch {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn check_axis(&self, shape: &Shape, axis: usize, operation: &str) -> Result<(), TaperError> {
        if axis >= MAX_RANK {
            return Err(TaperError::InvalidAxis {
                operation: operation.to_string(),
                axis,
                shape: shape.clone(),
            });
        }
        Ok(())
    }

    /// Elementwise binary kernel with full dim + batch broadcasting.
    fn binary(
        &self,
        a: &Tensor,
        b: &Tensor,
        operation: &str,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<Tensor, TaperError> {
        self.check_tensor(a, operation)?;
        self.check_tensor(b, operation)?;
        let out = a.shape().broadcast(b.shape(), operation)?;
        let rank = out.rank();
        let out_strides = raw_strides(out.dims());
        let map_a = BroadcastMap::new(a.shape(), rank);
        let map_b = BroadcastMap::new(b.shape(), rank);
        let (da, db) = (a.data(), b.data());
        let mut data = Vec::with_capacity(out.size());
        let mut coords = vec![0usize; rank];
        for batch in 0..out.batch() {
            for i in 0..out.volume() {
                decode(i, &out_strides, &mut coords);
                data.push(f(
                    da[map_a.offset(batch, &coords)],
                    db[map_b.offset(batch, &coords)],
                ));
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    /// Elementwise unary kernel; output shape equals input shape.
    fn unary(
        &self,
        x: &Tensor,
        operation: &str,
        f: impl Fn(f32) -> f32,
    ) -> Result<Tensor, TaperError> {
        self.check_tensor(x, operation)?;
        let data = x.data().iter().map(|&v| f(v)).collect();
        Ok(Tensor::from_parts(x.shape().clone(), self.id, data))
    }

    /// Shared body of `softmax` and `log_softmax`: a stable exp-normalize
    /// sweep along `axis` for every line of the tensor.
    fn softmax_impl(&self, x: &Tensor, axis: usize, log: bool) -> Result<Tensor, TaperError> {
        let operation = if log { "log_softmax" } else { "softmax" };
        self.check_tensor(x, operation)?;
        self.check_axis(x.shape(), axis, operation)?;
        let shape = x.shape();
        let n = shape.dim(axis);
        let rank = shape.rank().max(axis + 1);
        let mut dims: Vec<usize> = (0..rank).map(|i| shape.dim(i)).collect();
        let strides = raw_strides(&dims);
        let axis_stride = strides[axis];
        // Iterate over every line: all coordinates with the axis pinned to 0.
        dims[axis] = 1;
        let outer_strides = raw_strides(&dims);
        let outer_vol: usize = dims.iter().product();
        let volume = shape.volume();
        let src = x.data();
        let mut data = vec![0.0f32; shape.size()];
        let mut coords = vec![0usize; rank];
        for batch in 0..shape.batch() {
            for o in 0..outer_vol {
                decode(o, &outer_strides, &mut coords);
                let base = batch * volume
                    + coords
                        .iter()
                        .zip(&strides)
                        .map(|(c, s)| c * s)
                        .sum::<usize>();
                let mut max = f32::NEG_INFINITY;
                for t in 0..n {
                    max = max.max(src[base + t * axis_stride]);
                }
                let mut sum = 0.0f32;
                for t in 0..n {
                    sum += (src[base + t * axis_stride] - max).exp();
                }
                for t in 0..n {
                    let off = base + t * axis_stride;
                    let centered = src[off] - max;
                    data[off] = if log {
                        centered - sum.ln()
                    } else {
                        centered.exp() / sum
                    };
                }
            }
        }
        Ok(Tensor::from_parts(shape.clone(), self.id, data))
    }

    fn sample(
        &self,
        shape: &Shape,
        mut f: impl FnMut(&mut StdRng) -> f32,
    ) -> Tensor {
        let mut rng = self.rng.borrow_mut();
        let data = (0..shape.size()).map(|_| f(&mut rng)).collect();
        Tensor::from_parts(shape.clone(), self.id, data)
    }
}

impl Default for Naive {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Naive {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn name(&self) -> &'static str {
        "naive"
    }

    fn new_tensor(&self, shape: &Shape) -> Tensor {
        Tensor::from_parts(shape.clone(), self.id, vec![0.0; shape.size()])
    }

    fn new_tensor_filled(&self, shape: &Shape, k: f32) -> Tensor {
        Tensor::from_parts(shape.clone(), self.id, vec![k; shape.size()])
    }

    fn new_tensor_by_vec(&self, shape: &Shape, data: Vec<f32>) -> Result<Tensor, TaperError> {
        if data.len() != shape.size() {
            return Err(TaperError::TensorCreation {
                data_len: data.len(),
                expected: shape.size(),
            });
        }
        Ok(Tensor::from_parts(shape.clone(), self.id, data))
    }

    fn add(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError> {
        self.binary(a, b, "add", |x, y| x + y)
    }

    fn subtract(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError> {
        self.binary(a, b, "subtract", |x, y| x - y)
    }

    fn multiply(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError> {
        self.binary(a, b, "multiply", |x, y| x * y)
    }

    fn divide(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError> {
        self.binary(a, b, "divide", |x, y| x / y)
    }

    fn add_const(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "add_const", |v| v + k)
    }

    fn subtract_const_l(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "subtract_const_l", |v| k - v)
    }

    fn subtract_const_r(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "subtract_const_r", |v| v - k)
    }

    fn multiply_const(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "multiply_const", |v| v * k)
    }

    fn divide_const_l(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "divide_const_l", |v| k / v)
    }

    fn divide_const_r(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "divide_const_r", |v| v / k)
    }

    fn negate(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "negate", |v| -v)
    }

    fn gt_const(&self, x: &Tensor, k: f32) -> Result<Tensor, TaperError> {
        self.unary(x, "gt_const", |v| if v > k { 1.0 } else { 0.0 })
    }

    fn matmul(&self, a: &Tensor, b: &Tensor) -> Result<Tensor, TaperError> {
        self.check_tensor(a, "matmul")?;
        self.check_tensor(b, "matmul")?;
        let out = a.shape().matmul(b.shape())?;
        let (m, n, k) = (a.shape().dim(0), a.shape().dim(1), b.shape().dim(1));
        let (av, bv) = (a.shape().volume(), b.shape().volume());
        let (da, db) = (a.data(), b.data());
        let mut data = Vec::with_capacity(out.size());
        for batch in 0..out.batch() {
            let ao = if a.shape().batch() == 1 { 0 } else { batch * av };
            let bo = if b.shape().batch() == 1 { 0 } else { batch * bv };
            for i in 0..m {
                for j in 0..k {
                    let mut acc = 0.0f32;
                    for t in 0..n {
                        acc += da[ao + i * n + t] * db[bo + t * k + j];
                    }
                    data.push(acc);
                }
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn transpose(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.check_tensor(x, "transpose")?;
        let out = x.shape().transposed()?;
        let (r, c) = (x.shape().dim(0), x.shape().dim(1));
        let volume = x.shape().volume();
        let src = x.data();
        let mut data = vec![0.0f32; x.len()];
        for batch in 0..x.shape().batch() {
            let base = batch * volume;
            for i in 0..r {
                for j in 0..c {
                    data[base + j * r + i] = src[base + i * c + j];
                }
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn concat(&self, xs: &[&Tensor], axis: usize) -> Result<Tensor, TaperError> {
        for x in xs {
            self.check_tensor(x, "concat")?;
        }
        let shapes: Vec<&Shape> = xs.iter().map(|x| x.shape()).collect();
        let out = Shape::concat(&shapes, axis)?;
        // Work with raw dims: the canonical shape may trim a trailing 1 at or
        // past the concat axis (single-input case).
        let rank = out.rank().max(axis + 1);
        let out_dims: Vec<usize> = (0..rank).map(|i| out.dim(i)).collect();
        let out_strides = raw_strides(&out_dims);
        let out_volume = out.volume();
        let mut data = vec![0.0f32; out.size()];
        let mut offset_along_axis = 0;
        for x in xs {
            let mut slot_dims: Vec<usize> = (0..rank).map(|i| out.dim(i)).collect();
            slot_dims[axis] = x.shape().dim(axis);
            let slot_strides = raw_strides(&slot_dims);
            let slot_vol: usize = slot_dims.iter().product();
            let map = BroadcastMap::new(x.shape(), rank);
            let src = x.data();
            let mut coords = vec![0usize; rank];
            for batch in 0..out.batch() {
                for i in 0..slot_vol {
                    decode(i, &slot_strides, &mut coords);
                    let v = src[map.offset(batch, &coords)];
                    coords[axis] += offset_along_axis;
                    let dst = batch * out_volume
                        + coords
                            .iter()
                            .zip(&out_strides)
                            .map(|(c, s)| c * s)
                            .sum::<usize>();
                    data[dst] = v;
                }
            }
            offset_along_axis += x.shape().dim(axis);
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn slice(&self, x: &Tensor, axis: usize, lo: usize, hi: usize) -> Result<Tensor, TaperError> {
        self.check_tensor(x, "slice")?;
        self.check_axis(x.shape(), axis, "slice")?;
        if lo >= hi || hi > x.shape().dim(axis) {
            return Err(TaperError::InvalidArgument {
                operation: "slice".to_string(),
                message: format!(
                    "range [{}, {}) out of bounds for axis {} of {}",
                    lo,
                    hi,
                    axis,
                    x.shape()
                ),
            });
        }
        let out = x.shape().resize_dim(axis, hi - lo)?;
        let rank = x.shape().rank().max(axis + 1);
        let out_dims: Vec<usize> = {
            let mut d: Vec<usize> = (0..rank).map(|i| x.shape().dim(i)).collect();
            d[axis] = hi - lo;
            d
        };
        let out_strides = raw_strides(&out_dims);
        let out_vol: usize = out_dims.iter().product();
        let map = BroadcastMap::new(x.shape(), rank);
        let src = x.data();
        let mut data = Vec::with_capacity(out.size());
        let mut coords = vec![0usize; rank];
        for batch in 0..x.shape().batch() {
            for i in 0..out_vol {
                decode(i, &out_strides, &mut coords);
                coords[axis] += lo;
                data.push(src[map.offset(batch, &coords)]);
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn pick(&self, x: &Tensor, axis: usize, ids: &[usize]) -> Result<Tensor, TaperError> {
        self.check_tensor(x, "pick")?;
        let out = x.shape().pick(axis, ids.len())?;
        for &id in ids {
            if id >= x.shape().dim(axis) {
                return Err(TaperError::IndexOutOfBounds {
                    operation: "pick".to_string(),
                    index: id,
                    size: x.shape().dim(axis),
                });
            }
        }
        let rank = x.shape().rank().max(axis + 1);
        let mut out_dims: Vec<usize> = (0..rank).map(|i| x.shape().dim(i)).collect();
        out_dims[axis] = 1;
        let out_strides = raw_strides(&out_dims);
        let out_vol: usize = out_dims.iter().product();
        let map = BroadcastMap::new(x.shape(), rank);
        let src = x.data();
        let mut data = Vec::with_capacity(out.size());
        let mut coords = vec![0usize; rank];
        for batch in 0..out.batch() {
            let id = ids[if ids.len() == 1 { 0 } else { batch }];
            for i in 0..out_vol {
                decode(i, &out_strides, &mut coords);
                coords[axis] = id;
                data.push(src[map.offset(batch, &coords)]);
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn pick_backward(
        &self,
        gy: &Tensor,
        axis: usize,
        ids: &[usize],
        x_shape: &Shape,
    ) -> Result<Tensor, TaperError> {
        self.check_tensor(gy, "pick_backward")?;
        self.check_axis(x_shape, axis, "pick_backward")?;
        for &id in ids {
            if id >= x_shape.dim(axis) {
                return Err(TaperError::IndexOutOfBounds {
                    operation: "pick_backward".to_string(),
                    index: id,
                    size: x_shape.dim(axis),
                });
            }
        }
        let out = x_shape.resize_batch(gy.shape().batch())?;
        let rank = x_shape.rank().max(axis + 1);
        let mut gy_dims: Vec<usize> = (0..rank).map(|i| x_shape.dim(i)).collect();
        gy_dims[axis] = 1;
        let gy_strides = raw_strides(&gy_dims);
        let gy_vol: usize = gy_dims.iter().product();
        let map = BroadcastMap::new(x_shape, rank);
        let src = gy.data();
        let mut data = vec![0.0f32; out.size()];
        let volume = out.volume();
        let mut coords = vec![0usize; rank];
        for batch in 0..gy.shape().batch() {
            let id = ids[if ids.len() == 1 { 0 } else { batch }];
            for i in 0..gy_vol {
                decode(i, &gy_strides, &mut coords);
                coords[axis] = id;
                // `map` describes x_shape, whose batch may be 1; the output
                // carries gy's batch, so index its buffer directly.
                let dst = batch * volume + map.offset(0, &coords);
                data[dst] += src[batch * gy_vol + i];
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn broadcast(&self, x: &Tensor, axis: usize, size: usize) -> Result<Tensor, TaperError> {
        self.check_tensor(x, "broadcast")?;
        self.check_axis(x.shape(), axis, "broadcast")?;
        if x.shape().dim(axis) != 1 {
            return Err(TaperError::InvalidArgument {
                operation: "broadcast".to_string(),
                message: format!(
                    "axis {} of {} must have size 1 to broadcast",
                    axis,
                    x.shape()
                ),
            });
        }
        let out = x.shape().resize_dim(axis, size)?;
        let rank = out.rank();
        let out_strides = raw_strides(out.dims());
        let map = BroadcastMap::new(x.shape(), rank);
        let src = x.data();
        let mut data = Vec::with_capacity(out.size());
        let mut coords = vec![0usize; rank];
        for batch in 0..out.batch() {
            for i in 0..out.volume() {
                decode(i, &out_strides, &mut coords);
                data.push(src[map.offset(batch, &coords)]);
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn sum(&self, x: &Tensor, axis: usize) -> Result<Tensor, TaperError> {
        self.check_tensor(x, "sum")?;
        self.check_axis(x.shape(), axis, "sum")?;
        let out = x.shape().resize_dim(axis, 1)?;
        let rank = x.shape().rank().max(axis + 1);
        let x_dims: Vec<usize> = (0..rank).map(|i| x.shape().dim(i)).collect();
        let x_strides = raw_strides(&x_dims);
        let mut out_dims = x_dims.clone();
        out_dims[axis] = 1;
        let out_strides = raw_strides(&out_dims);
        let out_vol: usize = out_dims.iter().product();
        let src = x.data();
        let mut data = vec![0.0f32; out.size()];
        let volume = x.shape().volume();
        let mut coords = vec![0usize; rank];
        for batch in 0..x.shape().batch() {
            for i in 0..volume {
                decode(i, &x_strides, &mut coords);
                coords[axis] = 0;
                let dst = batch * out_vol
                    + coords
                        .iter()
                        .zip(&out_strides)
                        .map(|(c, s)| c * s)
                        .sum::<usize>();
                data[dst] += src[batch * volume + i];
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn batch_sum(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.check_tensor(x, "batch_sum")?;
        let out = x.shape().resize_batch(1)?;
        let volume = x.shape().volume();
        let src = x.data();
        let mut data = vec![0.0f32; volume];
        for batch in 0..x.shape().batch() {
            for (i, slot) in data.iter_mut().enumerate() {
                *slot += src[batch * volume + i];
            }
        }
        Ok(Tensor::from_parts(out, self.id, data))
    }

    fn exp(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "exp", f32::exp)
    }

    fn ln(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "ln", f32::ln)
    }

    fn sqrt(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "sqrt", f32::sqrt)
    }

    fn tanh(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "tanh", f32::tanh)
    }

    fn sigmoid(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "sigmoid", |v| 1.0 / (1.0 + (-v).exp()))
    }

    fn relu(&self, x: &Tensor) -> Result<Tensor, TaperError> {
        self.unary(x, "relu", |v| v.max(0.0))
    }

    fn softmax(&self, x: &Tensor, axis: usize) -> Result<Tensor, TaperError> {
        self.softmax_impl(x, axis, false)
    }

    fn log_softmax(&self, x: &Tensor, axis: usize) -> Result<Tensor, TaperError> {
        self.softmax_impl(x, axis, true)
    }

    fn random_bernoulli(&self, shape: &Shape, p: f32) -> Result<Tensor, TaperError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(TaperError::InvalidArgument {
                operation: "random_bernoulli".to_string(),
                message: format!("probability {} is outside [0, 1]", p),
            });
        }
        Ok(self.sample(shape, |rng| if rng.gen::<f32>() < p { 1.0 } else { 0.0 }))
    }

    fn random_uniform(
        &self,
        shape: &Shape,
        lower: f32,
        upper: f32,
    ) -> Result<Tensor, TaperError> {
        if !(lower < upper) {
            return Err(TaperError::InvalidArgument {
                operation: "random_uniform".to_string(),
                message: format!("empty range [{}, {})", lower, upper),
            });
        }
        let dist = Uniform::new(lower, upper);
        Ok(self.sample(shape, |rng| dist.sample(rng)))
    }

    fn random_normal(&self, shape: &Shape, mean: f32, sd: f32) -> Result<Tensor, TaperError> {
        let dist = Normal::new(mean, sd).map_err(|e| TaperError::InvalidArgument {
            operation: "random_normal".to_string(),
            message: e.to_string(),
        })?;
        Ok(self.sample(shape, |rng| dist.sample(rng)))
    }

    fn accumulate(&self, dst: &mut Tensor, src: &Tensor) -> Result<(), TaperError> {
        self.check_tensor(dst, "accumulate")?;
        self.check_tensor(src, "accumulate")?;
        let union = dst.shape().broadcast(src.shape(), "accumulate")?;
        let rank = union.rank();
        let union_strides = raw_strides(union.dims());
        let map_dst = BroadcastMap::new(dst.shape(), rank);
        let map_src = BroadcastMap::new(src.shape(), rank);
        let sd = src.data();
        let dd = dst.data_mut();
        let mut coords = vec![0usize; rank];
        // A zero stride on the destination side folds (sums) the broadcast
        // extent into its single slot; a zero stride on the source side
        // broadcasts one value into every destination slot.
        for batch in 0..union.batch() {
            for i in 0..union.volume() {
                decode(i, &union_strides, &mut coords);
                dd[map_dst.offset(batch, &coords)] += sd[map_src.offset(batch, &coords)];
            }
        }
        Ok(())
    }
}

/// Row-major strides for a raw dimension list.
fn raw_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Decodes a linear row-major index into per-dimension coordinates.
fn decode(mut idx: usize, strides: &[usize], coords: &mut [usize]) {
    for (c, s) in coords.iter_mut().zip(strides) {
        *c = idx / s;
        idx %= s;
    }
}

/// Per-dimension effective strides of a source tensor viewed through a
/// broadcast output: 0 wherever the source dimension (or batch) is 1.
struct BroadcastMap {
    strides: Vec<usize>,
    batch_stride: usize,
}

impl BroadcastMap {
    fn new(src: &Shape, out_rank: usize) -> Self {
        let rank = src.rank();
        let mut true_strides = vec![1usize; rank];
        for i in (0..rank.saturating_sub(1)).rev() {
            true_strides[i] = true_strides[i + 1] * src.dim(i + 1);
        }
        let strides = (0..out_rank)
            .map(|i| {
                if i >= rank || src.dim(i) == 1 {
                    0
                } else {
                    true_strides[i]
                }
            })
            .collect();
        let batch_stride = if src.batch() == 1 { 0 } else { src.volume() };
        BroadcastMap {
            strides,
            batch_stride,
        }
    }

    fn offset(&self, batch: usize, coords: &[usize]) -> usize {
        batch * self.batch_stride
            + coords
                .iter()
                .zip(&self.strides)
                .map(|(c, s)| c * s)
                .sum::<usize>()
    }
}

#[cfg(test)]
#[path = "naive_test.rs"]
mod tests;
