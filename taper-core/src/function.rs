//! The closed set of graph operations.
//!
//! Every operation the graph can record is one variant of [`Function`]. A
//! variant carries only the constants fixed at construction time (a scalar, an
//! axis, a list of indices); operands are passed in by reference when the
//! graph invokes the contract. Instances are immutable once built and hold no
//! state across calls.

use crate::device::Device;
use crate::error::TaperError;
use crate::parameter::Parameter;
use crate::shape::{Shape, MAX_RANK};
use crate::tensor::Tensor;

#[derive(Debug, Clone)]
pub enum Function {
    /// A constant data source baked into the graph.
    Input { shape: Shape, data: Vec<f32> },
    /// A view of a [`Parameter`]'s current value; backward adds into the
    /// parameter's persistent gradient instead of a graph buffer.
    ParameterInput { param: Parameter },
    Add,
    Subtract,
    Multiply,
    Divide,
    AddConst { k: f32 },
    /// `k - x`
    SubtractConstL { k: f32 },
    /// `x - k`
    SubtractConstR { k: f32 },
    MultiplyConst { k: f32 },
    /// `k / x`
    DivideConstL { k: f32 },
    /// `x / k`
    DivideConstR { k: f32 },
    Negate,
    Matmul,
    Transpose,
    Concat { axis: usize },
    Pick { axis: usize, ids: Vec<usize> },
    Sum { axis: usize },
    BatchSum,
    Exp,
    Ln,
    Tanh,
    Sigmoid,
    Relu,
    Softmax { axis: usize },
    /// Args are (logits, target distribution); reduces the given axis.
    SoftmaxCrossEntropy { axis: usize },
    /// Sampling source; non-differentiable, no-op backward.
    RandomBernoulli { shape: Shape, p: f32 },
}

impl Function {
    pub fn name(&self) -> &'static str {
        match self {
            Function::Input { .. } => "Input",
            Function::ParameterInput { .. } => "ParameterInput",
            Function::Add => "Add",
            Function::Subtract => "Subtract",
            Function::Multiply => "Multiply",
            Function::Divide => "Divide",
            Function::AddConst { .. } => "AddConst",
            Function::SubtractConstL { .. } => "SubtractConstL",
            Function::SubtractConstR { .. } => "SubtractConstR",
            Function::MultiplyConst { .. } => "MultiplyConst",
            Function::DivideConstL { .. } => "DivideConstL",
            Function::DivideConstR { .. } => "DivideConstR",
            Function::Negate => "Negate",
            Function::Matmul => "Matmul",
            Function::Transpose => "Transpose",
            Function::Concat { .. } => "Concat",
            Function::Pick { .. } => "Pick",
            Function::Sum { .. } => "Sum",
            Function::BatchSum => "BatchSum",
            Function::Exp => "Exp",
            Function::Ln => "Ln",
            Function::Tanh => "Tanh",
            Function::Sigmoid => "Sigmoid",
            Function::Relu => "Relu",
            Function::Softmax { .. } => "Softmax",
            Function::SoftmaxCrossEntropy { .. } => "SoftmaxCrossEntropy",
            Function::RandomBernoulli { .. } => "RandomBernoulli",
        }
    }

    /// Fixed argument count, or `None` for the variadic [`Function::Concat`].
    fn arity(&self) -> Option<usize> {
        match self {
            Function::Input { .. }
            | Function::ParameterInput { .. }
            | Function::RandomBernoulli { .. } => Some(0),
            Function::Add
            | Function::Subtract
            | Function::Multiply
            | Function::Divide
            | Function::Matmul
            | Function::SoftmaxCrossEntropy { .. } => Some(2),
            Function::Concat { .. } => None,
            _ => Some(1),
        }
    }

    fn check_arity(&self, n: usize) -> Result<(), TaperError> {
        let ok = match self.arity() {
            Some(expected) => n == expected,
            None => n >= 1,
        };
        if !ok {
            return Err(TaperError::Internal(format!(
                "{} applied to {} arguments",
                self.name(),
                n
            )));
        }
        Ok(())
    }

    /// Infers the output shape from argument shapes. Runs eagerly when the
    /// function is recorded, so malformed graphs are rejected at the call
    /// site that builds them, never during evaluation.
    pub fn forward_shape(&self, args: &[&Shape]) -> Result<Shape, TaperError> {
        self.check_arity(args.len())?;
        match self {
            Function::Input { shape, data } => {
                if data.len() != shape.size() {
                    return Err(TaperError::TensorCreation {
                        data_len: data.len(),
                        expected: shape.size(),
                    });
                }
                Ok(shape.clone())
            }
            Function::ParameterInput { param } => param.shape(),
            Function::Add | Function::Subtract | Function::Multiply | Function::Divide => {
                args[0].broadcast(args[1], self.name())
            }
            Function::AddConst { .. }
            | Function::SubtractConstL { .. }
            | Function::SubtractConstR { .. }
            | Function::MultiplyConst { .. }
            | Function::DivideConstL { .. }
            | Function::DivideConstR { .. }
            | Function::Negate
            | Function::Exp
            | Function::Ln
            | Function::Tanh
            | Function::Sigmoid
            | Function::Relu => Ok(args[0].clone()),
            Function::Matmul => args[0].matmul(args[1]),
            Function::Transpose => args[0].transposed(),
            Function::Concat { axis } => Shape::concat(args, *axis),
            Function::Pick { axis, ids } => {
                let size = args[0].dim(*axis);
                for &id in ids {
                    if id >= size {
                        return Err(TaperError::IndexOutOfBounds {
                            operation: "Pick".to_string(),
                            index: id,
                            size,
                        });
                    }
                }
                args[0].pick(*axis, ids.len())
            }
            Function::Sum { axis } => args[0].resize_dim(*axis, 1),
            Function::BatchSum => args[0].resize_batch(1),
            Function::Softmax { axis } => {
                if *axis >= MAX_RANK {
                    return Err(TaperError::InvalidAxis {
                        operation: "Softmax".to_string(),
                        axis: *axis,
                        shape: args[0].clone(),
                    });
                }
                Ok(args[0].clone())
            }
            Function::SoftmaxCrossEntropy { axis } => {
                args[0].broadcast(args[1], self.name())?.resize_dim(*axis, 1)
            }
            Function::RandomBernoulli { shape, .. } => Ok(shape.clone()),
        }
    }

    /// Computes the output tensor. Pure in its arguments; the sampling
    /// variants draw from the device RNG and rely on graph memoization to fix
    /// their value after the first evaluation.
    pub fn forward(&self, args: &[&Tensor], device: &dyn Device) -> Result<Tensor, TaperError> {
        self.check_arity(args.len())?;
        match self {
            Function::Input { shape, data } => device.new_tensor_by_vec(shape, data.clone()),
            Function::ParameterInput { param } => {
                let value = param.value()?;
                if value.device_id() != device.id() {
                    return Err(TaperError::DeviceMismatch {
                        operation: "ParameterInput".to_string(),
                    });
                }
                Ok(value)
            }
            Function::Add => device.add(args[0], args[1]),
            Function::Subtract => device.subtract(args[0], args[1]),
            Function::Multiply => device.multiply(args[0], args[1]),
            Function::Divide => device.divide(args[0], args[1]),
            Function::AddConst { k } => device.add_const(args[0], *k),
            Function::SubtractConstL { k } => device.subtract_const_l(args[0], *k),
            Function::SubtractConstR { k } => device.subtract_const_r(args[0], *k),
            Function::MultiplyConst { k } => device.multiply_const(args[0], *k),
            Function::DivideConstL { k } => device.divide_const_l(args[0], *k),
            Function::DivideConstR { k } => device.divide_const_r(args[0], *k),
            Function::Negate => device.negate(args[0]),
            Function::Matmul => device.matmul(args[0], args[1]),
            Function::Transpose => device.transpose(args[0]),
            Function::Concat { axis } => device.concat(args, *axis),
            Function::Pick { axis, ids } => device.pick(args[0], *axis, ids),
            Function::Sum { axis } => device.sum(args[0], *axis),
            Function::BatchSum => device.batch_sum(args[0]),
            Function::Exp => device.exp(args[0]),
            Function::Ln => device.ln(args[0]),
            Function::Tanh => device.tanh(args[0]),
            Function::Sigmoid => device.sigmoid(args[0]),
            Function::Relu => device.relu(args[0]),
            Function::Softmax { axis } => device.softmax(args[0], *axis),
            Function::SoftmaxCrossEntropy { axis } => {
                let log_probs = device.log_softmax(args[0], *axis)?;
                let weighted = device.multiply(args[1], &log_probs)?;
                let summed = device.sum(&weighted, *axis)?;
                device.negate(&summed)
            }
            Function::RandomBernoulli { shape, p } => device.random_bernoulli(shape, *p),
        }
    }

    /// Computes one chain-rule contribution per argument given the output
    /// gradient `gy` (`None` marks a non-differentiable argument). The graph
    /// adds contributions into the argument gradient buffers, reducing any
    /// broadcast extents, so contributions may be returned at the output's
    /// shape. `ParameterInput` accumulates straight into its parameter.
    pub fn backward(
        &self,
        args: &[&Tensor],
        y: &Tensor,
        gy: &Tensor,
        device: &dyn Device,
    ) -> Result<Vec<Option<Tensor>>, TaperError> {
        self.check_arity(args.len())?;
        match self {
            Function::Input { .. } | Function::RandomBernoulli { .. } => Ok(Vec::new()),
            Function::ParameterInput { param } => {
                param.accumulate_gradient(gy, device)?;
                Ok(Vec::new())
            }
            Function::Add => Ok(vec![Some(gy.clone()), Some(gy.clone())]),
            Function::Subtract => Ok(vec![Some(gy.clone()), Some(device.negate(gy)?)]),
            Function::Multiply => Ok(vec![
                Some(device.multiply(gy, args[1])?),
                Some(device.multiply(gy, args[0])?),
            ]),
            Function::Divide => {
                // d(a/b)/da = 1/b, d(a/b)/db = -a/b^2 = -y/b
                let ga = device.divide(gy, args[1])?;
                let gb = device.negate(&device.multiply(&ga, y)?)?;
                Ok(vec![Some(ga), Some(gb)])
            }
            Function::AddConst { .. } | Function::SubtractConstR { .. } => {
                Ok(vec![Some(gy.clone())])
            }
            Function::SubtractConstL { .. } | Function::Negate => {
                Ok(vec![Some(device.negate(gy)?)])
            }
            Function::MultiplyConst { k } => Ok(vec![Some(device.multiply_const(gy, *k)?)]),
            Function::DivideConstL { .. } => {
                // y = k/x, dy/dx = -k/x^2 = -y/x
                let ratio = device.divide(y, args[0])?;
                Ok(vec![Some(device.negate(
                    &device.multiply(gy, &ratio)?,
                )?)])
            }
            Function::DivideConstR { k } => Ok(vec![Some(device.divide_const_r(gy, *k)?)]),
            Function::Matmul => {
                let ga = device.matmul(gy, &device.transpose(args[1])?)?;
                let gb = device.matmul(&device.transpose(args[0])?, gy)?;
                Ok(vec![Some(ga), Some(gb)])
            }
            Function::Transpose => Ok(vec![Some(device.transpose(gy)?)]),
            Function::Concat { axis } => {
                let mut grads = Vec::with_capacity(args.len());
                let mut offset = 0;
                for arg in args {
                    let width = arg.shape().dim(*axis);
                    grads.push(Some(device.slice(gy, *axis, offset, offset + width)?));
                    offset += width;
                }
                Ok(grads)
            }
            Function::Pick { axis, ids } => Ok(vec![Some(device.pick_backward(
                gy,
                *axis,
                ids,
                args[0].shape(),
            )?)]),
            Function::Sum { axis } => {
                let size = args[0].shape().dim(*axis);
                if size == 1 {
                    Ok(vec![Some(gy.clone())])
                } else {
                    Ok(vec![Some(device.broadcast(gy, *axis, size)?)])
                }
            }
            Function::BatchSum => Ok(vec![Some(gy.clone())]),
            Function::Exp => Ok(vec![Some(device.multiply(gy, y)?)]),
            Function::Ln => Ok(vec![Some(device.divide(gy, args[0])?)]),
            Function::Tanh => {
                let y2 = device.multiply(y, y)?;
                let one_minus = device.subtract_const_l(&y2, 1.0)?;
                Ok(vec![Some(device.multiply(gy, &one_minus)?)])
            }
            Function::Sigmoid => {
                let one_minus = device.subtract_const_l(y, 1.0)?;
                let dydx = device.multiply(y, &one_minus)?;
                Ok(vec![Some(device.multiply(gy, &dydx)?)])
            }
            Function::Relu => {
                let mask = device.gt_const(args[0], 0.0)?;
                Ok(vec![Some(device.multiply(gy, &mask)?)])
            }
            Function::Softmax { axis } => {
                // gx = y * (gy - sum(gy * y, axis))
                let weighted = device.multiply(gy, y)?;
                let total = device.sum(&weighted, *axis)?;
                let centered = device.subtract(gy, &total)?;
                Ok(vec![Some(device.multiply(y, &centered)?)])
            }
            Function::SoftmaxCrossEntropy { axis } => {
                let probs = device.softmax(args[0], *axis)?;
                let diff = device.subtract(&probs, args[1])?;
                let gx = device.multiply(&diff, gy)?;
                let log_probs = device.log_softmax(args[0], *axis)?;
                let gt = device.negate(&device.multiply(&log_probs, gy)?)?;
                Ok(vec![Some(gx), Some(gt)])
            }
        }
    }
}
