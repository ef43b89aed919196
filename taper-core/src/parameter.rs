use crate::device::{Device, DeviceId};
use crate::error::TaperError;
use crate::initializer::Initializer;
use crate::io;
use crate::shape::Shape;
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// Interior state of an initialized parameter.
pub(crate) struct ParamData {
    shape: Shape,
    device: DeviceId,
    value: Tensor,
    grad: Tensor,
    /// Auxiliary statistic tensors kept for optimizers (moving averages and
    /// the like), keyed by name and shaped independently of the value.
    stats: HashMap<String, Tensor>,
}

/// A persistent trainable tensor with its accumulated gradient.
///
/// A `Parameter` outlives any single [`Graph`](crate::graph::Graph): it is
/// entered into a graph via [`ops::parameter`](crate::ops::parameter), which
/// records a constant function wrapping the current value, and the backward
/// pass adds into the persistent gradient buffer here.
///
/// The handle is a cheap clone (`Rc` over the interior), so the graph, a
/// model and an optimizer can all refer to the same parameter. A parameter
/// starts out *invalid* (uninitialized); every accessor fails with
/// [`TaperError::InvalidParameter`] until one of the `init_*` constructors or
/// a load has run. Parameter shapes must not be batched.
#[derive(Clone)]
pub struct Parameter {
    inner: Rc<RefCell<Option<ParamData>>>,
}

impl Parameter {
    /// Creates an uninitialized parameter.
    pub fn new() -> Self {
        Parameter {
            inner: Rc::new(RefCell::new(None)),
        }
    }

    /// Creates a parameter initialized from literal values.
    pub fn from_values(
        shape: &Shape,
        values: &[f32],
        device: &dyn Device,
    ) -> Result<Self, TaperError> {
        let param = Parameter::new();
        param.init_by_values(shape, values, device)?;
        Ok(param)
    }

    /// Creates a parameter initialized by an [`Initializer`] policy.
    pub fn from_initializer(
        shape: &Shape,
        initializer: &dyn Initializer,
        device: &dyn Device,
    ) -> Result<Self, TaperError> {
        let param = Parameter::new();
        param.init_by_initializer(shape, initializer, device)?;
        Ok(param)
    }

    /// (Re)initializes this parameter from literal values, dropping any
    /// previous state including statistics.
    pub fn init_by_values(
        &self,
        shape: &Shape,
        values: &[f32],
        device: &dyn Device,
    ) -> Result<(), TaperError> {
        check_unbatched(shape)?;
        let value = device.new_tensor_by_vec(shape, values.to_vec())?;
        let grad = device.new_tensor(shape);
        self.install(shape.clone(), device.id(), value, grad);
        Ok(())
    }

    /// (Re)initializes this parameter via an initializer policy, dropping any
    /// previous state including statistics.
    pub fn init_by_initializer(
        &self,
        shape: &Shape,
        initializer: &dyn Initializer,
        device: &dyn Device,
    ) -> Result<(), TaperError> {
        check_unbatched(shape)?;
        let mut value = device.new_tensor(shape);
        initializer.apply(device, &mut value)?;
        let grad = device.new_tensor(shape);
        self.install(shape.clone(), device.id(), value, grad);
        Ok(())
    }

    fn install(&self, shape: Shape, device: DeviceId, value: Tensor, grad: Tensor) {
        *self.inner.borrow_mut() = Some(ParamData {
            shape,
            device,
            value,
            grad,
            stats: HashMap::new(),
        });
    }

    /// Whether this parameter has been initialized.
    pub fn valid(&self) -> bool {
        self.inner.borrow().is_some()
    }

    fn with_data<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&ParamData) -> Result<R, TaperError>,
    ) -> Result<R, TaperError> {
        match self.inner.borrow().as_ref() {
            Some(data) => f(data),
            None => Err(TaperError::InvalidParameter {
                operation: operation.to_string(),
            }),
        }
    }

    fn with_data_mut<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut ParamData) -> Result<R, TaperError>,
    ) -> Result<R, TaperError> {
        match self.inner.borrow_mut().as_mut() {
            Some(data) => f(data),
            None => Err(TaperError::InvalidParameter {
                operation: operation.to_string(),
            }),
        }
    }

    pub fn shape(&self) -> Result<Shape, TaperError> {
        self.with_data("Parameter::shape", |d| Ok(d.shape.clone()))
    }

    pub fn device_id(&self) -> Result<DeviceId, TaperError> {
        self.with_data("Parameter::device_id", |d| Ok(d.device))
    }

    /// Snapshot of the current value tensor.
    pub fn value(&self) -> Result<Tensor, TaperError> {
        self.with_data("Parameter::value", |d| Ok(d.value.clone()))
    }

    /// Snapshot of the accumulated gradient tensor.
    pub fn gradient(&self) -> Result<Tensor, TaperError> {
        self.with_data("Parameter::gradient", |d| Ok(d.grad.clone()))
    }

    /// Replaces the value tensor. The replacement must keep the shape and
    /// stay on the owning device.
    pub fn set_value(&self, value: Tensor) -> Result<(), TaperError> {
        self.with_data_mut("Parameter::set_value", |d| {
            if value.shape() != &d.shape {
                return Err(TaperError::ShapeMismatch {
                    operation: "Parameter::set_value".to_string(),
                    expected: d.shape.clone(),
                    actual: value.shape().clone(),
                });
            }
            if value.device_id() != d.device {
                return Err(TaperError::DeviceMismatch {
                    operation: "Parameter::set_value".to_string(),
                });
            }
            d.value = value;
            Ok(())
        })
    }

    /// Zero-fills the accumulated gradient.
    pub fn reset_gradient(&self) -> Result<(), TaperError> {
        self.with_data_mut("Parameter::reset_gradient", |d| {
            d.grad.data_mut().fill(0.0);
            Ok(())
        })
    }

    /// Adds a backward-pass contribution into the persistent gradient,
    /// folding any batch extent down to the parameter's batch of 1.
    pub(crate) fn accumulate_gradient(
        &self,
        contribution: &Tensor,
        device: &dyn Device,
    ) -> Result<(), TaperError> {
        self.with_data_mut("Parameter::accumulate_gradient", |d| {
            if device.id() != d.device {
                return Err(TaperError::DeviceMismatch {
                    operation: "Parameter::accumulate_gradient".to_string(),
                });
            }
            device.accumulate(&mut d.grad, contribution)
        })
    }

    /// Registers a zero-filled statistic tensor under `name`.
    pub fn add_stats(
        &self,
        name: &str,
        shape: &Shape,
        device: &dyn Device,
    ) -> Result<(), TaperError> {
        self.with_data_mut("Parameter::add_stats", |d| {
            if device.id() != d.device {
                return Err(TaperError::DeviceMismatch {
                    operation: "Parameter::add_stats".to_string(),
                });
            }
            if d.stats.contains_key(name) {
                return Err(TaperError::DuplicateKey {
                    operation: "Parameter::add_stats".to_string(),
                    key: name.to_string(),
                });
            }
            d.stats.insert(name.to_string(), device.new_tensor(shape));
            Ok(())
        })
    }

    pub fn has_stats(&self, name: &str) -> Result<bool, TaperError> {
        self.with_data("Parameter::has_stats", |d| Ok(d.stats.contains_key(name)))
    }

    /// Snapshot of the statistic tensor under `name`, if registered.
    pub fn stats(&self, name: &str) -> Result<Option<Tensor>, TaperError> {
        self.with_data("Parameter::stats", |d| Ok(d.stats.get(name).cloned()))
    }

    /// Replaces an already-registered statistic tensor; the shape must match
    /// the registered one.
    pub fn set_stats(&self, name: &str, value: Tensor) -> Result<(), TaperError> {
        self.with_data_mut("Parameter::set_stats", |d| {
            let slot = d
                .stats
                .get_mut(name)
                .ok_or_else(|| TaperError::InvalidArgument {
                    operation: "Parameter::set_stats".to_string(),
                    message: format!("no statistics registered under `{}`", name),
                })?;
            if slot.shape() != value.shape() {
                return Err(TaperError::ShapeMismatch {
                    operation: "Parameter::set_stats".to_string(),
                    expected: slot.shape().clone(),
                    actual: value.shape().clone(),
                });
            }
            *slot = value;
            Ok(())
        })
    }

    /// Statistics sorted by name, for deterministic persistence.
    pub(crate) fn stats_sorted(&self) -> Result<Vec<(String, Tensor)>, TaperError> {
        self.with_data("Parameter::stats", |d| {
            let mut entries: Vec<(String, Tensor)> = d
                .stats
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Ok(entries)
        })
    }

    /// Installs loaded statistics wholesale (load path only).
    pub(crate) fn restore_stats(&self, entries: Vec<(String, Tensor)>) -> Result<(), TaperError> {
        self.with_data_mut("Parameter::restore_stats", |d| {
            for (name, tensor) in entries {
                if d.stats.insert(name.clone(), tensor).is_some() {
                    return Err(TaperError::DuplicateKey {
                        operation: "Parameter::restore_stats".to_string(),
                        key: name,
                    });
                }
            }
            Ok(())
        })
    }

    /// Writes this parameter to `path` in the taper persistence format.
    pub fn save(&self, path: impl AsRef<Path>, with_stats: bool) -> Result<(), TaperError> {
        io::save_parameter(self, path.as_ref(), with_stats)
    }

    /// Reads a parameter from `path`, allocating its tensors on `device`.
    pub fn load(
        path: impl AsRef<Path>,
        with_stats: bool,
        device: &dyn Device,
    ) -> Result<Self, TaperError> {
        io::load_parameter(path.as_ref(), with_stats, device)
    }
}

impl Default for Parameter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.borrow().as_ref() {
            Some(d) => write!(f, "Parameter({}, {} stats)", d.shape, d.stats.len()),
            None => write!(f, "Parameter(uninitialized)"),
        }
    }
}

fn check_unbatched(shape: &Shape) -> Result<(), TaperError> {
    if shape.has_batch() {
        return Err(TaperError::InvalidShape {
            operation: "Parameter::init".to_string(),
            message: format!("parameter shape must have batch size 1, got {}", shape),
        });
    }
    Ok(())
}

#[cfg(test)]
#[path = "parameter_test.rs"]
mod tests;
