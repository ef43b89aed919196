//! Initialization policies for parameter tensors.

use crate::device::Device;
use crate::error::TaperError;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// A policy that fills a tensor in place.
pub trait Initializer {
    fn name(&self) -> &'static str;

    /// Overwrites `x` with freshly initialized contents. `x` must live on
    /// `device`; policies with shape preconditions fail before writing.
    fn apply(&self, device: &dyn Device, x: &mut Tensor) -> Result<(), TaperError>;
}

fn check_device(device: &dyn Device, x: &Tensor, operation: &str) -> Result<(), TaperError> {
    if x.device_id() != device.id() {
        return Err(TaperError::DeviceMismatch {
            operation: operation.to_string(),
        });
    }
    Ok(())
}

/// Xavier/Glorot fan sizes; requires exactly 2 explicit dimensions.
fn fan(shape: &Shape, operation: &str) -> Result<(f32, f32), TaperError> {
    if shape.rank() != 2 {
        return Err(TaperError::InvalidShape {
            operation: operation.to_string(),
            message: format!("requires exactly 2 explicit dimensions, got {}", shape),
        });
    }
    Ok((shape.dim(0) as f32, shape.dim(1) as f32))
}

/// Fills every element with a constant.
pub struct Constant {
    k: f32,
}

impl Constant {
    pub fn new(k: f32) -> Self {
        Constant { k }
    }
}

impl Initializer for Constant {
    fn name(&self) -> &'static str {
        "Constant"
    }

    fn apply(&self, device: &dyn Device, x: &mut Tensor) -> Result<(), TaperError> {
        check_device(device, x, "Constant::apply")?;
        *x = device.new_tensor_filled(x.shape(), self.k);
        Ok(())
    }
}

/// Uniform samples from [lower, upper).
pub struct Uniform {
    lower: f32,
    upper: f32,
}

impl Uniform {
    pub fn new(lower: f32, upper: f32) -> Self {
        Uniform { lower, upper }
    }
}

impl Initializer for Uniform {
    fn name(&self) -> &'static str {
        "Uniform"
    }

    fn apply(&self, device: &dyn Device, x: &mut Tensor) -> Result<(), TaperError> {
        check_device(device, x, "Uniform::apply")?;
        *x = device.random_uniform(x.shape(), self.lower, self.upper)?;
        Ok(())
    }
}

/// Normal samples with the given mean and standard deviation.
pub struct Normal {
    mean: f32,
    sd: f32,
}

impl Normal {
    pub fn new(mean: f32, sd: f32) -> Self {
        Normal { mean, sd }
    }
}

impl Initializer for Normal {
    fn name(&self) -> &'static str {
        "Normal"
    }

    fn apply(&self, device: &dyn Device, x: &mut Tensor) -> Result<(), TaperError> {
        check_device(device, x, "Normal::apply")?;
        *x = device.random_normal(x.shape(), self.mean, self.sd)?;
        Ok(())
    }
}

/// Xavier/Glorot uniform: samples from
/// `±scale * sqrt(6 / (fan_in + fan_out))`.
pub struct XavierUniform {
    scale: f32,
}

impl XavierUniform {
    pub fn new(scale: f32) -> Self {
        XavierUniform { scale }
    }
}

impl Default for XavierUniform {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Initializer for XavierUniform {
    fn name(&self) -> &'static str {
        "XavierUniform"
    }

    fn apply(&self, device: &dyn Device, x: &mut Tensor) -> Result<(), TaperError> {
        check_device(device, x, "XavierUniform::apply")?;
        let (fan_in, fan_out) = fan(x.shape(), "XavierUniform::apply")?;
        let bound = self.scale * (6.0 / (fan_in + fan_out)).sqrt();
        *x = device.random_uniform(x.shape(), -bound, bound)?;
        Ok(())
    }
}

/// Xavier/Glorot normal: zero mean, `scale * sqrt(2 / (fan_in + fan_out))`
/// standard deviation.
pub struct XavierNormal {
    scale: f32,
}

impl XavierNormal {
    pub fn new(scale: f32) -> Self {
        XavierNormal { scale }
    }
}

impl Default for XavierNormal {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Initializer for XavierNormal {
    fn name(&self) -> &'static str {
        "XavierNormal"
    }

    fn apply(&self, device: &dyn Device, x: &mut Tensor) -> Result<(), TaperError> {
        check_device(device, x, "XavierNormal::apply")?;
        let (fan_in, fan_out) = fan(x.shape(), "XavierNormal::apply")?;
        let sd = self.scale * (2.0 / (fan_in + fan_out)).sqrt();
        *x = device.random_normal(x.shape(), 0.0, sd)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "initializer_test.rs"]
mod tests;
