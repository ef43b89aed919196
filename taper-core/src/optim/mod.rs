//! Gradient-descent update rules over [`Parameter`]s.
//!
//! Optimizers consume only the public parameter contract: read `value()` and
//! `gradient()`, write back with `set_value()`, and keep per-parameter state
//! in the parameter's named statistics.

use crate::device::Device;
use crate::error::TaperError;
use crate::parameter::Parameter;

pub mod adam;
pub mod sgd;

pub use adam::Adam;
pub use sgd::Sgd;

pub trait Optimizer {
    /// Registers a parameter for updates. The parameter must be initialized.
    fn add_parameter(&mut self, param: &Parameter) -> Result<(), TaperError>;

    /// Applies one update step to every registered parameter from its
    /// currently accumulated gradient.
    fn step(&mut self, device: &dyn Device) -> Result<(), TaperError>;

    /// Zero-fills the gradient of every registered parameter.
    fn reset_gradients(&self) -> Result<(), TaperError>;
}

pub(crate) fn check_registrable(
    param: &Parameter,
    operation: &str,
) -> Result<(), TaperError> {
    if !param.valid() {
        return Err(TaperError::InvalidParameter {
            operation: operation.to_string(),
        });
    }
    Ok(())
}
