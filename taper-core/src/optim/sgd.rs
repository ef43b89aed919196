use crate::device::Device;
use crate::error::TaperError;
use crate::optim::{check_registrable, Optimizer};
use crate::parameter::Parameter;
use log::{debug, warn};

/// Plain stochastic gradient descent: `w <- w - eta * g`.
pub struct Sgd {
    eta: f32,
    params: Vec<Parameter>,
}

impl Sgd {
    pub fn new(eta: f32) -> Self {
        Sgd {
            eta,
            params: Vec::new(),
        }
    }

    pub fn eta(&self) -> f32 {
        self.eta
    }

    /// Adjusts the learning rate for subsequent steps.
    pub fn set_eta(&mut self, eta: f32) {
        self.eta = eta;
    }
}

impl Optimizer for Sgd {
    fn add_parameter(&mut self, param: &Parameter) -> Result<(), TaperError> {
        check_registrable(param, "Sgd::add_parameter")?;
        self.params.push(param.clone());
        Ok(())
    }

    fn step(&mut self, device: &dyn Device) -> Result<(), TaperError> {
        if self.params.is_empty() {
            warn!("sgd step with no registered parameters");
        }
        debug!("sgd step over {} parameters (eta {})", self.params.len(), self.eta);
        for param in &self.params {
            let value = param.value()?;
            let grad = param.gradient()?;
            let delta = device.multiply_const(&grad, self.eta)?;
            param.set_value(device.subtract(&value, &delta)?)?;
        }
        Ok(())
    }

    fn reset_gradients(&self) -> Result<(), TaperError> {
        for param in &self.params {
            param.reset_gradient()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, Naive};
    use crate::graph::Graph;
    use crate::ops;
    use crate::shape::Shape;
    use std::rc::Rc;

    #[test]
    fn test_step_moves_against_gradient() {
        let dev: Rc<dyn Device> = Rc::new(Naive::with_seed(0));
        let shape = Shape::vector(2).unwrap();
        let param = Parameter::from_values(&shape, &[1.0, -1.0], dev.as_ref()).unwrap();

        let mut opt = Sgd::new(0.1);
        opt.add_parameter(&param).unwrap();

        // loss = sum(w * w), dw = 2w
        let mut g = Graph::new(dev.clone());
        let w = ops::parameter(&mut g, &param).unwrap();
        let ww = ops::mul(&mut g, w, w).unwrap();
        let loss = ops::sum(&mut g, ww, 0).unwrap();
        g.backward(loss).unwrap();

        opt.step(dev.as_ref()).unwrap();
        let updated = param.value().unwrap().to_vec();
        assert_eq!(updated, vec![1.0 - 0.1 * 2.0, -1.0 + 0.1 * 2.0]);

        opt.reset_gradients().unwrap();
        assert_eq!(param.gradient().unwrap().to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_rejects_uninitialized_parameter() {
        let mut opt = Sgd::new(0.1);
        assert!(opt.add_parameter(&Parameter::new()).is_err());
    }
}
