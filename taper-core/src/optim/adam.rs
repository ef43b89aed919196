use crate::device::Device;
use crate::error::TaperError;
use crate::optim::{check_registrable, Optimizer};
use crate::parameter::Parameter;
use log::{debug, warn};

const M1_KEY: &str = "adam-m1";
const M2_KEY: &str = "adam-m2";

/// Adam (Kingma & Ba, 2014).
///
/// First and second moment estimates live in each parameter's named
/// statistics (`adam-m1`, `adam-m2`), created lazily on the first step, so
/// they persist with the parameter when saved with stats.
pub struct Adam {
    alpha: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    /// Shared step counter for bias correction.
    epoch: i32,
    params: Vec<Parameter>,
}

impl Adam {
    pub fn new(alpha: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Adam {
            alpha,
            beta1,
            beta2,
            eps,
            epoch: 0,
            params: Vec::new(),
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(1e-3, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn add_parameter(&mut self, param: &Parameter) -> Result<(), TaperError> {
        check_registrable(param, "Adam::add_parameter")?;
        self.params.push(param.clone());
        Ok(())
    }

    fn step(&mut self, device: &dyn Device) -> Result<(), TaperError> {
        if self.params.is_empty() {
            warn!("adam step with no registered parameters");
        }
        self.epoch += 1;
        debug!("adam step {} over {} parameters", self.epoch, self.params.len());
        let bias1 = 1.0 - self.beta1.powi(self.epoch);
        let bias2 = 1.0 - self.beta2.powi(self.epoch);
        for param in &self.params {
            let shape = param.shape()?;
            if !param.has_stats(M1_KEY)? {
                param.add_stats(M1_KEY, &shape, device)?;
                param.add_stats(M2_KEY, &shape, device)?;
            }
            let grad = param.gradient()?;

            // m1 <- beta1 * m1 + (1 - beta1) * g
            let m1 = param.stats(M1_KEY)?.ok_or_else(stats_missing)?;
            let m1 = device.add(
                &device.multiply_const(&m1, self.beta1)?,
                &device.multiply_const(&grad, 1.0 - self.beta1)?,
            )?;
            param.set_stats(M1_KEY, m1.clone())?;

            // m2 <- beta2 * m2 + (1 - beta2) * g^2
            let m2 = param.stats(M2_KEY)?.ok_or_else(stats_missing)?;
            let g2 = device.multiply(&grad, &grad)?;
            let m2 = device.add(
                &device.multiply_const(&m2, self.beta2)?,
                &device.multiply_const(&g2, 1.0 - self.beta2)?,
            )?;
            param.set_stats(M2_KEY, m2.clone())?;

            // w <- w - alpha * m1_hat / (sqrt(m2_hat) + eps)
            let m1_hat = device.divide_const_r(&m1, bias1)?;
            let m2_hat = device.divide_const_r(&m2, bias2)?;
            let denom = device.add_const(&device.sqrt(&m2_hat)?, self.eps)?;
            let update = device.multiply_const(&device.divide(&m1_hat, &denom)?, self.alpha)?;
            param.set_value(device.subtract(&param.value()?, &update)?)?;
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

fn stats_missing() -> TaperError {
    TaperError::Internal("adam statistics disappeared mid-step".to_string())
}
