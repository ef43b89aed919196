//! Sampling sources and the dropout composition.

use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};
use crate::shape::Shape;

/// Records a bernoulli sampling source: each element is 1 with probability
/// `p`, else 0. The sample is drawn once on first evaluation and memoized, so
/// forward and backward see the same mask. Non-differentiable.
pub fn bernoulli(graph: &mut Graph, shape: &Shape, p: f32) -> Result<Node, TaperError> {
    graph.add_function(
        Function::RandomBernoulli {
            shape: shape.clone(),
            p,
        },
        &[],
    )
}

/// Inverted dropout: zeroes each element with probability `rate` and rescales
/// the survivors by `1/(1-rate)`, composed as `x * mask * (1/(1-rate))`.
/// With `enabled` false (inference) this is the identity on `x`.
pub fn dropout(graph: &mut Graph, x: Node, rate: f32, enabled: bool) -> Result<Node, TaperError> {
    if !(0.0..1.0).contains(&rate) {
        return Err(TaperError::InvalidArgument {
            operation: "dropout".to_string(),
            message: format!("rate {} is outside [0, 1)", rate),
        });
    }
    if !enabled || rate == 0.0 {
        return Ok(x);
    }
    let shape = graph.shape(x)?.clone();
    let mask = bernoulli(graph, &shape, 1.0 - rate)?;
    let masked = super::mul(graph, x, mask)?;
    super::mul_const(graph, masked, 1.0 / (1.0 - rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Naive;
    use crate::ops;
    use std::rc::Rc;

    #[test]
    fn test_bernoulli_mask_is_memoized() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(3)));
        let m = bernoulli(&mut g, &Shape::matrix(8, 8).unwrap(), 0.5).unwrap();
        // If the kernel ran twice the RNG stream would advance and the values
        // would differ; memoization must return the identical tensor.
        let first = g.forward(m).unwrap().to_vec();
        let second = g.forward(m).unwrap().to_vec();
        assert_eq!(first, second);
        assert!(first.iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_dropout_disabled_is_identity() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(3)));
        let x = ops::input(&mut g, &Shape::vector(4).unwrap(), vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let y = dropout(&mut g, x, 0.5, false).unwrap();
        assert_eq!(y, x);
        let y = dropout(&mut g, x, 0.0, true).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_dropout_zeroes_and_rescales() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(9)));
        let shape = Shape::vector(64).unwrap();
        let x = ops::input(&mut g, &shape, vec![1.0; 64]).unwrap();
        let y = dropout(&mut g, x, 0.5, true).unwrap();
        let out = g.forward(y).unwrap().to_vec();
        assert!(out.iter().all(|&v| v == 0.0 || v == 2.0));
        // Backward flows only through the survivors, rescaled.
        g.backward(y).unwrap();
        let gx = g.gradient(x).unwrap().unwrap().to_vec();
        for (o, gi) in out.iter().zip(&gx) {
            assert_eq!(*gi, if *o == 0.0 { 0.0 } else { 2.0 });
        }
    }

    #[test]
    fn test_dropout_rejects_bad_rate() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(3)));
        let x = ops::zeros(&mut g, &Shape::vector(2).unwrap()).unwrap();
        assert!(dropout(&mut g, x, 1.0, true).is_err());
        assert!(dropout(&mut g, x, -0.1, true).is_err());
    }
}
