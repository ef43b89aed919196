//! Finite-difference checking of analytical gradients.

use crate::device::Device;
use crate::error::TaperError;
use crate::graph::{Graph, Node};
use crate::ops;
use crate::shape::Shape;
use approx::relative_eq;
use std::rc::Rc;
use thiserror::Error;

/// Error type specifically for gradient-checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error(
        "gradient mismatch for input {input_index}, element {element_index}: \
         analytical {analytical} vs numerical {numerical}"
    )]
    GradientMismatch {
        input_index: usize,
        element_index: usize,
        analytical: f32,
        numerical: f32,
    },

    #[error("input {input_index} received no gradient from the backward pass")]
    MissingGradient { input_index: usize },

    #[error(transparent)]
    Tensor(#[from] TaperError),
}

/// Checks the analytical gradients of a graph-building closure against
/// central finite differences.
///
/// `build` receives a fresh graph and one input node per `(shape, data)`
/// entry and returns the output node. The output is reduced to a scalar by
/// summing over every axis and the batch, the analytical gradient of that
/// scalar is computed with one backward pass, and then every input element is
/// perturbed by `±eps` to estimate the same derivative numerically. The two
/// must agree within `tolerance` (used as both absolute and relative bound).
///
/// The closure is re-invoked once per perturbation, so it must build the same
/// computation every time; sampling operations would draw fresh masks per
/// call and fail the check.
pub fn check_grad<F>(
    device: Rc<dyn Device>,
    inputs: &[(Shape, Vec<f32>)],
    build: F,
    eps: f32,
    tolerance: f32,
) -> Result<(), GradCheckError>
where
    F: Fn(&mut Graph, &[Node]) -> Result<Node, TaperError>,
{
    let build_loss = |datasets: &[Vec<f32>]| -> Result<(Graph, Vec<Node>, Node), GradCheckError> {
        let mut graph = Graph::new(device.clone());
        let mut nodes = Vec::with_capacity(inputs.len());
        for ((shape, _), data) in inputs.iter().zip(datasets) {
            nodes.push(ops::input(&mut graph, shape, data.clone())?);
        }
        let out = build(&mut graph, &nodes)?;
        let loss = scalar_reduce(&mut graph, out)?;
        Ok((graph, nodes, loss))
    };

    let originals: Vec<Vec<f32>> = inputs.iter().map(|(_, d)| d.clone()).collect();

    // Analytical gradients of the scalar-reduced output.
    let (mut graph, nodes, loss) = build_loss(&originals)?;
    graph.backward(loss)?;
    let mut analytical = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let grad = graph
            .gradient(*node)?
            .ok_or(GradCheckError::MissingGradient { input_index: i })?;
        analytical.push(grad.to_vec());
    }

    // Central differences, one element at a time.
    for (i, (_, data)) in inputs.iter().enumerate() {
        for j in 0..data.len() {
            let mut datasets = originals.clone();
            datasets[i][j] = data[j] + eps;
            let (mut g_plus, _, loss_plus) = build_loss(&datasets)?;
            let loss_plus = g_plus.forward(loss_plus)?.data()[0];

            datasets[i][j] = data[j] - eps;
            let (mut g_minus, _, loss_minus) = build_loss(&datasets)?;
            let loss_minus = g_minus.forward(loss_minus)?.data()[0];

            let numerical = (loss_plus - loss_minus) / (2.0 * eps);
            let value = analytical[i][j];
            if !relative_eq!(
                value,
                numerical,
                epsilon = tolerance,
                max_relative = tolerance
            ) {
                return Err(GradCheckError::GradientMismatch {
                    input_index: i,
                    element_index: j,
                    analytical: value,
                    numerical,
                });
            }
        }
    }
    Ok(())
}

/// Reduces a node to a scalar by summing every axis, then the batch.
fn scalar_reduce(graph: &mut Graph, node: Node) -> Result<Node, TaperError> {
    let rank = graph.shape(node)?.rank();
    let mut reduced = node;
    for axis in 0..rank {
        reduced = ops::sum(graph, reduced, axis)?;
    }
    ops::batch_sum(graph, reduced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Naive;

    #[test]
    fn test_accepts_correct_gradient() {
        let dev: Rc<dyn Device> = Rc::new(Naive::with_seed(0));
        let inputs = vec![(Shape::vector(3).unwrap(), vec![0.5, -1.0, 2.0])];
        check_grad(
            dev,
            &inputs,
            |g, nodes| {
                let sq = ops::mul(g, nodes[0], nodes[0])?;
                ops::tanh(g, sq)
            },
            1e-3,
            1e-2,
        )
        .unwrap();
    }

    #[test]
    fn test_detects_wrong_gradient() {
        // relu at the kink: the one-sided derivatives disagree, so the
        // central difference (0.5) cannot match the analytical gradient (0).
        let dev: Rc<dyn Device> = Rc::new(Naive::with_seed(0));
        let inputs = vec![(Shape::vector(1).unwrap(), vec![0.0])];
        let result = check_grad(
            dev,
            &inputs,
            |g, nodes| ops::relu(g, nodes[0]),
            1e-3,
            1e-3,
        );
        assert!(matches!(
            result,
            Err(GradCheckError::GradientMismatch { .. })
        ));
    }
}
