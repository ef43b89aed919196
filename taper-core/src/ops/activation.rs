//! Elementwise activations and the softmax family.

use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};

pub fn exp(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Exp, &[x])
}

/// Natural logarithm.
pub fn ln(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Ln, &[x])
}

pub fn tanh(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Tanh, &[x])
}

pub fn sigmoid(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Sigmoid, &[x])
}

pub fn relu(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Relu, &[x])
}

/// Softmax along `axis`.
pub fn softmax(graph: &mut Graph, x: Node, axis: usize) -> Result<Node, TaperError> {
    graph.add_function(Function::Softmax { axis }, &[x])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Naive;
    use crate::ops;
    use crate::shape::Shape;
    use approx::assert_relative_eq;
    use std::rc::Rc;

    #[test]
    fn test_relu_forward_backward() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let x = ops::input(
            &mut g,
            &Shape::vector(4).unwrap(),
            vec![-2.0, -0.5, 0.5, 2.0],
        )
        .unwrap();
        let y = relu(&mut g, x).unwrap();
        assert_eq!(g.forward(y).unwrap().to_vec(), vec![0.0, 0.0, 0.5, 2.0]);
        g.backward(y).unwrap();
        assert_eq!(
            g.gradient(x).unwrap().unwrap().to_vec(),
            vec![0.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let x = ops::input(&mut g, &Shape::vector(1).unwrap(), vec![0.0]).unwrap();
        let y = sigmoid(&mut g, x).unwrap();
        assert_relative_eq!(g.forward(y).unwrap().data()[0], 0.5);
        g.backward(y).unwrap();
        // sigmoid'(0) = 0.25
        assert_relative_eq!(g.gradient(x).unwrap().unwrap().data()[0], 0.25);
    }

    #[test]
    fn test_softmax_gradient_sums_to_zero() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let x = ops::input(
            &mut g,
            &Shape::vector(3).unwrap(),
            vec![0.3, -1.2, 2.0],
        )
        .unwrap();
        let y = softmax(&mut g, x, 0).unwrap();
        let p = pick_first(&mut g, y);
        g.backward(p).unwrap();
        let gx = g.gradient(x).unwrap().unwrap().to_vec();
        // Rows of the softmax Jacobian sum to zero.
        assert_relative_eq!(gx.iter().sum::<f32>(), 0.0, epsilon = 1e-6);
    }

    fn pick_first(g: &mut Graph, y: crate::graph::Node) -> crate::graph::Node {
        ops::pick(g, y, 0, vec![0]).unwrap()
    }
}
