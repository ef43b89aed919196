use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};
use crate::parameter::Parameter;
use crate::shape::Shape;

/// Records a constant data source. `data` must hold exactly `shape.size()`
/// values in row-major order, batch samples back to back.
pub fn input(graph: &mut Graph, shape: &Shape, data: Vec<f32>) -> Result<Node, TaperError> {
    graph.add_function(
        Function::Input {
            shape: shape.clone(),
            data,
        },
        &[],
    )
}

/// Records a constant tensor with every element set to `k`.
pub fn constant(graph: &mut Graph, shape: &Shape, k: f32) -> Result<Node, TaperError> {
    input(graph, shape, vec![k; shape.size()])
}

pub fn zeros(graph: &mut Graph, shape: &Shape) -> Result<Node, TaperError> {
    constant(graph, shape, 0.0)
}

pub fn ones(graph: &mut Graph, shape: &Shape) -> Result<Node, TaperError> {
    constant(graph, shape, 1.0)
}

/// Enters a parameter into the graph. The recorded function wraps the
/// parameter handle, not a copy of its value: forward reads the value current
/// at evaluation time, and backward adds into the parameter's persistent
/// gradient. The parameter must be initialized.
pub fn parameter(graph: &mut Graph, param: &Parameter) -> Result<Node, TaperError> {
    graph.add_function(
        Function::ParameterInput {
            param: param.clone(),
        },
        &[],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Naive;
    use crate::error::TaperError;
    use std::rc::Rc;

    #[test]
    fn test_input_validates_data_length() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let shape = Shape::matrix(2, 2).unwrap();
        assert!(input(&mut g, &shape, vec![0.0; 4]).is_ok());
        match input(&mut g, &shape, vec![0.0; 5]).unwrap_err() {
            TaperError::TensorCreation { data_len, expected } => {
                assert_eq!((data_len, expected), (5, 4));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_uninitialized_parameter_rejected_at_construction() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let param = Parameter::new();
        match parameter(&mut g, &param).unwrap_err() {
            TaperError::InvalidParameter { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing was recorded.
        assert_eq!(g.num_functions(), 0);
    }
}
