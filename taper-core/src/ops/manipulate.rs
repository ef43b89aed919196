//! Structural operations: concatenation and index selection.

use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};

/// Concatenates `xs` along `axis`.
pub fn concat(graph: &mut Graph, xs: &[Node], axis: usize) -> Result<Node, TaperError> {
    graph.add_function(Function::Concat { axis }, xs)
}

/// Selects slices of `x` along `axis` by index, one index per batch sample
/// (or a single shared index). The selected axis collapses to size 1 and the
/// result batch becomes `max(batch, ids.len())`.
pub fn pick(graph: &mut Graph, x: Node, axis: usize, ids: Vec<usize>) -> Result<Node, TaperError> {
    graph.add_function(Function::Pick { axis, ids }, &[x])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Naive;
    use crate::error::TaperError;
    use crate::ops;
    use crate::shape::Shape;
    use std::rc::Rc;

    #[test]
    fn test_concat_forward_backward() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let a = ops::input(&mut g, &Shape::matrix(2, 2).unwrap(), vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let b = ops::input(&mut g, &Shape::matrix(2, 1).unwrap(), vec![5.0, 6.0]).unwrap();
        let y = concat(&mut g, &[a, b], 1).unwrap();
        assert_eq!(g.shape(y).unwrap(), &Shape::matrix(2, 3).unwrap());
        assert_eq!(
            g.forward(y).unwrap().to_vec(),
            vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]
        );
        g.backward(y).unwrap();
        assert_eq!(g.gradient(a).unwrap().unwrap().to_vec(), vec![1.0; 4]);
        assert_eq!(g.gradient(b).unwrap().unwrap().to_vec(), vec![1.0; 2]);
    }

    #[test]
    fn test_pick_forward_backward() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let x = ops::input(
            &mut g,
            &Shape::matrix(3, 2).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap();
        let y = pick(&mut g, x, 0, vec![1]).unwrap();
        assert_eq!(g.forward(y).unwrap().to_vec(), vec![3.0, 4.0]);
        g.backward(y).unwrap();
        assert_eq!(
            g.gradient(x).unwrap().unwrap().to_vec(),
            vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_pick_rejects_out_of_range_index() {
        let mut g = Graph::new(Rc::new(Naive::with_seed(0)));
        let x = ops::zeros(&mut g, &Shape::matrix(3, 2).unwrap()).unwrap();
        match pick(&mut g, x, 0, vec![3]).unwrap_err() {
            TaperError::IndexOutOfBounds { index, size, .. } => {
                assert_eq!((index, size), (3, 3));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
