//! Reductions over an axis or over the batch.

use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};

/// Sum along `axis`; the axis collapses to size 1.
pub fn sum(graph: &mut Graph, x: Node, axis: usize) -> Result<Node, TaperError> {
    graph.add_function(Function::Sum { axis }, &[x])
}

/// Mean along `axis`.
pub fn mean(graph: &mut Graph, x: Node, axis: usize) -> Result<Node, TaperError> {
    let n = graph.shape(x)?.dim(axis);
    let total = sum(graph, x, axis)?;
    super::mul_const(graph, total, 1.0 / n as f32)
}

/// Sum over the batch; the result has batch size 1.
pub fn batch_sum(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::BatchSum, &[x])
}
