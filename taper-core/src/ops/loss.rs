//! Loss operations.

use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};

/// Softmax cross-entropy between logits `x` and a target distribution `t`
/// along `axis`: `-sum(t * log_softmax(x), axis)`. The axis collapses to
/// size 1.
pub fn softmax_cross_entropy(
    graph: &mut Graph,
    x: Node,
    t: Node,
    axis: usize,
) -> Result<Node, TaperError> {
    graph.add_function(Function::SoftmaxCrossEntropy { axis }, &[x, t])
}
