use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};

/// Matrix product. Both operands must have rank <= 2 with matching inner
/// dimensions; batches broadcast.
pub fn matmul(graph: &mut Graph, a: Node, b: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Matmul, &[a, b])
}

/// Matrix transpose: swaps the two leading axes (rank <= 2 only).
pub fn transpose(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Transpose, &[x])
}
