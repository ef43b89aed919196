//! Elementwise arithmetic, tensor-tensor (broadcasting) and tensor-constant.

use crate::error::TaperError;
use crate::function::Function;
use crate::graph::{Graph, Node};

pub fn add(graph: &mut Graph, a: Node, b: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Add, &[a, b])
}

pub fn sub(graph: &mut Graph, a: Node, b: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Subtract, &[a, b])
}

pub fn mul(graph: &mut Graph, a: Node, b: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Multiply, &[a, b])
}

pub fn div(graph: &mut Graph, a: Node, b: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Divide, &[a, b])
}

pub fn neg(graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::Negate, &[x])
}

/// `x + k`
pub fn add_const(graph: &mut Graph, x: Node, k: f32) -> Result<Node, TaperError> {
    graph.add_function(Function::AddConst { k }, &[x])
}

/// `x - k`
pub fn sub_const(graph: &mut Graph, x: Node, k: f32) -> Result<Node, TaperError> {
    graph.add_function(Function::SubtractConstR { k }, &[x])
}

/// `k - x`
pub fn sub_from_const(graph: &mut Graph, k: f32, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::SubtractConstL { k }, &[x])
}

/// `x * k`
pub fn mul_const(graph: &mut Graph, x: Node, k: f32) -> Result<Node, TaperError> {
    graph.add_function(Function::MultiplyConst { k }, &[x])
}

/// `x / k`
pub fn div_const(graph: &mut Graph, x: Node, k: f32) -> Result<Node, TaperError> {
    graph.add_function(Function::DivideConstR { k }, &[x])
}

/// `k / x`
pub fn div_from_const(graph: &mut Graph, k: f32, x: Node) -> Result<Node, TaperError> {
    graph.add_function(Function::DivideConstL { k }, &[x])
}

#[cfg(test)]
#[path = "arithmetic_test.rs"]
mod tests;
