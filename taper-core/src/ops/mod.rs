//! Graph-building operations.
//!
//! Each function records one [`Function`](crate::function::Function)
//! application in the given graph and returns a [`Node`](crate::graph::Node)
//! for the result. Construction is where shape inference runs, so these are
//! the call sites at which malformed graphs are rejected.

pub mod activation;
pub mod arithmetic;
pub mod input;
pub mod linalg;
pub mod loss;
pub mod manipulate;
pub mod random;
pub mod reduction;

pub use activation::{exp, ln, relu, sigmoid, softmax, tanh};
pub use arithmetic::{
    add, add_const, div, div_const, div_from_const, mul, mul_const, neg, sub, sub_const,
    sub_from_const,
};
pub use input::{constant, input, ones, parameter, zeros};
pub use linalg::{matmul, transpose};
pub use loss::softmax_cross_entropy;
pub use manipulate::{concat, pick};
pub use random::{bernoulli, dropout};
pub use reduction::{batch_sum, mean, sum};
