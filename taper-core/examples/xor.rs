//! Trains a tiny MLP to compute XOR with the graph engine.
//!
//! The whole dataset fits in one batched input (four samples), so each epoch
//! is: clear the graph, rebuild the forward expression, run one backward
//! pass, and take an SGD step on the shared parameters.
//!
//! Run with: `cargo run --example xor`

use std::rc::Rc;
use taper_core::graph::Node;
use taper_core::initializer::XavierUniform;
use taper_core::optim::{Optimizer, Sgd};
use taper_core::{ops, Device, Graph, Naive, Parameter, Shape, TaperError};

const HIDDEN: usize = 8;
const EPOCHS: usize = 2000;

struct Mlp {
    w1: Parameter,
    b1: Parameter,
    w2: Parameter,
    b2: Parameter,
}

impl Mlp {
    fn new(dev: &dyn Device) -> Result<Self, TaperError> {
        Ok(Mlp {
            w1: Parameter::from_initializer(
                &Shape::matrix(HIDDEN, 2)?,
                &XavierUniform::default(),
                dev,
            )?,
            b1: Parameter::from_values(&Shape::vector(HIDDEN)?, &[0.0; HIDDEN], dev)?,
            w2: Parameter::from_initializer(
                &Shape::matrix(1, HIDDEN)?,
                &XavierUniform::default(),
                dev,
            )?,
            b2: Parameter::from_values(&Shape::vector(1)?, &[0.0], dev)?,
        })
    }

    fn parameters(&self) -> [&Parameter; 4] {
        [&self.w1, &self.b1, &self.w2, &self.b2]
    }

    /// tanh hidden layer, sigmoid output.
    fn forward(&self, graph: &mut Graph, x: Node) -> Result<Node, TaperError> {
        let w1 = ops::parameter(graph, &self.w1)?;
        let b1 = ops::parameter(graph, &self.b1)?;
        let w2 = ops::parameter(graph, &self.w2)?;
        let b2 = ops::parameter(graph, &self.b2)?;
        let h = ops::matmul(graph, w1, x)?;
        let h = ops::add(graph, h, b1)?;
        let h = ops::tanh(graph, h)?;
        let y = ops::matmul(graph, w2, h)?;
        let y = ops::add(graph, y, b2)?;
        ops::sigmoid(graph, y)
    }
}

fn main() -> Result<(), TaperError> {
    let dev: Rc<dyn Device> = Rc::new(Naive::with_seed(12345));
    let mlp = Mlp::new(dev.as_ref())?;

    let mut optimizer = Sgd::new(0.5);
    for param in mlp.parameters() {
        optimizer.add_parameter(param)?;
    }

    // All four samples at once, as a batch of column vectors.
    let x_shape = Shape::with_batch(vec![2], 4)?;
    let x_data = vec![0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
    let t_shape = Shape::with_batch(vec![1], 4)?;
    let t_data = vec![0.0, 1.0, 1.0, 0.0];

    let mut graph = Graph::new(dev.clone());
    for epoch in 0..EPOCHS {
        graph.clear();
        let x = ops::input(&mut graph, &x_shape, x_data.clone())?;
        let t = ops::input(&mut graph, &t_shape, t_data.clone())?;

        let y = mlp.forward(&mut graph, x)?;
        let diff = ops::sub(&mut graph, y, t)?;
        let sq = ops::mul(&mut graph, diff, diff)?;
        let loss = ops::batch_sum(&mut graph, sq)?;

        let loss_value = graph.forward(loss)?.data()[0];
        if epoch % 200 == 0 {
            println!("epoch {:4}: loss {:.6}", epoch, loss_value);
        }

        optimizer.reset_gradients()?;
        graph.backward(loss)?;
        optimizer.step(dev.as_ref())?;
    }

    // Report the trained predictions.
    graph.clear();
    let x = ops::input(&mut graph, &x_shape, x_data.clone())?;
    let y = mlp.forward(&mut graph, x)?;
    let predictions = graph.forward(y)?.to_vec();
    for (sample, pred) in x_data.chunks(2).zip(&predictions) {
        println!("{:?} -> {:.4}", sample, pred);
    }
    Ok(())
}
