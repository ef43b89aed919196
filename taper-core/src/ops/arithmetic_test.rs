use super::*;
use crate::device::Naive;
use crate::error::TaperError;
use crate::graph::Graph;
use crate::ops;
use crate::shape::Shape;
use std::rc::Rc;

fn graph() -> Graph {
    Graph::new(Rc::new(Naive::with_seed(0)))
}

#[test]
fn test_add_forward() {
    let mut g = graph();
    let shape = Shape::matrix(2, 2).unwrap();
    let a = ops::input(&mut g, &shape, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = ops::input(&mut g, &shape, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
    let y = add(&mut g, a, b).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![6.0, 8.0, 10.0, 12.0]);
}

#[test]
fn test_add_shape_mismatch_rejected_at_construction() {
    let mut g = graph();
    let a = ops::zeros(&mut g, &Shape::matrix(2, 3).unwrap()).unwrap();
    let b = ops::zeros(&mut g, &Shape::matrix(4, 5).unwrap()).unwrap();
    let recorded = g.num_functions();
    match add(&mut g, a, b).unwrap_err() {
        TaperError::IncompatibleShapes { operation, .. } => assert_eq!(operation, "Add"),
        other => panic!("unexpected error: {other:?}"),
    }
    // The malformed application was not recorded and no tensor was touched.
    assert_eq!(g.num_functions(), recorded);
}

#[test]
fn test_sub_and_neg_forward() {
    let mut g = graph();
    let shape = Shape::vector(3).unwrap();
    let a = ops::input(&mut g, &shape, vec![1.0, 2.0, 3.0]).unwrap();
    let b = ops::input(&mut g, &shape, vec![3.0, 2.0, 1.0]).unwrap();
    let d = sub(&mut g, a, b).unwrap();
    assert_eq!(g.forward(d).unwrap().to_vec(), vec![-2.0, 0.0, 2.0]);
    let n = neg(&mut g, d).unwrap();
    assert_eq!(g.forward(n).unwrap().to_vec(), vec![2.0, 0.0, -2.0]);
}

#[test]
fn test_const_variants_forward() {
    let mut g = graph();
    let shape = Shape::vector(2).unwrap();
    let x = ops::input(&mut g, &shape, vec![2.0, 4.0]).unwrap();

    let y = add_const(&mut g, x, 1.0).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![3.0, 5.0]);

    let y = sub_const(&mut g, x, 1.0).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![1.0, 3.0]);

    let y = sub_from_const(&mut g, 1.0, x).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![-1.0, -3.0]);

    let y = mul_const(&mut g, x, 3.0).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![6.0, 12.0]);

    let y = div_const(&mut g, x, 2.0).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![1.0, 2.0]);

    let y = div_from_const(&mut g, 8.0, x).unwrap();
    assert_eq!(g.forward(y).unwrap().to_vec(), vec![4.0, 2.0]);
}

#[test]
fn test_mul_backward_with_broadcast() {
    let mut g = graph();
    // a: [2], b: []x3 (scalar per batch sample)
    let a = ops::input(&mut g, &Shape::vector(2).unwrap(), vec![1.0, 2.0]).unwrap();
    let b = ops::input(
        &mut g,
        &Shape::with_batch(vec![1], 3).unwrap(),
        vec![10.0, 20.0, 30.0],
    )
    .unwrap();
    let y = mul(&mut g, a, b).unwrap();
    assert_eq!(
        g.shape(y).unwrap(),
        &Shape::with_batch(vec![2], 3).unwrap()
    );
    g.backward(y).unwrap();
    // dy/da folds over batch: 10+20+30 per element.
    assert_eq!(
        g.gradient(a).unwrap().unwrap().to_vec(),
        vec![60.0, 60.0]
    );
    // dy/db folds over the broadcast dim: 1+2 per batch sample.
    assert_eq!(
        g.gradient(b).unwrap().unwrap().to_vec(),
        vec![3.0, 3.0, 3.0]
    );
}

#[test]
fn test_div_backward_values() {
    let mut g = graph();
    let shape = Shape::vector(2).unwrap();
    let a = ops::input(&mut g, &shape, vec![6.0, 8.0]).unwrap();
    let b = ops::input(&mut g, &shape, vec![2.0, 4.0]).unwrap();
    let y = div(&mut g, a, b).unwrap();
    g.backward(y).unwrap();
    // d(a/b)/da = 1/b
    assert_eq!(g.gradient(a).unwrap().unwrap().to_vec(), vec![0.5, 0.25]);
    // d(a/b)/db = -a/b^2
    assert_eq!(g.gradient(b).unwrap().unwrap().to_vec(), vec![-1.5, -0.5]);
}
