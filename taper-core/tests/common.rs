use std::rc::Rc;
use taper_core::{Device, Graph, Naive};

/// Fresh graph on a deterministically seeded naive device.
pub fn seeded_graph(seed: u64) -> Graph {
    let dev: Rc<dyn Device> = Rc::new(Naive::with_seed(seed));
    Graph::new(dev)
}

/// Asserts two float slices agree element-wise within `tol`.
pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "element {}: {} vs {} (tol {})",
            i,
            a,
            e,
            tol
        );
    }
}
