//! The computation graph: an arena of value-nodes and function-nodes indexed
//! by creation-time integer ids.
//!
//! Creation order is a valid topological order (a function's arguments always
//! carry smaller value ids than its result), which keeps both evaluation
//! passes linear scans: forward walks function ids upward, backward walks
//! them downward.

use crate::device::Device;
use crate::error::TaperError;
use crate::function::Function;
use crate::shape::Shape;
use crate::tensor::Tensor;
use log::{debug, trace};
use std::fmt::Write as _;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// A non-owning handle to a value inside a specific [`Graph`].
///
/// Copies are free and do not duplicate graph state. A node is only
/// meaningful against the graph (and graph epoch) that created it: using it
/// against another graph fails with [`TaperError::GraphMismatch`], and using
/// it after [`Graph::clear`] fails with [`TaperError::InvalidNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    graph: u64,
    epoch: u64,
    vid: u32,
}

impl Node {
    /// The value id inside the owning graph.
    pub fn value_id(&self) -> u32 {
        self.vid
    }
}

/// One recorded value: who produced it, who consumes it, and (once computed)
/// its forward tensor and accumulated gradient.
struct ValueNode {
    src: u32,
    sinks: Vec<u32>,
    shape: Shape,
    value: Option<Tensor>,
    grad: Option<Tensor>,
}

/// One recorded function application.
struct FunctionNode {
    func: Function,
    args: Vec<u32>,
    ret: u32,
}

/// A dynamic computation graph bound to one device.
///
/// Append-only while active: `add_function` records applications, `forward`
/// computes values on demand with memoization, `backward` accumulates
/// gradients over the recorded structure in reverse creation order. `clear`
/// resets the arena and invalidates every outstanding [`Node`].
///
/// A graph is built and evaluated by a single logical thread; there is no
/// internal locking.
pub struct Graph {
    id: u64,
    epoch: u64,
    device: Rc<dyn Device>,
    vals: Vec<ValueNode>,
    funcs: Vec<FunctionNode>,
}

impl Graph {
    pub fn new(device: Rc<dyn Device>) -> Self {
        Graph {
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            epoch: 0,
            device,
            vals: Vec::new(),
            funcs: Vec::new(),
        }
    }

    pub fn device(&self) -> &Rc<dyn Device> {
        &self.device
    }

    pub fn num_values(&self) -> usize {
        self.vals.len()
    }

    pub fn num_functions(&self) -> usize {
        self.funcs.len()
    }

    /// Discards every recorded node and invalidates all outstanding [`Node`]
    /// handles into this graph.
    pub fn clear(&mut self) {
        debug!(
            "clearing graph #{}: {} values, {} functions",
            self.id,
            self.vals.len(),
            self.funcs.len()
        );
        self.vals.clear();
        self.funcs.clear();
        self.epoch += 1;
    }

    fn check_node(&self, node: Node, operation: &str) -> Result<usize, TaperError> {
        if node.graph != self.id {
            return Err(TaperError::GraphMismatch {
                operation: operation.to_string(),
                id: node.vid,
            });
        }
        if node.epoch != self.epoch {
            return Err(TaperError::InvalidNode {
                operation: operation.to_string(),
                message: format!("node #{} predates clear() of its graph", node.vid),
            });
        }
        let vid = node.vid as usize;
        if vid >= self.vals.len() {
            return Err(TaperError::InvalidNode {
                operation: operation.to_string(),
                message: format!("unknown value id {}", node.vid),
            });
        }
        Ok(vid)
    }

    /// Records one function application over `args` and returns a handle to
    /// its result. The output shape is inferred eagerly, so shape errors
    /// surface here and never during evaluation.
    pub fn add_function(&mut self, func: Function, args: &[Node]) -> Result<Node, TaperError> {
        let mut arg_ids = Vec::with_capacity(args.len());
        for &arg in args {
            arg_ids.push(self.check_node(arg, func.name())? as u32);
        }
        let shape = {
            let shapes: Vec<&Shape> = arg_ids
                .iter()
                .map(|&v| &self.vals[v as usize].shape)
                .collect();
            func.forward_shape(&shapes)?
        };

        let fid = self.funcs.len() as u32;
        let vid = self.vals.len() as u32;
        trace!("record {}#{} -> value {} ({})", func.name(), fid, vid, shape);
        for &v in &arg_ids {
            self.vals[v as usize].sinks.push(fid);
        }
        self.funcs.push(FunctionNode {
            func,
            args: arg_ids,
            ret: vid,
        });
        self.vals.push(ValueNode {
            src: fid,
            sinks: Vec::new(),
            shape,
            value: None,
            grad: None,
        });
        Ok(Node {
            graph: self.id,
            epoch: self.epoch,
            vid,
        })
    }

    /// Shape of the referenced value (known from construction time).
    pub fn shape(&self, node: Node) -> Result<&Shape, TaperError> {
        let vid = self.check_node(node, "Graph::shape")?;
        Ok(&self.vals[vid].shape)
    }

    /// Forward value of the referenced node, computing it (and any uncomputed
    /// dependencies, in creation order) on first demand. Computed tensors are
    /// memoized on their value-nodes and never recomputed until `clear`.
    pub fn forward(&mut self, node: Node) -> Result<&Tensor, TaperError> {
        let vid = self.check_node(node, "Graph::forward")?;
        self.forward_by_id(vid)?;
        self.vals[vid]
            .value
            .as_ref()
            .ok_or_else(|| TaperError::Internal("forward left target uncomputed".to_string()))
    }

    /// The memoized forward value, if it has been computed.
    pub fn value(&self, node: Node) -> Result<Option<&Tensor>, TaperError> {
        let vid = self.check_node(node, "Graph::value")?;
        Ok(self.vals[vid].value.as_ref())
    }

    fn forward_by_id(&mut self, vid: usize) -> Result<(), TaperError> {
        let target_fid = self.vals[vid].src as usize;
        // Mark the uncomputed part of the dependency closure...
        let mut needed = vec![false; target_fid + 1];
        let mut stack = vec![self.vals[vid].src];
        while let Some(fid) = stack.pop() {
            let fid = fid as usize;
            if needed[fid] {
                continue;
            }
            let fnode = &self.funcs[fid];
            if self.vals[fnode.ret as usize].value.is_some() {
                continue;
            }
            needed[fid] = true;
            for &a in &fnode.args {
                stack.push(self.vals[a as usize].src);
            }
        }
        // ...then evaluate it in creation order, which is topological.
        let device = self.device.clone();
        for fid in 0..=target_fid {
            if !needed[fid] {
                continue;
            }
            let result = {
                let fnode = &self.funcs[fid];
                let mut args = Vec::with_capacity(fnode.args.len());
                for &a in &fnode.args {
                    args.push(self.vals[a as usize].value.as_ref().ok_or_else(|| {
                        TaperError::Internal(format!(
                            "argument value {} unavailable for {}",
                            a,
                            fnode.func.name()
                        ))
                    })?);
                }
                trace!("forward {}#{}", fnode.func.name(), fid);
                fnode.func.forward(&args, device.as_ref())?
            };
            let ret = self.funcs[fid].ret as usize;
            self.vals[ret].value = Some(result);
        }
        Ok(())
    }

    /// Backward pass from `node`, seeding its gradient with ones.
    ///
    /// If the node has never been evaluated, its dependency closure is
    /// forward-evaluated implicitly first. Previously accumulated graph
    /// gradients are discarded; parameter gradients are left to accumulate
    /// across calls and are reset explicitly by their owners.
    pub fn backward(&mut self, node: Node) -> Result<(), TaperError> {
        let vid = self.check_node(node, "Graph::backward")?;
        self.forward_by_id(vid)?;
        let seed = self.device.new_tensor_filled(&self.vals[vid].shape, 1.0);
        self.run_backward(vid, seed)
    }

    /// Backward pass from `node` with a caller-supplied seed gradient, whose
    /// shape must equal the node's shape.
    pub fn backward_with(&mut self, node: Node, seed: Tensor) -> Result<(), TaperError> {
        let vid = self.check_node(node, "Graph::backward")?;
        if seed.shape() != &self.vals[vid].shape {
            return Err(TaperError::ShapeMismatch {
                operation: "Graph::backward".to_string(),
                expected: self.vals[vid].shape.clone(),
                actual: seed.shape().clone(),
            });
        }
        if seed.device_id() != self.device.id() {
            return Err(TaperError::DeviceMismatch {
                operation: "Graph::backward".to_string(),
            });
        }
        self.forward_by_id(vid)?;
        self.run_backward(vid, seed)
    }

    fn run_backward(&mut self, vid: usize, seed: Tensor) -> Result<(), TaperError> {
        for val in &mut self.vals {
            val.grad = None;
        }
        self.vals[vid].grad = Some(seed);

        // Functions recorded after the target cannot affect it (topological
        // invariant), so the scan starts at its producer and walks down.
        let target_fid = self.vals[vid].src as usize;
        debug!("backward from value {} (function scan {}..0)", vid, target_fid);
        let device = self.device.clone();
        for fid in (0..=target_fid).rev() {
            let ret = self.funcs[fid].ret as usize;
            let gy = match self.vals[ret].grad.take() {
                Some(g) => g,
                // Nothing downstream of the target consumed this value.
                None => continue,
            };
            let contributions = {
                let fnode = &self.funcs[fid];
                let y = self.vals[ret].value.as_ref().ok_or_else(|| {
                    TaperError::Internal(format!(
                        "backward reached uncomputed value {}",
                        fnode.ret
                    ))
                })?;
                let mut args = Vec::with_capacity(fnode.args.len());
                for &a in &fnode.args {
                    args.push(self.vals[a as usize].value.as_ref().ok_or_else(|| {
                        TaperError::Internal(format!("backward reached uncomputed value {}", a))
                    })?);
                }
                trace!("backward {}#{}", fnode.func.name(), fid);
                fnode.func.backward(&args, y, &gy, device.as_ref())?
            };
            self.vals[ret].grad = Some(gy);

            let arg_ids = self.funcs[fid].args.clone();
            if contributions.len() != arg_ids.len() {
                return Err(TaperError::Internal(format!(
                    "{} returned {} gradients for {} arguments",
                    self.funcs[fid].func.name(),
                    contributions.len(),
                    arg_ids.len()
                )));
            }
            for (a, contribution) in arg_ids.into_iter().zip(contributions) {
                let contribution = match contribution {
                    Some(c) => c,
                    None => continue,
                };
                let a = a as usize;
                let shape = self.vals[a].shape.clone();
                // Gradient buffers appear lazily, as zeros, on first write.
                let dst = self.vals[a]
                    .grad
                    .get_or_insert_with(|| device.new_tensor(&shape));
                device.accumulate(dst, &contribution)?;
            }
        }
        Ok(())
    }

    /// Accumulated gradient of the referenced node after a backward pass, or
    /// `None` if no gradient reached it.
    pub fn gradient(&self, node: Node) -> Result<Option<&Tensor>, TaperError> {
        let vid = self.check_node(node, "Graph::gradient")?;
        Ok(self.vals[vid].grad.as_ref())
    }

    /// Human-readable listing of the recorded arena, for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "graph #{} (epoch {}): {} values, {} functions",
            self.id,
            self.epoch,
            self.vals.len(),
            self.funcs.len()
        );
        for (i, v) in self.vals.iter().enumerate() {
            let _ = writeln!(
                out,
                "  value {}: shape {}, src {}, sinks {:?}, computed: {}",
                i,
                v.shape,
                v.src,
                v.sinks,
                v.value.is_some()
            );
        }
        for (i, f) in self.funcs.iter().enumerate() {
            let _ = writeln!(
                out,
                "  function {}: {} args {:?} -> {}",
                i,
                f.func.name(),
                f.args,
                f.ret
            );
        }
        out
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
