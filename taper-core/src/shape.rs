use crate::error::TaperError;
use std::fmt;

/// Maximum number of explicit dimensions a shape can carry.
pub const MAX_RANK: usize = 8;

/// Dimensions of a tensor: an ordered list of explicit dimension sizes plus a
/// batch size.
///
/// The batch is an implicit leading replication factor: a shape `[2, 3]` with
/// batch 4 describes four independent 2x3 samples stored contiguously. A batch
/// of 1 means "broadcast over batch" when combined with batched operands.
///
/// Trailing dimensions of size 1 are canonicalized away, so `[2, 1]` and `[2]`
/// denote the same shape. A `Shape` is immutable once constructed; every
/// algebra operation returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    batch: usize,
}

impl Shape {
    /// Creates a shape with the given explicit dimensions and batch size 1.
    pub fn new(dims: impl Into<Vec<usize>>) -> Result<Self, TaperError> {
        Self::with_batch(dims, 1)
    }

    /// Creates a shape with the given explicit dimensions and batch size.
    pub fn with_batch(dims: impl Into<Vec<usize>>, batch: usize) -> Result<Self, TaperError> {
        let mut dims: Vec<usize> = dims.into();
        if dims.len() > MAX_RANK {
            return Err(TaperError::InvalidShape {
                operation: "Shape::new".to_string(),
                message: format!("rank {} exceeds the maximum of {}", dims.len(), MAX_RANK),
            });
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(TaperError::InvalidShape {
                operation: "Shape::new".to_string(),
                message: format!("dimension of size 0 in {:?}", dims),
            });
        }
        if batch == 0 {
            return Err(TaperError::InvalidShape {
                operation: "Shape::new".to_string(),
                message: "batch size must be at least 1".to_string(),
            });
        }
        // Canonical form: no trailing dimensions of size 1.
        while dims.last() == Some(&1) {
            dims.pop();
        }
        Ok(Shape { dims, batch })
    }

    /// A scalar shape: no explicit dimensions, batch 1.
    pub fn scalar() -> Self {
        Shape {
            dims: Vec::new(),
            batch: 1,
        }
    }

    /// Shorthand for a rank-1 shape `[n]`.
    pub fn vector(n: usize) -> Result<Self, TaperError> {
        Self::new(vec![n])
    }

    /// Shorthand for a rank-2 shape `[rows, cols]`.
    pub fn matrix(rows: usize, cols: usize) -> Result<Self, TaperError> {
        Self::new(vec![rows, cols])
    }

    /// Size of the `i`-th explicit dimension; 1 beyond the stored rank.
    pub fn dim(&self, i: usize) -> usize {
        self.dims.get(i).copied().unwrap_or(1)
    }

    /// Explicit dimensions in canonical (trailing-1-free) form.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Number of stored explicit dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Batch size.
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Whether the batch size is greater than 1.
    pub fn has_batch(&self) -> bool {
        self.batch > 1
    }

    /// Number of elements in a single batch sample.
    pub fn volume(&self) -> usize {
        self.dims.iter().product()
    }

    /// Total number of elements: `volume() * batch()`.
    pub fn size(&self) -> usize {
        self.volume() * self.batch
    }

    /// Returns a copy of this shape with the batch size replaced by `batch`.
    pub fn resize_batch(&self, batch: usize) -> Result<Self, TaperError> {
        if batch == 0 {
            return Err(TaperError::InvalidShape {
                operation: "Shape::resize_batch".to_string(),
                message: "batch size must be at least 1".to_string(),
            });
        }
        Ok(Shape {
            dims: self.dims.clone(),
            batch,
        })
    }

    /// Returns a copy of this shape with dimension `axis` replaced by `size`.
    pub(crate) fn resize_dim(&self, axis: usize, size: usize) -> Result<Self, TaperError> {
        if axis >= MAX_RANK {
            return Err(TaperError::InvalidAxis {
                operation: "Shape::resize_dim".to_string(),
                axis,
                shape: self.clone(),
            });
        }
        let mut dims = self.dims.clone();
        if dims.len() <= axis {
            dims.resize(axis + 1, 1);
        }
        dims[axis] = size;
        Shape::with_batch(dims, self.batch)
    }

    /// Whether two shapes can participate in a broadcasting binary operation:
    /// dimension-wise each pair of sizes is equal or one of them is 1, and the
    /// batch sizes are equal or one of them is 1.
    pub fn compatible(&self, other: &Shape) -> bool {
        if self.batch != other.batch && self.batch != 1 && other.batch != 1 {
            return false;
        }
        let rank = self.rank().max(other.rank());
        (0..rank).all(|i| {
            let (a, b) = (self.dim(i), other.dim(i));
            a == b || a == 1 || b == 1
        })
    }

    /// Broadcast combination of two compatible shapes: elementwise max of
    /// dimensions and max of batch sizes.
    pub fn broadcast(&self, other: &Shape, operation: &str) -> Result<Self, TaperError> {
        if !self.compatible(other) {
            return Err(TaperError::IncompatibleShapes {
                operation: operation.to_string(),
                lhs: self.clone(),
                rhs: other.clone(),
            });
        }
        let rank = self.rank().max(other.rank());
        let dims: Vec<usize> = (0..rank).map(|i| self.dim(i).max(other.dim(i))).collect();
        Shape::with_batch(dims, self.batch.max(other.batch))
    }

    /// Shape of the matrix transpose. The engine restricts explicit axes to at
    /// most 2, so this swaps the two leading dimensions.
    pub fn transposed(&self) -> Result<Self, TaperError> {
        if self.rank() > 2 {
            return Err(TaperError::InvalidShape {
                operation: "transpose".to_string(),
                message: format!("transpose requires rank <= 2, got {}", self),
            });
        }
        Shape::with_batch(vec![self.dim(1), self.dim(0)], self.batch)
    }

    /// Shape of the matrix product `self x other`. Both operands must have
    /// rank <= 2 with matching inner dimensions; batches broadcast.
    pub fn matmul(&self, other: &Shape) -> Result<Self, TaperError> {
        let mismatch = || TaperError::IncompatibleShapes {
            operation: "matmul".to_string(),
            lhs: self.clone(),
            rhs: other.clone(),
        };
        if self.rank() > 2 || other.rank() > 2 {
            return Err(mismatch());
        }
        if self.dim(1) != other.dim(0) {
            return Err(mismatch());
        }
        if self.batch != other.batch && self.batch != 1 && other.batch != 1 {
            return Err(mismatch());
        }
        Shape::with_batch(
            vec![self.dim(0), other.dim(1)],
            self.batch.max(other.batch),
        )
    }

    /// Shape of the concatenation of `shapes` along `axis`. Dimensions other
    /// than `axis` and batch sizes must match or be 1 (broadcast); the result
    /// takes the elementwise maximum there and the sum along `axis`.
    pub fn concat(shapes: &[&Shape], axis: usize) -> Result<Self, TaperError> {
        let first = *shapes.first().ok_or_else(|| TaperError::InvalidArgument {
            operation: "concat".to_string(),
            message: "requires at least one input".to_string(),
        })?;
        if axis >= MAX_RANK {
            return Err(TaperError::InvalidAxis {
                operation: "concat".to_string(),
                axis,
                shape: first.clone(),
            });
        }
        let rank = shapes
            .iter()
            .map(|s| s.rank())
            .max()
            .unwrap_or(0)
            .max(axis + 1);
        let mut dims = vec![0; rank];
        let mut batch = 1;
        for s in shapes {
            for (i, dim) in dims.iter_mut().enumerate() {
                if i == axis {
                    *dim += s.dim(i);
                } else {
                    let (a, b) = (*dim, s.dim(i));
                    if a > 1 && b > 1 && a != b {
                        return Err(TaperError::IncompatibleShapes {
                            operation: "concat".to_string(),
                            lhs: first.clone(),
                            rhs: (*s).clone(),
                        });
                    }
                    *dim = a.max(b);
                }
            }
            if batch != s.batch && batch != 1 && s.batch != 1 {
                return Err(TaperError::IncompatibleShapes {
                    operation: "concat".to_string(),
                    lhs: first.clone(),
                    rhs: (*s).clone(),
                });
            }
            batch = batch.max(s.batch);
        }
        Shape::with_batch(dims, batch)
    }

    /// Shape of a `pick` along `axis` selecting `n_ids` indices. The picked
    /// axis is reduced to size 1; the result batch is the maximum of the input
    /// batch and `n_ids`. `n_ids` must be 1, equal to the input batch, or the
    /// input batch must be 1.
    pub fn pick(&self, axis: usize, n_ids: usize) -> Result<Self, TaperError> {
        if axis >= MAX_RANK {
            return Err(TaperError::InvalidAxis {
                operation: "pick".to_string(),
                axis,
                shape: self.clone(),
            });
        }
        if n_ids == 0 {
            return Err(TaperError::InvalidArgument {
                operation: "pick".to_string(),
                message: "requires at least one index".to_string(),
            });
        }
        if n_ids != 1 && n_ids != self.batch && self.batch != 1 {
            return Err(TaperError::InvalidArgument {
                operation: "pick".to_string(),
                message: format!(
                    "number of indices ({}) does not match batch size of {}",
                    n_ids, self
                ),
            });
        }
        self.resize_dim(axis, 1)?.resize_batch(self.batch.max(n_ids))
    }
}

impl fmt::Display for Shape {
    /// Formats as `[d0,d1,...]` with an `xN` suffix for batched shapes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")?;
        if self.batch > 1 {
            write!(f, "x{}", self.batch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_trailing_ones() {
        let a = Shape::new(vec![2, 1]).unwrap();
        let b = Shape::new(vec![2]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.rank(), 1);
        assert_eq!(a.dim(1), 1);
        assert_eq!(Shape::new(vec![1, 1]).unwrap(), Shape::scalar());
    }

    #[test]
    fn test_new_rejects_invalid() {
        assert!(Shape::new(vec![2, 0]).is_err());
        assert!(Shape::with_batch(vec![2], 0).is_err());
        assert!(Shape::new(vec![1; MAX_RANK + 1]).is_err());
    }

    #[test]
    fn test_size_volume() {
        let s = Shape::with_batch(vec![2, 3], 4).unwrap();
        assert_eq!(s.volume(), 6);
        assert_eq!(s.size(), 24);
        assert!(s.has_batch());
        assert_eq!(Shape::scalar().size(), 1);
    }

    #[test]
    fn test_compatible() {
        let a = Shape::with_batch(vec![2, 3], 4).unwrap();
        let b = Shape::new(vec![1, 3]).unwrap();
        let c = Shape::new(vec![4, 5]).unwrap();
        assert!(a.compatible(&b));
        assert!(b.compatible(&a));
        assert!(!a.compatible(&c));
        let d = Shape::with_batch(vec![2, 3], 5).unwrap();
        assert!(!a.compatible(&d));
    }

    #[test]
    fn test_broadcast_is_symmetric() {
        let pairs = [
            (
                Shape::with_batch(vec![2, 3], 1).unwrap(),
                Shape::with_batch(vec![1, 3], 7).unwrap(),
            ),
            (
                Shape::new(vec![5]).unwrap(),
                Shape::new(vec![5, 4]).unwrap(),
            ),
            (Shape::scalar(), Shape::with_batch(vec![3], 2).unwrap()),
        ];
        for (a, b) in &pairs {
            let ab = a.broadcast(b, "test").unwrap();
            let ba = b.broadcast(a, "test").unwrap();
            assert_eq!(ab, ba);
        }
    }

    #[test]
    fn test_broadcast_incompatible() {
        let a = Shape::new(vec![2, 3]).unwrap();
        let b = Shape::new(vec![4, 5]).unwrap();
        match a.broadcast(&b, "add").unwrap_err() {
            TaperError::IncompatibleShapes { operation, .. } => assert_eq!(operation, "add"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transposed() {
        let s = Shape::with_batch(vec![2, 3], 4).unwrap();
        let t = s.transposed().unwrap();
        assert_eq!(t, Shape::with_batch(vec![3, 2], 4).unwrap());
        // Vectors transpose into a single row.
        let v = Shape::vector(5).unwrap();
        assert_eq!(v.transposed().unwrap(), Shape::matrix(1, 5).unwrap());
        assert!(Shape::new(vec![2, 2, 2]).unwrap().transposed().is_err());
    }

    #[test]
    fn test_matmul_shape() {
        let a = Shape::matrix(2, 3).unwrap();
        let b = Shape::with_batch(vec![3, 4], 5).unwrap();
        assert_eq!(
            a.matmul(&b).unwrap(),
            Shape::with_batch(vec![2, 4], 5).unwrap()
        );
        assert!(a.matmul(&Shape::matrix(4, 2).unwrap()).is_err());
    }

    #[test]
    fn test_concat_shape() {
        let a = Shape::matrix(2, 3).unwrap();
        let b = Shape::matrix(2, 5).unwrap();
        let c = Shape::concat(&[&a, &b], 1).unwrap();
        assert_eq!(c, Shape::matrix(2, 8).unwrap());
        // Mismatch outside the concat axis is rejected.
        let d = Shape::matrix(3, 3).unwrap();
        assert!(Shape::concat(&[&a, &d], 1).is_err());
        // Concat along a new trailing axis stacks size-1 slices.
        let v = Shape::vector(4).unwrap();
        assert_eq!(
            Shape::concat(&[&v, &v], 1).unwrap(),
            Shape::matrix(4, 2).unwrap()
        );
    }

    #[test]
    fn test_pick_shape() {
        let s = Shape::with_batch(vec![4, 3], 1).unwrap();
        assert_eq!(
            s.pick(0, 5).unwrap(),
            Shape::with_batch(vec![1, 3], 5).unwrap()
        );
        let batched = Shape::with_batch(vec![4, 3], 5).unwrap();
        assert_eq!(
            batched.pick(0, 5).unwrap(),
            Shape::with_batch(vec![1, 3], 5).unwrap()
        );
        assert!(batched.pick(0, 2).is_err());
    }

    #[test]
    fn test_resize_batch() {
        let s = Shape::matrix(2, 2).unwrap();
        assert_eq!(
            s.resize_batch(3).unwrap(),
            Shape::with_batch(vec![2, 2], 3).unwrap()
        );
        assert!(s.resize_batch(0).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Shape::with_batch(vec![2, 3], 4).unwrap().to_string(),
            "[2,3]x4"
        );
        assert_eq!(Shape::vector(7).unwrap().to_string(), "[7]");
        assert_eq!(Shape::scalar().to_string(), "[]");
    }
}
