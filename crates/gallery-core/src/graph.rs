//! The attributed, labeled graph consumed by preprocessing.

use crate::error::{Error, Result};
use crate::sparse;
use ndarray::{Array1, Array2, Axis};
use sprs::CsMat;

/// Node attribute matrix (N x F), dense or sparse.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrMatrix {
    Dense(Array2<f64>),
    Sparse(CsMat<f64>),
}

impl AttrMatrix {
    pub fn n_rows(&self) -> usize {
        match self {
            AttrMatrix::Dense(x) => x.nrows(),
            AttrMatrix::Sparse(x) => x.rows(),
        }
    }

    pub fn n_cols(&self) -> usize {
        match self {
            AttrMatrix::Dense(x) => x.ncols(),
            AttrMatrix::Sparse(x) => x.cols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, AttrMatrix::Sparse(_))
    }

    /// Dense copy (no-op clone for dense input).
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            AttrMatrix::Dense(x) => x.clone(),
            AttrMatrix::Sparse(x) => sparse::to_dense(x),
        }
    }

    /// Rows `index`, in order.
    pub fn select_rows(&self, index: &[usize]) -> Result<AttrMatrix> {
        if let Some(&bad) = index.iter().find(|&&i| i >= self.n_rows()) {
            return Err(Error::NodeOutOfRange {
                index: bad,
                n_nodes: self.n_rows(),
            });
        }
        Ok(match self {
            AttrMatrix::Dense(x) => AttrMatrix::Dense(x.select(Axis(0), index)),
            AttrMatrix::Sparse(x) => AttrMatrix::Sparse(sparse::select_rows(x, index)?),
        })
    }

    /// `adj · self`, used to precompute one propagation step.
    pub fn propagate(&self, adj: &CsMat<f64>) -> Result<AttrMatrix> {
        Ok(match self {
            AttrMatrix::Dense(x) => AttrMatrix::Dense(sparse::spmm_dense(adj, x)?),
            AttrMatrix::Sparse(x) => AttrMatrix::Sparse(sparse::spmm_sparse(adj, x)?),
        })
    }
}

impl From<Array2<f64>> for AttrMatrix {
    fn from(x: Array2<f64>) -> Self {
        AttrMatrix::Dense(x)
    }
}

impl From<CsMat<f64>> for AttrMatrix {
    fn from(x: CsMat<f64>) -> Self {
        AttrMatrix::Sparse(x)
    }
}

/// A sparse, attributed, labeled graph.
///
/// Read-only once built: preprocessing derives new matrices and never
/// mutates these. Node `i` is row/column `i` of every member.
#[derive(Debug, Clone)]
pub struct Graph {
    adj_matrix: CsMat<f64>,
    attr_matrix: AttrMatrix,
    labels: Array1<i64>,
}

impl Graph {
    /// Validate and build a graph.
    ///
    /// # Errors
    /// `ShapeMismatch` when the adjacency is not square or the attribute
    /// rows / label count differ from the node count.
    pub fn new(
        adj_matrix: CsMat<f64>,
        attr_matrix: impl Into<AttrMatrix>,
        labels: Array1<i64>,
    ) -> Result<Self> {
        let attr_matrix = attr_matrix.into();
        let n = adj_matrix.rows();
        if adj_matrix.cols() != n {
            return Err(Error::shape("adjacency columns", n, adj_matrix.cols()));
        }
        if attr_matrix.n_rows() != n {
            return Err(Error::shape("attribute rows", n, attr_matrix.n_rows()));
        }
        if labels.len() != n {
            return Err(Error::shape("labels", n, labels.len()));
        }
        Ok(Self {
            adj_matrix,
            attr_matrix,
            labels,
        })
    }

    /// Build from an undirected edge list.
    pub fn from_edges(
        edges: &[(usize, usize)],
        attr_matrix: impl Into<AttrMatrix>,
        labels: Array1<i64>,
    ) -> Result<Self> {
        let n = labels.len();
        let adj = sparse::adjacency_from_edges(n, edges, true)?;
        Self::new(adj, attr_matrix, labels)
    }

    pub fn adj_matrix(&self) -> &CsMat<f64> {
        &self.adj_matrix
    }

    pub fn attr_matrix(&self) -> &AttrMatrix {
        &self.attr_matrix
    }

    pub fn labels(&self) -> &Array1<i64> {
        &self.labels
    }

    pub fn n_nodes(&self) -> usize {
        self.adj_matrix.rows()
    }

    pub fn n_attrs(&self) -> usize {
        self.attr_matrix.n_cols()
    }

    /// `max(label) + 1`, or 0 for an unlabeled (empty) graph.
    pub fn n_classes(&self) -> usize {
        self.labels
            .iter()
            .copied()
            .max()
            .map_or(0, |max| usize::try_from(max).map_or(0, |m| m + 1))
    }

    pub fn is_symmetric(&self) -> bool {
        sparse::is_symmetric(&self.adj_matrix, 1e-12)
    }

    /// Labels of the nodes in `index`.
    pub fn labels_at(&self, index: &[usize]) -> Result<Array1<i64>> {
        self.check_index(index)?;
        Ok(self.labels.select(Axis(0), index))
    }

    /// Fail with `NodeOutOfRange` on the first index outside the graph.
    pub fn check_index(&self, index: &[usize]) -> Result<()> {
        let n_nodes = self.n_nodes();
        match index.iter().find(|&&i| i >= n_nodes) {
            Some(&i) => Err(Error::NodeOutOfRange { index: i, n_nodes }),
            None => Ok(()),
        }
    }

    /// New graph whose node `i` is this graph's node `perm[i]`.
    ///
    /// Anything derived from the old ordering (normalized adjacency,
    /// materialized tensors) must be recomputed for the result.
    pub fn reorder(&self, perm: &[usize]) -> Result<Graph> {
        let adj = sparse::permute(&self.adj_matrix, perm)?;
        let attr = self.attr_matrix.select_rows(perm)?;
        let labels = self.labels.select(Axis(0), perm);
        Graph::new(adj, attr, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn triangle() -> Graph {
        Graph::from_edges(
            &[(0, 1), (1, 2), (2, 0)],
            Array2::<f64>::eye(3),
            array![0, 1, 1],
        )
        .unwrap()
    }

    #[test]
    fn test_graph_dimensions() {
        let g = triangle();
        assert_eq!(g.n_nodes(), 3);
        assert_eq!(g.n_attrs(), 3);
        assert_eq!(g.n_classes(), 2);
        assert!(g.is_symmetric());
    }

    #[test]
    fn test_graph_rejects_label_mismatch() {
        let adj = sparse::adjacency_from_edges(3, &[(0, 1)], true).unwrap();
        let err = Graph::new(adj, Array2::<f64>::zeros((3, 2)), array![0, 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_graph_rejects_non_square() {
        let adj = sparse::from_dense(&Array2::<f64>::ones((2, 3)));
        assert!(Graph::new(adj, Array2::<f64>::zeros((2, 1)), array![0, 0]).is_err());
    }

    #[test]
    fn test_labels_at() {
        let g = triangle();
        assert_eq!(g.labels_at(&[2, 0]).unwrap(), array![1, 0]);
        assert!(matches!(
            g.labels_at(&[3]),
            Err(Error::NodeOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_reorder_moves_everything_together() {
        let g = Graph::from_edges(
            &[(0, 1)],
            array![[1.0], [2.0], [3.0]],
            array![0, 1, 2],
        )
        .unwrap();
        let r = g.reorder(&[2, 0, 1]).unwrap();
        assert_eq!(r.labels(), &array![2, 0, 1]);
        assert_eq!(r.attr_matrix().to_dense(), array![[3.0], [1.0], [2.0]]);
        // old edge (0, 1) is now (1, 2)
        let dense = sparse::to_dense(r.adj_matrix());
        assert_eq!(dense[[1, 2]], 1.0);
        assert_eq!(dense[[2, 1]], 1.0);
        assert_eq!(dense[[0, 1]], 0.0);
    }

    #[test]
    fn test_sparse_attr_propagate() {
        let g = triangle();
        let attr = AttrMatrix::Sparse(sparse::from_dense(&Array2::eye(3)));
        let out = attr.propagate(g.adj_matrix()).unwrap();
        assert!(out.is_sparse());
        assert_eq!(out.to_dense(), sparse::to_dense(g.adj_matrix()));
    }
}
