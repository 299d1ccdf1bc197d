//! Sparse matrix helpers on top of `sprs`.
//!
//! Everything here works on `CsMat<f64>` and returns owned matrices. Row
//! access goes through `outer_view` on CSR storage, so callers that slice
//! rows repeatedly (the batch sequencers) convert once with [`to_csr`].

use crate::error::{Error, Result};
use ndarray::Array2;
use sprs::{CompressedStorage, CsMat, TriMat};
use std::collections::BTreeSet;

/// Assemble a matrix from triplets in the requested storage.
///
/// Duplicate `(row, col)` pairs are summed.
pub fn from_triplets(
    shape: (usize, usize),
    rows: Vec<usize>,
    cols: Vec<usize>,
    data: Vec<f64>,
    storage: CompressedStorage,
) -> CsMat<f64> {
    let tri = TriMat::from_triplets(shape, rows, cols, data);
    match storage {
        CompressedStorage::CSR => tri.to_csr(),
        CompressedStorage::CSC => tri.to_csc(),
    }
}

/// Build an unweighted adjacency matrix from an edge list.
///
/// With `symmetric`, every edge is inserted in both directions. Repeated
/// edges collapse to a single entry of weight 1.
pub fn adjacency_from_edges(
    n_nodes: usize,
    edges: &[(usize, usize)],
    symmetric: bool,
) -> Result<CsMat<f64>> {
    let mut unique = BTreeSet::new();
    for &(u, v) in edges {
        for index in [u, v] {
            if index >= n_nodes {
                return Err(Error::NodeOutOfRange { index, n_nodes });
            }
        }
        unique.insert((u, v));
        if symmetric {
            unique.insert((v, u));
        }
    }

    let (rows, cols): (Vec<usize>, Vec<usize>) = unique.into_iter().unzip();
    let data = vec![1.0; rows.len()];
    Ok(from_triplets(
        (n_nodes, n_nodes),
        rows,
        cols,
        data,
        CompressedStorage::CSR,
    ))
}

/// Owned CSR copy of `m`.
pub fn to_csr(m: &CsMat<f64>) -> CsMat<f64> {
    if m.is_csr() {
        return m.clone();
    }
    let (rows, cols, data) = triplets(m);
    from_triplets(m.shape(), rows, cols, data, CompressedStorage::CSR)
}

/// Explicit `(rows, cols, values)` of every stored entry.
pub fn triplets(m: &CsMat<f64>) -> (Vec<usize>, Vec<usize>, Vec<f64>) {
    let mut rows = Vec::with_capacity(m.nnz());
    let mut cols = Vec::with_capacity(m.nnz());
    let mut data = Vec::with_capacity(m.nnz());
    for (&value, (r, c)) in m.iter() {
        rows.push(r);
        cols.push(c);
        data.push(value);
    }
    (rows, cols, data)
}

/// `d_i = sum_j A_ij`.
pub fn row_sums(m: &CsMat<f64>) -> Vec<f64> {
    let mut sums = vec![0.0; m.rows()];
    for (&value, (r, _)) in m.iter() {
        sums[r] += value;
    }
    sums
}

/// `||A[:, j]||^2` for every column.
pub fn column_sq_norms(m: &CsMat<f64>) -> Vec<f64> {
    let mut norms = vec![0.0; m.cols()];
    for (&value, (_, c)) in m.iter() {
        norms[c] += value * value;
    }
    norms
}

fn check_indices(indices: &[usize], bound: usize) -> Result<()> {
    match indices.iter().find(|&&i| i >= bound) {
        Some(&index) => Err(Error::NodeOutOfRange {
            index,
            n_nodes: bound,
        }),
        None => Ok(()),
    }
}

/// Rows `rows` of `m`, in that order, as CSR.
pub fn select_rows(m: &CsMat<f64>, rows: &[usize]) -> Result<CsMat<f64>> {
    select(m, rows, None)
}

/// `m[rows][:, cols]` as CSR. `cols = None` keeps every column.
///
/// Repeated indices are allowed and produce repeated rows/columns.
pub fn select(m: &CsMat<f64>, rows: &[usize], cols: Option<&[usize]>) -> Result<CsMat<f64>> {
    check_indices(rows, m.rows())?;

    // original column -> positions in the output
    let col_positions = match cols {
        Some(cols) => {
            check_indices(cols, m.cols())?;
            let mut positions = vec![Vec::new(); m.cols()];
            for (pos, &c) in cols.iter().enumerate() {
                positions[c].push(pos);
            }
            Some(positions)
        }
        None => None,
    };
    let n_cols = cols.map_or(m.cols(), <[usize]>::len);

    let csr = to_csr(m);
    let mut out_rows = Vec::new();
    let mut out_cols = Vec::new();
    let mut data = Vec::new();

    for (out_r, &r) in rows.iter().enumerate() {
        let Some(row) = csr.outer_view(r) else {
            continue;
        };
        for (c, &value) in row.iter() {
            match &col_positions {
                Some(positions) => {
                    for &out_c in &positions[c] {
                        out_rows.push(out_r);
                        out_cols.push(out_c);
                        data.push(value);
                    }
                }
                None => {
                    out_rows.push(out_r);
                    out_cols.push(c);
                    data.push(value);
                }
            }
        }
    }

    Ok(from_triplets(
        (rows.len(), n_cols),
        out_rows,
        out_cols,
        data,
        CompressedStorage::CSR,
    ))
}

/// Relabel nodes: entry `(i, j)` of the result is `m[perm[i], perm[j]]`.
pub fn permute(m: &CsMat<f64>, perm: &[usize]) -> Result<CsMat<f64>> {
    if perm.len() != m.rows() || m.rows() != m.cols() {
        return Err(Error::shape("permutation", m.rows(), perm.len()));
    }
    let mut seen = vec![false; perm.len()];
    for &p in perm {
        if p >= perm.len() || seen[p] {
            return Err(Error::InvalidConfig(format!(
                "{p} breaks the node permutation"
            )));
        }
        seen[p] = true;
    }
    select(m, perm, Some(perm))
}

/// Sparse-dense product `m · x`.
pub fn spmm_dense(m: &CsMat<f64>, x: &Array2<f64>) -> Result<Array2<f64>> {
    if m.cols() != x.nrows() {
        return Err(Error::shape("sparse-dense product", m.cols(), x.nrows()));
    }
    let mut out = Array2::zeros((m.rows(), x.ncols()));
    for (&value, (r, c)) in m.iter() {
        let src = x.row(c);
        let mut dst = out.row_mut(r);
        dst.scaled_add(value, &src);
    }
    Ok(out)
}

/// Sparse-sparse product `a · b`, keeping the storage of `a`.
pub fn spmm_sparse(a: &CsMat<f64>, b: &CsMat<f64>) -> Result<CsMat<f64>> {
    if a.cols() != b.rows() {
        return Err(Error::shape("sparse-sparse product", a.cols(), b.rows()));
    }
    let b = to_csr(b);
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut data = Vec::new();
    for (&value, (r, k)) in a.iter() {
        let Some(b_row) = b.outer_view(k) else {
            continue;
        };
        for (c, &w) in b_row.iter() {
            rows.push(r);
            cols.push(c);
            data.push(value * w);
        }
    }
    Ok(from_triplets(
        (a.rows(), b.cols()),
        rows,
        cols,
        data,
        a.storage(),
    ))
}

pub fn to_dense(m: &CsMat<f64>) -> Array2<f64> {
    let mut out = Array2::zeros(m.shape());
    for (&value, (r, c)) in m.iter() {
        out[[r, c]] += value;
    }
    out
}

/// Keep the nonzero entries of `x` as a CSR matrix.
pub fn from_dense(x: &Array2<f64>) -> CsMat<f64> {
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut data = Vec::new();
    for ((r, c), &value) in x.indexed_iter() {
        if value != 0.0 {
            rows.push(r);
            cols.push(c);
            data.push(value);
        }
    }
    from_triplets(x.dim(), rows, cols, data, CompressedStorage::CSR)
}

/// Whether `m == m^T` within `tol`.
pub fn is_symmetric(m: &CsMat<f64>, tol: f64) -> bool {
    if m.rows() != m.cols() {
        return false;
    }
    let dense = to_dense(m);
    dense
        .indexed_iter()
        .all(|((r, c), &value)| (value - dense[[c, r]]).abs() <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn path3() -> CsMat<f64> {
        adjacency_from_edges(3, &[(0, 1), (1, 2)], true).unwrap()
    }

    #[test]
    fn test_adjacency_from_edges_symmetric() {
        let adj = path3();
        assert_eq!(adj.shape(), (3, 3));
        assert_eq!(adj.nnz(), 4);
        assert!(is_symmetric(&adj, 0.0));
        assert_eq!(row_sums(&adj), vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_adjacency_duplicate_edges_collapse() {
        let adj = adjacency_from_edges(2, &[(0, 1), (0, 1), (1, 0)], true).unwrap();
        assert_eq!(adj.nnz(), 2);
        assert_eq!(to_dense(&adj), array![[0.0, 1.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_adjacency_rejects_out_of_range() {
        let err = adjacency_from_edges(2, &[(0, 5)], true).unwrap_err();
        assert!(matches!(err, Error::NodeOutOfRange { index: 5, n_nodes: 2 }));
    }

    #[test]
    fn test_select_rows_and_cols() {
        let adj = path3();
        let sub = select(&adj, &[1, 2], Some(&[0, 1])).unwrap();
        assert_eq!(sub.shape(), (2, 2));
        assert_eq!(to_dense(&sub), array![[1.0, 0.0], [0.0, 1.0]]);
    }

    #[test]
    fn test_select_from_csc_matches_csr() {
        let adj = path3();
        let (rows, cols, data) = triplets(&adj);
        let csc = from_triplets(adj.shape(), rows, cols, data, CompressedStorage::CSC);
        assert!(!csc.is_csr());
        let a = to_dense(&select_rows(&adj, &[2, 0]).unwrap());
        let b = to_dense(&select_rows(&csc, &[2, 0]).unwrap());
        assert_eq!(a, b);
        assert_eq!(a, array![[0.0, 1.0, 0.0], [0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_column_sq_norms() {
        let m = from_dense(&array![[1.0, 0.0], [2.0, 3.0]]);
        assert_eq!(column_sq_norms(&m), vec![5.0, 9.0]);
    }

    #[test]
    fn test_spmm_dense_matches_dense_product() {
        let adj = path3();
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let out = spmm_dense(&adj, &x).unwrap();
        assert_eq!(out, to_dense(&adj).dot(&x));
    }

    #[test]
    fn test_spmm_sparse_matches_dense_product() {
        let adj = path3();
        let prod = spmm_sparse(&adj, &adj).unwrap();
        let dense = to_dense(&adj);
        assert_eq!(to_dense(&prod), dense.dot(&dense));
    }

    #[test]
    fn test_permute_reverses_path() {
        let adj = adjacency_from_edges(3, &[(0, 1)], true).unwrap();
        let p = permute(&adj, &[2, 1, 0]).unwrap();
        assert_eq!(
            to_dense(&p),
            array![[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]
        );
    }

    #[test]
    fn test_permute_rejects_repeats() {
        let adj = path3();
        assert!(permute(&adj, &[0, 0, 1]).is_err());
    }
}
