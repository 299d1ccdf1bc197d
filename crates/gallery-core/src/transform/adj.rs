//! Symmetric adjacency normalization `D^r A D^r`.
//!
//! ```text
//! A'    = A + w I            (optional self-loops, weight w)
//! d_i   = sum_j A'_ij
//! A_hat = D^r A' D^r         D^r = diag(d_i^r)
//! ```
//!
//! | rate | result |
//! |------|--------|
//! | -0.5 | GCN propagation matrix (Kipf & Welling) |
//! | -1.0 | `D^-1 A D^-1`, used for the variance channel of RobustGCN |
//! |  0.0 | `A'` unchanged |
//!
//! Nodes with zero degree get a scaling factor of 0: their row and column
//! stay empty instead of turning into `inf`/`NaN`.

use crate::error::{Error, Result};
use crate::sparse;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Normalize `adj` with `rate`, without self-loops. `None` returns a copy.
pub fn normalize_adj(adj: &CsMat<f64>, rate: Option<f64>) -> Result<CsMat<f64>> {
    NormalizeAdj::new(rate).apply(adj)
}

/// Normalize each matrix with the rate at the same position.
pub fn normalize_adj_list(
    adjs: &[CsMat<f64>],
    rates: &[Option<f64>],
) -> Result<Vec<CsMat<f64>>> {
    NormalizeAdj::new(None).apply_many(adjs, rates)
}

/// Degree scaling `d^rate`, with degree-zero and non-finite results mapped to 0.
fn degree_scale(degree: f64, rate: f64) -> f64 {
    if degree == 0.0 {
        return 0.0;
    }
    let scale = degree.powf(rate);
    if scale.is_finite() {
        scale
    } else {
        0.0
    }
}

/// Adjacency normalization settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizeAdj {
    /// Exponent applied to the degree matrix (`None` = no normalization).
    pub rate: Option<f64>,
    /// Weight of the self-loops added before normalizing (0 = none).
    pub fill_weight: f64,
}

impl Default for NormalizeAdj {
    /// GCN default: rate -0.5 with unit self-loops.
    fn default() -> Self {
        Self {
            rate: Some(-0.5),
            fill_weight: 1.0,
        }
    }
}

impl NormalizeAdj {
    pub fn new(rate: Option<f64>) -> Self {
        Self {
            rate,
            fill_weight: 0.0,
        }
    }

    pub fn with_self_loops(mut self, fill_weight: f64) -> Self {
        self.fill_weight = fill_weight;
        self
    }

    pub fn with_rate(mut self, rate: Option<f64>) -> Self {
        self.rate = rate;
        self
    }

    /// Normalize one matrix. Storage (CSR/CSC) and node order are kept.
    pub fn apply(&self, adj: &CsMat<f64>) -> Result<CsMat<f64>> {
        self.apply_with_rate(adj, self.rate)
    }

    /// Normalize `adjs[i]` with `rates[i]`, sharing this instance's self-loop weight.
    ///
    /// # Errors
    /// `ShapeMismatch` when the two lists differ in length.
    pub fn apply_many(
        &self,
        adjs: &[CsMat<f64>],
        rates: &[Option<f64>],
    ) -> Result<Vec<CsMat<f64>>> {
        if adjs.len() != rates.len() {
            return Err(Error::shape(
                "adjacency/rate pairs",
                adjs.len(),
                rates.len(),
            ));
        }
        adjs.iter()
            .zip(rates)
            .map(|(adj, &rate)| self.apply_with_rate(adj, rate))
            .collect()
    }

    fn apply_with_rate(&self, adj: &CsMat<f64>, rate: Option<f64>) -> Result<CsMat<f64>> {
        let Some(rate) = rate else {
            return Ok(adj.clone());
        };
        if adj.rows() != adj.cols() {
            return Err(Error::shape("square adjacency", adj.rows(), adj.cols()));
        }

        let (mut rows, mut cols, mut data) = sparse::triplets(adj);
        if self.fill_weight != 0.0 {
            for i in 0..adj.rows() {
                rows.push(i);
                cols.push(i);
                data.push(self.fill_weight);
            }
        }
        let with_loops = sparse::from_triplets(adj.shape(), rows, cols, data, adj.storage());

        let scale: Vec<f64> = sparse::row_sums(&with_loops)
            .into_iter()
            .map(|d| degree_scale(d, rate))
            .collect();

        let (rows, cols, data) = sparse::triplets(&with_loops);
        let data = rows
            .iter()
            .zip(&cols)
            .zip(data)
            .map(|((&r, &c), value)| scale[r] * value * scale[c])
            .collect();
        Ok(sparse::from_triplets(
            adj.shape(),
            rows,
            cols,
            data,
            adj.storage(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{adjacency_from_edges, to_dense};

    fn ring(n: usize) -> CsMat<f64> {
        let edges: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
        adjacency_from_edges(n, &edges, true).unwrap()
    }

    #[test]
    fn test_ring_normalization_is_half() {
        let adj = ring(6);
        let norm = normalize_adj(&adj, Some(-0.5)).unwrap();
        assert_eq!(norm.nnz(), adj.nnz());
        for (&v, _) in norm.iter() {
            assert!((v - 0.5).abs() < 1e-12, "got {v}");
        }
    }

    #[test]
    fn test_rate_zero_is_identity() {
        let adj = ring(5);
        let norm = normalize_adj(&adj, Some(0.0)).unwrap();
        assert_eq!(to_dense(&norm), to_dense(&adj));
    }

    #[test]
    fn test_rate_none_passes_through() {
        let adj = ring(4);
        let norm = NormalizeAdj::default().with_rate(None).apply(&adj).unwrap();
        assert_eq!(norm, adj);
    }

    #[test]
    fn test_isolated_node_stays_zero() {
        // node 3 has no edges
        let adj = adjacency_from_edges(4, &[(0, 1), (1, 2)], true).unwrap();
        for rate in [-0.5, -1.0, 0.5] {
            let dense = to_dense(&normalize_adj(&adj, Some(rate)).unwrap());
            assert!(dense.iter().all(|v| v.is_finite()));
            assert!(dense.row(3).iter().all(|&v| v == 0.0));
            assert!(dense.column(3).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_self_loops_change_degree() {
        let adj = ring(6);
        let norm = NormalizeAdj::default().apply(&adj).unwrap();
        // degree 3 with the loop: every entry 1/3
        assert_eq!(norm.nnz(), adj.nnz() + 6);
        for (&v, _) in norm.iter() {
            assert!((v - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_self_loops_give_isolated_nodes_a_diagonal() {
        let adj = adjacency_from_edges(3, &[(0, 1)], true).unwrap();
        let dense = to_dense(&NormalizeAdj::default().apply(&adj).unwrap());
        assert!((dense[[2, 2]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_storage_is_preserved() {
        let (rows, cols, data) = sparse::triplets(&ring(4));
        let csc = sparse::from_triplets((4, 4), rows, cols, data, sprs::CompressedStorage::CSC);
        let norm = normalize_adj(&csc, Some(-0.5)).unwrap();
        assert!(!norm.is_csr());
    }

    #[test]
    fn test_apply_many_pairs_positionally() {
        let adj = ring(6);
        let out = normalize_adj_list(&[adj.clone(), adj], &[Some(-0.5), Some(-1.0)]).unwrap();
        assert_eq!(out.len(), 2);
        for (&v, _) in out[1].iter() {
            assert!((v - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_apply_many_length_mismatch() {
        let adj = ring(3);
        let err = normalize_adj_list(&[adj], &[Some(-0.5), Some(-1.0)]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }
}
