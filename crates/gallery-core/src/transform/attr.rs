//! Node attribute normalization.

use crate::error::{Error, Result};
use crate::graph::AttrMatrix;
use crate::sparse;
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use std::str::FromStr;

/// How to scale the attribute matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrNorm {
    /// Divide each row by its L1 norm.
    RowWise,
    /// Divide each row by its L2 norm.
    RowWiseL2,
    /// Divide each column by its L1 norm.
    ColWise,
    /// Divide each column by its L2 norm.
    ColWiseL2,
    #[default]
    None,
}

impl FromStr for AttrNorm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "row_wise" | "row_wise_l1" => Ok(AttrNorm::RowWise),
            "row_wise_l2" => Ok(AttrNorm::RowWiseL2),
            "col_wise" | "col_wise_l1" => Ok(AttrNorm::ColWise),
            "col_wise_l2" => Ok(AttrNorm::ColWiseL2),
            "none" => Ok(AttrNorm::None),
            _ => Err(Error::UnsupportedNormalization(s.to_string())),
        }
    }
}

#[derive(Clone, Copy)]
enum Norm {
    L1,
    L2,
}

impl Norm {
    fn finish(self, acc: f64) -> f64 {
        match self {
            Norm::L1 => acc,
            Norm::L2 => acc.sqrt(),
        }
    }

    fn term(self, v: f64) -> f64 {
        match self {
            Norm::L1 => v.abs(),
            Norm::L2 => v * v,
        }
    }
}

/// Apply `kind` to `attr`. Rows/columns with zero norm are left as they are.
pub fn normalize_attr(attr: &AttrMatrix, kind: AttrNorm) -> AttrMatrix {
    let (axis, norm) = match kind {
        AttrNorm::None => return attr.clone(),
        AttrNorm::RowWise => (Axis(0), Norm::L1),
        AttrNorm::RowWiseL2 => (Axis(0), Norm::L2),
        AttrNorm::ColWise => (Axis(1), Norm::L1),
        AttrNorm::ColWiseL2 => (Axis(1), Norm::L2),
    };
    match attr {
        AttrMatrix::Dense(x) => AttrMatrix::Dense(normalize_dense(x, axis, norm)),
        AttrMatrix::Sparse(x) => AttrMatrix::Sparse(normalize_sparse(x, axis, norm)),
    }
}

/// `axis` names the lane that gets normalized: `Axis(0)` = per row.
fn normalize_dense(x: &Array2<f64>, axis: Axis, norm: Norm) -> Array2<f64> {
    let mut out = x.clone();
    let lanes = if axis == Axis(0) {
        out.rows_mut().into_iter().collect::<Vec<_>>()
    } else {
        out.columns_mut().into_iter().collect::<Vec<_>>()
    };
    for mut lane in lanes {
        let n = norm.finish(lane.iter().map(|&v| norm.term(v)).sum());
        if n > 0.0 {
            lane.mapv_inplace(|v| v / n);
        }
    }
    out
}

fn normalize_sparse(x: &CsMat<f64>, axis: Axis, norm: Norm) -> CsMat<f64> {
    let per_row = axis == Axis(0);
    let mut acc = vec![0.0; if per_row { x.rows() } else { x.cols() }];
    for (&v, (r, c)) in x.iter() {
        acc[if per_row { r } else { c }] += norm.term(v);
    }
    let scale: Vec<f64> = acc
        .into_iter()
        .map(|a| {
            let n = norm.finish(a);
            if n > 0.0 {
                1.0 / n
            } else {
                1.0
            }
        })
        .collect();

    let (rows, cols, data) = sparse::triplets(x);
    let data = rows
        .iter()
        .zip(&cols)
        .zip(data)
        .map(|((&r, &c), v)| v * scale[if per_row { r } else { c }])
        .collect();
    sparse::from_triplets(x.shape(), rows, cols, data, x.storage())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_row_wise_sums_to_one() {
        let x = AttrMatrix::Dense(array![[1.0, 3.0], [2.0, 2.0]]);
        let out = normalize_attr(&x, AttrNorm::RowWise).to_dense();
        assert_eq!(out, array![[0.25, 0.75], [0.5, 0.5]]);
    }

    #[test]
    fn test_zero_row_unchanged() {
        let x = AttrMatrix::Dense(array![[0.0, 0.0], [1.0, 1.0]]);
        let out = normalize_attr(&x, AttrNorm::RowWise).to_dense();
        assert_eq!(out.row(0).to_vec(), vec![0.0, 0.0]);
        assert!(out.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_col_wise() {
        let x = AttrMatrix::Dense(array![[1.0, 0.0], [3.0, 0.0]]);
        let out = normalize_attr(&x, AttrNorm::ColWise).to_dense();
        assert_eq!(out, array![[0.25, 0.0], [0.75, 0.0]]);
    }

    #[test]
    fn test_row_wise_l2() {
        let x = AttrMatrix::Dense(array![[3.0, 4.0]]);
        let out = normalize_attr(&x, AttrNorm::RowWiseL2).to_dense();
        assert!((out[[0, 0]] - 0.6).abs() < 1e-12);
        assert!((out[[0, 1]] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let dense = array![[1.0, 0.0, 3.0], [0.0, 0.0, 0.0], [2.0, 2.0, 0.0]];
        let sparse_x = AttrMatrix::Sparse(sparse::from_dense(&dense));
        let dense_x = AttrMatrix::Dense(dense);
        for kind in [
            AttrNorm::RowWise,
            AttrNorm::RowWiseL2,
            AttrNorm::ColWise,
            AttrNorm::ColWiseL2,
        ] {
            let a = normalize_attr(&sparse_x, kind);
            assert!(a.is_sparse());
            let b = normalize_attr(&dense_x, kind).to_dense();
            for (u, v) in a.to_dense().iter().zip(b.iter()) {
                assert!((u - v).abs() < 1e-12, "{kind:?}: {u} != {v}");
            }
        }
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("row_wise".parse::<AttrNorm>().unwrap(), AttrNorm::RowWise);
        assert_eq!("COL_WISE".parse::<AttrNorm>().unwrap(), AttrNorm::ColWise);
        assert!(matches!(
            "zscore".parse::<AttrNorm>(),
            Err(Error::UnsupportedNormalization(_))
        ));
    }
}
