//! Host arrays to device tensors.
//!
//! Candle has no sparse tensor type, so sparse matrices are materialized as
//! COO triplets ([`SparseTensor`]): two `u32` index tensors and one `f32`
//! value tensor. Sparse-dense products gather rows of the dense operand with
//! `index_select` and scatter them back with `index_add`, which keeps the
//! work at `O(nnz * k)` and never builds the `N x N` matrix.
//!
//! | Host type        | Tensor                         |
//! |------------------|--------------------------------|
//! | `Array2<f64>`    | dense `f32` tensor             |
//! | `CsMat<f64>`     | [`SparseTensor`]               |
//! | [`AttrMatrix`]   | [`GraphTensor`] (same storage) |
//! | `Array1<i64>`    | `i64` tensor (labels)          |
//! | `&[usize]`       | `u32` tensor via [`index_tensor`] |

use crate::error::{Error, Result};
use crate::graph::AttrMatrix;
use candle_core::{DType, Device, Tensor};
use ndarray::{Array1, Array2};
use sprs::CsMat;

/// Convert a host value into its tensor form on `device`.
pub trait ToTensor {
    type Output;

    fn to_tensor(&self, device: &Device) -> Result<Self::Output>;
}

impl ToTensor for Array2<f64> {
    type Output = Tensor;

    fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> = self.iter().map(|&v| v as f32).collect();
        Ok(Tensor::from_vec(data, self.dim(), device)?)
    }
}

impl ToTensor for CsMat<f64> {
    type Output = SparseTensor;

    fn to_tensor(&self, device: &Device) -> Result<SparseTensor> {
        SparseTensor::from_csmat(self, device)
    }
}

impl ToTensor for AttrMatrix {
    type Output = GraphTensor;

    fn to_tensor(&self, device: &Device) -> Result<GraphTensor> {
        Ok(match self {
            AttrMatrix::Dense(x) => GraphTensor::Dense(x.to_tensor(device)?),
            AttrMatrix::Sparse(x) => GraphTensor::Sparse(x.to_tensor(device)?),
        })
    }
}

impl ToTensor for Array1<i64> {
    type Output = Tensor;

    fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let data: Vec<i64> = self.iter().copied().collect();
        Ok(Tensor::from_vec(data, self.len(), device)?)
    }
}

fn to_u32(values: &[usize]) -> Result<Vec<u32>> {
    values
        .iter()
        .map(|&i| {
            u32::try_from(i)
                .map_err(|_| Error::InvalidConfig(format!("index {i} does not fit in u32")))
        })
        .collect()
}

/// Row-major positions `r * n_cols + c`, computed in `usize`.
fn flat_offsets(rows: &[u32], cols: &[u32], n_cols: usize) -> Result<Vec<u32>> {
    let offsets: Vec<usize> = rows
        .iter()
        .zip(cols)
        .map(|(&r, &c)| r as usize * n_cols + c as usize)
        .collect();
    to_u32(&offsets)
}

/// Node indices as a `u32` tensor, the index type `index_select` expects.
pub fn index_tensor(index: &[usize], device: &Device) -> Result<Tensor> {
    let data = to_u32(index)?;
    Ok(Tensor::from_vec(data, index.len(), device)?)
}

/// Sparse matrix in COO form on a device.
#[derive(Debug, Clone)]
pub struct SparseTensor {
    rows: Tensor,
    cols: Tensor,
    values: Tensor,
    shape: (usize, usize),
}

impl SparseTensor {
    pub fn from_csmat(m: &CsMat<f64>, device: &Device) -> Result<Self> {
        let nnz = m.nnz();
        let mut rows = Vec::with_capacity(nnz);
        let mut cols = Vec::with_capacity(nnz);
        let mut values = Vec::with_capacity(nnz);
        for (&v, (r, c)) in m.iter() {
            rows.push(r);
            cols.push(c);
            values.push(v as f32);
        }
        Ok(Self {
            rows: Tensor::from_vec(to_u32(&rows)?, nnz, device)?,
            cols: Tensor::from_vec(to_u32(&cols)?, nnz, device)?,
            values: Tensor::from_vec(values, nnz, device)?,
            shape: m.shape(),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn nnz(&self) -> usize {
        self.values.elem_count()
    }

    pub fn device(&self) -> &Device {
        self.values.device()
    }

    pub fn row_indices(&self) -> &Tensor {
        &self.rows
    }

    pub fn col_indices(&self) -> &Tensor {
        &self.cols
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// `self · rhs` for a dense `rhs` with `self.shape().1` rows.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let (n, k) = rhs.dims2()?;
        if n != self.shape.1 {
            return Err(Error::shape("sparse matmul", self.shape.1, n));
        }
        let out = Tensor::zeros((self.shape.0, k), rhs.dtype(), rhs.device())?;
        if self.nnz() == 0 {
            return Ok(out);
        }
        let gathered = rhs.index_select(&self.cols, 0)?;
        let weights = self.values.to_dtype(rhs.dtype())?.unsqueeze(1)?;
        let messages = gathered.broadcast_mul(&weights)?;
        Ok(out.index_add(&self.rows, &messages, 0)?)
    }

    /// Explicitly densify. Duplicate coordinates are summed.
    pub fn to_dense(&self) -> Result<Tensor> {
        let (n_rows, n_cols) = self.shape;
        let flat = Tensor::zeros(n_rows * n_cols, DType::F32, self.device())?;
        if self.nnz() == 0 {
            return Ok(flat.reshape((n_rows, n_cols))?);
        }
        let rows = self.rows.to_vec1::<u32>()?;
        let cols = self.cols.to_vec1::<u32>()?;
        let offsets = flat_offsets(&rows, &cols, n_cols)?;
        let offsets = Tensor::from_vec(offsets, self.nnz(), self.device())?;
        Ok(flat
            .index_add(&offsets, &self.values, 0)?
            .reshape((n_rows, n_cols))?)
    }
}

/// One model input: a dense tensor (features, index, dense adjacency) or a
/// sparse matrix.
#[derive(Debug, Clone)]
pub enum GraphTensor {
    Dense(Tensor),
    Sparse(SparseTensor),
}

impl GraphTensor {
    /// Size of the first dimension.
    pub fn leading_dim(&self) -> usize {
        match self {
            GraphTensor::Dense(t) => t.dims().first().copied().unwrap_or(0),
            GraphTensor::Sparse(s) => s.shape().0,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        match self {
            GraphTensor::Dense(t) => t.dims().to_vec(),
            GraphTensor::Sparse(s) => vec![s.shape().0, s.shape().1],
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, GraphTensor::Sparse(_))
    }

    pub fn as_dense(&self) -> Option<&Tensor> {
        match self {
            GraphTensor::Dense(t) => Some(t),
            GraphTensor::Sparse(_) => None,
        }
    }

    pub fn as_sparse(&self) -> Option<&SparseTensor> {
        match self {
            GraphTensor::Sparse(s) => Some(s),
            GraphTensor::Dense(_) => None,
        }
    }

    /// `self · rhs`, dispatching on storage.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        match self {
            GraphTensor::Dense(t) => Ok(t.matmul(rhs)?),
            GraphTensor::Sparse(s) => s.matmul(rhs),
        }
    }

    pub fn to_dense(&self) -> Result<Tensor> {
        match self {
            GraphTensor::Dense(t) => Ok(t.clone()),
            GraphTensor::Sparse(s) => s.to_dense(),
        }
    }
}

impl From<Tensor> for GraphTensor {
    fn from(t: Tensor) -> Self {
        GraphTensor::Dense(t)
    }
}

impl From<SparseTensor> for GraphTensor {
    fn from(s: SparseTensor) -> Self {
        GraphTensor::Sparse(s)
    }
}
