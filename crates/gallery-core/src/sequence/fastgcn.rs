//! FastGCN mini-batches with layer-wise importance sampling.
//!
//! For a batch of rows `B` of the (normalized) adjacency `A`:
//!
//! ```text
//! q_j   = ||A[B, j]||^2               column importance
//! p_j   = q_j / sum_k q_k             over candidates (q_j > 0)
//! S     ~ rank draws from p           without replacement by default
//! A_hat = A[B, S] * diag(1 / (rank * p_j))
//! X_hat = X[S]
//! ```
//!
//! so each batch touches `|B| * rank` adjacency entries and `rank` feature
//! rows instead of all `N`.
//!
//! # Reproducibility
//!
//! Batch `i` of epoch `e` is sampled from a generator seeded with
//! `(seed, e, i)`. Asking for the same batch twice gives the same sample,
//! and batches can be requested in any order.
//!
//! # Reference
//!
//! Chen, Ma & Xiao, "FastGCN: Fast Learning with Graph Convolutional
//! Networks via Importance Sampling", ICLR 2018.

use super::{Batch, Sequence};
use crate::context::{derive_seed, DEFAULT_SEED};
use crate::error::{Error, Result};
use crate::sparse;
use crate::tensor::{index_tensor, GraphTensor, ToTensor};
use candle_core::{Device, Tensor};
use log::{debug, trace, warn};
use ndarray::{Array1, Axis};
use rand::distr::weighted::WeightedIndex;
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Stream id for the epoch shuffle, kept apart from batch streams.
const SHUFFLE_STREAM: u64 = u64::MAX;

/// What to do when `rank` exceeds the number of candidate columns.
///
/// `rank == available` always takes the normal path: every candidate is
/// drawn and rescaled by `1 / (rank * p_j)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplePolicy {
    /// Use every candidate column exactly, without rescaling.
    #[default]
    Clamp,
    /// Always draw `rank` columns with replacement.
    WithReplacement,
    /// Fail with `InvalidSampleSize`.
    Strict,
}

/// Batching and sampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Rows per batch; `None` puts every row in one batch.
    pub batch_size: Option<usize>,
    /// Columns sampled per batch; `None` keeps every column.
    pub rank: Option<usize>,
    /// Reshuffle the row order at each epoch end.
    pub shuffle: bool,
    pub policy: SamplePolicy,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            rank: None,
            shuffle: false,
            policy: SamplePolicy::default(),
            seed: DEFAULT_SEED,
        }
    }
}

impl SamplingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_rank(mut self, rank: Option<usize>) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_policy(mut self, policy: SamplePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if self.rank == Some(0) {
            return Err(Error::InvalidConfig("rank must be positive".into()));
        }
        Ok(())
    }
}

/// Sampled columns of one batch and the factor applied to each.
struct ColumnSample {
    columns: Vec<usize>,
    scale: Vec<f64>,
}

/// Importance-sampled batches over the rows of an `M x N` adjacency.
///
/// Row `r` of `adj` is labeled `labels[r]`; column `j` refers to row `j`
/// of the `N x F` feature tensor.
#[derive(Debug, Clone)]
pub struct FastGcnSequence {
    x: Tensor,
    adj: CsMat<f64>,
    labels: Array1<i64>,
    config: SamplingConfig,
    device: Device,
    order: Vec<usize>,
    epoch: u64,
}

impl FastGcnSequence {
    /// # Errors
    /// - `ShapeMismatch` if `adj` columns differ from `x` rows or `labels`
    ///   differs from `adj` rows.
    /// - `InvalidConfig` for a zero batch size or rank.
    pub fn new(
        x: Tensor,
        adj: CsMat<f64>,
        labels: Array1<i64>,
        config: SamplingConfig,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let (n_features_rows, _) = x.dims2()?;
        if adj.cols() != n_features_rows {
            return Err(Error::shape(
                "adjacency columns vs feature rows",
                n_features_rows,
                adj.cols(),
            ));
        }
        if labels.len() != adj.rows() {
            return Err(Error::shape("labels vs adjacency rows", adj.rows(), labels.len()));
        }
        debug!(
            "fastgcn sequence: {} rows, {} columns, batch_size={:?}, rank={:?}, policy={:?}",
            adj.rows(),
            adj.cols(),
            config.batch_size,
            config.rank,
            config.policy
        );
        Ok(Self {
            x: x.to_device(device)?,
            adj: sparse::to_csr(&adj),
            order: (0..labels.len()).collect(),
            labels,
            config,
            device: device.clone(),
            epoch: 0,
        })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current row order; batches are contiguous slices of it.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    fn batch_rows(&self, i: usize) -> &[usize] {
        match self.config.batch_size {
            Some(size) => {
                let start = i * size;
                let end = (start + size).min(self.order.len());
                &self.order[start..end]
            }
            None => &self.order,
        }
    }

    fn sample_columns(&self, sub: &CsMat<f64>, rank: usize, i: usize) -> Result<ColumnSample> {
        let norms = sparse::column_sq_norms(sub);
        let candidates: Vec<usize> = (0..norms.len()).filter(|&j| norms[j] > 0.0).collect();
        let available = candidates.len();
        if available == 0 {
            return Err(Error::InvalidSampleSize { rank, available });
        }

        let policy = self.config.policy;
        if rank > available && policy == SamplePolicy::Strict {
            return Err(Error::InvalidSampleSize { rank, available });
        }
        if rank > available && policy != SamplePolicy::WithReplacement {
            warn!("rank {rank} exceeds {available} candidate columns in batch {i}; using all");
            return Ok(ColumnSample {
                scale: vec![1.0; available],
                columns: candidates,
            });
        }

        let total: f64 = candidates.iter().map(|&j| norms[j]).sum();
        let mut rng =
            XorShiftRng::seed_from_u64(derive_seed(self.config.seed, &[self.epoch, i as u64]));

        let mut columns: Vec<usize> = match policy {
            SamplePolicy::WithReplacement => {
                let dist = WeightedIndex::new(candidates.iter().map(|&j| norms[j]))
                    .map_err(|e| Error::Sampling(e.to_string()))?;
                (0..rank).map(|_| candidates[dist.sample(&mut rng)]).collect()
            }
            SamplePolicy::Clamp | SamplePolicy::Strict => candidates
                .choose_multiple_weighted(&mut rng, rank, |&j| norms[j])
                .map_err(|e| Error::Sampling(e.to_string()))?
                .copied()
                .collect(),
        };
        columns.sort_unstable();

        let scale = columns
            .iter()
            .map(|&j| total / (rank as f64 * norms[j]))
            .collect();
        Ok(ColumnSample { columns, scale })
    }
}

/// `sub[:, columns] * diag(scale)`; repeated columns are kept.
fn restrict_columns(sub: &CsMat<f64>, sample: &ColumnSample) -> Result<CsMat<f64>> {
    let all_rows: Vec<usize> = (0..sub.rows()).collect();
    let picked = sparse::select(sub, &all_rows, Some(&sample.columns))?;
    let (rows, cols, data) = sparse::triplets(&picked);
    let data = cols
        .iter()
        .zip(data)
        .map(|(&c, v)| v * sample.scale[c])
        .collect();
    Ok(sparse::from_triplets(
        picked.shape(),
        rows,
        cols,
        data,
        picked.storage(),
    ))
}

impl Sequence for FastGcnSequence {
    fn len(&self) -> usize {
        match self.config.batch_size {
            Some(size) => self.order.len().div_ceil(size),
            None => 1,
        }
    }

    fn get_batch(&self, i: usize) -> Result<Batch> {
        let len = self.len();
        if i >= len {
            return Err(Error::IndexOutOfRange { index: i, len });
        }
        let rows = self.batch_rows(i);
        let labels = self.labels.select(Axis(0), rows).to_tensor(&self.device)?;
        let sub = sparse::select_rows(&self.adj, rows)?;

        let inputs = match self.config.rank {
            None => vec![
                GraphTensor::Dense(self.x.clone()),
                GraphTensor::Sparse(sub.to_tensor(&self.device)?),
            ],
            Some(rank) => {
                let sample = self.sample_columns(&sub, rank, i)?;
                let adj = restrict_columns(&sub, &sample)?;
                let x = self
                    .x
                    .index_select(&index_tensor(&sample.columns, &self.device)?, 0)?;
                trace!(
                    "epoch {} batch {i}: {} rows, {} sampled columns",
                    self.epoch,
                    rows.len(),
                    sample.columns.len()
                );
                vec![
                    GraphTensor::Dense(x),
                    GraphTensor::Sparse(adj.to_tensor(&self.device)?),
                ]
            }
        };
        Ok(Batch { inputs, labels })
    }

    fn on_epoch_end(&mut self) {
        self.epoch += 1;
        if self.config.shuffle {
            let mut rng = XorShiftRng::seed_from_u64(derive_seed(
                self.config.seed,
                &[self.epoch, SHUFFLE_STREAM],
            ));
            self.order.shuffle(&mut rng);
        }
    }
}
