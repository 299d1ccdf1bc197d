//! Batch sequences driven by an external training loop.
//!
//! A loop only needs [`Sequence::len`], [`Sequence::get_batch`] and
//! [`Sequence::on_epoch_end`], so it never knows which strategy it drives:
//!
//! ```text
//! for epoch in 0..epochs {
//!     for i in 0..seq.len() {
//!         let batch = seq.get_batch(i)?;
//!         // forward / backward on batch.inputs, batch.labels
//!     }
//!     seq.on_epoch_end();
//! }
//! ```
//!
//! - [`FullBatchSequence`]: the whole index subset as a single batch.
//! - [`FastGcnSequence`]: contiguous node batches with FastGCN layer-wise
//!   importance sampling of neighbor columns.

mod fastgcn;
mod full_batch;

pub use fastgcn::{FastGcnSequence, SamplePolicy, SamplingConfig};
pub use full_batch::FullBatchSequence;

use crate::error::Result;
use crate::tensor::GraphTensor;
use candle_core::Tensor;

/// Model inputs for one step plus the labels of the rows they predict.
#[derive(Debug, Clone)]
pub struct Batch {
    pub inputs: Vec<GraphTensor>,
    pub labels: Tensor,
}

impl Batch {
    /// Number of labeled rows.
    pub fn len(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Index-addressable, finite-per-epoch batch source.
pub trait Sequence {
    /// Batches per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Batch `i` of the current epoch.
    ///
    /// # Errors
    /// `IndexOutOfRange` when `i >= self.len()`. A failed call leaves the
    /// sequence usable.
    fn get_batch(&self, i: usize) -> Result<Batch>;

    fn on_epoch_end(&mut self);

    /// Iterate over one epoch.
    fn batches(&self) -> Batches<'_, Self>
    where
        Self: Sized,
    {
        Batches { seq: self, next: 0 }
    }
}

/// Iterator over the batches of one epoch.
pub struct Batches<'a, S> {
    seq: &'a S,
    next: usize,
}

impl<S: Sequence> Iterator for Batches<'_, S> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.seq.len() {
            return None;
        }
        let batch = self.seq.get_batch(self.next);
        self.next += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.seq.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}
