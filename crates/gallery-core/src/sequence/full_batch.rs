use super::{Batch, Sequence};
use crate::error::{Error, Result};
use crate::tensor::{index_tensor, GraphTensor, ToTensor};
use candle_core::{Device, Tensor};
use log::debug;
use ndarray::Array1;

/// Exactly one batch per epoch holding every input.
#[derive(Debug, Clone)]
pub struct FullBatchSequence {
    inputs: Vec<GraphTensor>,
    labels: Tensor,
}

impl FullBatchSequence {
    pub fn new(inputs: Vec<GraphTensor>, labels: Tensor) -> Self {
        Self { inputs, labels }
    }

    /// Append `index` (as a `u32` tensor) to `inputs` and pair it with the
    /// labels of those nodes.
    ///
    /// # Errors
    /// `ShapeMismatch` when `index` and `labels` differ in length.
    pub fn with_index(
        mut inputs: Vec<GraphTensor>,
        index: &[usize],
        labels: &Array1<i64>,
        device: &Device,
    ) -> Result<Self> {
        if index.len() != labels.len() {
            return Err(Error::shape("index/labels", index.len(), labels.len()));
        }
        inputs.push(GraphTensor::Dense(index_tensor(index, device)?));
        debug!(
            "full-batch sequence over {} nodes with {} inputs",
            index.len(),
            inputs.len()
        );
        Ok(Self::new(inputs, labels.to_tensor(device)?))
    }

    pub fn inputs(&self) -> &[GraphTensor] {
        &self.inputs
    }

    pub fn labels(&self) -> &Tensor {
        &self.labels
    }
}

impl Sequence for FullBatchSequence {
    fn len(&self) -> usize {
        1
    }

    fn get_batch(&self, i: usize) -> Result<Batch> {
        if i != 0 {
            return Err(Error::IndexOutOfRange { index: i, len: 1 });
        }
        Ok(Batch {
            inputs: self.inputs.clone(),
            labels: self.labels.clone(),
        })
    }

    fn on_epoch_end(&mut self) {}
}
