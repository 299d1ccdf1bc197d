//! Model wrappers: preprocessing, sequencing and a built network per model.
//!
//! | Model         | Preprocess                                  | Sequences          |
//! |---------------|---------------------------------------------|--------------------|
//! | [`Gcn`]       | adjacency/attribute transforms              | full batch         |
//! | [`FastGcn`]   | `D^r (A + I) D^r`, features `A_hat · X`     | FastGCN sampling   |
//! | [`RobustGcn`] | two normalized adjacencies, row-wise `X`    | full batch         |

mod fastgcn;
mod gcn;
mod robustgcn;

pub use fastgcn::{FastGcn, FastGcnConfig};
pub use gcn::{Gcn, GcnConfig};
pub use robustgcn::{RobustGcn, RobustGcnConfig};

use crate::backend::{
    Architecture, Backend, CandleBackend, ForwardModel, ForwardOutput, ModelDims, ModelKind,
};
use crate::error::{Error, Result};
use candle_core::Var;
use gallery_core::{Batch, Context, Graph, GraphTensor, Sequence};
use log::debug;

/// Contract shared by the model wrappers, so a training loop can drive any
/// of them.
pub trait GraphModel {
    type Seq: Sequence;

    /// Recompute every derived matrix and tensor from the current graph.
    fn preprocess(&mut self) -> Result<()>;

    /// Sequence over the nodes in `index`, for training.
    fn train_sequence(&self, index: &[usize]) -> Result<Self::Seq>;

    /// Sequence over the nodes in `index`, for evaluation.
    fn test_sequence(&self, index: &[usize]) -> Result<Self::Seq>;

    fn graph(&self) -> &Graph;

    /// Replace the graph (e.g. after reordering nodes) and preprocess again.
    fn set_graph(&mut self, graph: Graph) -> Result<()>;
}

/// Backend plus the network it built, shared by every wrapper.
pub(crate) struct Runtime {
    kind: ModelKind,
    backend: Box<dyn Backend>,
    net: Option<Box<dyn ForwardModel>>,
    dims: Option<ModelDims>,
}

impl Runtime {
    pub(crate) fn new(kind: ModelKind, context: &Context) -> Self {
        Self {
            kind,
            backend: Box::new(CandleBackend::new(context.device().clone())),
            net: None,
            dims: None,
        }
    }

    pub(crate) fn set_backend(&mut self, backend: Box<dyn Backend>) {
        self.backend = backend;
        self.net = None;
        self.dims = None;
    }

    pub(crate) fn build(&mut self, arch: &Architecture, dims: ModelDims) -> Result<()> {
        if arch.kind != self.kind {
            return Err(Error::InvalidConfig(format!(
                "{:?} architecture given to a {:?} model",
                arch.kind, self.kind
            )));
        }
        self.net = Some(self.backend.build(arch, dims)?);
        self.dims = Some(dims);
        debug!("{:?} built on backend {}", self.kind, self.backend.name());
        Ok(())
    }

    pub(crate) fn is_built(&self) -> bool {
        self.net.is_some()
    }

    /// Drop the network when the graph no longer fits its input/output widths.
    pub(crate) fn invalidate_if_changed(&mut self, dims: ModelDims) {
        if self.dims.is_some_and(|built| built != dims) {
            debug!("{:?} graph dimensions changed; network must be rebuilt", self.kind);
            self.net = None;
            self.dims = None;
        }
    }

    pub(crate) fn forward(&self, inputs: &[GraphTensor], train: bool) -> Result<ForwardOutput> {
        self.net.as_ref().ok_or(Error::NotBuilt)?.forward(inputs, train)
    }

    pub(crate) fn forward_batch(&self, batch: &Batch, train: bool) -> Result<ForwardOutput> {
        self.forward(&batch.inputs, train)
    }

    pub(crate) fn vars(&self) -> Vec<Var> {
        self.net.as_ref().map(|n| n.vars()).unwrap_or_default()
    }
}

pub(crate) fn dims_of(graph: &Graph) -> ModelDims {
    ModelDims {
        n_features: graph.n_attrs(),
        n_classes: graph.n_classes(),
    }
}

/// Inherent helpers repeated on each wrapper.
macro_rules! model_common {
    ($model:ty) => {
        impl $model {
            /// Build the network for this model's graph.
            ///
            /// # Errors
            /// `InvalidConfig` for a mismatched architecture kind, unequal
            /// `hiddens`/`activations` lengths or other invalid settings.
            pub fn build(
                &mut self,
                arch: $crate::backend::Architecture,
            ) -> $crate::error::Result<()> {
                let dims = $crate::models::dims_of(&self.graph);
                self.runtime.build(&arch, dims)
            }

            pub fn is_built(&self) -> bool {
                self.runtime.is_built()
            }

            /// Use another backend. Any built network is discarded.
            pub fn with_backend(mut self, backend: Box<dyn $crate::backend::Backend>) -> Self {
                self.runtime.set_backend(backend);
                self
            }

            /// Forward pass on a batch produced by this model's sequences.
            pub fn forward(
                &self,
                batch: &::gallery_core::Batch,
                train: bool,
            ) -> $crate::error::Result<$crate::backend::ForwardOutput> {
                self.runtime.forward_batch(batch, train)
            }

            /// Trainable parameters of the built network (empty before `build`).
            pub fn vars(&self) -> Vec<::candle_core::Var> {
                self.runtime.vars()
            }

            pub fn context(&self) -> &::gallery_core::Context {
                &self.context
            }
        }
    };
}

pub(crate) use model_common;
