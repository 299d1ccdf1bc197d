//! Graph Convolutional Network wrapper.

use super::{dims_of, model_common, GraphModel, Runtime};
use crate::backend::ModelKind;
use crate::error::Result;
use candle_core::Tensor;
use gallery_core::transform::{AdjTransform, AttrTransform, TransformSpec};
use gallery_core::{index_tensor, Context, FullBatchSequence, Graph, GraphTensor, ToTensor};
use log::debug;

/// Preprocessing of a [`Gcn`].
#[derive(Debug, Clone)]
pub struct GcnConfig {
    /// Defaults to `"normalize_adj"` (`D^-1/2 (A + I) D^-1/2`).
    pub adj_transform: TransformSpec<AdjTransform>,
    /// Defaults to identity.
    pub attr_transform: TransformSpec<AttrTransform>,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            adj_transform: TransformSpec::from("normalize_adj"),
            attr_transform: TransformSpec::None,
        }
    }
}

impl GcnConfig {
    pub fn with_adj_transform(mut self, spec: impl Into<TransformSpec<AdjTransform>>) -> Self {
        self.adj_transform = spec.into();
        self
    }

    pub fn with_attr_transform(mut self, spec: impl Into<TransformSpec<AttrTransform>>) -> Self {
        self.attr_transform = spec.into();
        self
    }
}

/// Semi-supervised node classification with stacked graph convolutions.
///
/// Every sequence is a single full batch of `[features, adjacency, index]`.
pub struct Gcn {
    graph: Graph,
    context: Context,
    adj_transform: AdjTransform,
    attr_transform: AttrTransform,
    features: GraphTensor,
    adjacency: GraphTensor,
    runtime: Runtime,
}

/// Features and propagation matrix on the device.
fn materialize(
    graph: &Graph,
    adj_transform: &AdjTransform,
    attr_transform: &AttrTransform,
    context: &Context,
) -> Result<(GraphTensor, GraphTensor)> {
    let adj = adj_transform.apply(graph.adj_matrix())?;
    let attr = attr_transform.apply(graph.attr_matrix())?;
    let features = attr.to_tensor(context.device())?;
    let adjacency = GraphTensor::Sparse(adj.to_tensor(context.device())?);
    debug!(
        "gcn preprocess: {} nodes, {} attributes ({}), {} edges",
        graph.n_nodes(),
        graph.n_attrs(),
        if attr.is_sparse() { "sparse" } else { "dense" },
        adj.nnz()
    );
    Ok((features, adjacency))
}

impl Gcn {
    /// Resolve the transforms and preprocess `graph`.
    ///
    /// # Errors
    /// `UnknownTransform` for an unregistered transform name, or any
    /// preprocessing failure.
    pub fn new(graph: Graph, config: GcnConfig, context: Context) -> Result<Self> {
        let adj_transform = config.adj_transform.resolve()?;
        let attr_transform = config.attr_transform.resolve()?;
        let (features, adjacency) = materialize(&graph, &adj_transform, &attr_transform, &context)?;
        Ok(Self {
            runtime: Runtime::new(ModelKind::Gcn, &context),
            graph,
            context,
            adj_transform,
            attr_transform,
            features,
            adjacency,
        })
    }

    pub fn features(&self) -> &GraphTensor {
        &self.features
    }

    pub fn adjacency(&self) -> &GraphTensor {
        &self.adjacency
    }

    /// Class probabilities for the nodes in `index`, shape `(|index|, n_classes)`.
    ///
    /// # Errors
    /// `NotBuilt` before [`Gcn::build`]; `NodeOutOfRange` for a bad index.
    pub fn predict(&self, index: &[usize]) -> Result<Tensor> {
        self.graph.check_index(index)?;
        let inputs = [
            self.features.clone(),
            self.adjacency.clone(),
            GraphTensor::Dense(index_tensor(index, self.context.device())?),
        ];
        Ok(self.runtime.forward(&inputs, false)?.output)
    }

    fn full_batch(&self, index: &[usize]) -> Result<FullBatchSequence> {
        let labels = self.graph.labels_at(index)?;
        Ok(FullBatchSequence::with_index(
            vec![self.features.clone(), self.adjacency.clone()],
            index,
            &labels,
            self.context.device(),
        )?)
    }
}

model_common!(Gcn);

impl GraphModel for Gcn {
    type Seq = FullBatchSequence;

    fn preprocess(&mut self) -> Result<()> {
        let (features, adjacency) = materialize(
            &self.graph,
            &self.adj_transform,
            &self.attr_transform,
            &self.context,
        )?;
        self.features = features;
        self.adjacency = adjacency;
        Ok(())
    }

    fn train_sequence(&self, index: &[usize]) -> Result<FullBatchSequence> {
        self.full_batch(index)
    }

    fn test_sequence(&self, index: &[usize]) -> Result<FullBatchSequence> {
        self.full_batch(index)
    }

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn set_graph(&mut self, graph: Graph) -> Result<()> {
        self.graph = graph;
        self.runtime.invalidate_if_changed(dims_of(&self.graph));
        self.preprocess()
    }
}
