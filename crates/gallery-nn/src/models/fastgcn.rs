//! FastGCN wrapper.
//!
//! Preprocessing folds the first propagation step into the features
//! (`X' = A_hat X`), so the network is dense layers on `X'` followed by a
//! single graph convolution. Training batches sample that last convolution's
//! columns; evaluation uses the exact rows of `A_hat`.
//!
//! # Reference
//!
//! Chen, Ma & Xiao, "FastGCN: Fast Learning with Graph Convolutional
//! Networks via Importance Sampling", ICLR 2018.

use super::{dims_of, model_common, GraphModel, Runtime};
use crate::backend::ModelKind;
use crate::error::Result;
use candle_core::Tensor;
use gallery_core::sparse;
use gallery_core::{
    index_tensor, normalize_attr, AttrNorm, Context, FastGcnSequence, Graph, GraphTensor,
    NormalizeAdj, SamplePolicy, SamplingConfig, ToTensor,
};
use log::debug;
use serde::{Deserialize, Serialize};
use sprs::CsMat;

/// Preprocessing and batching of a [`FastGcn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastGcnConfig {
    /// Degree exponent; `None` skips adjacency normalization.
    pub norm_adj_rate: Option<f64>,
    /// Self-loop weight added before normalizing.
    pub fill_weight: f64,
    pub norm_x: AttrNorm,
    /// Training rows per batch; `None` trains full batch.
    pub batch_size: Option<usize>,
    /// Columns sampled per training batch; `None` disables sampling.
    pub rank: Option<usize>,
    pub shuffle: bool,
    pub policy: SamplePolicy,
}

impl Default for FastGcnConfig {
    fn default() -> Self {
        Self {
            norm_adj_rate: Some(-0.5),
            fill_weight: 1.0,
            norm_x: AttrNorm::None,
            batch_size: Some(256),
            rank: Some(100),
            shuffle: false,
            policy: SamplePolicy::Clamp,
        }
    }
}

impl FastGcnConfig {
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_rank(mut self, rank: Option<usize>) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_norm_adj_rate(mut self, rate: Option<f64>) -> Self {
        self.norm_adj_rate = rate;
        self
    }

    pub fn with_norm_x(mut self, norm_x: AttrNorm) -> Self {
        self.norm_x = norm_x;
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

    fn normalizer(&self) -> NormalizeAdj {
        NormalizeAdj::new(self.norm_adj_rate).with_self_loops(self.fill_weight)
    }
}

/// FastGCN node classifier.
pub struct FastGcn {
    graph: Graph,
    context: Context,
    config: FastGcnConfig,
    /// `A_hat X` as a dense `(N, F)` tensor.
    features: Tensor,
    adj_norm: CsMat<f64>,
    runtime: Runtime,
}

fn materialize(
    graph: &Graph,
    config: &FastGcnConfig,
    context: &Context,
) -> Result<(Tensor, CsMat<f64>)> {
    let adj_norm = config.normalizer().apply(graph.adj_matrix())?;
    let attr = normalize_attr(graph.attr_matrix(), config.norm_x);
    let propagated = attr.propagate(&adj_norm)?;
    let features = propagated.to_dense().to_tensor(context.device())?;
    debug!(
        "fastgcn preprocess: {} nodes, rate {:?}, norm_x {:?}",
        graph.n_nodes(),
        config.norm_adj_rate,
        config.norm_x
    );
    Ok((features, sparse::to_csr(&adj_norm)))
}

impl FastGcn {
    pub fn new(graph: Graph, config: FastGcnConfig, context: Context) -> Result<Self> {
        let (features, adj_norm) = materialize(&graph, &config, &context)?;
        Ok(Self {
            runtime: Runtime::new(ModelKind::FastGcn, &context),
            graph,
            context,
            config,
            features,
            adj_norm,
        })
    }

    pub fn config(&self) -> &FastGcnConfig {
        &self.config
    }

    /// Precomputed `A_hat X`.
    pub fn features(&self) -> &Tensor {
        &self.features
    }

    pub fn adj_norm(&self) -> &CsMat<f64> {
        &self.adj_norm
    }

    /// Class probabilities for `index` using rows `A_hat[index]` and all
    /// features; shape `(|index|, n_classes)`.
    pub fn predict(&self, index: &[usize]) -> Result<Tensor> {
        self.graph.check_index(index)?;
        let adj = sparse::select_rows(&self.adj_norm, index)?;
        let inputs = [
            GraphTensor::Dense(self.features.clone()),
            GraphTensor::Sparse(adj.to_tensor(self.context.device())?),
        ];
        Ok(self.runtime.forward(&inputs, false)?.output)
    }

    fn sampling(&self) -> SamplingConfig {
        SamplingConfig::new()
            .with_batch_size(self.config.batch_size)
            .with_rank(self.config.rank)
            .with_shuffle(self.config.shuffle)
            .with_policy(self.config.policy)
            .with_seed(self.context.seed())
    }
}

model_common!(FastGcn);

impl GraphModel for FastGcn {
    type Seq = FastGcnSequence;

    fn preprocess(&mut self) -> Result<()> {
        let (features, adj_norm) = materialize(&self.graph, &self.config, &self.context)?;
        self.features = features;
        self.adj_norm = adj_norm;
        Ok(())
    }

    /// The training subgraph `A[index, index]` is renormalized on its own,
    /// so sampled batches never see nodes outside `index`.
    fn train_sequence(&self, index: &[usize]) -> Result<FastGcnSequence> {
        let labels = self.graph.labels_at(index)?;
        let sub = sparse::select(self.graph.adj_matrix(), index, Some(index))?;
        let adj = self.config.normalizer().apply(&sub)?;
        let device = self.context.device();
        let x = self.features.index_select(&index_tensor(index, device)?, 0)?;
        Ok(FastGcnSequence::new(x, adj, labels, self.sampling(), device)?)
    }

    /// One unsampled batch of `A_hat[index]` rows over all features.
    fn test_sequence(&self, index: &[usize]) -> Result<FastGcnSequence> {
        let labels = self.graph.labels_at(index)?;
        let adj = sparse::select_rows(&self.adj_norm, index)?;
        let config = SamplingConfig::new().with_seed(self.context.seed());
        Ok(FastGcnSequence::new(
            self.features.clone(),
            adj,
            labels,
            config,
            self.context.device(),
        )?)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Architecture;
    use gallery_core::Sequence;
    use ndarray::{Array1, Array2};

    fn ring(n: usize) -> Graph {
        let edges: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
        let labels = Array1::from_iter((0..n as i64).map(|i| i % 2));
        Graph::from_edges(&edges, Array2::<f64>::eye(n), labels).unwrap()
    }

    #[test]
    fn test_preprocess_propagates_features() {
        let model = FastGcn::new(ring(6), FastGcnConfig::default(), Context::default()).unwrap();
        // X = I, so A_hat X = A_hat: every row has three entries of 1/3
        let x = model.features().to_vec2::<f32>().unwrap();
        for row in &x {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert_eq!(row.iter().filter(|&&v| v > 0.0).count(), 3);
        }
    }

    #[test]
    fn test_train_sequence_batches() {
        let config = FastGcnConfig::default()
            .with_batch_size(Some(2))
            .with_rank(Some(3));
        let model = FastGcn::new(ring(6), config, Context::default()).unwrap();
        let seq = model.train_sequence(&[0, 1, 2, 3]).unwrap();
        assert_eq!(seq.len(), 2);
        let batch = seq.get_batch(0).unwrap();
        let dims = batch.inputs[1].dims();
        assert_eq!(dims[0], 2);
        assert!(dims[1] <= 3);
        assert_eq!(batch.inputs[0].dims(), vec![dims[1], 6]);
    }

    #[test]
    fn test_test_sequence_is_unsampled() {
        let model = FastGcn::new(ring(6), FastGcnConfig::default(), Context::default()).unwrap();
        let seq = model.test_sequence(&[4, 5]).unwrap();
        assert_eq!(seq.len(), 1);
        let batch = seq.get_batch(0).unwrap();
        assert_eq!(batch.inputs[1].dims(), vec![2, 6]);
        assert_eq!(batch.inputs[0].dims(), vec![6, 6]);
    }

    #[test]
    fn test_predict_shape() {
        let mut model =
            FastGcn::new(ring(6), FastGcnConfig::default(), Context::default()).unwrap();
        model.build(Architecture::fast_gcn()).unwrap();
        let probs = model.predict(&[1, 3, 5]).unwrap();
        assert_eq!(probs.dims(), &[3, 2]);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{"batch_size": 64, "rank": null, "norm_x": "row_wise"}"#;
        let cfg: FastGcnConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.batch_size, Some(64));
        assert_eq!(cfg.rank, None);
        assert_eq!(cfg.norm_x, AttrNorm::RowWise);
        assert_eq!(cfg.norm_adj_rate, Some(-0.5));
    }
}
