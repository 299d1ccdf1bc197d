//! RobustGCN wrapper.
//!
//! Two propagation matrices are kept, one per Gaussian moment:
//! `D^-1/2 A D^-1/2` for the mean and `D^-1 A D^-1` for the variance
//! (default rates `[-0.5, -1.0]`).

use super::{dims_of, model_common, GraphModel, Runtime};
use crate::backend::ModelKind;
use crate::error::{Error, Result};
use candle_core::Tensor;
use gallery_core::{
    index_tensor, normalize_attr, AttrNorm, Context, FullBatchSequence, Graph, GraphTensor,
    NormalizeAdj, ToTensor,
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Preprocessing of a [`RobustGcn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustGcnConfig {
    /// Exactly two rates: mean channel, then variance channel.
    pub norm_adj_rates: Vec<Option<f64>>,
    pub fill_weight: f64,
    pub norm_x: AttrNorm,
}

impl Default for RobustGcnConfig {
    fn default() -> Self {
        Self {
            norm_adj_rates: vec![Some(-0.5), Some(-1.0)],
            fill_weight: 1.0,
            norm_x: AttrNorm::RowWise,
        }
    }
}

impl RobustGcnConfig {
    pub fn with_norm_adj_rates(mut self, mean: Option<f64>, var: Option<f64>) -> Self {
        self.norm_adj_rates = vec![mean, var];
        self
    }

    pub fn with_norm_x(mut self, norm_x: AttrNorm) -> Self {
        self.norm_x = norm_x;
        self
    }
}

struct Inputs {
    features: GraphTensor,
    adj_mean: GraphTensor,
    adj_var: GraphTensor,
}

/// Gaussian-convolution node classifier, robust to adversarial edges.
pub struct RobustGcn {
    graph: Graph,
    context: Context,
    config: RobustGcnConfig,
    inputs: Inputs,
    runtime: Runtime,
}

fn materialize(graph: &Graph, config: &RobustGcnConfig, context: &Context) -> Result<Inputs> {
    if config.norm_adj_rates.len() != 2 {
        return Err(Error::InvalidConfig(format!(
            "RobustGCN needs 2 adjacency rates, got {}",
            config.norm_adj_rates.len()
        )));
    }
    let adj = graph.adj_matrix();
    let normalized = NormalizeAdj::new(None)
        .with_self_loops(config.fill_weight)
        .apply_many(&[adj.clone(), adj.clone()], &config.norm_adj_rates)?;
    let device = context.device();
    let mut adjs = normalized
        .iter()
        .map(|a| -> Result<GraphTensor> { Ok(GraphTensor::Sparse(a.to_tensor(device)?)) })
        .collect::<Result<Vec<_>>>()?;
    let features = normalize_attr(graph.attr_matrix(), config.norm_x).to_tensor(device)?;
    debug!(
        "robustgcn preprocess: {} nodes, rates {:?}, norm_x {:?}",
        graph.n_nodes(),
        config.norm_adj_rates,
        config.norm_x
    );
    let adj_var = adjs.remove(1);
    let adj_mean = adjs.remove(0);
    Ok(Inputs {
        features,
        adj_mean,
        adj_var,
    })
}

impl RobustGcn {
    pub fn new(graph: Graph, config: RobustGcnConfig, context: Context) -> Result<Self> {
        let inputs = materialize(&graph, &config, &context)?;
        Ok(Self {
            runtime: Runtime::new(ModelKind::RobustGcn, &context),
            graph,
            context,
            config,
            inputs,
        })
    }

    pub fn config(&self) -> &RobustGcnConfig {
        &self.config
    }

    pub fn features(&self) -> &GraphTensor {
        &self.inputs.features
    }

    /// Mean and variance propagation matrices.
    pub fn adjacencies(&self) -> (&GraphTensor, &GraphTensor) {
        (&self.inputs.adj_mean, &self.inputs.adj_var)
    }

    fn base_inputs(&self) -> Vec<GraphTensor> {
        vec![
            self.inputs.features.clone(),
            self.inputs.adj_mean.clone(),
            self.inputs.adj_var.clone(),
        ]
    }

    /// Class probabilities (posterior mean, no sampling) for `index`.
    pub fn predict(&self, index: &[usize]) -> Result<Tensor> {
        self.graph.check_index(index)?;
        let mut inputs = self.base_inputs();
        inputs.push(GraphTensor::Dense(index_tensor(index, self.context.device())?));
        Ok(self.runtime.forward(&inputs, false)?.output)
    }

    fn full_batch(&self, index: &[usize]) -> Result<FullBatchSequence> {
        let labels = self.graph.labels_at(index)?;
        Ok(FullBatchSequence::with_index(
            self.base_inputs(),
            index,
            &labels,
            self.context.device(),
        )?)
    }
}

model_common!(RobustGcn);

impl GraphModel for RobustGcn {
    type Seq = FullBatchSequence;

    fn preprocess(&mut self) -> Result<()> {
        self.inputs = materialize(&self.graph, &self.config, &self.context)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Architecture;
    use gallery_core::Sequence;
    use ndarray::array;

    fn square() -> Graph {
        Graph::from_edges(
            &[(0, 1), (1, 2), (2, 3), (3, 0)],
            array![[1.0, 3.0], [0.0, 0.0], [2.0, 2.0], [4.0, 0.0]],
            array![0, 1, 0, 1],
        )
        .unwrap()
    }

    fn square_model() -> RobustGcn {
        RobustGcn::new(square(), RobustGcnConfig::default(), Context::default()).unwrap()
    }

    #[test]
    fn test_two_adjacencies() {
        let model = square_model();
        let (mean, var) = model.adjacencies();
        let mean = mean.to_dense().unwrap().to_vec2::<f32>().unwrap();
        let var = var.to_dense().unwrap().to_vec2::<f32>().unwrap();
        // degree 3 with the self-loop
        assert!((mean[0][1] - 1.0 / 3.0).abs() < 1e-6);
        assert!((var[0][1] - 1.0 / 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_row_wise_features_by_default() {
        let model = square_model();
        let x = model.features().to_dense().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(x[0], vec![0.25, 0.75]);
        assert_eq!(x[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_rate_count_checked() {
        let config = RobustGcnConfig {
            norm_adj_rates: vec![Some(-0.5)],
            ..RobustGcnConfig::default()
        };
        assert!(matches!(
            RobustGcn::new(square(), config, Context::default()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_sequence_layout() {
        let model = square_model();
        let seq = model.train_sequence(&[1, 2]).unwrap();
        let batch = seq.get_batch(0).unwrap();
        assert_eq!(batch.inputs.len(), 4);
        assert_eq!(batch.inputs[3].leading_dim(), 2);
    }

    #[test]
    fn test_forward_reports_kl() {
        let mut model = square_model();
        model
            .build(Architecture::robust_gcn().with_hiddens(vec![8], vec![Default::default()]))
            .unwrap();
        let batch = model.train_sequence(&[0, 1, 2]).unwrap().get_batch(0).unwrap();
        let out = model.forward(&batch, true).unwrap();
        assert_eq!(out.output.dims(), &[3, 2]);
        let kl = out.kl.unwrap().to_scalar::<f32>().unwrap();
        assert!(kl.is_finite());

        let probs = model.predict(&[3]).unwrap();
        assert_eq!(probs.dims(), &[1, 2]);
        assert!(!model.vars().is_empty());
    }
}
