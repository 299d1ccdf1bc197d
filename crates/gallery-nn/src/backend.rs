//! Forward-computation backends.
//!
//! A model wrapper owns preprocessing and sequencing; building the actual
//! network is delegated to a [`Backend`]. [`CandleBackend`] is the one
//! implementation shipped here.
//!
//! | Kind        | Inputs                         | Network                                   |
//! |-------------|--------------------------------|-------------------------------------------|
//! | `Gcn`       | `[x, adj, index]`              | GraphConvolution stack, softmax on `index` |
//! | `FastGcn`   | `[x, adj]`                     | dense layers, one GraphConvolution         |
//! | `RobustGcn` | `[x, adj_0, adj_1, index]`     | GaussianConvolution stack, KL term         |
//!
//! Hidden layer `i` carries an L2 kernel penalty `l2_norms[i] * ||W_i||^2`;
//! the weighted sum comes back in [`ForwardOutput::l2`] for the training
//! loop to add to its loss.

use crate::conv::{GaussianConvolution, GraphConvolution};
use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{Linear, Module, VarBuilder, VarMap};
use gallery_core::GraphTensor;
use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Elementwise nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Elu,
    Tanh,
    Sigmoid,
    Identity,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::Relu => x.relu(),
            Activation::Elu => x.elu(1.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(x),
            Activation::Identity => Ok(x.clone()),
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "elu" => Ok(Activation::Elu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "identity" | "linear" | "none" => Ok(Activation::Identity),
            other => Err(Error::InvalidConfig(format!("unknown activation: {other}"))),
        }
    }
}

/// Which network to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Gcn,
    FastGcn,
    RobustGcn,
}

/// Layer sizes and regularization of a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub kind: ModelKind,
    /// Hidden layer widths.
    pub hiddens: Vec<usize>,
    /// One activation per hidden layer. For a RobustGCN it applies to the
    /// mean; the variance always goes through ReLU.
    pub activations: Vec<Activation>,
    /// One L2 kernel weight per hidden layer; `0.0` disables the penalty.
    #[serde(default)]
    pub l2_norms: Vec<f64>,
    pub dropout: f64,
    pub use_bias: bool,
    /// Variance attention strength (RobustGCN).
    pub gamma: f64,
    /// Weight of the KL term returned as auxiliary loss (RobustGCN).
    pub kl_weight: f64,
}

impl Architecture {
    pub fn gcn() -> Self {
        Self {
            kind: ModelKind::Gcn,
            hiddens: vec![16],
            activations: vec![Activation::Relu],
            l2_norms: vec![5e-4],
            dropout: 0.5,
            use_bias: false,
            gamma: 1.0,
            kl_weight: 0.0,
        }
    }

    pub fn fast_gcn() -> Self {
        Self {
            kind: ModelKind::FastGcn,
            hiddens: vec![32],
            ..Self::gcn()
        }
    }

    pub fn robust_gcn() -> Self {
        Self {
            kind: ModelKind::RobustGcn,
            hiddens: vec![64],
            l2_norms: vec![1e-4],
            dropout: 0.6,
            kl_weight: 5e-4,
            ..Self::gcn()
        }
    }

    /// Replace the hidden layers. Every new layer gets the first current L2
    /// weight (or none if there was none); see [`Architecture::with_l2_norms`].
    pub fn with_hiddens(mut self, hiddens: Vec<usize>, activations: Vec<Activation>) -> Self {
        let l2 = self.l2_norms.first().copied().unwrap_or(0.0);
        self.l2_norms = vec![l2; hiddens.len()];
        self.hiddens = hiddens;
        self.activations = activations;
        self
    }

    pub fn with_l2_norms(mut self, l2_norms: Vec<f64>) -> Self {
        self.l2_norms = l2_norms;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_kl_weight(mut self, kl_weight: f64) -> Self {
        self.kl_weight = kl_weight;
        self
    }

    /// # Errors
    /// `InvalidConfig` when hidden sizes, activations and L2 weights differ
    /// in length, a width is zero, an L2 weight is negative, the dropout
    /// rate is outside `[0, 1)`, or a RobustGCN has no hidden layer.
    pub fn validate(&self) -> Result<()> {
        if self.hiddens.len() != self.activations.len() {
            return Err(Error::InvalidConfig(format!(
                "{} hidden layers but {} activations",
                self.hiddens.len(),
                self.activations.len()
            )));
        }
        if self.hiddens.len() != self.l2_norms.len() {
            return Err(Error::InvalidConfig(format!(
                "{} hidden layers but {} l2 norms",
                self.hiddens.len(),
                self.l2_norms.len()
            )));
        }
        if self.l2_norms.iter().any(|l2| !(l2.is_finite() && *l2 >= 0.0)) {
            return Err(Error::InvalidConfig(format!(
                "l2 norms must be finite and non-negative: {:?}",
                self.l2_norms
            )));
        }
        if self.hiddens.contains(&0) {
            return Err(Error::InvalidConfig("hidden width must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout {} outside [0, 1)",
                self.dropout
            )));
        }
        if self.kind == ModelKind::RobustGcn && self.hiddens.is_empty() {
            return Err(Error::InvalidConfig(
                "RobustGCN needs at least one hidden layer".into(),
            ));
        }
        Ok(())
    }
}

/// Input and output widths of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub n_features: usize,
    pub n_classes: usize,
}

/// Result of one forward pass.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Class probabilities, one row per predicted node.
    pub output: Tensor,
    /// Weighted auxiliary loss (RobustGCN KL term).
    pub kl: Option<Tensor>,
    /// Weighted L2 kernel penalty of the hidden layers; `None` when every
    /// weight is zero.
    pub l2: Option<Tensor>,
}

/// A built network.
pub trait ForwardModel {
    /// Run the network. `train` enables dropout and sampling.
    fn forward(&self, inputs: &[GraphTensor], train: bool) -> Result<ForwardOutput>;

    /// Trainable parameters, for an optimizer.
    fn vars(&self) -> Vec<Var>;
}

/// Builds networks for a device.
pub trait Backend {
    fn name(&self) -> &str;

    fn device(&self) -> &Device;

    fn build(&self, arch: &Architecture, dims: ModelDims) -> Result<Box<dyn ForwardModel>>;
}

/// Candle implementation of [`Backend`].
#[derive(Debug, Clone)]
pub struct CandleBackend {
    device: Device,
}

impl CandleBackend {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl Backend for CandleBackend {
    fn name(&self) -> &str {
        "candle"
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn build(&self, arch: &Architecture, dims: ModelDims) -> Result<Box<dyn ForwardModel>> {
        arch.validate()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &self.device);
        debug!(
            "building {:?}: {} -> {:?} -> {}",
            arch.kind, dims.n_features, arch.hiddens, dims.n_classes
        );
        let widths = layer_widths(dims, &arch.hiddens);

        Ok(match arch.kind {
            ModelKind::Gcn => {
                let layers = widths
                    .windows(2)
                    .enumerate()
                    .map(|(i, w)| {
                        GraphConvolution::new(w[0], w[1], arch.use_bias, vb.pp(format!("conv{i}")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(GcnNet {
                    layers,
                    activations: arch.activations.clone(),
                    l2_norms: arch.l2_norms.clone(),
                    dropout: arch.dropout,
                    varmap,
                })
            }
            ModelKind::FastGcn => {
                let dense = widths[..widths.len() - 1]
                    .windows(2)
                    .enumerate()
                    .map(|(i, w)| {
                        candle_nn::linear_b(w[0], w[1], arch.use_bias, vb.pp(format!("dense{i}")))
                    })
                    .collect::<candle_core::Result<Vec<_>>>()?;
                let last = widths.len() - 1;
                let out = GraphConvolution::new(
                    widths[last - 1],
                    widths[last],
                    arch.use_bias,
                    vb.pp("conv_out"),
                )?;
                Box::new(FastGcnNet {
                    dense,
                    activations: arch.activations.clone(),
                    l2_norms: arch.l2_norms.clone(),
                    out,
                    dropout: arch.dropout,
                    varmap,
                })
            }
            ModelKind::RobustGcn => {
                let last = widths.len() - 1;
                let layers = widths
                    .windows(2)
                    .enumerate()
                    .map(|(i, w)| {
                        let act = if i + 1 == last {
                            Activation::Identity
                        } else {
                            arch.activations[i]
                        };
                        let vb = vb.pp(format!("gauss{i}"));
                        GaussianConvolution::new(w[0], w[1], arch.gamma, act, vb)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Box::new(RobustGcnNet {
                    layers,
                    l2_norms: arch.l2_norms.clone(),
                    dropout: arch.dropout,
                    kl_weight: arch.kl_weight,
                    varmap,
                })
            }
        })
    }
}

/// `[n_features, hiddens..., n_classes]`.
fn layer_widths(dims: ModelDims, hiddens: &[usize]) -> Vec<usize> {
    std::iter::once(dims.n_features)
        .chain(hiddens.iter().copied())
        .chain(std::iter::once(dims.n_classes))
        .collect()
}

fn dropout(x: &Tensor, rate: f64, train: bool) -> Result<Tensor> {
    if train && rate > 0.0 {
        Ok(candle_nn::ops::dropout(x, rate as f32)?)
    } else {
        Ok(x.clone())
    }
}

/// Dropout on dense features; sparse features pass through.
fn dropout_input(x: &GraphTensor, rate: f64, train: bool) -> Result<GraphTensor> {
    match x {
        GraphTensor::Dense(t) => Ok(GraphTensor::Dense(dropout(t, rate, train)?)),
        GraphTensor::Sparse(_) => Ok(x.clone()),
    }
}

fn expect_inputs(inputs: &[GraphTensor], n: usize, layout: &str) -> Result<()> {
    if inputs.len() != n {
        return Err(Error::InvalidInputs(format!(
            "expected {n} inputs ({layout}), got {}",
            inputs.len()
        )));
    }
    Ok(())
}

fn index_input(input: &GraphTensor) -> Result<&Tensor> {
    input
        .as_dense()
        .ok_or_else(|| Error::InvalidInputs("node index must be a dense tensor".into()))
}

fn softmax(h: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::softmax(h, D::Minus1)?)
}

/// `sum_i l2_norms[i] * sq_norm(i)`, skipping zero weights.
fn l2_penalty(
    l2_norms: &[f64],
    sq_norm: impl Fn(usize) -> Result<Tensor>,
) -> Result<Option<Tensor>> {
    let mut total: Option<Tensor> = None;
    for (i, &l2) in l2_norms.iter().enumerate() {
        if l2 == 0.0 {
            continue;
        }
        let term = sq_norm(i)?.affine(l2, 0.0)?;
        total = Some(match total {
            Some(t) => t.add(&term)?,
            None => term,
        });
    }
    Ok(total)
}

struct GcnNet {
    layers: Vec<GraphConvolution>,
    activations: Vec<Activation>,
    l2_norms: Vec<f64>,
    dropout: f64,
    varmap: VarMap,
}

impl ForwardModel for GcnNet {
    fn forward(&self, inputs: &[GraphTensor], train: bool) -> Result<ForwardOutput> {
        expect_inputs(inputs, 3, "features, adjacency, index")?;
        let adj = &inputs[1];
        let index = index_input(&inputs[2])?;

        let mut h = dropout_input(&inputs[0], self.dropout, train)?;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut out = layer.forward(&h, adj)?;
            if i < last {
                out = self.activations[i].apply(&out)?;
                out = dropout(&out, self.dropout, train)?;
            }
            h = GraphTensor::Dense(out);
        }
        let logits = h.to_dense()?.index_select(index, 0)?;
        Ok(ForwardOutput {
            output: softmax(&logits)?,
            kl: None,
            l2: l2_penalty(&self.l2_norms, |i| self.layers[i].weight_sq_norm())?,
        })
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

struct FastGcnNet {
    dense: Vec<Linear>,
    activations: Vec<Activation>,
    l2_norms: Vec<f64>,
    out: GraphConvolution,
    dropout: f64,
    varmap: VarMap,
}

impl ForwardModel for FastGcnNet {
    fn forward(&self, inputs: &[GraphTensor], train: bool) -> Result<ForwardOutput> {
        expect_inputs(inputs, 2, "features, adjacency")?;
        let mut h = inputs[0].to_dense()?;
        for (layer, act) in self.dense.iter().zip(&self.activations) {
            h = act.apply(&layer.forward(&h)?)?;
            h = dropout(&h, self.dropout, train)?;
        }
        let logits = self.out.forward(&GraphTensor::Dense(h), &inputs[1])?;
        let l2 = l2_penalty(&self.l2_norms, |i| Ok(self.dense[i].weight().sqr()?.sum_all()?))?;
        Ok(ForwardOutput {
            output: softmax(&logits)?,
            kl: None,
            l2,
        })
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

struct RobustGcnNet {
    layers: Vec<GaussianConvolution>,
    l2_norms: Vec<f64>,
    dropout: f64,
    kl_weight: f64,
    varmap: VarMap,
}

impl ForwardModel for RobustGcnNet {
    fn forward(&self, inputs: &[GraphTensor], train: bool) -> Result<ForwardOutput> {
        expect_inputs(inputs, 4, "features, adj_0, adj_1, index")?;
        let (adj_mean, adj_var) = (&inputs[1], &inputs[2]);
        let index = index_input(&inputs[3])?;

        let Some((first, rest)) = self.layers.split_first() else {
            return Err(Error::InvalidConfig("network has no layers".into()));
        };
        let x = dropout_input(&inputs[0], self.dropout, train)?;
        let (mut h, kl) = first.forward_features(&x, adj_mean, adj_var)?;
        for layer in rest {
            h.mean = dropout(&h.mean, self.dropout, train)?;
            h.var = dropout(&h.var, self.dropout, train)?;
            h = layer.forward(&h, adj_mean, adj_var)?;
        }

        let logits = if train { h.sample()? } else { h.mean };
        let logits = logits.index_select(index, 0)?;
        Ok(ForwardOutput {
            output: softmax(&logits)?,
            kl: Some(kl.affine(self.kl_weight, 0.0)?),
            l2: l2_penalty(&self.l2_norms, |i| self.layers[i].weight_sq_norm())?,
        })
    }

    fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_names() {
        assert_eq!("ReLU".parse::<Activation>().unwrap(), Activation::Relu);
        assert_eq!("linear".parse::<Activation>().unwrap(), Activation::Identity);
        assert!(matches!(
            "swish".parse::<Activation>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_length_mismatch() {
        let arch = Architecture::gcn().with_hiddens(vec![16, 8], vec![Activation::Relu]);
        assert!(matches!(arch.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_dropout_range() {
        assert!(Architecture::gcn().with_dropout(1.0).validate().is_err());
        assert!(Architecture::gcn().with_dropout(0.0).validate().is_ok());
    }

    #[test]
    fn test_robust_needs_hidden_layer() {
        let arch = Architecture::robust_gcn().with_hiddens(vec![], vec![]);
        assert!(arch.validate().is_err());
        assert!(Architecture::gcn().with_hiddens(vec![], vec![]).validate().is_ok());
    }

    #[test]
    fn test_layer_widths() {
        let dims = ModelDims {
            n_features: 10,
            n_classes: 3,
        };
        assert_eq!(layer_widths(dims, &[16, 8]), vec![10, 16, 8, 3]);
        assert_eq!(layer_widths(dims, &[]), vec![10, 3]);
    }

    #[test]
    fn test_architecture_serde() {
        let arch = Architecture::robust_gcn();
        let json = serde_json::to_string(&arch).unwrap();
        assert!(json.contains("\"robust_gcn\""));
        let back: Architecture = serde_json::from_str(&json).unwrap();
        assert_eq!(back, arch);
    }

    fn ring_inputs(n_features: usize) -> Vec<GraphTensor> {
        use gallery_core::{index_tensor, normalize_adj, sparse, ToTensor};
        let dev = Device::Cpu;
        let edges: Vec<_> = (0..4).map(|i| (i, (i + 1) % 4)).collect();
        let adj = sparse::adjacency_from_edges(4, &edges, true).unwrap();
        let adj = normalize_adj(&adj, Some(-0.5)).unwrap();
        vec![
            GraphTensor::Dense(Tensor::ones((4, n_features), DType::F32, &dev).unwrap()),
            GraphTensor::Sparse(adj.to_tensor(&dev).unwrap()),
            GraphTensor::Dense(index_tensor(&[0, 2], &dev).unwrap()),
        ]
    }

    fn sq_sum(var: &Var) -> f32 {
        var.as_tensor()
            .sqr()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    #[test]
    fn test_validate_l2_norms() {
        let arch = Architecture::gcn().with_l2_norms(vec![5e-4, 5e-4]);
        assert!(matches!(arch.validate(), Err(Error::InvalidConfig(_))));
        let arch = Architecture::gcn().with_l2_norms(vec![-1.0]);
        assert!(arch.validate().is_err());
        // with_hiddens keeps the l2 weight for every new layer
        let arch = Architecture::gcn().with_hiddens(vec![8, 4], vec![Activation::Relu; 2]);
        assert_eq!(arch.l2_norms, vec![5e-4, 5e-4]);
        assert!(arch.validate().is_ok());
    }

    #[test]
    fn test_l2_penalty_covers_hidden_kernels() {
        let backend = CandleBackend::new(Device::Cpu);
        let dims = ModelDims {
            n_features: 3,
            n_classes: 2,
        };
        let arch = Architecture::gcn()
            .with_hiddens(vec![4], vec![Activation::Relu])
            .with_l2_norms(vec![0.5]);
        let net = backend.build(&arch, dims).unwrap();
        let out = net.forward(&ring_inputs(3), false).unwrap();

        // hidden kernel is (3, 4); the output kernel (4, 2) is not penalized
        let hidden = net
            .vars()
            .into_iter()
            .find(|v| v.dims() == &[3, 4])
            .unwrap();
        let l2 = out.l2.unwrap().to_scalar::<f32>().unwrap();
        assert!((l2 - 0.5 * sq_sum(&hidden)).abs() < 1e-5);
        assert!(l2 > 0.0);

        let arch = arch.with_l2_norms(vec![0.0]);
        let net = backend.build(&arch, dims).unwrap();
        assert!(net.forward(&ring_inputs(3), false).unwrap().l2.is_none());
    }

    #[test]
    fn test_fastgcn_l2_penalty() {
        let backend = CandleBackend::new(Device::Cpu);
        let dims = ModelDims {
            n_features: 3,
            n_classes: 2,
        };
        let arch = Architecture::fast_gcn()
            .with_hiddens(vec![5], vec![Activation::Relu])
            .with_l2_norms(vec![2.0]);
        let net = backend.build(&arch, dims).unwrap();
        let out = net.forward(&ring_inputs(3)[..2], false).unwrap();
        // candle's Linear stores its weight as (out, in)
        let dense = net
            .vars()
            .into_iter()
            .find(|v| v.dims() == &[5, 3])
            .unwrap();
        let l2 = out.l2.unwrap().to_scalar::<f32>().unwrap();
        assert!((l2 - 2.0 * sq_sum(&dense)).abs() < 1e-4);
    }

    #[test]
    fn test_robust_uses_configured_activations() {
        let backend = CandleBackend::new(Device::Cpu);
        let dims = ModelDims {
            n_features: 3,
            n_classes: 2,
        };
        let arch = Architecture::robust_gcn().with_hiddens(vec![4], vec![Activation::Tanh]);
        let net = backend.build(&arch, dims).unwrap();
        let mut inputs = ring_inputs(3);
        let index = inputs.pop().unwrap();
        inputs.push(inputs[1].clone());
        inputs.push(index);
        let out = net.forward(&inputs, false).unwrap();
        assert_eq!(out.output.dims(), &[2, 2]);
        assert!(out.kl.is_some());
        assert!(out.l2.is_some());
    }

    #[test]
    fn test_wrong_input_count() {
        let backend = CandleBackend::new(Device::Cpu);
        let net = backend
            .build(
                &Architecture::gcn(),
                ModelDims {
                    n_features: 2,
                    n_classes: 2,
                },
            )
            .unwrap();
        assert!(matches!(
            net.forward(&[], false),
            Err(Error::InvalidInputs(_))
        ));
        assert_eq!(net.vars().len(), 2);
    }
}
