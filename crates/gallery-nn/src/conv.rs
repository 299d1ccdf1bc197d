//! Graph convolution layers over dense or sparse inputs.
//!
//! - [`GraphConvolution`]: `A · (X · W)` (Kipf & Welling, 2017)
//! - [`GaussianConvolution`]: Gaussian-based graph convolution with
//!   variance-based attention (Zhu et al., 2019)
//!
//! Both accept [`GraphTensor`] for the features and the adjacency, so a
//! sparse attribute matrix or adjacency is never densified.

use crate::backend::Activation;
use crate::error::Result;
use candle_core::Tensor;
use candle_nn::{Init, VarBuilder};
use gallery_core::GraphTensor;

const VAR_EPS: f64 = 1e-8;

/// Glorot/Xavier uniform weight of shape `(in, out)`.
fn glorot(
    in_features: usize,
    out_features: usize,
    name: &str,
    vb: &VarBuilder,
) -> Result<Tensor> {
    let bound = (6.0 / (in_features + out_features) as f64).sqrt();
    Ok(vb.get_with_hints(
        (in_features, out_features),
        name,
        Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?)
}

/// Graph Convolutional Network layer.
///
/// Implements: `H' = A_hat (H W) + b`, with `A_hat` normalized beforehand.
/// The activation is applied by the caller.
///
/// # Reference
///
/// Kipf & Welling, "Semi-Supervised Classification with Graph Convolutional
/// Networks", ICLR 2017.
pub struct GraphConvolution {
    weight: Tensor,
    bias: Option<Tensor>,
}

impl GraphConvolution {
    pub fn new(
        in_features: usize,
        out_features: usize,
        use_bias: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let weight = glorot(in_features, out_features, "weight", &vb)?;
        let bias = if use_bias {
            Some(vb.get_with_hints(out_features, "bias", Init::Const(0.0))?)
        } else {
            None
        };
        Ok(Self { weight, bias })
    }

    /// `||W||^2`, the kernel L2 penalty before weighting.
    pub fn weight_sq_norm(&self) -> Result<Tensor> {
        Ok(self.weight.sqr()?.sum_all()?)
    }

    /// `x`: `(k, in)` features, `adj`: `(b, k)` propagation matrix.
    /// Returns `(b, out)`.
    pub fn forward(&self, x: &GraphTensor, adj: &GraphTensor) -> Result<Tensor> {
        let h = x.matmul(&self.weight)?;
        let out = adj.matmul(&h)?;
        match &self.bias {
            Some(b) => Ok(out.broadcast_add(b)?),
            None => Ok(out),
        }
    }
}

/// Mean and variance of the node representations.
#[derive(Debug, Clone)]
pub struct Gaussian {
    pub mean: Tensor,
    pub var: Tensor,
}

impl Gaussian {
    /// Reparameterized draw `mean + eps * sqrt(var)`, `eps ~ N(0, 1)`.
    pub fn sample(&self) -> Result<Tensor> {
        let std = self.var.affine(1.0, VAR_EPS)?.sqrt()?;
        let eps = std.randn_like(0.0, 1.0)?;
        Ok(self.mean.add(&eps.mul(&std)?)?)
    }

    /// `-1/2 * mean_i sum_j (1 + ln var_ij - mean_ij^2 - var_ij)`.
    pub fn kl_divergence(&self) -> Result<Tensor> {
        let log_var = self.var.affine(1.0, VAR_EPS)?.log()?;
        let terms = log_var
            .affine(1.0, 1.0)?
            .sub(&self.mean.sqr()?)?
            .sub(&self.var)?;
        Ok(terms.sum(1)?.mean_all()?.affine(-0.5, 0.0)?)
    }
}

/// Gaussian graph convolution (RobustGCN).
///
/// Every node is a Gaussian `N(mean, diag(var))`. Each layer maps both
/// moments, then attenuates high-variance neighbors before aggregating:
///
/// ```text
/// mean = act(mean W_m)          var = relu(var W_v)
/// att  = exp(-gamma * var)
/// mean = A_0 (mean * att)       var = A_1 (var * att * att)
/// ```
///
/// `A_0` is usually `D^-1/2 A D^-1/2` and `A_1` is `D^-1 A D^-1`.
///
/// # Reference
///
/// Zhu, Zhang, Cui & Zhu, "Robust Graph Convolutional Networks Against
/// Adversarial Attacks", KDD 2019.
pub struct GaussianConvolution {
    mean_weight: Tensor,
    var_weight: Tensor,
    gamma: f64,
    mean_activation: Activation,
}

impl GaussianConvolution {
    pub fn new(
        in_features: usize,
        out_features: usize,
        gamma: f64,
        mean_activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            mean_weight: glorot(in_features, out_features, "mean_weight", &vb)?,
            var_weight: glorot(in_features, out_features, "var_weight", &vb)?,
            gamma,
            mean_activation,
        })
    }

    /// `||W_m||^2 + ||W_v||^2`.
    pub fn weight_sq_norm(&self) -> Result<Tensor> {
        let mean = self.mean_weight.sqr()?.sum_all()?;
        Ok(mean.add(&self.var_weight.sqr()?.sum_all()?)?)
    }

    /// First layer: both moments come from the same features. Also returns
    /// the KL term of the pre-propagation Gaussian against `N(0, I)`.
    pub fn forward_features(
        &self,
        x: &GraphTensor,
        adj_mean: &GraphTensor,
        adj_var: &GraphTensor,
    ) -> Result<(Gaussian, Tensor)> {
        let moments = Gaussian {
            mean: self.mean_activation.apply(&x.matmul(&self.mean_weight)?)?,
            var: x.matmul(&self.var_weight)?.relu()?,
        };
        let kl = moments.kl_divergence()?;
        Ok((self.propagate(moments, adj_mean, adj_var)?, kl))
    }

    /// Later layers: map each moment with its own weight.
    pub fn forward(
        &self,
        input: &Gaussian,
        adj_mean: &GraphTensor,
        adj_var: &GraphTensor,
    ) -> Result<Gaussian> {
        let moments = Gaussian {
            mean: self
                .mean_activation
                .apply(&input.mean.matmul(&self.mean_weight)?)?,
            var: input.var.matmul(&self.var_weight)?.relu()?,
        };
        self.propagate(moments, adj_mean, adj_var)
    }

    fn propagate(
        &self,
        moments: Gaussian,
        adj_mean: &GraphTensor,
        adj_var: &GraphTensor,
    ) -> Result<Gaussian> {
        let attention = moments.var.affine(-self.gamma, 0.0)?.exp()?;
        let mean = adj_mean.matmul(&moments.mean.mul(&attention)?)?;
        let var = adj_var.matmul(&moments.var.mul(&attention)?.mul(&attention)?)?;
        Ok(Gaussian { mean, var })
    }
}
