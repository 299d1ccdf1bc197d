//! GCN-family model wrappers on top of `gallery-core`.
//!
//! Each wrapper preprocesses its graph once, serves batches through
//! [`GraphModel::train_sequence`] / [`GraphModel::test_sequence`], and
//! delegates the network itself to a [`Backend`].
//!
//! # Modules
//!
//! - [`backend`]: [`Backend`] trait, [`CandleBackend`], [`Architecture`]
//! - [`conv`]: graph convolution and Gaussian graph convolution layers
//! - [`models`]: [`Gcn`], [`FastGcn`], [`RobustGcn`]
//!
//! # Example
//!
//! ```rust,no_run
//! use gallery_core::{Context, Graph, Sequence};
//! use gallery_nn::{Architecture, FastGcn, FastGcnConfig, GraphModel};
//! use ndarray::{Array1, Array2};
//!
//! let edges: Vec<_> = (0..100).map(|i| (i, (i + 1) % 100)).collect();
//! let graph = Graph::from_edges(&edges, Array2::<f64>::eye(100), Array1::zeros(100))?;
//!
//! let mut model = FastGcn::new(graph, FastGcnConfig::default(), Context::default())?;
//! model.build(Architecture::fast_gcn())?;
//!
//! let train: Vec<usize> = (0..80).collect();
//! let mut seq = model.train_sequence(&train)?;
//! for _epoch in 0..10 {
//!     for batch in seq.batches() {
//!         let out = model.forward(&batch?, true)?;
//!         // loss on out.output plus out.kl / out.l2, then an optimizer step on model.vars()
//!     }
//!     seq.on_epoch_end();
//! }
//! let probs = model.predict(&[80, 81, 82])?;
//! # Ok::<(), gallery_nn::Error>(())
//! ```

pub mod backend;
pub mod conv;
pub mod error;
pub mod models;

pub use backend::{
    Activation, Architecture, Backend, CandleBackend, ForwardModel, ForwardOutput, ModelDims,
    ModelKind,
};
pub use error::{Error, Result};
pub use models::{
    FastGcn, FastGcnConfig, Gcn, GcnConfig, GraphModel, RobustGcn, RobustGcnConfig,
};
