//! # gallery-core
//!
//! Graph preprocessing and batch sequencing for GCN-family models.
//!
//! A [`Graph`] (sparse adjacency, attributes, labels) goes through the
//! transforms once, gets materialized as device tensors, and is then served
//! to a training loop by a [`Sequence`]:
//!
//! ```text
//! Graph ──▶ AdjTransform / AttrTransform ──▶ ToTensor ──▶ Sequence::get_batch(i)
//!            (D^r A D^r, row/col norms)     (candle)     (full batch | FastGCN)
//! ```
//!
//! ## Modules
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | [`graph`]     | [`Graph`] and [`AttrMatrix`]                         |
//! | [`sparse`]    | `sprs` helpers: slicing, products, degree sums       |
//! | [`transform`] | named/custom transforms, adjacency + attribute norms |
//! | [`tensor`]    | [`ToTensor`], [`SparseTensor`], [`GraphTensor`]      |
//! | [`context`]   | device parsing and seed derivation                   |
//! | [`sequence`]  | [`FullBatchSequence`], [`FastGcnSequence`]           |
//!
//! ## Example
//!
//! ```rust,no_run
//! use gallery_core::{normalize_adj, Graph, Sequence, FastGcnSequence, SamplingConfig, ToTensor};
//! use candle_core::Device;
//! use ndarray::{Array1, Array2};
//!
//! let edges: Vec<_> = (0..6).map(|i| (i, (i + 1) % 6)).collect();
//! let graph = Graph::from_edges(&edges, Array2::<f64>::eye(6), Array1::zeros(6))?;
//! let adj = normalize_adj(graph.adj_matrix(), Some(-0.5))?;
//!
//! let dev = Device::Cpu;
//! let x = graph.attr_matrix().to_dense().to_tensor(&dev)?;
//! let config = SamplingConfig::new().with_batch_size(Some(2)).with_rank(Some(3));
//! let seq = FastGcnSequence::new(x, adj, graph.labels().clone(), config, &dev)?;
//! for batch in seq.batches() {
//!     let batch = batch?;
//!     assert_eq!(batch.len(), 2);
//! }
//! # Ok::<(), gallery_core::Error>(())
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod sequence;
pub mod sparse;
pub mod tensor;
pub mod transform;

pub use context::{parse_device, Context, ContextConfig};
pub use error::{Error, Result};
pub use graph::{AttrMatrix, Graph};
pub use sequence::{
    Batch, FastGcnSequence, FullBatchSequence, SamplePolicy, SamplingConfig, Sequence,
};
pub use tensor::{index_tensor, GraphTensor, SparseTensor, ToTensor};
pub use transform::{
    normalize_adj, normalize_adj_list, normalize_attr, AdjTransform, AttrNorm, AttrTransform,
    NormalizeAdj, TransformSpec,
};
