//! Transform registry for graph preprocessing.
//!
//! Models accept their adjacency and attribute preprocessing as a
//! [`TransformSpec`]: nothing (identity), a registered name, or a concrete
//! transform. The spec is resolved once when the model is configured, so an
//! unknown name fails there instead of deep inside preprocessing.
//!
//! | Adjacency name    | Transform                                  |
//! |-------------------|--------------------------------------------|
//! | `normalize_adj`   | `D^-1/2 (A + I) D^-1/2`                    |
//! | `identity`/`none` | pass-through                               |
//!
//! | Attribute name              | Transform              |
//! |-----------------------------|------------------------|
//! | `normalize_attr`/`row_wise` | row L1 normalization   |
//! | `row_wise_l2`               | row L2 normalization   |
//! | `col_wise`                  | column L1              |
//! | `col_wise_l2`               | column L2              |
//! | `identity`/`none`           | pass-through           |

pub mod adj;
pub mod attr;

pub use adj::{normalize_adj, normalize_adj_list, NormalizeAdj};
pub use attr::{normalize_attr, AttrNorm};

use crate::error::{Error, Result};
use crate::graph::AttrMatrix;
use sprs::CsMat;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Unresolved transform: absent, named, or given directly.
#[derive(Debug, Clone, Default)]
pub enum TransformSpec<T> {
    #[default]
    None,
    Name(String),
    Transform(T),
}

impl<T> TransformSpec<T>
where
    T: FromStr<Err = Error> + Default,
{
    /// Turn the spec into a concrete transform. `None` yields `T::default()`,
    /// which is the identity for both transform kinds.
    pub fn resolve(self) -> Result<T> {
        match self {
            TransformSpec::None => Ok(T::default()),
            TransformSpec::Name(name) => name.parse(),
            TransformSpec::Transform(t) => Ok(t),
        }
    }
}

impl<T> From<&str> for TransformSpec<T> {
    fn from(name: &str) -> Self {
        TransformSpec::Name(name.to_string())
    }
}

impl From<AdjTransform> for TransformSpec<AdjTransform> {
    fn from(t: AdjTransform) -> Self {
        TransformSpec::Transform(t)
    }
}

impl From<AttrTransform> for TransformSpec<AttrTransform> {
    fn from(t: AttrTransform) -> Self {
        TransformSpec::Transform(t)
    }
}

type AdjFn = dyn Fn(&CsMat<f64>) -> Result<CsMat<f64>> + Send + Sync;
type AttrFn = dyn Fn(&AttrMatrix) -> Result<AttrMatrix> + Send + Sync;

/// Adjacency preprocessing step.
#[derive(Clone, Default)]
pub enum AdjTransform {
    #[default]
    Identity,
    Normalize(NormalizeAdj),
    Custom(Arc<AdjFn>),
}

impl AdjTransform {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&CsMat<f64>) -> Result<CsMat<f64>> + Send + Sync + 'static,
    {
        AdjTransform::Custom(Arc::new(f))
    }

    pub fn apply(&self, adj: &CsMat<f64>) -> Result<CsMat<f64>> {
        match self {
            AdjTransform::Identity => Ok(adj.clone()),
            AdjTransform::Normalize(norm) => norm.apply(adj),
            AdjTransform::Custom(f) => f(adj),
        }
    }
}

impl fmt::Debug for AdjTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjTransform::Identity => write!(f, "Identity"),
            AdjTransform::Normalize(n) => f.debug_tuple("Normalize").field(n).finish(),
            AdjTransform::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl FromStr for AdjTransform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normalize_adj" => Ok(AdjTransform::Normalize(NormalizeAdj::default())),
            "identity" | "none" => Ok(AdjTransform::Identity),
            _ => Err(Error::UnknownTransform(s.to_string())),
        }
    }
}

/// Attribute preprocessing step.
#[derive(Clone, Default)]
pub enum AttrTransform {
    #[default]
    Identity,
    Normalize(AttrNorm),
    Custom(Arc<AttrFn>),
}

impl AttrTransform {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&AttrMatrix) -> Result<AttrMatrix> + Send + Sync + 'static,
    {
        AttrTransform::Custom(Arc::new(f))
    }

    pub fn apply(&self, attr: &AttrMatrix) -> Result<AttrMatrix> {
        match self {
            AttrTransform::Identity => Ok(attr.clone()),
            AttrTransform::Normalize(kind) => Ok(normalize_attr(attr, *kind)),
            AttrTransform::Custom(f) => f(attr),
        }
    }
}

impl fmt::Debug for AttrTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrTransform::Identity => write!(f, "Identity"),
            AttrTransform::Normalize(k) => f.debug_tuple("Normalize").field(k).finish(),
            AttrTransform::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl FromStr for AttrTransform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.to_ascii_lowercase();
        match name.as_str() {
            "normalize_attr" => Ok(AttrTransform::Normalize(AttrNorm::RowWise)),
            "identity" | "none" => Ok(AttrTransform::Identity),
            _ => name
                .parse::<AttrNorm>()
                .map(AttrTransform::Normalize)
                .map_err(|_| Error::UnknownTransform(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{adjacency_from_edges, to_dense};
    use ndarray::array;

    #[test]
    fn test_none_resolves_to_identity() {
        let t: AdjTransform = TransformSpec::None.resolve().unwrap();
        assert!(matches!(t, AdjTransform::Identity));
        let t: AttrTransform = TransformSpec::None.resolve().unwrap();
        assert!(matches!(t, AttrTransform::Identity));
    }

    #[test]
    fn test_named_adj_transform() {
        let t: AdjTransform = TransformSpec::from("normalize_adj").resolve().unwrap();
        let adj = adjacency_from_edges(2, &[(0, 1)], true).unwrap();
        let out = to_dense(&t.apply(&adj).unwrap());
        // degree 2 with self-loop everywhere
        for v in out.iter() {
            assert!((v - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_named_attr_transforms() {
        for (name, kind) in [
            ("normalize_attr", AttrNorm::RowWise),
            ("row_wise", AttrNorm::RowWise),
            ("col_wise_l2", AttrNorm::ColWiseL2),
        ] {
            let t: AttrTransform = name.parse().unwrap();
            assert!(matches!(t, AttrTransform::Normalize(k) if k == kind), "{name}");
        }
    }

    #[test]
    fn test_unknown_name_fails() {
        let err = TransformSpec::<AdjTransform>::from("laplacian")
            .resolve()
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTransform(ref n) if n == "laplacian"));
        assert!(matches!(
            "zscore".parse::<AttrTransform>(),
            Err(Error::UnknownTransform(_))
        ));
    }

    #[test]
    fn test_custom_transform_passes_through() {
        let spec = TransformSpec::from(AttrTransform::custom(|x| {
            Ok(AttrMatrix::Dense(x.to_dense().mapv(|v| v * 2.0)))
        }));
        let t = spec.resolve().unwrap();
        let out = t.apply(&AttrMatrix::Dense(array![[1.0, 2.0]])).unwrap();
        assert_eq!(out.to_dense(), array![[2.0, 4.0]]);
    }

    #[test]
    fn test_identity_keeps_input() {
        let adj = adjacency_from_edges(3, &[(0, 2)], true).unwrap();
        assert_eq!(AdjTransform::Identity.apply(&adj).unwrap(), adj);
    }
}
