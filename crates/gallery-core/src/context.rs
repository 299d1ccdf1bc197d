//! Device placement and seeding, passed explicitly instead of set globally.

use crate::error::{Error, Result};
use candle_core::Device;
use serde::{Deserialize, Serialize};

/// Seed used when neither the caller nor a config supplies one.
pub const DEFAULT_SEED: u64 = 42;

/// Parse a device hint such as `"cpu"`, `"CPU:0"`, `"cuda:1"`, `"gpu:0"` or
/// `"metal"`. `"auto"` picks CUDA device 0 when available, else the CPU.
///
/// # Errors
/// `UnknownDevice` for anything else. Requesting an accelerator the build
/// lacks support for surfaces candle's error.
pub fn parse_device(hint: &str) -> Result<Device> {
    let unknown = || Error::UnknownDevice(hint.to_string());
    let lower = hint.trim().to_ascii_lowercase();
    let (kind, ordinal) = match lower.split_once(':') {
        Some((kind, ordinal)) => (kind, ordinal.parse::<usize>().map_err(|_| unknown())?),
        None => (lower.as_str(), 0),
    };
    match kind {
        "cpu" if ordinal == 0 => Ok(Device::Cpu),
        "cuda" | "gpu" => Ok(Device::new_cuda(ordinal)?),
        "metal" => Ok(Device::new_metal(ordinal)?),
        "auto" => Ok(Device::cuda_if_available(ordinal)?),
        _ => Err(unknown()),
    }
}

/// Mix `seed` with stream identifiers (epoch, batch, ...) into a new seed.
///
/// SplitMix64 finalizer per part, so nearby streams get unrelated seeds.
pub fn derive_seed(seed: u64, parts: &[u64]) -> u64 {
    parts.iter().fold(splitmix(seed), |acc, &part| {
        splitmix(acc ^ part.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    })
}

fn splitmix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Where tensors live and how randomness is seeded.
#[derive(Debug, Clone)]
pub struct Context {
    device: Device,
    seed: u64,
}

impl Default for Context {
    fn default() -> Self {
        Self::cpu(DEFAULT_SEED)
    }
}

impl Context {
    pub fn new(device: Device, seed: u64) -> Self {
        Self { device, seed }
    }

    pub fn cpu(seed: u64) -> Self {
        Self::new(Device::Cpu, seed)
    }

    /// Build from a device hint; `seed = None` draws a fresh random seed.
    pub fn from_hint(hint: &str, seed: Option<u64>) -> Result<Self> {
        let device = parse_device(hint)?;
        Ok(Self::new(device, seed.unwrap_or_else(rand::random)))
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Serializable form of [`Context`].
///
/// ```json
/// { "device": "cuda:0", "seed": 123 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub device: String,
    pub seed: Option<u64>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            device: "cpu".to_string(),
            seed: None,
        }
    }
}

impl ContextConfig {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn build(&self) -> Result<Context> {
        Context::from_hint(&self.device, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_variants() {
        for hint in ["cpu", "CPU", "cpu:0", "  Cpu:0 "] {
            assert!(matches!(parse_device(hint).unwrap(), Device::Cpu), "{hint}");
        }
    }

    #[test]
    fn test_parse_unknown() {
        for hint in ["tpu", "cpu:x", "cpu:1", ""] {
            assert!(
                matches!(parse_device(hint), Err(Error::UnknownDevice(_))),
                "{hint}"
            );
        }
    }

    #[test]
    fn test_derive_seed_separates_streams() {
        let a = derive_seed(7, &[0, 1]);
        let b = derive_seed(7, &[1, 0]);
        let c = derive_seed(7, &[0, 1]);
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_ne!(derive_seed(7, &[]), derive_seed(8, &[]));
    }

    #[test]
    fn test_config_from_json() {
        let cfg = ContextConfig::from_json(r#"{"device": "CPU:0", "seed": 9}"#).unwrap();
        let ctx = cfg.build().unwrap();
        assert_eq!(ctx.seed(), 9);
        assert!(matches!(ctx.device(), Device::Cpu));

        let cfg = ContextConfig::from_json("{}").unwrap();
        assert_eq!(cfg, ContextConfig::default());
    }

    #[test]
    fn test_config_bad_json() {
        assert!(matches!(
            ContextConfig::from_json("{device: cpu}"),
            Err(Error::Json(_))
        ));
    }
}
