// Common model utilities and types

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AiError;

/// Weight quantization mode requested for a base model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantization {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "8bit")]
    Int8,
    #[serde(rename = "4bit")]
    Int4,
}

impl Quantization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::None => "none",
            Quantization::Int8 => "8bit",
            Quantization::Int4 => "4bit",
        }
    }

    /// Whether weights are stored below full precision
    pub fn is_reduced(&self) -> bool {
        !matches!(self, Quantization::None)
    }

    /// Compute precision policy for this mode.
    ///
    /// The safetensors path has no sub-byte kernels, so both reduced modes
    /// pack weights in half precision and compute in half precision.
    pub fn precision(&self) -> PrecisionPolicy {
        match self {
            Quantization::None => PrecisionPolicy {
                weight_dtype: DType::F32,
                compute_dtype: DType::F32,
            },
            Quantization::Int8 | Quantization::Int4 => PrecisionPolicy {
                weight_dtype: DType::F16,
                compute_dtype: DType::F16,
            },
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Quantization::None),
            "8bit" => Ok(Quantization::Int8),
            "4bit" => Ok(Quantization::Int4),
            other => Err(AiError::UnsupportedQuantization(other.to_string())),
        }
    }
}

/// Storage and compute dtypes for a loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    pub weight_dtype: DType,
    pub compute_dtype: DType,
}

/// Device selection from config ("auto", "cpu", "cuda", "metal")
pub fn select_device(name: &str) -> Result<Device> {
    match name.trim().to_ascii_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).context("Failed to initialize CUDA device"),
        "metal" => Device::new_metal(0).context("Failed to initialize Metal device"),
        _ => {
            #[cfg(target_os = "macos")]
            {
                // Try Metal (Apple Silicon) first
                if let Ok(device) = Device::new_metal(0) {
                    return Ok(device);
                }
            }

            // Falls back to CPU when CUDA is not compiled in or absent
            Ok(Device::cuda_if_available(0)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantization_round_trips_through_strings() {
        for q in [Quantization::None, Quantization::Int8, Quantization::Int4] {
            assert_eq!(q.as_str().parse::<Quantization>().unwrap(), q);
        }
        assert_eq!("4BIT".parse::<Quantization>().unwrap(), Quantization::Int4);
    }

    #[test]
    fn test_unknown_quantization_rejected() {
        let err = "2bit".parse::<Quantization>().unwrap_err();
        assert!(matches!(err, AiError::UnsupportedQuantization(ref s) if s == "2bit"));
    }

    #[test]
    fn test_precision_policy() {
        assert_eq!(Quantization::None.precision().weight_dtype, DType::F32);
        assert_eq!(Quantization::Int4.precision().weight_dtype, DType::F16);
        assert_eq!(Quantization::Int8.precision().compute_dtype, DType::F16);
        assert!(Quantization::Int8.is_reduced());
        assert!(!Quantization::None.is_reduced());
    }

    #[test]
    fn test_cpu_device_selection() {
        assert!(matches!(select_device("cpu").unwrap(), Device::Cpu));
    }

    #[test]
    fn test_serde_uses_registry_spelling() {
        assert_eq!(serde_json::to_string(&Quantization::Int4).unwrap(), "\"4bit\"");
    }
}
