//! Compute device selection.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Where the model runs and where its tensors are prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
    /// NVIDIA GPU through the CUDA execution provider.
    Cuda {
        /// CUDA device ordinal.
        device_id: i32,
    },
}

impl Device {
    /// Whether the device executes work asynchronously from the host.
    #[must_use]
    pub const fn is_accelerator(&self) -> bool {
        matches!(self, Self::Cuda { .. })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda { device_id } => write!(f, "cuda:{device_id}"),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda { device_id: 0 }),
            _ => {
                let id = s
                    .strip_prefix("cuda:")
                    .and_then(|id| id.parse::<i32>().ok())
                    .filter(|id| *id >= 0)
                    .ok_or_else(|| {
                        Error::invalid_parameter("device", format!("unknown device '{s}'"))
                    })?;
                Ok(Self::Cuda { device_id: id })
            }
        }
    }
}
