use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use tracing::debug;

use super::ConfigError;

/// Compute device the experts are placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    /// CUDA accelerator, optionally pinned to an index
    Cuda(Option<u32>),
}

impl FromStr for Device {
    type Err = ConfigError;

    /// Accepts `cpu`, `cuda` and `cuda:<index>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda(None)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(|index| Device::Cuda(Some(index)))
                .ok_or_else(|| ConfigError::InvalidDevice(other.to_string())),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(None) => f.write_str("cuda"),
            Device::Cuda(Some(index)) => write!(f, "cuda:{}", index),
        }
    }
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Pick the best device present on this host: an accelerator if one is
/// visible, otherwise the CPU.
pub fn probe_default_device() -> Device {
    let count = accelerator_count();
    debug!("Detected {} CUDA device(s)", count);
    if count > 0 {
        Device::Cuda(None)
    } else {
        Device::Cpu
    }
}

/// Count NVIDIA devices (requires `gpu` feature)
#[cfg(feature = "gpu")]
fn accelerator_count() -> u32 {
    use nvml_wrapper::Nvml;

    match Nvml::init() {
        Ok(nvml) => nvml.device_count().unwrap_or(0),
        Err(_) => 0,
    }
}

/// Count NVIDIA devices - stub when GPU feature is disabled
#[cfg(not(feature = "gpu"))]
fn accelerator_count() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("cuda".parse::<Device>().unwrap(), Device::Cuda(None));
        assert_eq!("cuda:3".parse::<Device>().unwrap(), Device::Cuda(Some(3)));
    }

    #[test]
    fn test_parse_invalid_devices() {
        for bad in ["gpu", "cuda:", "cuda:x", "CPU", ""] {
            assert_eq!(
                bad.parse::<Device>(),
                Err(ConfigError::InvalidDevice(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for device in [Device::Cpu, Device::Cuda(None), Device::Cuda(Some(1))] {
            assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
        }
    }

    #[test]
    fn test_probe_is_deterministic() {
        assert_eq!(probe_default_device(), probe_default_device());
    }
}
