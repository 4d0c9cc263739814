//! Compute device selection.
//!
//! The platform accelerator is probed first (Metal on macOS, CUDA
//! elsewhere), then CPU. A probe that errors or panics counts as
//! "unavailable"; selection itself never fails.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use candle_core::Device;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Metal,
    Cuda,
    Cpu,
}

impl DeviceKind {
    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::Metal => "metal",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Cpu => "cpu",
        }
    }

    /// Open the candle device for this kind.
    pub fn open(self) -> candle_core::Result<Device> {
        match self {
            DeviceKind::Metal => Device::new_metal(0),
            DeviceKind::Cuda => Device::new_cuda(0),
            DeviceKind::Cpu => Ok(Device::Cpu),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Probe = Box<dyn Fn() -> anyhow::Result<bool> + Send + Sync>;

pub struct DeviceSelector {
    candidates: Vec<(DeviceKind, Probe)>,
}

impl DeviceSelector {
    /// Candidates for the current platform, accelerator first.
    pub fn for_platform() -> Self {
        if cfg!(target_os = "macos") {
            Self::with_probes(vec![(DeviceKind::Metal, Box::new(probe_metal) as Probe)])
        } else {
            Self::with_probes(vec![(DeviceKind::Cuda, Box::new(probe_cuda) as Probe)])
        }
    }

    pub fn with_probes(candidates: Vec<(DeviceKind, Probe)>) -> Self {
        Self { candidates }
    }

    pub fn select(&self) -> DeviceKind {
        for (kind, probe) in &self.candidates {
            match panic::catch_unwind(AssertUnwindSafe(probe)) {
                Ok(Ok(true)) => {
                    info!(device = %kind, "accelerator available");
                    return *kind;
                }
                Ok(Ok(false)) => debug!(device = %kind, "accelerator not available"),
                Ok(Err(e)) => warn!(device = %kind, error = %e, "accelerator probe failed"),
                Err(_) => warn!(device = %kind, "accelerator probe panicked"),
            }
        }
        info!(device = "cpu", "using CPU");
        DeviceKind::Cpu
    }
}

fn probe_metal() -> anyhow::Result<bool> {
    if !candle_core::utils::metal_is_available() {
        return Ok(false);
    }
    Device::new_metal(0)?;
    Ok(true)
}

fn probe_cuda() -> anyhow::Result<bool> {
    if !candle_core::utils::cuda_is_available() {
        return Ok(false);
    }
    Device::new_cuda(0)?;
    Ok(true)
}

/// Platform selection, computed once per process.
pub fn select_device() -> DeviceKind {
    static SELECTED: OnceLock<DeviceKind> = OnceLock::new();
    *SELECTED.get_or_init(|| DeviceSelector::for_platform().select())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(f: impl Fn() -> anyhow::Result<bool> + Send + Sync + 'static) -> Probe {
        Box::new(f)
    }

    #[test]
    fn failing_probe_falls_back_to_cpu() {
        let selector = DeviceSelector::with_probes(vec![
            (DeviceKind::Metal, probe(|| Err(anyhow::anyhow!("driver exploded")))),
        ]);
        assert_eq!(selector.select(), DeviceKind::Cpu);
    }

    #[test]
    fn panicking_probe_falls_back_to_cpu() {
        let selector = DeviceSelector::with_probes(vec![
            (DeviceKind::Cuda, probe(|| panic!("probe panicked"))),
        ]);
        assert_eq!(selector.select(), DeviceKind::Cpu);
    }

    #[test]
    fn first_available_candidate_wins() {
        let selector = DeviceSelector::with_probes(vec![
            (DeviceKind::Metal, probe(|| Ok(false))),
            (DeviceKind::Cuda, probe(|| Ok(true))),
        ]);
        assert_eq!(selector.select(), DeviceKind::Cuda);
    }

    #[test]
    fn platform_selection_is_stable() {
        assert_eq!(select_device(), select_device());
    }
}
