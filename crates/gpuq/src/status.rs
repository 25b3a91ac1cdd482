//! Live usage of CUDA devices, read through NVML.
//!
//! NVML numbers devices in PCI bus order. That matches CUDA indices only when
//! `CUDA_DEVICE_ORDER=PCI_BUS_ID` is set, so callers combining the two should
//! match on the PCI bus id rather than the index.

use std::ffi::OsStr;
use std::fmt;

use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use serde::Serialize;

use crate::error::ProbeError;

const BYTES_PER_MIB: u64 = 1 << 20;

/// Snapshot of what a device is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuStatus {
    pub index: u32,
    /// Percent of the last sample period a kernel was running.
    pub utilisation: u32,
    /// MiB, rounded down.
    pub used_memory: u64,
    /// Sorted, without duplicates.
    pub pids: Vec<u32>,
}

impl GpuStatus {
    pub fn new(
        index: u32,
        utilisation: u32,
        used_memory_bytes: u64,
        pids: impl IntoIterator<Item = u32>,
    ) -> Self {
        let mut pids: Vec<u32> = pids.into_iter().collect();
        pids.sort_unstable();
        pids.dedup();
        Self {
            index,
            utilisation,
            used_memory: used_memory_bytes / BYTES_PER_MIB,
            pids,
        }
    }
}

impl fmt::Display for GpuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CUDA[{}]: {}% busy, {} MiB used, pids {:?}",
            self.index, self.utilisation, self.used_memory, self.pids
        )
    }
}

/// Where device usage comes from.
pub trait StatusSource {
    fn device_count(&self) -> Result<u32, ProbeError>;

    /// Usage of device `index`, which must be below [`Self::device_count`].
    fn gpu_status(&self, index: u32) -> Result<GpuStatus, ProbeError>;
}

/// [`StatusSource`] backed by the NVIDIA management library.
pub struct NvmlStatus {
    nvml: Nvml,
}

impl NvmlStatus {
    pub fn init() -> Result<Self, ProbeError> {
        let nvml = match Nvml::init() {
            Ok(nvml) => nvml,
            Err(err) => {
                tracing::debug!(%err, "Default NVML init failed, trying libnvidia-ml.so.1");
                Nvml::builder()
                    .lib_path(OsStr::new("libnvidia-ml.so.1"))
                    .init()
                    .map_err(|err| nvml_error("nvmlInit", &err))?
            }
        };
        tracing::debug!("NVML initialized");
        Ok(Self { nvml })
    }
}

fn nvml_error(operation: &'static str, err: &NvmlError) -> ProbeError {
    ProbeError::Nvml {
        operation,
        message: err.to_string(),
    }
}

impl StatusSource for NvmlStatus {
    fn device_count(&self) -> Result<u32, ProbeError> {
        self.nvml
            .device_count()
            .map_err(|err| nvml_error("nvmlDeviceGetCount", &err))
    }

    fn gpu_status(&self, index: u32) -> Result<GpuStatus, ProbeError> {
        let device = self
            .nvml
            .device_by_index(index)
            .map_err(|err| nvml_error("nvmlDeviceGetHandleByIndex", &err))?;
        let utilization = device
            .utilization_rates()
            .map_err(|err| nvml_error("nvmlDeviceGetUtilizationRates", &err))?;
        let memory = device
            .memory_info()
            .map_err(|err| nvml_error("nvmlDeviceGetMemoryInfo", &err))?;
        let compute = device
            .running_compute_processes()
            .map_err(|err| nvml_error("nvmlDeviceGetComputeRunningProcesses", &err))?;
        let graphics = device
            .running_graphics_processes()
            .map_err(|err| nvml_error("nvmlDeviceGetGraphicsRunningProcesses", &err))?;

        Ok(GpuStatus::new(
            index,
            utilization.gpu,
            memory.used,
            compute.iter().chain(graphics.iter()).map(|process| process.pid),
        ))
    }
}

/// Usage of device `index`, or `None` when there is no such device or the
/// source cannot report it.
pub fn cuda_info(source: &impl StatusSource, index: i64) -> Option<GpuStatus> {
    let count = match source.device_count() {
        Ok(count) => count,
        Err(err) => {
            tracing::warn!(%err, "Cannot count devices for status");
            return None;
        }
    };

    let index = match u32::try_from(index) {
        Ok(index) if index < count => index,
        _ => {
            tracing::debug!(index, count, "Status requested past the last device");
            return None;
        }
    };

    match source.gpu_status(index) {
        Ok(status) => Some(status),
        Err(err) => {
            tracing::warn!(index, %err, "Cannot read device status");
            None
        }
    }
}
