//! CUDA driver API provider.

use std::ffi::c_char;
use std::ffi::c_int;
use std::ffi::c_uint;
use std::ffi::CStr;

pub use cudarc::driver::sys::CUdevice;
pub use cudarc::driver::sys::CUdevice_attribute;
pub use cudarc::driver::sys::CUresult;
use libloading::Library;

use crate::config::LibraryCandidates;
use crate::dl_error::ErrorAccumulator;
use crate::dl_error::DL_ERRORS;
use crate::error::ProbeError;
use crate::loader::open_first;
use crate::loader::ProviderLoader;
use crate::loader::Symbols;
use crate::loader::VendorApi;
use crate::mapper::map_properties;
use crate::mapper::Attribute;
use crate::mapper::DeviceQuery;
use crate::properties::non_negative;
use crate::properties::GpuProperties;
use crate::provider::Provider;

/// A `CUresult` exactly as the driver returned it.
///
/// Newer drivers return codes cudarc's enum does not list, so vendor
/// functions are declared with this type and only compared against known
/// codes.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct RawCuResult(pub c_uint);

impl RawCuResult {
    pub const SUCCESS: RawCuResult = RawCuResult::from_result(CUresult::CUDA_SUCCESS);
    pub const NO_DEVICE: RawCuResult = RawCuResult::from_result(CUresult::CUDA_ERROR_NO_DEVICE);

    pub const fn from_result(result: CUresult) -> Self {
        Self(result as c_uint)
    }
}

impl From<CUresult> for RawCuResult {
    fn from(result: CUresult) -> Self {
        Self::from_result(result)
    }
}

pub type CuInit = unsafe extern "C" fn(flags: c_uint) -> RawCuResult;
pub type CuDeviceGetCount = unsafe extern "C" fn(count: *mut c_int) -> RawCuResult;
pub type CuDeviceGet = unsafe extern "C" fn(device: *mut CUdevice, ordinal: c_int) -> RawCuResult;
pub type CuDeviceGetName =
    unsafe extern "C" fn(name: *mut c_char, len: c_int, dev: CUdevice) -> RawCuResult;
pub type CuDeviceTotalMem = unsafe extern "C" fn(bytes: *mut usize, dev: CUdevice) -> RawCuResult;
pub type CuDeviceGetAttribute = unsafe extern "C" fn(
    pi: *mut c_int,
    attrib: CUdevice_attribute,
    dev: CUdevice,
) -> RawCuResult;
pub type CuGetErrorString =
    unsafe extern "C" fn(error: RawCuResult, p_str: *mut *const c_char) -> RawCuResult;

/// Driver entry points used for probing.
#[derive(Clone, Copy)]
pub struct CudaFns {
    pub cu_init: CuInit,
    pub cu_device_get_count: CuDeviceGetCount,
    pub cu_device_get: CuDeviceGet,
    pub cu_device_get_name: CuDeviceGetName,
    pub cu_device_total_mem: CuDeviceTotalMem,
    pub cu_device_get_attribute: CuDeviceGetAttribute,
    pub cu_get_error_string: Option<CuGetErrorString>,
}

impl CudaFns {
    /// # Safety
    ///
    /// `symbols` must come from a CUDA driver library.
    unsafe fn resolve(symbols: &mut Symbols<'_>) -> Option<Self> {
        // resolve everything first so every missing symbol gets recorded
        let cu_init = symbols.required::<CuInit>("cuInit");
        let cu_device_get_count = symbols.required::<CuDeviceGetCount>("cuDeviceGetCount");
        let cu_device_get = symbols.required::<CuDeviceGet>("cuDeviceGet");
        let cu_device_get_name = symbols.required::<CuDeviceGetName>("cuDeviceGetName");
        let cu_device_total_mem = symbols.required::<CuDeviceTotalMem>("cuDeviceTotalMem_v2");
        let cu_device_get_attribute =
            symbols.required::<CuDeviceGetAttribute>("cuDeviceGetAttribute");
        let cu_get_error_string = symbols.optional::<CuGetErrorString>("cuGetErrorString");

        Some(Self {
            cu_init: cu_init?,
            cu_device_get_count: cu_device_get_count?,
            cu_device_get: cu_device_get?,
            cu_device_get_name: cu_device_get_name?,
            cu_device_total_mem: cu_device_total_mem?,
            cu_device_get_attribute: cu_device_get_attribute?,
            cu_get_error_string,
        })
    }
}

/// An opened CUDA driver library and its resolved functions.
pub struct CudaDriver {
    fns: CudaFns,
    // keeps `fns` valid; dropped last
    _lib: Option<Library>,
}

impl CudaDriver {
    /// Wraps a function table that needs no backing library, e.g. a
    /// simulated driver.
    pub fn from_fns(fns: CudaFns) -> Self {
        Self { fns, _lib: None }
    }

    /// Opens the first usable driver library from the configured candidates.
    pub fn open(errors: &mut ErrorAccumulator) -> Option<Self> {
        Self::open_from(&LibraryCandidates::for_provider(Provider::Cuda), errors)
    }

    pub fn open_from(candidates: &LibraryCandidates, errors: &mut ErrorAccumulator) -> Option<Self> {
        let (lib, fns) = open_first(candidates, errors, |symbols| unsafe {
            CudaFns::resolve(symbols)
        })?;
        Some(Self {
            fns,
            _lib: Some(lib),
        })
    }

    fn check(&self, function: &'static str, result: RawCuResult) -> Result<(), ProbeError> {
        if result == RawCuResult::SUCCESS {
            return Ok(());
        }
        let err = ProbeError::VendorCall {
            provider: Provider::Cuda,
            function,
            code: i32::try_from(result.0).unwrap_or(i32::MAX),
            message: self.error_string(result),
        };
        tracing::debug!("{err}");
        Err(err)
    }

    fn error_string(&self, result: RawCuResult) -> Option<String> {
        let get_error_string = self.fns.cu_get_error_string?;
        let mut message: *const c_char = std::ptr::null();
        let status = unsafe { get_error_string(result, &mut message) };
        if status != RawCuResult::SUCCESS || message.is_null() {
            return None;
        }
        // the driver returns pointers to static strings
        Some(unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
    }
}

impl VendorApi for CudaDriver {
    const PROVIDER: Provider = Provider::Cuda;

    fn device_count(&self) -> Result<u32, ProbeError> {
        let result = unsafe { (self.fns.cu_init)(0) };
        if result == RawCuResult::NO_DEVICE {
            return Ok(0);
        }
        self.check("cuInit", result)?;

        let mut count: c_int = 0;
        let result = unsafe { (self.fns.cu_device_get_count)(&mut count) };
        if result == RawCuResult::NO_DEVICE {
            return Ok(0);
        }
        self.check("cuDeviceGetCount", result)?;
        non_negative(Provider::Cuda, "device_count", count.into())
    }

    fn device_properties(&self, index: u32) -> Result<GpuProperties, ProbeError> {
        let ordinal = c_int::try_from(index).map_err(|_| ProbeError::InvalidValue {
            provider: Provider::Cuda,
            field: "index",
            value: index.into(),
        })?;

        let mut device: CUdevice = 0;
        self.check("cuDeviceGet", unsafe {
            (self.fns.cu_device_get)(&mut device, ordinal)
        })?;

        map_properties(
            &CudaDevice {
                driver: self,
                device,
            },
            index,
        )
    }
}

struct CudaDevice<'a> {
    driver: &'a CudaDriver,
    device: CUdevice,
}

impl DeviceQuery for CudaDevice<'_> {
    const PROVIDER: Provider = Provider::Cuda;

    fn name(&self, buf: &mut [c_char]) -> Result<(), ProbeError> {
        let len = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        self.driver.check("cuDeviceGetName", unsafe {
            (self.driver.fns.cu_device_get_name)(buf.as_mut_ptr(), len, self.device)
        })
    }

    fn total_memory(&self) -> Result<u64, ProbeError> {
        let mut bytes: usize = 0;
        self.driver.check("cuDeviceTotalMem_v2", unsafe {
            (self.driver.fns.cu_device_total_mem)(&mut bytes, self.device)
        })?;
        Ok(bytes as u64)
    }

    fn attribute(&self, attribute: Attribute) -> Result<i32, ProbeError> {
        let mut value: c_int = 0;
        self.driver.check("cuDeviceGetAttribute", unsafe {
            (self.driver.fns.cu_device_get_attribute)(
                &mut value,
                cuda_attribute(attribute),
                self.device,
            )
        })?;
        Ok(value)
    }
}

fn cuda_attribute(attribute: Attribute) -> CUdevice_attribute {
    match attribute {
        Attribute::ComputeCapabilityMajor => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR
        }
        Attribute::ComputeCapabilityMinor => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR
        }
        Attribute::MultiprocessorCount => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT,
        Attribute::MaxThreadsPerMultiprocessor => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_MULTIPROCESSOR
        }
        Attribute::SharedMemoryPerMultiprocessor => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_MULTIPROCESSOR
        }
        Attribute::RegistersPerMultiprocessor => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_REGISTERS_PER_MULTIPROCESSOR
        }
        Attribute::MaxBlocksPerMultiprocessor => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCKS_PER_MULTIPROCESSOR
        }
        Attribute::MaxThreadsPerBlock => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
        Attribute::SharedMemoryPerBlock => {
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK
        }
        Attribute::RegistersPerBlock => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_REGISTERS_PER_BLOCK,
        Attribute::WarpSize => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE,
        Attribute::L2CacheSize => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_L2_CACHE_SIZE,
        Attribute::ConcurrentKernels => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_CONCURRENT_KERNELS,
        Attribute::AsyncEngineCount => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_ASYNC_ENGINE_COUNT,
        Attribute::CooperativeLaunch => CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COOPERATIVE_LAUNCH,
    }
}

/// Process-wide CUDA loader.
pub static CUDA: ProviderLoader<'static, CudaDriver> =
    ProviderLoader::new(&DL_ERRORS, CudaDriver::open);

/// Loads the CUDA driver if needed and reports whether it is usable.
pub fn available() -> bool {
    CUDA.check_available()
}

pub fn device_count() -> Result<u32, ProbeError> {
    CUDA.device_count()
}

pub fn device_properties(index: i64) -> Result<GpuProperties, ProbeError> {
    CUDA.properties(index)
}

/// Unloads the CUDA driver. A later [`available`] call loads it again.
pub fn cleanup() {
    CUDA.clean()
}
