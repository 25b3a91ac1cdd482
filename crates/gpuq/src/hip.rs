//! HIP runtime provider (ROCm).

use core::ffi;
use std::ffi::CStr;

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

#[allow(
    non_camel_case_types,
    non_upper_case_globals,
    dead_code,
    reason = "FFI types must match HIP API naming conventions"
)]
mod ffi_types {
    use super::*;

    pub type hipDevice_t = ffi::c_int;

    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct hipError_t(pub ffi::c_int);

    impl hipError_t {
        pub const hipSuccess: hipError_t = hipError_t(0);
        pub const hipErrorInvalidValue: hipError_t = hipError_t(1);
        pub const hipErrorNotInitialized: hipError_t = hipError_t(3);
        pub const hipErrorNoDevice: hipError_t = hipError_t(100);
        pub const hipErrorInvalidDevice: hipError_t = hipError_t(101);
    }

    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct hipDeviceAttribute_t(pub ffi::c_int);

    // values from hip_runtime_api.h, stable since ROCm 5.0
    impl hipDeviceAttribute_t {
        pub const hipDeviceAttributeAsyncEngineCount: hipDeviceAttribute_t =
            hipDeviceAttribute_t(2);
        pub const hipDeviceAttributeConcurrentKernels: hipDeviceAttribute_t =
            hipDeviceAttribute_t(8);
        pub const hipDeviceAttributeCooperativeLaunch: hipDeviceAttribute_t =
            hipDeviceAttribute_t(10);
        pub const hipDeviceAttributeL2CacheSize: hipDeviceAttribute_t = hipDeviceAttribute_t(19);
        pub const hipDeviceAttributeComputeCapabilityMajor: hipDeviceAttribute_t =
            hipDeviceAttribute_t(23);
        pub const hipDeviceAttributeMaxBlocksPerMultiProcessor: hipDeviceAttribute_t =
            hipDeviceAttribute_t(25);
        pub const hipDeviceAttributeMaxThreadsPerBlock: hipDeviceAttribute_t =
            hipDeviceAttribute_t(56);
        pub const hipDeviceAttributeMaxThreadsPerMultiProcessor: hipDeviceAttribute_t =
            hipDeviceAttribute_t(57);
        pub const hipDeviceAttributeComputeCapabilityMinor: hipDeviceAttribute_t =
            hipDeviceAttribute_t(61);
        pub const hipDeviceAttributeMultiprocessorCount: hipDeviceAttribute_t =
            hipDeviceAttribute_t(63);
        pub const hipDeviceAttributeMaxRegistersPerBlock: hipDeviceAttribute_t =
            hipDeviceAttribute_t(71);
        pub const hipDeviceAttributeMaxRegistersPerMultiprocessor: hipDeviceAttribute_t =
            hipDeviceAttribute_t(72);
        pub const hipDeviceAttributeMaxSharedMemoryPerBlock: hipDeviceAttribute_t =
            hipDeviceAttribute_t(74);
        pub const hipDeviceAttributeSharedMemPerMultiprocessor: hipDeviceAttribute_t =
            hipDeviceAttribute_t(76);
        pub const hipDeviceAttributeWarpSize: hipDeviceAttribute_t = hipDeviceAttribute_t(87);
    }
}

pub use ffi_types::hipDeviceAttribute_t;
pub use ffi_types::hipDevice_t;
pub use ffi_types::hipError_t;

pub type HipInit = unsafe extern "C" fn(flags: ffi::c_uint) -> hipError_t;
pub type HipGetDeviceCount = unsafe extern "C" fn(count: *mut ffi::c_int) -> hipError_t;
pub type HipDeviceGet =
    unsafe extern "C" fn(device: *mut hipDevice_t, ordinal: ffi::c_int) -> hipError_t;
pub type HipDeviceGetName = unsafe extern "C" fn(
    name: *mut ffi::c_char,
    len: ffi::c_int,
    device: hipDevice_t,
) -> hipError_t;
pub type HipDeviceTotalMem =
    unsafe extern "C" fn(bytes: *mut usize, device: hipDevice_t) -> hipError_t;
pub type HipDeviceGetAttribute = unsafe extern "C" fn(
    pi: *mut ffi::c_int,
    attr: hipDeviceAttribute_t,
    device_id: ffi::c_int,
) -> hipError_t;
pub type HipGetErrorString = unsafe extern "C" fn(error: hipError_t) -> *const ffi::c_char;

#[derive(Clone, Copy)]
pub struct HipFns {
    pub hip_init: HipInit,
    pub hip_get_device_count: HipGetDeviceCount,
    pub hip_device_get: HipDeviceGet,
    pub hip_device_get_name: HipDeviceGetName,
    pub hip_device_total_mem: HipDeviceTotalMem,
    pub hip_device_get_attribute: HipDeviceGetAttribute,
    pub hip_get_error_string: Option<HipGetErrorString>,
}

impl HipFns {
    /// # Safety
    ///
    /// `symbols` must come from a HIP runtime library.
    unsafe fn resolve(symbols: &mut Symbols<'_>) -> Option<Self> {
        let hip_init = symbols.required::<HipInit>("hipInit");
        let hip_get_device_count = symbols.required::<HipGetDeviceCount>("hipGetDeviceCount");
        let hip_device_get = symbols.required::<HipDeviceGet>("hipDeviceGet");
        let hip_device_get_name = symbols.required::<HipDeviceGetName>("hipDeviceGetName");
        let hip_device_total_mem = symbols.required::<HipDeviceTotalMem>("hipDeviceTotalMem");
        let hip_device_get_attribute =
            symbols.required::<HipDeviceGetAttribute>("hipDeviceGetAttribute");
        let hip_get_error_string = symbols.optional::<HipGetErrorString>("hipGetErrorString");

        Some(Self {
            hip_init: hip_init?,
            hip_get_device_count: hip_get_device_count?,
            hip_device_get: hip_device_get?,
            hip_device_get_name: hip_device_get_name?,
            hip_device_total_mem: hip_device_total_mem?,
            hip_device_get_attribute: hip_device_get_attribute?,
            hip_get_error_string,
        })
    }
}

/// An opened HIP runtime library and its resolved functions.
pub struct HipRuntime {
    fns: HipFns,
    _lib: Option<Library>,
}

impl HipRuntime {
    pub fn from_fns(fns: HipFns) -> Self {
        Self { fns, _lib: None }
    }

    pub fn open(errors: &mut ErrorAccumulator) -> Option<Self> {
        Self::open_from(&LibraryCandidates::for_provider(Provider::Hip), errors)
    }

    pub fn open_from(candidates: &LibraryCandidates, errors: &mut ErrorAccumulator) -> Option<Self> {
        let (lib, fns) = open_first(candidates, errors, |symbols| unsafe {
            HipFns::resolve(symbols)
        })?;
        Some(Self {
            fns,
            _lib: Some(lib),
        })
    }

    fn check(&self, function: &'static str, result: hipError_t) -> Result<(), ProbeError> {
        if result == hipError_t::hipSuccess {
            return Ok(());
        }
        let message = self.fns.hip_get_error_string.and_then(|get_error_string| {
            let message = unsafe { get_error_string(result) };
            (!message.is_null())
                .then(|| unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
        });
        let err = ProbeError::VendorCall {
            provider: Provider::Hip,
            function,
            code: result.0,
            message,
        };
        tracing::debug!("{err}");
        Err(err)
    }
}

impl VendorApi for HipRuntime {
    const PROVIDER: Provider = Provider::Hip;

    fn device_count(&self) -> Result<u32, ProbeError> {
        let result = unsafe { (self.fns.hip_init)(0) };
        if result == hipError_t::hipErrorNoDevice {
            return Ok(0);
        }
        self.check("hipInit", result)?;

        let mut count: ffi::c_int = 0;
        let result = unsafe { (self.fns.hip_get_device_count)(&mut count) };
        if result == hipError_t::hipErrorNoDevice {
            return Ok(0);
        }
        self.check("hipGetDeviceCount", result)?;
        non_negative(Provider::Hip, "device_count", count.into())
    }

    fn device_properties(&self, index: u32) -> Result<GpuProperties, ProbeError> {
        let ordinal = ffi::c_int::try_from(index).map_err(|_| ProbeError::InvalidValue {
            provider: Provider::Hip,
            field: "index",
            value: index.into(),
        })?;

        let mut device: hipDevice_t = 0;
        self.check("hipDeviceGet", unsafe {
            (self.fns.hip_device_get)(&mut device, ordinal)
        })?;

        map_properties(
            &HipDevice {
                runtime: self,
                device,
            },
            index,
        )
    }
}

struct HipDevice<'a> {
    runtime: &'a HipRuntime,
    device: hipDevice_t,
}

impl DeviceQuery for HipDevice<'_> {
    const PROVIDER: Provider = Provider::Hip;

    fn name(&self, buf: &mut [ffi::c_char]) -> Result<(), ProbeError> {
        let len = ffi::c_int::try_from(buf.len()).unwrap_or(ffi::c_int::MAX);
        self.runtime.check("hipDeviceGetName", unsafe {
            (self.runtime.fns.hip_device_get_name)(buf.as_mut_ptr(), len, self.device)
        })
    }

    fn total_memory(&self) -> Result<u64, ProbeError> {
        let mut bytes: usize = 0;
        self.runtime.check("hipDeviceTotalMem", unsafe {
            (self.runtime.fns.hip_device_total_mem)(&mut bytes, self.device)
        })?;
        Ok(bytes as u64)
    }

    fn attribute(&self, attribute: Attribute) -> Result<i32, ProbeError> {
        let mut value: ffi::c_int = 0;
        self.runtime.check("hipDeviceGetAttribute", unsafe {
            (self.runtime.fns.hip_device_get_attribute)(
                &mut value,
                hip_attribute(attribute),
                self.device,
            )
        })?;
        Ok(value)
    }
}

fn hip_attribute(attribute: Attribute) -> hipDeviceAttribute_t {
    match attribute {
        Attribute::ComputeCapabilityMajor => {
            hipDeviceAttribute_t::hipDeviceAttributeComputeCapabilityMajor
        }
        Attribute::ComputeCapabilityMinor => {
            hipDeviceAttribute_t::hipDeviceAttributeComputeCapabilityMinor
        }
        Attribute::MultiprocessorCount => hipDeviceAttribute_t::hipDeviceAttributeMultiprocessorCount,
        Attribute::MaxThreadsPerMultiprocessor => {
            hipDeviceAttribute_t::hipDeviceAttributeMaxThreadsPerMultiProcessor
        }
        Attribute::SharedMemoryPerMultiprocessor => {
            hipDeviceAttribute_t::hipDeviceAttributeSharedMemPerMultiprocessor
        }
        Attribute::RegistersPerMultiprocessor => {
            hipDeviceAttribute_t::hipDeviceAttributeMaxRegistersPerMultiprocessor
        }
        Attribute::MaxBlocksPerMultiprocessor => {
            hipDeviceAttribute_t::hipDeviceAttributeMaxBlocksPerMultiProcessor
        }
        Attribute::MaxThreadsPerBlock => hipDeviceAttribute_t::hipDeviceAttributeMaxThreadsPerBlock,
        Attribute::SharedMemoryPerBlock => {
            hipDeviceAttribute_t::hipDeviceAttributeMaxSharedMemoryPerBlock
        }
        Attribute::RegistersPerBlock => hipDeviceAttribute_t::hipDeviceAttributeMaxRegistersPerBlock,
        Attribute::WarpSize => hipDeviceAttribute_t::hipDeviceAttributeWarpSize,
        Attribute::L2CacheSize => hipDeviceAttribute_t::hipDeviceAttributeL2CacheSize,
        Attribute::ConcurrentKernels => hipDeviceAttribute_t::hipDeviceAttributeConcurrentKernels,
        Attribute::AsyncEngineCount => hipDeviceAttribute_t::hipDeviceAttributeAsyncEngineCount,
        Attribute::CooperativeLaunch => hipDeviceAttribute_t::hipDeviceAttributeCooperativeLaunch,
    }
}

/// Process-wide HIP loader.
pub static HIP: ProviderLoader<'static, HipRuntime> =
    ProviderLoader::new(&DL_ERRORS, HipRuntime::open);

pub fn available() -> bool {
    HIP.check_available()
}

pub fn device_count() -> Result<u32, ProbeError> {
    HIP.device_count()
}

pub fn device_properties(index: i64) -> Result<GpuProperties, ProbeError> {
    HIP.properties(index)
}

pub fn cleanup() {
    HIP.clean()
}
