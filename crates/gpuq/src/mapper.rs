//! Translation of per-device vendor queries into [`GpuProperties`].

use std::ffi::c_char;

use crate::error::ProbeError;
use crate::properties::non_negative;
use crate::properties::non_negative_bytes;
use crate::properties::GpuProperties;
use crate::properties::DEVICE_NAME_CAPACITY;
use crate::provider::Provider;

/// Device attributes read into the record, named after the record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    ComputeCapabilityMajor,
    ComputeCapabilityMinor,
    MultiprocessorCount,
    MaxThreadsPerMultiprocessor,
    SharedMemoryPerMultiprocessor,
    RegistersPerMultiprocessor,
    MaxBlocksPerMultiprocessor,
    MaxThreadsPerBlock,
    SharedMemoryPerBlock,
    RegistersPerBlock,
    WarpSize,
    L2CacheSize,
    ConcurrentKernels,
    AsyncEngineCount,
    CooperativeLaunch,
}

impl Attribute {
    pub const ALL: [Attribute; 15] = [
        Attribute::ComputeCapabilityMajor,
        Attribute::ComputeCapabilityMinor,
        Attribute::MultiprocessorCount,
        Attribute::MaxThreadsPerMultiprocessor,
        Attribute::SharedMemoryPerMultiprocessor,
        Attribute::RegistersPerMultiprocessor,
        Attribute::MaxBlocksPerMultiprocessor,
        Attribute::MaxThreadsPerBlock,
        Attribute::SharedMemoryPerBlock,
        Attribute::RegistersPerBlock,
        Attribute::WarpSize,
        Attribute::L2CacheSize,
        Attribute::ConcurrentKernels,
        Attribute::AsyncEngineCount,
        Attribute::CooperativeLaunch,
    ];

    pub const fn field(self) -> &'static str {
        match self {
            Attribute::ComputeCapabilityMajor => "major",
            Attribute::ComputeCapabilityMinor => "minor",
            Attribute::MultiprocessorCount => "sms_count",
            Attribute::MaxThreadsPerMultiprocessor => "sm_threads",
            Attribute::SharedMemoryPerMultiprocessor => "sm_shared_memory",
            Attribute::RegistersPerMultiprocessor => "sm_registers",
            Attribute::MaxBlocksPerMultiprocessor => "sm_blocks",
            Attribute::MaxThreadsPerBlock => "block_threads",
            Attribute::SharedMemoryPerBlock => "block_shared_memory",
            Attribute::RegistersPerBlock => "block_registers",
            Attribute::WarpSize => "warp_size",
            Attribute::L2CacheSize => "l2_cache_size",
            Attribute::ConcurrentKernels => "concurrent_kernels",
            Attribute::AsyncEngineCount => "async_engines_count",
            Attribute::CooperativeLaunch => "cooperative",
        }
    }
}

/// Per-device queries a provider answers through its own entry points.
pub(crate) trait DeviceQuery {
    const PROVIDER: Provider;

    /// Writes the NUL-terminated device name into `buf`.
    fn name(&self, buf: &mut [c_char]) -> Result<(), ProbeError>;

    /// Total device memory in bytes.
    fn total_memory(&self) -> Result<u64, ProbeError>;

    fn attribute(&self, attribute: Attribute) -> Result<i32, ProbeError>;
}

/// Builds the record for device `index`, stopping at the first failed call.
pub(crate) fn map_properties<Q: DeviceQuery>(
    query: &Q,
    index: u32,
) -> Result<GpuProperties, ProbeError> {
    let provider = Q::PROVIDER;
    let mut props = GpuProperties::for_device(provider, index);

    let mut name: [c_char; DEVICE_NAME_CAPACITY] = [0; DEVICE_NAME_CAPACITY];
    query.name(&mut name)?;
    if props.name.set_from_c_buf(&name) {
        tracing::debug!(%provider, index, "device name truncated");
    }

    props.total_memory = query.total_memory()?;

    let count = |attribute: Attribute| -> Result<u32, ProbeError> {
        let value = query.attribute(attribute)?;
        non_negative(provider, attribute.field(), value.into())
    };
    let bytes = |attribute: Attribute| -> Result<u64, ProbeError> {
        let value = query.attribute(attribute)?;
        non_negative_bytes(provider, attribute.field(), value.into())
    };
    let flag = |attribute: Attribute| -> Result<bool, ProbeError> {
        Ok(query.attribute(attribute)? != 0)
    };

    props.major = count(Attribute::ComputeCapabilityMajor)?;
    props.minor = count(Attribute::ComputeCapabilityMinor)?;
    props.sms_count = count(Attribute::MultiprocessorCount)?;
    props.sm_threads = count(Attribute::MaxThreadsPerMultiprocessor)?;
    props.sm_shared_memory = bytes(Attribute::SharedMemoryPerMultiprocessor)?;
    props.sm_registers = count(Attribute::RegistersPerMultiprocessor)?;
    props.sm_blocks = count(Attribute::MaxBlocksPerMultiprocessor)?;
    props.block_threads = count(Attribute::MaxThreadsPerBlock)?;
    props.block_shared_memory = bytes(Attribute::SharedMemoryPerBlock)?;
    props.block_registers = count(Attribute::RegistersPerBlock)?;
    props.warp_size = count(Attribute::WarpSize)?;
    props.l2_cache_size = bytes(Attribute::L2CacheSize)?;
    props.concurrent_kernels = flag(Attribute::ConcurrentKernels)?;
    props.async_engines_count = count(Attribute::AsyncEngineCount)?;
    props.cooperative = flag(Attribute::CooperativeLaunch)?;

    Ok(props)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::fixed_str::FixedStr;

    struct Table {
        name: Vec<u8>,
        fail_on: Option<Attribute>,
        negative: Option<Attribute>,
        calls: Cell<usize>,
    }

    impl Table {
        fn new(name: &[u8]) -> Self {
            Self {
                name: name.to_vec(),
                fail_on: None,
                negative: None,
                calls: Cell::new(0),
            }
        }
    }

    impl DeviceQuery for Table {
        const PROVIDER: Provider = Provider::Cuda;

        fn name(&self, buf: &mut [c_char]) -> Result<(), ProbeError> {
            // behave like cuDeviceGetName: copy at most len - 1 bytes
            let n = self.name.len().min(buf.len() - 1);
            for (dst, src) in buf.iter_mut().zip(&self.name[..n]) {
                *dst = *src as c_char;
            }
            buf[n] = 0;
            Ok(())
        }

        fn total_memory(&self) -> Result<u64, ProbeError> {
            Ok(24 << 30)
        }

        fn attribute(&self, attribute: Attribute) -> Result<i32, ProbeError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_on == Some(attribute) {
                return Err(ProbeError::VendorCall {
                    provider: Provider::Cuda,
                    function: "cuDeviceGetAttribute",
                    code: 1,
                    message: None,
                });
            }
            if self.negative == Some(attribute) {
                return Ok(-1);
            }
            Ok(match attribute {
                Attribute::ComputeCapabilityMajor => 8,
                Attribute::ComputeCapabilityMinor => 9,
                Attribute::MultiprocessorCount => 128,
                Attribute::MaxThreadsPerMultiprocessor => 1536,
                Attribute::SharedMemoryPerMultiprocessor => 102_400,
                Attribute::RegistersPerMultiprocessor => 65_536,
                Attribute::MaxBlocksPerMultiprocessor => 24,
                Attribute::MaxThreadsPerBlock => 1024,
                Attribute::SharedMemoryPerBlock => 49_152,
                Attribute::RegistersPerBlock => 65_536,
                Attribute::WarpSize => 32,
                Attribute::L2CacheSize => 75_497_472,
                Attribute::ConcurrentKernels => 1,
                Attribute::AsyncEngineCount => 2,
                Attribute::CooperativeLaunch => 0,
            })
        }
    }

    #[test]
    fn maps_every_field() {
        let props = map_properties(&Table::new(b"NVIDIA GeForce RTX 4090"), 1).unwrap();

        let expected = GpuProperties {
            ord: 1,
            provider: FixedStr::from_str_truncate("CUDA"),
            index: 1,
            name: FixedStr::from_str_truncate("NVIDIA GeForce RTX 4090"),
            major: 8,
            minor: 9,
            total_memory: 24 << 30,
            sms_count: 128,
            sm_threads: 1536,
            sm_shared_memory: 102_400,
            sm_registers: 65_536,
            sm_blocks: 24,
            block_threads: 1024,
            block_shared_memory: 49_152,
            block_registers: 65_536,
            warp_size: 32,
            l2_cache_size: 75_497_472,
            concurrent_kernels: true,
            async_engines_count: 2,
            cooperative: false,
        };
        assert_eq!(props, expected);
    }

    #[test]
    fn long_names_are_truncated() {
        let long = vec![b'x'; 300];
        let props = map_properties(&Table::new(&long), 0).unwrap();
        assert_eq!(props.name.len(), DEVICE_NAME_CAPACITY - 1);
    }

    #[test]
    fn first_failure_stops_mapping() {
        let mut table = Table::new(b"gpu");
        table.fail_on = Some(Attribute::MultiprocessorCount);
        let err = map_properties(&table, 0).unwrap_err();
        assert!(matches!(err, ProbeError::VendorCall { .. }));
        assert_eq!(table.calls.get(), 3);
    }

    #[test]
    fn negative_attribute_is_invalid() {
        let mut table = Table::new(b"gpu");
        table.negative = Some(Attribute::L2CacheSize);
        assert_eq!(
            map_properties(&table, 0),
            Err(ProbeError::InvalidValue {
                provider: Provider::Cuda,
                field: "l2_cache_size",
                value: -1,
            })
        );
    }
}
