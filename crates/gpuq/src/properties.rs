use serde::Serialize;

use crate::error::ProbeError;
use crate::fixed_str::FixedStr;
use crate::provider::Provider;

pub const PROVIDER_NAME_CAPACITY: usize = 8;
pub const DEVICE_NAME_CAPACITY: usize = 256;

/// Normalized properties of one GPU.
///
/// Memory and cache sizes are in bytes. `major`/`minor` carry the
/// provider's own notion of compute capability (SM version on CUDA, GCN/RDNA
/// generation on HIP).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GpuProperties {
    pub ord: u32,
    pub provider: FixedStr<PROVIDER_NAME_CAPACITY>,
    pub index: u32,
    pub name: FixedStr<DEVICE_NAME_CAPACITY>,
    pub major: u32,
    pub minor: u32,
    pub total_memory: u64,
    pub sms_count: u32,
    pub sm_threads: u32,
    pub sm_shared_memory: u64,
    pub sm_registers: u32,
    pub sm_blocks: u32,
    pub block_threads: u32,
    pub block_shared_memory: u64,
    pub block_registers: u32,
    pub warp_size: u32,
    pub l2_cache_size: u64,
    pub concurrent_kernels: bool,
    pub async_engines_count: u32,
    pub cooperative: bool,
}

impl GpuProperties {
    /// An empty record tagged with `provider` and `index`.
    pub fn for_device(provider: Provider, index: u32) -> Self {
        Self {
            ord: index,
            provider: FixedStr::from_str_truncate(provider.name()),
            index,
            ..Self::default()
        }
    }

    /// Property name/value pairs, excluding the identifying fields (ord,
    /// provider, index, name).
    pub fn fields(&self) -> [(&'static str, FieldValue); 16] {
        [
            ("major", FieldValue::Int(self.major.into())),
            ("minor", FieldValue::Int(self.minor.into())),
            ("total_memory", FieldValue::Int(self.total_memory)),
            ("sms_count", FieldValue::Int(self.sms_count.into())),
            ("sm_threads", FieldValue::Int(self.sm_threads.into())),
            ("sm_shared_memory", FieldValue::Int(self.sm_shared_memory)),
            ("sm_registers", FieldValue::Int(self.sm_registers.into())),
            ("sm_blocks", FieldValue::Int(self.sm_blocks.into())),
            ("block_threads", FieldValue::Int(self.block_threads.into())),
            (
                "block_shared_memory",
                FieldValue::Int(self.block_shared_memory),
            ),
            ("block_registers", FieldValue::Int(self.block_registers.into())),
            ("warp_size", FieldValue::Int(self.warp_size.into())),
            ("l2_cache_size", FieldValue::Int(self.l2_cache_size)),
            (
                "concurrent_kernels",
                FieldValue::Bool(self.concurrent_kernels),
            ),
            (
                "async_engines_count",
                FieldValue::Int(self.async_engines_count.into()),
            ),
            ("cooperative", FieldValue::Bool(self.cooperative)),
        ]
    }

    /// Equal hardware, ignoring where and how the device was enumerated.
    pub fn same_hardware(&self, other: &Self) -> bool {
        self.provider == other.provider && self.name == other.name && self.fields() == other.fields()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Int(u64),
    Bool(bool),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Bool(true) => f.write_str("True"),
            FieldValue::Bool(false) => f.write_str("False"),
        }
    }
}

/// Converts a signed count reported by a vendor call.
pub(crate) fn non_negative(
    provider: Provider,
    field: &'static str,
    value: i64,
) -> Result<u32, ProbeError> {
    u32::try_from(value).map_err(|_| ProbeError::InvalidValue {
        provider,
        field,
        value,
    })
}

/// Converts a signed byte size reported by a vendor call.
pub(crate) fn non_negative_bytes(
    provider: Provider,
    field: &'static str,
    value: i64,
) -> Result<u64, ProbeError> {
    u64::try_from(value).map_err(|_| ProbeError::InvalidValue {
        provider,
        field,
        value,
    })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn for_device_tags_provider() {
        let props = GpuProperties::for_device(Provider::Hip, 3);
        assert_eq!(props.provider.as_str(), "HIP");
        assert_eq!(props.index, 3);
        assert_eq!(props.ord, 3);
        assert!(props.name.is_empty());
    }

    #[test]
    fn negative_values_are_rejected() {
        assert_eq!(non_negative(Provider::Cuda, "warp_size", 32), Ok(32));
        assert_eq!(
            non_negative(Provider::Cuda, "warp_size", -1),
            Err(ProbeError::InvalidValue {
                provider: Provider::Cuda,
                field: "warp_size",
                value: -1,
            })
        );
        assert!(non_negative_bytes(Provider::Hip, "l2_cache_size", -4096).is_err());
        assert_eq!(
            non_negative_bytes(Provider::Hip, "l2_cache_size", 4 << 20),
            Ok(4 << 20)
        );
    }

    #[test]
    fn same_hardware_ignores_indices() {
        let mut a = GpuProperties::for_device(Provider::Cuda, 0);
        a.name.set("NVIDIA A100-SXM4-80GB");
        a.total_memory = 80 << 30;

        let mut b = a.clone();
        b.index = 1;
        b.ord = 5;
        assert!(a.same_hardware(&b));
        assert!(a != b);

        b.total_memory = 40 << 30;
        assert!(!a.same_hardware(&b));
    }

    #[test]
    fn serializes_strings_as_text() {
        let mut props = GpuProperties::for_device(Provider::Cuda, 0);
        props.name.set("Mock");
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["provider"], "CUDA");
        assert_eq!(json["name"], "Mock");
        assert_eq!(json["concurrent_kernels"], false);
    }
}
