use crate::error::ProbeError;
use crate::loader::ProviderLoader;
use crate::loader::VendorApi;
use crate::properties::GpuProperties;
use crate::provider::Provider;

/// The probe surface every provider exposes.
pub trait DeviceBackend: Sync {
    fn provider(&self) -> Provider;

    /// Loads the provider if needed and reports whether it is usable.
    fn available(&self) -> bool;

    fn device_count(&self) -> Result<u32, ProbeError>;

    fn device_properties(&self, index: i64) -> Result<GpuProperties, ProbeError>;

    /// Releases the provider's library. Safe to call repeatedly.
    fn cleanup(&self);
}

impl<A: VendorApi> DeviceBackend for ProviderLoader<'_, A> {
    fn provider(&self) -> Provider {
        A::PROVIDER
    }

    fn available(&self) -> bool {
        self.check_available()
    }

    fn device_count(&self) -> Result<u32, ProbeError> {
        ProviderLoader::device_count(self)
    }

    fn device_properties(&self, index: i64) -> Result<GpuProperties, ProbeError> {
        self.properties(index)
    }

    fn cleanup(&self) {
        self.clean()
    }
}

/// The process-wide loader for `provider`.
pub fn backend(provider: Provider) -> &'static dyn DeviceBackend {
    match provider {
        Provider::Cuda => &crate::cuda::CUDA,
        Provider::Hip => &crate::hip::HIP,
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn global_backends_match_their_provider() {
        for provider in Provider::ALL {
            assert_eq!(backend(provider).provider(), provider);
        }
    }
}
