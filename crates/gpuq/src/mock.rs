//! A simulated system for tests and dry runs.

use crate::error::ProbeError;
use crate::properties::GpuProperties;
use crate::provider::Provider;
use crate::source::DeviceSource;
use crate::visibility::VisibleDevices;

/// Every simulated device is a copy of one template record.
///
/// `{}` in the template name is replaced with the provider name.
///
/// ```
/// use gpuq::mock::MockSource;
/// use gpuq::provider::Providers;
///
/// let mock = MockSource::new().cuda_count(Some(2)).hip_count(Some(1));
/// assert_eq!(gpuq::query::count(&mock, Providers::ANY, true).unwrap(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct MockSource {
    cuda_count: Option<u32>,
    hip_count: Option<u32>,
    cuda_visible: Option<Vec<u32>>,
    hip_visible: Option<Vec<u32>>,
    template: GpuProperties,
}

impl MockSource {
    /// One CUDA device, no HIP runtime.
    pub fn new() -> Self {
        Self {
            cuda_count: Some(1),
            hip_count: None,
            cuda_visible: None,
            hip_visible: None,
            template: Self::default_template(),
        }
    }

    pub fn default_template() -> GpuProperties {
        let mut props = GpuProperties::default();
        props.name.set("{} Mock Device");
        props.major = 1;
        props.minor = 2;
        props.total_memory = 8 << 30;
        props.sms_count = 12;
        props.sm_threads = 2048;
        props.sm_shared_memory = 16 << 10;
        props.sm_registers = 512;
        props.sm_blocks = 4;
        props.block_threads = 1024;
        props.block_shared_memory = 8 << 10;
        props.block_registers = 256;
        props.warp_size = 32;
        props.l2_cache_size = 8 << 20;
        props.concurrent_kernels = true;
        props.async_engines_count = 0;
        props.cooperative = true;
        props
    }

    /// `None` simulates a missing CUDA runtime.
    pub fn cuda_count(mut self, count: Option<u32>) -> Self {
        self.cuda_count = count;
        self
    }

    /// `None` simulates a missing HIP runtime.
    pub fn hip_count(mut self, count: Option<u32>) -> Self {
        self.hip_count = count;
        self
    }

    pub fn cuda_visible(mut self, visible: Vec<u32>) -> Self {
        self.cuda_visible = Some(visible);
        self
    }

    pub fn hip_visible(mut self, visible: Vec<u32>) -> Self {
        self.hip_visible = Some(visible);
        self
    }

    /// Replaces the template; provider, index and ordinal are set per
    /// device.
    pub fn template(mut self, template: GpuProperties) -> Self {
        self.template = template;
        self
    }

    fn count_of(&self, provider: Provider) -> Option<u32> {
        match provider {
            Provider::Cuda => self.cuda_count,
            Provider::Hip => self.hip_count,
        }
    }

    /// Visible list restricted to devices that exist. HIP falls back to the
    /// CUDA list like the real runtime does.
    fn visible_of(&self, provider: Provider) -> Option<Vec<u32>> {
        let count = self.count_of(provider).unwrap_or(0);
        let visible = match provider {
            Provider::Cuda => self.cuda_visible.as_ref(),
            Provider::Hip => self.hip_visible.as_ref().or(self.cuda_visible.as_ref()),
        }?;
        Some(visible.iter().copied().filter(|i| *i < count).collect())
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSource for MockSource {
    fn has_provider(&self, provider: Provider) -> bool {
        self.count_of(provider).is_some()
    }

    fn visible_devices(&self) -> Result<VisibleDevices, ProbeError> {
        Ok(VisibleDevices::new(
            self.visible_of(Provider::Cuda),
            self.visible_of(Provider::Hip),
        ))
    }

    fn system_count(&self, provider: Provider) -> Result<u32, ProbeError> {
        Ok(self.count_of(provider).unwrap_or(0))
    }

    fn system_properties(
        &self,
        provider: Provider,
        index: u32,
    ) -> Result<GpuProperties, ProbeError> {
        let count = self.count_of(provider).unwrap_or(0);
        if index >= count {
            return Err(ProbeError::IndexOutOfRange {
                provider,
                index: index.into(),
                count,
            });
        }

        let mut props = self.template.clone();
        props.provider.set(provider.name());
        props.index = index;
        props.ord = index;
        let name = props.name.as_str().replace("{}", provider.name());
        props.name.set(&name);
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn defaults_to_one_cuda_device() {
        let mock = MockSource::new();
        assert!(mock.has_provider(Provider::Cuda));
        assert!(!mock.has_provider(Provider::Hip));
        assert_eq!(mock.system_count(Provider::Cuda), Ok(1));
        assert_eq!(mock.system_count(Provider::Hip), Ok(0));
    }

    #[test]
    fn devices_copy_the_template() {
        let mock = MockSource::new().hip_count(Some(2));
        let props = mock.system_properties(Provider::Hip, 1).unwrap();
        assert_eq!(props.provider.as_str(), "HIP");
        assert_eq!(props.name.as_str(), "HIP Mock Device");
        assert_eq!(props.index, 1);
        assert_eq!(props.total_memory, 8 << 30);
        assert!(props.cooperative);

        assert_eq!(
            mock.system_properties(Provider::Hip, 2),
            Err(ProbeError::IndexOutOfRange {
                provider: Provider::Hip,
                index: 2,
                count: 2,
            })
        );
    }

    #[test]
    fn visible_lists_drop_missing_devices() {
        let mock = MockSource::new().cuda_count(Some(2)).cuda_visible(vec![1, 4]);
        let visible = mock.visible_devices().unwrap();
        assert_eq!(visible.list(Provider::Cuda), Some([1].as_slice()));
        assert_eq!(visible.list(Provider::Hip), Some(&[] as &[u32]));
    }

    #[test]
    fn hip_visibility_defaults_to_cuda_list() {
        let mock = MockSource::new().cuda_count(None).hip_count(Some(2)).cuda_visible(vec![0]);
        let visible = mock.visible_devices().unwrap();
        assert_eq!(visible.list(Provider::Hip), Some([0].as_slice()));

        let mock = mock.hip_visible(vec![0, 1]);
        let visible = mock.visible_devices().unwrap();
        assert_eq!(visible.list(Provider::Hip), Some([0, 1].as_slice()));

        let mock = MockSource::new().hip_count(Some(2));
        assert_eq!(mock.visible_devices().unwrap().list(Provider::Hip), None);
    }
}
