//! Where device information comes from.

use std::env;
use std::ffi::OsString;

use crate::backend::backend;
use crate::backend::DeviceBackend;
use crate::error::ProbeError;
use crate::properties::GpuProperties;
use crate::provider::Provider;
use crate::visibility::VisibleDevices;

/// A whole system of GPUs, genuine or simulated.
///
/// Indices are system-wide, i.e. they ignore `*_VISIBLE_DEVICES`.
pub trait DeviceSource {
    fn has_provider(&self, provider: Provider) -> bool;

    fn visible_devices(&self) -> Result<VisibleDevices, ProbeError>;

    /// Number of devices `provider` has; 0 when the provider is absent.
    fn system_count(&self, provider: Provider) -> Result<u32, ProbeError>;

    fn system_properties(&self, provider: Provider, index: u32)
        -> Result<GpuProperties, ProbeError>;
}

/// The GPUs of this machine, probed through the vendor runtimes.
pub struct SystemSource<'b> {
    cuda: &'b dyn DeviceBackend,
    hip: &'b dyn DeviceBackend,
}

impl SystemSource<'static> {
    /// Uses the process-wide loaders.
    pub fn new() -> Self {
        Self {
            cuda: backend(Provider::Cuda),
            hip: backend(Provider::Hip),
        }
    }
}

impl Default for SystemSource<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'b> SystemSource<'b> {
    pub fn with_backends(cuda: &'b dyn DeviceBackend, hip: &'b dyn DeviceBackend) -> Self {
        debug_assert_eq!(cuda.provider(), Provider::Cuda);
        debug_assert_eq!(hip.provider(), Provider::Hip);
        Self { cuda, hip }
    }

    fn backend(&self, provider: Provider) -> &'b dyn DeviceBackend {
        match provider {
            Provider::Cuda => self.cuda,
            Provider::Hip => self.hip,
        }
    }
}

impl DeviceSource for SystemSource<'_> {
    fn has_provider(&self, provider: Provider) -> bool {
        self.backend(provider).available()
    }

    fn visible_devices(&self) -> Result<VisibleDevices, ProbeError> {
        VisibleDevices::from_env()
    }

    fn system_count(&self, provider: Provider) -> Result<u32, ProbeError> {
        let backend = self.backend(provider);
        if !backend.available() {
            return Ok(0);
        }
        let _hidden = HiddenVisibility::hide();
        backend.device_count()
    }

    fn system_properties(
        &self,
        provider: Provider,
        index: u32,
    ) -> Result<GpuProperties, ProbeError> {
        let _hidden = HiddenVisibility::hide();
        self.backend(provider).device_properties(index.into())
    }
}

/// Removes every `*_VISIBLE_DEVICES` variable until dropped.
///
/// The environment is process-wide: other threads reading these variables
/// in the meantime see them unset.
struct HiddenVisibility {
    saved: Vec<(&'static str, OsString)>,
}

impl HiddenVisibility {
    fn hide() -> Self {
        let mut saved = Vec::new();
        for provider in Provider::ALL {
            let var = provider.visible_devices_var();
            if let Some(value) = env::var_os(var) {
                env::remove_var(var);
                saved.push((var, value));
            }
        }
        Self { saved }
    }
}

impl Drop for HiddenVisibility {
    fn drop(&mut self) {
        for (var, value) in self.saved.drain(..) {
            env::set_var(var, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Records the visibility variable it sees while being queried.
    struct Recorder {
        provider: Provider,
        available: bool,
        seen: Mutex<Vec<Option<OsString>>>,
    }

    impl Recorder {
        fn new(provider: Provider, available: bool) -> Self {
            Self {
                provider,
                available,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn record(&self) {
            self.seen
                .lock()
                .unwrap()
                .push(env::var_os(self.provider.visible_devices_var()));
        }
    }

    impl DeviceBackend for Recorder {
        fn provider(&self) -> Provider {
            self.provider
        }

        fn available(&self) -> bool {
            self.available
        }

        fn device_count(&self) -> Result<u32, ProbeError> {
            self.record();
            Ok(3)
        }

        fn device_properties(&self, index: i64) -> Result<GpuProperties, ProbeError> {
            self.record();
            Ok(GpuProperties::for_device(self.provider, index as u32))
        }

        fn cleanup(&self) {}
    }

    #[test]
    fn visibility_is_hidden_while_probing() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var("CUDA_VISIBLE_DEVICES", "1");
        env::remove_var("HIP_VISIBLE_DEVICES");

        let cuda = Recorder::new(Provider::Cuda, true);
        let hip = Recorder::new(Provider::Hip, false);
        let source = SystemSource::with_backends(&cuda, &hip);

        assert_eq!(source.system_count(Provider::Cuda), Ok(3));
        assert_eq!(source.system_properties(Provider::Cuda, 2).unwrap().index, 2);
        assert_eq!(*cuda.seen.lock().unwrap(), vec![None, None]);

        assert_eq!(env::var("CUDA_VISIBLE_DEVICES").as_deref(), Ok("1"));
        assert_eq!(env::var_os("HIP_VISIBLE_DEVICES"), None);
        assert_eq!(
            source.visible_devices().unwrap().list(Provider::Hip),
            Some([1].as_slice())
        );

        env::remove_var("CUDA_VISIBLE_DEVICES");
    }

    #[test]
    fn absent_provider_counts_zero() {
        let cuda = Recorder::new(Provider::Cuda, false);
        let hip = Recorder::new(Provider::Hip, false);
        let source = SystemSource::with_backends(&cuda, &hip);

        assert!(!source.has_provider(Provider::Cuda));
        assert_eq!(source.system_count(Provider::Cuda), Ok(0));
        assert!(cuda.seen.lock().unwrap().is_empty());
    }
}
