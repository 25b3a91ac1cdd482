//! `*_VISIBLE_DEVICES` handling.

use std::env;

use crate::error::ProbeError;
use crate::provider::Provider;

/// System indices of the devices each provider exposes to this process.
///
/// `None` for a provider means no restriction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleDevices {
    cuda: Option<Vec<u32>>,
    hip: Option<Vec<u32>>,
}

impl VisibleDevices {
    /// Lists are sorted and deduplicated.
    pub fn new(cuda: Option<Vec<u32>>, hip: Option<Vec<u32>>) -> Self {
        Self {
            cuda: cuda.map(normalize),
            hip: hip.map(normalize),
        }
    }

    /// Reads `CUDA_VISIBLE_DEVICES` and `HIP_VISIBLE_DEVICES`.
    pub fn from_env() -> Result<Self, ProbeError> {
        let cuda = env::var(Provider::Cuda.visible_devices_var()).ok();
        let hip = env::var(Provider::Hip.visible_devices_var()).ok();
        Self::from_values(cuda.as_deref(), hip.as_deref())
    }

    /// Parses raw variable values. HIP inherits the CUDA list when its own
    /// variable is unset.
    pub fn from_values(cuda: Option<&str>, hip: Option<&str>) -> Result<Self, ProbeError> {
        let cuda = cuda
            .map(|value| parse_visible_devices(Provider::Cuda.visible_devices_var(), value))
            .transpose()?;
        let hip = match hip {
            Some(value) => Some(parse_visible_devices(
                Provider::Hip.visible_devices_var(),
                value,
            )?),
            None => cuda.clone(),
        };
        Ok(Self { cuda, hip })
    }

    pub fn list(&self, provider: Provider) -> Option<&[u32]> {
        match provider {
            Provider::Cuda => self.cuda.as_deref(),
            Provider::Hip => self.hip.as_deref(),
        }
    }

    /// Index under which the process sees the device with `system_index`,
    /// `None` when the device is hidden.
    pub fn local_index(&self, provider: Provider, system_index: u32) -> Option<u32> {
        match self.list(provider) {
            None => Some(system_index),
            Some(list) => list
                .binary_search(&system_index)
                .ok()
                .and_then(|pos| u32::try_from(pos).ok()),
        }
    }
}

/// Parses a comma-separated list of device indices.
///
/// An empty value hides every device. Negative entries are accepted but can
/// never match a device.
pub fn parse_visible_devices(var: &'static str, value: &str) -> Result<Vec<u32>, ProbeError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut indices = Vec::new();
    for entry in value.split(',') {
        let parsed: i64 = entry
            .trim()
            .parse()
            .map_err(|_| ProbeError::InvalidVisibleDevices {
                var,
                value: entry.to_string(),
            })?;
        if let Ok(index) = u32::try_from(parsed) {
            indices.push(index);
        }
    }
    Ok(normalize(indices))
}

fn normalize(mut indices: Vec<u32>) -> Vec<u32> {
    indices.sort_unstable();
    indices.dedup();
    indices
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn parses_sorted_unique() {
        assert_eq!(
            parse_visible_devices("CUDA_VISIBLE_DEVICES", "3, 1,1,0"),
            Ok(vec![0, 1, 3])
        );
        assert_eq!(parse_visible_devices("CUDA_VISIBLE_DEVICES", "-1,2"), Ok(vec![2]));
        assert_eq!(parse_visible_devices("CUDA_VISIBLE_DEVICES", ""), Ok(vec![]));
    }

    #[test]
    fn rejects_non_integers() {
        assert_eq!(
            parse_visible_devices("HIP_VISIBLE_DEVICES", "0,GPU-8f6c"),
            Err(ProbeError::InvalidVisibleDevices {
                var: "HIP_VISIBLE_DEVICES",
                value: "GPU-8f6c".to_string(),
            })
        );
        assert!(parse_visible_devices("CUDA_VISIBLE_DEVICES", "0,,1").is_err());
    }

    #[test]
    fn hip_inherits_cuda_list() {
        let visible = VisibleDevices::from_values(Some("1"), None).unwrap();
        assert_eq!(visible.list(Provider::Hip), Some([1].as_slice()));

        let visible = VisibleDevices::from_values(Some("1"), Some("0,2")).unwrap();
        assert_eq!(visible.list(Provider::Cuda), Some([1].as_slice()));
        assert_eq!(visible.list(Provider::Hip), Some([0, 2].as_slice()));

        let visible = VisibleDevices::from_values(None, Some("0")).unwrap();
        assert_eq!(visible.list(Provider::Cuda), None);
    }

    #[test]
    fn local_index_is_position_in_list() {
        let visible = VisibleDevices::new(Some(vec![5, 2]), None);
        assert_eq!(visible.local_index(Provider::Cuda, 2), Some(0));
        assert_eq!(visible.local_index(Provider::Cuda, 5), Some(1));
        assert_eq!(visible.local_index(Provider::Cuda, 0), None);
        assert_eq!(visible.local_index(Provider::Hip, 7), Some(7));
        assert_eq!(VisibleDevices::default().local_index(Provider::Cuda, 3), Some(3));
    }
}
