//! Enumeration across providers.
//!
//! Devices are numbered with a global ordinal: CUDA devices first, then HIP,
//! each in system index order. Ordinals only depend on which providers are
//! present, never on filters or visibility.

use std::fmt;

use serde::ser::SerializeStruct;
use serde::Serialize;
use serde::Serializer;

use crate::error::ProbeError;
use crate::properties::FieldValue;
use crate::properties::GpuProperties;
use crate::provider::Provider;
use crate::provider::Providers;
use crate::source::DeviceSource;

/// One GPU as seen from this process.
#[derive(Debug, Clone)]
pub struct Gpu {
    provider: Provider,
    /// `ord` is the global ordinal, `index` the system index.
    properties: GpuProperties,
    local_index: Option<u32>,
}

impl Gpu {
    pub fn ord(&self) -> u32 {
        self.properties.ord
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Index as seen by this process, `None` if `*_VISIBLE_DEVICES` hides
    /// the device.
    pub fn index(&self) -> Option<u32> {
        self.local_index
    }

    /// Index ignoring `*_VISIBLE_DEVICES`.
    pub fn system_index(&self) -> u32 {
        self.properties.index
    }

    pub fn is_visible(&self) -> bool {
        self.local_index.is_some()
    }

    pub fn name(&self) -> &str {
        self.properties.name.as_str()
    }

    pub fn properties(&self) -> &GpuProperties {
        &self.properties
    }
}

impl PartialEq for Gpu {
    /// Indistinguishable hardware. Compare [`Gpu::system_index`] to tell
    /// whether two values are the same physical device.
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider && self.properties.same_hardware(&other.properties)
    }
}

impl fmt::Display for Gpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gpu({}[{} -> ", self.provider, self.system_index())?;
        match self.local_index {
            Some(index) => write!(f, "{index}")?,
            None => f.write_str("-")?,
        }
        write!(f, "], '{}'){{", self.name())?;
        for (key, value) in self.properties.fields() {
            write!(f, "\n    {key}: {value}")?;
        }
        f.write_str("\n}")
    }
}

impl Serialize for Gpu {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let fields = self.properties.fields();
        let mut s = serializer.serialize_struct("Gpu", 5 + fields.len())?;
        s.serialize_field("ord", &self.ord())?;
        s.serialize_field("provider", &self.provider)?;
        s.serialize_field("index", &self.local_index)?;
        s.serialize_field("system_index", &self.system_index())?;
        s.serialize_field("name", self.name())?;
        for (key, value) in fields {
            match value {
                FieldValue::Int(v) => s.serialize_field(key, &v)?,
                FieldValue::Bool(v) => s.serialize_field(key, &v)?,
            }
        }
        s.end()
    }
}

/// A device selected by a query, before its properties are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    provider: Provider,
    ord: u32,
    system_index: u32,
    local_index: Option<u32>,
}

fn enumerate(
    source: &impl DeviceSource,
    providers: Providers,
    visible_only: bool,
) -> Result<Vec<Slot>, ProbeError> {
    let visible = source.visible_devices()?;

    let mut slots = Vec::new();
    let mut first_ord = 0u32;
    for provider in Provider::ALL {
        if !source.has_provider(provider) {
            continue;
        }
        let count = source.system_count(provider).inspect_err(|err| {
            tracing::warn!(%provider, "failed to count devices: {err}");
        })?;

        if providers.contains(provider) {
            for system_index in 0..count {
                let local_index = visible.local_index(provider, system_index);
                if visible_only && local_index.is_none() {
                    continue;
                }
                slots.push(Slot {
                    provider,
                    ord: first_ord + system_index,
                    system_index,
                    local_index,
                });
            }
        }
        first_ord += count;
    }
    Ok(slots)
}

fn load(source: &impl DeviceSource, slot: Slot) -> Result<Gpu, ProbeError> {
    let mut properties = source
        .system_properties(slot.provider, slot.system_index)
        .inspect_err(|err| {
            tracing::warn!(
                provider = %slot.provider,
                index = slot.system_index,
                "failed to read device: {err}"
            );
        })?;
    properties.ord = slot.ord;
    Ok(Gpu {
        provider: slot.provider,
        properties,
        local_index: slot.local_index,
    })
}

pub fn has_provider(source: &impl DeviceSource, provider: Provider) -> bool {
    source.has_provider(provider)
}

/// Number of devices matching `providers`, only visible ones if
/// `visible_only`.
pub fn count(
    source: &impl DeviceSource,
    providers: Providers,
    visible_only: bool,
) -> Result<u32, ProbeError> {
    let slots = enumerate(source, providers, visible_only)?;
    // bounded by the sum of two u32 device counts reported per provider
    Ok(u32::try_from(slots.len()).unwrap_or(u32::MAX))
}

/// The `n`-th device matching the filters.
pub fn get(
    source: &impl DeviceSource,
    n: usize,
    providers: Providers,
    visible_only: bool,
) -> Result<Gpu, ProbeError> {
    let slots = enumerate(source, providers, visible_only)?;
    let slot = slots.get(n).copied().ok_or(ProbeError::NoDevice {
        index: n,
        count: slots.len(),
    })?;
    load(source, slot)
}

/// Every device matching the filters, in ordinal order.
pub fn query(
    source: &impl DeviceSource,
    providers: Providers,
    visible_only: bool,
) -> Result<Vec<Gpu>, ProbeError> {
    enumerate(source, providers, visible_only)?
        .into_iter()
        .map(|slot| load(source, slot))
        .collect()
}

/// What a query must find to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Requirement {
    #[default]
    Nothing,
    /// At least one device matches the query.
    AnyDevice,
    /// Every listed provider has at least one device, counted with the same
    /// visibility as the query. [`Providers::ANY`] lists none.
    Providers(Providers),
}

impl Requirement {
    fn check(
        self,
        source: &impl DeviceSource,
        found: &[Gpu],
        visible_only: bool,
    ) -> Result<(), ProbeError> {
        match self {
            Requirement::Nothing => Ok(()),
            Requirement::AnyDevice if found.is_empty() => Err(ProbeError::NoMatchingDevice),
            Requirement::AnyDevice => Ok(()),
            Requirement::Providers(required) if required.is_any() => Ok(()),
            Requirement::Providers(required) => {
                for provider in required.iter() {
                    if count(source, provider.into(), visible_only)? == 0 {
                        return Err(ProbeError::RequiredProviderMissing { provider });
                    }
                }
                Ok(())
            }
        }
    }
}

/// [`query`] failing unless `required` is met.
pub fn query_required(
    source: &impl DeviceSource,
    providers: Providers,
    visible_only: bool,
    required: Requirement,
) -> Result<Vec<Gpu>, ProbeError> {
    let found = query(source, providers, visible_only)?;
    required.check(source, &found, visible_only)?;
    Ok(found)
}
