use std::fmt;
use std::ops::BitOr;
use std::ops::BitOrAssign;
use std::str::FromStr;

use serde::Serialize;

/// A GPU vendor runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Provider {
    #[serde(rename = "CUDA")]
    Cuda,
    #[serde(rename = "HIP")]
    Hip,
}

impl Provider {
    /// Enumeration order used when numbering devices across providers.
    pub const ALL: [Provider; 2] = [Provider::Cuda, Provider::Hip];

    pub const fn name(self) -> &'static str {
        match self {
            Provider::Cuda => "CUDA",
            Provider::Hip => "HIP",
        }
    }

    /// Environment variable restricting which devices the runtime exposes.
    pub const fn visible_devices_var(self) -> &'static str {
        match self {
            Provider::Cuda => "CUDA_VISIBLE_DEVICES",
            Provider::Hip => "HIP_VISIBLE_DEVICES",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Provider::Cuda => 0b01,
            Provider::Hip => 0b10,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" | "nvidia" => Ok(Provider::Cuda),
            "hip" | "rocm" | "amd" => Ok(Provider::Hip),
            other => Err(format!("unknown provider `{other}`, expected cuda or hip")),
        }
    }
}

/// Set of providers used to filter queries.
///
/// The empty set ([`Providers::ANY`]) means "no filter" and matches every
/// provider, same as [`Providers::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Providers(u8);

impl Providers {
    pub const ANY: Providers = Providers(0);
    pub const CUDA: Providers = Providers(Provider::Cuda.bit());
    pub const HIP: Providers = Providers(Provider::Hip.bit());
    pub const ALL: Providers = Providers(Provider::Cuda.bit() | Provider::Hip.bit());

    /// `true` for the empty set.
    pub const fn is_any(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, provider: Provider) -> bool {
        self.0 == 0 || self.0 & provider.bit() != 0
    }

    /// Providers matched by this filter, in enumeration order.
    pub fn iter(self) -> impl Iterator<Item = Provider> {
        Provider::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl From<Provider> for Providers {
    fn from(provider: Provider) -> Self {
        Providers(provider.bit())
    }
}

impl BitOr for Providers {
    type Output = Providers;

    fn bitor(self, rhs: Self) -> Self::Output {
        Providers(self.0 | rhs.0)
    }
}

impl BitOr<Provider> for Providers {
    type Output = Providers;

    fn bitor(self, rhs: Provider) -> Self::Output {
        self | Providers::from(rhs)
    }
}

impl BitOrAssign for Providers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn any_and_all_match_everything() {
        for provider in Provider::ALL {
            assert!(Providers::ANY.contains(provider));
            assert!(Providers::ALL.contains(provider));
        }
        assert_eq!(Providers::CUDA | Providers::HIP, Providers::ALL);
    }

    #[test]
    fn single_provider_filters() {
        assert_eq!(Providers::CUDA.iter().collect::<Vec<_>>(), vec![Provider::Cuda]);
        assert_eq!(Providers::HIP.iter().collect::<Vec<_>>(), vec![Provider::Hip]);
        assert_eq!(
            Providers::ANY.iter().collect::<Vec<_>>(),
            vec![Provider::Cuda, Provider::Hip]
        );
    }

    #[test]
    fn parse_provider_names() {
        assert_eq!("CUDA".parse::<Provider>(), Ok(Provider::Cuda));
        assert_eq!("rocm".parse::<Provider>(), Ok(Provider::Hip));
        assert!("metal".parse::<Provider>().is_err());
    }

    #[test]
    fn names_fit_record_capacity() {
        for provider in Provider::ALL {
            assert!(provider.name().len() < 8);
        }
    }
}
