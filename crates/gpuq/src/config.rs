//! Where vendor libraries are looked for.
//!
//! Candidates are tried in this order, first match wins:
//! 1. an explicit path from `GPUQ_CUDA_LIB_PATH` / `GPUQ_HIP_LIB_PATH`,
//! 2. every location hint joined with every default library name,
//! 3. the default library names, resolved by the platform loader,
//! 4. fixed absolute fallbacks (`$ROCM_PATH` first for HIP).

use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::ProbeError;
use crate::provider::Provider;

pub const CUDA_LIB_PATH_ENV: &str = "GPUQ_CUDA_LIB_PATH";
pub const HIP_LIB_PATH_ENV: &str = "GPUQ_HIP_LIB_PATH";
pub const LIB_HINTS_ENV: &str = "GPUQ_LIB_HINTS";
pub const ROCM_PATH_ENV: &str = "ROCM_PATH";

pub const MAX_LOCATION_HINTS: usize = 16;
pub const MAX_LOCATION_HINT_LEN: usize = 127;

/// `None` until hints were set explicitly, then the defaults from
/// `GPUQ_LIB_HINTS` are no longer consulted.
static LOCATION_HINTS: RwLock<Option<Vec<PathBuf>>> = RwLock::new(None);

#[cfg(target_os = "windows")]
const CUDA_LIB_NAMES: &[&str] = &["nvcuda.dll"];
#[cfg(not(target_os = "windows"))]
const CUDA_LIB_NAMES: &[&str] = &["libcuda.so.1", "libcuda.so"];

#[cfg(target_os = "windows")]
const HIP_LIB_NAMES: &[&str] = &["amdhip64_6.dll", "amdhip64.dll"];
#[cfg(not(target_os = "windows"))]
const HIP_LIB_NAMES: &[&str] = &["libamdhip64.so.6", "libamdhip64.so.5", "libamdhip64.so"];

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
const CUDA_FALLBACKS: &[&str] = &["/usr/lib/aarch64-linux-gnu/libcuda.so.1", "/usr/lib64/libcuda.so.1"];
#[cfg(all(target_os = "linux", not(target_arch = "aarch64")))]
const CUDA_FALLBACKS: &[&str] = &["/usr/lib/x86_64-linux-gnu/libcuda.so.1", "/usr/lib64/libcuda.so.1"];
#[cfg(not(target_os = "linux"))]
const CUDA_FALLBACKS: &[&str] = &[];

#[cfg(target_os = "linux")]
const HIP_FALLBACKS: &[&str] = &["/opt/rocm/lib/libamdhip64.so"];
#[cfg(not(target_os = "linux"))]
const HIP_FALLBACKS: &[&str] = &[];

/// Default library names for `provider` on this platform.
pub fn library_names(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Cuda => CUDA_LIB_NAMES,
        Provider::Hip => HIP_LIB_NAMES,
    }
}

fn lib_path_env(provider: Provider) -> &'static str {
    match provider {
        Provider::Cuda => CUDA_LIB_PATH_ENV,
        Provider::Hip => HIP_LIB_PATH_ENV,
    }
}

/// Replaces the location hints searched before the default names.
///
/// At most [`MAX_LOCATION_HINTS`] hints, each at most
/// [`MAX_LOCATION_HINT_LEN`] bytes. On error the previous hints stay in
/// place.
pub fn set_location_hints(hints: Vec<PathBuf>) -> Result<(), ProbeError> {
    validate_hints(&hints)?;
    tracing::debug!(?hints, "location hints updated");
    *LOCATION_HINTS
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hints);
    Ok(())
}

/// Drops explicitly set hints, falling back to `GPUQ_LIB_HINTS`.
pub fn restore_default_hints() {
    *LOCATION_HINTS
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
}

/// Location hints currently in effect.
pub fn location_hints() -> Vec<PathBuf> {
    let hints = LOCATION_HINTS
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match hints.as_ref() {
        Some(hints) => hints.clone(),
        None => default_hints(env::var_os(LIB_HINTS_ENV)),
    }
}

fn default_hints(raw: Option<OsString>) -> Vec<PathBuf> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let hints: Vec<PathBuf> = env::split_paths(&raw)
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    match validate_hints(&hints) {
        Ok(()) => hints,
        Err(err) => {
            tracing::warn!("ignoring {LIB_HINTS_ENV}: {err}");
            Vec::new()
        }
    }
}

fn validate_hints(hints: &[PathBuf]) -> Result<(), ProbeError> {
    if hints.len() > MAX_LOCATION_HINTS {
        return Err(ProbeError::TooManyLocationHints {
            count: hints.len(),
            max: MAX_LOCATION_HINTS,
        });
    }

    for hint in hints {
        let len = hint.as_os_str().len();
        if len > MAX_LOCATION_HINT_LEN {
            return Err(ProbeError::InvalidLocationHint {
                hint: hint.display().to_string(),
                len,
                max: MAX_LOCATION_HINT_LEN,
            });
        }
    }
    Ok(())
}

/// Ordered list of paths/names to hand to the platform loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryCandidates {
    pub provider: Provider,
    pub candidates: Vec<PathBuf>,
}

impl LibraryCandidates {
    /// Candidates from the current environment and location hints.
    pub fn for_provider(provider: Provider) -> Self {
        let rocm_path = match provider {
            Provider::Hip => env::var_os(ROCM_PATH_ENV).map(PathBuf::from),
            Provider::Cuda => None,
        };
        Self::build(
            provider,
            env::var_os(lib_path_env(provider)).map(PathBuf::from),
            &location_hints(),
            rocm_path.as_deref(),
        )
    }

    fn build(
        provider: Provider,
        explicit: Option<PathBuf>,
        hints: &[PathBuf],
        rocm_path: Option<&Path>,
    ) -> Self {
        let names = library_names(provider);
        let mut candidates = Vec::new();

        if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
            candidates.push(path);
        }

        for hint in hints {
            for name in names {
                candidates.push(hint.join(name));
            }
        }

        candidates.extend(names.iter().map(PathBuf::from));

        if let Some(root) = rocm_path {
            for name in names {
                candidates.push(root.join("lib").join(name));
            }
        }

        let fallbacks = match provider {
            Provider::Cuda => CUDA_FALLBACKS,
            Provider::Hip => HIP_FALLBACKS,
        };
        candidates.extend(fallbacks.iter().map(PathBuf::from));

        let mut seen = Vec::with_capacity(candidates.len());
        candidates.retain(|c| {
            if seen.contains(c) {
                false
            } else {
                seen.push(c.clone());
                true
            }
        });

        Self {
            provider,
            candidates,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.candidates.iter().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn explicit_path_comes_first() {
        let c = LibraryCandidates::build(
            Provider::Cuda,
            Some(PathBuf::from("/custom/libcuda.so")),
            &[],
            None,
        );
        assert_eq!(c.candidates[0], PathBuf::from("/custom/libcuda.so"));
        assert_eq!(c.candidates[1], PathBuf::from(CUDA_LIB_NAMES[0]));
    }

    #[test]
    fn empty_explicit_path_is_ignored() {
        let c = LibraryCandidates::build(Provider::Cuda, Some(PathBuf::new()), &[], None);
        assert_eq!(c.candidates[0], PathBuf::from(CUDA_LIB_NAMES[0]));
    }

    #[test]
    fn hints_precede_default_names() {
        let hints = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        let c = LibraryCandidates::build(Provider::Hip, None, &hints, None);

        let names = HIP_LIB_NAMES.len();
        assert_eq!(c.candidates[0], Path::new("/a").join(HIP_LIB_NAMES[0]));
        assert_eq!(c.candidates[names], Path::new("/b").join(HIP_LIB_NAMES[0]));
        assert_eq!(c.candidates[2 * names], PathBuf::from(HIP_LIB_NAMES[0]));
    }

    #[test]
    fn rocm_path_precedes_fixed_fallback() {
        let c = LibraryCandidates::build(Provider::Hip, None, &[], Some(Path::new("/opt/rocm-6.1")));
        let rocm = Path::new("/opt/rocm-6.1/lib").join(HIP_LIB_NAMES[0]);
        let pos = c.candidates.iter().position(|p| *p == rocm).unwrap();
        assert!(pos >= HIP_LIB_NAMES.len());
        for fallback in HIP_FALLBACKS {
            let fallback_pos = c
                .candidates
                .iter()
                .position(|p| p == Path::new(fallback))
                .unwrap();
            assert!(fallback_pos > pos);
        }
    }

    #[test]
    fn duplicates_are_dropped() {
        let c = LibraryCandidates::build(
            Provider::Cuda,
            Some(PathBuf::from(CUDA_LIB_NAMES[0])),
            &[],
            None,
        );
        let count = c
            .iter()
            .filter(|p| *p == Path::new(CUDA_LIB_NAMES[0]))
            .count();
        assert_eq!(count, 1);
        assert_eq!(c.candidates[0], PathBuf::from(CUDA_LIB_NAMES[0]));
    }

    #[test]
    fn candidate_order_is_deterministic() {
        let hints = vec![PathBuf::from("/x")];
        let a = LibraryCandidates::build(Provider::Hip, None, &hints, Some(Path::new("/r")));
        let b = LibraryCandidates::build(Provider::Hip, None, &hints, Some(Path::new("/r")));
        assert_eq!(a, b);
    }

    #[test]
    fn hint_limits() {
        let just_right = vec![PathBuf::from("t".repeat(MAX_LOCATION_HINT_LEN)); MAX_LOCATION_HINTS];
        assert_eq!(validate_hints(&just_right), Ok(()));

        let too_many = vec![PathBuf::from("/test"); MAX_LOCATION_HINTS + 1];
        assert_eq!(
            validate_hints(&too_many),
            Err(ProbeError::TooManyLocationHints {
                count: MAX_LOCATION_HINTS + 1,
                max: MAX_LOCATION_HINTS,
            })
        );

        let too_long = vec![PathBuf::from(format!(
            "/test{}",
            "t".repeat(MAX_LOCATION_HINT_LEN)
        ))];
        assert!(matches!(
            validate_hints(&too_long),
            Err(ProbeError::InvalidLocationHint { len, .. }) if len == MAX_LOCATION_HINT_LEN + 5
        ));
    }

    #[test]
    fn default_hints_from_path_list() {
        let raw = env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        assert_eq!(
            default_hints(Some(raw)),
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
        assert!(default_hints(None).is_empty());

        let too_many = env::join_paths(vec!["/x"; MAX_LOCATION_HINTS + 1]).unwrap();
        assert!(default_hints(Some(too_many)).is_empty());
    }

    #[test]
    fn set_and_restore_location_hints() {
        let hints = vec![PathBuf::from("/opt/vendor/lib")];
        set_location_hints(hints.clone()).unwrap();
        assert_eq!(location_hints(), hints);

        let rejected = set_location_hints(vec![PathBuf::from("/y"); MAX_LOCATION_HINTS + 1]);
        assert!(rejected.is_err());
        assert_eq!(location_hints(), hints);

        set_location_hints(Vec::new()).unwrap();
        assert!(location_hints().is_empty());

        restore_default_hints();
    }
}
