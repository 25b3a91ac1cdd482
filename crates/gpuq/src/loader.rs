//! Lazily opened, explicitly released vendor libraries.

use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::MutexGuard;

use libloading::Library;
use libloading::Symbol;

use crate::config::LibraryCandidates;
use crate::dl_error;
use crate::dl_error::ErrorAccumulator;
use crate::error::ProbeError;
use crate::properties::GpuProperties;
use crate::provider::Provider;

/// A resolved vendor function table.
pub trait VendorApi: Send {
    const PROVIDER: Provider;

    /// Number of devices the runtime reports.
    fn device_count(&self) -> Result<u32, ProbeError>;

    /// Properties of the device at `index`, which the caller has checked
    /// against [`VendorApi::device_count`].
    fn device_properties(&self, index: u32) -> Result<GpuProperties, ProbeError>;
}

/// Opens a provider, recording every failed attempt in the accumulator.
pub type OpenFn<A> = fn(&mut ErrorAccumulator) -> Option<A>;

/// Per-provider slot: `None` is UNINITIALIZED, `Some` is LOADED.
///
/// Vendor calls run while the slot is locked, so [`ProviderLoader::clean`]
/// never unloads a library under an in-flight call.
pub struct ProviderLoader<'e, A> {
    errors: &'e Mutex<ErrorAccumulator>,
    open: OpenFn<A>,
    slot: Mutex<Option<A>>,
    open_attempts: AtomicUsize,
}

impl<'e, A> ProviderLoader<'e, A> {
    pub const fn new(errors: &'e Mutex<ErrorAccumulator>, open: OpenFn<A>) -> Self {
        Self {
            errors,
            open,
            slot: Mutex::new(None),
            open_attempts: AtomicUsize::new(0),
        }
    }
}

impl<A: VendorApi> ProviderLoader<'_, A> {
    /// Opens the provider's library unless it is already loaded.
    ///
    /// Failed attempts are appended to the error accumulator, a successful
    /// open resets it.
    pub fn check_available(&self) -> bool {
        let mut slot = self.lock_slot();
        if slot.is_some() {
            return true;
        }

        self.open_attempts.fetch_add(1, Ordering::Relaxed);
        let mut errors = dl_error::lock(self.errors);
        match (self.open)(&mut errors) {
            Some(api) => {
                errors.record(None, false);
                *slot = Some(api);
                true
            }
            None => {
                tracing::debug!(
                    provider = %A::PROVIDER,
                    "runtime unavailable:\n{}",
                    errors.as_str()
                );
                false
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Releases the library and its resolved functions. No-op when nothing
    /// is loaded.
    pub fn clean(&self) {
        if self.lock_slot().take().is_some() {
            tracing::debug!(provider = %A::PROVIDER, "runtime unloaded");
        }
    }

    /// How many times the open routine actually ran.
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::Relaxed)
    }

    pub fn device_count(&self) -> Result<u32, ProbeError> {
        self.with_api(A::device_count)
    }

    /// Fills `out` with the properties of device `index`.
    ///
    /// `out` is only written on success.
    pub fn device_properties(&self, index: i64, out: &mut GpuProperties) -> Result<(), ProbeError> {
        self.with_api(|api| {
            let count = api.device_count()?;
            let checked = u32::try_from(index)
                .ok()
                .filter(|i| *i < count)
                .ok_or(ProbeError::IndexOutOfRange {
                    provider: A::PROVIDER,
                    index,
                    count,
                })?;

            *out = api.device_properties(checked)?;
            Ok(())
        })
    }

    /// [`ProviderLoader::device_properties`] returning a fresh record.
    pub fn properties(&self, index: i64) -> Result<GpuProperties, ProbeError> {
        let mut props = GpuProperties::default();
        self.device_properties(index, &mut props)?;
        Ok(props)
    }

    fn with_api<R>(&self, f: impl FnOnce(&A) -> Result<R, ProbeError>) -> Result<R, ProbeError> {
        let slot = self.lock_slot();
        let api = slot.as_ref().ok_or(ProbeError::NotLoaded {
            provider: A::PROVIDER,
        })?;
        f(api)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<A>> {
        // the slot is either empty or holds a fully resolved table
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Tries `candidates` in order until one opens and resolves.
///
/// Each failed open and each missing symbol is appended to `errors`. A
/// library missing a required symbol is closed before moving on.
pub(crate) fn open_first<T>(
    candidates: &LibraryCandidates,
    errors: &mut ErrorAccumulator,
    resolve: impl Fn(&mut Symbols<'_>) -> Option<T>,
) -> Option<(Library, T)> {
    let provider = candidates.provider;
    for path in candidates.iter() {
        let lib = match unsafe { Library::new(path) } {
            Ok(lib) => lib,
            Err(err) => {
                tracing::debug!(%provider, path = %path.display(), "failed to open: {err}");
                errors.record(Some(&err), true);
                continue;
            }
        };

        let mut symbols = Symbols::new(&lib, path);
        let resolved = resolve(&mut symbols);
        let missing = symbols.into_missing();
        match resolved {
            Some(table) if missing.is_empty() => {
                tracing::info!(%provider, path = %path.display(), "loaded runtime library");
                return Some((lib, table));
            }
            _ => {
                for err in &missing {
                    errors.record(Some(err), true);
                }
                tracing::debug!(
                    %provider,
                    path = %path.display(),
                    missing = missing.len(),
                    "library lacks required symbols"
                );
            }
        }
    }
    None
}

/// Symbol lookups against one opened library, collecting failures instead
/// of stopping at the first one.
pub(crate) struct Symbols<'l> {
    lib: &'l Library,
    path: &'l Path,
    missing: Vec<libloading::Error>,
}

impl<'l> Symbols<'l> {
    fn new(lib: &'l Library, path: &'l Path) -> Self {
        Self {
            lib,
            path,
            missing: Vec::new(),
        }
    }

    /// Resolves a required function; a miss is remembered.
    ///
    /// # Safety
    ///
    /// `F` must be the exact function pointer type of `name`.
    pub(crate) unsafe fn required<F: Copy>(&mut self, name: &str) -> Option<F> {
        match self.lib.get::<F>(name.as_bytes()) {
            Ok(sym) => Some(*sym),
            Err(err) => {
                tracing::debug!(path = %self.path.display(), "missing symbol {name}: {err}");
                self.missing.push(err);
                None
            }
        }
    }

    /// Resolves a function the provider can do without.
    ///
    /// # Safety
    ///
    /// `F` must be the exact function pointer type of `name`.
    pub(crate) unsafe fn optional<F: Copy>(&self, name: &str) -> Option<F> {
        self.lib
            .get::<F>(name.as_bytes())
            .ok()
            .map(|sym: Symbol<'_, F>| *sym)
    }

    fn into_missing(self) -> Vec<libloading::Error> {
        self.missing
    }
}
