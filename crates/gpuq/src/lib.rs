//! Query CUDA and HIP GPUs without linking against either runtime.
//!
//! Vendor libraries are opened with `libloading` on first use and can be
//! released again with [`cuda::cleanup`] / [`hip::cleanup`].

pub mod backend;
pub mod config;
pub mod cuda;
pub mod dl_error;
pub mod error;
pub mod fixed_str;
pub mod hip;
pub mod loader;
pub mod mapper;
pub mod mock;
pub mod properties;
pub mod provider;
pub mod query;
pub mod source;
pub mod status;
pub mod visibility;

// Re-export the common entry points
pub use backend::DeviceBackend;
pub use error::ProbeError;
pub use mock::MockSource;
pub use properties::GpuProperties;
pub use provider::Provider;
pub use provider::Providers;
pub use query::count;
pub use query::get;
pub use query::has_provider;
pub use query::query;
pub use query::query_required;
pub use query::Gpu;
pub use query::Requirement;
pub use source::DeviceSource;
pub use source::SystemSource;
pub use status::cuda_info;
pub use status::GpuStatus;
pub use status::NvmlStatus;
pub use status::StatusSource;
