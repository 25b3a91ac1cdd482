use thiserror::Error;

use crate::provider::Provider;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{provider} runtime is not loaded")]
    NotLoaded { provider: Provider },

    #[error("{provider} device index {index} out of range (device count: {count})")]
    IndexOutOfRange {
        provider: Provider,
        index: i64,
        count: u32,
    },

    #[error("{provider} call `{function}` failed with code {code}{}", fmt_message(.message))]
    VendorCall {
        provider: Provider,
        function: &'static str,
        code: i32,
        message: Option<String>,
    },

    #[error("NVML call `{operation}` failed: {message}")]
    Nvml {
        operation: &'static str,
        message: String,
    },

    #[error("{provider} reported invalid value {value} for `{field}`")]
    InvalidValue {
        provider: Provider,
        field: &'static str,
        value: i64,
    },

    #[error("no GPU with index {index} (matching devices: {count})")]
    NoDevice { index: usize, count: usize },

    #[error("no GPU matches the query")]
    NoMatchingDevice,

    #[error("required provider {provider} has no matching GPU")]
    RequiredProviderMissing { provider: Provider },

    #[error(
        "{var} environment variable contains values that are not integer, this is not supported: {value:?}"
    )]
    InvalidVisibleDevices { var: &'static str, value: String },

    #[error("too many location hints: {count} (max {max})")]
    TooManyLocationHints { count: usize, max: usize },

    #[error("location hint {hint:?} is {len} bytes long (max {max})")]
    InvalidLocationHint { hint: String, len: usize, max: usize },
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}
