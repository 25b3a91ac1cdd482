use std::sync::LazyLock;

/// Defines the application version.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    let info = build_info();
    format!(
        "{}-{}{}",
        info.version,
        info.commit.unwrap_or("unknown"),
        if info.dirty { "-dirty" } else { "" }
    )
});

/// Where this binary came from, as captured by `build.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    /// `false` when built outside a git checkout.
    pub has_repo: bool,
    pub commit: Option<&'static str>,
    pub branch: Option<&'static str>,
    pub describe: Option<&'static str>,
    pub dirty: bool,
    pub build_timestamp: Option<&'static str>,
}

pub const fn build_info() -> BuildInfo {
    let commit = option_env!("VERGEN_GIT_SHA");
    BuildInfo {
        version: env!("IMAGE_VERSION"),
        has_repo: commit.is_some(),
        commit,
        branch: option_env!("VERGEN_GIT_BRANCH"),
        describe: option_env!("VERGEN_GIT_DESCRIBE"),
        dirty: matches!(option_env!("VERGEN_GIT_DIRTY"), Some(flag) if is_true(flag)),
        build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP"),
    }
}

const fn is_true(flag: &str) -> bool {
    let bytes = flag.as_bytes();
    bytes.len() == 4 && bytes[0] == b't' && bytes[1] == b'r' && bytes[2] == b'u' && bytes[3] == b'e'
}
