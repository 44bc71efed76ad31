//! Platform detection and default artifact locations.

use crate::error::ConfigError;

/// Default sandbox release to download.
pub const DEFAULT_VERSION: &str = "2.0.0";

const ARTIFACT_BUCKET: &str =
    "https://s3-us-west-1.amazonaws.com/build.nearprotocol.com/nearcore";

/// Maps an OS/architecture pair to the artifact platform key.
pub fn platform_key(os: &str, arch: &str) -> Result<&'static str, ConfigError> {
    match (os, arch) {
        ("linux", "x86_64") => Ok("Linux-x86_64"),
        ("macos", "x86_64") => Ok("Darwin-x86_64"),
        ("macos", "aarch64") => Ok("Darwin-arm64"),
        _ => Err(ConfigError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        }),
    }
}

/// Platform key of the running host.
pub fn current_platform() -> Result<&'static str, ConfigError> {
    platform_key(std::env::consts::OS, std::env::consts::ARCH)
}

/// Default download URL for `version` on `platform`.
///
/// Slashes in the version (e.g. `branch/commit`) are kept as path segments.
pub fn artifact_url(platform: &str, version: &str) -> String {
    format!("{ARTIFACT_BUCKET}/{platform}/{version}/near-sandbox.tar.gz")
}
