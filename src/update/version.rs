use semver::Version;

use super::error::{Result, UpdateError};

/// Parse a version string (with or without 'v' prefix)
pub fn parse_version(version_str: &str) -> std::result::Result<Version, semver::Error> {
    let trimmed = version_str.trim();
    let cleaned = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(cleaned)
}

/// Parse a version advertised by the release feed
pub fn parse_remote(tag: &str) -> Result<Version> {
    parse_version(tag).map_err(|e| UpdateError::Parse(format!("invalid release tag '{}': {}", tag, e)))
}

/// Parse the locally installed version from configuration
pub fn parse_local(version_str: &str) -> Result<Version> {
    parse_version(version_str).map_err(|e| {
        UpdateError::Config(format!("invalid current_version '{}': {}", version_str, e))
    })
}

/// Returns true if remote is strictly newer than local under semver precedence.
/// Build metadata does not take part in the comparison.
pub fn is_newer(remote: &Version, local: &Version) -> bool {
    remote.cmp_precedence(local).is_gt()
}
